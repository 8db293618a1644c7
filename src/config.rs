//! Configuration management for mx4hyprland
//!
//! Maps window-manager events to haptic effect ids. The file is JSON:
//!
//! ```json
//! {
//!   "default_effect": 1,
//!   "events": {
//!     "workspace": 2,
//!     "activewindow": { "default": 3, "args": { "kitty,kitty": 4 } }
//!   }
//! }
//! ```
//!
//! Configuration is looked up at `~/.config/mx4hyprland/config.json`, then
//! `./config.json`. SIGHUP reloads it into the shared handle.
//!
//! TOML `config.toml` files written for the C++ daemon are not read; a
//! top-level `[events]` table converts one-to-one into the `events`
//! object above.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// Constants
// ============================================================================

/// Application name, used for config and runtime paths
pub const APP_NAME: &str = "mx4hyprland";

/// Default config file name
const CONFIG_FILE: &str = "config.json";

// ============================================================================
// Event Configuration
// ============================================================================

/// Per-event mapping with optional argument overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventConfig {
    /// Effect used when no argument matches
    #[serde(rename = "default", default, skip_serializing_if = "Option::is_none")]
    pub default_effect: Option<i32>,

    /// Effect per exact event argument
    #[serde(default)]
    pub args: HashMap<String, i32>,
}

/// Value of one `events` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventValue {
    /// Same effect for every occurrence
    Effect(i32),
    /// Effect chosen by argument
    Table(EventConfig),
}

// ============================================================================
// Main Configuration
// ============================================================================

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Effect for events without a specific mapping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_effect: Option<i32>,

    /// Event name to effect mapping
    #[serde(default)]
    pub events: HashMap<String, EventValue>,
}

impl AppConfig {
    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Candidate files, in lookup order
    pub fn search_paths(config_path: Option<&Path>) -> Vec<PathBuf> {
        match config_path {
            Some(path) => vec![path.to_path_buf()],
            None => Self::default_config_path()
                .into_iter()
                .chain(std::iter::once(PathBuf::from(CONFIG_FILE)))
                .collect(),
        }
    }

    /// Load the first readable candidate, or defaults
    ///
    /// Files that fail to read or parse are logged and skipped.
    pub fn load(config_path: Option<&Path>) -> Self {
        for path in Self::search_paths(config_path) {
            if !path.exists() {
                continue;
            }

            match Self::load_file(&path) {
                Ok(config) => {
                    tracing::info!(
                        path = %path.display(),
                        events = config.events.len(),
                        default_effect = ?config.default_effect,
                        "Config loaded"
                    );
                    return config;
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Failed to load config");
                }
            }
        }

        tracing::warn!("No config found, using defaults");
        Self::default()
    }

    /// Read and parse a single file
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref()).map_err(ConfigError::IoError)?;
        serde_json::from_str(&contents).map_err(ConfigError::ParseError)
    }

    /// Effect for an event, if any
    pub fn get_effect(&self, event_name: &str, event_args: &str) -> Option<i32> {
        match self.events.get(event_name) {
            None => self.default_effect,
            Some(EventValue::Effect(effect)) => Some(*effect),
            Some(EventValue::Table(table)) => table
                .args
                .get(event_args)
                .copied()
                .or(table.default_effect)
                .or(self.default_effect),
        }
    }
}

// ============================================================================
// Runtime paths
// ============================================================================

/// `$XDG_RUNTIME_DIR`, or `/run/user/<uid>` when unset
pub fn runtime_dir() -> PathBuf {
    dirs::runtime_dir().unwrap_or_else(|| {
        // SAFETY: getuid has no preconditions and cannot fail
        let uid = unsafe { libc::getuid() };
        PathBuf::from("/run/user").join(uid.to_string())
    })
}

// ============================================================================
// Shared Config (for reload)
// ============================================================================

use std::sync::{Arc, RwLock};

/// Thread-safe shared configuration for reload support
pub type SharedConfig = Arc<RwLock<AppConfig>>;

/// Load configuration into a shared handle
pub fn load_shared_config(config_path: Option<&Path>) -> SharedConfig {
    Arc::new(RwLock::new(AppConfig::load(config_path)))
}

/// Reload configuration and swap it into the shared handle
pub fn reload_shared_config(shared: &SharedConfig, config_path: Option<&Path>) {
    let config = AppConfig::load(config_path);
    match shared.write() {
        Ok(mut guard) => *guard = config,
        Err(poisoned) => *poisoned.into_inner() = config,
    }
    tracing::info!("Configuration reloaded");
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration error type
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error reading file
    IoError(std::io::Error),
    /// JSON parsing error
    ParseError(serde_json::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "I/O error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(e) => Some(e),
            ConfigError::ParseError(e) => Some(e),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AppConfig {
        serde_json::from_str(
            r#"{
                "default_effect": 1,
                "events": {
                    "workspace": 2,
                    "activewindow": { "default": 3, "args": { "kitty,kitty": 4 } },
                    "focusedmon": { "args": { "DP-1": 5 } }
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.default_effect, None);
        assert!(config.events.is_empty());
        assert_eq!(config.get_effect("workspace", "1"), None);
    }

    #[test]
    fn test_parse_event_shapes() {
        let config = sample();
        assert_eq!(config.events.get("workspace"), Some(&EventValue::Effect(2)));
        match config.events.get("activewindow") {
            Some(EventValue::Table(table)) => {
                assert_eq!(table.default_effect, Some(3));
                assert_eq!(table.args.get("kitty,kitty"), Some(&4));
            }
            other => panic!("unexpected entry: {:?}", other),
        }
    }

    #[test]
    fn test_get_effect_lookup_order() {
        let config = sample();
        // Unmapped event
        assert_eq!(config.get_effect("openwindow", "x"), Some(1));
        // Integer entry ignores args
        assert_eq!(config.get_effect("workspace", "9"), Some(2));
        // Table entry: exact arg, then table default
        assert_eq!(config.get_effect("activewindow", "kitty,kitty"), Some(4));
        assert_eq!(config.get_effect("activewindow", "firefox,Mozilla"), Some(3));
        // Table without default falls back to top-level default
        assert_eq!(config.get_effect("focusedmon", "HDMI-A-1"), Some(1));
        assert_eq!(config.get_effect("focusedmon", "DP-1"), Some(5));
    }

    #[test]
    fn test_empty_json() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"default_effect": 7}"#).unwrap();

        let config = AppConfig::load(Some(&path));
        assert_eq!(config.default_effect, Some(7));
    }

    #[test]
    fn test_load_invalid_json_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            AppConfig::load_file(&path),
            Err(ConfigError::ParseError(_))
        ));
        assert_eq!(AppConfig::load(Some(&path)), AppConfig::default());
    }

    #[test]
    fn test_load_missing_file() {
        let config = AppConfig::load(Some(Path::new("/nonexistent/mx4hyprland.json")));
        assert_eq!(config, AppConfig::default());
        assert!(matches!(
            AppConfig::load_file("/nonexistent/mx4hyprland.json"),
            Err(ConfigError::IoError(_))
        ));
    }

    #[test]
    fn test_search_paths() {
        let explicit = AppConfig::search_paths(Some(Path::new("/etc/mx.json")));
        assert_eq!(explicit, vec![PathBuf::from("/etc/mx.json")]);

        let defaults = AppConfig::search_paths(None);
        assert_eq!(defaults.last(), Some(&PathBuf::from("config.json")));
    }

    #[test]
    fn test_reload_swaps_shared_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"default_effect": 1}"#).unwrap();

        let shared = load_shared_config(Some(&path));
        assert_eq!(shared.read().unwrap().default_effect, Some(1));

        fs::write(&path, r#"{"events": {"workspace": 6}}"#).unwrap();
        reload_shared_config(&shared, Some(&path));

        let config = shared.read().unwrap();
        assert_eq!(config.default_effect, None);
        assert_eq!(config.get_effect("workspace", "2"), Some(6));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = sample();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_config_error_display() {
        let e = ConfigError::IoError(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(e.to_string().starts_with("I/O error"));
    }
}
