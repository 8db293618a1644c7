//! mx4hyprland daemon
//!
//! Turns Hyprland window-manager events into haptic feedback on a
//! Logitech MX Master 4, over a Bolt receiver or Bluetooth.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use mx4hyprland::{
    config::{load_shared_config, reload_shared_config, SharedConfig},
    device::{ConnectionType, DeviceError, HapticDevice, MxMaster4},
    haptic::{EffectSink, HapticManager},
    hyprland::HyprlandListener,
    ipc::{default_socket_path, IpcServer},
};

/// Pause between effects in `--demo`
const DEMO_INTERVAL: Duration = Duration::from_secs(2);

/// Log verbosity accepted by `--log-level`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warning => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

/// Transport accepted by `--connection`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Connection {
    Bolt,
    Bluetooth,
}

impl From<Connection> for ConnectionType {
    fn from(connection: Connection) -> Self {
        match connection {
            Connection::Bolt => ConnectionType::Bolt,
            Connection::Bluetooth => ConnectionType::Bluetooth,
        }
    }
}

/// mx4hyprland - Hyprland events to MX Master 4 haptic feedback
#[derive(Parser, Debug)]
#[command(name = "mx4hyprland")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Enable verbose logging (same as --log-level debug)
    #[arg(short, long)]
    verbose: bool,

    /// Only look for the mouse on this transport
    #[arg(long, value_enum)]
    connection: Option<Connection>,

    /// hidraw node of a Bluetooth-connected mouse
    #[arg(long)]
    device_path: Option<PathBuf>,

    /// Print the discovered device and exit
    #[arg(long)]
    find: bool,

    /// Play every effect once and exit
    #[arg(long)]
    demo: bool,
}

impl Args {
    fn level(&self) -> Level {
        if self.verbose {
            Level::DEBUG
        } else {
            self.log_level.into()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.level())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = args.config.as_deref();
    let shared_config = load_shared_config(config_path);

    let Some(device) = MxMaster4::find(
        args.connection.map(ConnectionType::from),
        args.device_path.as_deref(),
    ) else {
        error!("MX Master 4 not found");
        return Err(DeviceError::DeviceNotFound.into());
    };

    if args.find {
        println!("{}", device.identity());
        return Ok(());
    }

    if args.demo {
        tokio::task::spawn_blocking(move || run_demo(device)).await??;
        return Ok(());
    }

    let manager = Arc::new(HapticManager::new(device));
    manager.start();
    let sink: Arc<dyn EffectSink> = manager.clone();

    let ipc = match IpcServer::bind(default_socket_path(), Arc::clone(&sink)) {
        Ok(server) => Some(server.spawn()),
        Err(e) => {
            error!("Failed to start IPC socket: {}", e);
            None
        }
    };

    let listener = HyprlandListener::new(Arc::clone(&sink), Arc::clone(&shared_config)).spawn();
    drop(sink);

    info!("mx4hyprland started");

    wait_for_shutdown(&shared_config, config_path).await?;

    info!("Shutting down...");

    listener.abort();
    let _ = listener.await;

    if let Some((server, task)) = ipc {
        task.abort();
        let _ = task.await;
        drop(server);
    }

    let stopping = Arc::clone(&manager);
    tokio::task::spawn_blocking(move || stopping.stop()).await?;

    let stats = manager.stats();
    info!(
        delivered = stats.delivered,
        dropped_full = stats.dropped_full,
        dropped_failed = stats.dropped_failed,
        reconnects = stats.reconnects,
        "Haptic dispatch summary"
    );

    Ok(())
}

/// Block until SIGINT/SIGTERM; SIGHUP reloads the config
async fn wait_for_shutdown(
    shared_config: &SharedConfig,
    config_path: Option<&Path>,
) -> std::io::Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            _ = interrupt.recv() => {
                info!("SIGINT received");
                return Ok(());
            }
            _ = terminate.recv() => {
                info!("SIGTERM received");
                return Ok(());
            }
            _ = hangup.recv() => {
                info!("SIGHUP received, reloading configuration");
                reload_shared_config(shared_config, config_path);
            }
        }
    }
}

/// Play effects 1..=15 directly on the link, then effect 0
fn run_demo(mut device: MxMaster4) -> Result<(), DeviceError> {
    info!(
        connection = %device.connection_type(),
        "--- Demonstrating haptic effects ---"
    );
    device.open()?;

    for effect_id in 1..=15 {
        info!("Playing effect {}...", effect_id);
        if let Err(e) = device.send_haptic_feedback(effect_id) {
            warn!("Failed to play effect {}: {}", effect_id, e);
            break;
        }
        std::thread::sleep(DEMO_INTERVAL);
    }

    let result = device.send_haptic_feedback(0);
    device.close();
    info!("--- Demo finished ---");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["mx4hyprland"]);
        assert!(args.config.is_none());
        assert_eq!(args.log_level, LogLevel::Info);
        assert!(!args.verbose);
        assert!(args.connection.is_none());
        assert!(!args.find);
        assert!(!args.demo);
        assert_eq!(args.level(), Level::INFO);
    }

    #[test]
    fn test_args_verbose_overrides_level() {
        let args = Args::parse_from(["mx4hyprland", "-l", "error", "--verbose"]);
        assert_eq!(args.level(), Level::DEBUG);
    }

    #[test]
    fn test_args_log_level_warning() {
        let args = Args::parse_from(["mx4hyprland", "--log-level", "warning"]);
        assert_eq!(args.level(), Level::WARN);
    }

    #[test]
    fn test_args_config_and_connection() {
        let args = Args::parse_from([
            "mx4hyprland",
            "-c",
            "/tmp/mx.json",
            "--connection",
            "bluetooth",
            "--device-path",
            "/dev/hidraw4",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/mx.json")));
        assert_eq!(args.connection.map(ConnectionType::from), Some(ConnectionType::Bluetooth));
        assert_eq!(args.device_path, Some(PathBuf::from("/dev/hidraw4")));
    }

    #[test]
    fn test_args_rejects_unknown_connection() {
        assert!(Args::try_parse_from(["mx4hyprland", "--connection", "usb"]).is_err());
    }

    #[test]
    fn test_args_find_and_demo() {
        let args = Args::parse_from(["mx4hyprland", "--find"]);
        assert!(args.find);
        let args = Args::parse_from(["mx4hyprland", "--demo"]);
        assert!(args.demo);
    }
}
