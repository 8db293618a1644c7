//! mx4hyprland daemon library
//!
//! Public API for testing and integration.

pub mod config;
pub mod device;
pub mod haptic;
pub mod hidpp;
pub mod hidraw;
pub mod hyprland;
pub mod ipc;

/// Re-export commonly used types
pub use config::{load_shared_config, AppConfig, ConfigError, SharedConfig};
pub use device::{ConnectionType, DeviceError, DeviceIdentity, HapticDevice, MxMaster4};
pub use haptic::{DispatchStats, EffectSink, HapticManager, MAX_QUEUE_SIZE};
pub use hyprland::HyprlandListener;
pub use ipc::IpcServer;
