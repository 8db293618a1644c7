//! Dispatch engine driving a file-backed device link

use std::fs;
use std::path::Path;
use std::sync::Arc;

use mx4hyprland::{
    ConnectionType, DeviceIdentity, EffectSink, HapticDevice, HapticManager, MxMaster4,
};

/// Bytes consumed per acknowledgement read
const RESPONSE_LEN: usize = 20;

/// Short report length
const FRAME_LEN: usize = 7;

fn bolt_link(path: &Path) -> MxMaster4 {
    MxMaster4::new(DeviceIdentity {
        connection_type: ConnectionType::Bolt,
        path: path.to_path_buf(),
        device_index: Some(1),
    })
}

fn bluetooth_link(path: &Path) -> MxMaster4 {
    MxMaster4::new(DeviceIdentity {
        connection_type: ConnectionType::Bluetooth,
        path: path.to_path_buf(),
        device_index: None,
    })
}

#[test]
fn bolt_receives_two_identical_frames() {
    let node = tempfile::NamedTempFile::new().unwrap();
    // Readable bytes stand in for the receiver's acknowledgements
    fs::write(node.path(), vec![0u8; 4096]).unwrap();

    let manager = HapticManager::new(bolt_link(node.path()));
    manager.start();
    manager.trigger(3);
    manager.trigger(3);
    manager.stop();

    let contents = fs::read(node.path()).unwrap();
    let expected = [0x10, 0x01, 0x0B, 0x4E, 0x03, 0x00, 0x00];

    // Each send writes a frame and then consumes one response from the same offset
    let second = FRAME_LEN + RESPONSE_LEN;
    assert_eq!(&contents[..FRAME_LEN], &expected);
    assert_eq!(&contents[second..second + FRAME_LEN], &expected);
    assert_eq!(manager.stats().delivered, 2);
}

#[test]
fn bluetooth_drains_all_requests_on_stop() {
    let node = tempfile::NamedTempFile::new().unwrap();
    let manager = HapticManager::new(bluetooth_link(node.path()));
    manager.start();

    for effect in 1..=5 {
        manager.trigger(effect);
    }
    manager.stop();

    let contents = fs::read(node.path()).unwrap();
    assert_eq!(contents.len(), 5 * 20);
    for (i, frame) in contents.chunks(20).enumerate() {
        assert_eq!(&frame[..4], &[0x11, 0xFF, 0x0B, 0x4E]);
        assert_eq!(frame[4] as usize, i + 1);
    }
    assert_eq!(manager.pending(), 0);
}

#[test]
fn bolt_without_response_is_dropped_after_one_retry() {
    let node = tempfile::NamedTempFile::new().unwrap();
    let manager = HapticManager::new(bolt_link(node.path()));
    manager.start();
    manager.trigger(2);
    manager.stop();

    let stats = manager.stats();
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.reconnects, 1);
    assert_eq!(stats.dropped_failed, 1);

    // The resend starts from a fresh handle and overwrites the first frame
    let contents = fs::read(node.path()).unwrap();
    assert_eq!(contents.len(), FRAME_LEN);
    assert_eq!(contents[4], 2);
}

#[test]
fn invalid_effects_never_reach_the_wire() {
    let node = tempfile::NamedTempFile::new().unwrap();
    let manager = HapticManager::new(bluetooth_link(node.path()));
    manager.start();

    for effect in [-1, 16, 1000, 6] {
        manager.trigger(effect);
    }
    manager.stop();

    let contents = fs::read(node.path()).unwrap();
    assert_eq!(contents.len(), 20);
    assert_eq!(contents[4], 6);
    assert_eq!(manager.stats().dropped_failed, 3);
}

#[test]
fn missing_node_fails_open() {
    let mut link = bluetooth_link(Path::new("/nonexistent/hidraw0"));
    assert!(link.open().is_err());
    assert!(!link.is_open());
}

#[test]
fn manager_works_as_shared_sink() {
    let node = tempfile::NamedTempFile::new().unwrap();
    let manager = Arc::new(HapticManager::new(bluetooth_link(node.path())));
    manager.start();

    let sink: Arc<dyn EffectSink> = manager.clone();
    sink.trigger(8);
    manager.stop();

    let contents = fs::read(node.path()).unwrap();
    assert_eq!(contents[4], 8);
}
