//! HID++ packet codec for MX Master 4 haptic feedback
//!
//! Pure encoding of the haptic trigger command into the two byte layouts
//! the mouse understands:
//!
//! - **Bolt receiver**: a HID++ short (7 byte) or long (20 byte) report
//!   addressed to a device slot, carrying the 16-bit haptic feature id.
//! - **Bluetooth direct**: a fixed 20 byte long report with a vendor
//!   marker in bytes 1..=3 and the effect id in byte 4.
//!
//! Nothing in here does I/O. Callers validate effect ids before encoding.
//!
//! SPDX-License-Identifier: GPL-3.0

// ============================================================================
// Constants
// ============================================================================

/// HID++ report types
pub mod report_type {
    /// Short HID++ report (7 bytes)
    pub const SHORT: u8 = 0x10;
    /// Long HID++ report (20 bytes)
    pub const LONG: u8 = 0x11;
}

/// HID++ 2.0 feature IDs used by this daemon
pub mod features {
    /// MX Master 4 haptic motor (runtime only, nothing persists)
    pub const HAPTIC: u16 = 0x0B4E;
}

/// Length of a short HID++ report, including the report id
pub const SHORT_REPORT_LEN: usize = 7;

/// Length of a long HID++ report, including the report id
pub const LONG_REPORT_LEN: usize = 20;

/// Parameter bytes available in a short report
const SHORT_PARAMS_LEN: usize = SHORT_REPORT_LEN - 4;

/// Parameter bytes available in a long report
const LONG_PARAMS_LEN: usize = LONG_REPORT_LEN - 4;

/// Vendor/feature marker sent verbatim in Bluetooth frames (bytes 1..=3)
pub const BLUETOOTH_MARKER: [u8; 3] = [0xFF, 0x0B, 0x4E];

/// Lowest valid haptic effect id
pub const EFFECT_MIN: i32 = 0;

/// Highest valid haptic effect id
pub const EFFECT_MAX: i32 = 15;

/// Check that an effect id names one of the predefined waveforms
pub fn is_valid_effect(effect_id: i32) -> bool {
    (EFFECT_MIN..=EFFECT_MAX).contains(&effect_id)
}

// ============================================================================
// HID++ Message Types
// ============================================================================

/// HID++ short message (7 bytes) as sent through a Bolt receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HidppShortMessage {
    /// Device slot on the receiver
    pub device_index: u8,
    /// 16-bit feature identifier, sent big-endian
    pub feature_id: u16,
    /// Parameters (3 bytes)
    pub params: [u8; SHORT_PARAMS_LEN],
}

impl HidppShortMessage {
    /// Create a new short message with zeroed parameters
    pub fn new(device_index: u8, feature_id: u16) -> Self {
        Self {
            device_index,
            feature_id,
            params: [0; SHORT_PARAMS_LEN],
        }
    }

    /// Copy up to 3 parameter bytes, zero-padding the rest
    pub fn with_params(mut self, params: &[u8]) -> Self {
        let len = params.len().min(SHORT_PARAMS_LEN);
        self.params[..len].copy_from_slice(&params[..len]);
        self
    }

    /// Convert to bytes for sending
    pub fn to_bytes(&self) -> [u8; SHORT_REPORT_LEN] {
        let [hi, lo] = self.feature_id.to_be_bytes();
        [
            report_type::SHORT,
            self.device_index,
            hi,
            lo,
            self.params[0],
            self.params[1],
            self.params[2],
        ]
    }
}

/// HID++ long message (20 bytes) as sent through a Bolt receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidppLongMessage {
    /// Device slot on the receiver
    pub device_index: u8,
    /// 16-bit feature identifier, sent big-endian
    pub feature_id: u16,
    /// Parameters (16 bytes)
    pub params: [u8; LONG_PARAMS_LEN],
}

impl HidppLongMessage {
    /// Create a new long message with zeroed parameters
    pub fn new(device_index: u8, feature_id: u16) -> Self {
        Self {
            device_index,
            feature_id,
            params: [0; LONG_PARAMS_LEN],
        }
    }

    /// Copy up to 16 parameter bytes, zero-padding the rest
    pub fn with_params(mut self, params: &[u8]) -> Self {
        let len = params.len().min(LONG_PARAMS_LEN);
        self.params[..len].copy_from_slice(&params[..len]);
        self
    }

    /// Convert to bytes for sending
    pub fn to_bytes(&self) -> [u8; LONG_REPORT_LEN] {
        let mut bytes = [0u8; LONG_REPORT_LEN];
        bytes[0] = report_type::LONG;
        bytes[1] = self.device_index;
        bytes[2..4].copy_from_slice(&self.feature_id.to_be_bytes());
        bytes[4..].copy_from_slice(&self.params);
        bytes
    }
}

// ============================================================================
// Encoded frames
// ============================================================================

/// An encoded report ready to be written to a device node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Short report (report id 0x10)
    Short([u8; SHORT_REPORT_LEN]),
    /// Long report (report id 0x11)
    Long([u8; LONG_REPORT_LEN]),
}

impl Frame {
    /// Raw bytes of the frame
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Frame::Short(bytes) => bytes,
            Frame::Long(bytes) => bytes,
        }
    }

    /// Report id carried in byte 0
    pub fn report_id(&self) -> u8 {
        self.as_bytes()[0]
    }
}

/// Encode a HID++ command for a device behind a Bolt receiver
///
/// Payloads of up to 3 bytes use the short report, anything longer uses
/// the long report. Arguments beyond 16 bytes are truncated.
pub fn encode_bolt(device_index: Option<u8>, feature_id: u16, args: &[u8]) -> Frame {
    let device_index = device_index.unwrap_or(0);

    if args.len() <= SHORT_PARAMS_LEN {
        let msg = HidppShortMessage::new(device_index, feature_id).with_params(args);
        Frame::Short(msg.to_bytes())
    } else {
        let msg = HidppLongMessage::new(device_index, feature_id).with_params(args);
        Frame::Long(msg.to_bytes())
    }
}

/// Encode a haptic trigger for a device behind a Bolt receiver
pub fn encode_bolt_haptic(device_index: Option<u8>, effect_id: u8) -> Frame {
    encode_bolt(device_index, features::HAPTIC, &[effect_id])
}

/// Encode a haptic trigger for a directly connected Bluetooth device
pub fn encode_bluetooth_haptic(effect_id: u8) -> [u8; LONG_REPORT_LEN] {
    let mut packet = [0u8; LONG_REPORT_LEN];
    packet[0] = report_type::LONG;
    packet[1..4].copy_from_slice(&BLUETOOTH_MARKER);
    packet[4] = effect_id;
    packet
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidpp_constants() {
        assert_eq!(report_type::SHORT, 0x10);
        assert_eq!(report_type::LONG, 0x11);
        assert_eq!(features::HAPTIC, 0x0B4E);
    }

    #[test]
    fn test_effect_range() {
        assert!(is_valid_effect(0));
        assert!(is_valid_effect(15));
        assert!(!is_valid_effect(-1));
        assert!(!is_valid_effect(16));
        assert!(!is_valid_effect(1000));
    }

    #[test]
    fn test_bolt_haptic_uses_short_report() {
        let frame = encode_bolt_haptic(Some(2), 3);
        assert_eq!(frame.report_id(), report_type::SHORT);
        assert_eq!(frame.as_bytes(), &[0x10, 0x02, 0x0B, 0x4E, 0x03, 0x00, 0x00]);
    }

    #[test]
    fn test_bolt_missing_index_defaults_to_zero() {
        let frame = encode_bolt_haptic(None, 7);
        assert_eq!(frame.as_bytes()[1], 0x00);
        assert_eq!(frame.as_bytes()[4], 0x07);
    }

    #[test]
    fn test_bolt_long_payload_switches_report() {
        let frame = encode_bolt(Some(1), features::HAPTIC, &[1, 2, 3, 4]);
        assert_eq!(frame.as_bytes().len(), LONG_REPORT_LEN);

        let bytes = frame.as_bytes();
        assert_eq!(bytes[0], report_type::LONG);
        assert_eq!(bytes[1], 0x01);
        assert_eq!(&bytes[2..4], &[0x0B, 0x4E]);
        assert_eq!(&bytes[4..8], &[1, 2, 3, 4]);
        assert!(bytes[8..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_bolt_three_byte_payload_stays_short() {
        let frame = encode_bolt(Some(1), features::HAPTIC, &[0xAA, 0xBB, 0xCC]);
        assert_eq!(frame.as_bytes(), &[0x10, 0x01, 0x0B, 0x4E, 0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_long_message_truncates_params() {
        let args: Vec<u8> = (1..=20).collect();
        let bytes = HidppLongMessage::new(0xFF, features::HAPTIC)
            .with_params(&args)
            .to_bytes();
        assert_eq!(bytes[19], 16);
    }

    #[test]
    fn test_bluetooth_frame_layout() {
        let packet = encode_bluetooth_haptic(9);
        assert_eq!(packet.len(), 20);
        assert_eq!(&packet[..5], &[0x11, 0xFF, 0x0B, 0x4E, 0x09]);
        assert!(packet[5..].iter().all(|b| *b == 0));
    }
}
