//! MX Master 4 device link
//!
//! Discovers the mouse on one of two transports and sends haptic triggers
//! to it:
//!
//! - **Bolt**: the HID++ interface of a Logitech Bolt receiver, found by
//!   vendor id and the vendor-defined HID++ usage page. Every write is
//!   followed by a bounded (100ms) read that drains the acknowledgement.
//! - **Bluetooth**: the raw HID node the mouse exposes directly, found
//!   through the hidraw node database by name and vendor/product id.
//!   Writes are fire-and-forget.
//!
//! The link never closes itself on failure. Callers that see
//! [`DeviceError::DeviceDisconnected`] decide whether to close and reopen.
//!
//! The link is not internally synchronized; exactly one thread may use it
//! at a time (the dispatch worker owns it).
//!
//! SPDX-License-Identifier: GPL-3.0

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::hidpp::{self, encode_bluetooth_haptic, encode_bolt_haptic, LONG_REPORT_LEN};
use crate::hidraw::{DeviceDatabase, HidParent, ReceiverEnumerator, SysfsHidraw};

// ============================================================================
// Constants
// ============================================================================

/// Logitech vendor ID
pub const LOGITECH_VENDOR_ID: u16 = 0x046D;

/// MX Master 4 product ID when paired over Bluetooth
pub const MX_MASTER_4_BLUETOOTH_PID: u16 = 0xB042;

/// Substring of the kernel-reported product name
pub const MX_MASTER_4_NAME: &str = "MX Master 4";

/// HID usage page of the vendor-defined HID++ collection
pub const HIDPP_USAGE_PAGE: u16 = 0xFF00;

/// Bluetooth bus number used in HID identifiers
const BUS_BLUETOOTH: u16 = 0x0005;

/// Upper bound on the Bolt acknowledgement read
pub const BOLT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(100);

// ============================================================================
// Identity
// ============================================================================

/// Transport used to reach the mouse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    /// Via Logitech Bolt receiver (wireless dongle)
    Bolt,
    /// Direct Bluetooth connection
    Bluetooth,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::Bolt => write!(f, "Bolt"),
            ConnectionType::Bluetooth => write!(f, "Bluetooth"),
        }
    }
}

/// Where the mouse was found; fixed once discovery returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Transport kind
    pub connection_type: ConnectionType,
    /// Device node for the transport
    pub path: PathBuf,
    /// Device slot on the receiver (Bolt only)
    pub device_index: Option<u8>,
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.connection_type, self.path.display())?;
        if let Some(index) = self.device_index {
            write!(f, " (index {})", index)?;
        }
        Ok(())
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Device link error type
#[derive(Debug)]
pub enum DeviceError {
    /// Effect id outside 0..=15; nothing was written
    InvalidArgument(i32),
    /// Open, write or read failed on either transport
    DeviceDisconnected(String),
    /// Discovery found no candidate
    DeviceNotFound,
}

impl DeviceError {
    /// Whether a close/reopen cycle may fix this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DeviceError::DeviceDisconnected(_))
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::InvalidArgument(effect_id) => write!(
                f,
                "effect_id must be between {} and {}, got {}",
                hidpp::EFFECT_MIN,
                hidpp::EFFECT_MAX,
                effect_id
            ),
            DeviceError::DeviceDisconnected(reason) => write!(f, "Device disconnected: {}", reason),
            DeviceError::DeviceNotFound => write!(f, "MX Master 4 not found"),
        }
    }
}

impl std::error::Error for DeviceError {}

// ============================================================================
// HapticDevice trait
// ============================================================================

/// Operations the dispatch engine needs from a device link
pub trait HapticDevice {
    /// Acquire the transport handle; no-op when already open
    fn open(&mut self) -> Result<(), DeviceError>;

    /// Release the transport handle; never fails, idempotent
    fn close(&mut self);

    /// Whether a transport handle is currently held
    fn is_open(&self) -> bool;

    /// Validate, (re)open if needed, encode and write one haptic trigger
    fn send_haptic_feedback(&mut self, effect_id: i32) -> Result<(), DeviceError>;
}

// ============================================================================
// Discovery
// ============================================================================

/// Gate applied to a hidraw node's parent before identity matching
type NameMatcher = fn(&HidParent) -> bool;

/// Identity check applied to a hidraw node's parent
type IdentityMatcher = fn(&HidParent) -> bool;

/// Name gates, tried in order
const NAME_MATCHERS: &[(&str, NameMatcher)] = &[
    ("display name", name_contains_product),
    ("unnamed, HID_ID vendor/product", unnamed_with_matching_ids),
];

/// Identity checks, tried in order
const IDENTITY_MATCHERS: &[(&str, IdentityMatcher)] = &[
    ("HID_ID", hid_id_matches),
    ("MODALIAS", modalias_matches),
];

fn vid_hex() -> String {
    format!("{:04X}", LOGITECH_VENDOR_ID)
}

fn pid_hex() -> String {
    format!("{:04X}", MX_MASTER_4_BLUETOOTH_PID)
}

/// Display name contains the product name
fn name_contains_product(parent: &HidParent) -> bool {
    parent
        .name
        .as_deref()
        .is_some_and(|name| name.contains(MX_MASTER_4_NAME))
}

/// No display name, but the fused identifier carries our vendor and product
fn unnamed_with_matching_ids(parent: &HidParent) -> bool {
    if parent.name.is_some() {
        return false;
    }
    parent.hid_id.as_deref().is_some_and(|id| {
        let id = id.to_uppercase();
        id.contains(&vid_hex()) && id.contains(&pid_hex())
    })
}

/// `HID_ID` is the Bluetooth vendor/product pair, padded or not
fn hid_id_matches(parent: &HidParent) -> bool {
    let Some(hid_id) = parent.hid_id.as_deref() else {
        return false;
    };
    let hid_id = hid_id.to_uppercase();
    let padded = format!("{:04X}:0000{}:0000{}", BUS_BLUETOOTH, vid_hex(), pid_hex());
    let unpadded = format!("{:04X}:{}:{}", BUS_BLUETOOTH, vid_hex(), pid_hex());
    hid_id.contains(&padded) || hid_id.contains(&unpadded)
}

/// `MODALIAS` (`hid:bBBBBgGGGGvVVVVVVVVpPPPPPPPP`) names the Bluetooth pair
fn modalias_matches(parent: &HidParent) -> bool {
    let Some(modalias) = parent.modalias.as_deref() else {
        return false;
    };
    let modalias = modalias.to_uppercase();
    let bus = format!("B{:04X}", BUS_BLUETOOTH);
    let ids = format!("V0000{}P0000{}", vid_hex(), pid_hex());
    modalias.contains(&bus) && modalias.contains(&ids)
}

/// First HID interface of the vendor exposing the HID++ usage page
pub fn find_bolt<E: ReceiverEnumerator + ?Sized>(enumerator: &E) -> Option<DeviceIdentity> {
    let found = enumerator
        .enumerate(LOGITECH_VENDOR_ID)
        .into_iter()
        .find(|iface| iface.usage_page == Some(HIDPP_USAGE_PAGE))?;

    tracing::debug!(
        path = %found.path.display(),
        product = found.product_name.as_deref().unwrap_or("unknown"),
        interface = ?found.interface_number,
        "Found Bolt device"
    );

    Some(DeviceIdentity {
        connection_type: ConnectionType::Bolt,
        path: found.path,
        device_index: found.interface_number,
    })
}

/// First hidraw node that passes a name gate and an identity check
pub fn find_bluetooth_path<D: DeviceDatabase + ?Sized>(database: &D) -> Option<PathBuf> {
    tracing::debug!(
        vendor = %vid_hex(),
        product = %pid_hex(),
        "Looking for Bluetooth device"
    );

    for node in database.hidraw_nodes() {
        let Some(parent) = node.parent.as_ref() else {
            tracing::trace!(syspath = %node.syspath.display(), "No HID parent found");
            continue;
        };

        let Some((gate, _)) = NAME_MATCHERS.iter().find(|(_, matcher)| matcher(parent)) else {
            continue;
        };

        let Some((check, _)) = IDENTITY_MATCHERS.iter().find(|(_, matcher)| matcher(parent))
        else {
            tracing::debug!(
                syspath = %node.syspath.display(),
                hid_id = parent.hid_id.as_deref().unwrap_or("(none)"),
                modalias = parent.modalias.as_deref().unwrap_or("(none)"),
                "Name matches but IDs do not, skipping"
            );
            continue;
        };

        if let Some(devnode) = node.devnode {
            tracing::info!(
                name = parent.name.as_deref().unwrap_or("(unnamed)"),
                path = %devnode.display(),
                gate,
                check,
                "Found Bluetooth device"
            );
            return Some(devnode);
        }
    }

    tracing::debug!("Bluetooth device not found");
    None
}

// ============================================================================
// Device link
// ============================================================================

/// Open transport handle; ownership moves in on `open()` and out on `close()`
#[derive(Debug)]
enum OpenHandle {
    /// hidraw node of the Bolt receiver, opened read/write
    Bolt(File),
    /// hidraw node of the Bluetooth mouse, opened write-only
    Bluetooth(File),
}

/// Connection state of the link
#[derive(Debug)]
enum Connection {
    Closed,
    Open(OpenHandle),
}

/// Device link to one MX Master 4
#[derive(Debug)]
pub struct MxMaster4 {
    identity: DeviceIdentity,
    connection: Connection,
}

impl MxMaster4 {
    /// Wrap an already resolved identity; nothing is opened yet
    pub fn new(identity: DeviceIdentity) -> Self {
        tracing::info!(connection = %identity.connection_type, "Device found");
        Self {
            identity,
            connection: Connection::Closed,
        }
    }

    /// Discover the mouse using sysfs
    pub fn find(
        connection_type: Option<ConnectionType>,
        device_path: Option<&Path>,
    ) -> Option<Self> {
        let sysfs = SysfsHidraw::default();
        Self::find_with(&sysfs, &sysfs, connection_type, device_path)
    }

    /// Discover the mouse through explicit enumeration sources
    ///
    /// Bolt is tried first unless Bluetooth is forced. Bluetooth uses the
    /// path hint when given, otherwise the node database.
    pub fn find_with<E, D>(
        enumerator: &E,
        database: &D,
        connection_type: Option<ConnectionType>,
        device_path: Option<&Path>,
    ) -> Option<Self>
    where
        E: ReceiverEnumerator + ?Sized,
        D: DeviceDatabase + ?Sized,
    {
        if matches!(connection_type, None | Some(ConnectionType::Bolt)) {
            if let Some(identity) = find_bolt(enumerator) {
                return Some(Self::new(identity));
            }
        }

        if matches!(connection_type, None | Some(ConnectionType::Bluetooth)) {
            let path = match device_path {
                Some(p) => Some(p.to_path_buf()),
                None => find_bluetooth_path(database),
            };
            if let Some(path) = path.filter(|p| p.exists()) {
                return Some(Self::new(DeviceIdentity {
                    connection_type: ConnectionType::Bluetooth,
                    path,
                    device_index: None,
                }));
            }
        }

        if let Some(kind) = connection_type {
            tracing::error!(connection = %kind, "MX Master 4 not found on requested transport");
        }
        None
    }

    /// Resolved identity
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Transport kind
    pub fn connection_type(&self) -> ConnectionType {
        self.identity.connection_type
    }

    /// Open if needed and hand out the live handle
    fn ensure_open(&mut self) -> Result<&mut OpenHandle, DeviceError> {
        if let Connection::Closed = self.connection {
            let handle = self.open_handle()?;
            self.connection = Connection::Open(handle);
        }
        match &mut self.connection {
            Connection::Open(handle) => Ok(handle),
            Connection::Closed => Err(DeviceError::DeviceDisconnected(
                "device is not open".to_string(),
            )),
        }
    }

    /// Acquire an OS handle for the resolved path
    fn open_handle(&self) -> Result<OpenHandle, DeviceError> {
        let path = &self.identity.path;
        let mut options = OpenOptions::new();
        options.custom_flags(libc::O_NONBLOCK);

        match self.identity.connection_type {
            ConnectionType::Bolt => {
                let file = options.read(true).write(true).open(path).map_err(|e| {
                    log_open_failure(path, &e);
                    DeviceError::DeviceDisconnected(format!(
                        "failed to open Bolt device {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                tracing::info!(path = %path.display(), "Connected via Bolt");
                Ok(OpenHandle::Bolt(file))
            }
            ConnectionType::Bluetooth => {
                let file = options.write(true).open(path).map_err(|e| {
                    log_open_failure(path, &e);
                    DeviceError::DeviceDisconnected(format!(
                        "failed to open Bluetooth device {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                tracing::info!(path = %path.display(), "Connected via Bluetooth");
                Ok(OpenHandle::Bluetooth(file))
            }
        }
    }
}

impl HapticDevice for MxMaster4 {
    fn open(&mut self) -> Result<(), DeviceError> {
        self.ensure_open().map(|_| ())
    }

    fn close(&mut self) {
        if let Connection::Open(_) = std::mem::replace(&mut self.connection, Connection::Closed) {
            tracing::debug!(path = %self.identity.path.display(), "Device closed");
        }
    }

    fn is_open(&self) -> bool {
        matches!(self.connection, Connection::Open(_))
    }

    fn send_haptic_feedback(&mut self, effect_id: i32) -> Result<(), DeviceError> {
        if !hidpp::is_valid_effect(effect_id) {
            return Err(DeviceError::InvalidArgument(effect_id));
        }
        let effect = u8::try_from(effect_id).map_err(|_| DeviceError::InvalidArgument(effect_id))?;
        let device_index = self.identity.device_index;

        match self.ensure_open()? {
            OpenHandle::Bolt(file) => {
                let frame = encode_bolt_haptic(device_index, effect);
                tracing::debug!("Writing to Bolt (HID++): {:02X?}", frame.as_bytes());
                write_frame(file, frame.as_bytes(), "HID write")?;
                drain_response(file, BOLT_RESPONSE_TIMEOUT)
            }
            OpenHandle::Bluetooth(file) => {
                let packet = encode_bluetooth_haptic(effect);
                tracing::debug!("Writing to Bluetooth: {:02X?}", &packet);
                write_frame(file, &packet, "Bluetooth write")
            }
        }
    }
}

// ============================================================================
// Transport I/O
// ============================================================================

fn log_open_failure(path: &Path, e: &io::Error) {
    if e.kind() == io::ErrorKind::PermissionDenied {
        tracing::warn!(
            path = %path.display(),
            "Permission denied opening hidraw device. Check udev rules."
        );
    } else {
        tracing::debug!(path = %path.display(), error = %e, "Failed to open hidraw device");
    }
}

/// Write a whole frame in one call; anything short of that is a disconnect
fn write_frame(file: &mut File, frame: &[u8], what: &str) -> Result<(), DeviceError> {
    match file.write(frame) {
        Ok(written) if written == frame.len() => Ok(()),
        Ok(written) => Err(DeviceError::DeviceDisconnected(format!(
            "incomplete {}: {} of {} bytes",
            what,
            written,
            frame.len()
        ))),
        Err(e) => {
            if is_device_gone(&e) {
                tracing::debug!(error = %e, "Device removed during {}", what);
            } else {
                tracing::debug!(error = %e, "{} failed", what);
            }
            Err(DeviceError::DeviceDisconnected(format!("{} failed: {}", what, e)))
        }
    }
}

/// ENODEV/EIO mean the node went away; classified the same as other errors
fn is_device_gone(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::ENODEV) | Some(libc::EIO))
}

/// Wait up to `timeout` for the acknowledgement and discard it
fn drain_response(file: &mut File, timeout: Duration) -> Result<(), DeviceError> {
    let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
    let mut pollfd = libc::pollfd {
        fd: file.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };

    loop {
        // SAFETY: `pollfd` is a valid, initialized pollfd for an fd owned by
        // `file`, which outlives this call; nfds is 1.
        let ready = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if ready < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(DeviceError::DeviceDisconnected(format!("HID read failed: {}", e)));
        }
        if ready == 0 {
            return Err(DeviceError::DeviceDisconnected(format!(
                "no HID response within {}ms",
                timeout_ms
            )));
        }
        break;
    }

    let mut response = [0u8; LONG_REPORT_LEN];
    match file.read(&mut response) {
        Ok(0) => Err(DeviceError::DeviceDisconnected("empty HID response".to_string())),
        Ok(len) => {
            tracing::trace!("HID++ response: {:02X?}", &response[..len]);
            Ok(())
        }
        Err(e) => Err(DeviceError::DeviceDisconnected(format!("HID read failed: {}", e))),
    }
}

// ============================================================================
// Tests
// ============================================================================
