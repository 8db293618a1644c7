//! Raw HID device enumeration via sysfs
//!
//! The daemon needs two views of the attached HID hardware:
//!
//! - a **receiver enumeration** (vendor id, interface number, HID usage
//!   page per hidraw node) to locate the HID++ interface of a Bolt
//!   receiver, and
//! - a **node database** (devnode plus the parent HID node's name,
//!   `HID_ID` and `MODALIAS`) to locate a Bluetooth-attached mouse.
//!
//! Both are traits so discovery can be exercised against fixtures. The
//! production implementation, [`SysfsHidraw`], reads `/sys/class/hidraw`
//! directly instead of going through hidapi or libudev.
//!
//! SPDX-License-Identifier: GPL-3.0

use std::fs;
use std::path::{Path, PathBuf};

/// Default sysfs class directory for hidraw nodes
pub const SYSFS_HIDRAW_DIR: &str = "/sys/class/hidraw";

/// Default directory holding hidraw device nodes
pub const DEV_DIR: &str = "/dev";

// ============================================================================
// Enumeration records
// ============================================================================

/// One HID interface as seen by the receiver enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidInterface {
    /// Device node to open (e.g. `/dev/hidraw3`)
    pub path: PathBuf,
    /// USB/Bluetooth vendor id
    pub vendor_id: u16,
    /// USB/Bluetooth product id
    pub product_id: u16,
    /// USB interface number, when the node hangs off a USB interface
    pub interface_number: Option<u8>,
    /// Usage page of the first top-level collection
    pub usage_page: Option<u16>,
    /// Product string reported by the kernel (`HID_NAME`)
    pub product_name: Option<String>,
}

/// Properties of the HID node a hidraw node belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HidParent {
    /// Display name, if the kernel exposes one
    pub name: Option<String>,
    /// Fused `bus:vendor:product` identifier (`HID_ID`)
    pub hid_id: Option<String>,
    /// Composite module alias (`MODALIAS`)
    pub modalias: Option<String>,
}

/// One entry of the hidraw node database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidrawNode {
    /// sysfs path of the hidraw class entry
    pub syspath: PathBuf,
    /// Device node path, if one can be derived
    pub devnode: Option<PathBuf>,
    /// Parent HID node, absent when the class entry has no `device` link
    pub parent: Option<HidParent>,
}

// ============================================================================
// Contracts
// ============================================================================

/// Enumerates HID interfaces of a given vendor
pub trait ReceiverEnumerator {
    /// List all HID interfaces whose vendor id matches `vendor_id`
    fn enumerate(&self, vendor_id: u16) -> Vec<HidInterface>;
}

/// Node-based database of raw HID devices
pub trait DeviceDatabase {
    /// List every hidraw node with its parent HID properties
    fn hidraw_nodes(&self) -> Vec<HidrawNode>;
}

// ============================================================================
// sysfs implementation
// ============================================================================

/// sysfs-backed hidraw enumeration
#[derive(Debug, Clone)]
pub struct SysfsHidraw {
    /// Class directory (normally `/sys/class/hidraw`)
    class_dir: PathBuf,
    /// Device node directory (normally `/dev`)
    dev_dir: PathBuf,
}

impl Default for SysfsHidraw {
    fn default() -> Self {
        Self::new(SYSFS_HIDRAW_DIR, DEV_DIR)
    }
}

impl SysfsHidraw {
    /// Create an enumerator rooted at custom directories
    pub fn new(class_dir: impl Into<PathBuf>, dev_dir: impl Into<PathBuf>) -> Self {
        Self {
            class_dir: class_dir.into(),
            dev_dir: dev_dir.into(),
        }
    }

    /// List hidraw class entries sorted by name
    fn entries(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.class_dir) {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(
                    dir = %self.class_dir.display(),
                    error = %e,
                    "Failed to read hidraw class directory"
                );
                return Vec::new();
            }
        };

        let mut paths: Vec<PathBuf> = entries.flatten().map(|entry| entry.path()).collect();
        paths.sort();
        paths
    }

    /// Device node path for a class entry
    fn devnode(&self, syspath: &Path) -> Option<PathBuf> {
        syspath.file_name().map(|name| self.dev_dir.join(name))
    }

    /// Read the parent HID properties of a class entry
    fn parent(syspath: &Path) -> Option<HidParent> {
        let device_dir = syspath.join("device");
        let uevent = fs::read_to_string(device_dir.join("uevent")).ok()?;

        Some(HidParent {
            name: display_name(&device_dir, &uevent),
            hid_id: uevent_value(&uevent, "HID_ID").map(str::to_string),
            modalias: uevent_value(&uevent, "MODALIAS").map(str::to_string),
        })
    }
}

impl ReceiverEnumerator for SysfsHidraw {
    fn enumerate(&self, vendor_id: u16) -> Vec<HidInterface> {
        let mut interfaces = Vec::new();

        for syspath in self.entries() {
            let device_dir = syspath.join("device");
            let Ok(uevent) = fs::read_to_string(device_dir.join("uevent")) else {
                continue;
            };
            let Some((vid, pid)) = uevent_value(&uevent, "HID_ID").and_then(parse_hid_id) else {
                continue;
            };
            if vid != vendor_id {
                continue;
            }
            let Some(path) = self.devnode(&syspath) else {
                continue;
            };

            let usage_page = fs::read(device_dir.join("report_descriptor"))
                .ok()
                .and_then(|desc| first_usage_page(&desc));

            tracing::trace!(
                path = %path.display(),
                vendor = %format!("0x{:04X}", vid),
                product = %format!("0x{:04X}", pid),
                usage_page = ?usage_page,
                "Enumerated HID interface"
            );

            interfaces.push(HidInterface {
                path,
                vendor_id: vid,
                product_id: pid,
                interface_number: interface_number(&device_dir),
                usage_page,
                product_name: uevent_value(&uevent, "HID_NAME").map(str::to_string),
            });
        }

        interfaces
    }
}

impl DeviceDatabase for SysfsHidraw {
    fn hidraw_nodes(&self) -> Vec<HidrawNode> {
        self.entries()
            .into_iter()
            .map(|syspath| HidrawNode {
                devnode: self.devnode(&syspath),
                parent: Self::parent(&syspath),
                syspath,
            })
            .collect()
    }
}

// ============================================================================
// Parsing helpers
// ============================================================================

/// Look up `KEY=value` in a uevent file
pub fn uevent_value<'a>(uevent: &'a str, key: &str) -> Option<&'a str> {
    uevent.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        (k == key).then_some(v.trim())
    })
}

/// Parse `HID_ID=BBBB:VVVVVVVV:PPPPPPPP` into (vendor, product)
pub fn parse_hid_id(hid_id: &str) -> Option<(u16, u16)> {
    let mut parts = hid_id.split(':');
    let _bus = parts.next()?;
    let vendor = u32::from_str_radix(parts.next()?, 16).ok()?;
    let product = u32::from_str_radix(parts.next()?, 16).ok()?;
    Some((u16::try_from(vendor).ok()?, u16::try_from(product).ok()?))
}

/// Display name of a HID node: `name` attribute, then `HID_NAME`, then
/// the name of the first input device below it
fn display_name(device_dir: &Path, uevent: &str) -> Option<String> {
    let non_empty = |s: String| {
        let trimmed = s.trim().to_string();
        (!trimmed.is_empty()).then_some(trimmed)
    };

    if let Some(name) = fs::read_to_string(device_dir.join("name")).ok().and_then(non_empty) {
        return Some(name);
    }

    if let Some(name) = uevent_value(uevent, "HID_NAME").map(str::to_string).and_then(non_empty) {
        return Some(name);
    }

    let mut inputs: Vec<PathBuf> = fs::read_dir(device_dir.join("input"))
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("input"))
        })
        .collect();
    inputs.sort();

    inputs
        .iter()
        .find_map(|input| fs::read_to_string(input.join("name")).ok().and_then(non_empty))
}

/// USB interface number of the interface a HID node hangs off
fn interface_number(device_dir: &Path) -> Option<u8> {
    let resolved = fs::canonicalize(device_dir).ok()?;
    let interface_dir = resolved.parent()?;

    if let Ok(raw) = fs::read_to_string(interface_dir.join("bInterfaceNumber")) {
        return u8::from_str_radix(raw.trim(), 16).ok();
    }

    // USB interface directories are named `<port>:<config>.<interface>`
    let name = interface_dir.file_name()?.to_str()?;
    let (port, rest) = name.split_once(':')?;
    if port.is_empty() {
        return None;
    }
    let (_, interface) = rest.split_once('.')?;
    interface.parse().ok()
}

/// Usage page of the first top-level collection in a report descriptor
pub fn first_usage_page(descriptor: &[u8]) -> Option<u16> {
    const LONG_ITEM: u8 = 0xFE;
    const USAGE_PAGE_PREFIX: u8 = 0x04;

    let mut i = 0;
    while i < descriptor.len() {
        let prefix = descriptor[i];

        if prefix == LONG_ITEM {
            let data_len = *descriptor.get(i + 1)? as usize;
            i += 3 + data_len;
            continue;
        }

        let size = match prefix & 0x03 {
            3 => 4,
            n => n as usize,
        };
        let data = descriptor.get(i + 1..i + 1 + size)?;

        // Global item, tag 0 (Usage Page)
        if prefix & 0xFC == USAGE_PAGE_PREFIX {
            let value = data
                .iter()
                .rev()
                .fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
            return u16::try_from(value).ok();
        }

        i += 1 + size;
    }

    None
}

// ============================================================================
// Tests
// ============================================================================
