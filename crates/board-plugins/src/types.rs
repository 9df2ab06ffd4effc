use core::fmt;
use serde::{Deserialize, Serialize};
use std::ffi::c_void;
use std::os::raw::c_int;

/// PCI identity of a device, read fresh on every query.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub device_id: u16,
    pub subvendor_id: u16,
    pub subdevice_id: u16,
}

impl DeviceIdentity {
    pub const fn new(vendor_id: u16, device_id: u16, subvendor_id: u16, subdevice_id: u16) -> Self {
        Self {
            vendor_id,
            device_id,
            subvendor_id,
            subdevice_id,
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} {:04x}:{:04x}",
            self.vendor_id, self.device_id, self.subvendor_id, self.subdevice_id
        )
    }
}

/// Identifier of an on-device feature block (e.g. a DFL feature id).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureId(pub u64);

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// One row of the platform table.
///
/// `subvendor_id`/`subdevice_id` of `0` match any value. When
/// `required_feature` is set the row only applies to devices exposing that
/// feature.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct BoardDescriptor {
    pub vendor_id: u16,
    pub device_id: u16,
    pub subvendor_id: u16,
    pub subdevice_id: u16,
    pub required_feature: Option<FeatureId>,
    pub module: String,
    pub product_name: String,
}

pub const WILDCARD_ID: u16 = 0;

impl BoardDescriptor {
    /// Vendor/device must be equal; sub-IDs are compared unless wildcarded.
    pub fn matches_ids(&self, id: &DeviceIdentity) -> bool {
        self.vendor_id == id.vendor_id
            && self.device_id == id.device_id
            && (self.subvendor_id == WILDCARD_ID || self.subvendor_id == id.subvendor_id)
            && (self.subdevice_id == WILDCARD_ID || self.subdevice_id == id.subdevice_id)
    }

    /// All four IDs equal, wildcards included. Used for product naming.
    pub fn matches_exactly(&self, id: &DeviceIdentity) -> bool {
        self.vendor_id == id.vendor_id
            && self.device_id == id.device_id
            && self.subvendor_id == id.subvendor_id
            && self.subdevice_id == id.subdevice_id
    }
}

/// Opaque device token handed to board module entry points.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Token(*const c_void);

impl Token {
    pub const fn null() -> Self {
        Self(core::ptr::null())
    }

    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr.cast())
    }

    pub fn as_ptr(&self) -> *const c_void {
        self.0
    }
}

/// Status code returned by a board module, passed through untouched.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Status(pub c_int);

impl Status {
    pub const OK: Status = Status(0);

    pub fn is_ok(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            write!(f, "ok")
        } else {
            write!(f, "status {}", self.0)
        }
    }
}
