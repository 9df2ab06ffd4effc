use crate::{DeviceIdentity, FeatureId, IdentityError, LoadedModule, Token};
use std::path::Path;

/// Reads the PCI identity of a device.
pub trait IdentityReader {
    fn vendor_id(&self) -> Result<u16, IdentityError>;

    fn device_id(&self) -> Result<u16, IdentityError>;

    fn subsystem_vendor_id(&self) -> Result<u16, IdentityError>;

    fn subsystem_device_id(&self) -> Result<u16, IdentityError>;

    /// Read all four IDs; the first failing attribute aborts the read.
    fn identity(&self) -> Result<DeviceIdentity, IdentityError> {
        Ok(DeviceIdentity {
            vendor_id: self.vendor_id()?,
            device_id: self.device_id()?,
            subvendor_id: self.subsystem_vendor_id()?,
            subdevice_id: self.subsystem_device_id()?,
        })
    }
}

/// Reports whether a feature block is present on the device.
pub trait FeatureProber {
    fn has_feature(&self, feature: FeatureId) -> bool;
}

/// A device that can be matched against the platform table and handed to a
/// board module.
pub trait BoardDevice: IdentityReader + FeatureProber {
    /// Opaque token passed to module entry points. Valid while `self` lives.
    fn token(&self) -> Token;

    /// Short human-readable location, used in logs.
    fn location(&self) -> String {
        String::from("<unknown>")
    }
}

/// OS boundary for opening and closing board modules.
pub trait ModuleOpener: Send + Sync {
    /// Open the module file at `path`. The error string is the loader's
    /// diagnostic.
    fn open(&self, path: &Path, module: &str) -> Result<LoadedModule, String>;

    fn close(&self, module: LoadedModule) -> Result<(), String> {
        module.close()
    }
}
