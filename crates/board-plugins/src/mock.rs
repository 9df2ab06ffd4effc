use crate::{
    BoardDevice, Capabilities, DeviceIdentity, FeatureId, FeatureProber, IdentityError,
    IdentityReader, LoadedModule, ModuleOpener, Token,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// An in-memory device with a fixed identity and feature set.
pub struct MockDevice {
    identity: Option<DeviceIdentity>,
    features: HashSet<u64>,
    probes: AtomicUsize,
}

impl MockDevice {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity: Some(identity),
            features: HashSet::new(),
            probes: AtomicUsize::new(0),
        }
    }

    /// A device whose identity attributes cannot be read.
    pub fn unreadable() -> Self {
        Self {
            identity: None,
            features: HashSet::new(),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn with_features(mut self, features: impl IntoIterator<Item = u64>) -> Self {
        self.features.extend(features);
        self
    }

    /// Number of feature probes answered so far.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    fn read(&self, attr: &'static str) -> Result<DeviceIdentity, IdentityError> {
        self.identity.ok_or(IdentityError::Missing(attr))
    }
}

impl IdentityReader for MockDevice {
    fn vendor_id(&self) -> Result<u16, IdentityError> {
        Ok(self.read("vendor")?.vendor_id)
    }

    fn device_id(&self) -> Result<u16, IdentityError> {
        Ok(self.read("device")?.device_id)
    }

    fn subsystem_vendor_id(&self) -> Result<u16, IdentityError> {
        Ok(self.read("subsystem_vendor")?.subvendor_id)
    }

    fn subsystem_device_id(&self) -> Result<u16, IdentityError> {
        Ok(self.read("subsystem_device")?.subdevice_id)
    }
}

impl FeatureProber for MockDevice {
    fn has_feature(&self, feature: FeatureId) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.features.contains(&feature.0)
    }
}

impl BoardDevice for MockDevice {
    fn token(&self) -> Token {
        Token::from_ptr(self as *const Self)
    }

    fn location(&self) -> String {
        match self.identity {
            Some(id) => format!("mock {id}"),
            None => "mock <unreadable>".to_string(),
        }
    }
}

/// Serves in-process capability tables in place of shared libraries and
/// records every open and close.
#[derive(Default)]
pub struct MockOpener {
    modules: HashMap<PathBuf, Capabilities>,
    open_delay: Option<Duration>,
    fail_close: bool,
    attempts: Mutex<Vec<PathBuf>>,
    closes: AtomicUsize,
}

impl MockOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `path` openable, exporting `capabilities`.
    pub fn with_module(mut self, path: impl Into<PathBuf>, capabilities: Capabilities) -> Self {
        self.modules.insert(path.into(), capabilities);
        self
    }

    /// Sleep inside every open, widening race windows in tests.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    pub fn with_failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Every path passed to `open`, in call order.
    pub fn attempts(&self) -> Vec<PathBuf> {
        self.attempts.lock().clone()
    }

    pub fn open_calls(&self) -> usize {
        self.attempts.lock().len()
    }

    pub fn close_calls(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl ModuleOpener for MockOpener {
    fn open(&self, path: &Path, module: &str) -> Result<LoadedModule, String> {
        self.attempts.lock().push(path.to_path_buf());
        if let Some(delay) = self.open_delay {
            std::thread::sleep(delay);
        }
        match self.modules.get(path) {
            Some(caps) => Ok(LoadedModule::in_process(module, path, *caps)),
            None => Err(format!(
                "{}: cannot open shared object file: No such file or directory",
                path.display()
            )),
        }
    }

    fn close(&self, module: LoadedModule) -> Result<(), String> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(format!("{}: close refused", module.name()));
        }
        module.close()
    }
}
