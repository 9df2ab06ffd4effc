use crate::DeviceIdentity;
use thiserror::Error;

pub type Result<T, E = DispatchError> = core::result::Result<T, E>;

/// The device's identity attributes could not be read.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("device attribute missing: {0}")]
    Missing(&'static str),
    #[error("I/O error reading {attr}: {msg}")]
    Io { attr: &'static str, msg: String },
    #[error("cannot parse {attr}: {value:?}")]
    Parse { attr: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to load \"{module}\": {diagnostic}")]
    NotFound { module: String, diagnostic: String },
    #[error("no module search paths configured for \"{0}\"")]
    NoSearchPaths(String),
}

impl LoadError {
    pub fn diagnostic(&self) -> &str {
        match self {
            LoadError::NotFound { diagnostic, .. } => diagnostic,
            LoadError::NoSearchPaths(_) => "no search paths",
        }
    }
}

/// Terminal state of a failed dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid device: {0}")]
    InvalidDevice(#[from] IdentityError),
    #[error("no board module for device {0}")]
    NoModule(DeviceIdentity),
    #[error(transparent)]
    LoadFailed(#[from] LoadError),
    #[error("{capability} is not supported by {module}")]
    Unsupported {
        capability: &'static str,
        module: String,
    },
    #[error("no board table row {0}")]
    NoSuchRow(usize),
    #[error("registry lock unavailable: {0}")]
    Lock(&'static str),
}

impl DispatchError {
    /// True when the board has a module that simply lacks the capability.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, DispatchError::Unsupported { .. })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UnloadFailure {
    pub module: String,
    pub diagnostic: String,
}

#[derive(Debug, Error)]
pub enum UnloadError {
    #[error("registry lock unavailable")]
    Lock,
    #[error("{} board module(s) failed to unload", .0.len())]
    Modules(Vec<UnloadFailure>),
}

impl UnloadError {
    pub fn failures(&self) -> &[UnloadFailure] {
        match self {
            UnloadError::Lock => &[],
            UnloadError::Modules(failures) => failures,
        }
    }
}
