//! Linux sysfs-backed devices.
//!
//! Identity comes from the PCI attribute files of the device directory.
//! Feature blocks are found by walking the device subtree for
//! `dfl_dev.*/feature_id` attributes.

use crate::{BoardDevice, FeatureId, FeatureProber, IdentityError, IdentityReader, Token};
use std::ffi::CString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_PCI_ROOT: &str = "/sys/bus/pci/devices";

// Region -> FME -> feature device sits three levels below the PCI device.
const FEATURE_WALK_DEPTH: usize = 5;

pub struct SysfsDevice {
    path: PathBuf,
    // NUL-terminated copy of `path`; its address is the module token.
    c_path: CString,
}

impl SysfsDevice {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, IdentityError> {
        let path = path.into();
        let c_path = CString::new(path.to_string_lossy().into_owned()).map_err(|_| IdentityError::Parse {
            attr: "path",
            value: path.display().to_string(),
        })?;
        Ok(Self { path, c_path })
    }

    /// PCI devices under `root` that expose an FPGA region, by address.
    pub fn enumerate(root: impl AsRef<Path>) -> std::io::Result<Vec<SysfsDevice>> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in fs::read_dir(root.as_ref())? {
            let path = entry?.path();
            if path.join("fpga_region").is_dir() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths
            .into_iter()
            .filter_map(|p| SysfsDevice::open(p).ok())
            .collect())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PCI address (the directory name), e.g. `0000:b1:00.0`.
    pub fn address(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn read_id(&self, attr: &'static str) -> Result<u16, IdentityError> {
        let raw = fs::read_to_string(self.path.join(attr)).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => IdentityError::Missing(attr),
            _ => IdentityError::Io {
                attr,
                msg: e.to_string(),
            },
        })?;
        parse_hex::<u16>(&raw).ok_or(IdentityError::Parse {
            attr,
            value: raw.trim().to_string(),
        })
    }

    fn feature_ids(&self) -> Vec<u64> {
        let mut found = Vec::new();
        collect_features(&self.path, 0, &mut found);
        found
    }
}

fn collect_features(dir: &Path, depth: usize, found: &mut Vec<u64>) {
    if depth > FEATURE_WALK_DEPTH {
        return;
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        // Plain directories only; sysfs symlinks lead back up the tree.
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if !is_dir {
            continue;
        }
        let path = entry.path();
        if entry.file_name().to_string_lossy().starts_with("dfl_dev.") {
            if let Some(id) = fs::read_to_string(path.join("feature_id"))
                .ok()
                .and_then(|raw| parse_hex::<u64>(&raw))
            {
                found.push(id);
            }
        }
        collect_features(&path, depth + 1, found);
    }
}

fn parse_hex<T>(raw: &str) -> Option<T>
where
    T: TryFrom<u64>,
{
    let t = raw.trim();
    let digits = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")).unwrap_or(t);
    let val = u64::from_str_radix(digits, 16).ok()?;
    T::try_from(val).ok()
}

impl IdentityReader for SysfsDevice {
    fn vendor_id(&self) -> Result<u16, IdentityError> {
        self.read_id("vendor")
    }

    fn device_id(&self) -> Result<u16, IdentityError> {
        self.read_id("device")
    }

    fn subsystem_vendor_id(&self) -> Result<u16, IdentityError> {
        self.read_id("subsystem_vendor")
    }

    fn subsystem_device_id(&self) -> Result<u16, IdentityError> {
        self.read_id("subsystem_device")
    }
}

impl FeatureProber for SysfsDevice {
    fn has_feature(&self, feature: FeatureId) -> bool {
        let ids = self.feature_ids();
        debug!(device = %self.address(), %feature, ?ids, "probing features");
        ids.contains(&feature.0)
    }
}

impl BoardDevice for SysfsDevice {
    /// `const char *` to the device's sysfs path.
    fn token(&self) -> Token {
        Token::from_ptr(self.c_path.as_ptr())
    }

    fn location(&self) -> String {
        self.address()
    }
}
