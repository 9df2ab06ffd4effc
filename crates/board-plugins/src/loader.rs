//! Board module loading.
//!
//! [`PluginLoader`] turns a descriptor's module name into candidate paths and
//! opens the first one that works. It does not cache: memoization lives in
//! the registry, under the registry lock.

use crate::capability::{
    BoardInfo, BootInfo, Capabilities, Capability, EventLog, FmeVerboseInfo, ImageInfo, MacInfo,
    PhyInfo, SecurityInfo,
};
use crate::metrics::PluginMetrics;
use crate::{BoardDescriptor, LoadError, LoaderConfig, ModuleOpener};
use libloading::Library;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A board module mapped into the process together with its resolved entry
/// points. The entry points are only valid while this value is alive.
pub struct LoadedModule {
    name: String,
    path: PathBuf,
    capabilities: Capabilities,
    library: Option<Library>,
}

impl LoadedModule {
    /// Wrap an opened library, resolving every known capability symbol.
    pub fn from_library(name: impl Into<String>, path: impl Into<PathBuf>, library: Library) -> Self {
        let capabilities = Capabilities {
            board_info: symbol(&library, BoardInfo::SYMBOL),
            mac_info: symbol(&library, MacInfo::SYMBOL),
            phy_info: symbol(&library, PhyInfo::SYMBOL),
            security_info: symbol(&library, SecurityInfo::SYMBOL),
            fme_verbose_info: symbol(&library, FmeVerboseInfo::SYMBOL),
            boot_info: symbol(&library, BootInfo::SYMBOL),
            image_info: symbol(&library, ImageInfo::SYMBOL),
            event_log: symbol(&library, EventLog::SYMBOL),
        };
        Self {
            name: name.into(),
            path: path.into(),
            capabilities,
            library: Some(library),
        }
    }

    /// A module whose entry points are linked into this process.
    pub fn in_process(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            capabilities,
            library: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Unmap the module. In-process modules close trivially.
    pub fn close(self) -> Result<(), String> {
        match self.library {
            Some(library) => library.close().map_err(|e| e.to_string()),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("supported", &self.capabilities.supported())
            .field("dynamic", &self.library.is_some())
            .finish()
    }
}

fn symbol<T: Copy>(library: &Library, name: &str) -> Option<T> {
    // SAFETY: the symbol types are fixed by the board module ABI; the copied
    // function pointer is kept next to `library` in `LoadedModule`.
    let found = unsafe { library.get::<T>(name.as_bytes()) };
    match found {
        Ok(sym) => Some(*sym),
        Err(e) => {
            debug!(symbol = name, error = %e, "board module does not export symbol");
            None
        }
    }
}

/// Opens modules with the platform dynamic loader.
#[derive(Debug, Default, Clone, Copy)]
pub struct DlOpener;

impl ModuleOpener for DlOpener {
    fn open(&self, path: &Path, module: &str) -> Result<LoadedModule, String> {
        let library = open_library(path).map_err(|e| e.to_string())?;
        Ok(LoadedModule::from_library(module, path, library))
    }
}

#[cfg(unix)]
fn open_library(path: &Path) -> Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_LAZY, RTLD_LOCAL};
    // SAFETY: running a board module's initializers is the point of loading it.
    let library = unsafe { UnixLibrary::open(Some(path), RTLD_LAZY | RTLD_LOCAL)? };
    Ok(library.into())
}

#[cfg(not(unix))]
fn open_library(path: &Path) -> Result<Library, libloading::Error> {
    // SAFETY: see the unix variant.
    unsafe { Library::new(path) }
}

/// Searches configured prefixes for board modules.
pub struct PluginLoader {
    search_paths: Vec<PathBuf>,
    opener: Arc<dyn ModuleOpener>,
    metrics: Option<PluginMetrics>,
}

impl PluginLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self::with_opener(config, Arc::new(DlOpener))
    }

    pub fn with_opener(config: LoaderConfig, opener: Arc<dyn ModuleOpener>) -> Self {
        Self {
            search_paths: config.search_paths,
            opener,
            metrics: None,
        }
    }

    pub(crate) fn attach_metrics(&mut self, metrics: PluginMetrics) {
        self.metrics = Some(metrics);
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Candidate paths for `module`, in search order.
    pub fn candidates(&self, module: &str) -> Vec<PathBuf> {
        self.search_paths
            .iter()
            .map(|prefix| {
                let mut path = OsString::from(prefix.as_os_str());
                path.push(module);
                PathBuf::from(path)
            })
            .collect()
    }

    /// Open the descriptor's module from the first prefix that works.
    pub fn load(&self, descriptor: &BoardDescriptor) -> Result<LoadedModule, LoadError> {
        let module = descriptor.module.as_str();
        let mut last_error = None;
        for path in self.candidates(module) {
            match self.opener.open(&path, module) {
                Ok(loaded) => {
                    info!(module, path = %path.display(), "loaded board module");
                    if let Some(m) = &self.metrics {
                        m.loads.inc();
                    }
                    return Ok(loaded);
                }
                Err(e) => {
                    debug!(module, path = %path.display(), error = %e, "board module candidate failed");
                    last_error = Some(e);
                }
            }
        }
        if let Some(m) = &self.metrics {
            m.load_failures.inc();
        }
        match last_error {
            Some(diagnostic) => {
                warn!(module, %diagnostic, "failed to load board module");
                Err(LoadError::NotFound {
                    module: module.to_string(),
                    diagnostic,
                })
            }
            None => Err(LoadError::NoSearchPaths(module.to_string())),
        }
    }

    pub fn close(&self, module: LoadedModule) -> Result<(), String> {
        self.opener.close(module)
    }
}

impl fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLoader")
            .field("search_paths", &self.search_paths)
            .finish_non_exhaustive()
    }
}
