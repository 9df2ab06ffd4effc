//! Dispatch facade: device to board module to capability.
//!
//! Each call walks `IdentityRead -> Matched -> ModuleResolved ->
//! CapabilityFound -> Invoked` and stops at the first failing step. Nothing
//! is retried. The registry lock covers matching and loading only; the
//! capability itself runs unlocked, so several threads may be inside the
//! same module at once.

use crate::capability::Capability;
use crate::metrics::MetricsHub;
use crate::{
    BoardDescriptor, BoardDevice, DispatchError, LoadedModule, PlatformRegistry, PluginLoader,
    Result, Status, UnloadError,
};
use std::sync::Arc;
use tracing::debug;

/// Owns the platform table and the loader. Share it by reference.
#[derive(Debug)]
pub struct BoardPlugins {
    registry: PlatformRegistry,
    loader: PluginLoader,
    metrics: Option<MetricsHub>,
}

impl BoardPlugins {
    pub fn new(registry: PlatformRegistry, loader: PluginLoader) -> Self {
        Self {
            registry,
            loader,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsHub) -> Self {
        self.loader.attach_metrics(metrics.plugins.clone());
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &PlatformRegistry {
        &self.registry
    }

    pub fn loader(&self) -> &PluginLoader {
        &self.loader
    }

    pub fn metrics(&self) -> Option<&MetricsHub> {
        self.metrics.as_ref()
    }

    /// Row and loaded module serving `device`.
    pub fn module_for(&self, device: &dyn BoardDevice) -> Result<(&BoardDescriptor, Arc<LoadedModule>)> {
        let identity = device.identity()?;
        debug!(device = %device.location(), %identity, "identity read");
        let (board, module) = self.registry.resolve_device(device, &identity, &self.loader)?;
        debug!(device = %device.location(), module = %board.module, "module resolved");
        self.update_loaded_gauge();
        Ok((board, module))
    }

    /// Invoke capability `C` on `device`, passing its status through.
    pub fn invoke<C: Capability>(&self, device: &dyn BoardDevice, args: C::Args) -> Result<Status> {
        let (_, module) = self.module_for(device)?;
        let Some(entry) = C::entry(module.capabilities()) else {
            debug!(capability = C::NAME, module = %module.name(), "capability not exported");
            if let Some(m) = &self.metrics {
                m.plugins.unsupported.inc();
            }
            return Err(DispatchError::Unsupported {
                capability: C::NAME,
                module: module.name().to_string(),
            });
        };
        debug!(capability = C::NAME, module = %module.name(), "capability found");
        if let Some(m) = &self.metrics {
            m.plugins.dispatches.inc();
        }
        // SAFETY: `module` is held for the whole call, keeping the library
        // mapped; the token is owned by `device`, which outlives the call.
        let code = unsafe { C::call(entry, device.token(), args) };
        let status = Status(code);
        debug!(capability = C::NAME, %status, "invoked");
        Ok(status)
    }

    /// Product label for `device`, falling back to the generic label.
    pub fn product_name(&self, device: &dyn BoardDevice) -> Result<&str> {
        let identity = device.identity()?;
        Ok(self.registry.product_name(&identity))
    }

    /// Close every cached module. Meant for process shutdown.
    pub fn unload_all(&self) -> Result<(), UnloadError> {
        let result = self.registry.unload_all(&self.loader);
        self.update_loaded_gauge();
        result
    }

    fn update_loaded_gauge(&self) {
        if let Some(m) = &self.metrics {
            m.plugins
                .modules_loaded
                .set(self.registry.loaded_count() as i64);
        }
    }
}
