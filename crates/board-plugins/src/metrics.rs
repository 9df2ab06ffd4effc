use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use tracing::warn;

#[derive(Clone)]
pub struct PluginMetrics {
    pub loads: IntCounter,
    pub load_failures: IntCounter,
    pub dispatches: IntCounter,
    pub unsupported: IntCounter,
    pub modules_loaded: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub plugins: PluginMetrics,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, String> {
    let c = IntCounter::new(name, help).map_err(|e| format!("metrics init error: {e}"))?;
    register(registry, name, c.clone());
    Ok(c)
}

// A collector that fails to register still counts; it is just not exported.
fn register<C: Collector + 'static>(registry: &Registry, name: &str, collector: C) {
    if let Err(e) = registry.register(Box::new(collector)) {
        warn!(metric = name, error = %e, "metric not registered");
    }
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let modules_loaded = IntGauge::new("board_modules_loaded", "Board modules currently cached")
            .map_err(|e| format!("metrics init error: {e}"))?;
        register(&registry, "board_modules_loaded", modules_loaded.clone());
        let plugins = PluginMetrics {
            loads: counter(&registry, "board_module_loads", "Board modules opened")?,
            load_failures: counter(
                &registry,
                "board_module_load_failures",
                "Board modules that could not be opened from any search path",
            )?,
            dispatches: counter(&registry, "board_dispatches", "Capability invocations")?,
            unsupported: counter(
                &registry,
                "board_dispatch_unsupported",
                "Capability lookups the board module did not export",
            )?,
            modules_loaded,
        };
        Ok(Self { registry, plugins })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl std::fmt::Debug for MetricsHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsHub")
            .field("loads", &self.plugins.loads.get())
            .field("modules_loaded", &self.plugins.modules_loaded.get())
            .finish_non_exhaustive()
    }
}
