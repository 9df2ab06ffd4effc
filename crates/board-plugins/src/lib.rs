//! board-plugins: resolve accelerator boards to runtime-loaded diagnostic
//! modules and dispatch queries into them.
//!
//! A [`PlatformRegistry`] maps a device's PCI identity (plus an optional
//! on-device feature probe) to a board module. The [`PluginLoader`] opens
//! that module from the configured search prefixes, at most once per table
//! row. [`BoardPlugins`] ties both together and invokes named
//! [capabilities](capability) inside the loaded module, telling apart a
//! missing module, a missing capability and a hard failure.
//!
//! # Module ABI
//!
//! Every entry point takes a [`Token`] first and returns a C `int` status.
//! The token is opaque to this crate; its meaning is set by the
//! [`BoardDevice`] that produced it. For [`SysfsDevice`] it points to the
//! NUL-terminated sysfs path of the PCI device, valid for the duration of
//! the call. Modules built against another handle type (for instance an
//! OPAE `fpga_token`) are not compatible, which is why the default search
//! paths only cover the dedicated `board-plugins/` directories.
//!
//! The default build enables a `mock` backend so that the dispatch path can
//! be exercised without hardware or shared libraries.

mod types;
pub use types::{BoardDescriptor, DeviceIdentity, FeatureId, Status, Token, WILDCARD_ID};

mod error;
pub use error::{DispatchError, IdentityError, LoadError, Result, UnloadError, UnloadFailure};

mod traits;
pub use traits::{BoardDevice, FeatureProber, IdentityReader, ModuleOpener};

pub mod capability;
pub use capability::{Capabilities, Capability, EventLogArgs};

mod config;
pub use config::{LoaderConfig, DEFAULT_SEARCH_PATHS, SEARCH_PATHS_ENV};

mod loader;
pub use loader::{DlOpener, LoadedModule, PluginLoader};

mod registry;
pub use registry::{
    builtin_boards, PlatformRegistry, FEATURE_MAX10_PMCI, FEATURE_MAX10_SPI, GENERIC_PRODUCT_NAME,
};

mod lifecycle;

mod dispatch;
pub use dispatch::BoardPlugins;

mod table;
pub use table::{load_board_table, parse_board_table};

mod sysfs;
pub use sysfs::{SysfsDevice, DEFAULT_PCI_ROOT};

mod metrics;
pub use metrics::{MetricsHub, PluginMetrics};

#[cfg(feature = "mock")]
pub mod mock;
