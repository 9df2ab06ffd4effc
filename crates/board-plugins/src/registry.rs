//! Platform table: hardware identity to board module.
//!
//! Rows are scanned in table order and the first row that passes every check
//! wins, so order encodes priority between rows sharing vendor/device IDs.
//! The shape of the table never changes after construction; only the
//! per-row module cache does, and only under the registry lock.

use crate::{
    BoardDescriptor, BoardDevice, DeviceIdentity, DispatchError, FeatureId, FeatureProber,
    LoadedModule, PluginLoader,
};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;
use std::sync::Arc;
use tracing::debug;

/// Label used when no row carries the device's exact identity.
pub const GENERIC_PRODUCT_NAME: &str = "Intel Acceleration Development Platform";

/// Max10 SPI feature block.
pub const FEATURE_MAX10_SPI: FeatureId = FeatureId(0xe);
/// Max10 PMCI feature block.
pub const FEATURE_MAX10_PMCI: FeatureId = FeatureId(0x12);

/// Cache state of one table row.
#[derive(Clone, Default)]
pub(crate) enum Slot {
    #[default]
    Empty,
    /// An open is in progress on the thread holding the lock.
    Loading,
    Loaded(Arc<LoadedModule>),
}

impl Slot {
    pub(crate) fn module(&self) -> Option<&Arc<LoadedModule>> {
        match self {
            Slot::Loaded(module) => Some(module),
            _ => None,
        }
    }
}

pub(crate) type Slots = RefCell<Vec<Slot>>;

// Puts a `Loading` slot back to `Empty` if the open unwinds or fails.
struct LoadingMark<'a> {
    slots: &'a Slots,
    index: usize,
}

impl Drop for LoadingMark<'_> {
    fn drop(&mut self) {
        if let Ok(mut slots) = self.slots.try_borrow_mut() {
            if matches!(slots[self.index], Slot::Loading) {
                slots[self.index] = Slot::Empty;
            }
        }
    }
}

pub struct PlatformRegistry {
    boards: Vec<BoardDescriptor>,
    // One cache slot per row. Re-entrant so probes and openers may call back
    // into the registry from the thread holding it.
    pub(crate) slots: ReentrantMutex<Slots>,
}

impl PlatformRegistry {
    pub fn new(boards: Vec<BoardDescriptor>) -> Self {
        let slots = ReentrantMutex::new(RefCell::new(vec![Slot::Empty; boards.len()]));
        Self { boards, slots }
    }

    /// The built-in table of supported boards.
    pub fn builtin() -> Self {
        Self::new(builtin_boards())
    }

    pub fn boards(&self) -> &[BoardDescriptor] {
        &self.boards
    }

    pub fn len(&self) -> usize {
        self.boards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }

    pub(crate) fn lock(&self) -> ReentrantMutexGuard<'_, Slots> {
        self.slots.lock()
    }

    /// Index of the first row applying to `identity`.
    ///
    /// A row whose required feature is absent is skipped and the scan goes
    /// on, so a later, less specific row can still serve the device.
    pub fn find_index<P>(&self, identity: &DeviceIdentity, prober: &P) -> Option<usize>
    where
        P: FeatureProber + ?Sized,
    {
        let _guard = self.lock();
        self.boards.iter().position(|board| {
            if !board.matches_ids(identity) {
                return false;
            }
            match board.required_feature {
                Some(feature) if !prober.has_feature(feature) => {
                    debug!(module = %board.module, %feature, "feature absent, trying next row");
                    false
                }
                _ => true,
            }
        })
    }

    pub fn find<P>(&self, identity: &DeviceIdentity, prober: &P) -> Option<&BoardDescriptor>
    where
        P: FeatureProber + ?Sized,
    {
        self.find_index(identity, prober).map(|i| &self.boards[i])
    }

    /// Product label of the first row carrying exactly this identity.
    pub fn product_name(&self, identity: &DeviceIdentity) -> &str {
        let _guard = self.lock();
        self.boards
            .iter()
            .find(|board| board.matches_exactly(identity))
            .map(|board| board.product_name.as_str())
            .unwrap_or(GENERIC_PRODUCT_NAME)
    }

    pub fn is_loaded(&self, index: usize) -> bool {
        let guard = self.lock();
        let loaded = guard
            .try_borrow()
            .map(|slots| matches!(slots.get(index), Some(Slot::Loaded(_))))
            .unwrap_or(false);
        loaded
    }

    pub fn loaded_count(&self) -> usize {
        let guard = self.lock();
        let count = guard
            .try_borrow()
            .map(|slots| slots.iter().filter(|s| s.module().is_some()).count())
            .unwrap_or(0);
        count
    }

    /// Module for row `index`, opened at most once for the registry's
    /// lifetime (or until [`unload_all`](Self::unload_all)).
    pub fn resolve(&self, index: usize, loader: &PluginLoader) -> Result<Arc<LoadedModule>, DispatchError> {
        let _guard = self.lock();
        self.resolve_locked(index, loader)
    }

    /// Match `device` and resolve its module under one hold of the lock.
    pub fn resolve_device(
        &self,
        device: &dyn BoardDevice,
        identity: &DeviceIdentity,
        loader: &PluginLoader,
    ) -> Result<(&BoardDescriptor, Arc<LoadedModule>), DispatchError> {
        let _guard = self.lock();
        let index = self
            .find_index(identity, device)
            .ok_or(DispatchError::NoModule(*identity))?;
        let module = self.resolve_locked(index, loader)?;
        Ok((&self.boards[index], module))
    }

    // Caller holds the lock. The RefCell is never borrowed across the open
    // call; the slot is marked `Loading` instead, so a re-entrant resolve of
    // the same row from inside the open fails rather than opening it twice.
    fn resolve_locked(&self, index: usize, loader: &PluginLoader) -> Result<Arc<LoadedModule>, DispatchError> {
        let guard = self.lock();
        let board = self.boards.get(index).ok_or(DispatchError::NoSuchRow(index))?;
        {
            let mut slots = guard
                .try_borrow_mut()
                .map_err(|_| DispatchError::Lock("module cache is borrowed"))?;
            if let Slot::Loaded(module) = &slots[index] {
                return Ok(Arc::clone(module));
            }
            if matches!(slots[index], Slot::Loading) {
                return Err(DispatchError::Lock("module is already being loaded on this thread"));
            }
            slots[index] = Slot::Loading;
        }
        let mark = LoadingMark {
            slots: &*guard,
            index,
        };
        let module = Arc::new(loader.load(board)?);
        let mut slots = guard
            .try_borrow_mut()
            .map_err(|_| DispatchError::Lock("module cache is borrowed"))?;
        slots[index] = Slot::Loaded(Arc::clone(&module));
        drop(slots);
        drop(mark);
        Ok(module)
    }
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl std::fmt::Debug for PlatformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformRegistry")
            .field("boards", &self.boards.len())
            .field("loaded", &self.loaded_count())
            .finish()
    }
}

fn board(
    vendor_id: u16,
    device_id: u16,
    subvendor_id: u16,
    subdevice_id: u16,
    required_feature: Option<FeatureId>,
    module: &str,
    product_name: &str,
) -> BoardDescriptor {
    BoardDescriptor {
        vendor_id,
        device_id,
        subvendor_id,
        subdevice_id,
        required_feature,
        module: module.to_string(),
        product_name: product_name.to_string(),
    }
}

const N5010: &str = "Silicom FPGA SmartNIC N5010 Series";
const A10GX: &str = "Intel Programmable Acceleration Card with Intel Arria 10 GX FPGA";
const N3000: &str = "Intel FPGA Programmable Acceleration Card N3000";
const D5005: &str = "Intel FPGA Programmable Acceleration Card D5005";
const OFS: &str = "Intel Open FPGA Stack Platform";

pub fn builtin_boards() -> Vec<BoardDescriptor> {
    let spi = Some(FEATURE_MAX10_SPI);
    let pmci = Some(FEATURE_MAX10_PMCI);
    vec![
        board(0x1c2c, 0x1000, 0x1c2c, 0x0, None, "libboard_n5010.so", N5010),
        board(0x1c2c, 0x1001, 0x1c2c, 0x0, None, "libboard_n5010.so", N5010),
        board(0x8086, 0x09c4, 0x8086, 0x0, None, "libboard_a10gx.so", A10GX),
        board(0x8086, 0x09c5, 0x8086, 0x0, None, "libboard_a10gx.so", A10GX),
        board(0x8086, 0x0b30, 0x8086, 0x0, None, "libboard_n3000.so", N3000),
        board(0x8086, 0x0b31, 0x8086, 0x0, None, "libboard_n3000.so", N3000),
        board(0x8086, 0x0b2b, 0x8086, 0x0, None, "libboard_d5005.so", D5005),
        board(0x8086, 0x0b2c, 0x8086, 0x0, None, "libboard_d5005.so", D5005),
        board(0x8086, 0xaf00, 0x8086, 0x0, spi, "libboard_d5005.so", OFS),
        board(0x8086, 0xbcce, 0x8086, 0x0, spi, "libboard_d5005.so", OFS),
        board(0x8086, 0xbcce, 0x8086, 0x138d, spi, "libboard_d5005.so", OFS),
        board(0x8086, 0xaf00, 0x8086, 0x0, pmci, "libboard_n6000.so", OFS),
        board(
            0x8086,
            0xbcce,
            0x8086,
            0x1770,
            pmci,
            "libboard_n6000.so",
            "Intel Acceleration Development Platform N6000",
        ),
        board(
            0x8086,
            0xbcce,
            0x8086,
            0x1771,
            pmci,
            "libboard_n6000.so",
            "Intel Acceleration Development Platform N6001",
        ),
        board(
            0x8086,
            0xbcce,
            0x8086,
            0x17d4,
            pmci,
            "libboard_n6000.so",
            "Intel Acceleration Development Platform C6100",
        ),
    ]
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::mock::{MockDevice, MockOpener};
    use crate::{Capabilities, IdentityReader, LoaderConfig, ModuleOpener};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{OnceLock, Weak};
    use std::time::Duration;

    fn row(feature: Option<u64>, module: &str) -> BoardDescriptor {
        board(0x8086, 0xaf00, 0x8086, 0, feature.map(FeatureId), module, "row")
    }

    #[test]
    fn test_n6000_scenario() {
        let reg = PlatformRegistry::builtin();
        let dev = MockDevice::new(DeviceIdentity::new(0x8086, 0xbcce, 0x8086, 0x1770))
            .with_features([0x12]);
        let identity = dev.identity().unwrap();
        let found = reg.find(&identity, &dev).unwrap();
        assert_eq!(found.module, "libboard_n6000.so");
        assert_eq!(found.product_name, "Intel Acceleration Development Platform N6000");
    }

    #[test]
    fn test_ofs_d5005_scenario() {
        let reg = PlatformRegistry::builtin();
        let dev = MockDevice::new(DeviceIdentity::new(0x8086, 0xbcce, 0x8086, 0x0)).with_features([0xe]);
        let identity = dev.identity().unwrap();
        let found = reg.find(&identity, &dev).unwrap();
        assert_eq!(found.module, "libboard_d5005.so");
        assert_eq!(found.product_name, OFS);
        assert_eq!(reg.product_name(&identity), OFS);
    }

    #[test]
    fn test_unknown_device_has_no_row() {
        let reg = PlatformRegistry::builtin();
        let identity = DeviceIdentity::new(0x10ee, 0x5000, 0x10ee, 0x0);
        let dev = MockDevice::new(identity);
        assert!(reg.find(&identity, &dev).is_none());
        assert_eq!(reg.product_name(&identity), GENERIC_PRODUCT_NAME);
    }

    #[test]
    fn test_feature_row_never_matches_without_feature() {
        let reg = PlatformRegistry::builtin();
        for board in reg.boards().iter().filter(|b| b.required_feature.is_some()) {
            let identity =
                DeviceIdentity::new(board.vendor_id, board.device_id, board.subvendor_id, board.subdevice_id);
            let bare = MockDevice::new(identity);
            assert!(reg.find(&identity, &bare).is_none(), "{board:?}");
        }
    }

    #[test]
    fn test_failed_probe_falls_back_to_later_row() {
        let reg = PlatformRegistry::new(vec![row(Some(0x12), "first.so"), row(None, "second.so")]);
        let identity = DeviceIdentity::new(0x8086, 0xaf00, 0x8086, 0);
        let dev = MockDevice::new(identity);
        assert_eq!(reg.find(&identity, &dev).unwrap().module, "second.so");

        let with = MockDevice::new(identity).with_features([0x12]);
        assert_eq!(reg.find(&identity, &with).unwrap().module, "first.so");
    }

    #[test]
    fn test_probe_only_runs_for_id_matches() {
        let reg = PlatformRegistry::builtin();
        let identity = DeviceIdentity::new(0x8086, 0x0b30, 0x8086, 0);
        let dev = MockDevice::new(identity);
        reg.find(&identity, &dev).unwrap();
        assert_eq!(dev.probe_count(), 0);
    }

    #[test]
    fn test_resolve_caches_handle() {
        let reg = PlatformRegistry::new(vec![row(None, "libboard_a.so")]);
        let opener = Arc::new(MockOpener::new().with_module("/m/libboard_a.so", Capabilities::default()));
        let loader = PluginLoader::with_opener(LoaderConfig::with_search_paths(["/m/"]), opener.clone());
        let a = reg.resolve(0, &loader).unwrap();
        let b = reg.resolve(0, &loader).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(opener.open_calls(), 1);
        assert!(reg.is_loaded(0));
        assert_eq!(reg.loaded_count(), 1);
    }

    #[test]
    fn test_concurrent_resolve_opens_once() {
        let reg = PlatformRegistry::new(vec![row(None, "libboard_a.so")]);
        let opener = Arc::new(
            MockOpener::new()
                .with_module("/m/libboard_a.so", Capabilities::default())
                .with_open_delay(Duration::from_millis(20)),
        );
        let loader = PluginLoader::with_opener(LoaderConfig::with_search_paths(["/m/"]), opener.clone());
        let handles: Vec<Arc<LoadedModule>> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..8).map(|_| s.spawn(|| reg.resolve(0, &loader).unwrap())).collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });
        assert_eq!(opener.open_calls(), 1);
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    }

    #[test]
    fn test_failed_load_is_not_cached() {
        let reg = PlatformRegistry::new(vec![row(None, "libboard_gone.so")]);
        let opener = Arc::new(MockOpener::new());
        let loader = PluginLoader::with_opener(LoaderConfig::with_search_paths(["/m/"]), opener.clone());
        assert!(matches!(reg.resolve(0, &loader), Err(DispatchError::LoadFailed(_))));
        assert!(!reg.is_loaded(0));
    }

    struct ReentrantProber<'a> {
        reg: &'a PlatformRegistry,
        calls: AtomicUsize,
    }

    impl FeatureProber for ReentrantProber<'_> {
        fn has_feature(&self, _feature: FeatureId) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Calls back into the registry while the scan holds the lock.
            self.reg.loaded_count() == 0
        }
    }

    #[test]
    fn test_probe_may_reenter_registry() {
        let reg = PlatformRegistry::new(vec![row(Some(0x12), "a.so")]);
        let prober = ReentrantProber {
            reg: &reg,
            calls: AtomicUsize::new(0),
        };
        let identity = DeviceIdentity::new(0x8086, 0xaf00, 0x8086, 0);
        assert_eq!(reg.find(&identity, &prober).unwrap().module, "a.so");
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
    }

    // Calls back into the registry for the same row from inside its open.
    struct NestedOpener {
        registry: Arc<PlatformRegistry>,
        loader: OnceLock<Weak<PluginLoader>>,
        inner: MockOpener,
        nested_refused: AtomicBool,
    }

    impl ModuleOpener for NestedOpener {
        fn open(&self, path: &Path, module: &str) -> Result<LoadedModule, String> {
            if let Some(loader) = self.loader.get().and_then(Weak::upgrade) {
                let nested = self.registry.resolve(0, &loader);
                if matches!(nested, Err(DispatchError::Lock(_))) {
                    self.nested_refused.store(true, Ordering::SeqCst);
                }
            }
            self.inner.open(path, module)
        }
    }

    #[test]
    fn test_reentrant_resolve_does_not_open_twice() {
        let reg = Arc::new(PlatformRegistry::new(vec![row(None, "libboard_a.so")]));
        let opener = Arc::new(NestedOpener {
            registry: Arc::clone(&reg),
            loader: OnceLock::new(),
            inner: MockOpener::new().with_module("/m/libboard_a.so", Capabilities::default()),
            nested_refused: AtomicBool::new(false),
        });
        let loader = Arc::new(PluginLoader::with_opener(
            LoaderConfig::with_search_paths(["/m/"]),
            opener.clone(),
        ));
        opener.loader.set(Arc::downgrade(&loader)).unwrap();

        let first = reg.resolve(0, &loader).unwrap();
        assert_eq!(opener.inner.open_calls(), 1);
        assert!(opener.nested_refused.load(Ordering::SeqCst));
        assert!(reg.is_loaded(0));

        let again = reg.resolve(0, &loader).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(opener.inner.open_calls(), 1);
    }

    #[test]
    fn test_failed_load_clears_loading_mark() {
        let reg = PlatformRegistry::new(vec![row(None, "libboard_a.so")]);
        let missing = PluginLoader::with_opener(
            LoaderConfig::with_search_paths(["/m/"]),
            Arc::new(MockOpener::new()),
        );
        assert!(matches!(reg.resolve(0, &missing), Err(DispatchError::LoadFailed(_))));

        let opener = Arc::new(MockOpener::new().with_module("/m/libboard_a.so", Capabilities::default()));
        let loader = PluginLoader::with_opener(LoaderConfig::with_search_paths(["/m/"]), opener.clone());
        reg.resolve(0, &loader).unwrap();
        assert_eq!(opener.open_calls(), 1);
    }

    #[test]
    fn test_resolve_unknown_row() {
        let reg = PlatformRegistry::new(vec![row(None, "libboard_a.so")]);
        let opener = Arc::new(MockOpener::new());
        let loader = PluginLoader::with_opener(LoaderConfig::with_search_paths(["/m/"]), opener.clone());
        assert!(matches!(reg.resolve(7, &loader), Err(DispatchError::NoSuchRow(7))));
        assert_eq!(opener.open_calls(), 0);
    }
}
