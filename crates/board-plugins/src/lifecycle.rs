use crate::registry::Slot;
use crate::{PlatformRegistry, PluginLoader, UnloadError, UnloadFailure};
use std::sync::Arc;
use tracing::{debug, warn};

impl PlatformRegistry {
    /// Close every cached module and clear its slot.
    ///
    /// Every slot is attempted; failures are collected rather than stopping
    /// the sweep. A module still referenced by an in-flight call cannot be
    /// closed and stays cached.
    pub fn unload_all(&self, loader: &PluginLoader) -> Result<(), UnloadError> {
        let guard = self.lock();
        let taken: Vec<(usize, Arc<_>)> = {
            let mut slots = guard.try_borrow_mut().map_err(|_| UnloadError::Lock)?;
            slots
                .iter_mut()
                .enumerate()
                .filter_map(|(i, slot)| match std::mem::take(slot) {
                    Slot::Loaded(m) => Some((i, m)),
                    // An open in progress on this thread is left to finish.
                    other => {
                        *slot = other;
                        None
                    }
                })
                .collect()
        };

        let mut failures = Vec::new();
        for (index, module) in taken {
            match Arc::try_unwrap(module) {
                Ok(module) => {
                    let name = module.name().to_string();
                    match loader.close(module) {
                        Ok(()) => debug!(module = %name, "unloaded board module"),
                        Err(diagnostic) => {
                            warn!(module = %name, %diagnostic, "failed to unload board module");
                            failures.push(UnloadFailure {
                                module: name,
                                diagnostic,
                            });
                        }
                    }
                }
                Err(shared) => {
                    warn!(module = %shared.name(), "board module still in use, not unloaded");
                    failures.push(UnloadFailure {
                        module: shared.name().to_string(),
                        diagnostic: "module still in use".to_string(),
                    });
                    let mut slots = guard.try_borrow_mut().map_err(|_| UnloadError::Lock)?;
                    slots[index] = Slot::Loaded(shared);
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(UnloadError::Modules(failures))
        }
    }
}
