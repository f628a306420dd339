//! The per-entity script component.
//!
//! An entity runs up to [`SCRIPT_SLOTS`] scripts at once, each on its own VM from the
//! pool. Every tick each script is resumed once; scripts that finish or fault give
//! their VM back and free their slot.

use thiserror::Error;

use crate::chunk::Program;
use crate::pool::{VmHandle, VmPool};
use crate::vm::{Exit, RuntimeError};

/// Scripts one entity can run at the same time.
pub const SCRIPT_SLOTS: usize = 4;

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachError {
    #[error("All {} script slots are in use.", SCRIPT_SLOTS)]
    NoFreeSlot,
}

/// What happened during one tick.
#[derive(Debug, Default, PartialEq)]
pub struct TickReport {
    /// Scripts that yielded and keep their slot.
    pub yielded: usize,
    /// Scripts that ran to completion.
    pub finished: usize,
    /// Scripts stopped by a runtime error. The owner decides what that means for the entity.
    pub faults: Vec<RuntimeError>,
}

/// VM slots of one entity.
#[derive(Debug, Default)]
pub struct Scripts {
    slots: [Option<VmHandle>; SCRIPT_SLOTS],
}

impl Scripts {
    /// A component with every slot free.
    pub fn new() -> Scripts {
        Scripts::default()
    }

    /// Take a VM from the pool, load `program` into it and put it in the first free
    /// slot. The script starts running on the next tick. Returns the slot used.
    pub fn attach(&mut self, pool: &mut VmPool, program: &Program) -> Result<usize, AttachError> {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(AttachError::NoFreeSlot)?;
        let handle = pool.request();
        if let Some(vm) = pool.get_mut(handle) {
            vm.load(program);
        }
        self.slots[slot] = Some(handle);
        Ok(slot)
    }

    /// Resume every attached script once, in slot order.
    pub fn tick(&mut self, pool: &mut VmPool) -> TickReport {
        let mut report = TickReport::default();
        for (i, slot) in self.slots.iter_mut().enumerate() {
            let Some(handle) = *slot else {
                continue;
            };
            let Some(vm) = pool.get_mut(handle) else {
                log::warn!("script slot {} held a stale VM {:?}", i, handle);
                *slot = None;
                continue;
            };
            match vm.resume() {
                Ok(Exit::Yielded) => {
                    report.yielded += 1;
                    continue;
                }
                Ok(Exit::Finished) => report.finished += 1,
                Err(error) => {
                    log::error!("script in slot {} failed: {}", i, error);
                    report.faults.push(error);
                }
            }
            *slot = None;
            if let Err(e) = pool.reclaim(handle) {
                log::warn!("{}", e);
            }
        }
        report
    }

    /// Stop every script, wherever it is, and give the VMs back.
    pub fn detach_all(&mut self, pool: &mut VmPool) {
        for slot in self.slots.iter_mut() {
            if let Some(handle) = slot.take() {
                if let Err(e) = pool.reclaim(handle) {
                    log::warn!("{}", e);
                }
            }
        }
    }

    /// The VM running in a slot.
    pub fn handle(&self, slot: usize) -> Option<VmHandle> {
        self.slots.get(slot).copied().flatten()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}
