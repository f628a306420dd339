//! A growable pool of reusable VMs.
//!
//! Scripts come and go constantly, so VMs are not built per script: the pool hands
//! out a [`VmHandle`] for an idle VM and takes it back when the script is done. The
//! pool grows a block of VMs at a time and never shrinks. Handles stay valid for as
//! long as the VM is checked out; once reclaimed, the handle is stale and the pool
//! refuses it, even after the same VM has been handed out again under a new handle.

use std::rc::Rc;

use thiserror::Error;

use crate::functions::HostFunctions;
use crate::vm::Vm;

/// How the pool grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// VMs added each time the pool runs out. Zero is treated as one.
    pub block_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig { block_size: 16 }
    }
}

/// Names one checkout of a VM in a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VmHandle {
    block: usize,
    index: usize,
    generation: u32,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("VM {0:?} does not belong to this pool.")]
    UnknownHandle(VmHandle),
    #[error("VM {0:?} is not checked out.")]
    NotInUse(VmHandle),
}

#[derive(Debug)]
struct Slot {
    vm: Vm,
    in_use: bool,
    // bumped on every reclaim, so older handles no longer match
    generation: u32,
}

/// Owns every VM it ever created.
#[derive(Debug)]
pub struct VmPool {
    blocks: Vec<Vec<Slot>>,
    // Idle VMs, most recently reclaimed last.
    free: Vec<VmHandle>,
    functions: Rc<HostFunctions>,
    config: PoolConfig,
}

impl VmPool {
    /// An empty pool; VMs are created on the first request. Every VM the pool creates
    /// installs `functions` when it loads a program.
    pub fn new(functions: Rc<HostFunctions>, config: PoolConfig) -> VmPool {
        VmPool {
            blocks: Vec::new(),
            free: Vec::new(),
            functions,
            config,
        }
    }

    #[allow(missing_docs)]
    pub fn functions(&self) -> &Rc<HostFunctions> {
        &self.functions
    }

    /// Check out an idle VM, growing the pool by a block if there is none.
    /// The VM is empty: nothing loaded, no globals, no objects.
    pub fn request(&mut self) -> VmHandle {
        let handle = match self.free.pop() {
            Some(handle) => handle,
            None => self.grow(),
        };
        if let Some(slot) = self.slot_at(handle) {
            slot.in_use = true;
        }
        handle
    }

    /// Give a VM back. Its state is wiped before anyone else can get it.
    pub fn reclaim(&mut self, handle: VmHandle) -> Result<(), PoolError> {
        let slot = self
            .slot_at(handle)
            .ok_or(PoolError::UnknownHandle(handle))?;
        if !slot.in_use || slot.generation != handle.generation {
            log::warn!("reclaiming VM {:?} twice", handle);
            return Err(PoolError::NotInUse(handle));
        }
        slot.in_use = false;
        slot.generation = slot.generation.wrapping_add(1);
        slot.vm.reset();
        let generation = slot.generation;
        self.free.push(VmHandle {
            generation,
            ..handle
        });
        Ok(())
    }

    /// The VM behind a checked-out handle.
    pub fn get(&self, handle: VmHandle) -> Option<&Vm> {
        self.blocks
            .get(handle.block)
            .and_then(|block| block.get(handle.index))
            .filter(|slot| slot.in_use && slot.generation == handle.generation)
            .map(|slot| &slot.vm)
    }

    #[allow(missing_docs)]
    pub fn get_mut(&mut self, handle: VmHandle) -> Option<&mut Vm> {
        self.slot_at(handle)
            .filter(|slot| slot.in_use && slot.generation == handle.generation)
            .map(|slot| &mut slot.vm)
    }

    /// Number of VMs the pool owns.
    pub fn capacity(&self) -> usize {
        self.blocks.iter().map(Vec::len).sum()
    }

    /// Number of idle VMs.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    // The slot a handle points at, whatever its generation.
    fn slot_at(&mut self, handle: VmHandle) -> Option<&mut Slot> {
        self.blocks
            .get_mut(handle.block)
            .and_then(|block| block.get_mut(handle.index))
    }

    // Add a block and return its first VM; the rest go on the free list.
    fn grow(&mut self) -> VmHandle {
        let block = self.blocks.len();
        let size = self.config.block_size.max(1);
        let vms = (0..size)
            .map(|_| Slot {
                vm: Vm::new(Rc::clone(&self.functions)),
                in_use: false,
                generation: 0,
            })
            .collect();
        self.blocks.push(vms);
        // reversed so that handles come out in index order
        self.free
            .extend((1..size).rev().map(|index| VmHandle {
                block,
                index,
                generation: 0,
            }));
        log::debug!(
            "VM pool grew to {} blocks, {} VMs",
            self.blocks.len(),
            self.capacity()
        );
        VmHandle {
            block,
            index: 0,
            generation: 0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::compiler::compile_source;
    use crate::vm::{Exit, OutputBuffer, VmState};

    fn pool(block_size: usize) -> VmPool {
        VmPool::new(
            Rc::new(HostFunctions::with_builtins()),
            PoolConfig { block_size },
        )
    }

    #[test]
    fn grows_a_block_at_a_time() {
        let mut pool = pool(2);
        assert_eq!(pool.capacity(), 0);
        let a = pool.request();
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.available(), 1);
        let b = pool.request();
        let c = pool.request();
        assert_eq!(pool.capacity(), 4);
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!((a.block, a.index), (0, 0));
        assert_eq!((c.block, c.index), (1, 0));
    }

    #[test]
    fn zero_block_size_still_grows() {
        let mut pool = pool(0);
        let handle = pool.request();
        assert!(pool.get(handle).is_some());
        assert_eq!(pool.capacity(), 1);
    }

    #[test]
    fn reclaimed_vms_come_back_empty() {
        let mut pool = pool(1);
        let program = compile_source("let p = point(1, 2); let s = \"a\" + \"b\";", pool.functions())
            .unwrap();

        let handle = pool.request();
        let vm = pool.get_mut(handle).unwrap();
        vm.set_output(OutputBuffer::new());
        vm.load(&program);
        assert_eq!(vm.run(), Ok(Exit::Finished));
        assert!(vm.globals_len() > 0);
        pool.reclaim(handle).unwrap();

        let again = pool.request();
        assert_eq!((again.block, again.index), (handle.block, handle.index));
        let vm = pool.get(again).unwrap();
        assert_eq!(vm.state(), &VmState::Empty);
        assert_eq!(vm.globals_len(), 0);
        assert!(vm.heap().is_empty());
        assert_eq!(vm.stack_depth(), 0);
    }

    #[test]
    fn stale_handles_are_refused() {
        let mut pool = pool(4);
        let handle = pool.request();
        pool.reclaim(handle).unwrap();
        assert_eq!(pool.reclaim(handle), Err(PoolError::NotInUse(handle)));
        assert!(pool.get(handle).is_none());
        assert!(pool.get_mut(handle).is_none());
        assert_eq!(pool.available(), 4);

        let foreign = VmHandle {
            block: 7,
            index: 0,
            generation: 0,
        };
        assert_eq!(pool.reclaim(foreign), Err(PoolError::UnknownHandle(foreign)));
    }

    #[test]
    fn never_shrinks() {
        let mut pool = pool(3);
        let handles: Vec<_> = (0..5).map(|_| pool.request()).collect();
        for handle in handles {
            pool.reclaim(handle).unwrap();
        }
        assert_eq!(pool.capacity(), 6);
        assert_eq!(pool.available(), 6);
    }

    #[test]
    fn old_handles_do_not_reach_the_next_checkout() {
        let mut pool = pool(1);
        let old = pool.request();
        pool.reclaim(old).unwrap();
        let new = pool.request();
        assert_eq!((new.block, new.index), (old.block, old.index));
        assert_ne!(new, old);

        assert!(pool.get(old).is_none());
        assert!(pool.get_mut(old).is_none());
        assert_eq!(pool.reclaim(old), Err(PoolError::NotInUse(old)));
        assert!(pool.get(new).is_some());
        assert_eq!(pool.reclaim(new), Ok(()));
    }
}
