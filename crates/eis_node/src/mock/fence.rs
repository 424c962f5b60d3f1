use std::sync::{Mutex, MutexGuard, PoisonError};

use contracts::FenceHandle;
use slab::Slab;

/// Slab-indexed fences, `true` once signaled
#[derive(Debug, Default)]
pub struct FenceTable {
    fences: Mutex<Slab<bool>>,
}

impl FenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> FenceHandle {
        FenceHandle(self.lock().insert(false))
    }

    pub fn signal(&self, fence: FenceHandle) {
        if let Some(signaled) = self.lock().get_mut(fence.0) {
            *signaled = true;
        }
    }

    /// Released fences count as signaled
    pub fn is_signaled(&self, fence: FenceHandle) -> bool {
        self.lock().get(fence.0).copied().unwrap_or(true)
    }

    pub fn release(&self, fence: FenceHandle) {
        self.lock().try_remove(fence.0);
    }

    pub fn outstanding(&self) -> usize {
        self.lock().iter().filter(|(_, signaled)| !**signaled).count()
    }

    fn lock(&self) -> MutexGuard<'_, Slab<bool>> {
        self.fences.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
