//! Lookahead output ring and phase-3 continuations.
//!
//! The ring holds the published bundle of the last `depth` requests, indexed by
//! `request_id % depth`. It is guarded by one mutex together with the
//! last-published watermark and the drain flag, so drain and publish never
//! interleave.
//!
//! Continuations replace the framework's negated future dependency: request N
//! parks after phase 2 until phase 2 of request N + lookahead has written its
//! transform. Completion is tracked per slot with the highest completed request
//! id, so a waiter is ready once its slot has seen its target or a later
//! generation.

use std::sync::{Mutex, MutexGuard, PoisonError};

use contracts::{RequestId, TransformBundle};

/// Ring contents and watermarks
#[derive(Debug)]
pub struct RingState {
    slots: Vec<Option<TransformBundle>>,
    /// Highest request whose phase 3 has published
    pub last_published: RequestId,
    /// Set once a drain has run for the current recording
    pub filled: bool,
    /// The drain ran before any lookahead transform was published
    pub identity_only: bool,
}

impl RingState {
    fn new(depth: usize) -> Self {
        Self {
            slots: vec![None; depth],
            last_published: 0,
            filled: false,
            identity_only: false,
        }
    }

    #[inline]
    fn slot(&self, request_id: RequestId) -> usize {
        (request_id % self.slots.len() as u64) as usize
    }

    #[inline]
    pub fn write(&mut self, request_id: RequestId, bundle: TransformBundle) {
        let slot = self.slot(request_id);
        self.slots[slot] = Some(bundle);
    }

    #[inline]
    pub fn read(&self, request_id: RequestId) -> Option<&TransformBundle> {
        self.slots[self.slot(request_id)].as_ref()
    }

    /// Duplicate the slot of `request_id - 1` into the slot of `request_id`
    pub fn copy_previous(&mut self, request_id: RequestId) {
        let previous = self.slots[self.slot(request_id.saturating_sub(1))].clone();
        let slot = self.slot(request_id);
        self.slots[slot] = previous;
    }

    #[inline]
    pub fn advance_published(&mut self, request_id: RequestId) {
        self.last_published = self.last_published.max(request_id);
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }
}

#[derive(Debug)]
struct CompletionRegistry {
    /// Highest request id whose phase 2 completed, per slot
    completed: Vec<Option<RequestId>>,
    /// Parked (waiter, target) pairs, per slot of the target
    waiters: Vec<Vec<(RequestId, RequestId)>>,
}

impl CompletionRegistry {
    fn new(depth: usize) -> Self {
        Self {
            completed: vec![None; depth],
            waiters: vec![Vec::new(); depth],
        }
    }

    #[inline]
    fn slot(&self, request_id: RequestId) -> usize {
        (request_id % self.completed.len() as u64) as usize
    }

    fn register(&mut self, waiter: RequestId, target: RequestId) -> bool {
        let slot = self.slot(target);
        if self.completed[slot].is_some_and(|done| done >= target) {
            return true;
        }
        self.waiters[slot].push((waiter, target));
        false
    }

    fn complete(&mut self, request_id: RequestId) -> Vec<RequestId> {
        let slot = self.slot(request_id);
        let done = self.completed[slot].map_or(request_id, |d| d.max(request_id));
        self.completed[slot] = Some(done);

        let mut ready = Vec::new();
        self.waiters[slot].retain(|&(waiter, target)| {
            if target <= done {
                ready.push(waiter);
                false
            } else {
                true
            }
        });
        ready
    }

    fn cancel(&mut self, waiter: RequestId) {
        for slot in &mut self.waiters {
            slot.retain(|&(w, _)| w != waiter);
        }
    }

    fn pending(&self) -> usize {
        self.waiters.iter().map(Vec::len).sum()
    }
}

/// Lookahead ring of the node, allocated after pipeline creation
#[derive(Debug)]
pub struct LookaheadRing {
    lookahead: u64,
    state: Mutex<RingState>,
    completions: Mutex<CompletionRegistry>,
}

impl LookaheadRing {
    pub fn new(lookahead: u32, depth: u32) -> Self {
        let depth = depth.max(1) as usize;
        Self {
            lookahead: lookahead as u64,
            state: Mutex::new(RingState::new(depth)),
            completions: Mutex::new(CompletionRegistry::new(depth)),
        }
    }

    pub fn lookahead(&self) -> u64 {
        self.lookahead
    }

    /// Run `f` with the ring locked
    pub fn with_state<R>(&self, f: impl FnOnce(&mut RingState) -> R) -> R {
        let mut state = lock(&self.state);
        f(&mut state)
    }

    pub fn last_published(&self) -> RequestId {
        lock(&self.state).last_published
    }

    /// Park `waiter` until phase 2 of `target` completes
    ///
    /// Returns true when `target` already completed, the waiter is not parked then.
    pub fn register_continuation(&self, waiter: RequestId, target: RequestId) -> bool {
        lock(&self.completions).register(waiter, target)
    }

    /// Mark phase 2 of `request_id` complete, returns the waiters to resume
    pub fn complete(&self, request_id: RequestId) -> Vec<RequestId> {
        lock(&self.completions).complete(request_id)
    }

    /// Drop a parked waiter, used when it is flushed instead
    pub fn cancel(&self, waiter: RequestId) {
        lock(&self.completions).cancel(waiter)
    }

    pub fn pending_continuations(&self) -> usize {
        lock(&self.completions).pending()
    }
}

/// Lock, recovering the guard of a poisoned mutex
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
