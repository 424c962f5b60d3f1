//! Dependency scheduler contract.
//!
//! The scheduler owns request dispatch. It reads the [`ProcessOutcome`] of each
//! phase, waits for the declared dependencies and calls the node again.
//! The node calls back only to resume requests parked on a continuation.
//!
//! [`ProcessOutcome`]: crate::ProcessOutcome

use crate::{Phase, RequestId};

pub trait DependencyScheduler: Send + Sync {
    /// Highest request id the pipeline has flushed so far
    fn last_flushed_request(&self) -> RequestId;

    /// Resume `request_id` at `phase`. May be called before the request's
    /// parking outcome has been handed back to the scheduler.
    fn wake(&self, request_id: RequestId, phase: Phase);
}
