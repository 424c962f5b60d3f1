use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use contracts::{
    DependencyScheduler, DependencySet, InputBuffer, Phase, ProcessOutcome, ProcessRequest,
    RequestId,
};

use super::{FenceTable, InMemoryMetadata};
use crate::EisNode;

#[derive(Debug, Clone)]
struct Parked {
    phase: Phase,
    dependencies: DependencySet,
}

#[derive(Debug, Default)]
struct SchedulerState {
    ready: VecDeque<(RequestId, Phase)>,
    parked: BTreeMap<RequestId, Parked>,
    /// Wakes that arrived before the request parked on its continuation
    early_wakes: HashMap<RequestId, Phase>,
    inputs: HashMap<RequestId, Vec<InputBuffer>>,
    sequential: BTreeSet<RequestId>,
    executed: BTreeSet<RequestId>,
    finished: BTreeSet<RequestId>,
    last_flushed: RequestId,
}

/// Single-threaded dependency scheduler
///
/// Requests run phase by phase. A phase that declares dependencies parks the
/// request until every tag is in the metadata store, every fence is signaled
/// and, for sequential requests entering execution, the predecessor has run
/// its engine step. Continuations only resume through [`DependencyScheduler::wake`].
#[derive(Debug)]
pub struct SimulatedScheduler {
    metadata: Arc<InMemoryMetadata>,
    fences: Arc<FenceTable>,
    state: Mutex<SchedulerState>,
}

impl SimulatedScheduler {
    pub fn new(metadata: Arc<InMemoryMetadata>, fences: Arc<FenceTable>) -> Self {
        Self {
            metadata,
            fences,
            state: Mutex::new(SchedulerState::default()),
        }
    }

    /// Queue a fresh request at phase 0
    pub fn dispatch(&self, request_id: RequestId, inputs: Vec<InputBuffer>) {
        let mut state = self.lock();
        state.inputs.insert(request_id, inputs);
        state.ready.push_back((request_id, Phase::Setup));
    }

    /// Re-dispatch every unfinished request up to `last_request` as a flush
    pub fn flush_pending(&self, last_request: RequestId) -> usize {
        let mut state = self.lock();
        let parked: Vec<RequestId> = state
            .parked
            .range(..=last_request)
            .map(|(id, _)| *id)
            .collect();
        for id in &parked {
            state.parked.remove(id);
            state.early_wakes.remove(id);
            state.ready.push_back((*id, Phase::Flush));
        }
        for entry in state.ready.iter_mut() {
            if entry.0 <= last_request {
                entry.1 = Phase::Flush;
            }
        }
        state.last_flushed = state.last_flushed.max(last_request);
        tracing::debug!(last_request, flushed = parked.len(), "Pending requests flushed");
        parked.len()
    }

    /// Run phases until nothing is ready, returns the outcomes in call order
    pub fn run_until_idle(&self, node: &EisNode) -> Vec<ProcessOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let next = {
                let mut state = self.lock();
                if state.ready.is_empty() {
                    self.release_satisfied(&mut state);
                }
                state.ready.pop_front().map(|(id, phase)| {
                    let inputs = state.inputs.get(&id).cloned().unwrap_or_default();
                    ProcessRequest::new(id, phase, inputs)
                })
            };
            let Some(request) = next else {
                break;
            };

            // the node may call back into `wake`, no lock held here
            let outcome = node.process_request(&request);
            observability::record_outcome(&outcome);
            self.settle(&outcome);
            outcomes.push(outcome);
        }
        outcomes
    }

    pub fn is_finished(&self, request_id: RequestId) -> bool {
        self.lock().finished.contains(&request_id)
    }

    pub fn finished(&self) -> Vec<RequestId> {
        self.lock().finished.iter().copied().collect()
    }

    /// Requests waiting on a dependency
    pub fn parked(&self) -> Vec<(RequestId, Phase)> {
        self.lock()
            .parked
            .iter()
            .map(|(id, p)| (*id, p.phase))
            .collect()
    }

    fn settle(&self, outcome: &ProcessOutcome) {
        let id = outcome.request_id;
        let mut state = self.lock();
        if outcome.sequential_execution {
            state.sequential.insert(id);
        }
        if outcome.satisfy_sequential_execution {
            state.executed.insert(id);
        }

        let Some(next) = outcome.next_phase else {
            state.finished.insert(id);
            state.inputs.remove(&id);
            return;
        };

        if outcome.dependencies.continuation.is_some() {
            if let Some(phase) = state.early_wakes.remove(&id) {
                state.ready.push_back((id, phase));
                return;
            }
        }
        state.parked.insert(
            id,
            Parked {
                phase: next,
                dependencies: outcome.dependencies.clone(),
            },
        );
    }

    fn release_satisfied(&self, state: &mut SchedulerState) {
        let snapshot: &SchedulerState = state;
        let released: Vec<(RequestId, Phase)> = snapshot
            .parked
            .iter()
            .filter(|(id, parked)| self.is_satisfied(snapshot, **id, parked))
            .map(|(id, parked)| (*id, parked.phase))
            .collect();
        for (id, phase) in released {
            state.parked.remove(&id);
            state.ready.push_back((id, phase));
        }
    }

    fn is_satisfied(&self, state: &SchedulerState, id: RequestId, parked: &Parked) -> bool {
        let deps = &parked.dependencies;
        if deps.continuation.is_some() {
            return false;
        }
        let tags_ready = deps.tags.iter().all(|dep| match dep.target(id) {
            Some(target) => self.metadata.contains(dep.tag, target, dep.camera_id),
            None => true,
        });
        let fences_ready = deps.fences.iter().all(|f| self.fences.is_signaled(*f));
        tags_ready && fences_ready && self.predecessor_done(state, id, parked.phase)
    }

    fn predecessor_done(&self, state: &SchedulerState, id: RequestId, phase: Phase) -> bool {
        let gated = matches!(phase, Phase::GyroDependency | Phase::Execute);
        if !gated || !state.sequential.contains(&id) {
            return true;
        }
        let Some(previous) = id.checked_sub(1) else {
            return true;
        };
        let known = state.inputs.contains_key(&previous) || state.finished.contains(&previous);
        !known || state.executed.contains(&previous) || state.finished.contains(&previous)
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DependencyScheduler for SimulatedScheduler {
    fn last_flushed_request(&self) -> RequestId {
        self.lock().last_flushed
    }

    fn wake(&self, request_id: RequestId, phase: Phase) {
        let mut state = self.lock();
        let waiting = state
            .parked
            .get(&request_id)
            .is_some_and(|p| p.dependencies.continuation.is_some());
        if waiting {
            state.parked.remove(&request_id);
            state.ready.push_back((request_id, phase));
        } else if !state.finished.contains(&request_id) {
            state.early_wakes.insert(request_id, phase);
        }
    }
}
