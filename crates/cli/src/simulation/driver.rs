//! Drives one simulated recording through the node.
//!
//! Requests are dispatched one at a time; the scheduler runs every phase that
//! becomes ready before the next request arrives. Stopping the recording
//! publishes the end-of-stream watermark and flushes what is still parked.

use std::time::Instant;

use eis_node::mock::{Simulation, SimulationConfig};
use observability::EisMetricsAggregator;
use tracing::{debug, info, instrument};

use super::SimulationStats;
use crate::error::{CliError, Result};

/// Shape of the simulated recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingPlan {
    pub frames: u64,
    /// Request after which recording stops
    pub stop_at: u64,
    /// Every n-th request has stabilization off (0 = never)
    pub disable_every: u64,
}

impl RecordingPlan {
    pub fn new(frames: u64, stop_at: Option<u64>, disable_every: u64) -> Result<Self> {
        if frames == 0 {
            return Err(CliError::invalid_arguments("--frames must be at least 1"));
        }
        let stop_at = stop_at.unwrap_or(frames);
        if stop_at == 0 || stop_at > frames {
            return Err(CliError::invalid_arguments(format!(
                "--stop-at must be in 1..={frames}, got {stop_at}"
            )));
        }
        Ok(Self {
            frames,
            stop_at,
            disable_every,
        })
    }

    pub fn is_enabled(&self, request_id: u64) -> bool {
        self.disable_every == 0 || request_id % self.disable_every != 0
    }
}

pub struct SimulationDriver {
    sim: Simulation,
    plan: RecordingPlan,
    metrics: EisMetricsAggregator,
    seen: usize,
}

impl std::fmt::Debug for SimulationDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationDriver")
            .field("plan", &self.plan)
            .field("seen", &self.seen)
            .finish()
    }
}

impl SimulationDriver {
    pub fn new(config: SimulationConfig, plan: RecordingPlan) -> Result<Self> {
        let sim = Simulation::new(config).map_err(|e| CliError::simulation(e.to_string()))?;
        Ok(Self {
            sim,
            plan,
            metrics: EisMetricsAggregator::new(),
            seen: 0,
        })
    }

    /// Run the whole plan, yielding to the runtime between requests
    #[instrument(level = "info", name = "simulate", skip(self), fields(frames = self.plan.frames))]
    pub async fn run(mut self) -> SimulationStats {
        let started = Instant::now();
        let mut drained_at = None;

        for request_id in 1..=self.plan.frames {
            self.sim.submit(request_id, self.plan.is_enabled(request_id));
            self.sim.run();

            if request_id == self.plan.stop_at {
                let flushed = self.sim.stop_recording(request_id);
                self.sim.run();
                info!(request_id, flushed, "Recording stopped");
                drained_at = Some(request_id);
            }
            self.collect();
            tokio::task::yield_now().await;
        }

        // requests past the stop form a second recording, close it too
        if drained_at != Some(self.plan.frames) {
            self.sim.stop_recording(self.plan.frames);
            self.sim.run();
            self.collect();
        }
        self.sim.node.stream_off();

        self.stats(started)
    }

    fn collect(&mut self) {
        let outcomes = &self.sim.outcomes()[self.seen..];
        for outcome in outcomes {
            self.metrics.update(outcome);
        }
        self.seen += outcomes.len();
        debug!(total = self.seen, "Outcomes collected");
    }

    fn stats(&self, started: Instant) -> SimulationStats {
        let published = (1..=self.plan.frames)
            .filter(|id| self.sim.published(*id).is_some())
            .count() as u64;
        SimulationStats {
            frames: self.plan.frames,
            stop_at: self.plan.stop_at,
            published_requests: published,
            engine_calls: self.sim.engine_calls().len() as u64,
            last_published: self
                .sim
                .node
                .ring()
                .map(|ring| ring.last_published())
                .unwrap_or(0),
            lookahead: self.sim.node.lookahead(),
            motion_available: self.sim.node.motion_available(),
            duration: started.elapsed(),
            metrics: self.metrics.clone(),
        }
    }
}
