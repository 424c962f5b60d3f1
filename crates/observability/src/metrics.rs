//! Stabilization node metrics
//!
//! Per-phase counters, publish and degradation accounting, engine latency.

use std::collections::BTreeMap;

use contracts::{DegradeReason, Phase, ProcessOutcome, RequestId, TargetGeometry};
use metrics::{counter, gauge, histogram};

/// Record one `process_request` invocation
pub fn record_phase(phase: Phase) {
    counter!("eisv3_phase_total", "phase" => phase.as_str()).increment(1);
}

/// Record the outcome handed back to the scheduler
///
/// Call once per `process_request`, after the node returns.
pub fn record_outcome(outcome: &ProcessOutcome) {
    if let Some(reason) = outcome.degraded {
        record_degraded(reason);
    }
    if outcome.is_finished() {
        counter!("eisv3_requests_finished_total").increment(1);
    }
    if outcome.bypass {
        counter!("eisv3_bypass_total").increment(1);
    }
}

/// Record a degraded (identity) result
pub fn record_degraded(reason: DegradeReason) {
    counter!("eisv3_degraded_total", "reason" => reason.as_str()).increment(1);
}

/// Record a transform written to the consumer tags
///
/// `source` is one of `future`, `ring` or `identity`.
pub fn record_publish(target: TargetGeometry, source: &'static str, request_id: RequestId) {
    let target = match target {
        TargetGeometry::Ica10 => "ica10",
        TargetGeometry::Ica20 => "ica20",
        TargetGeometry::Ica30 => "ica30",
        TargetGeometry::GpuGrid => "gpu_grid",
    };
    counter!("eisv3_published_total", "target" => target, "source" => source).increment(1);
    gauge!("eisv3_last_published_request").set(request_id as f64);
}

/// Record one engine `process` call
pub fn record_engine_call(status: &'static str, latency_us: f64) {
    counter!("eisv3_engine_calls_total", "status" => status).increment(1);
    histogram!("eisv3_engine_latency_us").record(latency_us);
}

/// Record the gyro sample count handed to the engine
pub fn record_gyro_samples(count: usize) {
    histogram!("eisv3_gyro_samples").record(count as f64);
    if count == 0 {
        counter!("eisv3_gyro_empty_total").increment(1);
    }
}

/// Record a stop-recording drain
pub fn record_drain(frames: u64) {
    counter!("eisv3_drain_total").increment(1);
    histogram!("eisv3_drain_frames").record(frames as f64);
}

/// Stabilization metrics aggregator
///
/// Aggregates outcomes in memory for end-of-run summaries.
#[derive(Debug, Clone, Default)]
pub struct EisMetricsAggregator {
    /// Total `process_request` calls
    pub total_calls: u64,

    /// Requests that reached a terminal outcome
    pub finished_requests: u64,

    /// Terminal outcomes that wrote the consumer tags
    pub published: u64,

    /// Calls per phase
    pub phase_counts: BTreeMap<&'static str, u64>,

    /// Degraded results per reason
    pub degraded_counts: BTreeMap<&'static str, u64>,

    /// Continuations handed out, publish waits on a future request
    pub continuations: u64,

    /// Engine step latencies
    pub engine_latency: EngineLatency,
}

impl EisMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update from one outcome
    pub fn update(&mut self, outcome: &ProcessOutcome) {
        self.total_calls += 1;

        if let Some(phase) = outcome.phase {
            *self.phase_counts.entry(phase.as_str()).or_insert(0) += 1;
        }
        if let Some(reason) = outcome.degraded {
            *self.degraded_counts.entry(reason.as_str()).or_insert(0) += 1;
        }
        if outcome.dependencies.continuation.is_some() {
            self.continuations += 1;
        }
        if let Some(latency_us) = outcome.engine_latency_us {
            self.engine_latency.record(latency_us);
        }
        if outcome.is_finished() {
            self.finished_requests += 1;
            if outcome.published {
                self.published += 1;
            }
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_calls: self.total_calls,
            finished_requests: self.finished_requests,
            published: self.published,
            publish_rate: if self.finished_requests > 0 {
                self.published as f64 / self.finished_requests as f64 * 100.0
            } else {
                0.0
            },
            continuations: self.continuations,
            phase_counts: self.phase_counts.clone(),
            degraded_counts: self.degraded_counts.clone(),
            engine_latency: self.engine_latency.summary(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Metrics summary
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_calls: u64,
    pub finished_requests: u64,
    pub published: u64,
    pub publish_rate: f64,
    pub continuations: u64,
    pub phase_counts: BTreeMap<&'static str, u64>,
    pub degraded_counts: BTreeMap<&'static str, u64>,
    pub engine_latency: LatencySummary,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Stabilization Metrics Summary ===")?;
        writeln!(f, "Process calls: {}", self.total_calls)?;
        writeln!(
            f,
            "Finished requests: {} (published {:.2}%)",
            self.finished_requests, self.publish_rate
        )?;
        writeln!(f, "Lookahead continuations: {}", self.continuations)?;
        writeln!(f, "Engine step latency (us): {}", self.engine_latency)?;

        if !self.phase_counts.is_empty() {
            writeln!(f, "Phase calls:")?;
            for (phase, count) in &self.phase_counts {
                writeln!(f, "  {}: {}", phase, count)?;
            }
        }

        if !self.degraded_counts.is_empty() {
            writeln!(f, "Degraded results:")?;
            for (reason, count) in &self.degraded_counts {
                writeln!(f, "  {}: {}", reason, count)?;
            }
        }

        Ok(())
    }
}

/// Engine step latency, one sample per executed request
///
/// Samples stay sorted so percentiles are a lookup.
#[derive(Debug, Clone, Default)]
pub struct EngineLatency {
    sorted_us: Vec<u64>,
    total_us: u64,
    over_budget: u64,
}

/// One frame at 30 fps, an engine step slower than this stalls the stream
pub const FRAME_BUDGET_US: u64 = 33_333;

impl EngineLatency {
    pub fn record(&mut self, latency_us: u64) {
        let at = self.sorted_us.partition_point(|&v| v <= latency_us);
        self.sorted_us.insert(at, latency_us);
        self.total_us += latency_us;
        if latency_us > FRAME_BUDGET_US {
            self.over_budget += 1;
        }
    }

    pub fn count(&self) -> usize {
        self.sorted_us.len()
    }

    /// Nearest-rank percentile, `None` without samples
    pub fn percentile(&self, p: f64) -> Option<u64> {
        let n = self.sorted_us.len();
        if n == 0 {
            return None;
        }
        let rank = ((p.clamp(0.0, 100.0) / 100.0) * n as f64).ceil() as usize;
        Some(self.sorted_us[rank.clamp(1, n) - 1])
    }

    pub fn summary(&self) -> LatencySummary {
        let count = self.sorted_us.len() as u64;
        LatencySummary {
            count,
            mean_us: if count > 0 {
                self.total_us as f64 / count as f64
            } else {
                0.0
            },
            p50_us: self.percentile(50.0).unwrap_or(0),
            p95_us: self.percentile(95.0).unwrap_or(0),
            max_us: self.sorted_us.last().copied().unwrap_or(0),
            over_budget: self.over_budget,
        }
    }
}

/// Snapshot of [`EngineLatency`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencySummary {
    pub count: u64,
    pub mean_us: f64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub max_us: u64,
    /// Steps slower than [`FRAME_BUDGET_US`]
    pub over_budget: u64,
}

impl std::fmt::Display for LatencySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            return write!(f, "N/A");
        }
        write!(
            f,
            "p50={} p95={} max={} mean={:.1} over budget={} (n={})",
            self.p50_us, self.p95_us, self.max_us, self.mean_us, self.over_budget, self.count
        )
    }
}
