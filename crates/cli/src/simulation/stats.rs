//! Simulation statistics.

use std::time::Duration;

use observability::EisMetricsAggregator;

/// Statistics from a simulated recording
#[derive(Debug, Clone, Default)]
pub struct SimulationStats {
    pub frames: u64,
    pub stop_at: u64,
    /// Requests whose consumer tags were written
    pub published_requests: u64,
    /// `process` calls seen by the engine, drain included
    pub engine_calls: u64,
    pub last_published: u64,
    pub lookahead: u64,
    pub motion_available: bool,
    pub duration: Duration,
    pub metrics: EisMetricsAggregator,
}

impl SimulationStats {
    /// Requests per second of wall time
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }

    pub fn print_summary(&self) {
        let summary = self.metrics.summary();

        println!("\nSimulation");
        println!("   ├─ Duration: {:.3}s", self.duration.as_secs_f64());
        println!("   ├─ Requests: {} (stop at {})", self.frames, self.stop_at);
        println!("   ├─ Throughput: {:.1} req/s", self.throughput());
        println!("   ├─ Lookahead: {}", self.lookahead);
        println!("   ├─ Motion available: {}", self.motion_available);
        println!("   ├─ Published: {}", self.published_requests);
        println!("   ├─ Last published: {}", self.last_published);
        println!("   ├─ Engine calls: {}", self.engine_calls);
        println!("   └─ Engine step (us): {}", summary.engine_latency);

        println!("\nPhases");
        println!("   ├─ process_request calls: {}", summary.total_calls);
        println!("   ├─ Continuations: {}", summary.continuations);
        for (phase, count) in &summary.phase_counts {
            println!("   ├─ {phase}: {count}");
        }
        println!(
            "   └─ Publish rate: {:.1}% of {} finished",
            summary.publish_rate, summary.finished_requests
        );

        if !summary.degraded_counts.is_empty() {
            println!("\nIdentity fallbacks");
            for (reason, count) in &summary.degraded_counts {
                println!("   ├─ {reason}: {count}");
            }
        }
        println!();
    }
}
