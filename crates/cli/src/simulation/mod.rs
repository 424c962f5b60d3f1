//! Simulated recording driven through the node.

mod driver;
mod stats;

pub use driver::{RecordingPlan, SimulationDriver};
pub use stats::SimulationStats;
