//! In-memory collaborators for hosts without a camera framework.
//!
//! The CLI and the test suites drive the node through these: a metadata
//! store, a fence table, a synthetic gyro, a deterministic engine and a
//! dependency scheduler that re-invokes phases as their dependencies land.

mod engine;
mod fence;
mod harness;
mod metadata;
mod motion;
mod scheduler;

pub use engine::{stub_transform, CallLog, StaticTuning, StubEngine, StubEngineConfig};
pub use fence::FenceTable;
pub use harness::{Simulation, SimulationConfig};
pub use metadata::InMemoryMetadata;
pub use motion::MockMotionService;
pub use scheduler::SimulatedScheduler;
