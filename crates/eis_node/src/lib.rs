//! # EIS Node
//!
//! 逐帧视频防抖节点（EISv3）。
//!
//! 负责：
//! - 创建时协商 margin 与 lookahead
//! - buffer 协商与流几何参数
//! - 逐请求的各阶段：setup、陀螺仪窗口、算法执行、lookahead 发布
//! - 录像结束时排空 lookahead 环形缓冲
//!
//! ## 使用示例
//!
//! ```ignore
//! use eis_node::mock::{Simulation, SimulationConfig};
//!
//! let mut sim = Simulation::new(SimulationConfig::default())?;
//! for request_id in 1..=60 {
//!     sim.submit(request_id, true);
//! }
//! sim.run();
//! sim.stop_recording(60);
//! sim.run();
//! ```

mod adapter;
mod buffer_info;
mod debug_log;
mod drain;
mod ffi;
mod grid;
mod gyro;
mod library;
mod lookahead;
mod margins;
mod node;
mod phases;
mod sensor_config;

pub mod mock;

pub use adapter::{update_zoom_window, EngineAdapter};
pub use buffer_info::{
    negotiate_buffers, BufferNegotiation, BufferRequirement, OutputPortRequirements,
};
pub use debug_log::{DebugLog, FrameRecord, InputSummary, OutputSummary};
pub use grid::{convert_ica20_to_ica10, identity_lattice, IdentityFactory};
pub use gyro::GyroFetcher;
pub use library::SharedLibraryEngine;
pub use lookahead::{LookaheadRing, RingState};
pub use margins::{
    additional_crop_offset, gyro_frequency, min_total_margins, negotiate, negotiate_for,
    MarginNegotiation,
};
pub use node::{EisNode, NodeCollaborators, StreamGeometry};
pub use sensor_config::{CameraSetup, SensorRecord};

// Re-export contracts types
pub use contracts::{
    EisError, EisNodeConfig, Phase, ProcessOutcome, ProcessRequest, StabilizationEngine,
    TargetGeometry, TransformBundle,
};
