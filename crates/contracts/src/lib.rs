//! # Contracts
//!
//! 冻结的接口契约，由防抖节点与宿主共享。
//! 业务 crate 只依赖本 crate，禁止反向依赖。
//!
//! ## 时间模型
//! - request id 是主时钟，在一次会话内单调递增
//! - 传感器时间戳基于 QTimer，算法侧使用微秒

mod engine;
mod error;
mod geometry;
mod metadata;
mod motion;
mod node_config;
mod request;
mod scheduler;
mod sensor;
mod transform;

pub use engine::*;
pub use error::*;
pub use geometry::*;
pub use metadata::*;
pub use motion::*;
pub use node_config::*;
pub use request::*;
pub use scheduler::DependencyScheduler;
pub use sensor::*;
pub use transform::*;
