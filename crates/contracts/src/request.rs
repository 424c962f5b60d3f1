//! Request/phase model shared between the node and its scheduler.

use serde::{Deserialize, Serialize};

use crate::{Dimension, MetadataTag};

/// Frame request identifier, monotonically increasing per session
pub type RequestId = u64;

/// Opaque fence handle issued by a fence owner (buffer manager, motion service)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FenceHandle(pub usize);

/// Progress marker of a request inside the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Recording stopped, publish whatever the lookahead ring holds
    Flush,
    /// Declare input and per-frame metadata dependencies
    Setup,
    /// Request gyro samples and crop dependencies
    GyroDependency,
    /// Run the stabilization engine for this frame
    Execute,
    /// Publish the transform computed `lookahead` frames ahead
    Publish,
}

impl Phase {
    /// Wire sequence number used by sequence-driven schedulers
    pub const fn sequence_id(&self) -> i32 {
        match self {
            Self::Flush => -1,
            Self::Setup => 0,
            Self::GyroDependency => 1,
            Self::Execute => 2,
            Self::Publish => 3,
        }
    }

    pub const fn from_sequence_id(id: i32) -> Option<Self> {
        match id {
            -1 => Some(Self::Flush),
            0 => Some(Self::Setup),
            1 => Some(Self::GyroDependency),
            2 => Some(Self::Execute),
            3 => Some(Self::Publish),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Flush => "flush",
            Self::Setup => "setup",
            Self::GyroDependency => "gyro_dependency",
            Self::Execute => "execute",
            Self::Publish => "publish",
        }
    }
}

/// One input buffer of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputBuffer {
    pub port_index: u32,
    pub format: Dimension,
    pub fence: Option<FenceHandle>,
}

/// A single phase invocation handed to the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub request_id: RequestId,
    pub phase: Phase,
    pub inputs: Vec<InputBuffer>,
}

impl ProcessRequest {
    pub fn new(request_id: RequestId, phase: Phase, inputs: Vec<InputBuffer>) -> Self {
        Self {
            request_id,
            phase,
            inputs,
        }
    }

    pub fn first_input_format(&self) -> Option<Dimension> {
        self.inputs.first().map(|input| input.format)
    }
}

/// Metadata dependency relative to the requesting frame
///
/// `negate == false` points `offset` frames into the past, `negate == true`
/// points into the future.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagDependency {
    pub tag: MetadataTag,
    pub offset: u64,
    pub negate: bool,
    /// Physical camera the tag is read from, multi-camera sessions only
    pub camera_id: Option<u32>,
}

impl TagDependency {
    /// Tag on the same request
    pub const fn current(tag: MetadataTag) -> Self {
        Self {
            tag,
            offset: 0,
            negate: false,
            camera_id: None,
        }
    }

    /// Tag published `offset` requests later
    pub const fn future(tag: MetadataTag, offset: u64) -> Self {
        Self {
            tag,
            offset,
            negate: true,
            camera_id: None,
        }
    }

    pub fn for_camera(mut self, camera_id: u32) -> Self {
        self.camera_id = Some(camera_id);
        self
    }

    /// Request id whose metadata satisfies this dependency, `None` before the first request
    pub fn target(&self, request_id: RequestId) -> Option<RequestId> {
        if self.negate {
            request_id.checked_add(self.offset)
        } else {
            request_id.checked_sub(self.offset)
        }
    }
}

/// Everything a phase must wait on before the next phase may run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySet {
    pub tags: Vec<TagDependency>,
    pub fences: Vec<FenceHandle>,
    /// Resume only when the node wakes this request explicitly after
    /// the given request finished its engine step
    pub continuation: Option<RequestId>,
}

impl DependencySet {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.fences.is_empty() && self.continuation.is_none()
    }
}

/// Why a frame ended up with the identity transform or skipped the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeReason {
    /// Stabilization disabled for the frame or its dependent frame
    Disabled,
    /// Motion service never registered
    MotionUnavailable,
    /// Engine handle missing after a failed init
    EngineUnavailable,
    /// Engine returned a failing status
    AlgorithmFailure,
    /// Gyro window could not be computed
    InvalidInterval,
    /// Default-grid override is active
    DefaultGridOverride,
    /// Transform to publish was never written
    MissingTransform,
}

impl DegradeReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::MotionUnavailable => "motion_unavailable",
            Self::EngineUnavailable => "engine_unavailable",
            Self::AlgorithmFailure => "algorithm_failure",
            Self::InvalidInterval => "invalid_interval",
            Self::DefaultGridOverride => "default_grid_override",
            Self::MissingTransform => "missing_transform",
        }
    }
}

/// Result of one phase invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub request_id: RequestId,
    /// Phase that ran last in this call
    pub phase: Option<Phase>,
    /// Phase to run once `dependencies` resolve, `None` when the request is finished
    pub next_phase: Option<Phase>,
    pub dependencies: DependencySet,
    /// Engine step of this request must wait for the previous request's
    pub sequential_execution: bool,
    /// This request's engine step is done, successors may run theirs
    pub satisfy_sequential_execution: bool,
    /// Forward inputs unchanged to outputs
    pub bypass: bool,
    /// Metadata for this request is already complete
    pub early_metadata_done: bool,
    /// Consumer tags were written for this request
    pub published: bool,
    /// Degraded path taken, kept apart from the phase itself
    pub degraded: Option<DegradeReason>,
    /// Wall time of the engine step run in this call, in microseconds
    pub engine_latency_us: Option<u64>,
}

impl ProcessOutcome {
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            ..Default::default()
        }
    }

    pub fn is_finished(&self) -> bool {
        self.next_phase.is_none()
    }

    /// Record a degradation, the first reason wins
    pub fn degrade(&mut self, reason: DegradeReason) {
        if self.degraded.is_none() {
            self.degraded = Some(reason);
        }
    }
}
