//! Metadata accessor contract
//!
//! Key/value store addressed by request id. Three pools exist: per-request
//! (optionally keyed by physical camera), usecase-wide and static per camera.

use std::fmt;

use bytes::Bytes;
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use crate::{
    CameraConfigs, CameraPosition, Dimension, GridTransform, MarginRatio, PathCrops,
    PerspectiveTransform, Rect, RequestId, SensorModeInfo, StabilizationMargin, TargetGeometry,
    TransformBundle,
};

/// Tags the node reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataTag {
    // ===== per request, read =====
    /// Start of frame, QTimer nanoseconds
    SofTimestamp,
    /// Frame duration in nanoseconds
    FrameDuration,
    /// Exposure time in nanoseconds
    ExposureTime,
    /// Rolling shutter skew in nanoseconds
    RollingShutterSkew,
    /// Field-of-view compensation factor
    FovcFactor,
    /// Application stabilization mode
    StabilizationMode,
    /// Non-zero when the request carries a video buffer
    RequestHasVideoBuffer,
    /// Zoom crop left after IFE, per path
    ResidualCrop,
    /// Crop applied by IFE, per path
    AppliedCrop,
    /// Residual crop of the multi-camera controller
    ChiNodeResidualCrop,
    /// Spatial alignment warp between linked cameras
    SatPerspectiveTransform,
    /// Master camera of the current multi-camera request
    MultiCameraId,
    /// Lens focus distance
    FocusDistance,

    // ===== per request, written =====
    /// Transform computed by the engine for this request
    EisTransform,
    /// Consumer tags
    IcaInPerspective,
    IcaInGridOut2In,
    IcaReferenceParams,
    IcaInGridLookahead,

    // ===== usecase =====
    PhysicalCameraConfigs,
    SensorModeInfo,
    TargetFps,
    PreviewDimensions,
    VideoDimensions,
    StabilizedOutputDimensions,
    RealtimeOutputDimensions,
    EndOfStreamRequest,
    Eisv3Enabled,
    FrameDelay,
    RequestedMargin,
    MinimalTotalMargin,
    StabilizationMargins,
    AdditionalCropOffset,

    // ===== static =====
    ActiveArraySize,
    MountAngle,
    CameraPosition,
}

impl MetadataTag {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SofTimestamp => "sof_timestamp",
            Self::FrameDuration => "frame_duration",
            Self::ExposureTime => "exposure_time",
            Self::RollingShutterSkew => "rolling_shutter_skew",
            Self::FovcFactor => "fovc_factor",
            Self::StabilizationMode => "stabilization_mode",
            Self::RequestHasVideoBuffer => "request_has_video_buffer",
            Self::ResidualCrop => "residual_crop",
            Self::AppliedCrop => "applied_crop",
            Self::ChiNodeResidualCrop => "chinode_residual_crop",
            Self::SatPerspectiveTransform => "sat_perspective_transform",
            Self::MultiCameraId => "multi_camera_id",
            Self::FocusDistance => "focus_distance",
            Self::EisTransform => "eis_transform",
            Self::IcaInPerspective => "ica_in_perspective",
            Self::IcaInGridOut2In => "ica_in_grid_out2in",
            Self::IcaReferenceParams => "ica_reference_params",
            Self::IcaInGridLookahead => "ica_in_grid_lookahead",
            Self::PhysicalCameraConfigs => "physical_camera_configs",
            Self::SensorModeInfo => "sensor_mode_info",
            Self::TargetFps => "target_fps",
            Self::PreviewDimensions => "preview_dimensions",
            Self::VideoDimensions => "video_dimensions",
            Self::StabilizedOutputDimensions => "stabilized_output_dimensions",
            Self::RealtimeOutputDimensions => "realtime_output_dimensions",
            Self::EndOfStreamRequest => "end_of_stream_request",
            Self::Eisv3Enabled => "eisv3_enabled",
            Self::FrameDelay => "frame_delay",
            Self::RequestedMargin => "requested_margin",
            Self::MinimalTotalMargin => "minimal_total_margin",
            Self::StabilizationMargins => "stabilization_margins",
            Self::AdditionalCropOffset => "additional_crop_offset",
            Self::ActiveArraySize => "active_array_size",
            Self::MountAngle => "mount_angle",
            Self::CameraPosition => "camera_position",
        }
    }
}

impl fmt::Display for MetadataTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TargetGeometry {
    /// Tags the consumer reads, in publish order
    pub const fn publish_tags(&self) -> &'static [MetadataTag] {
        match self {
            Self::GpuGrid => &[MetadataTag::IcaInGridLookahead],
            _ => &[
                MetadataTag::IcaInPerspective,
                MetadataTag::IcaInGridOut2In,
                MetadataTag::IcaReferenceParams,
            ],
        }
    }
}

/// Application stabilization mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilizationMode {
    Off,
    On,
}

/// Typed metadata payload
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Bool(bool),
    U32(u32),
    U64(u64),
    F32(f32),
    Dimension(Dimension),
    Rect(Rect),
    Crops(PathCrops),
    Margin(StabilizationMargin),
    MarginRatio(MarginRatio),
    Matrix(Matrix3<f32>),
    Mode(StabilizationMode),
    Position(CameraPosition),
    CameraConfigs(CameraConfigs),
    SensorMode(SensorModeInfo),
    Transform(Box<TransformBundle>),
    Perspective(Box<PerspectiveTransform>),
    Grid(Box<GridTransform>),
    Raw(Bytes),
}

impl MetadataValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U64(v) => Some(*v),
            Self::U32(v) => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_dimension(&self) -> Option<Dimension> {
        match self {
            Self::Dimension(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_rect(&self) -> Option<Rect> {
        match self {
            Self::Rect(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_crops(&self) -> Option<PathCrops> {
        match self {
            Self::Crops(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<Matrix3<f32>> {
        match self {
            Self::Matrix(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_mode(&self) -> Option<StabilizationMode> {
        match self {
            Self::Mode(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_position(&self) -> Option<CameraPosition> {
        match self {
            Self::Position(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_camera_configs(&self) -> Option<&CameraConfigs> {
        match self {
            Self::CameraConfigs(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_sensor_mode(&self) -> Option<&SensorModeInfo> {
        match self {
            Self::SensorMode(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_transform(&self) -> Option<&TransformBundle> {
        match self {
            Self::Transform(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_transform(self) -> Option<TransformBundle> {
        match self {
            Self::Transform(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_perspective(&self) -> Option<&PerspectiveTransform> {
        match self {
            Self::Perspective(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_grid(&self) -> Option<&GridTransform> {
        match self {
            Self::Grid(v) => Some(v),
            _ => None,
        }
    }
}

/// Which side of the node a per-request read comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MetadataPool {
    /// Result pool of the pipeline
    #[default]
    Result,
    /// Input pool, used by offline (non real-time) nodes
    Input,
}

/// Per-request read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetadataQuery {
    pub tag: MetadataTag,
    pub request_id: RequestId,
    pub pool: MetadataPool,
    pub camera_id: Option<u32>,
}

impl MetadataQuery {
    pub fn new(tag: MetadataTag, request_id: RequestId) -> Self {
        Self {
            tag,
            request_id,
            pool: MetadataPool::Result,
            camera_id: None,
        }
    }

    /// Shift the request id, clamping at request 1
    pub fn offset(mut self, delta: i64) -> Self {
        let target = self.request_id as i64 + delta;
        self.request_id = if target <= 0 { 1 } else { target as u64 };
        self
    }

    pub fn pool(mut self, pool: MetadataPool) -> Self {
        self.pool = pool;
        self
    }

    pub fn camera(mut self, camera_id: Option<u32>) -> Self {
        self.camera_id = camera_id;
        self
    }
}

/// Metadata store contract
///
/// Implementations use interior mutability, the node shares one accessor
/// across every in-flight request.
pub trait MetadataAccessor: Send + Sync {
    fn get(&self, query: &MetadataQuery) -> Option<MetadataValue>;

    fn set(&self, tag: MetadataTag, request_id: RequestId, value: MetadataValue);

    fn get_usecase(&self, tag: MetadataTag) -> Option<MetadataValue>;

    fn set_usecase(&self, tag: MetadataTag, value: MetadataValue);

    /// Static (per physical camera) metadata, `None` camera means the logical camera
    fn get_static(&self, tag: MetadataTag, camera_id: Option<u32>) -> Option<MetadataValue>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_offset_clamps_to_first_request() {
        let q = MetadataQuery::new(MetadataTag::StabilizationMode, 5).offset(-15);
        assert_eq!(q.request_id, 1);
        let q = MetadataQuery::new(MetadataTag::StabilizationMode, 20).offset(-15);
        assert_eq!(q.request_id, 5);
    }

    #[test]
    fn test_publish_tags_by_target() {
        assert_eq!(
            TargetGeometry::GpuGrid.publish_tags(),
            &[MetadataTag::IcaInGridLookahead]
        );
        assert_eq!(TargetGeometry::Ica10.publish_tags().len(), 3);
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(MetadataValue::U32(3).as_u64(), Some(3));
        assert_eq!(MetadataValue::F32(0.5).as_u64(), None);
        assert_eq!(
            MetadataValue::Mode(StabilizationMode::Off).as_mode(),
            Some(StabilizationMode::Off)
        );
    }
}
