//! Stabilization engine capability interface.
//!
//! Production binds a shared object exporting the `eis3_*` entry points,
//! tests bind a deterministic stub. Both sit behind [`StabilizationEngine`].

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use crate::{
    CameraPosition, CropRatio, DeploymentType, Dimension, EisError, FrameTimes, GridPoint,
    GyroInterval, MarginRatio, MotionSample, Rect, StabilizationMargin, TransformBundle,
    TuningHandle, WindowRegion, WindowRegions,
};

/// Algorithm operation mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    #[default]
    Regular,
    Calibration,
    UndistortionOnly,
}

/// Optical image stabilization mode reported alongside a transform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OisMode {
    #[default]
    Inactive,
    Active,
    Centering,
}

/// Status of one `process` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    Success,
    /// Not enough lookahead buffered yet
    NotProcessed,
    Failed(i32),
}

/// Session-wide init parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineCommonParams {
    pub operation_mode: OperationMode,
    pub deployment: DeploymentType,
    pub output_size: Dimension,
    pub frame_rate: f32,
    /// Lookahead plus one
    pub buffer_delay: u32,
    pub sat_enabled: bool,
    pub gyro_frequency_hz: u32,
}

/// Lens distortion grids of one sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LdcGrids {
    pub input_to_undistorted: Vec<GridPoint>,
    pub undistorted_to_input: Vec<GridPoint>,
}

/// Per-sensor init parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSensorParams {
    pub camera_id: u32,
    pub ife_input: Dimension,
    pub sensor_crop: WindowRegion,
    pub engine_input: Dimension,
    pub mount_angle: u32,
    pub position: CameraPosition,
    pub tuning: Option<TuningHandle>,
    pub ldc: Option<LdcGrids>,
}

/// Per-frame engine input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineInput {
    pub frame_id: u64,
    pub sensor_index: usize,
    pub gyro: Vec<MotionSample>,
    pub focus_distance: f32,
    pub window_regions: WindowRegions,
    pub sat_transform: Option<Matrix3<f32>>,
}

impl EngineInput {
    /// Input used when draining, only the frame id is meaningful
    pub fn frame_only(frame_id: u64) -> Self {
        Self {
            frame_id,
            sensor_index: 0,
            gyro: Vec::new(),
            focus_distance: 0.0,
            window_regions: WindowRegions::default(),
            sat_transform: None,
        }
    }
}

/// Per-frame engine output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOutput {
    pub status: ProcessStatus,
    /// False when the engine wrote nothing usable
    pub has_output: bool,
    pub transform: TransformBundle,
    pub ois_mode: OisMode,
}

impl EngineOutput {
    pub fn none(status: ProcessStatus) -> Self {
        Self {
            status,
            has_output: false,
            transform: TransformBundle::disabled(),
            ois_mode: OisMode::Inactive,
        }
    }
}

/// Margin query for a stream configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarginQuery {
    pub input: Dimension,
    pub min_total_margins: MarginRatio,
    pub output: Dimension,
}

/// Capability interface over the stabilization algorithm
pub trait StabilizationEngine: Send {
    /// Backend name for logs
    fn name(&self) -> &str;

    fn initialize(
        &mut self,
        common: &EngineCommonParams,
        sensors: &[EngineSensorParams],
    ) -> Result<(), EisError>;

    fn is_initialized(&self) -> bool;

    fn process(&mut self, input: &EngineInput) -> EngineOutput;

    fn deinitialize(&mut self);

    /// Margin of the initialized stream, pixels
    fn total_margin(&self, sensor_index: usize) -> Result<StabilizationMargin, EisError>;

    /// Margin for an arbitrary stream configuration, pixels
    fn total_margin_ex(&self, query: &MarginQuery) -> Result<StabilizationMargin, EisError>;

    fn stabilization_crop_ratio_ex(&self, query: &MarginQuery) -> Result<CropRatio, EisError>;

    /// Gyro window needed for a frame
    fn gyro_time_interval(
        &self,
        times: &FrameTimes,
        sensor_index: usize,
    ) -> Result<GyroInterval, EisError>;

    fn convert_to_window_regions(
        &self,
        ife_crop: &WindowRegion,
        ipe_zoom: &WindowRegion,
        crop_ratio: CropRatio,
        input: Dimension,
    ) -> Result<WindowRegions, EisError>;
}

/// Window region helper shared by engine backends: normalize `window` into `full`
pub fn normalize_window(full_width: u32, full_height: u32, window: Rect) -> crate::WindowRegionF {
    let w = full_width.max(1) as f32;
    let h = full_height.max(1) as f32;
    crate::WindowRegionF {
        left: window.left as f32 / w,
        top: window.top as f32 / h,
        width: window.width as f32 / w,
        height: window.height as f32 / h,
    }
}
