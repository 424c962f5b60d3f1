//! C ABI of the `eis3_*` shared object.
//!
//! Every entry point returns `0` on success. `eis3_process` returns
//! `EIS3_NOT_PROCESSED` while the engine is still filling its lookahead.
//! Output arrays are owned by the caller, capacities travel with the pointers.

use std::ffi::c_void;

pub const EIS3_SUCCESS: i32 = 0;
pub const EIS3_NOT_PROCESSED: i32 = 1;

pub const EIS3_MAX_MATRICES: usize = 9;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDimension {
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawRect {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawWindowRegion {
    pub full_width: u32,
    pub full_height: u32,
    pub window: RawRect,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawWindowRegionF {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

/// Normalized engine input and output windows
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawWindowRegions {
    pub input: RawWindowRegionF,
    pub output: RawWindowRegionF,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawCommonParams {
    pub operation_mode: u32,
    /// 0 ICA v2.0, 1 ICA v3.0, 2 GPU
    pub deployment: u32,
    pub output_size: RawDimension,
    pub frame_rate: f32,
    pub buffer_delay: u32,
    pub sat_enabled: u32,
    pub gyro_frequency_hz: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawSensorParams {
    pub camera_id: u32,
    pub ife_input: RawDimension,
    pub sensor_crop: RawWindowRegion,
    pub engine_input: RawDimension,
    pub mount_angle: u32,
    /// 0 rear, 1 front, 2 rear aux, 3 front aux
    pub position: u32,
    /// 0 when no tuning data is available
    pub tuning_handle: u64,
    /// Null when LDC is off, else `ldc_points` interleaved x/y pairs
    pub ldc_in2out: *const f32,
    pub ldc_out2in: *const f32,
    pub ldc_points: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawInitParams {
    pub common: RawCommonParams,
    pub num_sensors: u32,
    pub sensors: *const RawSensorParams,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawGyroSample {
    pub data: [f32; 4],
    pub ts_us: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawInput {
    pub frame_id: u64,
    pub sensor_index: u32,
    pub num_gyro_samples: u32,
    pub gyro: *const RawGyroSample,
    pub focus_distance: f32,
    pub input_window: RawWindowRegionF,
    pub output_window: RawWindowRegionF,
    pub has_sat: u32,
    /// Row-major 3x3
    pub sat: [f32; 9],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawPerspective {
    pub enable: u32,
    pub bypass_alignment_adjustment: u32,
    pub confidence: u32,
    pub num_rows: u32,
    pub num_columns: u32,
    pub defined_on: RawDimension,
    /// Row-major 3x3 per row
    pub matrices: [[f32; 9]; EIS3_MAX_MATRICES],
}

impl Default for RawPerspective {
    fn default() -> Self {
        Self {
            enable: 0,
            bypass_alignment_adjustment: 0,
            confidence: 0,
            num_rows: 0,
            num_columns: 0,
            defined_on: RawDimension::default(),
            matrices: [[0.0; 9]; EIS3_MAX_MATRICES],
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawGrid {
    pub enable: u32,
    pub defined_on: RawDimension,
    pub num_columns: u32,
    pub num_rows: u32,
    /// 0 none, 1 four corners, 2 extra point along perimeter
    pub extrapolation: u32,
    pub corners: [f32; 8],
    /// Caller-owned buffer of `capacity` x/y pairs
    pub points: *mut f32,
    pub capacity: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawOutput {
    pub has_output: u32,
    pub perspective: RawPerspective,
    pub grid: RawGrid,
    pub alignment: RawPerspective,
    /// 0 inactive, 1 active, 2 centering
    pub ois_mode: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawMarginQuery {
    pub input: RawDimension,
    pub min_total_margin_x: f32,
    pub min_total_margin_y: f32,
    pub output: RawDimension,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawMargin {
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCropRatio {
    pub x: f32,
    pub y: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawFrameTimes {
    pub sof_us: u64,
    pub frame_duration_us: u64,
    pub exposure_us: u64,
    pub rolling_shutter_skew_us: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawInterval {
    pub start_us: u64,
    pub end_us: u64,
}

pub type Eis3Initialize = unsafe extern "C" fn(*mut *mut c_void, *const RawInitParams) -> i32;
pub type Eis3Process = unsafe extern "C" fn(*mut c_void, *const RawInput, *mut RawOutput) -> i32;
pub type Eis3Deinitialize = unsafe extern "C" fn(*mut *mut c_void) -> i32;
pub type Eis3GetTotalMargin = unsafe extern "C" fn(*mut c_void, u32, *mut RawMargin) -> i32;
pub type Eis3GetTotalMarginEx = unsafe extern "C" fn(*const RawMarginQuery, *mut RawMargin) -> i32;
pub type Eis3GetCropRatioEx =
    unsafe extern "C" fn(*const RawMarginQuery, *mut RawCropRatio) -> i32;
pub type Eis3GetGyroInterval =
    unsafe extern "C" fn(*mut c_void, *const RawFrameTimes, u32, *mut RawInterval) -> i32;
/// IFE crop, IPE zoom, crop ratio x/y, engine input width/height
pub type EisConvertToWindowRegions = unsafe extern "C" fn(
    *const RawWindowRegion,
    *const RawWindowRegion,
    f64,
    f64,
    u32,
    u32,
    *mut RawWindowRegions,
) -> i32;

pub const SYM_INITIALIZE: &[u8] = b"eis3_initialize\0";
pub const SYM_PROCESS: &[u8] = b"eis3_process\0";
pub const SYM_DEINITIALIZE: &[u8] = b"eis3_deinitialize\0";
pub const SYM_GET_TOTAL_MARGIN: &[u8] = b"eis3_get_total_margin\0";
pub const SYM_GET_TOTAL_MARGIN_EX: &[u8] = b"eis3_get_total_margin_ex\0";
pub const SYM_GET_CROP_RATIO_EX: &[u8] = b"eis3_get_stabilization_crop_ratio_ex\0";
pub const SYM_GET_GYRO_INTERVAL: &[u8] = b"eis3_get_gyro_time_interval\0";
pub const SYM_CONVERT_TO_WINDOW_REGIONS: &[u8] = b"eis_utility_convert_to_window_regions\0";

/// Every symbol the loader binds, a library missing any of them is rejected
pub static REQUIRED_SYMBOLS: [&[u8]; 8] = [
    SYM_INITIALIZE,
    SYM_PROCESS,
    SYM_DEINITIALIZE,
    SYM_GET_TOTAL_MARGIN,
    SYM_GET_TOTAL_MARGIN_EX,
    SYM_GET_CROP_RATIO_EX,
    SYM_GET_GYRO_INTERVAL,
    SYM_CONVERT_TO_WINDOW_REGIONS,
];
