//! Camera and sensor-mode descriptions consumed by the sensor resolver.

use serde::{Deserialize, Serialize};

use crate::{Dimension, LdcGrids, Rect};

/// Upper bound of physical cameras linked to one node
pub const MAX_LINKED_CAMERAS: usize = 4;

/// Mounting side of a camera
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraPosition {
    #[default]
    Rear,
    Front,
    RearAux,
    FrontAux,
}

/// Sensor readout mode of the current stream configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorModeInfo {
    pub mode_index: u32,
    pub frame_dimension: Dimension,
    /// Crop of the active array the mode reads out
    pub active_array_crop_window: Rect,
    pub binning: u32,
    pub frame_rate: f32,
}

/// One linked physical camera
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub camera_id: u32,
    pub sensor_mode: SensorModeInfo,
}

/// Physical camera list published by the usecase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfigs {
    pub primary_camera_id: u32,
    pub cameras: Vec<CameraConfig>,
}

/// Opaque handle into the tuning subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TuningHandle(pub u64);

/// Resolves calibration/tuning data per camera and sensor mode
pub trait TuningProvider: Send + Sync {
    /// `None` when the sensor mode has no tuning data
    fn tuning_handle(&self, camera_id: u32, mode_index: Option<u32>) -> Option<TuningHandle>;

    /// Lens distortion grids on the ICA30 lattice, when the tuning carries them
    fn ldc_grids(&self, _handle: TuningHandle) -> Option<LdcGrids> {
        None
    }
}
