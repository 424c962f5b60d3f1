//! Node configuration contracts.
//!
//! Built once when the node is created and passed by reference afterwards.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{OisMode, OperationMode, PathType, TargetGeometry};

/// Lookahead used when no calibration is available
pub const DEFAULT_FRAME_DELAY: u32 = 15;
/// Hard ceiling on lookahead frames
pub const MAX_FRAME_DELAY: u32 = 30;
/// Extra ring slots on top of the lookahead
pub const REQUEST_QUEUE_RESERVE: u32 = 8;
/// Margin fraction used when no calibration is available
pub const DEFAULT_MARGIN: f32 = 0.2;
/// Field-of-view compensation factor until metadata provides one
pub const DEFAULT_FOVC_FACTOR: f32 = 0.06;

/// Node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EisNodeConfig {
    /// Warp consumer fed by this node
    pub target: TargetGeometry,
    /// Node sits on the real-time (sensor-driven) path
    pub realtime: bool,
    /// Node may pass buffers through untouched
    pub bypassable: bool,
    /// Path type of the input port, selects crop metadata
    pub input_path: PathType,
    /// Apply field-of-view compensation to the zoom window
    pub fovc_enabled: bool,
    pub can_preempt_on_stop_recording: bool,
    pub can_set_input_buffer_dependency: bool,
    /// Settings-file overrides, take precedence over calibration
    pub overrides: OverrideSettings,
    /// Calibration table, absent means built-in defaults
    pub calibration: Option<EisCalibration>,
    /// Shared object exporting the `eis3_*` entry points
    pub library_path: Option<PathBuf>,
    /// Directory for per-recording debug logs
    pub debug_log_dir: Option<PathBuf>,
}

impl Default for EisNodeConfig {
    fn default() -> Self {
        Self {
            target: TargetGeometry::default(),
            realtime: true,
            bypassable: false,
            input_path: PathType::Full,
            fovc_enabled: false,
            can_preempt_on_stop_recording: false,
            can_set_input_buffer_dependency: false,
            overrides: OverrideSettings::default(),
            calibration: None,
            library_path: None,
            debug_log_dir: None,
        }
    }
}

/// Override hooks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct OverrideSettings {
    /// Width margin fraction, `-1` keeps the negotiated value
    #[validate(range(exclusive_max = 1.0))]
    pub width_margin: f32,
    /// Height margin fraction, `-1` keeps the negotiated value
    #[validate(range(exclusive_max = 1.0))]
    pub height_margin: f32,
    /// Lookahead frames, `0` keeps the negotiated value
    #[validate(range(max = 30))]
    pub frame_delay: u32,
    pub ldc_grid_enabled: bool,
    /// Publish the identity transform for every frame
    pub default_grid_transform: bool,
    pub operation_mode: OperationMode,
    /// Replace the OIS mode reported by the engine
    pub ois_mode: Option<OisMode>,
    pub dump: DumpSettings,
}

impl Default for OverrideSettings {
    fn default() -> Self {
        Self {
            width_margin: -1.0,
            height_margin: -1.0,
            frame_delay: 0,
            ldc_grid_enabled: true,
            default_grid_transform: false,
            operation_mode: OperationMode::Regular,
            ois_mode: None,
            dump: DumpSettings::default(),
        }
    }
}

impl OverrideSettings {
    pub fn width_margin(&self) -> Option<f32> {
        (self.width_margin != -1.0).then_some(self.width_margin)
    }

    pub fn height_margin(&self) -> Option<f32> {
        (self.height_margin != -1.0).then_some(self.height_margin)
    }

    pub fn frame_delay(&self) -> Option<u32> {
        (self.frame_delay != 0).then_some(self.frame_delay)
    }
}

/// Debug dump switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpSettings {
    /// Gyro input to the debug log file
    pub input_file: bool,
    /// Gyro input to the tracing log
    pub input_log: bool,
    /// Engine output to the debug log file
    pub output_file: bool,
    /// Engine output to the tracing log
    pub output_log: bool,
    /// Flush the debug log after every record
    pub force_flush: bool,
}

impl DumpSettings {
    pub fn any(&self) -> bool {
        self.input_file || self.input_log || self.output_file || self.output_log
    }

    pub fn any_file(&self) -> bool {
        self.input_file || self.output_file
    }
}

/// Calibration data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EisCalibration {
    /// Lower bound of the total margin fraction
    pub minimal_total_margin: f32,
    /// Calibrated gyro rate, `0` means unknown
    #[serde(default)]
    pub gyro_frequency: u32,
    pub fhd: FpsTierTable,
    pub uhd4k: FpsTierTable,
    pub uhd8k: FpsTierTable,
}

impl EisCalibration {
    /// Tier for an output height and frame rate
    pub fn tier(&self, output_height: u32, fps: u32) -> &MarginTier {
        let table = if output_height <= 1080 {
            &self.fhd
        } else if output_height <= 2160 {
            &self.uhd4k
        } else {
            &self.uhd8k
        };
        table.for_fps(fps)
    }

    pub fn tiers(&self) -> impl Iterator<Item = (&'static str, &MarginTier)> {
        [
            ("fhd.fps30", &self.fhd.fps30),
            ("fhd.fps60", &self.fhd.fps60),
            ("fhd.fps_high", &self.fhd.fps_high),
            ("uhd4k.fps30", &self.uhd4k.fps30),
            ("uhd4k.fps60", &self.uhd4k.fps60),
            ("uhd4k.fps_high", &self.uhd4k.fps_high),
            ("uhd8k.fps30", &self.uhd8k.fps30),
            ("uhd8k.fps60", &self.uhd8k.fps60),
            ("uhd8k.fps_high", &self.uhd8k.fps_high),
        ]
        .into_iter()
    }
}

/// Margin tiers of one resolution class, by frame rate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FpsTierTable {
    pub fps30: MarginTier,
    pub fps60: MarginTier,
    pub fps_high: MarginTier,
}

impl FpsTierTable {
    pub fn for_fps(&self, fps: u32) -> &MarginTier {
        if fps <= 30 {
            &self.fps30
        } else if fps <= 60 {
            &self.fps60
        } else {
            &self.fps_high
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct MarginTier {
    #[validate(range(min = 0.0, exclusive_max = 1.0))]
    pub margin_y: f32,
    #[validate(range(max = 30))]
    pub frame_delay: u32,
}
