//! Motion data service contract and gyro sample types.

use serde::{Deserialize, Serialize};

use crate::{EisError, FenceHandle};

/// Nominal gyro sampling rate in Hz, also the ceiling for calibrated rates
pub const GYRO_SAMPLING_RATE_HZ: u32 = 416;
/// Motion report interval requested from the service, microseconds
pub const MOTION_REPORT_RATE_US: u32 = 10_000;
/// Upper bound of samples handed to the engine per frame
pub const GYRO_SAMPLES_BUF_SIZE: usize = 512;
/// QTimer tick frequency
pub const QTIMER_FREQUENCY_HZ: u64 = 19_200_000;

const NANOS_PER_SECOND: u128 = 1_000_000_000;

/// Convert QTimer ticks to nanoseconds
#[inline]
pub fn qtimer_ticks_to_ns(ticks: u64) -> u64 {
    (ticks as u128 * NANOS_PER_SECOND / QTIMER_FREQUENCY_HZ as u128) as u64
}

/// Convert nanoseconds to QTimer ticks
#[inline]
pub fn ns_to_qtimer_ticks(ns: u64) -> u64 {
    (ns as u128 * QTIMER_FREQUENCY_HZ as u128 / NANOS_PER_SECOND) as u64
}

/// Raw angular rate sample as delivered by the motion service
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GyroSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// QTimer ticks
    pub timestamp: u64,
}

/// Engine-facing sample, timestamp in microseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub data: [f32; 4],
    pub ts_us: u64,
}

impl From<GyroSample> for MotionSample {
    fn from(sample: GyroSample) -> Self {
        Self {
            data: [sample.x, sample.y, sample.z, 0.0],
            ts_us: qtimer_ticks_to_ns(sample.timestamp) / 1000,
        }
    }
}

/// Frame timing read from metadata, microseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameTimes {
    pub sof_us: u64,
    pub frame_duration_us: u64,
    pub exposure_us: u64,
    pub rolling_shutter_skew_us: u64,
}

/// Gyro time window of one frame, microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GyroInterval {
    pub start_us: u64,
    pub end_us: u64,
}

impl GyroInterval {
    /// Reject empty or reversed windows, never swap them
    pub fn validate(self) -> Result<Self, EisError> {
        if self.start_us >= self.end_us {
            return Err(EisError::InvalidInterval {
                start_us: self.start_us,
                end_us: self.end_us,
            });
        }
        Ok(self)
    }

    /// Same window in QTimer ticks
    pub fn to_window(&self) -> SampleWindow {
        SampleWindow {
            start_ticks: ns_to_qtimer_ticks(self.start_us.saturating_mul(1000)),
            end_ticks: ns_to_qtimer_ticks(self.end_us.saturating_mul(1000)),
        }
    }
}

/// Window requested from the motion service, QTimer ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleWindow {
    pub start_ticks: u64,
    pub end_ticks: u64,
}

/// Registration parameters for the gyro source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionSourceConfig {
    pub sampling_rate_hz: u32,
    pub report_rate_us: u32,
}

/// External motion data service
///
/// May be unavailable. The node degrades to identity transforms then.
pub trait MotionDataService: Send + Sync {
    /// Bind the gyro source, an error leaves the node in degraded mode
    fn register_source(&self, config: &MotionSourceConfig) -> Result<(), EisError>;

    /// Ask for samples covering `window`, the fence signals on delivery
    fn request_window(&self, window: SampleWindow) -> Result<FenceHandle, EisError>;

    /// Samples inside `window`, oldest first
    fn fetch_samples(&self, window: SampleWindow) -> Result<Vec<GyroSample>, EisError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qtimer_conversions() {
        assert_eq!(ns_to_qtimer_ticks(1_000_000_000), QTIMER_FREQUENCY_HZ);
        assert_eq!(qtimer_ticks_to_ns(19_200), 1_000_000);
    }

    #[test]
    fn test_interval_validation_rejects_empty_and_reversed() {
        let ok = GyroInterval {
            start_us: 10,
            end_us: 20,
        };
        assert!(ok.validate().is_ok());

        let empty = GyroInterval {
            start_us: 10,
            end_us: 10,
        };
        assert!(matches!(
            empty.validate(),
            Err(EisError::InvalidInterval { .. })
        ));

        let reversed = GyroInterval {
            start_us: 30,
            end_us: 20,
        };
        match reversed.validate() {
            Err(EisError::InvalidInterval { start_us, end_us }) => {
                assert_eq!((start_us, end_us), (30, 20));
            }
            other => panic!("expected InvalidInterval, got {other:?}"),
        }
    }

    #[test]
    fn test_motion_sample_from_gyro() {
        let sample = MotionSample::from(GyroSample {
            x: 0.1,
            y: 0.2,
            z: 0.3,
            timestamp: 19_200_000,
        });
        assert_eq!(sample.data, [0.1, 0.2, 0.3, 0.0]);
        assert_eq!(sample.ts_us, 1_000_000);
    }
}
