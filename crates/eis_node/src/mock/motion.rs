use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use contracts::{
    EisError, FenceHandle, GyroSample, MotionDataService, MotionSourceConfig, SampleWindow,
    GYRO_SAMPLING_RATE_HZ, QTIMER_FREQUENCY_HZ,
};
use ringbuf::{traits::*, HeapRb};

use super::FenceTable;

const HISTORY_CAPACITY: usize = 4096;

struct MotionState {
    source: Option<MotionSourceConfig>,
    /// Fences of windows not yet delivered
    pending: Vec<FenceHandle>,
    /// Last samples handed out
    history: HeapRb<GyroSample>,
}

/// Synthetic gyro on a fixed sampling lattice
///
/// Sample `k` sits at `k / rate` seconds on the QTimer clock, so any window
/// yields the same samples no matter how often it is fetched.
pub struct MockMotionService {
    fences: Arc<FenceTable>,
    available: bool,
    deferred: bool,
    state: Mutex<MotionState>,
}

impl std::fmt::Debug for MockMotionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MockMotionService")
            .field("available", &self.available)
            .field("deferred", &self.deferred)
            .field("source", &state.source)
            .field("pending", &state.pending.len())
            .field("history", &state.history.occupied_len())
            .finish()
    }
}

impl MockMotionService {
    /// Service that signals each window fence as soon as it is requested
    pub fn new(fences: Arc<FenceTable>) -> Self {
        Self {
            fences,
            available: true,
            deferred: false,
            state: Mutex::new(MotionState {
                source: None,
                pending: Vec::new(),
                history: HeapRb::new(HISTORY_CAPACITY),
            }),
        }
    }

    /// Service without a gyro, every call fails
    pub fn unavailable(fences: Arc<FenceTable>) -> Self {
        Self {
            available: false,
            ..Self::new(fences)
        }
    }

    /// Hold window fences until [`deliver_pending`](Self::deliver_pending)
    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn registered_source(&self) -> Option<MotionSourceConfig> {
        self.lock().source
    }

    /// Signal every outstanding window fence, returns how many were signaled
    pub fn deliver_pending(&self) -> usize {
        let pending = std::mem::take(&mut self.lock().pending);
        for fence in &pending {
            self.fences.signal(*fence);
        }
        pending.len()
    }

    /// Most recent samples handed out, oldest first
    pub fn history(&self) -> Vec<GyroSample> {
        self.lock().history.iter().copied().collect()
    }

    fn sampling_rate(&self) -> u32 {
        self.lock()
            .source
            .map(|s| s.sampling_rate_hz)
            .filter(|hz| *hz > 0)
            .unwrap_or(GYRO_SAMPLING_RATE_HZ)
    }

    fn check_available(&self) -> Result<(), EisError> {
        if self.available {
            Ok(())
        } else {
            Err(EisError::motion_unavailable("no gyro source"))
        }
    }

    fn lock(&self) -> MutexGuard<'_, MotionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MotionDataService for MockMotionService {
    fn register_source(&self, config: &MotionSourceConfig) -> Result<(), EisError> {
        self.check_available()?;
        self.lock().source = Some(*config);
        tracing::debug!(
            sampling_rate_hz = config.sampling_rate_hz,
            report_rate_us = config.report_rate_us,
            "Gyro source registered"
        );
        Ok(())
    }

    fn request_window(&self, _window: SampleWindow) -> Result<FenceHandle, EisError> {
        self.check_available()?;
        let fence = self.fences.create();
        if self.deferred {
            self.lock().pending.push(fence);
        } else {
            self.fences.signal(fence);
        }
        Ok(fence)
    }

    fn fetch_samples(&self, window: SampleWindow) -> Result<Vec<GyroSample>, EisError> {
        self.check_available()?;
        let samples = synthesize(window, self.sampling_rate());

        let mut state = self.lock();
        for sample in &samples {
            if state.history.is_full() {
                let _ = state.history.try_pop();
            }
            let _ = state.history.try_push(*sample);
        }
        Ok(samples)
    }
}

/// Lattice samples inside `window`, with a slow deterministic wobble
fn synthesize(window: SampleWindow, rate_hz: u32) -> Vec<GyroSample> {
    if window.end_ticks < window.start_ticks {
        return Vec::new();
    }
    let period = QTIMER_FREQUENCY_HZ as f64 / rate_hz as f64;
    let first = (window.start_ticks as f64 / period).ceil() as u64;
    let last = (window.end_ticks as f64 / period).floor() as u64;

    (first..=last)
        .map(|k| {
            let t = k as f64 / rate_hz as f64;
            GyroSample {
                x: (0.02 * (t * 3.0).sin()) as f32,
                y: (0.015 * (t * 5.0).cos()) as f32,
                z: (0.01 * (t * 7.0).sin()) as f32,
                timestamp: (k as f64 * period).ceil() as u64,
            }
        })
        .filter(|s| s.timestamp >= window.start_ticks && s.timestamp <= window.end_ticks)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{GyroInterval, MOTION_REPORT_RATE_US};

    fn window(start_us: u64, end_us: u64) -> SampleWindow {
        GyroInterval { start_us, end_us }.to_window()
    }

    #[test]
    fn test_samples_follow_the_sampling_rate() {
        let motion = MockMotionService::new(Arc::new(FenceTable::new()));
        let samples = motion.fetch_samples(window(1_000_000, 2_000_000)).unwrap();
        assert!((415..=417).contains(&samples.len()), "{}", samples.len());
        assert!(samples.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

        // same window, same samples
        let again = motion.fetch_samples(window(1_000_000, 2_000_000)).unwrap();
        assert_eq!(samples, again);
        assert_eq!(motion.history().len(), samples.len() * 2);
    }

    #[test]
    fn test_debug_reports_history_length() {
        let motion = MockMotionService::new(Arc::new(FenceTable::new()));
        let samples = motion.fetch_samples(window(0, 100_000)).unwrap();
        let rendered = format!("{motion:?}");
        assert!(rendered.starts_with("MockMotionService"), "{rendered}");
        assert!(
            rendered.contains(&format!("history: {}", samples.len())),
            "{rendered}"
        );
    }

    #[test]
    fn test_registered_rate_is_used() {
        let motion = MockMotionService::new(Arc::new(FenceTable::new()));
        motion
            .register_source(&MotionSourceConfig {
                sampling_rate_hz: 200,
                report_rate_us: MOTION_REPORT_RATE_US,
            })
            .unwrap();
        let samples = motion.fetch_samples(window(0, 1_000_000)).unwrap();
        assert!((200..=201).contains(&samples.len()));
    }

    #[test]
    fn test_deferred_delivery() {
        let fences = Arc::new(FenceTable::new());
        let motion = MockMotionService::new(fences.clone()).deferred();
        let fence = motion.request_window(window(0, 10)).unwrap();
        assert!(!fences.is_signaled(fence));
        assert_eq!(motion.deliver_pending(), 1);
        assert!(fences.is_signaled(fence));
    }

    #[test]
    fn test_unavailable_service_fails() {
        let motion = MockMotionService::unavailable(Arc::new(FenceTable::new()));
        assert!(!motion.is_available());
        assert!(matches!(
            motion.register_source(&MotionSourceConfig {
                sampling_rate_hz: 416,
                report_rate_us: MOTION_REPORT_RATE_US,
            }),
            Err(EisError::MotionUnavailable { .. })
        ));
        assert!(motion.request_window(window(0, 10)).is_err());
    }
}
