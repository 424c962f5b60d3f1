//! Gyro window computation and sample fetching.

use std::sync::Arc;

use contracts::{
    EisError, FenceHandle, FrameTimes, GyroInterval, MetadataAccessor, MetadataPool,
    MetadataQuery, MetadataTag, MotionDataService, MotionSample, RequestId, StabilizationEngine,
    GYRO_SAMPLES_BUF_SIZE,
};
use tracing::instrument;

/// Gyro service of the node
pub struct GyroFetcher {
    motion: Arc<dyn MotionDataService>,
    pool: MetadataPool,
    log_samples: bool,
}

impl std::fmt::Debug for GyroFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GyroFetcher")
            .field("pool", &self.pool)
            .field("log_samples", &self.log_samples)
            .finish()
    }
}

impl GyroFetcher {
    pub fn new(motion: Arc<dyn MotionDataService>, pool: MetadataPool, log_samples: bool) -> Self {
        Self {
            motion,
            pool,
            log_samples,
        }
    }

    /// Frame timing of a request, microseconds
    ///
    /// The start-of-frame timestamp is required, the other tags default to zero.
    pub fn read_frame_times(
        &self,
        metadata: &dyn MetadataAccessor,
        request_id: RequestId,
        camera_id: Option<u32>,
    ) -> Result<FrameTimes, EisError> {
        let read_ns = |tag: MetadataTag| {
            let query = MetadataQuery::new(tag, request_id)
                .pool(self.pool)
                .camera(camera_id);
            metadata.get(&query).and_then(|v| v.as_u64())
        };

        let sof_ns = read_ns(MetadataTag::SofTimestamp).ok_or_else(|| {
            EisError::missing_metadata(MetadataTag::SofTimestamp.name(), request_id)
        })?;

        Ok(FrameTimes {
            sof_us: sof_ns / 1000,
            frame_duration_us: read_ns(MetadataTag::FrameDuration).unwrap_or(0) / 1000,
            exposure_us: read_ns(MetadataTag::ExposureTime).unwrap_or(0) / 1000,
            rolling_shutter_skew_us: read_ns(MetadataTag::RollingShutterSkew).unwrap_or(0)
                / 1000,
        })
    }

    /// Gyro window of a frame, rejected when empty or reversed
    #[instrument(level = "trace", name = "gyro_compute_interval", skip(self, engine, metadata))]
    pub fn compute_interval(
        &self,
        engine: &dyn StabilizationEngine,
        metadata: &dyn MetadataAccessor,
        request_id: RequestId,
        sensor_index: usize,
        camera_id: Option<u32>,
    ) -> Result<GyroInterval, EisError> {
        let times = self.read_frame_times(metadata, request_id, camera_id)?;
        let interval = engine.gyro_time_interval(&times, sensor_index)?;
        interval.validate()
    }

    /// Ask the motion service for a window, the fence gates phase 2
    pub fn request_samples(&self, interval: GyroInterval) -> Result<FenceHandle, EisError> {
        self.motion.request_window(interval.to_window())
    }

    /// Samples of a window, converted for the engine and capped
    pub fn fill_samples(&self, interval: GyroInterval) -> Result<Vec<MotionSample>, EisError> {
        let raw = self.motion.fetch_samples(interval.to_window())?;
        if raw.len() > GYRO_SAMPLES_BUF_SIZE {
            tracing::warn!(
                available = raw.len(),
                cap = GYRO_SAMPLES_BUF_SIZE,
                "Gyro samples truncated"
            );
        }

        let samples: Vec<MotionSample> = raw
            .into_iter()
            .take(GYRO_SAMPLES_BUF_SIZE)
            .map(MotionSample::from)
            .collect();

        if self.log_samples {
            for sample in &samples {
                tracing::debug!(
                    target: "eisv3::gyro",
                    ts_us = sample.ts_us,
                    x = sample.data[0],
                    y = sample.data[1],
                    z = sample.data[2],
                    "gyro sample"
                );
            }
        }
        observability::record_gyro_samples(samples.len());
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FenceTable, InMemoryMetadata, MockMotionService, StubEngine};
    use contracts::MetadataValue;

    fn fetcher(motion: Arc<MockMotionService>) -> GyroFetcher {
        GyroFetcher::new(motion, MetadataPool::Result, false)
    }

    fn frame(metadata: &InMemoryMetadata, request_id: RequestId, duration_ns: u64) {
        metadata.set(
            MetadataTag::SofTimestamp,
            request_id,
            MetadataValue::U64(1_000_000_000 + request_id * 33_333_333),
        );
        metadata.set(
            MetadataTag::FrameDuration,
            request_id,
            MetadataValue::U64(duration_ns),
        );
        metadata.set(
            MetadataTag::ExposureTime,
            request_id,
            MetadataValue::U64(10_000_000),
        );
    }

    #[test]
    fn test_missing_sof_is_reported() {
        let motion = Arc::new(MockMotionService::new(Arc::new(FenceTable::new())));
        let metadata = InMemoryMetadata::new();
        let err = fetcher(motion).read_frame_times(&metadata, 4, None);
        assert!(matches!(err, Err(EisError::MissingMetadata { request_id: 4, .. })));
    }

    #[test]
    fn test_interval_and_samples() {
        let motion = Arc::new(MockMotionService::new(Arc::new(FenceTable::new())));
        let metadata = InMemoryMetadata::new();
        frame(&metadata, 1, 33_333_333);
        let engine = StubEngine::default();
        let gyro = fetcher(motion);

        let interval = gyro
            .compute_interval(&engine, &metadata, 1, 0, None)
            .unwrap();
        assert!(interval.start_us < interval.end_us);

        let samples = gyro.fill_samples(interval).unwrap();
        // ~33ms at 416 Hz
        assert!((12..=15).contains(&samples.len()), "{}", samples.len());
        assert!(samples.windows(2).all(|w| w[0].ts_us <= w[1].ts_us));
        assert!(samples
            .iter()
            .all(|s| s.ts_us + 1 >= interval.start_us && s.ts_us <= interval.end_us));
    }

    #[test]
    fn test_zero_duration_frame_is_invalid_interval() {
        let motion = Arc::new(MockMotionService::new(Arc::new(FenceTable::new())));
        let metadata = InMemoryMetadata::new();
        frame(&metadata, 2, 0);

        let err = fetcher(motion).compute_interval(&StubEngine::default(), &metadata, 2, 0, None);
        assert!(matches!(err, Err(EisError::InvalidInterval { .. })));
    }

    #[test]
    fn test_samples_are_capped() {
        let motion = Arc::new(MockMotionService::new(Arc::new(FenceTable::new())));
        let gyro = fetcher(motion);
        // four seconds of samples
        let interval = GyroInterval {
            start_us: 1_000_000,
            end_us: 5_000_000,
        };
        assert_eq!(gyro.fill_samples(interval).unwrap().len(), GYRO_SAMPLES_BUF_SIZE);
    }
}
