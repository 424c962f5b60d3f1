//! Node lifecycle: creation, buffer negotiation, pipeline bring-up, teardown.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use contracts::{
    CropRatio, DependencyScheduler, Dimension, EisError, EisNodeConfig, EngineCommonParams,
    EngineSensorParams, MarginQuery, MarginRatio, MetadataAccessor, MetadataPool, MetadataTag,
    MetadataValue, MotionDataService, MotionSourceConfig, RequestId, StabilizationEngine,
    StabilizationMargin, TuningProvider, DEFAULT_FOVC_FACTOR, MOTION_REPORT_RATE_US,
};
use serde::Serialize;
use tracing::instrument;

use crate::adapter::EngineAdapter;
use crate::buffer_info::{negotiate_buffers, BufferNegotiation, OutputPortRequirements};
use crate::debug_log::DebugLog;
use crate::grid::IdentityFactory;
use crate::gyro::GyroFetcher;
use crate::library::SharedLibraryEngine;
use crate::lookahead::{lock, LookaheadRing};
use crate::margins::{self, MarginNegotiation};
use crate::sensor_config::CameraSetup;

/// Realtime output sizes at or above this width never replace the stabilized output
const REALTIME_OUTPUT_MAX_WIDTH: u32 = 3840;

/// Services the node talks to
pub struct NodeCollaborators {
    pub metadata: Arc<dyn MetadataAccessor>,
    pub motion: Arc<dyn MotionDataService>,
    pub scheduler: Arc<dyn DependencyScheduler>,
    pub tuning: Arc<dyn TuningProvider>,
    /// Engine to drive, `None` loads `library_path` from the config
    pub engine: Option<Box<dyn StabilizationEngine>>,
}

/// Stream geometry negotiated by `set_buffer_info`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamGeometry {
    pub input: Dimension,
    pub output: Dimension,
    /// Total margin reported by the engine
    pub margins: StabilizationMargin,
    /// Margin left after the additional crop offset, used for the zoom window
    pub actual_margins: StabilizationMargin,
    pub additional_offset: StabilizationMargin,
}

#[derive(Debug)]
pub(crate) struct RecordingState {
    pub active: bool,
    pub log: DebugLog,
}

/// EISv3 stabilization node
pub struct EisNode {
    pub(crate) config: EisNodeConfig,
    pub(crate) metadata: Arc<dyn MetadataAccessor>,
    pub(crate) motion: Arc<dyn MotionDataService>,
    pub(crate) scheduler: Arc<dyn DependencyScheduler>,
    pub(crate) tuning: Arc<dyn TuningProvider>,
    /// Metadata pool of per-request reads
    pub(crate) pool: MetadataPool,
    pub(crate) negotiation: MarginNegotiation,
    pub(crate) min_total_margins: MarginRatio,
    pub(crate) identity: IdentityFactory,
    /// Written on (re)configuration only
    pub(crate) cameras: RwLock<CameraSetup>,
    pub(crate) stream: RwLock<StreamGeometry>,
    pub(crate) adapter: Mutex<EngineAdapter>,
    pub(crate) gyro: GyroFetcher,
    /// Allocated by `post_pipeline_create`
    pub(crate) ring: OnceLock<LookaheadRing>,
    pub(crate) motion_available: AtomicBool,
    /// Last field-of-view compensation factor, `f32` bits
    pub(crate) fovc_factor: AtomicU32,
    pub(crate) recording: Mutex<RecordingState>,
}

impl std::fmt::Debug for EisNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EisNode")
            .field("target", &self.config.target)
            .field("negotiation", &self.negotiation)
            .field("stream", &self.stream())
            .field("motion_available", &self.motion_available())
            .field("ring_allocated", &self.ring.get().is_some())
            .finish()
    }
}

impl EisNode {
    /// Build the node and publish the negotiated usecase tags
    ///
    /// Fails on an unloadable library or an unsupported camera topology.
    #[instrument(level = "info", name = "eis_node_create", skip_all, fields(target = ?config.target))]
    pub fn create(config: EisNodeConfig, collaborators: NodeCollaborators) -> Result<Self, EisError> {
        let NodeCollaborators {
            metadata,
            motion,
            scheduler,
            tuning,
            engine,
        } = collaborators;

        let engine = match (engine, &config.library_path) {
            (Some(engine), _) => Some(engine),
            (None, Some(path)) => {
                Some(Box::new(SharedLibraryEngine::load(path)?) as Box<dyn StabilizationEngine>)
            }
            (None, None) => {
                tracing::warn!("No stabilization engine bound, every frame gets the identity transform");
                None
            }
        };

        let cameras = CameraSetup::resolve(
            metadata.as_ref(),
            tuning.as_ref(),
            config.overrides.ldc_grid_enabled,
        )?;
        let negotiation = margins::negotiate(&config, metadata.as_ref());
        let min_total_margins = margins::min_total_margins(config.calibration.as_ref());

        metadata.set_usecase(MetadataTag::Eisv3Enabled, MetadataValue::Bool(true));
        metadata.set_usecase(
            MetadataTag::FrameDelay,
            MetadataValue::U32(negotiation.lookahead),
        );
        metadata.set_usecase(
            MetadataTag::RequestedMargin,
            MetadataValue::MarginRatio(negotiation.requested),
        );
        metadata.set_usecase(
            MetadataTag::MinimalTotalMargin,
            MetadataValue::MarginRatio(min_total_margins),
        );

        let primary = cameras.primary();
        let stream = StreamGeometry {
            input: primary.input_size,
            output: primary.output_size,
            ..Default::default()
        };
        let pool = if config.realtime {
            MetadataPool::Result
        } else {
            MetadataPool::Input
        };
        let dump = config.overrides.dump;

        tracing::info!(
            cameras = cameras.len(),
            lookahead = negotiation.lookahead,
            queue_depth = negotiation.queue_depth,
            realtime = config.realtime,
            "EIS node created"
        );

        Ok(Self {
            adapter: Mutex::new(EngineAdapter::new(
                engine,
                config.target,
                config.overrides.ois_mode,
                negotiation.lookahead as u64,
            )),
            gyro: GyroFetcher::new(motion.clone(), pool, dump.input_log),
            identity: IdentityFactory::new(config.target),
            recording: Mutex::new(RecordingState {
                active: false,
                log: DebugLog::new(config.debug_log_dir.clone(), dump),
            }),
            cameras: RwLock::new(cameras),
            stream: RwLock::new(stream),
            ring: OnceLock::new(),
            motion_available: AtomicBool::new(false),
            fovc_factor: AtomicU32::new(DEFAULT_FOVC_FACTOR.to_bits()),
            negotiation,
            min_total_margins,
            pool,
            config,
            metadata,
            motion,
            scheduler,
            tuning,
        })
    }

    pub fn config(&self) -> &EisNodeConfig {
        &self.config
    }

    pub fn negotiation(&self) -> MarginNegotiation {
        self.negotiation
    }

    pub fn lookahead(&self) -> u64 {
        self.negotiation.lookahead as u64
    }

    pub fn stream(&self) -> StreamGeometry {
        *read(&self.stream)
    }

    pub fn cameras(&self) -> CameraSetup {
        read(&self.cameras).clone()
    }

    pub fn motion_available(&self) -> bool {
        self.motion_available.load(Ordering::Acquire)
    }

    pub fn engine_ready(&self) -> bool {
        lock(&self.adapter).is_ready()
    }

    pub fn ring(&self) -> Option<&LookaheadRing> {
        self.ring.get()
    }

    pub fn identity(&self) -> &IdentityFactory {
        &self.identity
    }

    /// Tags this node writes for the warp consumer
    pub fn query_metadata_publish_list(&self) -> &'static [MetadataTag] {
        self.config.target.publish_tags()
    }

    pub fn query_buffer_info(&self, ports: &[OutputPortRequirements]) -> BufferNegotiation {
        negotiate_buffers(self.config.bypassable, ports)
    }

    /// Renegotiate the stream for a new input buffer format
    ///
    /// Publishes `StabilizationMargins` and `AdditionalCropOffset`.
    #[instrument(level = "debug", name = "eis_set_buffer_info", skip(self), fields(width = format.width, height = format.height))]
    pub fn set_buffer_info(&self, format: Dimension) -> Result<StreamGeometry, EisError> {
        let mut cameras = write(&self.cameras);
        cameras.reconfigure(
            self.metadata.as_ref(),
            self.tuning.as_ref(),
            self.config.overrides.ldc_grid_enabled,
            format,
        )?;

        let output = self.stabilized_output(format);
        let adapter = lock(&self.adapter);
        let query = MarginQuery {
            input: format,
            min_total_margins: self.min_total_margins,
            output,
        };
        let margins = adapter.total_margin_ex(&query).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Margin query failed, using the physical margin");
            StabilizationMargin::new(
                format.width.saturating_sub(output.width),
                format.height.saturating_sub(output.height),
            )
        });

        for record in cameras.records_mut() {
            record.output_size = output;
            let query = MarginQuery {
                input: record.input_size,
                ..query
            };
            record.crop_ratio = adapter.crop_ratio_ex(&query).unwrap_or_else(|e| {
                tracing::warn!(camera_id = record.camera_id, error = %e, "Crop ratio query failed");
                CropRatio {
                    x: output.width as f32 / record.input_size.width.max(1) as f32,
                    y: output.height as f32 / record.input_size.height.max(1) as f32,
                }
            });
        }
        drop(adapter);
        drop(cameras);

        let additional_offset = margins::additional_crop_offset(format, output, margins);
        let actual_margins = if margins.width > additional_offset.width
            && margins.height > additional_offset.height
        {
            StabilizationMargin::new(
                margins.width - additional_offset.width,
                margins.height - additional_offset.height,
            )
        } else {
            margins
        };

        self.metadata.set_usecase(
            MetadataTag::StabilizationMargins,
            MetadataValue::Margin(actual_margins),
        );
        self.metadata.set_usecase(
            MetadataTag::AdditionalCropOffset,
            MetadataValue::Margin(additional_offset),
        );

        let geometry = StreamGeometry {
            input: format,
            output,
            margins,
            actual_margins,
            additional_offset,
        };
        *write(&self.stream) = geometry;
        tracing::info!(
            output_width = output.width,
            output_height = output.height,
            margin_width = actual_margins.width,
            margin_height = actual_margins.height,
            "Buffer info set"
        );
        Ok(geometry)
    }

    /// Output size for an input format
    fn stabilized_output(&self, format: Dimension) -> Dimension {
        let usecase = |tag| {
            self.metadata
                .get_usecase(tag)
                .and_then(|v| v.as_dimension())
                .filter(|d| !d.is_empty())
        };
        let mut output = usecase(MetadataTag::StabilizedOutputDimensions)
            .or_else(|| usecase(MetadataTag::VideoDimensions))
            .unwrap_or(format);

        if let Some(realtime) = usecase(MetadataTag::RealtimeOutputDimensions) {
            if realtime.width < REALTIME_OUTPUT_MAX_WIDTH && realtime.area() > output.area() {
                output = realtime;
            }
        }
        Dimension::new(
            output.width.min(format.width),
            output.height.min(format.height),
        )
    }

    /// Bind the gyro source, allocate the lookahead ring and start the engine
    #[instrument(level = "info", name = "eis_post_pipeline_create", skip(self))]
    pub fn post_pipeline_create(&self) {
        let source = MotionSourceConfig {
            sampling_rate_hz: margins::gyro_frequency(self.config.calibration.as_ref()),
            report_rate_us: MOTION_REPORT_RATE_US,
        };
        match self.motion.register_source(&source) {
            Ok(()) => self.motion_available.store(true, Ordering::Release),
            Err(e) => {
                tracing::warn!(error = %e, "Motion data unavailable, stabilization degraded");
            }
        }

        self.ring.get_or_init(|| {
            LookaheadRing::new(self.negotiation.lookahead, self.negotiation.queue_depth)
        });
        self.initialize_engine();
        self.check_margins();
    }

    fn initialize_engine(&self) {
        let cameras = read(&self.cameras);
        let primary = cameras.primary();
        let frame_rate = if primary.frame_rate() > 0.0 {
            primary.frame_rate()
        } else {
            self.metadata
                .get_usecase(MetadataTag::TargetFps)
                .and_then(|v| v.as_u32())
                .unwrap_or(30) as f32
        };

        let common = EngineCommonParams {
            operation_mode: self.config.overrides.operation_mode,
            deployment: self.config.target.deployment(),
            output_size: primary.output_size,
            frame_rate,
            buffer_delay: self.negotiation.lookahead + 1,
            sat_enabled: cameras.is_multi_camera(),
            gyro_frequency_hz: margins::gyro_frequency(self.config.calibration.as_ref()),
        };
        let sensors: Vec<EngineSensorParams> = cameras
            .records()
            .iter()
            .map(|record| EngineSensorParams {
                camera_id: record.camera_id,
                ife_input: record.sensor_mode.frame_dimension,
                sensor_crop: record.applied_crop(),
                engine_input: record.input_size,
                mount_angle: record.mount_angle,
                position: record.position,
                tuning: record.tuning,
                ldc: record
                    .ldc
                    .clone()
                    .filter(|_| self.config.overrides.ldc_grid_enabled),
            })
            .collect();
        drop(cameras);

        match lock(&self.adapter).initialize(&common, &sensors) {
            Ok(()) => {
                let prefix =
                    DebugLog::prefix_for(chrono::Local::now().naive_local(), common.output_size);
                lock(&self.recording).log.set_prefix(prefix);
            }
            Err(e) => {
                tracing::error!(error = %e, "Stabilization engine init failed, publishing identity transforms");
            }
        }
    }

    /// Compare the engine margin with the negotiated one, mismatches are logged only
    fn check_margins(&self) {
        let primary_index = read(&self.cameras).primary_index();
        let adapter = lock(&self.adapter);
        if !adapter.is_ready() {
            return;
        }
        let negotiated = self.stream().margins;
        match adapter.total_margin(primary_index) {
            Ok(reported) if reported != negotiated => {
                tracing::error!(
                    reported_width = reported.width,
                    reported_height = reported.height,
                    negotiated_width = negotiated.width,
                    negotiated_height = negotiated.height,
                    "Engine margin differs from the negotiated margin, keeping the negotiated one"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Engine margin query failed"),
        }
    }

    pub fn stream_on(&self) {
        tracing::info!(target = ?self.config.target, "Stream on");
    }

    pub fn stream_off(&self) {
        let mut recording = lock(&self.recording);
        recording.active = false;
        if let Err(e) = recording.log.close() {
            tracing::warn!(error = %e, "Failed to close debug log");
        }
        tracing::info!("Stream off");
    }

    /// Last end-of-stream watermark published by the usecase
    pub fn end_of_stream(&self) -> Option<RequestId> {
        self.metadata
            .get_usecase(MetadataTag::EndOfStreamRequest)
            .and_then(|v| v.as_u64())
    }

    pub(crate) fn fovc_factor(&self) -> f32 {
        f32::from_bits(self.fovc_factor.load(Ordering::Relaxed))
    }

    pub(crate) fn set_fovc_factor(&self, factor: f32) {
        self.fovc_factor.store(factor.to_bits(), Ordering::Relaxed);
    }
}

impl Drop for EisNode {
    fn drop(&mut self) {
        lock(&self.adapter).deinitialize();
    }
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{
        FenceTable, InMemoryMetadata, MockMotionService, SimulatedScheduler, StaticTuning,
        StubEngine, StubEngineConfig,
    };
    use contracts::{
        CameraConfig, CameraConfigs, Rect, SensorModeInfo, TargetGeometry, DEFAULT_FRAME_DELAY,
    };

    struct Fixture {
        metadata: Arc<InMemoryMetadata>,
        fences: Arc<FenceTable>,
    }

    impl Fixture {
        fn new() -> Self {
            let metadata = Arc::new(InMemoryMetadata::new());
            metadata.set_usecase(
                MetadataTag::SensorModeInfo,
                MetadataValue::SensorMode(SensorModeInfo {
                    mode_index: 1,
                    frame_dimension: Dimension::new(4000, 3000),
                    active_array_crop_window: Rect::new(0, 0, 4000, 3000),
                    binning: 1,
                    frame_rate: 30.0,
                }),
            );
            metadata.set_usecase(
                MetadataTag::VideoDimensions,
                MetadataValue::Dimension(Dimension::new(1920, 1080)),
            );
            Self {
                metadata,
                fences: Arc::new(FenceTable::new()),
            }
        }

        fn collaborators(&self, engine: Option<StubEngine>, motion: bool) -> NodeCollaborators {
            let motion = if motion {
                MockMotionService::new(self.fences.clone())
            } else {
                MockMotionService::unavailable(self.fences.clone())
            };
            NodeCollaborators {
                metadata: self.metadata.clone(),
                motion: Arc::new(motion),
                scheduler: Arc::new(SimulatedScheduler::new(
                    self.metadata.clone(),
                    self.fences.clone(),
                )),
                tuning: Arc::new(StaticTuning::default()),
                engine: engine.map(|e| Box::new(e) as Box<dyn StabilizationEngine>),
            }
        }
    }

    #[test]
    fn test_create_publishes_usecase_tags() {
        let fixture = Fixture::new();
        let node = EisNode::create(
            EisNodeConfig::default(),
            fixture.collaborators(Some(StubEngine::default()), true),
        )
        .unwrap();

        let usecase = |tag| fixture.metadata.get_usecase(tag);
        assert_eq!(
            usecase(MetadataTag::Eisv3Enabled).and_then(|v| v.as_bool()),
            Some(true)
        );
        assert_eq!(
            usecase(MetadataTag::FrameDelay).and_then(|v| v.as_u32()),
            Some(DEFAULT_FRAME_DELAY)
        );
        assert!(usecase(MetadataTag::RequestedMargin).is_some());
        assert!(usecase(MetadataTag::MinimalTotalMargin).is_some());
        assert_eq!(node.negotiation().queue_depth, 23);
        assert_eq!(node.query_metadata_publish_list().len(), 3);
    }

    #[test]
    fn test_missing_library_is_fatal() {
        let fixture = Fixture::new();
        let config = EisNodeConfig {
            library_path: Some("/nonexistent/libeis3.so".into()),
            ..Default::default()
        };
        let err = EisNode::create(config, fixture.collaborators(None, true)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_too_many_cameras_is_fatal() {
        let fixture = Fixture::new();
        let cameras = (0..5)
            .map(|camera_id| CameraConfig {
                camera_id,
                sensor_mode: SensorModeInfo::default(),
            })
            .collect();
        fixture.metadata.set_usecase(
            MetadataTag::PhysicalCameraConfigs,
            MetadataValue::CameraConfigs(CameraConfigs {
                primary_camera_id: 0,
                cameras,
            }),
        );
        let err = EisNode::create(
            EisNodeConfig::default(),
            fixture.collaborators(Some(StubEngine::default()), true),
        )
        .unwrap_err();
        assert!(matches!(err, EisError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_set_buffer_info_is_idempotent() {
        let fixture = Fixture::new();
        let node = EisNode::create(
            EisNodeConfig::default(),
            fixture.collaborators(Some(StubEngine::default()), true),
        )
        .unwrap();

        let format = Dimension::new(2304, 1296);
        let first = node.set_buffer_info(format).unwrap();
        let second = node.set_buffer_info(format).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.output, Dimension::new(1920, 1080));
        assert_eq!(first.margins, StabilizationMargin::new(384, 216));
        assert_eq!(first.additional_offset, StabilizationMargin::default());
        assert_eq!(
            fixture
                .metadata
                .get_usecase(MetadataTag::StabilizationMargins)
                .and_then(|v| match v {
                    MetadataValue::Margin(m) => Some(m),
                    _ => None,
                }),
            Some(StabilizationMargin::new(384, 216))
        );
        let ratio = node.cameras().primary().crop_ratio;
        assert!((ratio.x - 1920.0 / 2304.0).abs() < 1e-6);
    }

    #[test]
    fn test_realtime_output_rule() {
        let fixture = Fixture::new();
        fixture.metadata.set_usecase(
            MetadataTag::RealtimeOutputDimensions,
            MetadataValue::Dimension(Dimension::new(2560, 1440)),
        );
        let node = EisNode::create(
            EisNodeConfig::default(),
            fixture.collaborators(Some(StubEngine::default()), true),
        )
        .unwrap();
        // larger and narrower than 4K, capped to the input
        let geometry = node.set_buffer_info(Dimension::new(2304, 1296)).unwrap();
        assert_eq!(geometry.output, Dimension::new(2304, 1296));

        fixture.metadata.set_usecase(
            MetadataTag::RealtimeOutputDimensions,
            MetadataValue::Dimension(Dimension::new(3840, 2160)),
        );
        let geometry = node.set_buffer_info(Dimension::new(4608, 2592)).unwrap();
        assert_eq!(geometry.output, Dimension::new(1920, 1080));
    }

    #[test]
    fn test_post_pipeline_create_degrades_without_motion_or_engine() {
        let fixture = Fixture::new();
        let node = EisNode::create(
            EisNodeConfig::default(),
            fixture.collaborators(
                Some(StubEngine::new(StubEngineConfig {
                    fail_init: true,
                    ..Default::default()
                })),
                false,
            ),
        )
        .unwrap();
        node.set_buffer_info(Dimension::new(2304, 1296)).unwrap();
        node.post_pipeline_create();

        assert!(!node.motion_available());
        assert!(!node.engine_ready());
        assert_eq!(node.ring().map(|r| r.lookahead()), Some(15));
    }

    #[test]
    fn test_gpu_publish_list() {
        let fixture = Fixture::new();
        let config = EisNodeConfig {
            target: TargetGeometry::GpuGrid,
            ..Default::default()
        };
        let node = EisNode::create(config, fixture.collaborators(None, true)).unwrap();
        assert_eq!(
            node.query_metadata_publish_list(),
            &[MetadataTag::IcaInGridLookahead]
        );
    }
}
