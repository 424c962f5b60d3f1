use std::sync::Arc;

use contracts::{
    Dimension, EisError, EisNodeConfig, InputBuffer, MetadataAccessor, MetadataQuery,
    MetadataTag, MetadataValue, PathCrops, ProcessOutcome, Rect, RequestId, SensorModeInfo,
    StabilizationEngine, StabilizationMode, TransformBundle,
};

use super::{
    CallLog, FenceTable, InMemoryMetadata, MockMotionService, SimulatedScheduler, StaticTuning,
    StubEngine, StubEngineConfig,
};
use crate::{EisNode, NodeCollaborators};

/// Nanoseconds between two start-of-frame timestamps at 30 fps
const FRAME_PERIOD_NS: u64 = 33_333_333;
const FIRST_SOF_NS: u64 = 1_000_000_000;
const EXPOSURE_NS: u64 = 10_000_000;

/// Session shape of a [`Simulation`]
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub node: EisNodeConfig,
    pub sensor: Dimension,
    /// Buffer format handed to the node
    pub input: Dimension,
    pub output: Dimension,
    pub fps: u32,
    pub motion_available: bool,
    /// Gyro fences stay pending until the next `run` round
    pub deferred_gyro: bool,
    pub engine: StubEngineConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            node: EisNodeConfig::default(),
            sensor: Dimension::new(4000, 3000),
            input: Dimension::new(2304, 1296),
            output: Dimension::new(1920, 1080),
            fps: 30,
            motion_available: true,
            deferred_gyro: false,
            engine: StubEngineConfig::default(),
        }
    }
}

/// A node wired to in-memory collaborators and brought up to stream-on
#[derive(Debug)]
pub struct Simulation {
    pub metadata: Arc<InMemoryMetadata>,
    pub fences: Arc<FenceTable>,
    pub motion: Arc<MockMotionService>,
    pub scheduler: Arc<SimulatedScheduler>,
    pub node: EisNode,
    input: Dimension,
    calls: CallLog,
    outcomes: Vec<ProcessOutcome>,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Result<Self, EisError> {
        let metadata = Arc::new(InMemoryMetadata::new());
        let fences = Arc::new(FenceTable::new());
        seed_usecase(&metadata, &config);

        let motion = if config.motion_available {
            MockMotionService::new(fences.clone())
        } else {
            MockMotionService::unavailable(fences.clone())
        };
        let motion = Arc::new(if config.deferred_gyro {
            motion.deferred()
        } else {
            motion
        });
        let scheduler = Arc::new(SimulatedScheduler::new(metadata.clone(), fences.clone()));
        let engine = StubEngine::new(config.engine.clone());
        let calls = engine.call_log();

        let node = EisNode::create(
            config.node.clone(),
            NodeCollaborators {
                metadata: metadata.clone(),
                motion: motion.clone(),
                scheduler: scheduler.clone(),
                tuning: Arc::new(StaticTuning::default()),
                engine: Some(Box::new(engine) as Box<dyn StabilizationEngine>),
            },
        )?;
        node.set_buffer_info(config.input)?;
        node.post_pipeline_create();
        node.stream_on();

        Ok(Self {
            metadata,
            fences,
            motion,
            scheduler,
            node,
            input: config.input,
            calls,
            outcomes: Vec::new(),
        })
    }

    /// Write the per-frame tags of a request and dispatch it
    pub fn submit(&mut self, request_id: RequestId, enabled: bool) {
        let set = |tag, value| self.metadata.set(tag, request_id, value);
        set(
            MetadataTag::SofTimestamp,
            MetadataValue::U64(FIRST_SOF_NS + request_id * FRAME_PERIOD_NS),
        );
        set(MetadataTag::FrameDuration, MetadataValue::U64(FRAME_PERIOD_NS));
        set(MetadataTag::ExposureTime, MetadataValue::U64(EXPOSURE_NS));
        set(
            MetadataTag::StabilizationMode,
            MetadataValue::Mode(if enabled {
                StabilizationMode::On
            } else {
                StabilizationMode::Off
            }),
        );
        set(
            MetadataTag::RequestHasVideoBuffer,
            MetadataValue::U32(u32::from(enabled)),
        );
        set(
            MetadataTag::ResidualCrop,
            MetadataValue::Crops(PathCrops::uniform(Rect::full(self.input))),
        );
        set(
            MetadataTag::AppliedCrop,
            MetadataValue::Crops(PathCrops::uniform(Rect::full(self.input))),
        );
        set(MetadataTag::FocusDistance, MetadataValue::F32(1.5));
        set(MetadataTag::FovcFactor, MetadataValue::F32(0.0));

        self.scheduler.dispatch(
            request_id,
            vec![InputBuffer {
                port_index: 0,
                format: self.input,
                fence: None,
            }],
        );
    }

    /// Run until no request can make progress, returns the phases run
    pub fn run(&mut self) -> usize {
        let mut total = 0;
        loop {
            let delivered = self.motion.deliver_pending();
            let outcomes = self.scheduler.run_until_idle(&self.node);
            if delivered == 0 && outcomes.is_empty() {
                break;
            }
            total += outcomes.len();
            self.outcomes.extend(outcomes);
        }
        total
    }

    /// Publish the end-of-stream watermark and flush what is still parked
    pub fn stop_recording(&mut self, end_of_stream: RequestId) -> usize {
        self.metadata
            .set_usecase(MetadataTag::EndOfStreamRequest, MetadataValue::U64(end_of_stream));
        self.scheduler.flush_pending(end_of_stream)
    }

    /// Bundle published for a request, read back from the consumer tags
    pub fn published(&self, request_id: RequestId) -> Option<TransformBundle> {
        let get = |tag| self.metadata.get(&MetadataQuery::new(tag, request_id));
        if self.node.config().target.is_gpu() {
            let grid = get(MetadataTag::IcaInGridLookahead)?.as_grid()?.clone();
            return Some(TransformBundle {
                grid,
                ..TransformBundle::disabled()
            });
        }
        Some(TransformBundle {
            perspective: get(MetadataTag::IcaInPerspective)?.as_perspective()?.clone(),
            grid: get(MetadataTag::IcaInGridOut2In)?.as_grid()?.clone(),
            alignment: get(MetadataTag::IcaReferenceParams)?.as_perspective()?.clone(),
        })
    }

    /// Frame ids handed to the engine, in call order
    pub fn engine_calls(&self) -> Vec<u64> {
        self.calls.frames()
    }

    pub fn outcomes(&self) -> &[ProcessOutcome] {
        &self.outcomes
    }
}

fn seed_usecase(metadata: &InMemoryMetadata, config: &SimulationConfig) {
    metadata.set_usecase(
        MetadataTag::SensorModeInfo,
        MetadataValue::SensorMode(SensorModeInfo {
            mode_index: 0,
            frame_dimension: config.sensor,
            active_array_crop_window: Rect::full(config.sensor),
            binning: 1,
            frame_rate: config.fps as f32,
        }),
    );
    metadata.set_usecase(MetadataTag::TargetFps, MetadataValue::U32(config.fps));
    metadata.set_usecase(
        MetadataTag::VideoDimensions,
        MetadataValue::Dimension(config.output),
    );
    metadata.set_usecase(
        MetadataTag::StabilizedOutputDimensions,
        MetadataValue::Dimension(config.output),
    );
}
