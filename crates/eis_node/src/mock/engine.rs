use std::sync::{Arc, Mutex, PoisonError};

use contracts::{
    normalize_window, CropRatio, DeploymentType, Dimension, EisError, EngineCommonParams, EngineInput,
    EngineOutput, EngineSensorParams, FrameTimes, GridPoint, GridTransform, GyroInterval,
    LdcGrids, MarginQuery, OisMode, PerspectiveTransform, ProcessStatus, StabilizationEngine,
    StabilizationMargin, TargetGeometry, TransformBundle, TuningHandle, TuningProvider,
    WindowRegion, WindowRegionF, WindowRegions,
};
use nalgebra::Matrix3;

use crate::grid::identity_lattice;

/// Status code of injected failures
const STUB_FAILURE: i32 = -2;

/// Knobs of the stub engine
#[derive(Debug, Clone, Default)]
pub struct StubEngineConfig {
    /// Frames below this id return `NotProcessed`
    pub not_processed_below: u64,
    /// Frames that return a failing status
    pub fail_frames: Vec<u64>,
    /// `initialize` fails
    pub fail_init: bool,
}

/// Frame ids handed to `process`, in call order
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<u64>>>);

impl CallLog {
    pub fn frames(&self) -> Vec<u64> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn push(&self, frame_id: u64) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame_id);
    }
}

#[derive(Debug, Clone)]
struct Session {
    common: EngineCommonParams,
    sensors: Vec<EngineSensorParams>,
}

/// Deterministic engine, every transform is derived from the frame id
#[derive(Debug, Default)]
pub struct StubEngine {
    config: StubEngineConfig,
    session: Option<Session>,
    calls: CallLog,
}

impl StubEngine {
    pub fn new(config: StubEngineConfig) -> Self {
        Self {
            config,
            session: None,
            calls: CallLog::default(),
        }
    }

    /// Shared handle on the call log, stays valid once the engine is boxed
    pub fn call_log(&self) -> CallLog {
        self.calls.clone()
    }

    fn session(&self) -> Result<&Session, EisError> {
        self.session
            .as_ref()
            .ok_or_else(|| EisError::algorithm_init("stub engine not initialized"))
    }
}

/// Transform the stub computes for a frame
pub fn stub_transform(frame_id: u64, deployment: DeploymentType, input: Dimension) -> TransformBundle {
    let target = match deployment {
        DeploymentType::IcaV20 => TargetGeometry::Ica20,
        DeploymentType::IcaV30 => TargetGeometry::Ica30,
        DeploymentType::GpuPre => TargetGeometry::GpuGrid,
    };
    let shift = (frame_id % 1000) as f32;

    let mut perspective = PerspectiveTransform::identity(input);
    perspective.bypass_alignment_adjustment = false;
    perspective.confidence = 100;
    perspective.matrices = vec![Matrix3::new(
        1.0,
        0.0,
        shift,
        0.0,
        1.0,
        shift / 2.0,
        0.0,
        0.0,
        1.0,
    )];

    let mut alignment = PerspectiveTransform::identity(input);
    alignment.matrices = vec![Matrix3::new(
        1.0, 0.0, -shift, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0,
    )];

    let grid = GridTransform {
        enable: true,
        defined_on: target.grid_domain(),
        geometry: target.engine_grid(),
        extrapolation: target.identity_extrapolation(),
        corners: None,
        points: identity_lattice(target)
            .into_iter()
            .map(|p| GridPoint::new(p.x + shift, p.y - shift))
            .collect(),
    };

    TransformBundle {
        perspective,
        grid,
        alignment,
    }
}

/// Normalized input window of the IFE crop and output window of the IPE zoom,
/// the latter scaled by the stabilization crop ratio
fn window_regions(
    ife_crop: &WindowRegion,
    ipe_zoom: &WindowRegion,
    crop_ratio: CropRatio,
) -> WindowRegions {
    let input = normalize_window(ife_crop.full_width, ife_crop.full_height, ife_crop.window);
    let zoom = normalize_window(ipe_zoom.full_width, ipe_zoom.full_height, ipe_zoom.window);
    WindowRegions {
        input,
        output: WindowRegionF {
            left: zoom.left * crop_ratio.x,
            top: zoom.top * crop_ratio.y,
            width: zoom.width * crop_ratio.x,
            height: zoom.height * crop_ratio.y,
        },
    }
}

impl StabilizationEngine for StubEngine {
    fn name(&self) -> &str {
        "stub"
    }

    fn initialize(
        &mut self,
        common: &EngineCommonParams,
        sensors: &[EngineSensorParams],
    ) -> Result<(), EisError> {
        if self.config.fail_init {
            return Err(EisError::algorithm_init("stub configured to fail"));
        }
        if sensors.is_empty() {
            return Err(EisError::algorithm_init("no sensors"));
        }
        self.session = Some(Session {
            common: common.clone(),
            sensors: sensors.to_vec(),
        });
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    fn process(&mut self, input: &EngineInput) -> EngineOutput {
        let Some(session) = self.session.as_ref() else {
            return EngineOutput::none(ProcessStatus::Failed(-1));
        };
        self.calls.push(input.frame_id);

        if self.config.fail_frames.contains(&input.frame_id) {
            return EngineOutput::none(ProcessStatus::Failed(STUB_FAILURE));
        }
        if input.frame_id < self.config.not_processed_below {
            return EngineOutput::none(ProcessStatus::NotProcessed);
        }

        let engine_input = session
            .sensors
            .get(input.sensor_index)
            .map_or(session.common.output_size, |s| s.engine_input);
        EngineOutput {
            status: ProcessStatus::Success,
            has_output: true,
            transform: stub_transform(input.frame_id, session.common.deployment, engine_input),
            ois_mode: OisMode::Active,
        }
    }

    fn deinitialize(&mut self) {
        self.session = None;
    }

    fn total_margin(&self, sensor_index: usize) -> Result<StabilizationMargin, EisError> {
        let session = self.session()?;
        let sensor = session
            .sensors
            .get(sensor_index)
            .ok_or_else(|| EisError::Other(format!("no sensor {sensor_index}")))?;
        let output = session.common.output_size;
        Ok(StabilizationMargin::new(
            sensor.engine_input.width.saturating_sub(output.width) & !1,
            sensor.engine_input.height.saturating_sub(output.height) & !1,
        ))
    }

    fn total_margin_ex(&self, query: &MarginQuery) -> Result<StabilizationMargin, EisError> {
        let axis = |input: u32, output: u32, min: f32| {
            let physical = input.saturating_sub(output);
            let required = (output as f32 * min).ceil() as u32;
            physical.max(required) & !1
        };
        Ok(StabilizationMargin::new(
            axis(
                query.input.width,
                query.output.width,
                query.min_total_margins.width,
            ),
            axis(
                query.input.height,
                query.output.height,
                query.min_total_margins.height,
            ),
        ))
    }

    fn stabilization_crop_ratio_ex(&self, query: &MarginQuery) -> Result<CropRatio, EisError> {
        if query.input.is_empty() {
            return Err(EisError::Other("empty input".to_string()));
        }
        Ok(CropRatio {
            x: query.output.width as f32 / query.input.width as f32,
            y: query.output.height as f32 / query.input.height as f32,
        })
    }

    fn gyro_time_interval(
        &self,
        times: &FrameTimes,
        _sensor_index: usize,
    ) -> Result<GyroInterval, EisError> {
        let half_exposure = times.exposure_us / 2;
        Ok(GyroInterval {
            start_us: times.sof_us.saturating_sub(half_exposure),
            end_us: (times.sof_us + times.frame_duration_us).saturating_sub(half_exposure),
        })
    }

    fn convert_to_window_regions(
        &self,
        ife_crop: &WindowRegion,
        ipe_zoom: &WindowRegion,
        crop_ratio: CropRatio,
        _input: Dimension,
    ) -> Result<WindowRegions, EisError> {
        Ok(window_regions(ife_crop, ipe_zoom, crop_ratio))
    }
}

/// Tuning provider with one handle per camera and sensor mode
#[derive(Debug, Clone, Default)]
pub struct StaticTuning {
    /// No sensor mode has tuning data
    pub missing: bool,
    /// Grids handed out for every handle
    pub ldc: Option<LdcGrids>,
}

impl TuningProvider for StaticTuning {
    fn tuning_handle(&self, camera_id: u32, mode_index: Option<u32>) -> Option<TuningHandle> {
        (!self.missing)
            .then(|| TuningHandle(((camera_id as u64) << 32) | mode_index.unwrap_or(0) as u64))
    }

    fn ldc_grids(&self, _handle: TuningHandle) -> Option<LdcGrids> {
        self.ldc.clone()
    }
}
