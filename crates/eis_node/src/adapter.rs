//! Stabilization engine adapter.
//!
//! Owns the engine handle, applies the per-frame status policy and converts
//! engine output into the geometry of the configured warp consumer.

use std::time::Instant;

use contracts::{
    CropRatio, Dimension, EisError, EngineCommonParams, EngineInput, EngineOutput,
    EngineSensorParams, GridTransform, MarginQuery, OisMode, ProcessStatus, Rect,
    StabilizationEngine, StabilizationMargin, TargetGeometry, WindowRegion, WindowRegions,
};
use tracing::instrument;

use crate::grid::convert_ica20_to_ica10;

pub struct EngineAdapter {
    engine: Option<Box<dyn StabilizationEngine>>,
    target: TargetGeometry,
    ois_override: Option<OisMode>,
    lookahead: u64,
}

impl std::fmt::Debug for EngineAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineAdapter")
            .field("engine", &self.engine.as_ref().map(|e| e.name().to_string()))
            .field("ready", &self.is_ready())
            .field("target", &self.target)
            .finish()
    }
}

impl EngineAdapter {
    pub fn new(
        engine: Option<Box<dyn StabilizationEngine>>,
        target: TargetGeometry,
        ois_override: Option<OisMode>,
        lookahead: u64,
    ) -> Self {
        Self {
            engine,
            target,
            ois_override,
            lookahead,
        }
    }

    pub fn engine(&self) -> Option<&dyn StabilizationEngine> {
        self.engine.as_deref()
    }

    /// Bound and initialized
    pub fn is_ready(&self) -> bool {
        self.engine.as_ref().is_some_and(|e| e.is_initialized())
    }

    fn bound(&self) -> Result<&dyn StabilizationEngine, EisError> {
        self.engine
            .as_deref()
            .ok_or_else(|| EisError::algorithm_init("no stabilization engine bound"))
    }

    fn ready(&mut self) -> Result<&mut (dyn StabilizationEngine + 'static), EisError> {
        match self.engine.as_deref_mut() {
            Some(engine) if engine.is_initialized() => Ok(engine),
            Some(_) => Err(EisError::algorithm_init("stabilization engine not initialized")),
            None => Err(EisError::algorithm_init("no stabilization engine bound")),
        }
    }

    #[instrument(level = "debug", name = "engine_initialize", skip_all, fields(sensors = sensors.len()))]
    pub fn initialize(
        &mut self,
        common: &EngineCommonParams,
        sensors: &[EngineSensorParams],
    ) -> Result<(), EisError> {
        let engine = self
            .engine
            .as_deref_mut()
            .ok_or_else(|| EisError::algorithm_init("no stabilization engine bound"))?;
        engine.initialize(common, sensors)?;
        tracing::info!(
            engine = engine.name(),
            deployment = ?common.deployment,
            buffer_delay = common.buffer_delay,
            "Stabilization engine initialized"
        );
        Ok(())
    }

    /// Run the engine on one frame
    ///
    /// `NotProcessed` is a success without usable output. Any other non-success
    /// status is an `AlgorithmExecutionFailure`.
    pub fn execute(&mut self, input: &EngineInput) -> Result<EngineOutput, EisError> {
        let lookahead = self.lookahead;
        let engine = self.ready()?;

        let started = Instant::now();
        let mut output = engine.process(input);
        let latency_us = started.elapsed().as_secs_f64() * 1e6;

        match output.status {
            ProcessStatus::Success => {
                observability::record_engine_call("success", latency_us);
            }
            ProcessStatus::NotProcessed => {
                observability::record_engine_call("not_processed", latency_us);
                if input.frame_id >= lookahead {
                    tracing::warn!(
                        frame_id = input.frame_id,
                        lookahead,
                        "Engine did not process a frame past the lookahead window"
                    );
                }
            }
            ProcessStatus::Failed(code) => {
                observability::record_engine_call("failed", latency_us);
                return Err(EisError::AlgorithmExecutionFailure {
                    request_id: input.frame_id,
                    code,
                });
            }
        }

        if let Some(mode) = self.ois_override {
            output.ois_mode = mode;
        }

        if output.has_output && self.target.needs_grid_conversion() {
            output.transform.grid = match convert_ica20_to_ica10(&output.transform.grid) {
                Ok(grid) => grid,
                Err(e) => {
                    tracing::warn!(frame_id = input.frame_id, error = %e, "Grid conversion failed");
                    GridTransform::disabled()
                }
            };
        }

        Ok(output)
    }

    pub fn deinitialize(&mut self) {
        if let Some(engine) = self.engine.as_deref_mut() {
            if engine.is_initialized() {
                engine.deinitialize();
                tracing::debug!(engine = engine.name(), "Stabilization engine released");
            }
        }
    }

    pub fn total_margin(&self, sensor_index: usize) -> Result<StabilizationMargin, EisError> {
        self.bound()?.total_margin(sensor_index)
    }

    pub fn total_margin_ex(&self, query: &MarginQuery) -> Result<StabilizationMargin, EisError> {
        self.bound()?.total_margin_ex(query)
    }

    pub fn crop_ratio_ex(&self, query: &MarginQuery) -> Result<CropRatio, EisError> {
        self.bound()?.stabilization_crop_ratio_ex(query)
    }

    pub fn window_regions(
        &self,
        ife_crop: &WindowRegion,
        ipe_zoom: &WindowRegion,
        crop_ratio: CropRatio,
        input: Dimension,
    ) -> Result<WindowRegions, EisError> {
        self.bound()?
            .convert_to_window_regions(ife_crop, ipe_zoom, crop_ratio, input)
    }
}

/// Map the residual crop of the input into the margin-reduced frame
///
/// With a field-of-view compensation factor the window shrinks around its
/// center, width first, keeping even sizes.
pub fn update_zoom_window(
    residual: Rect,
    input: Dimension,
    margins: StabilizationMargin,
    fovc_factor: Option<f32>,
) -> Rect {
    let adjusted = input.shrink_by(margins);
    let in_w = input.width.max(1) as f32;
    let in_h = input.height.max(1) as f32;
    let adj_w = adjusted.width as f32;
    let adj_h = adjusted.height as f32;

    let crop_factor = residual.height as f32 / in_h;
    let offset_left = residual.left as f32 / in_w;
    let offset_top = residual.top as f32 / in_h;

    let mut window = Rect::new(
        (adj_w * offset_left).floor() as i32,
        (adj_h * offset_top).floor() as i32,
        (adj_w * crop_factor).floor() as i32,
        (adj_h * crop_factor).floor() as i32,
    );

    if let Some(factor) = fovc_factor.filter(|f| *f > 0.0) {
        let apply = 1.0 - factor;
        let dw = window.width - (window.width as f32 * apply).floor() as i32;
        let dh = window.height - (window.height as f32 * apply).floor() as i32;
        window.left += dw / 2;
        window.top += dh / 2;
        window.width -= (dw / 2) * 2;
        window.height -= (dh / 2) * 2;
    }

    window
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{StubEngine, StubEngineConfig};
    use contracts::{DeploymentType, GridExtrapolation, OperationMode, ICA10_GRID};

    fn common(deployment: DeploymentType) -> EngineCommonParams {
        EngineCommonParams {
            operation_mode: OperationMode::Regular,
            deployment,
            output_size: Dimension::new(1920, 1080),
            frame_rate: 30.0,
            buffer_delay: 16,
            sat_enabled: false,
            gyro_frequency_hz: 416,
        }
    }

    fn sensor() -> EngineSensorParams {
        EngineSensorParams {
            camera_id: 0,
            ife_input: Dimension::new(4000, 3000),
            sensor_crop: WindowRegion::whole(Dimension::new(4000, 3000)),
            engine_input: Dimension::new(2304, 1296),
            mount_angle: 90,
            position: Default::default(),
            tuning: None,
            ldc: None,
        }
    }

    fn adapter(config: StubEngineConfig, target: TargetGeometry) -> EngineAdapter {
        let mut adapter = EngineAdapter::new(
            Some(Box::new(StubEngine::new(config))),
            target,
            None,
            15,
        );
        adapter
            .initialize(&common(target.deployment()), &[sensor()])
            .unwrap();
        adapter
    }

    #[test]
    fn test_zoom_window_full_residual() {
        let input = Dimension::new(2304, 1296);
        let margins = StabilizationMargin::new(384, 216);
        let window = update_zoom_window(Rect::full(input), input, margins, None);
        assert_eq!(window, Rect::new(0, 0, 1920, 1080));
    }

    #[test]
    fn test_zoom_window_fovc_shrinks_around_center() {
        let input = Dimension::new(2304, 1296);
        let margins = StabilizationMargin::new(384, 216);
        let window = update_zoom_window(Rect::full(input), input, margins, Some(0.06));
        assert_eq!(window, Rect::new(58, 32, 1804, 1016));

        // zero factor is ignored
        let window = update_zoom_window(Rect::full(input), input, margins, Some(0.0));
        assert_eq!(window, Rect::new(0, 0, 1920, 1080));
    }

    #[test]
    fn test_not_processed_is_success_without_output() {
        let mut adapter = adapter(
            StubEngineConfig {
                not_processed_below: 15,
                ..Default::default()
            },
            TargetGeometry::Ica20,
        );
        let output = adapter.execute(&EngineInput::frame_only(3)).unwrap();
        assert_eq!(output.status, ProcessStatus::NotProcessed);
        assert!(!output.transform.perspective.enable);

        let output = adapter.execute(&EngineInput::frame_only(15)).unwrap();
        assert_eq!(output.status, ProcessStatus::Success);
        assert!(output.transform.is_complete());
    }

    #[test]
    fn test_failure_status_is_execution_failure() {
        let mut adapter = adapter(
            StubEngineConfig {
                fail_frames: vec![7],
                ..Default::default()
            },
            TargetGeometry::Ica30,
        );
        let err = adapter.execute(&EngineInput::frame_only(7)).unwrap_err();
        assert!(matches!(
            err,
            EisError::AlgorithmExecutionFailure { request_id: 7, .. }
        ));
        assert!(adapter.execute(&EngineInput::frame_only(8)).is_ok());
    }

    #[test]
    fn test_ica10_output_is_converted() {
        let mut adapter = adapter(StubEngineConfig::default(), TargetGeometry::Ica10);
        let output = adapter.execute(&EngineInput::frame_only(20)).unwrap();
        assert_eq!(output.transform.grid.geometry, ICA10_GRID);
        assert_eq!(
            output.transform.grid.extrapolation,
            GridExtrapolation::FourCorners
        );
    }

    #[test]
    fn test_ois_override() {
        let mut adapter = EngineAdapter::new(
            Some(Box::new(StubEngine::default())),
            TargetGeometry::Ica20,
            Some(OisMode::Centering),
            15,
        );
        adapter
            .initialize(&common(DeploymentType::IcaV20), &[sensor()])
            .unwrap();
        let output = adapter.execute(&EngineInput::frame_only(30)).unwrap();
        assert_eq!(output.ois_mode, OisMode::Centering);
    }

    #[test]
    fn test_unbound_or_failed_engine_is_not_ready() {
        let mut unbound = EngineAdapter::new(None, TargetGeometry::Ica20, None, 15);
        assert!(!unbound.is_ready());
        assert!(matches!(
            unbound.execute(&EngineInput::frame_only(1)),
            Err(EisError::AlgorithmInitFailure { .. })
        ));

        let mut failing = EngineAdapter::new(
            Some(Box::new(StubEngine::new(StubEngineConfig {
                fail_init: true,
                ..Default::default()
            }))),
            TargetGeometry::Ica20,
            None,
            15,
        );
        assert!(failing
            .initialize(&common(DeploymentType::IcaV20), &[sensor()])
            .is_err());
        assert!(!failing.is_ready());
    }
}
