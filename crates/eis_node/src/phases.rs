//! Per-request sequencing.
//!
//! Each request walks Setup, GyroDependency, Execute and Publish. A phase
//! either parks the request on declared dependencies or falls through to the
//! next phase in the same call. Publish of request N is a continuation on the
//! engine step of request N + lookahead. Flush hands the request to the drain.

use std::time::Instant;

use contracts::{
    DegradeReason, EisError, EngineInput, EngineOutput, MetadataPool, MetadataQuery, MetadataTag,
    MetadataValue, Phase, ProcessOutcome, ProcessRequest, Rect, RequestId, StabilizationMode,
    TagDependency, TransformBundle, WindowRegion,
};
use tracing::instrument;

use crate::adapter::update_zoom_window;
use crate::debug_log::{DebugLog, FrameRecord};
use crate::lookahead::{lock, LookaheadRing};
use crate::node::{read, EisNode};

/// Where a phase handler leaves the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Wait for the declared dependencies, then run this phase
    Park(Phase),
    /// Run this phase now
    FallThrough(Phase),
    Done,
}

/// Published bundle origin, used as a metrics label
pub(crate) const SOURCE_FUTURE: &str = "future";
pub(crate) const SOURCE_RING: &str = "ring";
pub(crate) const SOURCE_IDENTITY: &str = "identity";

impl EisNode {
    /// Run the phases of one request until it parks or finishes
    ///
    /// Never fails: every per-frame error ends in the identity path and is
    /// reported through [`ProcessOutcome::degraded`].
    #[instrument(
        level = "debug",
        name = "eis_process",
        skip(self, request),
        fields(request_id = request.request_id, phase = request.phase.as_str())
    )]
    pub fn process_request(&self, request: &ProcessRequest) -> ProcessOutcome {
        let request_id = request.request_id;
        let mut outcome = ProcessOutcome::new(request_id);

        let mut phase = request.phase;
        if phase != Phase::Flush && self.end_of_stream().is_some_and(|eos| request_id <= eos) {
            phase = Phase::Flush;
        }

        let Some(ring) = self.ring.get() else {
            tracing::warn!(request_id, "Request before pipeline creation, publishing identity");
            let bundle = self.identity.bundle(self.stream().input);
            self.publish_tags(request_id, &bundle, SOURCE_IDENTITY);
            outcome.phase = Some(phase);
            outcome.published = true;
            outcome.early_metadata_done = true;
            outcome.degrade(DegradeReason::EngineUnavailable);
            return outcome;
        };

        loop {
            observability::record_phase(phase);
            outcome.phase = Some(phase);
            let step = match phase {
                Phase::Flush => self.drain(ring, request, &mut outcome),
                Phase::Setup => self.setup(ring, request, &mut outcome),
                Phase::GyroDependency => self.gyro_dependency(request_id, &mut outcome),
                Phase::Execute => self.execute(ring, request_id, &mut outcome),
                Phase::Publish => self.publish(ring, request_id, &mut outcome),
            };
            match step {
                Step::Park(next) => {
                    outcome.next_phase = Some(next);
                    break;
                }
                Step::FallThrough(next) => phase = next,
                Step::Done => {
                    outcome.next_phase = None;
                    break;
                }
            }
        }

        tracing::trace!(
            request_id,
            next_phase = ?outcome.next_phase,
            degraded = ?outcome.degraded,
            "Phase done"
        );
        outcome
    }

    fn setup(
        &self,
        ring: &LookaheadRing,
        request: &ProcessRequest,
        outcome: &mut ProcessOutcome,
    ) -> Step {
        let request_id = request.request_id;
        ring.with_state(|state| {
            state.filled = false;
            state.identity_only = false;
        });

        if let Some(format) = request.first_input_format() {
            if format != self.stream().input {
                if let Err(e) = self.set_buffer_info(format) {
                    tracing::warn!(request_id, error = %e, "Buffer reconfiguration failed");
                }
            }
        }

        self.update_recording(!self.is_disabled(request_id, 0));

        let deps = &mut outcome.dependencies;
        if self.config.can_set_input_buffer_dependency {
            deps.fences
                .extend(request.inputs.iter().filter_map(|input| input.fence));
        }
        if read(&self.cameras).is_multi_camera() {
            deps.tags.push(TagDependency::current(MetadataTag::MultiCameraId));
        }
        if self.config.realtime {
            deps.tags.extend([
                TagDependency::current(MetadataTag::SofTimestamp),
                TagDependency::current(MetadataTag::ExposureTime),
                TagDependency::current(MetadataTag::FrameDuration),
            ]);
            if self.config.fovc_enabled {
                deps.tags.push(TagDependency::current(MetadataTag::FovcFactor));
            }
        }

        let last_flushed = self.scheduler.last_flushed_request();
        outcome.sequential_execution = request_id.saturating_sub(last_flushed) > 1;

        Step::Park(Phase::GyroDependency)
    }

    /// Open the debug log on the first enabled request, close it on the first disabled one
    pub(crate) fn update_recording(&self, enabled: bool) {
        let mut recording = lock(&self.recording);
        if enabled && !recording.active {
            recording.active = true;
            let output = read(&self.cameras).primary().output_size;
            let prefix = DebugLog::prefix_for(chrono::Local::now().naive_local(), output);
            if let Err(e) = recording.log.open(Some(prefix)) {
                tracing::warn!(error = %e, "Failed to open debug log");
            }
            tracing::info!("Recording started");
        } else if !enabled && recording.active {
            recording.active = false;
            if let Err(e) = recording.log.close() {
                tracing::warn!(error = %e, "Failed to close debug log");
            }
            tracing::info!("Recording stopped");
        }
    }

    fn gyro_dependency(&self, request_id: RequestId, outcome: &mut ProcessOutcome) -> Step {
        let current_disabled = self.is_disabled(request_id, 0);
        let dependent_disabled = self.is_disabled(request_id, -(self.lookahead() as i64));
        if !self.motion_available() || (current_disabled && dependent_disabled) {
            return Step::FallThrough(Phase::Execute);
        }

        let (sensor_index, camera_id) = self.current_sensor(request_id);
        {
            let adapter = lock(&self.adapter);
            match adapter.engine().filter(|engine| engine.is_initialized()) {
                Some(engine) => {
                    let fence = self
                        .gyro
                        .compute_interval(
                            engine,
                            self.metadata.as_ref(),
                            request_id,
                            sensor_index,
                            camera_id,
                        )
                        .and_then(|interval| self.gyro.request_samples(interval));
                    match fence {
                        Ok(fence) => outcome.dependencies.fences.push(fence),
                        Err(e) => {
                            tracing::warn!(request_id, error = %e, "Gyro window request failed");
                            outcome.degrade(reason_for(&e));
                        }
                    }
                }
                None => outcome.degrade(DegradeReason::EngineUnavailable),
            }
        }

        let deps = &mut outcome.dependencies.tags;
        if read(&self.cameras).is_multi_camera() {
            deps.extend([
                TagDependency::current(MetadataTag::ChiNodeResidualCrop),
                TagDependency::current(MetadataTag::SatPerspectiveTransform),
            ]);
        } else if self.config.realtime {
            deps.extend([
                TagDependency::current(MetadataTag::ResidualCrop),
                TagDependency::current(MetadataTag::AppliedCrop),
            ]);
        }

        Step::Park(Phase::Execute)
    }

    fn execute(
        &self,
        ring: &LookaheadRing,
        request_id: RequestId,
        outcome: &mut ProcessOutcome,
    ) -> Step {
        let lookahead = self.lookahead();
        let current_disabled = self.is_disabled(request_id, 0);
        let dependent_disabled = self.is_disabled(request_id, -(lookahead as i64));

        let output = if !self.motion_available() {
            outcome.degrade(DegradeReason::MotionUnavailable);
            None
        } else if self.config.overrides.default_grid_transform {
            outcome.degrade(DegradeReason::DefaultGridOverride);
            None
        } else if current_disabled && dependent_disabled {
            outcome.degrade(DegradeReason::Disabled);
            None
        } else {
            let started = Instant::now();
            let result = self.execute_algo(request_id);
            outcome.engine_latency_us = Some(started.elapsed().as_micros() as u64);
            match result {
                Ok(output) => Some(output),
                Err(e) => {
                    tracing::error!(request_id, error = %e, "Stabilization failed, using identity");
                    outcome.degrade(reason_for(&e));
                    None
                }
            }
        };

        self.update_metadata(request_id, output.as_ref());
        outcome.satisfy_sequential_execution = true;
        outcome.early_metadata_done = true;

        for waiter in ring.complete(request_id) {
            self.scheduler.wake(waiter, Phase::Publish);
        }

        if current_disabled {
            return Step::FallThrough(Phase::Publish);
        }
        let target = request_id + lookahead;
        if ring.register_continuation(request_id, target) {
            Step::FallThrough(Phase::Publish)
        } else {
            outcome.dependencies.continuation = Some(target);
            Step::Park(Phase::Publish)
        }
    }

    fn publish(
        &self,
        ring: &LookaheadRing,
        request_id: RequestId,
        outcome: &mut ProcessOutcome,
    ) -> Step {
        outcome.bypass = self.config.bypassable;
        outcome.early_metadata_done = true;

        if self.is_disabled(request_id, 0) {
            outcome.degrade(DegradeReason::Disabled);
            let bundle = self.identity.bundle(self.stream().input);
            ring.with_state(|state| state.write(request_id, bundle.clone()));
            self.publish_tags(request_id, &bundle, SOURCE_IDENTITY);
            outcome.published = true;
            return Step::Done;
        }

        let query = MetadataQuery::new(MetadataTag::EisTransform, request_id + self.lookahead());
        match self.metadata.get(&query).and_then(MetadataValue::into_transform) {
            Some(bundle) => {
                ring.with_state(|state| {
                    state.advance_published(request_id);
                    state.write(request_id, bundle.clone());
                });
                self.publish_tags(request_id, &bundle, SOURCE_FUTURE);
                outcome.published = true;
            }
            None => {
                tracing::error!(
                    request_id,
                    source_request = query.request_id,
                    "Unable to publish, transform missing"
                );
                outcome.degrade(DegradeReason::MissingTransform);
            }
        }
        Step::Done
    }

    /// Write the consumer tags of one request, routed by target geometry
    pub(crate) fn publish_tags(
        &self,
        request_id: RequestId,
        bundle: &TransformBundle,
        source: &'static str,
    ) {
        let target = self.config.target;
        if target.is_gpu() {
            self.metadata.set(
                MetadataTag::IcaInGridLookahead,
                request_id,
                MetadataValue::Grid(Box::new(bundle.grid.clone())),
            );
        } else {
            self.metadata.set(
                MetadataTag::IcaInPerspective,
                request_id,
                MetadataValue::Perspective(Box::new(bundle.perspective.clone())),
            );
            self.metadata.set(
                MetadataTag::IcaInGridOut2In,
                request_id,
                MetadataValue::Grid(Box::new(bundle.grid.clone())),
            );
            self.metadata.set(
                MetadataTag::IcaReferenceParams,
                request_id,
                MetadataValue::Perspective(Box::new(bundle.alignment.clone())),
            );
        }
        observability::record_publish(target, source, request_id);
    }

    /// Bundle written for an engine result
    ///
    /// Missing output gives the identity bundle. Disabled parts of a real
    /// output are replaced by their identity counterpart, so the consumer
    /// always receives enabled transforms.
    pub(crate) fn bundle_from_output(
        &self,
        request_id: RequestId,
        output: Option<&EngineOutput>,
    ) -> TransformBundle {
        let input = self.stream().input;
        let identity = self.identity.bundle(input);
        let Some(output) = output.filter(|o| o.has_output) else {
            return identity;
        };

        let mut bundle = output.transform.clone();
        if !bundle.perspective.enable && !bundle.grid.enable && request_id > self.lookahead() {
            tracing::error!(request_id, "Engine output has neither perspective nor grid");
        }
        if bundle.perspective.enable {
            bundle.perspective.defined_on = input;
        } else {
            bundle.perspective = identity.perspective;
        }
        if bundle.alignment.enable {
            bundle.alignment.defined_on = input;
        } else {
            bundle.alignment = identity.alignment;
        }
        if !bundle.grid.enable {
            bundle.grid = identity.grid;
        }
        bundle
    }

    /// Store the engine step result under the request's own id
    fn update_metadata(&self, request_id: RequestId, output: Option<&EngineOutput>) {
        let bundle = self.bundle_from_output(request_id, output);
        self.metadata.set(
            MetadataTag::EisTransform,
            request_id,
            MetadataValue::Transform(Box::new(bundle)),
        );
    }

    fn execute_algo(&self, request_id: RequestId) -> Result<EngineOutput, EisError> {
        let (sensor_index, camera_id) = self.current_sensor(request_id);
        let (record, multi_camera) = {
            let cameras = read(&self.cameras);
            let record = cameras
                .get(sensor_index)
                .unwrap_or_else(|| cameras.primary())
                .clone();
            (record, cameras.is_multi_camera())
        };
        let stream = self.stream();
        let input = record.input_size;
        let query = |tag| {
            MetadataQuery::new(tag, request_id)
                .pool(self.pool)
                .camera(camera_id)
        };

        let fovc = if self.config.fovc_enabled {
            if let Some(factor) = self
                .metadata
                .get(&query(MetadataTag::FovcFactor))
                .and_then(|v| v.as_f32())
                .filter(|f| *f > 0.0)
            {
                self.set_fovc_factor(factor);
            }
            Some(self.fovc_factor())
        } else {
            None
        };

        let residual = if multi_camera {
            self.metadata
                .get(&query(MetadataTag::ChiNodeResidualCrop))
                .and_then(|v| v.as_rect())
        } else {
            self.crop_for_path(query(MetadataTag::ResidualCrop))
        };
        let zoom = residual.map(|rect| update_zoom_window(rect, input, stream.actual_margins, fovc));
        let applied = self.crop_for_path(query(MetadataTag::AppliedCrop));
        let focus_distance = self
            .metadata
            .get(&query(MetadataTag::FocusDistance))
            .and_then(|v| v.as_f32())
            .unwrap_or(0.0);

        let sensor = record.sensor_mode.frame_dimension;
        let ife_crop = WindowRegion::new(sensor, applied.unwrap_or_else(|| Rect::full(sensor)));
        let adjusted = input.shrink_by(stream.actual_margins);
        let ipe_zoom = WindowRegion::new(adjusted, zoom.unwrap_or_else(|| Rect::full(adjusted)));

        let sat_transform = if multi_camera {
            self.metadata
                .get(&MetadataQuery::new(MetadataTag::SatPerspectiveTransform, request_id))
                .and_then(|v| v.as_matrix())
        } else {
            None
        };

        let mut adapter = lock(&self.adapter);
        let engine = adapter
            .engine()
            .filter(|engine| engine.is_initialized())
            .ok_or_else(|| EisError::algorithm_init("stabilization engine not ready"))?;
        let interval = self.gyro.compute_interval(
            engine,
            self.metadata.as_ref(),
            request_id,
            sensor_index,
            camera_id,
        )?;
        let gyro = self.gyro.fill_samples(interval)?;
        let window_regions = adapter.window_regions(&ife_crop, &ipe_zoom, record.crop_ratio, input)?;

        let engine_input = EngineInput {
            frame_id: request_id,
            sensor_index,
            gyro,
            focus_distance,
            window_regions,
            sat_transform,
        };
        let result = adapter.execute(&engine_input);
        drop(adapter);

        self.log_frame(request_id, &engine_input, result.as_ref().ok());
        result
    }

    fn crop_for_path(&self, query: MetadataQuery) -> Option<Rect> {
        self.metadata
            .get(&query)
            .and_then(|v| v.as_crops())
            .map(|crops| crops.for_path(self.config.input_path))
            .filter(|rect| rect.width > 0 && rect.height > 0)
    }

    pub(crate) fn log_frame(
        &self,
        request_id: RequestId,
        input: &EngineInput,
        output: Option<&EngineOutput>,
    ) {
        let mut recording = lock(&self.recording);
        if !recording.active || !recording.log.is_enabled() {
            return;
        }
        let record = FrameRecord {
            request_id,
            frame_id: input.frame_id,
            sensor_index: input.sensor_index,
            input: Some(input.into()),
            output: output.map(Into::into),
        };
        if let Err(e) = recording.log.write_frame(&record) {
            tracing::warn!(request_id, error = %e, "Debug log write failed");
        }
    }

    /// Stabilization is off for `request_id + offset`
    ///
    /// Off when the app turned stabilization off or the request carries no
    /// video buffer. Missing tags count as enabled.
    pub(crate) fn is_disabled(&self, request_id: RequestId, offset: i64) -> bool {
        let mode = self
            .metadata
            .get(
                &MetadataQuery::new(MetadataTag::StabilizationMode, request_id)
                    .offset(offset)
                    .pool(MetadataPool::Input),
            )
            .and_then(|v| v.as_mode());
        let has_video = self
            .metadata
            .get(&MetadataQuery::new(MetadataTag::RequestHasVideoBuffer, request_id).offset(offset))
            .map(|value| match value {
                MetadataValue::Bool(flag) => flag,
                other => other.as_u64() != Some(0),
            });

        mode == Some(StabilizationMode::Off) || has_video == Some(false)
    }

    /// Sensor index and camera key of a request
    pub(crate) fn current_sensor(&self, request_id: RequestId) -> (usize, Option<u32>) {
        let cameras = read(&self.cameras);
        if !cameras.is_multi_camera() {
            return (cameras.primary_index(), None);
        }
        let camera_id = self
            .metadata
            .get(&MetadataQuery::new(MetadataTag::MultiCameraId, request_id).pool(self.pool))
            .and_then(|v| v.as_u32());
        let index = match camera_id.and_then(|id| cameras.index_of(id)) {
            Some(index) => index,
            None => {
                tracing::warn!(request_id, camera_id = ?camera_id, "Unknown active camera, using primary");
                cameras.primary_index()
            }
        };
        (index, cameras.camera_filter(index))
    }
}

/// Degradation reported for a per-frame error
pub(crate) fn reason_for(error: &EisError) -> DegradeReason {
    match error {
        EisError::InvalidInterval { .. } | EisError::MissingMetadata { .. } => {
            DegradeReason::InvalidInterval
        }
        EisError::AlgorithmInitFailure { .. } => DegradeReason::EngineUnavailable,
        EisError::MotionUnavailable { .. } => DegradeReason::MotionUnavailable,
        _ => DegradeReason::AlgorithmFailure,
    }
}
