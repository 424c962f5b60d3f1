//! Stabilization engine backed by a shared object exporting the `eis3_*` ABI.

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};

use contracts::{
    CameraPosition, CropRatio, DeploymentType, Dimension, EisError,
    EngineCommonParams, EngineInput, EngineOutput, EngineSensorParams, FrameTimes,
    GridExtrapolation, GridGeometry, GridPoint, GridTransform, GyroInterval, MarginQuery,
    OisMode, OperationMode, PerspectiveTransform, ProcessStatus, StabilizationEngine,
    StabilizationMargin, TransformBundle, WindowRegion, WindowRegionF, WindowRegions,
    ICA30_GRID,
};
use libloading::Library;
use nalgebra::Matrix3;

use crate::ffi::*;

#[derive(Clone, Copy)]
struct Eis3Api {
    initialize: Eis3Initialize,
    process: Eis3Process,
    deinitialize: Eis3Deinitialize,
    get_total_margin: Eis3GetTotalMargin,
    get_total_margin_ex: Eis3GetTotalMarginEx,
    get_crop_ratio_ex: Eis3GetCropRatioEx,
    get_gyro_interval: Eis3GetGyroInterval,
    convert_to_window_regions: EisConvertToWindowRegions,
}

impl Eis3Api {
    /// # Safety
    /// The symbols must have the signatures declared in [`crate::ffi`].
    unsafe fn resolve(library: &Library) -> Result<Self, String> {
        let missing: Vec<&str> = REQUIRED_SYMBOLS
            .iter()
            .filter(|symbol| library.get::<*const c_void>(symbol).is_err())
            .map(|symbol| symbol_name(symbol))
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing symbols: {}", missing.join(", ")));
        }
        Self::bind(library).map_err(|e| e.to_string())
    }

    unsafe fn bind(library: &Library) -> Result<Self, libloading::Error> {
        Ok(Self {
            initialize: *library.get::<Eis3Initialize>(SYM_INITIALIZE)?,
            process: *library.get::<Eis3Process>(SYM_PROCESS)?,
            deinitialize: *library.get::<Eis3Deinitialize>(SYM_DEINITIALIZE)?,
            get_total_margin: *library.get::<Eis3GetTotalMargin>(SYM_GET_TOTAL_MARGIN)?,
            get_total_margin_ex: *library.get::<Eis3GetTotalMarginEx>(SYM_GET_TOTAL_MARGIN_EX)?,
            get_crop_ratio_ex: *library.get::<Eis3GetCropRatioEx>(SYM_GET_CROP_RATIO_EX)?,
            get_gyro_interval: *library.get::<Eis3GetGyroInterval>(SYM_GET_GYRO_INTERVAL)?,
            convert_to_window_regions: *library
                .get::<EisConvertToWindowRegions>(SYM_CONVERT_TO_WINDOW_REGIONS)?,
        })
    }
}

/// Opaque engine instance
struct EngineHandle(NonNull<c_void>);

// The engine instance is only touched through `&mut self` of its owner.
unsafe impl Send for EngineHandle {}

/// Engine loaded from a shared object
///
/// The library stays loaded for the lifetime of the engine, the resolved
/// function pointers are only valid while it is.
pub struct SharedLibraryEngine {
    api: Eis3Api,
    handle: Option<EngineHandle>,
    path: PathBuf,
    points: Vec<f32>,
    _library: Library,
}

impl std::fmt::Debug for SharedLibraryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedLibraryEngine")
            .field("path", &self.path)
            .field("initialized", &self.handle.is_some())
            .finish()
    }
}

impl SharedLibraryEngine {
    pub fn load(path: &Path) -> Result<Self, EisError> {
        let library = unsafe { Library::new(path) }
            .map_err(|e| EisError::library_load(path.display().to_string(), e.to_string()))?;
        let api = unsafe { Eis3Api::resolve(&library) }
            .map_err(|e| EisError::library_load(path.display().to_string(), e))?;

        tracing::info!(path = %path.display(), "Stabilization library loaded");
        Ok(Self {
            api,
            handle: None,
            path: path.to_path_buf(),
            points: vec![0.0; ICA30_GRID.len() * 2],
            _library: library,
        })
    }

    fn handle_ptr(&self) -> Result<*mut c_void, EisError> {
        self.handle
            .as_ref()
            .map(|h| h.0.as_ptr())
            .ok_or_else(|| EisError::algorithm_init("stabilization library not initialized"))
    }
}

impl StabilizationEngine for SharedLibraryEngine {
    fn name(&self) -> &str {
        "eis3-shared-library"
    }

    fn initialize(
        &mut self,
        common: &EngineCommonParams,
        sensors: &[EngineSensorParams],
    ) -> Result<(), EisError> {
        // flattened LDC grids must outlive the call
        let ldc: Vec<Option<(Vec<f32>, Vec<f32>)>> = sensors
            .iter()
            .map(|s| {
                s.ldc.as_ref().map(|grids| {
                    (
                        flatten_points(&grids.input_to_undistorted),
                        flatten_points(&grids.undistorted_to_input),
                    )
                })
            })
            .collect();

        let raw_sensors: Vec<RawSensorParams> = sensors
            .iter()
            .zip(&ldc)
            .map(|(s, grids)| RawSensorParams {
                camera_id: s.camera_id,
                ife_input: raw_dimension(s.ife_input),
                sensor_crop: raw_window(&s.sensor_crop),
                engine_input: raw_dimension(s.engine_input),
                mount_angle: s.mount_angle,
                position: match s.position {
                    CameraPosition::Rear => 0,
                    CameraPosition::Front => 1,
                    CameraPosition::RearAux => 2,
                    CameraPosition::FrontAux => 3,
                },
                tuning_handle: s.tuning.map_or(0, |t| t.0),
                ldc_in2out: grids.as_ref().map_or(ptr::null(), |(a, _)| a.as_ptr()),
                ldc_out2in: grids.as_ref().map_or(ptr::null(), |(_, b)| b.as_ptr()),
                ldc_points: grids.as_ref().map_or(0, |(a, _)| (a.len() / 2) as u32),
            })
            .collect();

        let params = RawInitParams {
            common: RawCommonParams {
                operation_mode: match common.operation_mode {
                    OperationMode::Regular => 0,
                    OperationMode::Calibration => 1,
                    OperationMode::UndistortionOnly => 2,
                },
                deployment: match common.deployment {
                    DeploymentType::IcaV20 => 0,
                    DeploymentType::IcaV30 => 1,
                    DeploymentType::GpuPre => 2,
                },
                output_size: raw_dimension(common.output_size),
                frame_rate: common.frame_rate,
                buffer_delay: common.buffer_delay,
                sat_enabled: common.sat_enabled as u32,
                gyro_frequency_hz: common.gyro_frequency_hz,
            },
            num_sensors: raw_sensors.len() as u32,
            sensors: raw_sensors.as_ptr(),
        };

        let mut raw: *mut c_void = ptr::null_mut();
        let rc = unsafe { (self.api.initialize)(&mut raw, &params) };
        match NonNull::new(raw) {
            Some(handle) if rc == EIS3_SUCCESS => {
                self.handle = Some(EngineHandle(handle));
                Ok(())
            }
            _ => Err(EisError::algorithm_init(format!(
                "eis3_initialize returned {rc}"
            ))),
        }
    }

    fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }

    fn process(&mut self, input: &EngineInput) -> EngineOutput {
        let Ok(handle) = self.handle_ptr() else {
            return EngineOutput::none(ProcessStatus::Failed(-1));
        };

        let gyro: Vec<RawGyroSample> = input
            .gyro
            .iter()
            .map(|s| RawGyroSample {
                data: s.data,
                ts_us: s.ts_us,
            })
            .collect();
        let mut sat = [0.0f32; 9];
        if let Some(m) = &input.sat_transform {
            for (i, v) in m.transpose().iter().enumerate() {
                sat[i] = *v;
            }
        }
        let raw_input = RawInput {
            frame_id: input.frame_id,
            sensor_index: input.sensor_index as u32,
            num_gyro_samples: gyro.len() as u32,
            gyro: gyro.as_ptr(),
            focus_distance: input.focus_distance,
            input_window: raw_window_f(input.window_regions.input),
            output_window: raw_window_f(input.window_regions.output),
            has_sat: input.sat_transform.is_some() as u32,
            sat,
        };

        let capacity = self.points.len() / 2;
        let mut raw_output = RawOutput {
            has_output: 0,
            perspective: RawPerspective::default(),
            grid: RawGrid {
                enable: 0,
                defined_on: RawDimension::default(),
                num_columns: 0,
                num_rows: 0,
                extrapolation: 0,
                corners: [0.0; 8],
                points: self.points.as_mut_ptr(),
                capacity: capacity as u32,
            },
            alignment: RawPerspective::default(),
            ois_mode: 0,
        };

        let rc = unsafe { (self.api.process)(handle, &raw_input, &mut raw_output) };
        let status = match rc {
            EIS3_SUCCESS => ProcessStatus::Success,
            EIS3_NOT_PROCESSED => ProcessStatus::NotProcessed,
            code => return EngineOutput::none(ProcessStatus::Failed(code)),
        };

        EngineOutput {
            status,
            has_output: raw_output.has_output != 0,
            transform: TransformBundle {
                perspective: perspective_from_raw(&raw_output.perspective),
                grid: grid_from_raw(&raw_output.grid, &self.points),
                alignment: perspective_from_raw(&raw_output.alignment),
            },
            ois_mode: match raw_output.ois_mode {
                1 => OisMode::Active,
                2 => OisMode::Centering,
                _ => OisMode::Inactive,
            },
        }
    }

    fn deinitialize(&mut self) {
        if let Some(handle) = self.handle.take() {
            let mut raw = handle.0.as_ptr();
            let rc = unsafe { (self.api.deinitialize)(&mut raw) };
            if rc != EIS3_SUCCESS {
                tracing::warn!(rc, "eis3_deinitialize failed");
            }
        }
    }

    fn total_margin(&self, sensor_index: usize) -> Result<StabilizationMargin, EisError> {
        let handle = self.handle_ptr()?;
        let mut margin = RawMargin::default();
        let rc = unsafe { (self.api.get_total_margin)(handle, sensor_index as u32, &mut margin) };
        check(rc, "eis3_get_total_margin")?;
        Ok(StabilizationMargin::new(margin.width, margin.height))
    }

    fn total_margin_ex(&self, query: &MarginQuery) -> Result<StabilizationMargin, EisError> {
        let mut margin = RawMargin::default();
        let rc = unsafe { (self.api.get_total_margin_ex)(&raw_query(query), &mut margin) };
        check(rc, "eis3_get_total_margin_ex")?;
        Ok(StabilizationMargin::new(margin.width, margin.height))
    }

    fn stabilization_crop_ratio_ex(&self, query: &MarginQuery) -> Result<CropRatio, EisError> {
        let mut ratio = RawCropRatio::default();
        let rc = unsafe { (self.api.get_crop_ratio_ex)(&raw_query(query), &mut ratio) };
        check(rc, "eis3_get_stabilization_crop_ratio_ex")?;
        Ok(CropRatio {
            x: ratio.x,
            y: ratio.y,
        })
    }

    fn gyro_time_interval(
        &self,
        times: &FrameTimes,
        sensor_index: usize,
    ) -> Result<GyroInterval, EisError> {
        let handle = self.handle_ptr()?;
        let raw_times = RawFrameTimes {
            sof_us: times.sof_us,
            frame_duration_us: times.frame_duration_us,
            exposure_us: times.exposure_us,
            rolling_shutter_skew_us: times.rolling_shutter_skew_us,
        };
        let mut interval = RawInterval::default();
        let rc = unsafe {
            (self.api.get_gyro_interval)(handle, &raw_times, sensor_index as u32, &mut interval)
        };
        check(rc, "eis3_get_gyro_time_interval")?;
        Ok(GyroInterval {
            start_us: interval.start_us,
            end_us: interval.end_us,
        })
    }

    fn convert_to_window_regions(
        &self,
        ife_crop: &WindowRegion,
        ipe_zoom: &WindowRegion,
        crop_ratio: CropRatio,
        input: Dimension,
    ) -> Result<WindowRegions, EisError> {
        let mut regions = RawWindowRegions::default();
        let rc = unsafe {
            (self.api.convert_to_window_regions)(
                &raw_window(ife_crop),
                &raw_window(ipe_zoom),
                f64::from(crop_ratio.x),
                f64::from(crop_ratio.y),
                input.width,
                input.height,
                &mut regions,
            )
        };
        check(rc, "eis_utility_convert_to_window_regions")?;
        Ok(WindowRegions {
            input: window_f_from_raw(regions.input),
            output: window_f_from_raw(regions.output),
        })
    }
}

impl Drop for SharedLibraryEngine {
    fn drop(&mut self) {
        self.deinitialize();
    }
}

fn check(rc: i32, call: &str) -> Result<(), EisError> {
    if rc == EIS3_SUCCESS {
        Ok(())
    } else {
        Err(EisError::Other(format!("{call} returned {rc}")))
    }
}

fn flatten_points(points: &[GridPoint]) -> Vec<f32> {
    points.iter().flat_map(|p| [p.x, p.y]).collect()
}

fn raw_dimension(d: Dimension) -> RawDimension {
    RawDimension {
        width: d.width,
        height: d.height,
    }
}

fn raw_window(w: &WindowRegion) -> RawWindowRegion {
    RawWindowRegion {
        full_width: w.full_width,
        full_height: w.full_height,
        window: RawRect {
            left: w.window.left,
            top: w.window.top,
            width: w.window.width,
            height: w.window.height,
        },
    }
}

fn raw_window_f(w: WindowRegionF) -> RawWindowRegionF {
    RawWindowRegionF {
        left: w.left,
        top: w.top,
        width: w.width,
        height: w.height,
    }
}

fn window_f_from_raw(w: RawWindowRegionF) -> WindowRegionF {
    WindowRegionF {
        left: w.left,
        top: w.top,
        width: w.width,
        height: w.height,
    }
}

fn symbol_name(symbol: &[u8]) -> &str {
    let name = symbol.strip_suffix(b"\0").unwrap_or(symbol);
    std::str::from_utf8(name).unwrap_or("<invalid symbol>")
}

fn raw_query(query: &MarginQuery) -> RawMarginQuery {
    RawMarginQuery {
        input: raw_dimension(query.input),
        min_total_margin_x: query.min_total_margins.width,
        min_total_margin_y: query.min_total_margins.height,
        output: raw_dimension(query.output),
    }
}

fn perspective_from_raw(raw: &RawPerspective) -> PerspectiveTransform {
    if raw.enable == 0 {
        return PerspectiveTransform::disabled();
    }
    let rows = (raw.num_rows as usize).min(EIS3_MAX_MATRICES);
    PerspectiveTransform {
        enable: true,
        bypass_alignment_adjustment: raw.bypass_alignment_adjustment != 0,
        confidence: raw.confidence,
        num_rows: rows as u32,
        num_columns: raw.num_columns,
        defined_on: Dimension::new(raw.defined_on.width, raw.defined_on.height),
        matrices: raw.matrices[..rows]
            .iter()
            .map(|m| Matrix3::from_row_slice(m))
            .collect(),
    }
}

fn grid_from_raw(raw: &RawGrid, points: &[f32]) -> GridTransform {
    if raw.enable == 0 {
        return GridTransform::disabled();
    }
    let geometry = GridGeometry::new(raw.num_columns, raw.num_rows);
    let count = geometry.len().min(raw.capacity as usize).min(points.len() / 2);
    let extrapolation = match raw.extrapolation {
        1 => GridExtrapolation::FourCorners,
        2 => GridExtrapolation::ExtraPointAlongPerimeter,
        _ => GridExtrapolation::None,
    };
    let c = &raw.corners;
    GridTransform {
        enable: true,
        defined_on: Dimension::new(raw.defined_on.width, raw.defined_on.height),
        geometry,
        extrapolation,
        corners: (extrapolation == GridExtrapolation::FourCorners).then(|| {
            [
                GridPoint::new(c[0], c[1]),
                GridPoint::new(c[2], c[3]),
                GridPoint::new(c[4], c[5]),
                GridPoint::new(c[6], c[7]),
            ]
        }),
        points: points[..count * 2]
            .chunks_exact(2)
            .map(|xy| GridPoint::new(xy[0], xy[1]))
            .collect(),
    }
}
