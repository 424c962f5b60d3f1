//! Per-camera configuration resolved from usecase and static metadata.

use contracts::{
    CameraConfig, CameraConfigs, CameraPosition, CropRatio, Dimension, EisError, LdcGrids,
    MetadataAccessor, MetadataTag, SensorModeInfo, TuningHandle, TuningProvider, WindowRegion,
    MAX_LINKED_CAMERAS,
};

use crate::grid::checked_ldc_grids;

/// Everything the node keeps per linked camera
#[derive(Debug, Clone, PartialEq)]
pub struct SensorRecord {
    pub camera_id: u32,
    pub sensor_mode: SensorModeInfo,
    pub active_array: Dimension,
    pub mount_angle: u32,
    pub position: CameraPosition,
    pub tuning: Option<TuningHandle>,
    pub ldc: Option<LdcGrids>,
    /// Node input buffer size
    pub input_size: Dimension,
    /// Stabilized output size
    pub output_size: Dimension,
    pub crop_ratio: CropRatio,
}

impl SensorRecord {
    /// Crop the sensor mode applies to the active array
    pub fn applied_crop(&self) -> WindowRegion {
        WindowRegion::new(self.active_array, self.sensor_mode.active_array_crop_window)
    }

    pub fn frame_rate(&self) -> f32 {
        self.sensor_mode.frame_rate
    }
}

/// Linked cameras of the node
#[derive(Debug, Clone, PartialEq)]
pub struct CameraSetup {
    records: Vec<SensorRecord>,
    primary_index: usize,
}

impl CameraSetup {
    /// Resolve cameras, static properties and tuning
    pub fn resolve(
        metadata: &dyn MetadataAccessor,
        tuning: &dyn TuningProvider,
        ldc_enabled: bool,
    ) -> Result<Self, EisError> {
        let configs = resolve_camera_configs(metadata)?;
        let multi_camera = configs.cameras.len() > 1;

        let records: Vec<SensorRecord> = configs
            .cameras
            .iter()
            .map(|camera| build_record(metadata, tuning, camera, multi_camera, ldc_enabled))
            .collect();

        let primary_index = records
            .iter()
            .position(|r| r.camera_id == configs.primary_camera_id)
            .unwrap_or(0);

        tracing::info!(
            cameras = records.len(),
            primary_camera_id = records[primary_index].camera_id,
            "Cameras resolved"
        );

        Ok(Self {
            records,
            primary_index,
        })
    }

    /// Re-resolve for a new buffer format, keeping nothing but the LDC grids
    pub fn reconfigure(
        &mut self,
        metadata: &dyn MetadataAccessor,
        tuning: &dyn TuningProvider,
        ldc_enabled: bool,
        format: Dimension,
    ) -> Result<(), EisError> {
        let mut next = Self::resolve(metadata, tuning, ldc_enabled)?;
        for record in &mut next.records {
            record.input_size = format;
            record.output_size = format;
            if record.ldc.is_none() {
                record.ldc = self
                    .records
                    .iter()
                    .find(|r| r.camera_id == record.camera_id)
                    .and_then(|r| r.ldc.clone());
            }
        }
        *self = next;
        Ok(())
    }

    pub fn is_multi_camera(&self) -> bool {
        self.records.len() > 1
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn primary_index(&self) -> usize {
        self.primary_index
    }

    pub fn primary(&self) -> &SensorRecord {
        &self.records[self.primary_index]
    }

    pub fn index_of(&self, camera_id: u32) -> Option<usize> {
        self.records.iter().position(|r| r.camera_id == camera_id)
    }

    pub fn get(&self, index: usize) -> Option<&SensorRecord> {
        self.records.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut SensorRecord> {
        self.records.get_mut(index)
    }

    pub fn records(&self) -> &[SensorRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [SensorRecord] {
        &mut self.records
    }

    /// Camera key for per-request reads, only set when several cameras are linked
    pub fn camera_filter(&self, index: usize) -> Option<u32> {
        if self.is_multi_camera() {
            self.records.get(index).map(|r| r.camera_id)
        } else {
            None
        }
    }
}

/// Physical camera list of the usecase
///
/// Without a list the node drives camera 0 with the usecase sensor mode.
pub fn resolve_camera_configs(metadata: &dyn MetadataAccessor) -> Result<CameraConfigs, EisError> {
    let usecase_mode = metadata
        .get_usecase(MetadataTag::SensorModeInfo)
        .and_then(|v| v.as_sensor_mode().copied());

    let configs = metadata
        .get_usecase(MetadataTag::PhysicalCameraConfigs)
        .and_then(|v| v.as_camera_configs().cloned())
        .filter(|c| !c.cameras.is_empty());

    let mut configs = match configs {
        Some(configs) => configs,
        None => {
            tracing::debug!("No physical camera list, using camera 0");
            CameraConfigs {
                primary_camera_id: 0,
                cameras: vec![CameraConfig {
                    camera_id: 0,
                    sensor_mode: usecase_mode.unwrap_or_default(),
                }],
            }
        }
    };

    if configs.cameras.len() > MAX_LINKED_CAMERAS {
        return Err(EisError::invalid_configuration(format!(
            "{} linked cameras, at most {} supported",
            configs.cameras.len(),
            MAX_LINKED_CAMERAS
        )));
    }

    // a single camera follows the usecase sensor mode
    if configs.cameras.len() == 1 {
        if let Some(mode) = usecase_mode {
            configs.cameras[0].sensor_mode = mode;
        }
    }

    Ok(configs)
}

fn build_record(
    metadata: &dyn MetadataAccessor,
    tuning: &dyn TuningProvider,
    camera: &CameraConfig,
    multi_camera: bool,
    ldc_enabled: bool,
) -> SensorRecord {
    let key = multi_camera.then_some(camera.camera_id);

    let active_array = metadata
        .get_static(MetadataTag::ActiveArraySize, key)
        .and_then(|v| v.as_dimension())
        .unwrap_or_else(|| {
            tracing::warn!(
                camera_id = camera.camera_id,
                "Active array size missing, using sensor frame size"
            );
            camera.sensor_mode.frame_dimension
        });
    let mount_angle = metadata
        .get_static(MetadataTag::MountAngle, key)
        .and_then(|v| v.as_u32())
        .unwrap_or(0);
    let position = metadata
        .get_static(MetadataTag::CameraPosition, key)
        .and_then(|v| v.as_position())
        .unwrap_or_default();

    let handle = tuning.tuning_handle(camera.camera_id, Some(camera.sensor_mode.mode_index));
    if handle.is_none() {
        tracing::warn!(
            camera_id = camera.camera_id,
            mode_index = camera.sensor_mode.mode_index,
            "No tuning data for sensor mode"
        );
    }
    let ldc = match handle {
        Some(handle) if ldc_enabled => checked_ldc_grids(camera.camera_id, tuning.ldc_grids(handle)),
        _ => None,
    };

    let frame = camera.sensor_mode.frame_dimension;
    SensorRecord {
        camera_id: camera.camera_id,
        sensor_mode: camera.sensor_mode,
        active_array,
        mount_angle,
        position,
        tuning: handle,
        ldc,
        input_size: frame,
        output_size: frame,
        crop_ratio: CropRatio { x: 1.0, y: 1.0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{InMemoryMetadata, StaticTuning};
    use contracts::{MetadataValue, Rect};

    fn mode(index: u32, width: u32, height: u32) -> SensorModeInfo {
        SensorModeInfo {
            mode_index: index,
            frame_dimension: Dimension::new(width, height),
            active_array_crop_window: Rect::new(0, 0, width as i32, height as i32),
            binning: 1,
            frame_rate: 30.0,
        }
    }

    #[test]
    fn test_single_camera_defaults_to_camera_zero() {
        let metadata = InMemoryMetadata::new();
        metadata.set_usecase(
            MetadataTag::SensorModeInfo,
            MetadataValue::SensorMode(mode(3, 4000, 3000)),
        );
        metadata.set_static(
            MetadataTag::ActiveArraySize,
            None,
            MetadataValue::Dimension(Dimension::new(4032, 3024)),
        );

        let setup = CameraSetup::resolve(&metadata, &StaticTuning::default(), true).unwrap();
        assert!(!setup.is_multi_camera());
        assert_eq!(setup.primary().camera_id, 0);
        assert_eq!(setup.primary().sensor_mode.mode_index, 3);
        assert_eq!(setup.primary().active_array, Dimension::new(4032, 3024));
        assert_eq!(setup.camera_filter(0), None);
    }

    #[test]
    fn test_multi_camera_primary_and_lookup() {
        let metadata = InMemoryMetadata::new();
        metadata.set_usecase(
            MetadataTag::PhysicalCameraConfigs,
            MetadataValue::CameraConfigs(CameraConfigs {
                primary_camera_id: 2,
                cameras: vec![
                    CameraConfig {
                        camera_id: 0,
                        sensor_mode: mode(0, 4000, 3000),
                    },
                    CameraConfig {
                        camera_id: 2,
                        sensor_mode: mode(1, 3264, 2448),
                    },
                ],
            }),
        );
        metadata.set_static(MetadataTag::MountAngle, Some(2), MetadataValue::U32(90));

        let setup = CameraSetup::resolve(&metadata, &StaticTuning::default(), false).unwrap();
        assert!(setup.is_multi_camera());
        assert_eq!(setup.primary_index(), 1);
        assert_eq!(setup.index_of(0), Some(0));
        assert_eq!(setup.index_of(7), None);
        assert_eq!(setup.primary().mount_angle, 90);
        assert_eq!(setup.camera_filter(1), Some(2));
    }

    #[test]
    fn test_too_many_cameras_is_rejected() {
        let metadata = InMemoryMetadata::new();
        let cameras = (0..5)
            .map(|id| CameraConfig {
                camera_id: id,
                sensor_mode: mode(0, 640, 480),
            })
            .collect();
        metadata.set_usecase(
            MetadataTag::PhysicalCameraConfigs,
            MetadataValue::CameraConfigs(CameraConfigs {
                primary_camera_id: 0,
                cameras,
            }),
        );

        assert!(matches!(
            resolve_camera_configs(&metadata),
            Err(EisError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_reconfigure_sets_buffer_format() {
        let metadata = InMemoryMetadata::new();
        let tuning = StaticTuning::default();
        let mut setup = CameraSetup::resolve(&metadata, &tuning, false).unwrap();

        metadata.set_usecase(
            MetadataTag::SensorModeInfo,
            MetadataValue::SensorMode(mode(5, 1920, 1080)),
        );
        setup
            .reconfigure(&metadata, &tuning, false, Dimension::new(2304, 1296))
            .unwrap();
        assert_eq!(setup.primary().sensor_mode.mode_index, 5);
        assert_eq!(setup.primary().input_size, Dimension::new(2304, 1296));
    }
}
