//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 模拟录像 e2e 测试（无需相机框架）
//! - 配置文件驱动节点

#[cfg(test)]
mod contract_tests {
    use contracts::{Phase, TargetGeometry, ICA10_GRID, ICA20_GRID};

    #[test]
    fn test_phase_ids_are_stable() {
        let phases = [
            Phase::Flush,
            Phase::Setup,
            Phase::GyroDependency,
            Phase::Execute,
            Phase::Publish,
        ];
        for (index, phase) in phases.iter().enumerate() {
            assert_eq!(phase.sequence_id(), index as i32 - 1);
        }
    }

    #[test]
    fn test_target_grid_layouts() {
        assert_eq!(TargetGeometry::default(), TargetGeometry::Ica20);
        assert_eq!(TargetGeometry::Ica10.published_grid(), ICA10_GRID);
        assert_eq!(TargetGeometry::Ica20.published_grid(), ICA20_GRID);
        assert!(TargetGeometry::GpuGrid.is_gpu());
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::Arc;

    use contracts::{
        CameraConfig, CameraConfigs, DegradeReason, DeploymentType, Dimension, EisError,
        MetadataAccessor, MetadataTag, MetadataValue, Rect, RequestId, SensorModeInfo,
        TransformBundle,
    };
    use eis_node::mock::{
        stub_transform, FenceTable, InMemoryMetadata, MockMotionService, SimulatedScheduler,
        Simulation, SimulationConfig, StaticTuning, StubEngine, StubEngineConfig,
    };
    use eis_node::{negotiate_for, EisNode, EisNodeConfig, NodeCollaborators};
    use observability::EisMetricsAggregator;

    fn record(config: SimulationConfig, frames: RequestId) -> Simulation {
        let mut sim = Simulation::new(config).unwrap();
        for request_id in 1..=frames {
            sim.submit(request_id, true);
        }
        sim.run();
        sim
    }

    fn stop(sim: &mut Simulation, end_of_stream: RequestId) {
        sim.stop_recording(end_of_stream);
        sim.run();
    }

    fn assert_complete(request_id: RequestId, bundle: &TransformBundle) {
        assert!(bundle.is_complete(), "request {request_id}: {bundle:?}");
    }

    fn expected_for(source: RequestId, input: Dimension) -> TransformBundle {
        let mut bundle = stub_transform(source, DeploymentType::IcaV20, input);
        bundle.perspective.defined_on = input;
        bundle.alignment.defined_on = input;
        bundle
    }

    #[tokio::test]
    async fn test_every_request_publishes_a_complete_bundle() {
        let failing_engine = SimulationConfig {
            engine: StubEngineConfig {
                fail_init: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let no_motion = SimulationConfig {
            motion_available: false,
            ..Default::default()
        };
        let failing_frames = SimulationConfig {
            engine: StubEngineConfig {
                fail_frames: vec![18, 19, 25],
                ..Default::default()
            },
            ..Default::default()
        };

        for config in [failing_engine, no_motion, failing_frames] {
            let mut sim = record(config, 40);
            stop(&mut sim, 40);
            for request_id in 1..=40 {
                let bundle = sim
                    .published(request_id)
                    .unwrap_or_else(|| panic!("request {request_id} never published"));
                assert_complete(request_id, &bundle);
                assert!(sim.scheduler.is_finished(request_id));
            }
        }
    }

    #[tokio::test]
    async fn test_disabled_requests_publish_identity() {
        let mut sim = Simulation::new(SimulationConfig::default()).unwrap();
        for request_id in 1..=40 {
            sim.submit(request_id, request_id % 5 != 0);
        }
        sim.run();
        stop(&mut sim, 40);

        let identity = sim.node.identity().bundle(sim.node.stream().input);
        for request_id in (5..=40).step_by(5) {
            assert_eq!(sim.published(request_id), Some(identity.clone()));
        }
        for request_id in 1..=40 {
            assert_complete(request_id, &sim.published(request_id).unwrap());
        }
    }

    #[tokio::test]
    async fn test_published_bundle_comes_from_lookahead_frame() {
        let sim = record(SimulationConfig::default(), 40);
        let lookahead = sim.node.lookahead();
        let input = sim.node.stream().input;
        assert_eq!(lookahead, 15);

        for request_id in 1..=(40 - lookahead) {
            assert_eq!(
                sim.published(request_id),
                Some(expected_for(request_id + lookahead, input)),
                "request {request_id}"
            );
        }
        // partners not seen yet
        assert!(sim.published(40 - lookahead + 1).is_none());
    }

    #[tokio::test]
    async fn test_engine_sees_frames_in_order() {
        let deferred = SimulationConfig {
            deferred_gyro: true,
            ..Default::default()
        };
        let sim = record(deferred, 40);
        let calls = sim.engine_calls();
        assert_eq!(calls.len(), 40);
        assert!(calls.windows(2).all(|w| w[0] < w[1]), "{calls:?}");

        // dispatched newest first, still executed oldest first
        let mut sim = Simulation::new(SimulationConfig::default()).unwrap();
        for request_id in (1..=30).rev() {
            sim.submit(request_id, true);
        }
        sim.run();
        let calls = sim.engine_calls();
        assert_eq!(calls, (1..=30).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_drain_publishes_everything_up_to_end_of_stream() {
        for frames in [16, 20, 31, 45, 90] {
            let mut sim = Simulation::new(SimulationConfig::default()).unwrap();
            for request_id in 1..=frames {
                sim.submit(request_id, request_id % 7 != 0);
            }
            sim.run();
            stop(&mut sim, frames);

            for request_id in 1..=frames {
                assert!(sim.published(request_id).is_some(), "{frames}: {request_id}");
                assert!(sim.scheduler.is_finished(request_id), "{frames}: {request_id}");
            }
            assert!(sim.scheduler.parked().is_empty());
            let ring = sim.node.ring().unwrap();
            assert_eq!(ring.pending_continuations(), 0);
            assert_eq!(ring.last_published(), frames);
            ring.with_state(|state| {
                assert!((1..=frames).all(|id| state.read(id).is_some()), "{frames}");
            });

            let mut metrics = EisMetricsAggregator::new();
            for outcome in sim.outcomes() {
                metrics.update(outcome);
            }
            assert_eq!(metrics.summary().published, frames);
        }
    }

    #[tokio::test]
    async fn test_invalid_interval_writes_identity_transform() {
        let mut sim = Simulation::new(SimulationConfig::default()).unwrap();
        for request_id in 1..=30 {
            sim.submit(request_id, true);
            if request_id == 20 {
                sim.metadata
                    .set(MetadataTag::FrameDuration, 20, MetadataValue::U64(0));
                sim.metadata
                    .set(MetadataTag::ExposureTime, 20, MetadataValue::U64(0));
            }
        }
        sim.run();

        let identity = sim.node.identity().bundle(sim.node.stream().input);
        assert_eq!(sim.published(5), Some(identity));
        assert_ne!(sim.published(4), sim.published(5));
        assert!(sim
            .outcomes()
            .iter()
            .filter(|o| o.request_id == 20)
            .any(|o| o.degraded == Some(DegradeReason::InvalidInterval)));
    }

    #[test]
    fn test_margin_negotiation_is_idempotent() {
        let config = EisNodeConfig::default();
        let output = Dimension::new(1920, 1080);
        let first = negotiate_for(config.calibration.as_ref(), &config.overrides, output, 30);
        let second = negotiate_for(config.calibration.as_ref(), &config.overrides, output, 30);
        assert_eq!(first, second);

        let sim = Simulation::new(SimulationConfig::default()).unwrap();
        assert_eq!(sim.node.negotiation(), first);
        assert_eq!(
            sim.metadata.get_usecase(MetadataTag::FrameDelay),
            Some(MetadataValue::U32(first.lookahead))
        );
    }

    #[tokio::test]
    async fn test_first_frames_wait_for_their_partner() {
        let config = SimulationConfig {
            engine: StubEngineConfig {
                not_processed_below: 15,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut sim = record(config, 15);
        assert_eq!(sim.node.lookahead(), 15);
        assert_eq!(sim.node.negotiation().queue_depth, 23);
        for request_id in 1..=5 {
            assert!(sim.published(request_id).is_none());
        }

        sim.submit(16, true);
        sim.run();
        let input = sim.node.stream().input;
        assert_eq!(sim.published(1), Some(expected_for(16, input)));
        assert!(sim.published(2).is_none());
    }

    #[test]
    fn test_five_cameras_fail_creation() {
        let metadata = Arc::new(InMemoryMetadata::new());
        let fences = Arc::new(FenceTable::new());
        let sensor = SensorModeInfo {
            mode_index: 0,
            frame_dimension: Dimension::new(4000, 3000),
            active_array_crop_window: Rect::full(Dimension::new(4000, 3000)),
            binning: 1,
            frame_rate: 30.0,
        };
        metadata.set_usecase(
            MetadataTag::PhysicalCameraConfigs,
            MetadataValue::CameraConfigs(CameraConfigs {
                primary_camera_id: 0,
                cameras: (0..5)
                    .map(|camera_id| CameraConfig {
                        camera_id,
                        sensor_mode: sensor,
                    })
                    .collect(),
            }),
        );

        let result = EisNode::create(
            EisNodeConfig::default(),
            NodeCollaborators {
                metadata: metadata.clone(),
                motion: Arc::new(MockMotionService::new(fences.clone())),
                scheduler: Arc::new(SimulatedScheduler::new(metadata, fences)),
                tuning: Arc::new(StaticTuning::default()),
                engine: Some(Box::new(StubEngine::new(StubEngineConfig::default()))),
            },
        );
        assert!(matches!(result, Err(EisError::InvalidConfiguration { .. })));
    }
}

#[cfg(test)]
mod config_tests {
    use std::io::Write;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::TargetGeometry;
    use eis_node::mock::{Simulation, SimulationConfig};

    const GPU_CONFIG: &str = r#"
target = "gpu_grid"
realtime = false

[overrides]
frame_delay = 20
"#;

    #[test]
    fn test_config_file_drives_the_node() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(GPU_CONFIG.as_bytes()).unwrap();

        let node = ConfigLoader::load_from_path(file.path()).unwrap();
        assert_eq!(node.target, TargetGeometry::GpuGrid);
        let toml = ConfigLoader::to_toml(&node).unwrap();
        let round_trip = ConfigLoader::load_from_str(&toml, ConfigFormat::Toml).unwrap();
        assert_eq!(round_trip, node);

        let mut sim = Simulation::new(SimulationConfig {
            node,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(sim.node.lookahead(), 20);
        assert_eq!(sim.node.negotiation().queue_depth, 28);

        for request_id in 1..=25 {
            sim.submit(request_id, true);
        }
        sim.run();
        let grid = sim.published(1).unwrap().grid;
        assert!(grid.enable);
        assert_eq!(grid.geometry, TargetGeometry::GpuGrid.published_grid());
    }
}
