//! `simulate` command implementation.

use anyhow::{Context, Result};
use contracts::Dimension;
use eis_node::mock::SimulationConfig;
use tracing::{info, warn};

use super::info::NodeInfo;
use crate::cli::SimulateArgs;
use crate::simulation::{RecordingPlan, SimulationDriver};

/// Execute the `simulate` command
pub async fn run_simulate(args: &SimulateArgs) -> Result<()> {
    let config = super::load_config(&args.config)?;
    let plan = RecordingPlan::new(args.frames, args.stop_at, args.disable_every)?;
    let node_info = NodeInfo::resolve(&config, args.stream);

    if config.library_path.is_some() {
        info!("Simulation drives the stub engine, library_path is ignored");
    }
    let sim_config = SimulationConfig {
        node: eis_node::EisNodeConfig {
            library_path: None,
            ..config
        },
        input: node_info.input,
        output: Dimension::new(args.stream.width, args.stream.height),
        fps: args.stream.fps,
        motion_available: !args.no_motion,
        ..Default::default()
    };

    info!(
        frames = plan.frames,
        stop_at = plan.stop_at,
        lookahead = node_info.lookahead,
        input_width = node_info.input.width,
        input_height = node_info.input.height,
        "Starting simulation"
    );

    let driver = SimulationDriver::new(sim_config, plan)?;
    let mut task = tokio::spawn(driver.run());

    tokio::select! {
        joined = &mut task => {
            let stats = joined.context("Simulation task failed")?;
            info!(
                published = stats.published_requests,
                last_published = stats.last_published,
                engine_calls = stats.engine_calls,
                "Simulation completed"
            );
            stats.print_summary();
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Received Ctrl-C, aborting simulation");
            task.abort();
        }
    }
    Ok(())
}
