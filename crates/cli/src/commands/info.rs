//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{Dimension, EisNodeConfig, MarginRatio};
use eis_node::{gyro_frequency, min_total_margins, negotiate_for, MarginNegotiation};
use serde::Serialize;
use tracing::info;

use crate::cli::{InfoArgs, StreamArgs};

/// Negotiated node parameters for JSON output
#[derive(Debug, Serialize)]
pub(crate) struct NodeInfo {
    pub target: String,
    pub output: Dimension,
    pub fps: u32,
    pub lookahead: u32,
    pub queue_depth: u32,
    pub requested_margin: MarginRatio,
    pub minimal_total_margin: MarginRatio,
    /// Engine input size implied by the requested margin
    pub input: Dimension,
    pub gyro_frequency_hz: u32,
    pub publish_tags: Vec<&'static str>,
}

impl NodeInfo {
    pub fn resolve(config: &EisNodeConfig, stream: StreamArgs) -> Self {
        let output = Dimension::new(stream.width, stream.height);
        let negotiation = negotiate_for(
            config.calibration.as_ref(),
            &config.overrides,
            output,
            stream.fps,
        );
        Self {
            target: format!("{:?}", config.target),
            output,
            fps: stream.fps,
            lookahead: negotiation.lookahead,
            queue_depth: negotiation.queue_depth,
            requested_margin: negotiation.requested,
            minimal_total_margin: min_total_margins(config.calibration.as_ref()),
            input: input_for(output, &negotiation),
            gyro_frequency_hz: gyro_frequency(config.calibration.as_ref()),
            publish_tags: config
                .target
                .publish_tags()
                .iter()
                .map(|tag| tag.name())
                .collect(),
        }
    }
}

/// Output grown by the requested margin, even on both axes
pub(crate) fn input_for(output: Dimension, negotiation: &MarginNegotiation) -> Dimension {
    let grow = |size: u32, margin: f32| ((size as f32 * (1.0 + margin)).round() as u32) & !1;
    Dimension::new(
        grow(output.width, negotiation.requested.width),
        grow(output.height, negotiation.requested.height),
    )
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    let config = super::load_config(&args.config)?;
    let node_info = NodeInfo::resolve(&config, args.stream);

    if args.json {
        let json =
            serde_json::to_string_pretty(&node_info).context("Failed to serialize node info")?;
        println!("{json}");
    } else {
        print_node_info(&node_info);
    }
    Ok(())
}

fn print_node_info(info: &NodeInfo) {
    println!("EISv3 node");
    println!("   ├─ Target: {}", info.target);
    println!(
        "   ├─ Output: {}x{} @ {} fps",
        info.output.width, info.output.height, info.fps
    );
    println!(
        "   ├─ Input: {}x{}",
        info.input.width, info.input.height
    );
    println!("   ├─ Lookahead: {} frames", info.lookahead);
    println!("   ├─ Queue depth: {}", info.queue_depth);
    println!(
        "   ├─ Requested margin: {:.4} x {:.4}",
        info.requested_margin.width, info.requested_margin.height
    );
    println!(
        "   ├─ Minimal total margin: {:.4} x {:.4}",
        info.minimal_total_margin.width, info.minimal_total_margin.height
    );
    println!("   ├─ Gyro frequency: {} Hz", info.gyro_frequency_hz);
    println!("   └─ Publishes: {}", info.publish_tags.join(", "));
    println!();
}
