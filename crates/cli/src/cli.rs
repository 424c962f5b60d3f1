//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// EISv3 - per-frame video stabilization node
#[derive(Parser, Debug)]
#[command(
    name = "eisv3",
    author,
    version,
    about = "EISv3 stabilization node tooling",
    long_about = "Validates and inspects EISv3 node configurations and drives a simulated\n\
                  recording through the node with in-memory metadata, gyro and engine."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "EISV3_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "EISV3_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default level when `RUST_LOG` is unset
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate a node configuration file
    Validate(ValidateArgs),

    /// Show the negotiated lookahead, margins and publish list
    Info(InfoArgs),

    /// Drive a simulated recording through the node
    Simulate(SimulateArgs),
}

#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "eis.toml", env = "EISV3_CONFIG")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "eis.toml", env = "EISV3_CONFIG")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub stream: StreamArgs,
}

/// Video stream the node is configured for
#[derive(Args, Debug, Clone, Copy)]
pub struct StreamArgs {
    /// Stabilized output width
    #[arg(long, default_value = "1920")]
    pub width: u32,

    /// Stabilized output height
    #[arg(long, default_value = "1080")]
    pub height: u32,

    /// Target frame rate
    #[arg(long, default_value = "30")]
    pub fps: u32,
}

#[derive(Parser, Debug, Clone)]
pub struct SimulateArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "eis.toml", env = "EISV3_CONFIG")]
    pub config: PathBuf,

    #[command(flatten)]
    pub stream: StreamArgs,

    /// Number of requests to dispatch
    #[arg(long, default_value = "120")]
    pub frames: u64,

    /// Stop recording after this request (default: last frame)
    #[arg(long)]
    pub stop_at: Option<u64>,

    /// Turn stabilization off on every M-th request (0 = never)
    #[arg(long, default_value = "0")]
    pub disable_every: u64,

    /// Run without a gyro
    #[arg(long)]
    pub no_motion: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "EISV3_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simulate() {
        let cli = Cli::try_parse_from([
            "eisv3",
            "-v",
            "simulate",
            "--config",
            "node.toml",
            "--frames",
            "60",
            "--stop-at",
            "40",
            "--no-motion",
        ])
        .unwrap();
        assert_eq!(cli.log_level(), "debug");
        let Commands::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.frames, 60);
        assert_eq!(args.stop_at, Some(40));
        assert!(args.no_motion);
        assert_eq!(args.disable_every, 0);
        assert_eq!(args.stream.width, 1920);
        assert_eq!(args.stream.fps, 30);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["eisv3", "-q", "-v", "info"]).is_err());
        let cli = Cli::try_parse_from(["eisv3", "-q", "info"]).unwrap();
        assert_eq!(cli.log_level(), "warn");
    }
}
