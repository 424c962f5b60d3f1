//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::EisNodeConfig;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    target: String,
    realtime: bool,
    bypassable: bool,
    input_path: String,
    calibrated: bool,
    library: Option<String>,
    frame_delay_override: Option<u32>,
}

impl From<&EisNodeConfig> for ConfigSummary {
    fn from(config: &EisNodeConfig) -> Self {
        Self {
            target: format!("{:?}", config.target),
            realtime: config.realtime,
            bypassable: config.bypassable,
            input_path: format!("{:?}", config.input_path),
            calibrated: config.calibration.is_some(),
            library: config
                .library_path
                .as_ref()
                .map(|p| p.display().to_string()),
            frame_delay_override: config.overrides.frame_delay(),
        }
    }
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let config_path = args.config.display().to_string();
    let result = match super::load_config(&args.config) {
        Ok(config) => ValidationResult {
            valid: true,
            config_path,
            error: None,
            warnings: config_loader::warnings(&config),
            summary: Some(ConfigSummary::from(&config)),
        },
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("{e:#}")),
            warnings: Vec::new(),
            summary: None,
        },
    };

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{json}");
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn print_validation_result(result: &ValidationResult) {
    if !result.valid {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {error}");
        }
        return;
    }

    println!("✓ Configuration is valid: {}", result.config_path);
    if let Some(ref summary) = result.summary {
        println!("\n  Target: {}", summary.target);
        println!("  Realtime: {}", summary.realtime);
        println!("  Bypassable: {}", summary.bypassable);
        println!("  Input path: {}", summary.input_path);
        println!("  Calibrated: {}", summary.calibrated);
        println!(
            "  Library: {}",
            summary.library.as_deref().unwrap_or("(none)")
        );
        if let Some(delay) = summary.frame_delay_override {
            println!("  Frame delay override: {delay}");
        }
    }

    if !result.warnings.is_empty() {
        println!("\n⚠ Warnings:");
        for warning in &result.warnings {
            println!("  - {warning}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_validate_accepts_valid_config() {
        let file = config_file("target = \"ica30\"\n");
        let args = ValidateArgs {
            config: file.path().to_path_buf(),
            json: true,
        };
        assert!(run_validate(&args).is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_override() {
        let file = config_file("[overrides]\nframe_delay = 99\n");
        let args = ValidateArgs {
            config: file.path().to_path_buf(),
            json: false,
        };
        assert!(run_validate(&args).is_err());
    }

    #[test]
    fn test_validate_missing_file() {
        let args = ValidateArgs {
            config: "does/not/exist.toml".into(),
            json: false,
        };
        assert!(run_validate(&args).is_err());
    }
}
