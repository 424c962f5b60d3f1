//! Node config validation.
//!
//! Rules:
//! - override margins are unset (`-1`) or in `[0, 1)`
//! - override and calibration frame delays at most `MAX_FRAME_DELAY`
//! - calibration margins in `[0, 1)`
//! - library path non-empty when given

use contracts::{EisError, EisNodeConfig, MAX_FRAME_DELAY};
use validator::{Validate, ValidationErrors};

/// Validate a node config, returns the first error found
pub fn validate(config: &EisNodeConfig) -> Result<(), EisError> {
    validate_overrides(config)?;
    validate_calibration(config)?;
    validate_paths(config)?;
    Ok(())
}

/// Settings that are legal but worth pointing out
pub fn warnings(config: &EisNodeConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    let dump = &config.overrides.dump;
    if config.library_path.is_none() {
        warnings.push("no library_path, every frame gets the identity transform".to_string());
    }
    if config.overrides.default_grid_transform {
        warnings.push("default_grid_transform is set, stabilization is bypassed".to_string());
    }
    if dump.any_file() && config.debug_log_dir.is_none() {
        warnings.push("dump to file requested without debug_log_dir, nothing is written".to_string());
    }
    if dump.force_flush {
        warnings.push("force_flush flushes the debug log after every frame".to_string());
    }
    if config.calibration.is_none() {
        warnings.push("no calibration, using default margins and frame delay".to_string());
    }
    warnings
}

fn validate_overrides(config: &EisNodeConfig) -> Result<(), EisError> {
    let overrides = &config.overrides;
    overrides
        .validate()
        .map_err(|e| first_error("overrides", &e))?;

    for (field, value) in [
        ("overrides.width_margin", overrides.width_margin),
        ("overrides.height_margin", overrides.height_margin),
    ] {
        if value != -1.0 && value < 0.0 {
            return Err(EisError::config_validation(
                field,
                format!("margin must be -1 (unset) or in [0, 1), got {value}"),
            ));
        }
    }
    Ok(())
}

fn validate_calibration(config: &EisNodeConfig) -> Result<(), EisError> {
    let Some(calibration) = &config.calibration else {
        return Ok(());
    };

    let minimal = calibration.minimal_total_margin;
    if !(0.0..1.0).contains(&minimal) {
        return Err(EisError::config_validation(
            "calibration.minimal_total_margin",
            format!("must be in [0, 1), got {minimal}"),
        ));
    }

    for (name, tier) in calibration.tiers() {
        tier.validate()
            .map_err(|e| first_error(&format!("calibration.{name}"), &e))?;
        if tier.frame_delay > MAX_FRAME_DELAY {
            return Err(EisError::config_validation(
                format!("calibration.{name}.frame_delay"),
                format!("must be <= {MAX_FRAME_DELAY}, got {}", tier.frame_delay),
            ));
        }
    }
    Ok(())
}

fn validate_paths(config: &EisNodeConfig) -> Result<(), EisError> {
    if config
        .library_path
        .as_ref()
        .is_some_and(|path| path.as_os_str().is_empty())
    {
        return Err(EisError::config_validation(
            "library_path",
            "library path cannot be empty",
        ));
    }
    Ok(())
}

/// Flatten a validator report into the first offending field
fn first_error(prefix: &str, errors: &ValidationErrors) -> EisError {
    let field_errors = errors.field_errors();
    let mut fields: Vec<_> = field_errors.iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    match fields.first() {
        Some((field, errs)) => {
            let detail = errs
                .first()
                .map(|e| format!("out of range ({})", e.code))
                .unwrap_or_else(|| "invalid".to_string());
            EisError::config_validation(format!("{prefix}.{field}"), detail)
        }
        None => EisError::config_validation(prefix, errors.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{EisCalibration, FpsTierTable, MarginTier};
    use std::path::PathBuf;

    fn tier(margin_y: f32, frame_delay: u32) -> MarginTier {
        MarginTier {
            margin_y,
            frame_delay,
        }
    }

    fn calibration() -> EisCalibration {
        let table = FpsTierTable {
            fps30: tier(0.1, 10),
            fps60: tier(0.12, 12),
            fps_high: tier(0.15, 14),
        };
        EisCalibration {
            minimal_total_margin: 0.1,
            gyro_frequency: 500,
            fhd: table,
            uhd4k: table,
            uhd8k: table,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&EisNodeConfig::default()).is_ok());
    }

    #[test]
    fn test_override_margin_range() {
        let mut config = EisNodeConfig::default();
        config.overrides.width_margin = 0.3;
        assert!(validate(&config).is_ok());

        config.overrides.width_margin = -0.5;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("overrides.width_margin"), "got: {err}");

        config.overrides.width_margin = -1.0;
        config.overrides.height_margin = 1.0;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("height_margin"), "got: {err}");
    }

    #[test]
    fn test_override_frame_delay_cap() {
        let mut config = EisNodeConfig::default();
        config.overrides.frame_delay = 30;
        assert!(validate(&config).is_ok());
        config.overrides.frame_delay = 31;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("frame_delay"), "got: {err}");
    }

    #[test]
    fn test_calibration_ranges() {
        let mut config = EisNodeConfig {
            calibration: Some(calibration()),
            ..Default::default()
        };
        assert!(validate(&config).is_ok());

        if let Some(calibration) = config.calibration.as_mut() {
            calibration.uhd4k.fps60 = tier(1.2, 10);
        }
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("calibration.uhd4k.fps60"), "got: {err}");

        if let Some(calibration) = config.calibration.as_mut() {
            calibration.uhd4k.fps60 = tier(0.1, 10);
            calibration.minimal_total_margin = 1.0;
        }
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("minimal_total_margin"), "got: {err}");
    }

    #[test]
    fn test_empty_library_path() {
        let config = EisNodeConfig {
            library_path: Some(PathBuf::new()),
            ..Default::default()
        };
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, EisError::ConfigValidation { .. }));
    }

    #[test]
    fn test_warnings() {
        let mut config = EisNodeConfig::default();
        config.overrides.dump.output_file = true;
        config.overrides.dump.force_flush = true;
        let warnings = warnings(&config);
        assert!(warnings.iter().any(|w| w.contains("debug_log_dir")));
        assert!(warnings.iter().any(|w| w.contains("force_flush")));
        assert!(warnings.iter().any(|w| w.contains("library_path")));
    }
}
