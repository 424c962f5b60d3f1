//! # Config Loader
//!
//! 配置加载器：读取 EIS 节点配置。
//!
//! 负责：
//! - 解析 TOML/JSON 配置文件
//! - 校验 override 与标定参数的取值范围
//! - 输出 `EisNodeConfig`
//!
//! # 示例
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let config = ConfigLoader::load_from_path(Path::new("eis.toml")).unwrap();
//! println!("Target: {:?}", config.target);
//! ```

mod parser;
mod validator;

pub use contracts::EisNodeConfig;
pub use parser::ConfigFormat;
pub use validator::warnings;

use contracts::EisError;
use std::path::Path;

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从文件路径加载配置
    ///
    /// 格式由扩展名决定（.toml / .json）。
    ///
    /// # Errors
    /// - 文件读取失败
    /// - 不支持的格式
    /// - 解析失败
    /// - 校验失败
    pub fn load_from_path(path: &Path) -> Result<EisNodeConfig, EisError> {
        let format = Self::detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content, format)
    }

    /// 从字符串加载配置
    pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<EisNodeConfig, EisError> {
        let config = parser::parse(content, format)?;
        validator::validate(&config)?;
        Ok(config)
    }

    pub fn to_toml(config: &EisNodeConfig) -> Result<String, EisError> {
        toml::to_string_pretty(config)
            .map_err(|e| EisError::config_parse(format!("TOML serialize error: {e}")))
    }

    pub fn to_json(config: &EisNodeConfig) -> Result<String, EisError> {
        serde_json::to_string_pretty(config)
            .map_err(|e| EisError::config_parse(format!("JSON serialize error: {e}")))
    }

    fn detect_format(path: &Path) -> Result<ConfigFormat, EisError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| EisError::config_parse("cannot determine file format from extension"))?;

        ConfigFormat::from_extension(ext)
            .ok_or_else(|| EisError::config_parse(format!("unsupported config format: .{ext}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::TargetGeometry;
    use std::io::Write;

    const NODE_TOML: &str = r#"
target = "ica20"
realtime = true
fovc_enabled = true

[overrides]
frame_delay = 12
ldc_grid_enabled = false
operation_mode = "regular"

[calibration]
minimal_total_margin = 0.1
gyro_frequency = 400

[calibration.fhd]
fps30 = { margin_y = 0.1, frame_delay = 10 }
fps60 = { margin_y = 0.12, frame_delay = 12 }
fps_high = { margin_y = 0.15, frame_delay = 14 }

[calibration.uhd4k]
fps30 = { margin_y = 0.1, frame_delay = 10 }
fps60 = { margin_y = 0.1, frame_delay = 10 }
fps_high = { margin_y = 0.1, frame_delay = 10 }

[calibration.uhd8k]
fps30 = { margin_y = 0.05, frame_delay = 8 }
fps60 = { margin_y = 0.05, frame_delay = 8 }
fps_high = { margin_y = 0.05, frame_delay = 8 }
"#;

    #[test]
    fn test_load_from_str_toml() {
        let config = ConfigLoader::load_from_str(NODE_TOML, ConfigFormat::Toml).unwrap();
        assert_eq!(config.target, TargetGeometry::Ica20);
        assert_eq!(config.overrides.frame_delay(), Some(12));
        assert!(!config.overrides.ldc_grid_enabled);
        let calibration = config.calibration.unwrap();
        assert_eq!(calibration.gyro_frequency, 400);
        assert_eq!(calibration.tier(1080, 60).frame_delay, 12);
    }

    #[test]
    fn test_round_trip_toml() {
        let config = ConfigLoader::load_from_str(NODE_TOML, ConfigFormat::Toml).unwrap();
        let serialized = ConfigLoader::to_toml(&config).unwrap();
        let again = ConfigLoader::load_from_str(&serialized, ConfigFormat::Toml).unwrap();
        assert_eq!(config, again);
    }

    #[test]
    fn test_round_trip_json() {
        let config = ConfigLoader::load_from_str(NODE_TOML, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&config).unwrap();
        let again = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(config, again);
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let content = "[overrides]\nframe_delay = 45\n";
        let err = ConfigLoader::load_from_str(content, ConfigFormat::Toml).unwrap_err();
        assert!(matches!(err, EisError::ConfigValidation { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(NODE_TOML.as_bytes()).unwrap();
        let config = ConfigLoader::load_from_path(file.path()).unwrap();
        assert!(config.fovc_enabled);

        let other = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let err = ConfigLoader::load_from_path(other.path()).unwrap_err();
        assert!(err.to_string().contains("unsupported"), "got: {err}");
    }
}
