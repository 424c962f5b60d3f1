//! Layered error definitions
//!
//! Categorized by source: config / sensor / motion / engine / metadata

use thiserror::Error;

use crate::RequestId;

/// Unified error type
#[derive(Debug, Error)]
pub enum EisError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    /// Camera topology or stream setup that the node cannot serve
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    // ===== Engine Errors =====
    /// Stabilization library could not be bound
    #[error("failed to load stabilization library '{path}': {message}")]
    LibraryLoadFailure { path: String, message: String },

    /// Stabilization engine refused its init parameters
    #[error("stabilization engine init failed: {message}")]
    AlgorithmInitFailure { message: String },

    /// Stabilization engine returned a failing status for a frame
    #[error("stabilization engine failed for request {request_id}: status {code}")]
    AlgorithmExecutionFailure { request_id: RequestId, code: i32 },

    // ===== Motion Errors =====
    /// Gyro window is empty or reversed
    #[error("invalid gyro interval: start={start_us}us end={end_us}us")]
    InvalidInterval { start_us: u64, end_us: u64 },

    /// Motion data service not registered or not responding
    #[error("motion data unavailable: {message}")]
    MotionUnavailable { message: String },

    // ===== Metadata Errors =====
    /// A tag the current step depends on has not been published
    #[error("metadata '{tag}' missing for request {request_id}")]
    MissingMetadata { tag: String, request_id: RequestId },

    /// Warp grid has an unexpected shape for the requested conversion
    #[error("grid conversion error: {message}")]
    GridConversion { message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl EisError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    pub fn library_load(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LibraryLoadFailure {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn algorithm_init(message: impl Into<String>) -> Self {
        Self::AlgorithmInitFailure {
            message: message.into(),
        }
    }

    pub fn motion_unavailable(message: impl Into<String>) -> Self {
        Self::MotionUnavailable {
            message: message.into(),
        }
    }

    pub fn missing_metadata(tag: impl Into<String>, request_id: RequestId) -> Self {
        Self::MissingMetadata {
            tag: tag.into(),
            request_id,
        }
    }

    pub fn grid_conversion(message: impl Into<String>) -> Self {
        Self::GridConversion {
            message: message.into(),
        }
    }

    /// True for failures that must abort node construction
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration { .. }
                | Self::LibraryLoadFailure { .. }
                | Self::ConfigParse { .. }
                | Self::ConfigValidation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_fields() {
        let err = EisError::InvalidInterval {
            start_us: 20,
            end_us: 10,
        };
        assert_eq!(err.to_string(), "invalid gyro interval: start=20us end=10us");

        let err = EisError::config_validation("overrides.frame_delay", "must be <= 30");
        assert!(err.to_string().contains("overrides.frame_delay"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(EisError::invalid_configuration("5 cameras").is_fatal());
        assert!(EisError::library_load("libeis3.so", "missing symbol").is_fatal());
        assert!(!EisError::algorithm_init("bad tuning").is_fatal());
        assert!(!EisError::motion_unavailable("no gyro").is_fatal());
    }
}
