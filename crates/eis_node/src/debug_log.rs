//! Per-recording debug log.
//!
//! One JSON line per processed frame, buffered in a `BytesMut` and written to
//! `<dir>/<prefix>.jsonl`. The logcat flags mirror each record as tracing events.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};
use chrono::NaiveDateTime;
use contracts::{
    Dimension, DumpSettings, EisError, EngineInput, EngineOutput, OisMode, ProcessStatus,
    RequestId, WindowRegions,
};
use serde::Serialize;

const FLUSH_THRESHOLD: usize = 64 * 1024;

/// Gyro and crop input of one frame
#[derive(Debug, Clone, Serialize)]
pub struct InputSummary {
    pub gyro_samples: usize,
    pub first_ts_us: Option<u64>,
    pub last_ts_us: Option<u64>,
    pub focus_distance: f32,
    pub window_regions: WindowRegions,
    pub sat: bool,
}

impl From<&EngineInput> for InputSummary {
    fn from(input: &EngineInput) -> Self {
        Self {
            gyro_samples: input.gyro.len(),
            first_ts_us: input.gyro.first().map(|s| s.ts_us),
            last_ts_us: input.gyro.last().map(|s| s.ts_us),
            focus_distance: input.focus_distance,
            window_regions: input.window_regions,
            sat: input.sat_transform.is_some(),
        }
    }
}

/// Engine result of one frame
#[derive(Debug, Clone, Serialize)]
pub struct OutputSummary {
    pub status: &'static str,
    pub has_output: bool,
    pub perspective_enabled: bool,
    pub grid_enabled: bool,
    pub confidence: u32,
    pub ois_mode: OisMode,
}

impl From<&EngineOutput> for OutputSummary {
    fn from(output: &EngineOutput) -> Self {
        Self {
            status: match output.status {
                ProcessStatus::Success => "success",
                ProcessStatus::NotProcessed => "not_processed",
                ProcessStatus::Failed(_) => "failed",
            },
            has_output: output.has_output,
            perspective_enabled: output.transform.perspective.enable,
            grid_enabled: output.transform.grid.enable,
            confidence: output.transform.perspective.confidence,
            ois_mode: output.ois_mode,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameRecord {
    pub request_id: RequestId,
    pub frame_id: u64,
    pub sensor_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<InputSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputSummary>,
}

pub struct DebugLog {
    dir: Option<PathBuf>,
    dump: DumpSettings,
    prefix: Option<String>,
    file: Option<File>,
    path: Option<PathBuf>,
    buffer: BytesMut,
    records: u64,
}

impl std::fmt::Debug for DebugLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugLog")
            .field("path", &self.path)
            .field("buffered", &self.buffer.len())
            .field("records", &self.records)
            .finish()
    }
}

impl DebugLog {
    pub fn new(dir: Option<PathBuf>, dump: DumpSettings) -> Self {
        if dump.force_flush && dump.any_file() {
            tracing::warn!("Debug log force flush enabled, expect frame time overhead");
        }
        Self {
            dir,
            dump,
            prefix: None,
            file: None,
            path: None,
            buffer: BytesMut::with_capacity(FLUSH_THRESHOLD),
            records: 0,
        }
    }

    /// Any dump flag set
    pub fn is_enabled(&self) -> bool {
        self.dump.any()
    }

    fn writes_file(&self) -> bool {
        self.dir.is_some() && self.dump.any_file()
    }

    /// File prefix of a recording: `VID_YYYYMMDD_HHMMSS_<w>x<h>`
    pub fn prefix_for(at: NaiveDateTime, output: Dimension) -> String {
        format!(
            "{}_{}x{}",
            at.format("VID_%Y%m%d_%H%M%S"),
            output.width,
            output.height
        )
    }

    /// Prefix for the next file, set once the engine is up
    pub fn set_prefix(&mut self, prefix: String) {
        self.prefix = Some(prefix);
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Open `<dir>/<prefix>.jsonl`, no-op without a directory or file dumps
    pub fn open(&mut self, prefix: Option<String>) -> Result<(), EisError> {
        if !self.writes_file() || self.is_open() {
            return Ok(());
        }
        let Some(dir) = self.dir.clone() else {
            return Ok(());
        };
        if let Some(prefix) = prefix {
            self.prefix = Some(prefix);
        }
        let prefix = self.prefix.clone().unwrap_or_else(|| "VID".to_string());

        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{prefix}.jsonl"));
        self.file = Some(File::create(&path)?);
        tracing::info!(path = %path.display(), "Debug log opened");
        self.path = Some(path);
        self.records = 0;
        Ok(())
    }

    /// Append one frame, mirrored to tracing when the log flags are set
    pub fn write_frame(&mut self, record: &FrameRecord) -> Result<(), EisError> {
        if self.dump.input_log {
            if let Some(input) = &record.input {
                tracing::debug!(
                    target: "eisv3::debug_log",
                    request_id = record.request_id,
                    gyro_samples = input.gyro_samples,
                    first_ts_us = ?input.first_ts_us,
                    last_ts_us = ?input.last_ts_us,
                    "frame input"
                );
            }
        }
        if self.dump.output_log {
            if let Some(output) = &record.output {
                tracing::debug!(
                    target: "eisv3::debug_log",
                    request_id = record.request_id,
                    frame_id = record.frame_id,
                    status = output.status,
                    has_output = output.has_output,
                    confidence = output.confidence,
                    "frame output"
                );
            }
        }

        if !self.is_open() {
            return Ok(());
        }

        let filtered = FrameRecord {
            input: record.input.clone().filter(|_| self.dump.input_file),
            output: record.output.clone().filter(|_| self.dump.output_file),
            ..record.clone()
        };
        let mut writer = (&mut self.buffer).writer();
        serde_json::to_writer(&mut writer, &filtered)
            .map_err(|e| EisError::Other(format!("debug log record: {e}")))?;
        self.buffer.put_u8(b'\n');
        self.records += 1;

        if self.dump.force_flush || self.buffer.len() >= FLUSH_THRESHOLD {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), EisError> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(&self.buffer)?;
            file.flush()?;
        }
        self.buffer.clear();
        Ok(())
    }

    /// Flush and close, returns the number of records written
    pub fn close(&mut self) -> Result<u64, EisError> {
        if !self.is_open() {
            return Ok(0);
        }
        self.flush()?;
        self.file = None;
        tracing::info!(records = self.records, path = ?self.path, "Debug log closed");
        Ok(self.records)
    }
}

impl Drop for DebugLog {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Failed to close debug log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use contracts::{MotionSample, TransformBundle};

    fn dump_files() -> DumpSettings {
        DumpSettings {
            input_file: true,
            output_file: true,
            ..Default::default()
        }
    }

    fn record(request_id: RequestId) -> FrameRecord {
        let mut input = EngineInput::frame_only(request_id);
        input.gyro = vec![
            MotionSample {
                data: [0.0; 4],
                ts_us: 10,
            },
            MotionSample {
                data: [0.0; 4],
                ts_us: 20,
            },
        ];
        let output = EngineOutput {
            status: ProcessStatus::Success,
            has_output: true,
            transform: TransformBundle::disabled(),
            ois_mode: OisMode::Inactive,
        };
        FrameRecord {
            request_id,
            frame_id: request_id,
            sensor_index: 0,
            input: Some(InputSummary::from(&input)),
            output: Some(OutputSummary::from(&output)),
        }
    }

    #[test]
    fn test_prefix_format() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_opt(7, 5, 1))
            .unwrap();
        assert_eq!(
            DebugLog::prefix_for(at, Dimension::new(1920, 1080)),
            "VID_20240309_070501_1920x1080"
        );
    }

    #[test]
    fn test_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = DebugLog::new(Some(dir.path().to_path_buf()), dump_files());
        log.open(Some("VID_test".to_string())).unwrap();
        assert!(log.is_open());

        log.write_frame(&record(1)).unwrap();
        log.write_frame(&record(2)).unwrap();
        assert_eq!(log.close().unwrap(), 2);

        let content = fs::read_to_string(dir.path().join("VID_test.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["request_id"], 1);
        assert_eq!(first["input"]["gyro_samples"], 2);
        assert_eq!(first["output"]["status"], "success");
    }

    #[test]
    fn test_output_only_dump_skips_input() {
        let dir = tempfile::tempdir().unwrap();
        let dump = DumpSettings {
            output_file: true,
            force_flush: true,
            ..Default::default()
        };
        let mut log = DebugLog::new(Some(dir.path().to_path_buf()), dump);
        log.open(None).unwrap();
        log.write_frame(&record(3)).unwrap();

        // force flush writes through without closing
        let path = log.path().unwrap().to_path_buf();
        let content = fs::read_to_string(path).unwrap();
        let line: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert!(line.get("input").is_none());
        assert!(line.get("output").is_some());
    }

    #[test]
    fn test_disabled_without_directory() {
        let mut log = DebugLog::new(None, dump_files());
        log.open(Some("x".to_string())).unwrap();
        assert!(!log.is_open());
        log.write_frame(&record(1)).unwrap();
        assert_eq!(log.close().unwrap(), 0);
    }
}
