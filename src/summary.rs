//! Per-run machine-readable summary.
//!
//! A `run_summary.json` is written into the target directory on both
//! success and failure, so an operator (or a later run) can see what the
//! last run did without scraping logs: which config (by digest), which
//! compose, which layer was published, and where a failed run stopped.

use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConfigSource;

/// Schema version for run_summary.json.
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier for run_summary.json.
pub const SCHEMA_ID: &str = "hybrid-compose/run_summary@1";

/// Terminal status of a run or stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failed,
    Cancelled,
    /// Stage never started because an earlier stage failed.
    Skipped,
}

/// Outcome of one pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSummary {
    /// Stage name: "config", "compose" or "layer".
    pub stage: String,
    pub status: Status,
    /// External tool exit code, when one ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Error text for failed stages, verbatim tail included.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StageSummary {
    pub fn success(stage: &str, duration_ms: u64) -> Self {
        Self {
            stage: stage.to_string(),
            status: Status::Success,
            exit_code: Some(0),
            duration_ms: Some(duration_ms),
            detail: None,
        }
    }

    pub fn failed(stage: &str, exit_code: Option<i32>, detail: String) -> Self {
        Self {
            stage: stage.to_string(),
            status: Status::Failed,
            exit_code,
            duration_ms: None,
            detail: Some(detail),
        }
    }

    pub fn cancelled(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            status: Status::Cancelled,
            exit_code: None,
            duration_ms: None,
            detail: None,
        }
    }

    pub fn skipped(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            status: Status::Skipped,
            exit_code: None,
            duration_ms: None,
            detail: None,
        }
    }
}

/// The whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub schema_version: u32,
    pub schema_id: String,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub status: Status,
    /// Provenance of the configuration this run used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigSource>,
    /// Compose id, once the compose stage succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose_id: Option<String>,
    /// Published layer path, once the layering stage succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_path: Option<String>,
    pub stages: Vec<StageSummary>,
}

impl RunSummary {
    pub fn new(run_id: String) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            run_id,
            created_at: Utc::now(),
            status: Status::Failed,
            config: None,
            compose_id: None,
            published_path: None,
            stages: Vec::new(),
        }
    }

    /// Write as pretty JSON via a temp file and rename, so a reader never
    /// sees a torn summary.
    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)
    }
}
