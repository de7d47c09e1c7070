use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::catalog::OsintTool;

pub type ScanId = String;

pub const CANCELLED_MESSAGE: &str = "Cancelled by user";

/// Targets reach the tool as a positional argument, so a leading dash would be
/// parsed as an option.
pub fn is_option_like(target: &str) -> bool {
    target.starts_with('-')
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Error => "error",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Error)
    }
}

/// Body of `POST /api/osint/scan`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub options: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub id: ScanId,
    pub tool: String,
    pub tool_name: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
    pub status: ScanStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Milliseconds between start and end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
}

impl ScanRecord {
    pub fn new(tool: &OsintTool, target: String, options: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tool: tool.id.clone(),
            tool_name: tool.name.clone(),
            target,
            options,
            status: ScanStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            duration: None,
            results: None,
            error: None,
            output_file: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = ScanStatus::Running;
    }

    pub fn mark_completed(&mut self, results: Value, output_file: Option<String>) {
        self.status = ScanStatus::Completed;
        self.results = Some(results);
        self.output_file = output_file;
        self.error = None;
        self.finish(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = ScanStatus::Error;
        self.error = Some(error.into());
        self.finish(Utc::now());
    }

    fn finish(&mut self, at: DateTime<Utc>) {
        let elapsed = (at - self.start_time).num_milliseconds().max(0);
        self.end_time = Some(at);
        self.duration = Some(elapsed as u64);
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_finished()
    }

    /// Fixed-width timestamp that sorts lexically in finish order. Unfinished
    /// records fall back to their start time.
    pub fn finish_key(&self) -> String {
        self.end_time
            .unwrap_or(self.start_time)
            .to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}
