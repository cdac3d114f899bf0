//! Data models for portal storage.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use toolport_core::protocol::ClaimedTool;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Machine {
    pub id: String,
    pub name: String,
    pub hostname: Option<String>,
    #[serde(skip_serializing, default)]
    pub key_hash: String,
    pub enabled: bool,
    pub last_seen_at: Option<i64>,
    pub pending_command: Option<String>,
    pub created_at: i64,
}

impl Machine {
    /// Enabled and heard from within `threshold_secs` of `now`.
    pub fn is_online(&self, now: i64, threshold_secs: i64) -> bool {
        self.enabled
            && self
                .last_seen_at
                .is_some_and(|seen| now - seen <= threshold_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tool {
    pub id: String,
    pub name: String,
    pub tool_type: String,
    pub target: Option<String>,
    /// JSON object, stored as text.
    pub run_config: Option<String>,
    pub execution_mode: String,
    pub is_archived: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Run {
    pub id: String,
    pub tool_id: String,
    pub requested_by: String,
    pub requested_at: i64,
    pub status: String,
    pub target_machine_id: Option<String>,
    pub machine_id: Option<String>,
    #[serde(skip_serializing, default)]
    pub run_token_hash: String,
    pub claimed_at: Option<i64>,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub summary: Option<String>,
    pub error_message: Option<String>,
    pub log_path: Option<String>,
    pub log_url: Option<String>,
    pub payload: Option<String>,
}

/// A claimed run joined with the tool it executes.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClaimedRun {
    pub run_id: String,
    pub payload: Option<String>,
    pub tool_id: String,
    pub tool_name: String,
    pub tool_type: String,
    pub tool_target: Option<String>,
    pub tool_run_config: Option<String>,
}

impl ClaimedRun {
    pub fn tool(&self) -> ClaimedTool {
        ClaimedTool {
            id: self.tool_id.clone(),
            name: self.tool_name.clone(),
            tool_type: self.tool_type.clone(),
            target: self.tool_target.clone(),
            run_config: parse_json_column(self.tool_run_config.as_deref()),
        }
    }

    pub fn payload(&self) -> Option<Value> {
        parse_json_column(self.payload.as_deref())
    }
}

/// Decode a JSON text column. Unparseable content is surfaced as a string
/// rather than dropped.
pub fn parse_json_column(raw: Option<&str>) -> Option<Value> {
    let raw = raw?;
    Some(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskMonitor {
    pub id: String,
    pub task_key: String,
    pub task_name: String,
    pub kind: String,
    pub machine_name: Option<String>,
    pub enabled: bool,
    pub last_status: Option<String>,
    pub last_started_at: Option<i64>,
    pub last_finished_at: Option<i64>,
    pub last_exit_code: Option<i64>,
    pub last_message: Option<String>,
    pub last_log_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskMonitorRun {
    pub id: String,
    pub monitor_id: String,
    pub status: String,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub duration_ms: Option<i64>,
    pub exit_code: Option<i64>,
    pub message: Option<String>,
    pub log_url: Option<String>,
    pub raw: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobStatus {
    pub id: String,
    pub job_key: String,
    pub title: String,
    pub tool_id: Option<String>,
    pub last_status: String,
    pub last_finished_at: i64,
    pub last_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}
