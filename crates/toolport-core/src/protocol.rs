//! Wire types spoken between the portal, its runners and external jobs.
//!
//! Every endpoint exchanges JSON bodies. These are the well-formed shapes;
//! the server additionally accepts loosely-typed input so it can answer
//! field-level validation errors instead of a generic parse failure.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header carrying a machine's plaintext secret key.
pub const MACHINE_KEY_HEADER: &str = "x-machine-key";

/// Header carrying the shared ingestion secret.
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

pub const CLAIM_PATH: &str = "/api/runner/claim";
pub const HEARTBEAT_PATH: &str = "/api/runner/heartbeat";
pub const REPORT_PATH: &str = "/api/runner/report";
pub const CALLBACK_PATH: &str = "/api/runs/callback";
pub const TASK_REPORT_PATH: &str = "/api/monitor/report";
pub const JOB_REPORT_PATH: &str = "/api/monitor/job-report";

/// Final outcome a runner or callback may report for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Failed,
}

impl RunOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for RunOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run outcome: {other}")),
        }
    }
}

/// Operator instruction delivered through the heartbeat mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineCommand {
    Stop,
}

impl MachineCommand {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for MachineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MachineCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop" => Ok(Self::Stop),
            other => Err(format!("unknown machine command: {other}")),
        }
    }
}

/// Tool invocation data handed to the claiming runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimedTool {
    pub id: String,
    pub name: String,
    pub tool_type: String,
    pub target: Option<String>,
    pub run_config: Option<Value>,
}

/// Successful claim. `run_token` is disclosed only in this response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub run_id: String,
    pub run_token: String,
    pub tool: ClaimedTool,
    pub payload: Option<Value>,
    pub callback_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Set on the first heartbeat after the runner (re)started.
    #[serde(default)]
    pub starting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub success: bool,
    pub machine_id: String,
    pub machine_name: String,
    #[serde(default)]
    pub command: Option<MachineCommand>,
}

/// Result fields shared by report and callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_url: Option<String>,
}

/// Machine-authenticated completion of a claimed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub run_id: String,
    pub status: RunOutcome,
    #[serde(flatten)]
    pub result: RunResult,
}

/// Token-authenticated completion of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackRequest {
    pub run_id: String,
    pub run_token: String,
    pub status: RunOutcome,
    #[serde(flatten)]
    pub result: RunResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Python,
    Bat,
}

impl TaskKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Bat => "bat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Success,
    Failed,
}

impl TaskStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// Completion report from an OS-scheduled task that never went through the
/// claim queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_key: String,
    pub task_name: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReportResponse {
    pub ok: bool,
    pub monitor_id: String,
    pub task_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    Success,
    Error,
}

impl JobOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Completion report from a single-identifier scheduled job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_key: String,
    pub title: String,
    pub status: JobOutcome,
    pub finished_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReportResponse {
    pub success: bool,
    pub id: String,
    pub job_key: String,
}
