//! Tool execution on the runner machine.
//!
//! The portal never runs tools; it only tells a runner what to run. The
//! [`Executor`] decides how.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use serde_json::Value;
use tokio::process::Command;
use toolport_core::protocol::{ClaimResponse, RunOutcome, RunResult};
use tracing::{debug, info, warn};

use crate::config::RunnerConfig;

/// Longest stdout/stderr excerpt copied into a run's summary or error.
const EXCERPT_LEN: usize = 500;

/// Outcome of executing one claimed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    /// The tool ran to completion and the runner reports it.
    Finished { outcome: RunOutcome, result: RunResult },
    /// The tool was launched detached with the run token and completes the
    /// run itself through the callback endpoint.
    AwaitingCallback,
}

impl Execution {
    pub fn success(summary: impl Into<String>) -> Self {
        Self::Finished {
            outcome: RunOutcome::Success,
            result: RunResult {
                summary: Some(summary.into()),
                ..RunResult::default()
            },
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        Self::Finished {
            outcome: RunOutcome::Failed,
            result: RunResult {
                error_message: Some(error_message.into()),
                ..RunResult::default()
            },
        }
    }
}

/// Runs a claimed tool to completion.
///
/// Dropping the returned future must abort the work; the agent relies on
/// this to stop an in-flight run.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, claim: &ClaimResponse) -> impl Future<Output = Execution> + Send;
}

/// Runs `exe`, `bat` and `python_runner` tools as child processes and waits
/// for them. `pad` flows are started detached and report through the callback.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    python_bin: PathBuf,
    log_dir: Option<PathBuf>,
}

impl ProcessExecutor {
    pub const fn new(python_bin: PathBuf, log_dir: Option<PathBuf>) -> Self {
        Self {
            python_bin,
            log_dir,
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(config.python_bin.clone(), config.log_dir.clone())
    }

    /// Build the child command for a claim, or explain why it cannot run.
    fn command_for(&self, claim: &ClaimResponse) -> Result<Command, String> {
        let settings = claim.payload.as_ref().or(claim.tool.run_config.as_ref());
        let target = claim
            .tool
            .target
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| setting_str(settings, "script"));

        let mut cmd = match claim.tool.tool_type.as_str() {
            "exe" => Command::new(target.ok_or("tool has no target")?),
            "bat" => {
                let script = target.ok_or("tool has no target")?;
                if cfg!(windows) {
                    let mut cmd = Command::new("cmd");
                    cmd.args(["/C", script]);
                    cmd
                } else {
                    let mut cmd = Command::new("sh");
                    cmd.arg(script);
                    cmd
                }
            }
            "python_runner" => {
                let mut cmd = Command::new(&self.python_bin);
                cmd.arg(target.ok_or("tool has no script")?);
                cmd
            }
            other => return Err(format!("unsupported tool type: {other}")),
        };

        cmd.args(setting_args(settings));
        if let Some(dir) = setting_str(settings, "working_dir") {
            cmd.current_dir(dir);
        }
        Ok(cmd)
    }

    async fn write_log(&self, run_id: &str, stdout: &[u8], stderr: &[u8]) -> Option<String> {
        let dir = self.log_dir.as_ref()?;
        let path = dir.join(format!("{run_id}.log"));
        let mut content = stdout.to_vec();
        if !stderr.is_empty() {
            content.extend_from_slice(b"\n--- stderr ---\n");
            content.extend_from_slice(stderr);
        }
        let written = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, content).await
        }
        .await;
        match written {
            Ok(()) => Some(path.display().to_string()),
            Err(e) => {
                warn!(run_id, error = %e, "Failed to write run log");
                None
            }
        }
    }
}

impl Executor for ProcessExecutor {
    async fn execute(&self, claim: &ClaimResponse) -> Execution {
        if claim.tool.tool_type == "pad" {
            return hand_off(claim);
        }

        let mut cmd = match self.command_for(claim) {
            Ok(cmd) => cmd,
            Err(msg) => return Execution::failed(msg),
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(run_id = %claim.run_id, tool_type = %claim.tool.tool_type, "Spawning tool process");
        let started = Instant::now();
        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) => return Execution::failed(format!("failed to start: {e}")),
        };
        let elapsed = started.elapsed().as_secs_f64();

        let mut execution = if output.status.success() {
            let summary = last_line(&output.stdout)
                .unwrap_or_else(|| format!("completed in {elapsed:.1}s"));
            Execution::success(summary)
        } else {
            let code = output
                .status
                .code()
                .map_or_else(|| "terminated by signal".to_string(), |c| format!("exit code {c}"));
            match last_line(&output.stderr) {
                Some(detail) => Execution::failed(format!("{code}: {detail}")),
                None => Execution::failed(code),
            }
        };
        if let Execution::Finished { result, .. } = &mut execution {
            result.log_path = self
                .write_log(&claim.run_id, &output.stdout, &output.stderr)
                .await;
        }
        execution
    }
}

/// Start a `pad` flow from its `command` template and leave completion to it.
///
/// The child is not killed when the agent stops; the flow owns the run token.
fn hand_off(claim: &ClaimResponse) -> Execution {
    let settings = claim.payload.as_ref().or(claim.tool.run_config.as_ref());
    let Some(template) = setting_str(settings, "command") else {
        return Execution::failed("pad tool has no command configured");
    };
    let command = fill_template(template, claim);

    let mut cmd = if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", &command]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", &command]);
        cmd
    };
    if let Some(dir) = setting_str(settings, "working_dir") {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    match cmd.spawn() {
        Ok(child) => {
            info!(run_id = %claim.run_id, pid = child.id(), "Flow started, awaiting callback");
            Execution::AwaitingCallback
        }
        Err(e) => Execution::failed(format!("failed to start: {e}")),
    }
}

fn fill_template(template: &str, claim: &ClaimResponse) -> String {
    template
        .replace("{{run_id}}", &claim.run_id)
        .replace("{{run_token}}", &claim.run_token)
        .replace("{{callback_url}}", &claim.callback_url)
}

fn setting_str<'a>(settings: Option<&'a Value>, key: &str) -> Option<&'a str> {
    settings?.get(key)?.as_str().filter(|s| !s.is_empty())
}

/// `args` from the run settings. Non-string scalars are passed as their JSON text.
fn setting_args(settings: Option<&Value>) -> Vec<String> {
    settings
        .and_then(|s| s.get("args"))
        .and_then(Value::as_array)
        .map(|args| {
            args.iter()
                .filter(|a| !a.is_null())
                .map(|a| a.as_str().map_or_else(|| a.to_string(), ToString::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Last non-empty line of process output, truncated.
fn last_line(output: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(output);
    let line = text.lines().map(str::trim).rfind(|l| !l.is_empty())?;
    Some(line.chars().take(EXCERPT_LEN).collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use toolport_core::protocol::ClaimedTool;

    use super::*;

    fn claim(tool_type: &str, target: Option<&str>, run_config: Option<Value>) -> ClaimResponse {
        ClaimResponse {
            run_id: "run-1".into(),
            run_token: "t".into(),
            tool: ClaimedTool {
                id: "tool-1".into(),
                name: "Tool".into(),
                tool_type: tool_type.into(),
                target: target.map(Into::into),
                run_config: run_config.clone(),
            },
            payload: run_config,
            callback_url: "http://portal/api/runs/callback".into(),
        }
    }

    fn executor() -> ProcessExecutor {
        ProcessExecutor::new(PathBuf::from("python3"), None)
    }

    fn finished(exec: Execution) -> (RunOutcome, RunResult) {
        match exec {
            Execution::Finished { outcome, result } => (outcome, result),
            Execution::AwaitingCallback => panic!("expected a finished execution"),
        }
    }

    #[test]
    fn args_are_stringified() {
        let settings = json!({"args": ["--month", 3, true, null]});
        assert_eq!(setting_args(Some(&settings)), vec!["--month", "3", "true"]);
        assert!(setting_args(Some(&json!({"args": "nope"}))).is_empty());
        assert!(setting_args(None).is_empty());
    }

    #[test]
    fn python_runner_uses_script_setting() {
        let claim = claim("python_runner", None, Some(json!({"script": "close.py", "args": ["-v"]})));
        let cmd = executor().command_for(&claim).unwrap();
        let std = cmd.as_std();
        assert_eq!(std.get_program(), "python3");
        let args: Vec<_> = std.get_args().collect();
        assert_eq!(args, ["close.py", "-v"]);
    }

    #[test]
    fn payload_wins_over_tool_config() {
        let mut claim = claim("exe", Some("report.exe"), Some(json!({"args": ["new"]})));
        claim.tool.run_config = Some(json!({"args": ["old"]}));
        let cmd = executor().command_for(&claim).unwrap();
        let args: Vec<_> = cmd.as_std().get_args().collect();
        assert_eq!(args, ["new"]);
    }

    #[tokio::test]
    async fn unsupported_and_incomplete_tools_fail() {
        let (outcome, result) = finished(executor().execute(&claim("excel", Some("book.xlsx"), None)).await);
        assert_eq!(outcome, RunOutcome::Failed);
        assert_eq!(result.error_message.as_deref(), Some("unsupported tool type: excel"));

        let (_, result) = finished(executor().execute(&claim("exe", Some(""), None)).await);
        assert_eq!(result.error_message.as_deref(), Some("tool has no target"));

        let (_, result) = finished(executor().execute(&claim("pad", None, Some(json!({})))).await);
        assert_eq!(result.error_message.as_deref(), Some("pad tool has no command configured"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_status_decides_outcome() {
        let ok = claim("exe", Some("sh"), Some(json!({"args": ["-c", "echo working; echo 12 rows"]})));
        let exec = executor().execute(&ok).await;
        assert_eq!(exec, Execution::success("12 rows"));

        let bad = claim("exe", Some("sh"), Some(json!({"args": ["-c", "echo disk full >&2; exit 3"]})));
        let (outcome, result) = finished(executor().execute(&bad).await);
        assert_eq!(outcome, RunOutcome::Failed);
        assert_eq!(result.error_message.as_deref(), Some("exit code 3: disk full"));

        let missing = claim("exe", Some("/definitely/not/here"), None);
        let (_, result) = finished(executor().execute(&missing).await);
        assert!(result.error_message.unwrap().starts_with("failed to start"));
    }

    #[test]
    fn pad_template_is_filled_from_the_claim() {
        let claim = claim("pad", None, None);
        let filled = fill_template("flow.exe --run {{run_id}} --token {{run_token}} --cb {{callback_url}}", &claim);
        assert_eq!(filled, "flow.exe --run run-1 --token t --cb http://portal/api/runs/callback");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pad_flow_is_handed_off() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("flow.txt");
        let command = format!("echo {{{{run_id}}}} {{{{run_token}}}} > {}", out.display());
        let claim = claim("pad", None, Some(json!({ "command": command })));

        assert_eq!(executor().execute(&claim).await, Execution::AwaitingCallback);
        for _ in 0..100 {
            if std::fs::read_to_string(&out).is_ok_and(|s| s.ends_with('\n')) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "run-1 t\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn output_is_logged_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ProcessExecutor::new(PathBuf::from("python3"), Some(dir.path().join("logs")));
        let claim = claim("exe", Some("sh"), Some(json!({"args": ["-c", "echo out; echo err >&2"]})));

        let (_, result) = finished(exec.execute(&claim).await);
        let log_path = result.log_path.unwrap();
        let content = std::fs::read_to_string(&log_path).unwrap();
        assert!(log_path.ends_with("run-1.log"));
        assert!(content.contains("out"));
        assert!(content.contains("--- stderr ---\nerr"));
    }
}
