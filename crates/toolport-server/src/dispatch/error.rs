use crate::storage::DatabaseError;

/// Failures of dispatch operations. Everything except `Database` is an
/// expected outcome under concurrency or bad input, not a fault.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("machine key is required")]
    MissingMachineKey,

    #[error("invalid machine key")]
    InvalidMachineKey,

    #[error("machine is disabled")]
    MachineDisabled,

    #[error("machine not found: {0}")]
    MachineNotFound(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("run {0} was not claimed by this machine")]
    NotOwner(String),

    #[error("run {run_id} is {status}, not running")]
    NotRunning { run_id: String, status: String },

    #[error("run {0} is already completed")]
    AlreadyCompleted(String),

    #[error("invalid run token")]
    InvalidRunToken,

    #[error("run {run_id} is {status} and can no longer be canceled")]
    NotCancelable { run_id: String, status: String },

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool {0} is archived")]
    ToolArchived(String),

    #[error("tool {tool_id} cannot be launched this way (execution_mode: {mode})")]
    WrongExecutionMode { tool_id: String, mode: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("command mailbox for machine {0} kept changing")]
    MailboxContention(String),

    #[error("corrupt run state: {0}")]
    CorruptState(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl DispatchError {
    /// Map a storage `NotFound` to the given domain error, keep anything else.
    pub(crate) fn not_found_as(e: DatabaseError, missing: impl FnOnce() -> Self) -> Self {
        match e {
            DatabaseError::NotFound(_) => missing(),
            other => Self::Database(other),
        }
    }
}
