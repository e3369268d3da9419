//! Call results and client status snapshots

use std::process::ExitStatus;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identifiers::{ClientId, ProcessIdentity};

// ============================================================================
// Call Output
// ============================================================================

/// Result of a single call against a subprocess
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOutput {
    /// Output lines buffered for this call, joined with `\n`
    pub stdout: String,
    /// Error-stream text accumulated by the subprocess
    pub stderr: String,
    /// Exit code; `Some(0)` when the turn-complete marker resolved the call,
    /// `None` when the subprocess was terminated by a signal
    pub code: Option<i32>,
    /// Name of the terminating signal, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    /// Whether the bridge forcibly terminated the subprocess
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub killed: bool,
}

impl CallOutput {
    /// Output for a call resolved by the turn-complete marker
    pub(crate) fn turn_complete(lines: &[String], stderr: String) -> Self {
        Self {
            stdout: lines.join("\n"),
            stderr,
            code: Some(0),
            signal: None,
            killed: false,
        }
    }

    /// Output for a call resolved by subprocess exit
    pub(crate) fn exited(lines: &[String], stderr: String, exit: &ExitInfo) -> Self {
        Self {
            stdout: lines.join("\n"),
            stderr,
            code: exit.code,
            signal: exit.signal.clone(),
            killed: exit.killed,
        }
    }
}

/// How a subprocess ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<String>,
    pub killed: bool,
}

impl ExitInfo {
    pub(crate) fn from_status(status: ExitStatus, killed: bool) -> Self {
        Self {
            code: status.code(),
            signal: exit_signal(status),
            killed,
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(signal_name)
}

#[cfg(not(unix))]
fn exit_signal(_status: ExitStatus) -> Option<String> {
    None
}

#[cfg(unix)]
fn signal_name(signal: i32) -> String {
    let name = match signal {
        1 => "SIGHUP",
        2 => "SIGINT",
        3 => "SIGQUIT",
        6 => "SIGABRT",
        9 => "SIGKILL",
        13 => "SIGPIPE",
        14 => "SIGALRM",
        15 => "SIGTERM",
        other => return format!("SIG{other}"),
    };
    name.to_string()
}

// ============================================================================
// Client Status
// ============================================================================

/// Lifecycle state of a process client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    /// No subprocess has been spawned yet
    NotStarted,
    /// Subprocess alive, no call in flight
    Idle,
    /// A call is in flight
    AwaitingResponse,
    /// The last subprocess exited or was disposed
    Terminated,
}

/// Point-in-time snapshot of a process client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientStatus {
    /// Client identifier
    pub client_id: ClientId,
    /// Identity the client was created for
    pub identity: ProcessIdentity,
    /// Current lifecycle state
    pub state: ClientState,
    /// Pid of the live subprocess, if any
    pub pid: Option<u32>,
    /// When the live subprocess was spawned
    pub spawned_at: Option<DateTime<Utc>>,
    /// Number of calls that resolved with an output
    pub calls_completed: u64,
}
