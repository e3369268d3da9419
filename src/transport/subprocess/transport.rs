//! Line-protocol process client

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::SinkExt;
use parking_lot::Mutex;
use tokio::process::ChildStdin;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::FramedWrite;

use crate::error::{BridgeError, Result};
use crate::prompt::{PREVIEW_CHARS, normalize, preview};
use crate::protocol::{OutboundCommand, RpcLineCodec};
use crate::types::identifiers::{CallId, ClientId, ProcessIdentity};
use crate::types::options::{BridgeConfig, LineObserver};
use crate::types::output::{CallOutput, ClientState, ClientStatus};
use crate::types::prompt_input::PromptPayload;

use super::supervisor::{self, Outcome, PendingCall, PendingGuard, claim, effective_timeout};

/// Framed writer over the subprocess's stdin
pub(super) type PromptSink = Arc<AsyncMutex<FramedWrite<ChildStdin, RpcLineCodec>>>;

/// Handle to the live subprocess of a client
pub(super) struct ProcessHandle {
    pub(super) generation: u64,
    pub(super) pid: Option<u32>,
    pub(super) stdin: PromptSink,
    pub(super) kill_tx: Option<oneshot::Sender<()>>,
    pub(super) supervisor: Option<JoinHandle<()>>,
    pub(super) spawned_at: DateTime<Utc>,
}

/// Mutable client state; the lock is never held across an `.await`
#[derive(Default)]
pub(super) struct SharedState {
    pub(super) pending: Option<PendingCall>,
    pub(super) process: Option<ProcessHandle>,
    /// Number of subprocesses spawned so far; the next generation number
    pub(super) generations: u64,
    pub(super) calls_completed: u64,
}

/// Client owning one line-protocol subprocess
///
/// The subprocess is spawned lazily by the first call and reused by every
/// later call until it exits, times out, or the client is disposed. At most
/// one call is in flight at a time; a second concurrent call fails with
/// [`BridgeError::AlreadyBusy`] without touching the first.
pub struct ProcessClient {
    pub(super) id: ClientId,
    identity: ProcessIdentity,
    pub(super) argv: Vec<String>,
    pub(super) cwd: Option<PathBuf>,
    pub(super) config: BridgeConfig,
    pub(super) shared: Arc<Mutex<SharedState>>,
    next_call: AtomicU64,
}

impl ProcessClient {
    /// Create a client for the given argument vector and working directory
    ///
    /// Nothing is spawned until the first call.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `argv` is empty or the config is invalid
    pub fn new(argv: Vec<String>, cwd: Option<PathBuf>, config: BridgeConfig) -> Result<Self> {
        if argv.is_empty() {
            return Err(BridgeError::invalid_config("argument vector is empty"));
        }
        config.validate()?;

        Ok(Self {
            id: ClientId::new(),
            identity: ProcessIdentity::new(cwd.as_deref(), &argv),
            argv,
            cwd,
            config,
            shared: Arc::new(Mutex::new(SharedState::default())),
            next_call: AtomicU64::new(1),
        })
    }

    /// Client identifier used in log lines
    #[must_use]
    pub const fn id(&self) -> ClientId {
        self.id
    }

    /// Identity this client was created for
    #[must_use]
    pub const fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    /// Argument vector of the subprocess
    #[must_use]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Working directory of the subprocess
    #[must_use]
    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Send a prompt and wait for the turn to finish
    ///
    /// The call resolves with every stdout line seen until the turn-complete
    /// marker, or until the subprocess exits (with its real exit status). The
    /// wait is capped at `min(timeout, config.timeout_ceiling)`; past that the
    /// subprocess is killed and the call fails with `Timeout`.
    ///
    /// # Errors
    /// - `InvalidConfig` for a zero timeout
    /// - `AlreadyBusy` if another call is in flight
    /// - `ProgramNotFound` / `Spawn` / `Write` from process creation and I/O
    /// - `Timeout` when the effective cap elapses
    pub async fn call(
        &self,
        prompt: impl Into<PromptPayload>,
        timeout: Duration,
        on_line: Option<LineObserver>,
    ) -> Result<CallOutput> {
        if timeout.is_zero() {
            return Err(BridgeError::invalid_config("timeout must be positive"));
        }

        let id = CallId::new(self.next_call.fetch_add(1, Ordering::Relaxed));
        let rx = {
            let mut state = self.shared.lock();
            if state.pending.is_some() {
                log::warn!("[{}] rejecting {id}: a call is already in flight", self.id);
                return Err(BridgeError::already_busy(self.id));
            }
            let (pending, rx) = PendingCall::new(id, on_line);
            state.pending = Some(pending);
            rx
        };
        let _guard = PendingGuard::new(Arc::clone(&self.shared), id);

        let prompt = prompt.into();
        let normalized = normalize(&prompt);
        if normalized.coerced {
            log::info!(
                "[{}] {id}: prompt payload was not a plain string, coerced to text (preview: {})",
                self.id,
                preview(&prompt, PREVIEW_CHARS)
            );
        }

        let cap = effective_timeout(timeout, self.config.timeout_ceiling);
        if cap < timeout {
            log::debug!("[{}] {id}: requested {timeout:?} capped to {cap:?}", self.id);
        }
        let deadline = Instant::now() + cap;

        let (generation, sink) = self.ensure_spawned(id)?;
        match tokio::time::timeout_at(deadline, write_prompt(&sink, normalized.text)).await {
            Ok(written) => written?,
            Err(_) => log::warn!("[{}] {id}: prompt write not accepted before deadline", self.id),
        }
        log::debug!("[{}] {id}: prompt written to generation {generation}", self.id);

        match supervisor::await_outcome(rx, deadline, || self.claim_for_timeout(id)).await {
            Outcome::Resolved(result) => result,
            Outcome::TimedOut => {
                log::warn!(
                    "[{}] {id}: no resolution within {cap:?}, killing subprocess",
                    self.id
                );
                self.terminate(Some(generation)).await;
                Err(BridgeError::timeout(cap))
            }
        }
    }

    fn claim_for_timeout(&self, id: CallId) -> bool {
        claim(&mut self.shared.lock().pending, |call| {
            call.id == id && !call.exit_seen
        })
        .is_some()
    }

    /// Snapshot of the client's lifecycle state
    #[must_use]
    pub fn status(&self) -> ClientStatus {
        let state = self.shared.lock();
        let lifecycle = match (&state.pending, &state.process) {
            (Some(_), _) => ClientState::AwaitingResponse,
            (None, Some(_)) => ClientState::Idle,
            (None, None) if state.generations == 0 => ClientState::NotStarted,
            (None, None) => ClientState::Terminated,
        };

        ClientStatus {
            client_id: self.id,
            identity: self.identity.clone(),
            state: lifecycle,
            pid: state.process.as_ref().and_then(|p| p.pid),
            spawned_at: state.process.as_ref().map(|p| p.spawned_at),
            calls_completed: state.calls_completed,
        }
    }

    /// Whether a call is currently in flight
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.shared.lock().pending.is_some()
    }
}

async fn write_prompt(sink: &PromptSink, message: String) -> Result<()> {
    let mut sink = sink.lock().await;
    sink.send(OutboundCommand::Prompt { message })
        .await
        .map_err(|e| BridgeError::write(format!("Failed to write prompt to stdin: {e}")))
}

impl std::fmt::Debug for ProcessClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessClient")
            .field("id", &self.id)
            .field("argv", &self.argv)
            .field("cwd", &self.cwd)
            .finish_non_exhaustive()
    }
}

impl Drop for ProcessClient {
    fn drop(&mut self) {
        self.drop_impl();
    }
}
