//! Lifecycle management for subprocess transport (spawn, exit, dispose)

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::process::Child;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;

use crate::error::{BridgeError, Result};
use crate::protocol::RpcLineCodec;
use crate::types::identifiers::{CallId, ClientId};
use crate::types::output::{CallOutput, ExitInfo};

use super::command::CommandBuilder;
use super::reader::{self, StderrBuffer};
use super::supervisor::claim;
use super::transport::{ProcessClient, ProcessHandle, PromptSink, SharedState};

impl ProcessClient {
    /// Return the live subprocess, spawning one if needed, and bind the
    /// pending call `id` to its generation
    ///
    /// Program lookup and fork/exec run without the client lock held.
    ///
    /// # Errors
    /// Returns error if the command cannot be built or the process cannot start
    pub(super) fn ensure_spawned(&self, id: CallId) -> Result<(u64, PromptSink)> {
        let generation = {
            let mut state = self.shared.lock();
            if let Some(live) = bind_live(&mut state, id) {
                return Ok(live);
            }
            // Bound up front so output printed at startup lands in this call.
            let generation = state.generations;
            if let Some(pending) = state.pending.as_mut().filter(|call| call.id == id) {
                pending.generation = Some(generation);
            }
            generation
        };

        let (handle, installed) = self.spawn_process(generation)?;

        let mut state = self.shared.lock();
        if state.process.is_some() || state.generations != generation {
            drop(state);
            log::warn!(
                "[{}] {id}: client state changed while spawning, discarding generation {generation}",
                self.id
            );
            handle.abandon();
            return Err(BridgeError::connection("client state changed while spawning"));
        }
        state.generations += 1;
        state.process = Some(handle);
        let live = bind_live(&mut state, id)
            .ok_or_else(|| BridgeError::connection("subprocess handle missing after spawn"));
        drop(state);

        // The exit supervisor waits for this before clearing the handle.
        let _ = installed.send(());
        live
    }

    /// Spawn the subprocess and its reader, stderr and exit tasks
    ///
    /// The returned sender must be fired (or dropped) once the handle is
    /// installed; the exit supervisor waits on it before touching client state.
    fn spawn_process(&self, generation: u64) -> Result<(ProcessHandle, oneshot::Sender<()>)> {
        let builder = CommandBuilder::new(&self.argv, self.cwd.as_deref(), &self.config.env);
        let mut cmd = builder.build()?;

        let mut child = cmd.spawn().map_err(|e| {
            if let Some(ref cwd) = self.cwd
                && !cwd.exists()
            {
                return BridgeError::spawn(format!(
                    "Working directory does not exist: {}",
                    cwd.display()
                ));
            }
            BridgeError::spawn(format!("Failed to start {:?}: {e}", self.argv))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::spawn("Failed to get stdin handle"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::spawn("Failed to get stdout handle"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BridgeError::spawn("Failed to get stderr handle"))?;

        let pid = child.id();
        let stderr_buffer = StderrBuffer::new(self.config.max_stderr_size);
        let shared = Arc::downgrade(&self.shared);

        let reader_task = tokio::spawn(reader::read_stdout(
            stdout,
            shared.clone(),
            stderr_buffer.clone(),
            generation,
            self.id,
        ));
        let stderr_task = tokio::spawn(reader::drain_stderr(stderr, stderr_buffer.clone()));

        let (kill_tx, kill_rx) = oneshot::channel();
        let (installed_tx, installed_rx) = oneshot::channel();
        let supervisor = tokio::spawn(supervise(ExitWatch {
            child,
            kill_rx,
            installed: installed_rx,
            reader_task,
            stderr_task,
            stderr: stderr_buffer,
            shared,
            generation,
            client_id: self.id,
            drain_grace: self.config.exit_drain_grace,
        }));

        log::info!(
            "[{}] spawned pid {} (generation {generation}): {:?}",
            self.id,
            pid.map_or_else(|| "?".to_string(), |p| p.to_string()),
            self.argv
        );

        let handle = ProcessHandle {
            generation,
            pid,
            stdin: Arc::new(AsyncMutex::new(FramedWrite::new(stdin, RpcLineCodec::new()))),
            kill_tx: Some(kill_tx),
            supervisor: Some(supervisor),
            spawned_at: Utc::now(),
        };
        Ok((handle, installed_tx))
    }

    /// Kill the live subprocess and wait for it to be reaped
    ///
    /// A call still pending on that subprocess is resolved by the exit
    /// supervisor with `killed: true`.
    pub async fn dispose(&self) {
        self.terminate(None).await;
    }

    /// Kill the live subprocess if it is `generation` (or any, for `None`)
    pub(super) async fn terminate(&self, generation: Option<u64>) {
        let handle = {
            let mut state = self.shared.lock();
            let matches = state
                .process
                .as_ref()
                .is_some_and(|p| generation.is_none_or(|g| p.generation == g));
            if matches { state.process.take() } else { None }
        };

        if let Some(handle) = handle {
            log::info!(
                "[{}] terminating subprocess generation {}",
                self.id,
                handle.generation
            );
            handle.shutdown(self.config.shutdown_grace, self.id).await;
        }
    }

    /// Handle Drop cleanup
    pub(super) fn drop_impl(&mut self) {
        let handle = self.shared.lock().process.take();
        if let Some(mut handle) = handle
            && let Some(kill) = handle.kill_tx.take()
        {
            log::debug!("[{}] client dropped, killing generation {}", self.id, handle.generation);
            let _ = kill.send(());
        }
    }
}

impl ProcessHandle {
    /// Signal the kill without waiting for the reap
    fn abandon(mut self) {
        if let Some(kill) = self.kill_tx.take() {
            let _ = kill.send(());
        }
    }

    /// Signal the kill and wait up to `grace` for the exit supervisor
    async fn shutdown(mut self, grace: Duration, client_id: ClientId) {
        if let Some(kill) = self.kill_tx.take() {
            let _ = kill.send(());
        }
        if let Some(task) = self.supervisor.take()
            && tokio::time::timeout(grace, task).await.is_err()
        {
            log::warn!(
                "[{client_id}] generation {} not reaped within {grace:?}",
                self.generation
            );
        }
    }
}

/// Everything the exit supervisor owns for one subprocess
struct ExitWatch {
    child: Child,
    kill_rx: oneshot::Receiver<()>,
    installed: oneshot::Receiver<()>,
    reader_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
    stderr: StderrBuffer,
    shared: Weak<Mutex<SharedState>>,
    generation: u64,
    client_id: ClientId,
    drain_grace: Duration,
}

/// Wait for the subprocess to exit (or be killed), then resolve any call
/// still pending on it and drop its handle
async fn supervise(watch: ExitWatch) {
    let ExitWatch {
        mut child,
        kill_rx,
        installed,
        mut reader_task,
        mut stderr_task,
        stderr,
        shared,
        generation,
        client_id,
        drain_grace,
    } = watch;

    // A dropped sender means the handle is gone; kill in that case too.
    let mut killed = false;
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx => {
            killed = true;
            if let Err(e) = child.start_kill() {
                log::debug!("[{client_id}] kill of generation {generation} failed: {e}");
            }
            child.wait().await
        }
    };

    // From here the call belongs to the exit path, even if its deadline
    // passes while the output drains.
    if let Some(shared) = shared.upgrade() {
        let mut state = shared.lock();
        if let Some(pending) = state
            .pending
            .as_mut()
            .filter(|call| call.belongs_to(generation))
        {
            pending.exit_seen = true;
        }
    }

    // Let the tail of stdout/stderr land before resolving.
    if tokio::time::timeout(drain_grace, &mut reader_task).await.is_err() {
        log::debug!("[{client_id}] stdout of generation {generation} still open after exit");
        reader_task.abort();
    }
    if tokio::time::timeout(drain_grace, &mut stderr_task).await.is_err() {
        stderr_task.abort();
    }

    match &status {
        Ok(status) => log::info!(
            "[{client_id}] generation {generation} exited ({status}, killed: {killed})"
        ),
        Err(e) => log::warn!("[{client_id}] failed to wait on generation {generation}: {e}"),
    }

    // Dropped without a send when the spawn was discarded; both mean go ahead.
    let _ = installed.await;

    let Some(shared) = shared.upgrade() else {
        return;
    };

    let pending = {
        let mut state = shared.lock();
        if state.process.as_ref().is_some_and(|p| p.generation == generation) {
            state.process = None;
        }
        let pending = claim(&mut state.pending, |call| call.belongs_to(generation));
        if pending.is_some() && status.is_ok() {
            state.calls_completed += 1;
        }
        pending
    };

    if let Some(call) = pending {
        let outcome = status
            .map(|status| {
                let exit = ExitInfo::from_status(status, killed);
                CallOutput::exited(&call.lines, stderr.snapshot(), &exit)
            })
            .map_err(BridgeError::from);
        log::debug!("[{client_id}] {} resolved by subprocess exit", call.id);
        call.resolve(outcome);
    }
}

/// Bind the pending call `id` to the live subprocess, if there is one
fn bind_live(state: &mut SharedState, id: CallId) -> Option<(u64, PromptSink)> {
    let process = state.process.as_ref()?;
    let generation = process.generation;
    let sink = Arc::clone(&process.stdin);

    if let Some(pending) = state.pending.as_mut().filter(|call| call.id == id) {
        pending.generation = Some(generation);
    }
    Some((generation, sink))
}
