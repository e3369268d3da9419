//! Output reading logic for subprocess transport

use std::sync::{Arc, Weak};

use bytes::{Buf, BytesMut};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::process::{ChildStderr, ChildStdout};
use tokio_util::codec::FramedRead;

use crate::protocol::{LineEvent, RpcLineCodec, decode_line};
use crate::types::identifiers::ClientId;
use crate::types::output::CallOutput;

use super::transport::SharedState;

/// Process-scoped stderr accumulator that keeps at most `limit` bytes (the tail)
///
/// Raw bytes are kept so a character split across two reads survives; text is
/// decoded only when a snapshot is taken.
#[derive(Clone)]
pub(super) struct StderrBuffer {
    inner: Arc<Mutex<BytesMut>>,
    limit: usize,
}

impl StderrBuffer {
    pub(super) fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BytesMut::new())),
            limit,
        }
    }

    fn append(&self, chunk: &[u8]) {
        let mut buffer = self.inner.lock();
        buffer.extend_from_slice(chunk);
        if buffer.len() > self.limit {
            let mut cut = buffer.len() - self.limit;
            // Never start the tail on a UTF-8 continuation byte.
            while cut < buffer.len() && (buffer[cut] & 0xC0) == 0x80 {
                cut += 1;
            }
            buffer.advance(cut);
        }
    }

    pub(super) fn snapshot(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock()).into_owned()
    }
}

/// Read stdout line by line until EOF, feeding the pending call
pub(super) async fn read_stdout(
    stdout: ChildStdout,
    shared: Weak<Mutex<SharedState>>,
    stderr: StderrBuffer,
    generation: u64,
    client_id: ClientId,
) {
    let mut lines = FramedRead::new(stdout, RpcLineCodec::new());

    while let Some(next) = lines.next().await {
        let line = match next {
            Ok(line) => line,
            Err(e) => {
                log::warn!("[{client_id}] stdout read failed: {e}");
                break;
            }
        };
        let Some(shared) = shared.upgrade() else {
            break;
        };
        dispatch_line(&shared, &stderr, line, generation, client_id);
    }

    log::debug!("[{client_id}] stdout of generation {generation} closed");
}

/// Buffer one line into the pending call, forward it to the observer, and
/// resolve the call if the line is the turn-complete marker
fn dispatch_line(
    shared: &Mutex<SharedState>,
    stderr: &StderrBuffer,
    line: String,
    generation: u64,
    client_id: ClientId,
) {
    let event = decode_line(&line);
    if matches!(event, LineEvent::Unparsed(_)) {
        log::trace!("[{client_id}] non-JSON line: {line}");
    }

    let (observer, completed) = {
        let mut state = shared.lock();
        let Some(pending) = state
            .pending
            .as_mut()
            .filter(|call| call.belongs_to(generation))
        else {
            log::trace!("[{client_id}] discarding line outside of a call: {line}");
            return;
        };

        pending.lines.push(line.clone());
        let observer = pending.observer.clone();

        let completed = if event.is_turn_complete() {
            state.calls_completed += 1;
            state.pending.take()
        } else {
            None
        };
        (observer, completed)
    };

    if let Some(observer) = observer {
        observer(&line);
    }

    if let Some(call) = completed {
        log::debug!("[{client_id}] {} resolved by turn-complete marker", call.id);
        let output = CallOutput::turn_complete(&call.lines, stderr.snapshot());
        call.resolve(Ok(output));
    }
}

/// Accumulate stderr until EOF
pub(super) async fn drain_stderr(mut stderr: ChildStderr, buffer: StderrBuffer) {
    let mut chunk = vec![0u8; 4096];

    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) | Err(_) => break, // EOF
            Ok(n) => buffer.append(&chunk[..n]),
        }
    }
}
