// ABOUTME: Stream pumps for remote command output: byte chunks in, complete lines out.
// ABOUTME: Each pump owns one LineBuffer; the activity clock is the only shared state.

use crate::output::BuildLog;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Accumulates raw bytes and splits them into lines.
///
/// Lines are decoded lossily as UTF-8 and a trailing `\r` is dropped, so
/// pty output reads the same as plain output.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                lines.push(decode(&std::mem::take(&mut self.pending)));
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// The unterminated tail, if any, as a line of its own.
    pub fn take_remaining(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(decode(&std::mem::take(&mut self.pending)))
        }
    }
}

fn decode(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Milliseconds since an origin, updated whenever a pump emits a line.
///
/// Written by both pumps and read by the poll loop; a single atomic is all
/// the synchronization this needs.
#[derive(Debug)]
pub struct ActivityClock {
    origin: Instant,
    last_line_ms: AtomicU64,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_line_ms: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let ms = self.origin.elapsed().as_millis() as u64;
        self.last_line_ms.fetch_max(ms, Ordering::Relaxed);
    }

    pub fn last_line(&self) -> Instant {
        self.origin + Duration::from_millis(self.last_line_ms.load(Ordering::Relaxed))
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

/// What the monitor feeds a pump.
#[derive(Debug)]
pub(crate) enum PumpInput {
    Data(Bytes),
    /// Treat the buffered tail as a finished line.
    Flush,
    /// The remote process is gone; emit what is left and stop.
    Exit,
}

/// Handle the monitor keeps for one running pump.
pub(crate) struct Pump {
    tx: mpsc::UnboundedSender<PumpInput>,
    task: JoinHandle<()>,
    /// Last forwarded chunk did not end in a newline.
    pending: bool,
}

impl Pump {
    pub(crate) fn spawn(log: Arc<dyn BuildLog>, clock: Arc<ActivityClock>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(rx, log, clock));
        Self {
            tx,
            task,
            pending: false,
        }
    }

    pub(crate) fn feed(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        self.pending = data.last() != Some(&b'\n');
        let _ = self.tx.send(PumpInput::Data(data));
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.pending
    }

    pub(crate) fn flush(&mut self) {
        self.pending = false;
        let _ = self.tx.send(PumpInput::Flush);
    }

    /// Signal exit and wait for the pump to drain, at most `limit`.
    pub(crate) async fn finish(self, limit: Duration) {
        let _ = self.tx.send(PumpInput::Exit);
        let mut task = self.task;
        match tokio::time::timeout(limit, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Output pump failed: {}", e),
            Err(_) => {
                tracing::warn!("Output pump did not finish within {:?}", limit);
                task.abort();
            }
        }
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<PumpInput>,
    log: Arc<dyn BuildLog>,
    clock: Arc<ActivityClock>,
) {
    let mut buffer = LineBuffer::new();
    let emit = |line: String| {
        log.message(&line);
        clock.touch();
    };

    while let Some(input) = rx.recv().await {
        match input {
            PumpInput::Data(chunk) => buffer.push(&chunk).into_iter().for_each(emit),
            PumpInput::Flush => buffer.push(b"\n").into_iter().for_each(emit),
            PumpInput::Exit => break,
        }
    }

    if let Some(line) = buffer.take_remaining() {
        emit(line);
    }
}
