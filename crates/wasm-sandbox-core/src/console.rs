//! Captured guest console output.
//!
//! Guest stdout and stderr (written through the WASI shims) land in
//! [`ConsolePipe`]s. [`ConsoleCapture::drain`] takes everything written
//! since the previous drain, releases it from the pipe and splits it into
//! lines, which the store then forwards to the structured logger. Draining
//! after instantiation and again after each call keeps initialization output
//! ahead of the target function's output.
//!
//! A pipe's capacity bounds the bytes written between two drains, so it
//! limits the output of one initialization or one call, not the lifetime
//! output of an instance.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use wasmtime_wasi::{HostOutputStream, StdoutStream, StreamError, StreamResult, Subscribe};

/// Which console stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleStream {
    Stdout,
    Stderr,
}

/// In-memory WASI output stream whose contents can be taken.
///
/// Clones share the same buffer.
#[derive(Debug, Clone)]
pub struct ConsolePipe {
    capacity: usize,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl ConsolePipe {
    /// Create a pipe holding at most `capacity` undrained bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Take everything written so far, leaving the pipe empty.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.buffer.lock())
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HostOutputStream for ConsolePipe {
    fn write(&mut self, bytes: Bytes) -> StreamResult<()> {
        let mut buffer = self.buffer.lock();
        if bytes.len() > self.capacity - buffer.len() {
            return Err(StreamError::Trap(wasmtime::Error::msg(format!(
                "console output exceeds {} bytes",
                self.capacity
            ))));
        }
        buffer.extend_from_slice(&bytes);
        Ok(())
    }

    fn flush(&mut self) -> StreamResult<()> {
        Ok(())
    }

    fn check_write(&mut self) -> StreamResult<usize> {
        let used = self.buffer.lock().len();
        if used < self.capacity {
            Ok(self.capacity - used)
        } else {
            Err(StreamError::Closed)
        }
    }
}

#[async_trait::async_trait]
impl Subscribe for ConsolePipe {
    async fn ready(&mut self) {}
}

impl StdoutStream for ConsolePipe {
    fn stream(&self) -> Box<dyn HostOutputStream> {
        Box::new(self.clone())
    }

    fn isatty(&self) -> bool {
        false
    }
}

/// Per-instance stdout/stderr capture.
pub struct ConsoleCapture {
    stdout: ConsolePipe,
    stderr: ConsolePipe,
}

impl ConsoleCapture {
    /// Create a capture with `capacity` bytes per stream.
    pub fn new(capacity: usize) -> Self {
        Self {
            stdout: ConsolePipe::new(capacity),
            stderr: ConsolePipe::new(capacity),
        }
    }

    /// Pipe handed to the WASI context as stdout.
    pub fn stdout_pipe(&self) -> ConsolePipe {
        self.stdout.clone()
    }

    /// Pipe handed to the WASI context as stderr.
    pub fn stderr_pipe(&self) -> ConsolePipe {
        self.stderr.clone()
    }

    /// Take the lines written since the last drain, stdout first.
    ///
    /// A trailing line without a newline is returned as its own line.
    pub fn drain(&mut self) -> Vec<(ConsoleStream, String)> {
        let stdout = split_lines(&self.stdout.take());
        let stderr = split_lines(&self.stderr.take());

        stdout
            .into_iter()
            .map(|l| (ConsoleStream::Stdout, l))
            .chain(stderr.into_iter().map(|l| (ConsoleStream::Stderr, l)))
            .collect()
    }
}

/// Split `buf` into lines without terminators.
fn split_lines(buf: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(buf);
    let mut lines: Vec<String> = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect();

    // A terminated buffer leaves one empty fragment after the last newline.
    if lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }

    lines
}
