//! Streams attached to descriptors.
//!
//! The family is closed: standard input, standard output (stdout and stderr
//! differ only in their sink) and an in-memory regular file. Dispatch is an
//! exhaustive match on [`Stream`].

use super::types::{Errno, Whence};
use std::collections::VecDeque;
use std::fmt;
use std::io::BufRead;
use std::sync::{Arc, Mutex};

/// Produces input for [`StandardInput`], one line at a time.
pub trait LineSource: Send {
    /// Next line of input without its terminator, or `None` when no input
    /// can be obtained.
    fn next_line(&mut self) -> Option<String>;
}

/// Receives complete output lines from [`StandardOutput`].
pub trait LineSink: Send {
    /// Emit one line. The newline has already been stripped.
    fn emit(&mut self, line: &str);
}

/// Reads lines from the host process's stdin.
#[derive(Debug, Default)]
pub struct StdinLines;

impl LineSource for StdinLines {
    fn next_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => {
                let trimmed = line.trim_end_matches(['\n', '\r']).len();
                line.truncate(trimmed);
                Some(line)
            }
            Err(e) => {
                tracing::warn!("failed to read host stdin: {}", e);
                None
            }
        }
    }
}

/// A fixed queue of input lines, for embedding and tests.
#[derive(Debug, Default, Clone)]
pub struct ScriptedInput {
    lines: VecDeque<String>,
}

impl ScriptedInput {
    /// Create a source that yields `lines` in order, then nothing.
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// Queue another line.
    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push_back(line.into());
    }
}

impl LineSource for ScriptedInput {
    fn next_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }
}

/// Prints lines to the host console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleSink {
    /// Host stdout.
    Stdout,
    /// Host stderr.
    Stderr,
}

impl LineSink for ConsoleSink {
    fn emit(&mut self, line: &str) {
        match self {
            ConsoleSink::Stdout => println!("{line}"),
            ConsoleSink::Stderr => eprintln!("{line}"),
        }
    }
}

/// Collects lines into a shared vector.
///
/// Clones share the same storage, so a host can keep one handle and give
/// another to the shim.
#[derive(Debug, Default, Clone)]
pub struct CaptureSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl CaptureSink {
    /// Create an empty capture.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every line emitted so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl LineSink for CaptureSink {
    fn emit(&mut self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line.to_string());
    }
}

/// Outcome of a stream read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRead {
    /// Bytes produced by this read. Empty means end of data.
    Data(Vec<u8>),
    /// No input could be obtained.
    Cancelled,
}

/// Line-oriented standard input.
pub struct StandardInput {
    source: Box<dyn LineSource>,
    pending: VecDeque<Vec<u8>>,
}

impl StandardInput {
    /// Wrap a line source.
    pub fn new(source: impl LineSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            pending: VecDeque::new(),
        }
    }

    /// Read at most `max` bytes.
    ///
    /// Pulls one line from the source when nothing is queued and appends a
    /// newline. Bytes that do not fit stay queued for the next read.
    pub fn read(&mut self, max: usize) -> StreamRead {
        if max == 0 {
            return StreamRead::Data(Vec::new());
        }

        if self.pending.is_empty() {
            match self.source.next_line() {
                Some(line) => {
                    let mut bytes = line.into_bytes();
                    bytes.push(b'\n');
                    self.pending.push_back(bytes);
                }
                None => return StreamRead::Cancelled,
            }
        }

        let mut out = Vec::new();
        let mut left = max;
        while let Some(buf) = self.pending.pop_front() {
            if left >= buf.len() {
                left -= buf.len();
                out.extend_from_slice(&buf);
                if left == 0 {
                    break;
                }
            } else {
                out.extend_from_slice(&buf[..left]);
                self.pending.push_front(buf[left..].to_vec());
                break;
            }
        }

        StreamRead::Data(out)
    }

    /// Number of bytes read from the source but not yet handed out.
    pub fn queued(&self) -> usize {
        self.pending.iter().map(Vec::len).sum()
    }
}

impl fmt::Debug for StandardInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandardInput")
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}

/// Line-buffered standard output.
pub struct StandardOutput {
    sink: Box<dyn LineSink>,
    pending: Vec<u8>,
}

impl StandardOutput {
    /// Wrap a line sink.
    pub fn new(sink: impl LineSink + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            pending: Vec::new(),
        }
    }

    /// Accept `bytes`, emitting every complete line.
    ///
    /// Returns the number of bytes accepted, which is always `bytes.len()`
    /// even when part of them is still waiting for a newline.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        self.pending.extend_from_slice(bytes);
        while let Some(index) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=index).collect();
            self.sink.emit(&String::from_utf8_lossy(&line[..index]));
        }
        bytes.len()
    }

    /// Bytes written after the last newline.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Emit the unterminated tail, if any.
    pub fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let tail = std::mem::take(&mut self.pending);
        self.sink.emit(&String::from_utf8_lossy(&tail));
    }
}

impl fmt::Debug for StandardOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandardOutput")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// A regular file held entirely in host memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryFile {
    data: Vec<u8>,
    pos: u64,
}

impl MemoryFile {
    /// Create a file with the given contents, cursor at 0.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }

    /// File contents.
    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    /// Current cursor.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Read up to `max` bytes at the cursor.
    pub fn read(&mut self, max: usize) -> Vec<u8> {
        let start = usize::try_from(self.pos).unwrap_or(usize::MAX).min(self.data.len());
        let end = start.saturating_add(max).min(self.data.len());
        self.pos = end as u64;
        self.data[start..end].to_vec()
    }

    /// Write `bytes` at the cursor, extending the file if needed.
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize, Errno> {
        let start = usize::try_from(self.pos).map_err(|_| Errno::Fbig)?;
        let end = start.checked_add(bytes.len()).ok_or(Errno::Fbig)?;
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(bytes);
        self.pos = end as u64;
        Ok(bytes.len())
    }

    /// Move the cursor.
    ///
    /// `End` computes `size - offset`, not `size + offset`.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, Errno> {
        let size = i64::try_from(self.data.len()).map_err(|_| Errno::Overflow)?;
        let pos = i64::try_from(self.pos).map_err(|_| Errno::Overflow)?;
        let target = match whence {
            Whence::Set => Some(offset),
            Whence::Cur => pos.checked_add(offset),
            Whence::End => size.checked_sub(offset),
        }
        .ok_or(Errno::Overflow)?;

        if target < 0 {
            return Err(Errno::Inval);
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

/// The stream owned by a descriptor.
#[derive(Debug)]
pub enum Stream {
    /// Standard input.
    Input(StandardInput),
    /// Standard output or standard error.
    Output(StandardOutput),
    /// In-memory regular file.
    File(MemoryFile),
}

impl Stream {
    /// Read at most `max` bytes.
    pub fn read(&mut self, max: usize) -> Result<StreamRead, Errno> {
        match self {
            Stream::Input(input) => Ok(input.read(max)),
            Stream::Output(_) => Err(Errno::Badf),
            Stream::File(file) => Ok(StreamRead::Data(file.read(max))),
        }
    }

    /// Write `bytes`, returning the number accepted.
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize, Errno> {
        match self {
            Stream::Input(_) => Err(Errno::Badf),
            Stream::Output(output) => Ok(output.write(bytes)),
            Stream::File(file) => file.write(bytes),
        }
    }

    /// Reposition the stream. Standard streams have no position and always
    /// report 0.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, Errno> {
        match self {
            Stream::Input(_) | Stream::Output(_) => Ok(0),
            Stream::File(file) => file.seek(offset, whence),
        }
    }

    /// Current position.
    pub fn tell(&self) -> u64 {
        match self {
            Stream::Input(_) | Stream::Output(_) => 0,
            Stream::File(file) => file.position(),
        }
    }

    /// Emit any buffered partial line.
    pub fn flush(&mut self) {
        if let Stream::Output(output) = self {
            output.flush_pending();
        }
    }
}
