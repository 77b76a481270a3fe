//! Deadline-bounded line reading over process output.
//!
//! Both readers share one algorithm: bytes are fed into a [`LineState`],
//! which hands back complete lines oldest first and decides, from the
//! remaining time budget, whether the driver should read again or stop.
//! Only the way a driver waits for bytes differs:
//! - [`TimedLines`] blocks a thread, polling in [`TICK`] slices
//! - [`AsyncTimedLines`] awaits a single read bounded by the time left
//!
//! When the deadline passes, any buffered partial line is yielded once and
//! the reader then fails with [`LineReadError::Timeout`].

mod blocking;
mod cooperative;

pub use blocking::TimedLines;
pub use cooperative::AsyncTimedLines;

use crate::error::LineReadError;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Polling slice used by the blocking reader.
pub const TICK: Duration = Duration::from_millis(500);

/// Read buffer size for both drivers.
pub(crate) const CHUNK_SIZE: usize = 8 * 1024;

fn decode(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Splits a byte stream into `\n`-terminated lines.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
    ready: VecDeque<String>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes, completing as many lines as possible.
    pub fn push(&mut self, bytes: &[u8]) {
        let mut start = self.pending.len();
        self.pending.extend_from_slice(bytes);

        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            self.ready.push_back(decode(&line[..line.len() - 1]));
            start = 0;
        }
    }

    /// Oldest complete line, if any.
    pub fn pop(&mut self) -> Option<String> {
        self.ready.pop_front()
    }

    /// The unterminated tail, emptied on return.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode(&rest))
    }
}

/// Absolute end time derived once from an optional timeout.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    end: Option<Instant>,
}

impl Deadline {
    pub fn after(timeout: Option<Duration>) -> Self {
        Self {
            end: timeout.map(|t| Instant::now() + t),
        }
    }

    /// Time left before the deadline; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.end
            .map(|end| end.saturating_duration_since(Instant::now()))
    }

    pub fn is_bounded(&self) -> bool {
        self.end.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Open,
    Exhausted,
    TimedOut,
    Done,
}

/// What a driver must do next.
#[derive(Debug)]
pub(crate) enum Step {
    Emit(String),
    Fail(LineReadError),
    /// Read more input, waiting at most the given time (`None`: no bound)
    Wait(Option<Duration>),
    Finished,
}

/// Buffering and deadline bookkeeping shared by both drivers.
#[derive(Debug)]
pub(crate) struct LineState {
    splitter: LineSplitter,
    deadline: Deadline,
    status: Status,
}

impl LineState {
    pub(crate) fn new(timeout: Option<Duration>) -> Self {
        Self {
            splitter: LineSplitter::new(),
            deadline: Deadline::after(timeout),
            status: Status::Open,
        }
    }

    pub(crate) fn is_bounded(&self) -> bool {
        self.deadline.is_bounded()
    }

    pub(crate) fn step(&mut self) -> Step {
        if let Some(line) = self.splitter.pop() {
            return Step::Emit(line);
        }

        match self.status {
            Status::Open => match self.deadline.remaining() {
                None => Step::Wait(None),
                Some(left) if left.is_zero() => {
                    self.status = Status::TimedOut;
                    self.step()
                }
                Some(left) => Step::Wait(Some(left)),
            },
            Status::Exhausted => {
                self.status = Status::Done;
                match self.splitter.take_remainder() {
                    Some(rest) => Step::Emit(rest),
                    None => Step::Finished,
                }
            }
            Status::TimedOut => match self.splitter.take_remainder() {
                Some(rest) => Step::Emit(rest),
                None => {
                    self.status = Status::Done;
                    Step::Fail(LineReadError::Timeout)
                }
            },
            Status::Done => Step::Finished,
        }
    }

    pub(crate) fn feed(&mut self, bytes: &[u8]) {
        self.splitter.push(bytes);
    }

    /// The source reached end-of-stream.
    pub(crate) fn close(&mut self) {
        if self.status == Status::Open {
            self.status = Status::Exhausted;
        }
    }

    /// The deadline passed while waiting for input.
    pub(crate) fn expire(&mut self) {
        if self.status == Status::Open {
            self.status = Status::TimedOut;
        }
    }

    /// A read failed; nothing more will be yielded.
    pub(crate) fn abort(&mut self) {
        self.status = Status::Done;
    }
}
