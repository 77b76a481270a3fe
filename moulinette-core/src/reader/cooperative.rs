use super::{LineState, Step, CHUNK_SIZE};
use crate::error::LineReadError;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Task-friendly counterpart of [`super::TimedLines`].
///
/// Each read is bounded by the time left until the deadline, re-derived
/// right before the read is awaited. A non-positive budget fails with
/// [`LineReadError::Timeout`] without reading again.
pub struct AsyncTimedLines<R> {
    state: LineState,
    reader: R,
    buf: Box<[u8]>,
}

impl<R: AsyncRead + Unpin> AsyncTimedLines<R> {
    pub fn new(reader: R, timeout: Option<Duration>) -> Self {
        Self {
            state: LineState::new(timeout),
            reader,
            buf: vec![0u8; CHUNK_SIZE].into_boxed_slice(),
        }
    }

    /// Next decoded line, `None` once the stream is over.
    pub async fn next_line(&mut self) -> Option<Result<String, LineReadError>> {
        loop {
            let bound = match self.state.step() {
                Step::Emit(line) => return Some(Ok(line)),
                Step::Fail(err) => return Some(Err(err)),
                Step::Finished => return None,
                Step::Wait(bound) => bound,
            };

            let read = self.reader.read(&mut self.buf);
            let outcome = match bound {
                None => read.await,
                Some(left) => match tokio::time::timeout(left, read).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        self.state.expire();
                        continue;
                    }
                },
            };

            match outcome {
                Ok(0) => self.state.close(),
                Ok(n) => self.state.feed(&self.buf[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.state.abort();
                    return Some(Err(e.into()));
                }
            }
        }
    }

    /// Drain the stream, collecting lines until the end or the first failure.
    pub async fn collect_lines(mut self) -> (Vec<String>, Option<LineReadError>) {
        let mut lines = Vec::new();
        while let Some(next) = self.next_line().await {
            match next {
                Ok(line) => lines.push(line),
                Err(err) => return (lines, Some(err)),
            }
        }
        (lines, None)
    }
}
