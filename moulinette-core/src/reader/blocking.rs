use super::{LineState, Step, CHUNK_SIZE, TICK};
use crate::error::LineReadError;
use std::io::{ErrorKind, Read};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

enum Source<R> {
    /// Read in the calling thread; used without a deadline.
    Direct(R),
    /// Chunks forwarded by a pump thread so waits can be bounded.
    Pumped(Receiver<std::io::Result<Vec<u8>>>),
}

/// Blocking, deadline-bounded line iterator.
///
/// Yields `Ok(line)` for every decoded line. With a deadline, a read that
/// outlives it ends the iteration with `Err(LineReadError::Timeout)` right
/// after the buffered partial line, if any. The iterator is not restartable.
pub struct TimedLines<R> {
    state: LineState,
    source: Source<R>,
}

impl<R: Read + Send + 'static> TimedLines<R> {
    pub fn new(reader: R, timeout: Option<Duration>) -> Self {
        let state = LineState::new(timeout);
        let source = if state.is_bounded() {
            Source::Pumped(spawn_pump(reader))
        } else {
            Source::Direct(reader)
        };
        Self { state, source }
    }

    /// Wait for input once, feeding whatever arrived into the state.
    fn pull(&mut self, bound: Option<Duration>) -> Result<(), LineReadError> {
        match &mut self.source {
            Source::Direct(reader) => {
                let mut buf = [0u8; CHUNK_SIZE];
                match reader.read(&mut buf) {
                    Ok(0) => self.state.close(),
                    Ok(n) => self.state.feed(&buf[..n]),
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Source::Pumped(rx) => {
                let received = match bound {
                    Some(left) => rx.recv_timeout(left.min(TICK)),
                    None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                };
                match received {
                    Ok(Ok(chunk)) => self.state.feed(&chunk),
                    Ok(Err(e)) => return Err(e.into()),
                    // The next step re-reads the clock.
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => self.state.close(),
                }
            }
        }
        Ok(())
    }
}

impl<R: Read + Send + 'static> Iterator for TimedLines<R> {
    type Item = Result<String, LineReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.state.step() {
                Step::Emit(line) => return Some(Ok(line)),
                Step::Fail(err) => return Some(Err(err)),
                Step::Finished => return None,
                Step::Wait(bound) => {
                    if let Err(err) = self.pull(bound) {
                        self.state.abort();
                        return Some(Err(err));
                    }
                }
            }
        }
    }
}

/// Forward chunks from `reader` until end-of-stream, an error, or until the
/// receiving side is gone.
fn spawn_pump<R: Read + Send + 'static>(mut reader: R) -> Receiver<std::io::Result<Vec<u8>>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(Ok(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    });
    rx
}
