//! Console IO contract used by syscalls and the REPL.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// A blocking read was cancelled (pause, stop or closed input).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("read cancelled")]
pub struct ReadCancelled;

/// Console IO used by the simulated program.
///
/// `read_string` may block; `cancel_read` must wake a blocked reader from
/// any thread and make it return [`ReadCancelled`].
pub trait Io: Send + Sync {
    /// Reads one line without its terminator.
    ///
    /// # Errors
    ///
    /// Returns [`ReadCancelled`] when the read is cancelled or input is exhausted.
    fn read_string(&self) -> Result<String, ReadCancelled>;

    /// Writes text verbatim.
    fn print_string(&self, text: &str);

    /// Cancels a read blocked in another thread. No effect when nobody is reading.
    fn cancel_read(&self);
}

#[derive(Debug, Default)]
struct BufferedState {
    input: VecDeque<String>,
    output: String,
    waiting_readers: usize,
    cancel_pending: bool,
    input_closed: bool,
}

/// In-memory [`Io`] with queued input lines and captured output.
#[derive(Debug, Default)]
pub struct BufferedIo {
    state: Mutex<BufferedState>,
    input_ready: Condvar,
}

impl BufferedIo {
    /// Empty buffers, input open.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers pre-loaded with `lines`, input closed after them.
    #[must_use]
    pub fn with_input<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let io = Self::new();
        {
            let mut state = io.state.lock();
            state.input.extend(lines.into_iter().map(Into::into));
            state.input_closed = true;
        }
        io
    }

    /// Queues one input line and wakes a blocked reader.
    pub fn push_input(&self, line: impl Into<String>) {
        self.state.lock().input.push_back(line.into());
        self.input_ready.notify_all();
    }

    /// Marks input as exhausted; pending and future reads return [`ReadCancelled`] once the queue drains.
    pub fn close_input(&self) {
        self.state.lock().input_closed = true;
        self.input_ready.notify_all();
    }

    /// Everything printed so far.
    #[must_use]
    pub fn output(&self) -> String {
        self.state.lock().output.clone()
    }

    /// Drains captured output.
    pub fn take_output(&self) -> String {
        std::mem::take(&mut self.state.lock().output)
    }

    /// Number of threads currently blocked in `read_string`.
    #[must_use]
    pub fn waiting_readers(&self) -> usize {
        self.state.lock().waiting_readers
    }
}

impl Io for BufferedIo {
    fn read_string(&self) -> Result<String, ReadCancelled> {
        let mut state = self.state.lock();
        state.waiting_readers += 1;
        let result = loop {
            if state.cancel_pending {
                state.cancel_pending = false;
                break Err(ReadCancelled);
            }
            if let Some(line) = state.input.pop_front() {
                break Ok(line);
            }
            if state.input_closed {
                break Err(ReadCancelled);
            }
            self.input_ready.wait(&mut state);
        };
        state.waiting_readers -= 1;
        result
    }

    fn print_string(&self, text: &str) {
        self.state.lock().output.push_str(text);
    }

    fn cancel_read(&self) {
        let mut state = self.state.lock();
        if state.waiting_readers > 0 {
            state.cancel_pending = true;
            self.input_ready.notify_all();
        }
    }
}
