use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;

use sim_core::{BufferedIo, Io, ReadCancelled};
use tracing::warn;

/// Console IO backed by the process's stdin and stdout.
///
/// A reader thread queues stdin lines so that a blocked read can be
/// cancelled; end of input cancels every later read.
#[derive(Debug)]
pub struct StdIo {
    input: Arc<BufferedIo>,
}

impl StdIo {
    /// Starts the stdin reader thread.
    #[must_use]
    pub fn spawn() -> Self {
        let input = Arc::new(BufferedIo::new());
        let feed = Arc::clone(&input);
        let spawned = thread::Builder::new()
            .name("stdin".to_string())
            .spawn(move || {
                for line in io::stdin().lock().lines() {
                    match line {
                        Ok(line) => feed.push_input(line),
                        Err(error) => {
                            warn!(%error, "stdin read failed");
                            break;
                        }
                    }
                }
                feed.close_input();
            });
        if let Err(error) = spawned {
            warn!(%error, "stdin reader thread failed to start");
            input.close_input();
        }
        Self { input }
    }
}

impl Io for StdIo {
    fn read_string(&self) -> Result<String, ReadCancelled> {
        self.input.read_string()
    }

    fn print_string(&self, text: &str) {
        let mut stdout = io::stdout().lock();
        if stdout
            .write_all(text.as_bytes())
            .and_then(|()| stdout.flush())
            .is_err()
        {
            warn!("stdout write failed");
        }
    }

    fn cancel_read(&self) {
        self.input.cancel_read();
    }
}
