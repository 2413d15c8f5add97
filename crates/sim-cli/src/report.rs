use std::sync::atomic::{AtomicBool, Ordering};

use sim_core::{Message, SimulationListener};

/// Prints problem messages to stderr and remembers that one was seen.
#[derive(Debug, Default)]
pub struct ProblemReporter {
    seen: AtomicBool,
}

impl ProblemReporter {
    /// Reporter with no problems seen.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True once any problem message has been delivered.
    #[must_use]
    pub fn problem_seen(&self) -> bool {
        self.seen.load(Ordering::Acquire)
    }
}

impl SimulationListener for ProblemReporter {
    fn on_message(&self, message: &Message) {
        if let Message::Problem { message, .. } = message {
            self.seen.store(true, Ordering::Release);
            eprintln!("problem: {message}");
        }
    }
}
