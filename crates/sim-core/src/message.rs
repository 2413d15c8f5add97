//! Messages broadcast to simulation listeners.

use crate::memory::AccessWidth;
use crate::{Address, Annotation, Fault, Register, Statement, Word};

/// Run lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum SimulationDetail {
    /// A program was loaded and the PC set to its entry point.
    ProgramLoaded,
    /// Run loop started.
    Started,
    /// Clock paused.
    Paused,
    /// Clock resumed.
    Resumed,
    /// Wait for the next tick was interrupted.
    Interrupted,
    /// Run loop ended. Emitted exactly once per run.
    Stopped,
}

/// Fetch-decode-execute stage identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Stage {
    /// Statement fetch into the instruction register.
    Fetch,
    /// Statement decode.
    Decode,
    /// Executable form applied.
    Execute,
}

/// Observable simulation event.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Message {
    /// Lifecycle transition.
    Simulation(SimulationDetail),
    /// A stage was entered for the current statement.
    StageEnter(Stage),
    /// Statement moved from text memory into the instruction register.
    DataMovement {
        /// Address the statement was fetched from.
        address: Address,
        /// Fetched statement.
        statement: Statement,
    },
    /// The statement at `address` is about to execute.
    ExecuteStatement {
        /// Address of the executing statement.
        address: Address,
    },
    /// A register was written.
    RegisterChanged {
        /// Written register.
        register: Register,
        /// New value.
        value: Word,
    },
    /// A data word, halfword or byte was stored.
    MemoryWritten {
        /// First byte written.
        address: Address,
        /// Access width.
        width: AccessWidth,
        /// Stored value (low `width` bytes significant).
        value: Word,
    },
    /// An annotation was reached (`address` is `None` for the init annotation).
    Annotation {
        /// Annotation reached.
        annotation: Annotation,
        /// Text address it is attached to.
        address: Option<Address>,
    },
    /// Addresses occupying each stage in pipelined mode.
    PipelineState {
        /// Statement being fetched.
        fetch: Option<Address>,
        /// Statement being decoded.
        decode: Option<Address>,
        /// Statement being executed.
        execute: Option<Address>,
    },
    /// Something went wrong; the run may or may not continue.
    Problem {
        /// Human-readable description.
        message: String,
        /// Fault behind the problem, when there is one.
        fault: Option<Fault>,
    },
}

impl Message {
    /// Problem message without an underlying fault.
    #[must_use]
    pub fn problem(message: impl Into<String>) -> Self {
        Self::Problem {
            message: message.into(),
            fault: None,
        }
    }

    /// True for [`Message::Problem`].
    #[must_use]
    pub const fn is_problem(&self) -> bool {
        matches!(self, Self::Problem { .. })
    }
}
