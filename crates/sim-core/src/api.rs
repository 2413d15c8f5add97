//! Host-facing configuration, snapshot and control-error types.

use std::time::Duration;

use thiserror::Error;

use crate::memory::{MemoryLimits, DEFAULT_MAX_HEAP_BYTES, DEFAULT_MAX_STACK_BYTES};
use crate::{Address, CpuPhase, Fault, Statement, Word, REGISTER_COUNT};

/// Default tick period in milliseconds.
pub const DEFAULT_TICK_MILLIS: u64 = 100;
/// Ticks spent per cycle when stages do not overlap.
pub const STAGES_PER_CYCLE: u32 = 3;

/// Simulator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Deserialize, serde::Serialize),
    serde(default)
)]
pub struct SimConfig {
    /// Tick period in milliseconds; zero runs unthrottled.
    pub tick_millis: u64,
    /// Overlap stages (one tick per cycle instead of three).
    pub pipelined: bool,
    /// Dispatch annotations to the sandbox.
    pub annotations_enabled: bool,
    /// Stack growth ceiling in bytes.
    pub max_stack_bytes: u32,
    /// Heap growth ceiling in bytes.
    pub max_heap_bytes: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_millis: DEFAULT_TICK_MILLIS,
            pipelined: false,
            annotations_enabled: true,
            max_stack_bytes: DEFAULT_MAX_STACK_BYTES,
            max_heap_bytes: DEFAULT_MAX_HEAP_BYTES,
        }
    }
}

impl SimConfig {
    /// Time between cycles: `tick_millis` when pipelined, three ticks otherwise.
    #[must_use]
    pub const fn cycle_period(&self) -> Duration {
        let ticks = if self.pipelined { 1 } else { STAGES_PER_CYCLE as u64 };
        Duration::from_millis(self.tick_millis.saturating_mul(ticks))
    }

    /// Segment growth ceilings.
    #[must_use]
    pub const fn memory_limits(&self) -> MemoryLimits {
        MemoryLimits {
            max_heap_bytes: self.max_heap_bytes,
            max_stack_bytes: self.max_stack_bytes,
        }
    }

    /// Tick period that yields `hz` cycles per second; `0` means unthrottled.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::InvalidFrequency`] for negative or non-finite input.
    pub fn tick_millis_for_frequency(&self, hz: f64) -> Result<u64, ControlError> {
        if !hz.is_finite() || hz < 0.0 {
            return Err(ControlError::InvalidFrequency(hz));
        }
        if hz == 0.0 {
            return Ok(0);
        }
        let ticks = if self.pipelined {
            1.0
        } else {
            f64::from(STAGES_PER_CYCLE)
        };
        let millis = (1000.0 / (hz * ticks)).round().max(1.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok(millis.min(u64::MAX as f64) as u64)
    }
}

/// Misuse of the CPU control surface.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    /// Operation requires the run loop to be idle.
    #[error("simulation is running")]
    Running,
    /// Operation requires a loaded program.
    #[error("no program loaded")]
    NotLoaded,
    /// Requested frequency is negative or not finite.
    #[error("invalid cycle frequency {0}")]
    InvalidFrequency(f64),
    /// Simulation thread could not be spawned.
    #[error("failed to spawn simulation thread: {0}")]
    Spawn(String),
    /// Loading raised a program fault.
    #[error(transparent)]
    Fault(#[from] Fault),
}

/// Point-in-time view of CPU state for display.
///
/// Fields are read individually; during a run they may straddle a cycle boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CpuSnapshot {
    /// Lifecycle phase.
    pub phase: CpuPhase,
    /// Program counter.
    pub program_counter: Address,
    /// Last fetched statement.
    pub instruction_register: Option<Statement>,
    /// Register values in slot order.
    pub registers: [Word; REGISTER_COUNT],
}
