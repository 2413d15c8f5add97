//! Machine state shared between the run loop and observers.

/// Register identifiers and the atomic register file.
pub mod registers;
/// CPU lifecycle phases.
pub mod run_state;

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;

pub use registers::{Register, RegisterBank, REGISTER_COUNT};
pub use run_state::CpuPhase;

use crate::memory::{AccessWidth, MainMemory};
use crate::{Address, Fault, Word};

/// Registers, program counter and main memory of one simulated machine.
///
/// The run loop is the only writer. Observers (annotation bridges, snapshot
/// readers) share it through an `Arc` and read without stopping the run.
/// The memory lock is held only for the duration of a single access.
#[derive(Debug, Default)]
pub struct MachineState {
    registers: RegisterBank,
    pc: AtomicU32,
    memory: RwLock<MainMemory>,
}

impl MachineState {
    /// Fresh machine with empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register file.
    #[must_use]
    pub const fn registers(&self) -> &RegisterBank {
        &self.registers
    }

    /// Current program counter.
    #[must_use]
    pub fn program_counter(&self) -> Address {
        Address::new(self.pc.load(Ordering::Acquire))
    }

    /// Moves the program counter.
    pub fn set_program_counter(&self, address: Address) {
        self.pc.store(address.value(), Ordering::Release);
    }

    /// Main memory behind its lock.
    #[must_use]
    pub const fn memory(&self) -> &RwLock<MainMemory> {
        &self.memory
    }

    /// Reads one value from main memory.
    ///
    /// # Errors
    ///
    /// Returns the memory, heap or stack fault raised by the access.
    pub fn read(&self, address: Address, width: AccessWidth) -> Result<Word, Fault> {
        self.memory.read().read(address, width)
    }
}
