//! Core of an instruction-level load/store emulator with a clocked run loop,
//! a listener bus and a sandboxed annotation interpreter.

/// Program contract produced by an assembler: addresses, words, statements.
pub mod program;
pub use program::{
    Address, AddressOperand, Annotation, Instruction, Operand, OperandFormat, OperandKind,
    Program, ProgramBuilder, Statement, Word, DEFAULT_DATA_START, DEFAULT_DYNAMIC_START,
    DEFAULT_GLOBAL_POINTER, DEFAULT_STACK_POINTER, DEFAULT_TEXT_START, ENTRY_LABEL,
    INSTRUCTION_BYTES,
};

/// Fault taxonomy for decode, execute, memory, heap and stack failures.
pub mod fault;
pub use fault::{DecodeFault, ExecuteFault, Fault, FaultClass, HeapFault, MemoryFault, StackFault};

/// Register bank, machine state and CPU lifecycle phases.
pub mod state;
pub use state::{CpuPhase, MachineState, Register, RegisterBank, REGISTER_COUNT};

/// Segmented main memory with bounds, alignment and growth checks.
pub mod memory;
pub use memory::{
    AccessWidth, MainMemory, MemoryLimits, Segment, SegmentBounds, SegmentLayout,
    STACK_PAGE_BYTES,
};

/// Pure word arithmetic.
pub mod alu;
pub use alu::{evaluate, AluOp};

/// Statement decoder producing executable forms.
pub mod decoder;
pub use decoder::{Condition, Decoder, ExecutableForm, JumpTarget, Source};

/// Executor and system services.
pub mod execute;
pub use execute::{ExecuteOutcome, Executor, SyscallCode};

/// Messages broadcast to listeners.
pub mod message;
pub use message::{Message, SimulationDetail, Stage};

/// Listener contract and the synchronous listener bus.
pub mod listener;
pub use listener::{ChannelListener, ListenerBus, MessageLog, SimulationListener, TracingListener};

/// Console IO contract.
pub mod io;
pub use io::{BufferedIo, Io, ReadCancelled};

/// Heartbeat clock.
pub mod clock;
pub use clock::{Clock, ClockState, Interrupted};

/// Host-facing configuration, snapshots and control errors.
pub mod api;
pub use api::{ControlError, CpuSnapshot, SimConfig, DEFAULT_TICK_MILLIS, STAGES_PER_CYCLE};

/// Cycle runner.
pub mod cpu;
pub use cpu::{Cpu, CycleOutcome, FELL_OFF_END};

/// Capability-gated Lua sandbox for annotations.
pub mod annotation;
pub use annotation::{
    display_value, install_simulation_bridge, ReplExit, Sandbox, SandboxError, SandboxViolation,
    SAFE_BUILTINS,
};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
