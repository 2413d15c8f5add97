//! Executor: applies an [`ExecutableForm`] to machine state.
//!
//! Each form runs in a fixed order: read source registers, compute the
//! result or effective address, access memory, write the destination
//! register, then choose the next PC. A fault in any step stops the
//! sequence, so later steps never observe partial results. Every register
//! or memory write is announced on the listener bus after the write lands.

mod helpers;
mod syscall;

pub use helpers::{effective_address, next_sequential, sign_extend};
pub use syscall::SyscallCode;

use tracing::debug;

use crate::alu;
use crate::decoder::{ExecutableForm, JumpTarget, Source};
use crate::io::Io;
use crate::listener::ListenerBus;
use crate::memory::AccessWidth;
use crate::message::Message;
use crate::{
    Address, ExecuteFault, Fault, MachineState, Register, StackFault, Word, INSTRUCTION_BYTES,
};

/// Result of executing one form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecuteOutcome {
    /// Continue at `next_pc`.
    Continue {
        /// Address of the next statement.
        next_pc: Address,
    },
    /// Program requested a clean exit.
    Exit {
        /// Exit code, when the program supplied one.
        code: Option<i32>,
    },
    /// A console read was cancelled before it produced a line. Nothing was
    /// written, so the same form may be executed again.
    ReadCancelled,
}

/// Applies executable forms to one machine.
pub struct Executor<'a> {
    machine: &'a MachineState,
    io: &'a dyn Io,
    bus: &'a ListenerBus,
}

impl<'a> Executor<'a> {
    /// Binds the executor to machine state, console IO and the listener bus.
    #[must_use]
    pub fn new(machine: &'a MachineState, io: &'a dyn Io, bus: &'a ListenerBus) -> Self {
        Self { machine, io, bus }
    }

    /// Executes `form`, which was fetched from `current_pc`.
    ///
    /// # Errors
    ///
    /// Returns the first execute, memory, heap or stack fault raised.
    pub fn execute(&self, form: &ExecutableForm, current_pc: Address) -> Result<ExecuteOutcome, Fault> {
        let sequential = next_sequential(current_pc)?;
        let next_pc = match *form {
            ExecutableForm::Alu { op, dest, lhs, rhs } => {
                let value = alu::evaluate(op, self.register(lhs), self.source(rhs))?;
                self.write_register(dest, value);
                sequential
            }
            ExecutableForm::LoadImmediate { dest, value } => {
                self.write_register(dest, value);
                sequential
            }
            ExecutableForm::LoadAddress { dest, address } => {
                let target = effective_address(address, self.machine.registers())?;
                self.write_register(dest, Word::from_unsigned(target.value()));
                sequential
            }
            ExecutableForm::Load {
                dest,
                address,
                width,
                sign_extend: extend,
            } => {
                let target = effective_address(address, self.machine.registers())?;
                let raw = self.load(target, width)?;
                let value = if extend { sign_extend(raw, width) } else { raw };
                self.write_register(dest, value);
                sequential
            }
            ExecutableForm::Store {
                source,
                address,
                width,
            } => {
                let value = self.register(source);
                let target = effective_address(address, self.machine.registers())?;
                self.store(target, width, value)?;
                sequential
            }
            ExecutableForm::Branch {
                condition,
                lhs,
                rhs,
                target,
            } => {
                if condition.holds(self.register(lhs).as_signed(), self.source(rhs).as_signed()) {
                    target
                } else {
                    sequential
                }
            }
            ExecutableForm::Jump { target, link } => {
                let destination = match target {
                    JumpTarget::Absolute(address) => address,
                    JumpTarget::Register(register) => {
                        Address::new(self.register(register).as_unsigned())
                    }
                };
                if !destination.is_aligned(INSTRUCTION_BYTES) {
                    return Err(ExecuteFault::MisalignedTarget {
                        target: destination,
                    }
                    .into());
                }
                if link {
                    self.write_register(Register::Ra, Word::from_unsigned(sequential.value()));
                }
                destination
            }
            ExecutableForm::Syscall => return syscall::dispatch(self, current_pc, sequential),
            ExecutableForm::Nop => sequential,
            ExecutableForm::Break => return Err(ExecuteFault::Break.into()),
            ExecutableForm::Exit => return Ok(ExecuteOutcome::Exit { code: None }),
        };
        Ok(ExecuteOutcome::Continue { next_pc })
    }

    fn register(&self, register: Register) -> Word {
        self.machine.registers().get(register)
    }

    fn source(&self, source: Source) -> Word {
        match source {
            Source::Register(register) => self.register(register),
            Source::Immediate(value) => value,
        }
    }

    fn write_register(&self, register: Register, value: Word) {
        if self.machine.registers().set(register, value) {
            self.bus.send(&Message::RegisterChanged { register, value });
        }
    }

    fn load(&self, address: Address, width: AccessWidth) -> Result<Word, Fault> {
        let result = self.machine.memory().read().read(address, width);
        match result {
            Err(Fault::Stack(StackFault::BelowCommitted { .. })) => {
                let mut memory = self.machine.memory().write();
                memory.grow_stack_to(address)?;
                debug!(bottom = %memory.stack_bottom(), "stack grown for load");
                memory.read(address, width)
            }
            other => other,
        }
    }

    fn store(&self, address: Address, width: AccessWidth, value: Word) -> Result<(), Fault> {
        {
            let mut memory = self.machine.memory().write();
            match memory.write(address, width, value) {
                Err(Fault::Stack(StackFault::BelowCommitted { .. })) => {
                    memory.grow_stack_to(address)?;
                    debug!(bottom = %memory.stack_bottom(), "stack grown for store");
                    memory.write(address, width, value)?;
                }
                other => other?,
            }
        }
        self.bus.send(&Message::MemoryWritten {
            address,
            width,
            value,
        });
        Ok(())
    }
}
