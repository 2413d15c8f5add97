//! System services selected by `$v0`.

use tracing::debug;

use super::{ExecuteOutcome, Executor};
use crate::memory::AccessWidth;
use crate::message::Message;
use crate::{Address, ExecuteFault, Fault, Register, Word};

/// Supported `syscall` service codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyscallCode {
    /// 1: print `$a0` as a signed integer.
    PrintInt,
    /// 4: print the NUL-terminated string at `$a0`.
    PrintString,
    /// 5: read an integer into `$v0`.
    ReadInt,
    /// 8: read a line into the buffer at `$a0` of size `$a1`.
    ReadString,
    /// 9: grow the heap by `$a0` bytes, old break into `$v0`.
    Sbrk,
    /// 10: exit.
    Exit,
    /// 11: print the low byte of `$a0` as a character.
    PrintChar,
    /// 12: read a character into `$v0`.
    ReadChar,
    /// 17: exit with code `$a0`.
    ExitWithCode,
}

impl SyscallCode {
    /// Maps a `$v0` value to a service.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::PrintInt),
            4 => Some(Self::PrintString),
            5 => Some(Self::ReadInt),
            8 => Some(Self::ReadString),
            9 => Some(Self::Sbrk),
            10 => Some(Self::Exit),
            11 => Some(Self::PrintChar),
            12 => Some(Self::ReadChar),
            17 => Some(Self::ExitWithCode),
            _ => None,
        }
    }
}

/// Runs the service selected by `$v0`.
///
/// Read services consume input before touching any state, so a cancelled
/// read returns [`ExecuteOutcome::ReadCancelled`] with nothing written.
pub(super) fn dispatch(
    executor: &Executor<'_>,
    current_pc: Address,
    next_pc: Address,
) -> Result<ExecuteOutcome, Fault> {
    let code = executor.register(Register::V0).as_signed();
    let service = SyscallCode::from_code(code).ok_or(ExecuteFault::UnknownSyscall { code })?;
    let a0 = executor.register(Register::A0);

    match service {
        SyscallCode::PrintInt => executor.io.print_string(&a0.as_signed().to_string()),
        SyscallCode::PrintString => {
            let bytes = executor
                .machine
                .memory()
                .read()
                .read_c_string(Address::new(a0.as_unsigned()))?;
            executor.io.print_string(&String::from_utf8_lossy(&bytes));
        }
        SyscallCode::PrintChar => {
            let byte = a0.to_be_bytes()[3];
            executor.io.print_string(char::from(byte).encode_utf8(&mut [0; 4]));
        }
        SyscallCode::ReadInt => {
            let Some(line) = read_line(executor, current_pc) else {
                return Ok(ExecuteOutcome::ReadCancelled);
            };
            let value = line
                .trim()
                .parse::<i32>()
                .map_err(|_| ExecuteFault::InvalidInput { input: line.clone() })?;
            executor.write_register(Register::V0, Word::from_signed(value));
        }
        SyscallCode::ReadChar => {
            let Some(line) = read_line(executor, current_pc) else {
                return Ok(ExecuteOutcome::ReadCancelled);
            };
            let first = line.chars().next().unwrap_or('\n');
            executor.write_register(Register::V0, Word::from_unsigned(u32::from(first)));
        }
        SyscallCode::ReadString => {
            let Some(line) = read_line(executor, current_pc) else {
                return Ok(ExecuteOutcome::ReadCancelled);
            };
            let capacity = executor.register(Register::A1).as_signed();
            if capacity > 0 {
                let mut bytes = line.into_bytes();
                bytes.push(b'\n');
                bytes.truncate(usize::try_from(capacity - 1).unwrap_or_default());
                bytes.push(0);
                let buffer = Address::new(a0.as_unsigned());
                executor.machine.memory().write().write_bytes(buffer, &bytes)?;
                executor.bus.send(&Message::MemoryWritten {
                    address: buffer,
                    width: AccessWidth::Byte,
                    value: Word::from_unsigned(u32::from(bytes[0])),
                });
            }
        }
        SyscallCode::Sbrk => {
            let old_break = executor.machine.memory().write().sbrk(a0.as_signed())?;
            executor.write_register(Register::V0, Word::from_unsigned(old_break.value()));
        }
        SyscallCode::Exit => return Ok(ExecuteOutcome::Exit { code: None }),
        SyscallCode::ExitWithCode => {
            return Ok(ExecuteOutcome::Exit {
                code: Some(a0.as_signed()),
            })
        }
    }
    Ok(ExecuteOutcome::Continue { next_pc })
}

fn read_line(executor: &Executor<'_>, current_pc: Address) -> Option<String> {
    let line = executor.io.read_string().ok();
    if line.is_none() {
        debug!(%current_pc, "console read cancelled");
    }
    line
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::SyscallCode;
    use crate::execute::{ExecuteOutcome, Executor};
    use crate::decoder::ExecutableForm;
    use crate::io::BufferedIo;
    use crate::listener::ListenerBus;
    use crate::memory::{AccessWidth, MainMemory, MemoryLimits};
    use crate::{
        Address, ExecuteFault, Fault, Instruction, MachineState, ProgramBuilder, Register, Word,
    };
    use rstest::rstest;

    const PC: Address = Address::new(0x0040_0000);
    const NEXT: ExecuteOutcome = ExecuteOutcome::Continue {
        next_pc: Address::new(0x0040_0004),
    };

    fn machine() -> MachineState {
        let program = ProgramBuilder::new()
            .label("main")
            .instruction(Instruction::Syscall, Vec::new())
            .asciiz("greeting", "hello")
            .data("buffer", &[0xaa; 8])
            .build();
        let machine = MachineState::new();
        *machine.memory().write() = MainMemory::new(Arc::new(program), MemoryLimits::default());
        machine
    }

    fn syscall(machine: &MachineState, io: &BufferedIo, v0: i32, a0: i32) -> Result<ExecuteOutcome, Fault> {
        machine.registers().set(Register::V0, Word::from_signed(v0));
        machine.registers().set(Register::A0, Word::from_signed(a0));
        let bus = ListenerBus::new();
        Executor::new(machine, io, &bus).execute(&ExecutableForm::Syscall, PC)
    }

    #[rstest]
    #[case(1, SyscallCode::PrintInt)]
    #[case(10, SyscallCode::Exit)]
    #[case(17, SyscallCode::ExitWithCode)]
    fn codes_map_to_services(#[case] code: i32, #[case] expected: SyscallCode) {
        assert_eq!(SyscallCode::from_code(code), Some(expected));
    }

    #[test]
    fn print_services_write_to_io() {
        let machine = machine();
        let io = BufferedIo::new();
        assert_eq!(syscall(&machine, &io, 1, -42), Ok(NEXT));
        assert_eq!(syscall(&machine, &io, 11, i32::from(b'!')), Ok(NEXT));
        #[allow(clippy::cast_possible_wrap)]
        let greeting = 0x1001_0000_u32 as i32;
        assert_eq!(syscall(&machine, &io, 4, greeting), Ok(NEXT));
        assert_eq!(io.take_output(), "-42!hello");
    }

    #[test]
    fn read_int_parses_and_rejects() {
        let machine = machine();
        let io = BufferedIo::with_input([" 12 ", "twelve"]);
        assert_eq!(syscall(&machine, &io, 5, 0), Ok(NEXT));
        assert_eq!(machine.registers().get(Register::V0), Word::from_signed(12));
        assert_eq!(
            syscall(&machine, &io, 5, 0),
            Err(Fault::Execute(ExecuteFault::InvalidInput {
                input: "twelve".to_string()
            }))
        );
    }

    #[test]
    fn cancelled_read_writes_nothing() {
        let machine = machine();
        let io = BufferedIo::with_input(Vec::<String>::new());
        machine.registers().set(Register::A1, Word::from_signed(4));
        assert_eq!(syscall(&machine, &io, 12, 0), Ok(ExecuteOutcome::ReadCancelled));
        assert_eq!(machine.registers().get(Register::V0), Word::from_signed(12));
        assert_eq!(
            syscall(&machine, &io, 8, 0x1001_0008),
            Ok(ExecuteOutcome::ReadCancelled)
        );
        assert_eq!(
            machine.memory().read().read(Address::new(0x1001_0008), AccessWidth::Byte),
            Ok(Word::from_unsigned(0xaa))
        );
    }

    #[test]
    fn read_char_takes_first_character_or_newline() {
        let machine = machine();
        let io = BufferedIo::with_input(["yes", ""]);
        assert_eq!(syscall(&machine, &io, 12, 0), Ok(NEXT));
        assert_eq!(
            machine.registers().get(Register::V0),
            Word::from_unsigned(u32::from('y'))
        );
        assert_eq!(syscall(&machine, &io, 12, 0), Ok(NEXT));
        assert_eq!(
            machine.registers().get(Register::V0),
            Word::from_unsigned(u32::from('\n'))
        );
    }

    #[test]
    fn read_string_truncates_to_buffer() {
        let machine = machine();
        let io = BufferedIo::with_input(["abcdef"]);
        machine.registers().set(Register::A1, Word::from_signed(4));
        assert_eq!(syscall(&machine, &io, 8, 0x1001_0008), Ok(NEXT));
        let memory = machine.memory().read();
        assert_eq!(
            memory.read_c_string(Address::new(0x1001_0008)),
            Ok(b"abc".to_vec())
        );
        assert_eq!(
            memory.read(Address::new(0x1001_000c), AccessWidth::Byte),
            Ok(Word::from_unsigned(0xaa))
        );
    }

    #[test]
    fn sbrk_returns_old_break() {
        let machine = machine();
        let io = BufferedIo::new();
        assert_eq!(syscall(&machine, &io, 9, 16), Ok(NEXT));
        assert_eq!(
            machine.registers().get(Register::V0),
            Word::from_unsigned(0x1004_0000)
        );
        assert_eq!(syscall(&machine, &io, 9, 4), Ok(NEXT));
        assert_eq!(
            machine.registers().get(Register::V0),
            Word::from_unsigned(0x1004_0010)
        );
    }

    #[test]
    fn exit_services_end_the_program() {
        let machine = machine();
        let io = BufferedIo::new();
        assert_eq!(syscall(&machine, &io, 10, 0), Ok(ExecuteOutcome::Exit { code: None }));
        assert_eq!(
            syscall(&machine, &io, 17, 3),
            Ok(ExecuteOutcome::Exit { code: Some(3) })
        );
    }

    #[test]
    fn unknown_code_faults() {
        let machine = machine();
        let io = BufferedIo::new();
        assert_eq!(
            syscall(&machine, &io, 99, 0),
            Err(Fault::Execute(ExecuteFault::UnknownSyscall { code: 99 }))
        );
    }
}
