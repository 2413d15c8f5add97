#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use sim_core::{
    AccessWidth, Address, AddressOperand, BufferedIo, Cpu, Decoder, Instruction, MainMemory,
    MemoryLimits, Operand, ProgramBuilder, Register, SimConfig, Word, REGISTER_COUNT,
};

const INSTRUCTIONS: [Instruction; 16] = [
    Instruction::Add,
    Instruction::Sub,
    Instruction::Div,
    Instruction::Rem,
    Instruction::Addi,
    Instruction::Sll,
    Instruction::Li,
    Instruction::Lw,
    Instruction::Lb,
    Instruction::Sw,
    Instruction::Sb,
    Instruction::Beq,
    Instruction::J,
    Instruction::Jr,
    Instruction::Syscall,
    Instruction::Nop,
];

fn operand(bytes: &[u8]) -> Operand {
    let raw = [bytes[1], bytes[2], bytes[3], bytes[4]];
    let value = i32::from_be_bytes(raw);
    let register = Register::ALL[usize::from(bytes[1]) % REGISTER_COUNT];
    match bytes[0] % 3 {
        0 => Operand::Register(register),
        1 => Operand::Immediate(value),
        _ => Operand::Address(AddressOperand {
            label: (bytes[2] & 1 == 1).then(|| Address::new(u32::from_be_bytes(raw))),
            base: (bytes[2] & 2 == 2).then_some(register),
            offset: i32::from(i16::from_be_bytes([bytes[3], bytes[4]])),
        }),
    }
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 16 {
        return;
    }

    let mut builder = ProgramBuilder::new().label("main");
    for chunk in data.chunks_exact(16) {
        let instruction = INSTRUCTIONS[usize::from(chunk[0]) % INSTRUCTIONS.len()];
        let operands: Vec<Operand> = chunk[1..16]
            .chunks_exact(5)
            .take(usize::from(chunk[0] >> 4) % 4)
            .map(operand)
            .collect();
        let _ = Decoder::decode(instruction, &operands);
        builder = builder.instruction(instruction, operands);
    }
    let program = Arc::new(builder.words("scratch", &[0; 4]).build());

    let mut memory = MainMemory::new(Arc::clone(&program), MemoryLimits::default());
    let address = Address::new(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
    let _ = memory.read(address, AccessWidth::Word);
    let _ = memory.write(address, AccessWidth::Byte, Word::from_unsigned(u32::from(data[4])));
    let _ = memory.sbrk(i32::from(i16::from_be_bytes([data[5], data[6]])));

    let cpu = Cpu::new(
        Arc::new(BufferedIo::with_input(["7", "text"])),
        SimConfig {
            tick_millis: 0,
            ..SimConfig::default()
        },
    );
    if cpu.load_program(program).is_err() {
        return;
    }
    for _ in 0..64 {
        match cpu.run_single_cycle() {
            Ok(sim_core::CycleOutcome::Continued) => {}
            _ => break,
        }
    }
});
