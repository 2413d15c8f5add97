use std::fmt;

use crate::{Address, Register};

/// Operand shape an instruction expects, in source order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum OperandFormat {
    /// No operands (`syscall`, `nop`).
    None,
    /// One register (`jr $ra`).
    Register,
    /// One label (`j loop`).
    Label,
    /// Destination and source registers (`move $t0, $t1`).
    DestSrc,
    /// Destination register and immediate (`li $t0, 5`).
    DestImmediate,
    /// Register and memory reference (`lw $t0, 4($sp)`).
    DestAddress,
    /// Destination and two source registers (`add $t0, $t1, $t2`).
    DestSrcSrc,
    /// Destination, source register and immediate (`addi $t0, $t1, 5`).
    DestSrcImmediate,
    /// Compared register and label (`beqz $t0, done`).
    CompareLabel,
    /// Compared register, register-or-immediate and label (`blt $t0, $t1, loop`).
    CompareCompareLabel,
}

impl OperandFormat {
    /// Number of operands the format requires.
    #[must_use]
    pub const fn arity(self) -> usize {
        match self {
            Self::None => 0,
            Self::Register | Self::Label => 1,
            Self::DestSrc | Self::DestImmediate | Self::DestAddress | Self::CompareLabel => 2,
            Self::DestSrcSrc | Self::DestSrcImmediate | Self::CompareCompareLabel => 3,
        }
    }
}

/// Instruction mnemonics understood by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Deserialize, serde::Serialize),
    serde(rename_all = "lowercase")
)]
#[allow(missing_docs)]
pub enum Instruction {
    Add,
    Addu,
    Sub,
    Subu,
    And,
    Or,
    Xor,
    Nor,
    Slt,
    Sltu,
    Seq,
    Sne,
    Mul,
    Div,
    Divu,
    Rem,
    Remu,
    Sllv,
    Srlv,
    Srav,
    Addi,
    Addiu,
    Andi,
    Ori,
    Xori,
    Slti,
    Sltiu,
    Sll,
    Srl,
    Sra,
    Move,
    Neg,
    Negu,
    Abs,
    Not,
    Li,
    Lui,
    La,
    Lw,
    Lh,
    Lhu,
    Lb,
    Lbu,
    Sw,
    Sh,
    Sb,
    Beq,
    Bne,
    Blt,
    Ble,
    Bgt,
    Bge,
    Beqz,
    Bnez,
    Bltz,
    Blez,
    Bgtz,
    Bgez,
    B,
    J,
    Jal,
    Jr,
    Jalr,
    Syscall,
    Nop,
    Break,
    Exit,
}

/// Mnemonic and operand format for every [`Instruction`].
pub const INSTRUCTION_TABLE: &[(Instruction, &str, OperandFormat)] = &[
    (Instruction::Add, "add", OperandFormat::DestSrcSrc),
    (Instruction::Addu, "addu", OperandFormat::DestSrcSrc),
    (Instruction::Sub, "sub", OperandFormat::DestSrcSrc),
    (Instruction::Subu, "subu", OperandFormat::DestSrcSrc),
    (Instruction::And, "and", OperandFormat::DestSrcSrc),
    (Instruction::Or, "or", OperandFormat::DestSrcSrc),
    (Instruction::Xor, "xor", OperandFormat::DestSrcSrc),
    (Instruction::Nor, "nor", OperandFormat::DestSrcSrc),
    (Instruction::Slt, "slt", OperandFormat::DestSrcSrc),
    (Instruction::Sltu, "sltu", OperandFormat::DestSrcSrc),
    (Instruction::Seq, "seq", OperandFormat::DestSrcSrc),
    (Instruction::Sne, "sne", OperandFormat::DestSrcSrc),
    (Instruction::Mul, "mul", OperandFormat::DestSrcSrc),
    (Instruction::Div, "div", OperandFormat::DestSrcSrc),
    (Instruction::Divu, "divu", OperandFormat::DestSrcSrc),
    (Instruction::Rem, "rem", OperandFormat::DestSrcSrc),
    (Instruction::Remu, "remu", OperandFormat::DestSrcSrc),
    (Instruction::Sllv, "sllv", OperandFormat::DestSrcSrc),
    (Instruction::Srlv, "srlv", OperandFormat::DestSrcSrc),
    (Instruction::Srav, "srav", OperandFormat::DestSrcSrc),
    (Instruction::Addi, "addi", OperandFormat::DestSrcImmediate),
    (Instruction::Addiu, "addiu", OperandFormat::DestSrcImmediate),
    (Instruction::Andi, "andi", OperandFormat::DestSrcImmediate),
    (Instruction::Ori, "ori", OperandFormat::DestSrcImmediate),
    (Instruction::Xori, "xori", OperandFormat::DestSrcImmediate),
    (Instruction::Slti, "slti", OperandFormat::DestSrcImmediate),
    (Instruction::Sltiu, "sltiu", OperandFormat::DestSrcImmediate),
    (Instruction::Sll, "sll", OperandFormat::DestSrcImmediate),
    (Instruction::Srl, "srl", OperandFormat::DestSrcImmediate),
    (Instruction::Sra, "sra", OperandFormat::DestSrcImmediate),
    (Instruction::Move, "move", OperandFormat::DestSrc),
    (Instruction::Neg, "neg", OperandFormat::DestSrc),
    (Instruction::Negu, "negu", OperandFormat::DestSrc),
    (Instruction::Abs, "abs", OperandFormat::DestSrc),
    (Instruction::Not, "not", OperandFormat::DestSrc),
    (Instruction::Li, "li", OperandFormat::DestImmediate),
    (Instruction::Lui, "lui", OperandFormat::DestImmediate),
    (Instruction::La, "la", OperandFormat::DestAddress),
    (Instruction::Lw, "lw", OperandFormat::DestAddress),
    (Instruction::Lh, "lh", OperandFormat::DestAddress),
    (Instruction::Lhu, "lhu", OperandFormat::DestAddress),
    (Instruction::Lb, "lb", OperandFormat::DestAddress),
    (Instruction::Lbu, "lbu", OperandFormat::DestAddress),
    (Instruction::Sw, "sw", OperandFormat::DestAddress),
    (Instruction::Sh, "sh", OperandFormat::DestAddress),
    (Instruction::Sb, "sb", OperandFormat::DestAddress),
    (Instruction::Beq, "beq", OperandFormat::CompareCompareLabel),
    (Instruction::Bne, "bne", OperandFormat::CompareCompareLabel),
    (Instruction::Blt, "blt", OperandFormat::CompareCompareLabel),
    (Instruction::Ble, "ble", OperandFormat::CompareCompareLabel),
    (Instruction::Bgt, "bgt", OperandFormat::CompareCompareLabel),
    (Instruction::Bge, "bge", OperandFormat::CompareCompareLabel),
    (Instruction::Beqz, "beqz", OperandFormat::CompareLabel),
    (Instruction::Bnez, "bnez", OperandFormat::CompareLabel),
    (Instruction::Bltz, "bltz", OperandFormat::CompareLabel),
    (Instruction::Blez, "blez", OperandFormat::CompareLabel),
    (Instruction::Bgtz, "bgtz", OperandFormat::CompareLabel),
    (Instruction::Bgez, "bgez", OperandFormat::CompareLabel),
    (Instruction::B, "b", OperandFormat::Label),
    (Instruction::J, "j", OperandFormat::Label),
    (Instruction::Jal, "jal", OperandFormat::Label),
    (Instruction::Jr, "jr", OperandFormat::Register),
    (Instruction::Jalr, "jalr", OperandFormat::Register),
    (Instruction::Syscall, "syscall", OperandFormat::None),
    (Instruction::Nop, "nop", OperandFormat::None),
    (Instruction::Break, "break", OperandFormat::None),
    (Instruction::Exit, "exit", OperandFormat::None),
];

impl Instruction {
    fn entry(self) -> (&'static str, OperandFormat) {
        INSTRUCTION_TABLE
            .iter()
            .find_map(|(instruction, mnemonic, format)| {
                (*instruction == self).then_some((*mnemonic, *format))
            })
            .unwrap_or(("?", OperandFormat::None))
    }

    /// Lowercase assembler mnemonic.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        self.entry().0
    }

    /// Operand format the decoder enforces.
    #[must_use]
    pub fn format(self) -> OperandFormat {
        self.entry().1
    }

    /// Looks up an instruction by mnemonic, ignoring ASCII case.
    #[must_use]
    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        INSTRUCTION_TABLE
            .iter()
            .find_map(|(instruction, name, _)| {
                name.eq_ignore_ascii_case(mnemonic).then_some(*instruction)
            })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Kind tag of an [`Operand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum OperandKind {
    /// Register operand.
    Register,
    /// Immediate operand.
    Immediate,
    /// Address (label and/or base+offset) operand.
    Address,
}

impl fmt::Display for OperandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Register => "a register",
            Self::Immediate => "an immediate",
            Self::Address => "an address",
        })
    }
}

/// Memory reference: resolved label address and/or base register plus displacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct AddressOperand {
    /// Resolved label address.
    #[cfg_attr(feature = "serde", serde(default))]
    pub label: Option<Address>,
    /// Base register added at execute time.
    #[cfg_attr(feature = "serde", serde(default))]
    pub base: Option<Register>,
    /// Signed byte displacement.
    #[cfg_attr(feature = "serde", serde(default))]
    pub offset: i32,
}

impl AddressOperand {
    /// Reference to a resolved label.
    #[must_use]
    pub const fn label(address: Address) -> Self {
        Self {
            label: Some(address),
            base: None,
            offset: 0,
        }
    }

    /// `offset(base)` reference.
    #[must_use]
    pub const fn based(base: Register, offset: i32) -> Self {
        Self {
            label: None,
            base: Some(base),
            offset,
        }
    }
}

impl fmt::Display for AddressOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.label, self.base) {
            (Some(label), None) if self.offset == 0 => write!(f, "{label}"),
            (Some(label), None) => write!(f, "{label}{:+}", self.offset),
            (Some(label), Some(base)) => write!(f, "{label}{:+}({base})", self.offset),
            (None, Some(base)) => write!(f, "{}({base})", self.offset),
            (None, None) => write!(f, "{}", self.offset),
        }
    }
}

/// Instruction operand as produced by the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Deserialize, serde::Serialize),
    serde(rename_all = "snake_case")
)]
pub enum Operand {
    /// Register operand.
    Register(Register),
    /// Signed immediate.
    Immediate(i32),
    /// Memory or label reference.
    Address(AddressOperand),
}

impl Operand {
    /// Kind tag used in decode diagnostics.
    #[must_use]
    pub const fn kind(&self) -> OperandKind {
        match self {
            Self::Register(_) => OperandKind::Register,
            Self::Immediate(_) => OperandKind::Immediate,
            Self::Address(_) => OperandKind::Address,
        }
    }
}

impl From<Register> for Operand {
    fn from(register: Register) -> Self {
        Self::Register(register)
    }
}

impl From<i32> for Operand {
    fn from(value: i32) -> Self {
        Self::Immediate(value)
    }
}

impl From<AddressOperand> for Operand {
    fn from(address: AddressOperand) -> Self {
        Self::Address(address)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register(register) => write!(f, "{register}"),
            Self::Immediate(value) => write!(f, "{value}"),
            Self::Address(address) => write!(f, "{address}"),
        }
    }
}

/// One assembled source statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Statement {
    /// Instruction to execute.
    pub instruction: Instruction,
    /// Operands in source order.
    #[cfg_attr(feature = "serde", serde(default))]
    pub operands: Vec<Operand>,
    /// Source line, when known.
    #[cfg_attr(feature = "serde", serde(default))]
    pub line_number: Option<u32>,
}

impl Statement {
    /// Builds a statement without source position.
    #[must_use]
    pub fn new(instruction: Instruction, operands: impl Into<Vec<Operand>>) -> Self {
        Self {
            instruction,
            operands: operands.into(),
            line_number: None,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.instruction.mnemonic())?;
        for (position, operand) in self.operands.iter().enumerate() {
            let separator = if position == 0 { " " } else { ", " };
            write!(f, "{separator}{operand}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{AddressOperand, Instruction, Operand, Statement, INSTRUCTION_TABLE};
    use crate::{Address, Register};

    #[test]
    fn table_has_unique_instructions_and_mnemonics() {
        let instructions: HashSet<_> = INSTRUCTION_TABLE.iter().map(|(i, _, _)| *i).collect();
        let mnemonics: HashSet<_> = INSTRUCTION_TABLE.iter().map(|(_, m, _)| *m).collect();
        assert_eq!(instructions.len(), INSTRUCTION_TABLE.len());
        assert_eq!(mnemonics.len(), INSTRUCTION_TABLE.len());
    }

    #[test]
    fn mnemonic_lookup_ignores_case() {
        assert_eq!(Instruction::from_mnemonic("ADDI"), Some(Instruction::Addi));
        assert_eq!(Instruction::from_mnemonic("syscall"), Some(Instruction::Syscall));
        assert_eq!(Instruction::from_mnemonic("mov"), None);
    }

    #[test]
    fn statement_renders_like_assembly() {
        let statement = Statement::new(
            Instruction::Lw,
            [
                Operand::Register(Register::T0),
                Operand::Address(AddressOperand::based(Register::Sp, -8)),
            ],
        );
        assert_eq!(statement.to_string(), "lw $t0, -8($sp)");

        let jump = Statement::new(
            Instruction::J,
            [Operand::Address(AddressOperand::label(Address::new(0x0040_0010)))],
        );
        assert_eq!(jump.to_string(), "j 0x00400010");
        assert_eq!(Statement::new(Instruction::Syscall, Vec::new()).to_string(), "syscall");
    }
}
