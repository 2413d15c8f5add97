//! Statement decoder.
//!
//! Validates operand count and kinds against each instruction's
//! [`OperandFormat`] and lowers the statement into an [`ExecutableForm`].
//! Decoding is pure: it never touches registers or memory.

use crate::alu::AluOp;
use crate::memory::AccessWidth;
use crate::{
    Address, AddressOperand, DecodeFault, Instruction, Operand, OperandFormat, OperandKind,
    Register, Word, INSTRUCTION_BYTES,
};

/// Second operand of an ALU or branch form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// Value read from a register at execute time.
    Register(Register),
    /// Constant.
    Immediate(Word),
}

/// Branch comparison, always signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Condition {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Always,
}

impl Condition {
    /// Evaluates the comparison on signed operands.
    #[must_use]
    pub const fn holds(self, lhs: i32, rhs: i32) -> bool {
        match self {
            Self::Equal => lhs == rhs,
            Self::NotEqual => lhs != rhs,
            Self::Less => lhs < rhs,
            Self::LessOrEqual => lhs <= rhs,
            Self::Greater => lhs > rhs,
            Self::GreaterOrEqual => lhs >= rhs,
            Self::Always => true,
        }
    }
}

/// Destination of a jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JumpTarget {
    /// Resolved label.
    Absolute(Address),
    /// Address held in a register.
    Register(Register),
}

/// Decoded statement ready for the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutableForm {
    /// `dest = op(lhs, rhs)`.
    Alu {
        /// Operation.
        op: AluOp,
        /// Destination register.
        dest: Register,
        /// First source register.
        lhs: Register,
        /// Second source.
        rhs: Source,
    },
    /// `dest = value`.
    LoadImmediate {
        /// Destination register.
        dest: Register,
        /// Constant.
        value: Word,
    },
    /// `dest = effective address`.
    LoadAddress {
        /// Destination register.
        dest: Register,
        /// Memory reference.
        address: AddressOperand,
    },
    /// `dest = memory[address]`.
    Load {
        /// Destination register.
        dest: Register,
        /// Memory reference.
        address: AddressOperand,
        /// Access width.
        width: AccessWidth,
        /// Sign-extend sub-word values.
        sign_extend: bool,
    },
    /// `memory[address] = source`.
    Store {
        /// Register supplying the value.
        source: Register,
        /// Memory reference.
        address: AddressOperand,
        /// Access width.
        width: AccessWidth,
    },
    /// Conditional PC-relative transfer to `target`.
    Branch {
        /// Comparison.
        condition: Condition,
        /// Left operand.
        lhs: Register,
        /// Right operand.
        rhs: Source,
        /// Taken target.
        target: Address,
    },
    /// Unconditional transfer, optionally linking the return address into `$ra`.
    Jump {
        /// Destination.
        target: JumpTarget,
        /// Store `pc + 4` into `$ra`.
        link: bool,
    },
    /// System service selected by `$v0`.
    Syscall,
    /// No effect.
    Nop,
    /// Trap.
    Break,
    /// Clean program end.
    Exit,
}

/// Stateless statement decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder;

impl Decoder {
    /// Decodes `instruction` applied to `operands`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeFault::OperandCount`] for an arity mismatch,
    /// [`DecodeFault::OperandKind`] for a wrongly-kinded operand and
    /// [`DecodeFault::UnresolvedTarget`] for an unusable label.
    pub fn decode(
        instruction: Instruction,
        operands: &[Operand],
    ) -> Result<ExecutableForm, DecodeFault> {
        let format = instruction.format();
        if operands.len() != format.arity() {
            return Err(DecodeFault::OperandCount {
                instruction,
                expected: format.arity(),
                found: operands.len(),
            });
        }
        let ops = Operands {
            instruction,
            operands,
        };

        let form = match format {
            OperandFormat::None => match instruction {
                Instruction::Syscall => ExecutableForm::Syscall,
                Instruction::Break => ExecutableForm::Break,
                Instruction::Exit => ExecutableForm::Exit,
                _ => ExecutableForm::Nop,
            },
            OperandFormat::DestSrcSrc | OperandFormat::DestSrcImmediate => {
                let rhs = if format == OperandFormat::DestSrcSrc {
                    Source::Register(ops.register(2)?)
                } else {
                    Source::Immediate(Word::from_signed(ops.immediate(2)?))
                };
                ExecutableForm::Alu {
                    op: binary_op(instruction),
                    dest: ops.register(0)?,
                    lhs: ops.register(1)?,
                    rhs,
                }
            }
            OperandFormat::DestSrc => {
                let dest = ops.register(0)?;
                let src = ops.register(1)?;
                let (op, lhs, rhs) = match instruction {
                    Instruction::Neg => (AluOp::Sub, Register::Zero, Source::Register(src)),
                    Instruction::Negu => (AluOp::SubWrapping, Register::Zero, Source::Register(src)),
                    Instruction::Abs => (AluOp::Abs, src, Source::Immediate(Word::ZERO)),
                    Instruction::Not => (AluOp::Nor, src, Source::Register(Register::Zero)),
                    _ => (AluOp::AddWrapping, src, Source::Register(Register::Zero)),
                };
                ExecutableForm::Alu { op, dest, lhs, rhs }
            }
            OperandFormat::DestImmediate => {
                let value = ops.immediate(1)?;
                let value = if instruction == Instruction::Lui {
                    Word::from_signed(value.wrapping_shl(16))
                } else {
                    Word::from_signed(value)
                };
                ExecutableForm::LoadImmediate {
                    dest: ops.register(0)?,
                    value,
                }
            }
            OperandFormat::DestAddress => memory_form(instruction, ops.register(0)?, ops.address(1)?),
            OperandFormat::CompareCompareLabel => ExecutableForm::Branch {
                condition: condition(instruction),
                lhs: ops.register(0)?,
                rhs: ops.source(1)?,
                target: ops.label(2)?,
            },
            OperandFormat::CompareLabel => ExecutableForm::Branch {
                condition: condition(instruction),
                lhs: ops.register(0)?,
                rhs: Source::Immediate(Word::ZERO),
                target: ops.label(1)?,
            },
            OperandFormat::Label => {
                let target = ops.label(0)?;
                if instruction == Instruction::B {
                    ExecutableForm::Branch {
                        condition: Condition::Always,
                        lhs: Register::Zero,
                        rhs: Source::Immediate(Word::ZERO),
                        target,
                    }
                } else {
                    ExecutableForm::Jump {
                        target: JumpTarget::Absolute(target),
                        link: instruction == Instruction::Jal,
                    }
                }
            }
            OperandFormat::Register => ExecutableForm::Jump {
                target: JumpTarget::Register(ops.register(0)?),
                link: instruction == Instruction::Jalr,
            },
        };
        Ok(form)
    }
}

struct Operands<'a> {
    instruction: Instruction,
    operands: &'a [Operand],
}

impl Operands<'_> {
    fn mismatch(&self, position: usize, expected: OperandKind) -> DecodeFault {
        DecodeFault::OperandKind {
            instruction: self.instruction,
            position,
            expected,
            found: self.operands[position].kind(),
        }
    }

    fn register(&self, position: usize) -> Result<Register, DecodeFault> {
        match self.operands[position] {
            Operand::Register(register) => Ok(register),
            _ => Err(self.mismatch(position, OperandKind::Register)),
        }
    }

    fn immediate(&self, position: usize) -> Result<i32, DecodeFault> {
        match self.operands[position] {
            Operand::Immediate(value) => Ok(value),
            _ => Err(self.mismatch(position, OperandKind::Immediate)),
        }
    }

    fn address(&self, position: usize) -> Result<AddressOperand, DecodeFault> {
        match self.operands[position] {
            Operand::Address(address) => Ok(address),
            _ => Err(self.mismatch(position, OperandKind::Address)),
        }
    }

    fn source(&self, position: usize) -> Result<Source, DecodeFault> {
        match self.operands[position] {
            Operand::Register(register) => Ok(Source::Register(register)),
            Operand::Immediate(value) => Ok(Source::Immediate(Word::from_signed(value))),
            Operand::Address(_) => Err(self.mismatch(position, OperandKind::Register)),
        }
    }

    fn label(&self, position: usize) -> Result<Address, DecodeFault> {
        let address = self.address(position)?;
        let unresolved = DecodeFault::UnresolvedTarget {
            instruction: self.instruction,
        };
        match (address.label, address.base) {
            (Some(label), None) => label
                .checked_offset(address.offset)
                .filter(|target| target.is_aligned(INSTRUCTION_BYTES))
                .ok_or(unresolved),
            _ => Err(unresolved),
        }
    }
}

const fn binary_op(instruction: Instruction) -> AluOp {
    match instruction {
        Instruction::Add | Instruction::Addi => AluOp::Add,
        Instruction::Sub => AluOp::Sub,
        Instruction::Subu => AluOp::SubWrapping,
        Instruction::And | Instruction::Andi => AluOp::And,
        Instruction::Or | Instruction::Ori => AluOp::Or,
        Instruction::Xor | Instruction::Xori => AluOp::Xor,
        Instruction::Nor => AluOp::Nor,
        Instruction::Slt | Instruction::Slti => AluOp::SetLessThan,
        Instruction::Sltu | Instruction::Sltiu => AluOp::SetLessThanUnsigned,
        Instruction::Seq => AluOp::SetEqual,
        Instruction::Sne => AluOp::SetNotEqual,
        Instruction::Mul => AluOp::Mul,
        Instruction::Div => AluOp::Div,
        Instruction::Divu => AluOp::DivUnsigned,
        Instruction::Rem => AluOp::Rem,
        Instruction::Remu => AluOp::RemUnsigned,
        Instruction::Sllv | Instruction::Sll => AluOp::ShiftLeft,
        Instruction::Srlv | Instruction::Srl => AluOp::ShiftRightLogical,
        Instruction::Srav | Instruction::Sra => AluOp::ShiftRightArithmetic,
        _ => AluOp::AddWrapping,
    }
}

const fn condition(instruction: Instruction) -> Condition {
    match instruction {
        Instruction::Beq | Instruction::Beqz => Condition::Equal,
        Instruction::Bne | Instruction::Bnez => Condition::NotEqual,
        Instruction::Blt | Instruction::Bltz => Condition::Less,
        Instruction::Ble | Instruction::Blez => Condition::LessOrEqual,
        Instruction::Bgt | Instruction::Bgtz => Condition::Greater,
        Instruction::Bge | Instruction::Bgez => Condition::GreaterOrEqual,
        _ => Condition::Always,
    }
}

const fn memory_form(
    instruction: Instruction,
    register: Register,
    address: AddressOperand,
) -> ExecutableForm {
    let (width, sign_extend) = match instruction {
        Instruction::Lh | Instruction::Sh => (AccessWidth::Half, true),
        Instruction::Lhu => (AccessWidth::Half, false),
        Instruction::Lb | Instruction::Sb => (AccessWidth::Byte, true),
        Instruction::Lbu => (AccessWidth::Byte, false),
        _ => (AccessWidth::Word, false),
    };
    match instruction {
        Instruction::La => ExecutableForm::LoadAddress {
            dest: register,
            address,
        },
        Instruction::Sw | Instruction::Sh | Instruction::Sb => ExecutableForm::Store {
            source: register,
            address,
            width,
        },
        _ => ExecutableForm::Load {
            dest: register,
            address,
            width,
            sign_extend,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{Condition, Decoder, ExecutableForm, JumpTarget, Source};
    use crate::alu::AluOp;
    use crate::memory::AccessWidth;
    use crate::{
        Address, AddressOperand, DecodeFault, Instruction, Operand, OperandKind, Register, Word,
        program::INSTRUCTION_TABLE,
    };
    use rstest::rstest;

    fn reg(register: Register) -> Operand {
        Operand::Register(register)
    }

    fn label(address: u32) -> Operand {
        Operand::Address(AddressOperand::label(Address::new(address)))
    }

    #[test]
    fn add_decodes_to_trapping_alu_form() {
        let form = Decoder::decode(
            Instruction::Add,
            &[reg(Register::T0), reg(Register::T1), reg(Register::T2)],
        );
        assert_eq!(
            form,
            Ok(ExecutableForm::Alu {
                op: AluOp::Add,
                dest: Register::T0,
                lhs: Register::T1,
                rhs: Source::Register(Register::T2),
            })
        );
    }

    #[test]
    fn move_is_add_with_zero() {
        assert_eq!(
            Decoder::decode(Instruction::Move, &[reg(Register::A0), reg(Register::S1)]),
            Ok(ExecutableForm::Alu {
                op: AluOp::AddWrapping,
                dest: Register::A0,
                lhs: Register::S1,
                rhs: Source::Register(Register::Zero),
            })
        );
    }

    #[test]
    fn lui_shifts_into_upper_half() {
        assert_eq!(
            Decoder::decode(Instruction::Lui, &[reg(Register::T0), Operand::Immediate(0x1001)]),
            Ok(ExecutableForm::LoadImmediate {
                dest: Register::T0,
                value: Word::from_unsigned(0x1001_0000),
            })
        );
        assert_eq!(
            Decoder::decode(Instruction::Lui, &[reg(Register::T0), Operand::Immediate(-1)]),
            Ok(ExecutableForm::LoadImmediate {
                dest: Register::T0,
                value: Word::from_unsigned(0xffff_0000),
            })
        );
    }

    #[rstest]
    #[case(Instruction::Lb, AccessWidth::Byte, true)]
    #[case(Instruction::Lbu, AccessWidth::Byte, false)]
    #[case(Instruction::Lh, AccessWidth::Half, true)]
    #[case(Instruction::Lhu, AccessWidth::Half, false)]
    #[case(Instruction::Lw, AccessWidth::Word, false)]
    fn loads_carry_width_and_extension(
        #[case] instruction: Instruction,
        #[case] width: AccessWidth,
        #[case] sign_extend: bool,
    ) {
        let address = AddressOperand::based(Register::Sp, 4);
        assert_eq!(
            Decoder::decode(instruction, &[reg(Register::T0), Operand::Address(address)]),
            Ok(ExecutableForm::Load {
                dest: Register::T0,
                address,
                width,
                sign_extend,
            })
        );
    }

    #[test]
    fn branch_accepts_immediate_comparand() {
        assert_eq!(
            Decoder::decode(
                Instruction::Blt,
                &[reg(Register::T0), Operand::Immediate(10), label(0x0040_0000)]
            ),
            Ok(ExecutableForm::Branch {
                condition: Condition::Less,
                lhs: Register::T0,
                rhs: Source::Immediate(Word::from_signed(10)),
                target: Address::new(0x0040_0000),
            })
        );
    }

    #[test]
    fn jal_links_and_jr_reads_register() {
        assert_eq!(
            Decoder::decode(Instruction::Jal, &[label(0x0040_0010)]),
            Ok(ExecutableForm::Jump {
                target: JumpTarget::Absolute(Address::new(0x0040_0010)),
                link: true,
            })
        );
        assert_eq!(
            Decoder::decode(Instruction::Jr, &[reg(Register::Ra)]),
            Ok(ExecutableForm::Jump {
                target: JumpTarget::Register(Register::Ra),
                link: false,
            })
        );
    }

    #[test]
    fn wrong_arity_is_rejected() {
        assert_eq!(
            Decoder::decode(Instruction::Add, &[reg(Register::T0)]),
            Err(DecodeFault::OperandCount {
                instruction: Instruction::Add,
                expected: 3,
                found: 1,
            })
        );
    }

    #[test]
    fn wrong_kind_is_rejected() {
        assert_eq!(
            Decoder::decode(
                Instruction::Addi,
                &[reg(Register::T0), reg(Register::T1), reg(Register::T2)]
            ),
            Err(DecodeFault::OperandKind {
                instruction: Instruction::Addi,
                position: 2,
                expected: OperandKind::Immediate,
                found: OperandKind::Register,
            })
        );
    }

    #[test]
    fn based_branch_target_is_unresolved() {
        let based = Operand::Address(AddressOperand::based(Register::T0, 0));
        assert_eq!(
            Decoder::decode(Instruction::J, &[based]),
            Err(DecodeFault::UnresolvedTarget {
                instruction: Instruction::J
            })
        );
    }

    #[test]
    fn every_instruction_rejects_missing_operands_or_decodes_bare() {
        for (instruction, _, format) in INSTRUCTION_TABLE {
            let result = Decoder::decode(*instruction, &[]);
            if format.arity() == 0 {
                assert!(result.is_ok(), "{instruction} should decode bare");
            } else {
                assert!(
                    matches!(result, Err(DecodeFault::OperandCount { .. })),
                    "{instruction} should demand operands"
                );
            }
        }
    }
}
