use thiserror::Error;

use crate::annotation::SandboxViolation;
use crate::memory::{AccessWidth, Segment};
use crate::{Address, Instruction, OperandKind};

/// Fault classes used for problem reporting and logging policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FaultClass {
    /// Statement could not be turned into an executable form.
    Decode,
    /// Executable form could not be applied.
    Execute,
    /// Generic memory policy violation (bounds, alignment, read-only).
    Memory,
    /// Dynamic segment violation.
    Heap,
    /// Stack segment violation.
    Stack,
    /// Program-level precondition failed (entry point, nothing loaded).
    Program,
    /// Annotation sandbox boundary crossed.
    Sandbox,
}

/// Memory access faults shared by every segment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MemoryFault {
    /// Access falls outside the segment the address nominally belongs to, or outside every segment.
    #[error("{width} access at {address} is out of bounds of {}", segment_name(*.segment))]
    OutOfBounds {
        /// First byte of the access.
        address: Address,
        /// Access width.
        width: AccessWidth,
        /// Segment the address classified into, if any.
        segment: Option<Segment>,
    },
    /// Access address is not a multiple of its width.
    #[error("{width} access at {address} is not aligned")]
    Alignment {
        /// First byte of the access.
        address: Address,
        /// Access width.
        width: AccessWidth,
    },
    /// Write targeted the text segment.
    #[error("write to read-only text segment at {address}")]
    ReadOnly {
        /// Target address.
        address: Address,
    },
}

const fn segment_name(segment: Option<Segment>) -> &'static str {
    match segment {
        Some(segment) => segment.name(),
        None => "every mapped segment",
    }
}

/// Dynamic (heap) segment faults.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum HeapFault {
    /// Access above the current heap break.
    #[error("heap access at {address} is above the heap break {brk}")]
    AboveBreak {
        /// First byte of the access.
        address: Address,
        /// Current heap break (first uncommitted byte).
        brk: Address,
    },
    /// `sbrk` would grow the heap past its configured limit.
    #[error("heap exhausted: requested {requested} bytes with {available} bytes available")]
    Exhausted {
        /// Requested growth in bytes.
        requested: u32,
        /// Remaining growth allowed.
        available: u32,
    },
    /// `sbrk` was asked to shrink the heap.
    #[error("heap cannot shrink (sbrk {increment})")]
    NegativeIncrement {
        /// Rejected increment.
        increment: i32,
    },
}

/// Stack segment faults.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum StackFault {
    /// Access below the lowest committed stack address. Callers may commit more stack and continue.
    #[error("stack access at {address} is below the committed stack bottom {bottom}")]
    BelowCommitted {
        /// First byte of the access.
        address: Address,
        /// Lowest committed stack address.
        bottom: Address,
    },
    /// Stack cannot grow down to the requested address.
    #[error("stack overflow: {address} is below the stack limit {limit}")]
    Overflow {
        /// Address that would need committing.
        address: Address,
        /// Lowest address the stack may ever reach.
        limit: Address,
    },
}

/// Faults raised while turning a statement into an executable form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum DecodeFault {
    /// Operand count does not match the instruction's arity.
    #[error("`{instruction}` expects {expected} operands, found {found}")]
    OperandCount {
        /// Instruction being decoded.
        instruction: Instruction,
        /// Arity of the instruction.
        expected: usize,
        /// Operands supplied.
        found: usize,
    },
    /// Operand at `position` has the wrong kind.
    #[error("`{instruction}` operand {position} must be {expected}, found {found}")]
    OperandKind {
        /// Instruction being decoded.
        instruction: Instruction,
        /// Zero-based operand position.
        position: usize,
        /// Kind the instruction requires.
        expected: OperandKind,
        /// Kind supplied.
        found: OperandKind,
    },
    /// A branch or jump operand does not resolve to a usable target.
    #[error("`{instruction}` has an unresolvable target")]
    UnresolvedTarget {
        /// Instruction being decoded.
        instruction: Instruction,
    },
}

/// Faults raised while applying an executable form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ExecuteFault {
    /// Trapping signed arithmetic overflowed.
    #[error("arithmetic overflow")]
    ArithmeticOverflow,
    /// Integer division or remainder by zero.
    #[error("division by zero")]
    DivideByZero,
    /// Effective address or program counter arithmetic left the address space.
    #[error("address computation overflowed the address space")]
    AddressOverflow,
    /// Jump target is not word aligned.
    #[error("jump target {target} is not word aligned")]
    MisalignedTarget {
        /// Rejected target.
        target: Address,
    },
    /// `syscall` with a service code the core does not provide.
    #[error("unknown syscall code {code}")]
    UnknownSyscall {
        /// Value of `$v0`.
        code: i32,
    },
    /// Input line could not be interpreted for the requested syscall.
    #[error("invalid input {input:?}")]
    InvalidInput {
        /// Offending input.
        input: String,
    },
    /// Console input closed while a read syscall was waiting.
    #[error("console input closed during a read")]
    InputClosed,
    /// `break` executed.
    #[error("break instruction executed")]
    Break,
}

/// Stable fault taxonomy for everything a cycle can raise.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Fault {
    /// Decode failure.
    #[error(transparent)]
    Decode(#[from] DecodeFault),
    /// Execute failure.
    #[error(transparent)]
    Execute(#[from] ExecuteFault),
    /// Memory policy failure.
    #[error(transparent)]
    Memory(#[from] MemoryFault),
    /// Heap segment failure.
    #[error(transparent)]
    Heap(#[from] HeapFault),
    /// Stack segment failure.
    #[error(transparent)]
    Stack(#[from] StackFault),
    /// Loaded program has no `main` label.
    #[error("no main label found")]
    NoEntryPoint,
    /// A cycle was requested before any program was loaded.
    #[error("no program loaded")]
    NoProgramLoaded,
    /// Annotation tried to reach an un-bridged host capability.
    #[error(transparent)]
    Sandbox(#[from] SandboxViolation),
}

impl Fault {
    /// Returns the reporting class for this fault.
    #[must_use]
    pub const fn class(&self) -> FaultClass {
        match self {
            Self::Decode(_) => FaultClass::Decode,
            Self::Execute(_) => FaultClass::Execute,
            Self::Memory(_) => FaultClass::Memory,
            Self::Heap(_) => FaultClass::Heap,
            Self::Stack(_) => FaultClass::Stack,
            Self::NoEntryPoint | Self::NoProgramLoaded => FaultClass::Program,
            Self::Sandbox(_) => FaultClass::Sandbox,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DecodeFault, ExecuteFault, Fault, FaultClass, HeapFault, MemoryFault, StackFault};
    use crate::annotation::SandboxViolation;
    use crate::memory::{AccessWidth, Segment};
    use crate::{Address, Instruction, OperandKind};

    #[test]
    fn class_mapping_matches_fault_taxonomy() {
        let decode = Fault::from(DecodeFault::OperandCount {
            instruction: Instruction::Add,
            expected: 3,
            found: 1,
        });
        assert_eq!(decode.class(), FaultClass::Decode);
        assert_eq!(
            Fault::from(ExecuteFault::DivideByZero).class(),
            FaultClass::Execute
        );
        assert_eq!(
            Fault::from(MemoryFault::ReadOnly {
                address: Address::new(0x0040_0000)
            })
            .class(),
            FaultClass::Memory
        );
        assert_eq!(
            Fault::from(HeapFault::NegativeIncrement { increment: -4 }).class(),
            FaultClass::Heap
        );
        assert_eq!(
            Fault::from(StackFault::Overflow {
                address: Address::new(0),
                limit: Address::new(16)
            })
            .class(),
            FaultClass::Stack
        );
        assert_eq!(Fault::NoEntryPoint.class(), FaultClass::Program);
        assert_eq!(
            Fault::from(SandboxViolation::new("os")).class(),
            FaultClass::Sandbox
        );
    }

    #[test]
    fn out_of_bounds_message_names_the_segment() {
        let fault = MemoryFault::OutOfBounds {
            address: Address::new(0x1001_0000),
            width: AccessWidth::Word,
            segment: Some(Segment::StaticData),
        };
        assert_eq!(
            fault.to_string(),
            "word access at 0x10010000 is out of bounds of static data"
        );

        let unmapped = MemoryFault::OutOfBounds {
            address: Address::new(4),
            width: AccessWidth::Byte,
            segment: None,
        };
        assert!(unmapped.to_string().ends_with("every mapped segment"));
    }

    #[test]
    fn decode_fault_messages_name_instruction_and_kind() {
        let fault = DecodeFault::OperandKind {
            instruction: Instruction::Lw,
            position: 1,
            expected: OperandKind::Address,
            found: OperandKind::Immediate,
        };
        assert_eq!(
            fault.to_string(),
            "`lw` operand 1 must be an address, found an immediate"
        );
    }
}
