//! Address and value helpers shared by the executor.

use crate::memory::AccessWidth;
use crate::{Address, AddressOperand, ExecuteFault, RegisterBank, Word, INSTRUCTION_BYTES};

/// Resolves `label + base + offset` against the current register values.
///
/// # Errors
///
/// Returns [`ExecuteFault::AddressOverflow`] when the sum leaves the address space.
pub fn effective_address(
    operand: AddressOperand,
    registers: &RegisterBank,
) -> Result<Address, ExecuteFault> {
    let base = match (operand.label, operand.base) {
        (Some(label), Some(register)) => label
            .checked_offset(registers.get(register).as_signed())
            .ok_or(ExecuteFault::AddressOverflow)?,
        (Some(label), None) => label,
        (None, Some(register)) => Address::new(registers.get(register).as_unsigned()),
        (None, None) => Address::default(),
    };
    base.checked_offset(operand.offset)
        .ok_or(ExecuteFault::AddressOverflow)
}

/// Address of the statement after `pc`.
///
/// # Errors
///
/// Returns [`ExecuteFault::AddressOverflow`] at the top of the address space.
pub const fn next_sequential(pc: Address) -> Result<Address, ExecuteFault> {
    match pc.checked_add(INSTRUCTION_BYTES) {
        Some(next) => Ok(next),
        None => Err(ExecuteFault::AddressOverflow),
    }
}

/// Sign-extends the low `width` bytes of `raw`.
#[must_use]
#[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
pub const fn sign_extend(raw: Word, width: AccessWidth) -> Word {
    let bits = raw.as_unsigned();
    match width {
        AccessWidth::Byte => Word::from_signed(bits as u8 as i8 as i32),
        AccessWidth::Half => Word::from_signed(bits as u16 as i16 as i32),
        AccessWidth::Word => raw,
    }
}
