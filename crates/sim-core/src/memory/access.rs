//! Width and alignment policy shared by every segment.

use std::fmt;

use crate::{Address, MemoryFault};

/// Data access width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessWidth {
    /// One byte.
    Byte,
    /// Two bytes.
    Half,
    /// Four bytes.
    Word,
}

impl AccessWidth {
    /// Width in bytes.
    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::Half => 2,
            Self::Word => 4,
        }
    }
}

impl fmt::Display for AccessWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Byte => "byte",
            Self::Half => "halfword",
            Self::Word => "word",
        })
    }
}

/// Validates natural alignment for an access.
///
/// # Errors
///
/// Returns [`MemoryFault::Alignment`] when `address` is not a multiple of the width.
pub const fn validate_alignment(address: Address, width: AccessWidth) -> Result<(), MemoryFault> {
    if address.is_aligned(width.bytes()) {
        Ok(())
    } else {
        Err(MemoryFault::Alignment { address, width })
    }
}

/// Exclusive end address of an access.
///
/// # Errors
///
/// Returns [`MemoryFault::OutOfBounds`] when the access would run past the top of the address space.
pub const fn access_end(address: Address, width: AccessWidth) -> Result<Address, MemoryFault> {
    match address.checked_add(width.bytes()) {
        Some(end) => Ok(end),
        None => Err(MemoryFault::OutOfBounds {
            address,
            width,
            segment: None,
        }),
    }
}
