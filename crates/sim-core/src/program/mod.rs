//! Assembled program contract consumed by the simulator.
//!
//! A [`Program`] is produced by an external assembler (or by
//! [`ProgramBuilder`] in hosts and tests) and is immutable once loaded.

use std::collections::BTreeMap;
use std::fmt;

mod builder;
mod instruction;

pub use builder::ProgramBuilder;
pub use instruction::{AddressOperand, Instruction, Operand, OperandFormat, OperandKind, Statement};
#[cfg(test)]
pub(crate) use instruction::INSTRUCTION_TABLE;

/// Width in bytes of one statement slot in the text segment.
pub const INSTRUCTION_BYTES: u32 = 4;
/// Default first address of the text segment.
pub const DEFAULT_TEXT_START: Address = Address::new(0x0040_0000);
/// Default first address of the static data segment.
pub const DEFAULT_DATA_START: Address = Address::new(0x1001_0000);
/// Default first address of the dynamic (heap) segment.
pub const DEFAULT_DYNAMIC_START: Address = Address::new(0x1004_0000);
/// Default initial global pointer.
pub const DEFAULT_GLOBAL_POINTER: Address = Address::new(0x1000_8000);
/// Default initial stack pointer (highest word of the stack).
pub const DEFAULT_STACK_POINTER: Address = Address::new(0x7fff_effc);
/// Label the CPU starts execution from (matched case-insensitively).
pub const ENTRY_LABEL: &str = "main";

/// 32-bit byte address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Deserialize, serde::Serialize),
    serde(transparent)
)]
pub struct Address(u32);

impl Address {
    /// Highest representable address.
    pub const MAX: Self = Self(u32::MAX);

    /// Creates an address from its raw value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw address value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Adds `bytes`, returning `None` on wrap.
    #[must_use]
    pub const fn checked_add(self, bytes: u32) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Subtracts `bytes`, returning `None` on wrap.
    #[must_use]
    pub const fn checked_sub(self, bytes: u32) -> Option<Self> {
        match self.0.checked_sub(bytes) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Applies a signed displacement, returning `None` when the result leaves the address space.
    #[must_use]
    pub const fn checked_offset(self, offset: i32) -> Option<Self> {
        if offset >= 0 {
            self.checked_add(offset.unsigned_abs())
        } else {
            self.checked_sub(offset.unsigned_abs())
        }
    }

    /// Byte distance from `base` up to `self`, or `None` when `self` is below `base`.
    #[must_use]
    pub const fn offset_from(self, base: Self) -> Option<u32> {
        self.0.checked_sub(base.0)
    }

    /// Returns true when the address is a multiple of `bytes`.
    #[must_use]
    pub const fn is_aligned(self, bytes: u32) -> bool {
        bytes != 0 && self.0 % bytes == 0
    }
}

impl From<u32> for Address {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// 32-bit machine word with signed and unsigned views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Deserialize, serde::Serialize),
    serde(transparent)
)]
pub struct Word(u32);

impl Word {
    /// All-zero word.
    pub const ZERO: Self = Self(0);

    /// Creates a word from its unsigned bit pattern.
    #[must_use]
    pub const fn from_unsigned(value: u32) -> Self {
        Self(value)
    }

    /// Creates a word from a two's-complement signed value.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn from_signed(value: i32) -> Self {
        Self(value as u32)
    }

    /// Creates a word holding `flag` as `0` or `1`.
    #[must_use]
    pub const fn from_bool(flag: bool) -> Self {
        Self(flag as u32)
    }

    /// Unsigned view.
    #[must_use]
    pub const fn as_unsigned(self) -> u32 {
        self.0
    }

    /// Two's-complement signed view.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn as_signed(self) -> i32 {
        self.0 as i32
    }

    /// Big-endian byte image.
    #[must_use]
    pub const fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Rebuilds a word from its big-endian byte image.
    #[must_use]
    pub const fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_signed())
    }
}

/// Script snippet attached to a text address (or run once at program start).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Annotation {
    /// Script source evaluated by the annotation sandbox.
    pub code: String,
}

impl Annotation {
    /// Wraps script source as an annotation.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

/// Assembled program: text statements, static data image, labels and annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Program {
    /// Statements keyed by their word-aligned text address.
    pub text_segment: BTreeMap<Address, Statement>,
    /// Static data image starting at [`Program::data_segment_start`].
    pub data_segment: Vec<u8>,
    /// First address of the text segment.
    pub text_segment_start: Address,
    /// Address of the last statement in the text segment.
    pub text_segment_last: Address,
    /// First address of the static data segment.
    pub data_segment_start: Address,
    /// First address of the dynamic segment (initial heap break).
    pub dynamic_segment_start: Address,
    /// Initial `$sp`.
    pub initial_sp: Address,
    /// Initial `$gp`.
    pub initial_gp: Address,
    /// Symbol table.
    pub labels: BTreeMap<String, Address>,
    /// Annotations keyed by the text address they are attached to.
    pub annotations: BTreeMap<Address, Annotation>,
    /// Annotation dispatched once when a run starts, before the first cycle.
    pub init_annotation: Option<Annotation>,
}

impl Default for Program {
    fn default() -> Self {
        Self {
            text_segment: BTreeMap::new(),
            data_segment: Vec::new(),
            text_segment_start: DEFAULT_TEXT_START,
            text_segment_last: DEFAULT_TEXT_START,
            data_segment_start: DEFAULT_DATA_START,
            dynamic_segment_start: DEFAULT_DYNAMIC_START,
            initial_sp: DEFAULT_STACK_POINTER,
            initial_gp: DEFAULT_GLOBAL_POINTER,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            init_annotation: None,
        }
    }
}

impl Program {
    /// Resolves the entry label (`main`, any case).
    #[must_use]
    pub fn entry_point(&self) -> Option<Address> {
        self.labels
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(ENTRY_LABEL))
            .map(|(_, address)| *address)
    }

    /// Looks up a label exactly as written.
    #[must_use]
    pub fn label(&self, name: &str) -> Option<Address> {
        self.labels.get(name).copied()
    }

    /// Statement stored at `address`, if any.
    #[must_use]
    pub fn statement_at(&self, address: Address) -> Option<&Statement> {
        self.text_segment.get(&address)
    }

    /// First address past the last statement slot.
    #[must_use]
    pub const fn text_segment_end(&self) -> Option<Address> {
        self.text_segment_last.checked_add(INSTRUCTION_BYTES)
    }

    /// First address past the static data image.
    #[must_use]
    pub fn data_segment_end(&self) -> Option<Address> {
        u32::try_from(self.data_segment.len())
            .ok()
            .and_then(|len| self.data_segment_start.checked_add(len))
    }
}

#[cfg(test)]
mod tests {
    use super::{Address, Program, Word};
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("main")]
    #[case("MAIN")]
    #[case("Main")]
    fn entry_point_is_case_insensitive(#[case] label: &str) {
        let mut program = Program::default();
        program
            .labels
            .insert(label.to_string(), Address::new(0x0040_0010));
        assert_eq!(program.entry_point(), Some(Address::new(0x0040_0010)));
    }

    #[test]
    fn entry_point_missing_without_main() {
        let mut program = Program::default();
        program
            .labels
            .insert("start".to_string(), Address::new(0x0040_0000));
        assert_eq!(program.entry_point(), None);
    }

    #[test]
    fn address_arithmetic_refuses_to_wrap() {
        assert_eq!(Address::MAX.checked_add(1), None);
        assert_eq!(Address::new(3).checked_offset(-4), None);
        assert_eq!(
            Address::new(8).checked_offset(-4),
            Some(Address::new(4))
        );
        assert_eq!(Address::new(8).offset_from(Address::new(12)), None);
    }

    #[test]
    fn address_displays_as_padded_hex() {
        assert_eq!(Address::new(0x0040_0000).to_string(), "0x00400000");
    }

    proptest! {
        #[test]
        fn signed_view_round_trips(value in any::<i32>()) {
            prop_assert_eq!(Word::from_signed(value).as_signed(), value);
        }

        #[test]
        fn big_endian_image_round_trips(value in any::<u32>()) {
            let word = Word::from_unsigned(value);
            prop_assert_eq!(Word::from_be_bytes(word.to_be_bytes()), word);
            prop_assert_eq!(word.to_be_bytes()[0], value.to_be_bytes()[0]);
        }
    }
}
