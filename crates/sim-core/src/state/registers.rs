use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::Word;

/// Number of general-purpose registers.
pub const REGISTER_COUNT: usize = 32;

/// General-purpose register identifier, numbered by its conventional MIPS slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Deserialize, serde::Serialize),
    serde(rename_all = "lowercase")
)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Register {
    Zero = 0,
    At = 1,
    V0 = 2,
    V1 = 3,
    A0 = 4,
    A1 = 5,
    A2 = 6,
    A3 = 7,
    T0 = 8,
    T1 = 9,
    T2 = 10,
    T3 = 11,
    T4 = 12,
    T5 = 13,
    T6 = 14,
    T7 = 15,
    S0 = 16,
    S1 = 17,
    S2 = 18,
    S3 = 19,
    S4 = 20,
    S5 = 21,
    S6 = 22,
    S7 = 23,
    T8 = 24,
    T9 = 25,
    K0 = 26,
    K1 = 27,
    Gp = 28,
    Sp = 29,
    Fp = 30,
    Ra = 31,
}

const REGISTER_NAMES: [&str; REGISTER_COUNT] = [
    "zero", "at", "v0", "v1", "a0", "a1", "a2", "a3", "t0", "t1", "t2", "t3", "t4", "t5", "t6",
    "t7", "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "t8", "t9", "k0", "k1", "gp", "sp", "fp",
    "ra",
];

impl Register {
    /// All registers in slot order.
    pub const ALL: [Self; REGISTER_COUNT] = [
        Self::Zero,
        Self::At,
        Self::V0,
        Self::V1,
        Self::A0,
        Self::A1,
        Self::A2,
        Self::A3,
        Self::T0,
        Self::T1,
        Self::T2,
        Self::T3,
        Self::T4,
        Self::T5,
        Self::T6,
        Self::T7,
        Self::S0,
        Self::S1,
        Self::S2,
        Self::S3,
        Self::S4,
        Self::S5,
        Self::S6,
        Self::S7,
        Self::T8,
        Self::T9,
        Self::K0,
        Self::K1,
        Self::Gp,
        Self::Sp,
        Self::Fp,
        Self::Ra,
    ];

    /// Slot index (`0..32`).
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Register for slot `index`.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        if index < REGISTER_COUNT {
            Some(Self::ALL[index])
        } else {
            None
        }
    }

    /// Register number as used in `$n` syntax.
    #[must_use]
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Register numbered `id`.
    #[must_use]
    pub const fn from_id(id: u8) -> Option<Self> {
        Self::from_index(id as usize)
    }

    /// Conventional name without the `$` sigil.
    #[must_use]
    pub const fn name(self) -> &'static str {
        REGISTER_NAMES[self.index()]
    }

    /// Parses `t0`, `$t0`, `8` or `$8`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let bare = name.strip_prefix('$').unwrap_or(name);
        if let Ok(index) = bare.parse::<usize>() {
            return Self::from_index(index);
        }
        REGISTER_NAMES
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(bare))
            .and_then(Self::from_index)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.name())
    }
}

/// Register file with atomic slots.
///
/// Slots are read without locking from any thread; a multi-register
/// snapshot taken during a run may mix values from adjacent cycles.
/// Writes to `$zero` are discarded.
#[derive(Debug)]
pub struct RegisterBank {
    slots: [AtomicU32; REGISTER_COUNT],
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBank {
    /// All registers zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    /// Current value of `register`.
    #[must_use]
    pub fn get(&self, register: Register) -> Word {
        Word::from_unsigned(self.slots[register.index()].load(Ordering::Acquire))
    }

    /// Stores `value`; returns false when the write was discarded (`$zero`).
    pub fn set(&self, register: Register, value: Word) -> bool {
        if register == Register::Zero {
            return false;
        }
        self.slots[register.index()].store(value.as_unsigned(), Ordering::Release);
        true
    }

    /// Zeroes every register.
    pub fn reset(&self) {
        for slot in &self.slots {
            slot.store(0, Ordering::Release);
        }
    }

    /// Copies all registers in slot order.
    #[must_use]
    pub fn snapshot(&self) -> [Word; REGISTER_COUNT] {
        std::array::from_fn(|index| {
            Word::from_unsigned(self.slots[index].load(Ordering::Acquire))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Register, RegisterBank, REGISTER_COUNT};
    use crate::Word;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn zero_register_discards_writes() {
        let bank = RegisterBank::new();
        assert!(!bank.set(Register::Zero, Word::from_signed(7)));
        assert_eq!(bank.get(Register::Zero), Word::ZERO);
    }

    #[rstest]
    #[case("t0", Register::T0)]
    #[case("$sp", Register::Sp)]
    #[case("$31", Register::Ra)]
    #[case("ZERO", Register::Zero)]
    #[case("8", Register::T0)]
    fn register_names_parse(#[case] name: &str, #[case] expected: Register) {
        assert_eq!(Register::from_name(name), Some(expected));
    }

    #[test]
    fn unknown_register_names_are_rejected() {
        assert_eq!(Register::from_name("$32"), None);
        assert_eq!(Register::from_name("r1"), None);
    }

    #[test]
    fn slot_order_matches_indices() {
        for (index, register) in Register::ALL.iter().enumerate() {
            assert_eq!(register.index(), index);
            assert_eq!(Register::from_index(index), Some(*register));
        }
        assert_eq!(Register::ALL.len(), REGISTER_COUNT);
    }

    proptest! {
        #[test]
        fn writes_are_visible_in_snapshot(index in 1usize..REGISTER_COUNT, value in any::<u32>()) {
            let bank = RegisterBank::new();
            let register = Register::ALL[index];
            prop_assert!(bank.set(register, Word::from_unsigned(value)));
            prop_assert_eq!(bank.snapshot()[index], Word::from_unsigned(value));
            bank.reset();
            prop_assert_eq!(bank.get(register), Word::ZERO);
        }
    }
}
