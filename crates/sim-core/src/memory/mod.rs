//! Segmented main memory with per-segment access policy.

/// Width and alignment validation.
pub mod access;
/// Segment classification and layout.
pub mod map;

use std::sync::Arc;

pub use access::{access_end, validate_alignment, AccessWidth};
pub use map::{
    MemoryLimits, Segment, SegmentBounds, SegmentLayout, DEFAULT_MAX_HEAP_BYTES,
    DEFAULT_MAX_STACK_BYTES, STACK_PAGE_BYTES,
};

use crate::{
    Address, Fault, HeapFault, MemoryFault, Program, StackFault, Statement, Word,
    INSTRUCTION_BYTES,
};

/// Longest string the core will read from memory in one go.
pub const MAX_STRING_BYTES: usize = 64 * 1024;

/// Main memory for one loaded program.
///
/// Text is served from the program's statement map and is read-only. Static
/// data, heap and stack are byte images with big-endian word layout. The heap
/// grows upward through [`MainMemory::sbrk`]; the stack is committed downward
/// in [`STACK_PAGE_BYTES`] pages through [`MainMemory::grow_stack_to`].
#[derive(Debug, Clone)]
pub struct MainMemory {
    program: Arc<Program>,
    layout: SegmentLayout,
    static_data: Vec<u8>,
    heap: Vec<u8>,
    stack: Vec<u8>,
    stack_bottom: Address,
}

impl Default for MainMemory {
    fn default() -> Self {
        Self::new(Arc::new(Program::default()), MemoryLimits::default())
    }
}

impl MainMemory {
    /// Lays out memory for `program`, committing one stack page.
    #[must_use]
    pub fn new(program: Arc<Program>, limits: MemoryLimits) -> Self {
        let layout = SegmentLayout::for_program(&program, limits);
        let stack_bottom = layout
            .stack
            .end
            .checked_sub(STACK_PAGE_BYTES)
            .map_or(layout.stack.start, |page| page.max(layout.stack.start));
        let committed = layout.stack.end.offset_from(stack_bottom).unwrap_or(0);
        Self {
            static_data: program.data_segment.clone(),
            program,
            layout,
            heap: Vec::new(),
            stack: vec![0; committed as usize],
            stack_bottom,
        }
    }

    /// Program this memory was built from.
    #[must_use]
    pub const fn program(&self) -> &Arc<Program> {
        &self.program
    }

    /// Segment extents.
    #[must_use]
    pub const fn layout(&self) -> &SegmentLayout {
        &self.layout
    }

    /// First uncommitted heap address.
    #[must_use]
    pub fn heap_break(&self) -> Address {
        let committed = u32::try_from(self.heap.len()).unwrap_or(u32::MAX);
        self.layout
            .heap
            .start
            .checked_add(committed)
            .unwrap_or(Address::MAX)
    }

    /// Lowest committed stack address.
    #[must_use]
    pub const fn stack_bottom(&self) -> Address {
        self.stack_bottom
    }

    /// Fetches the statement stored at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryFault::Alignment`] for a misaligned address and
    /// [`MemoryFault::OutOfBounds`] when no statement lives there.
    pub fn fetch_statement(&self, address: Address) -> Result<&Statement, Fault> {
        if !address.is_aligned(INSTRUCTION_BYTES) {
            return Err(MemoryFault::Alignment {
                address,
                width: AccessWidth::Word,
            }
            .into());
        }
        let segment = self.layout.classify(address);
        match (segment, self.program.statement_at(address)) {
            (Some(Segment::Text), Some(statement)) => Ok(statement),
            _ => Err(MemoryFault::OutOfBounds {
                address,
                width: AccessWidth::Word,
                segment,
            }
            .into()),
        }
    }

    /// Reads `width` bytes at `address`, zero-extended into a word.
    ///
    /// # Errors
    ///
    /// Returns the bounds, alignment, heap-break or committed-stack fault for the access.
    pub fn read(&self, address: Address, width: AccessWidth) -> Result<Word, Fault> {
        let (segment, offset) = self.locate(address, width)?;
        let bytes = &self.segment_bytes(segment)[offset..offset + width.bytes() as usize];
        Ok(match width {
            AccessWidth::Byte => Word::from_unsigned(u32::from(bytes[0])),
            AccessWidth::Half => {
                Word::from_unsigned(u32::from(u16::from_be_bytes([bytes[0], bytes[1]])))
            }
            AccessWidth::Word => Word::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        })
    }

    /// Writes the low `width` bytes of `value` at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryFault::ReadOnly`] for any text address, otherwise the
    /// same faults as [`MainMemory::read`].
    pub fn write(&mut self, address: Address, width: AccessWidth, value: Word) -> Result<(), Fault> {
        if self.layout.classify(address) == Some(Segment::Text) {
            return Err(MemoryFault::ReadOnly { address }.into());
        }
        let (segment, offset) = self.locate(address, width)?;
        let image = value.to_be_bytes();
        let source = &image[4 - width.bytes() as usize..];
        let target = match segment {
            Segment::StaticData => &mut self.static_data,
            Segment::Heap => &mut self.heap,
            Segment::Stack => &mut self.stack,
            Segment::Text => return Err(MemoryFault::ReadOnly { address }.into()),
        };
        target[offset..offset + source.len()].copy_from_slice(source);
        Ok(())
    }

    /// Reads a NUL-terminated byte string starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns the first fault raised while walking the string.
    pub fn read_c_string(&self, address: Address) -> Result<Vec<u8>, Fault> {
        let mut bytes = Vec::new();
        let mut cursor = address;
        while bytes.len() < MAX_STRING_BYTES {
            let byte = self.read(cursor, AccessWidth::Byte)?.as_unsigned().to_be_bytes()[3];
            if byte == 0 {
                break;
            }
            bytes.push(byte);
            cursor = cursor
                .checked_add(1)
                .ok_or(MemoryFault::OutOfBounds {
                    address: cursor,
                    width: AccessWidth::Byte,
                    segment: None,
                })?;
        }
        Ok(bytes)
    }

    /// Writes `bytes` starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns the first fault raised; earlier bytes stay written.
    pub fn write_bytes(&mut self, address: Address, bytes: &[u8]) -> Result<(), Fault> {
        let mut cursor = address;
        for byte in bytes {
            self.write(cursor, AccessWidth::Byte, Word::from_unsigned(u32::from(*byte)))?;
            cursor = cursor
                .checked_add(1)
                .ok_or(MemoryFault::OutOfBounds {
                    address: cursor,
                    width: AccessWidth::Byte,
                    segment: None,
                })?;
        }
        Ok(())
    }

    /// Grows the heap by `increment` bytes (rounded up to a word) and returns the previous break.
    ///
    /// # Errors
    ///
    /// Returns [`HeapFault::NegativeIncrement`] for negative increments and
    /// [`HeapFault::Exhausted`] when the heap limit would be exceeded.
    pub fn sbrk(&mut self, increment: i32) -> Result<Address, Fault> {
        if increment < 0 {
            return Err(HeapFault::NegativeIncrement { increment }.into());
        }
        let old_break = self.heap_break();
        let available = self.layout.heap.end.offset_from(old_break).unwrap_or(0);
        let requested = increment.unsigned_abs();
        let rounded = requested
            .checked_next_multiple_of(4)
            .filter(|bytes| *bytes <= available)
            .ok_or(HeapFault::Exhausted {
                requested,
                available,
            })?;
        self.heap.resize(self.heap.len() + rounded as usize, 0);
        Ok(old_break)
    }

    /// Commits stack pages down to (and including) `address`.
    ///
    /// # Errors
    ///
    /// Returns [`StackFault::Overflow`] when `address` is below the stack limit.
    pub fn grow_stack_to(&mut self, address: Address) -> Result<(), Fault> {
        if address >= self.stack_bottom {
            return Ok(());
        }
        let limit = self.layout.stack.start;
        if address < limit {
            return Err(StackFault::Overflow { address, limit }.into());
        }
        let page_floor = Address::new(address.value() - address.value() % STACK_PAGE_BYTES);
        let new_bottom = page_floor.max(limit);
        let extra = self.stack_bottom.offset_from(new_bottom).unwrap_or(0) as usize;
        let mut grown = vec![0; extra + self.stack.len()];
        grown[extra..].copy_from_slice(&self.stack);
        self.stack = grown;
        self.stack_bottom = new_bottom;
        Ok(())
    }

    fn segment_bytes(&self, segment: Segment) -> &[u8] {
        match segment {
            Segment::StaticData => &self.static_data,
            Segment::Heap => &self.heap,
            Segment::Stack => &self.stack,
            Segment::Text => &[],
        }
    }

    fn locate(&self, address: Address, width: AccessWidth) -> Result<(Segment, usize), Fault> {
        let Some(segment) = self.layout.classify(address) else {
            return Err(MemoryFault::OutOfBounds {
                address,
                width,
                segment: None,
            }
            .into());
        };
        validate_alignment(address, width)?;
        let end = access_end(address, width)?;
        let out_of_bounds = MemoryFault::OutOfBounds {
            address,
            width,
            segment: Some(segment),
        };

        let base = match segment {
            Segment::Text => return Err(out_of_bounds.into()),
            Segment::StaticData => {
                if end > self.layout.static_data.end {
                    return Err(out_of_bounds.into());
                }
                self.layout.static_data.start
            }
            Segment::Heap => {
                let brk = self.heap_break();
                if end > brk {
                    return Err(HeapFault::AboveBreak { address, brk }.into());
                }
                self.layout.heap.start
            }
            Segment::Stack => {
                if address < self.stack_bottom {
                    return Err(StackFault::BelowCommitted {
                        address,
                        bottom: self.stack_bottom,
                    }
                    .into());
                }
                if end > self.layout.stack.end {
                    return Err(out_of_bounds.into());
                }
                self.stack_bottom
            }
        };
        let offset = address.offset_from(base).ok_or(out_of_bounds)?;
        Ok((segment, offset as usize))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{AccessWidth, MainMemory, MemoryLimits, Segment, STACK_PAGE_BYTES};
    use crate::{
        Address, Fault, HeapFault, Instruction, MemoryFault, ProgramBuilder, StackFault, Word,
    };
    use proptest::prelude::*;

    fn memory() -> MainMemory {
        let program = ProgramBuilder::new()
            .label("main")
            .instruction(Instruction::Nop, Vec::new())
            .instruction(Instruction::Exit, Vec::new())
            .words("value", &[0x0102_0304, -1])
            .asciiz("text", "ok")
            .build();
        MainMemory::new(
            Arc::new(program),
            MemoryLimits {
                max_heap_bytes: 64,
                max_stack_bytes: 3 * STACK_PAGE_BYTES,
            },
        )
    }

    #[test]
    fn static_data_reads_are_big_endian() {
        let memory = memory();
        let base = Address::new(0x1001_0000);
        assert_eq!(
            memory.read(base, AccessWidth::Word),
            Ok(Word::from_unsigned(0x0102_0304))
        );
        assert_eq!(
            memory.read(base, AccessWidth::Byte),
            Ok(Word::from_unsigned(0x01))
        );
        assert_eq!(
            memory.read(Address::new(0x1001_0002), AccessWidth::Half),
            Ok(Word::from_unsigned(0x0304))
        );
    }

    #[test]
    fn text_is_read_only_and_not_data() {
        let mut memory = memory();
        let text = Address::new(0x0040_0000);
        assert_eq!(
            memory.write(text, AccessWidth::Word, Word::ZERO),
            Err(Fault::Memory(MemoryFault::ReadOnly { address: text }))
        );
        assert_eq!(
            memory.read(text, AccessWidth::Word),
            Err(Fault::Memory(MemoryFault::OutOfBounds {
                address: text,
                width: AccessWidth::Word,
                segment: Some(Segment::Text),
            }))
        );
        assert!(memory.fetch_statement(text).is_ok());
    }

    #[test]
    fn fetch_outside_text_is_out_of_bounds() {
        let memory = memory();
        assert!(matches!(
            memory.fetch_statement(Address::new(0x0040_0008)),
            Err(Fault::Memory(MemoryFault::OutOfBounds { .. }))
        ));
        assert!(matches!(
            memory.fetch_statement(Address::new(0x0040_0002)),
            Err(Fault::Memory(MemoryFault::Alignment { .. }))
        ));
    }

    #[test]
    fn misaligned_and_unmapped_accesses_fault() {
        let memory = memory();
        assert!(matches!(
            memory.read(Address::new(0x1001_0001), AccessWidth::Word),
            Err(Fault::Memory(MemoryFault::Alignment { .. }))
        ));
        assert!(matches!(
            memory.read(Address::new(0x0000_1000), AccessWidth::Word),
            Err(Fault::Memory(MemoryFault::OutOfBounds { segment: None, .. }))
        ));
    }

    #[test]
    fn heap_accesses_respect_the_break() {
        let mut memory = memory();
        let heap = Address::new(0x1004_0000);
        assert_eq!(
            memory.read(heap, AccessWidth::Word),
            Err(Fault::Heap(HeapFault::AboveBreak {
                address: heap,
                brk: heap
            }))
        );
        assert_eq!(memory.sbrk(5), Ok(heap));
        assert_eq!(memory.heap_break(), Address::new(0x1004_0008));
        memory
            .write(Address::new(0x1004_0004), AccessWidth::Word, Word::from_signed(-2))
            .expect("heap word is committed");
        assert_eq!(
            memory.read(Address::new(0x1004_0004), AccessWidth::Word),
            Ok(Word::from_signed(-2))
        );
        assert_eq!(
            memory.sbrk(64),
            Err(Fault::Heap(HeapFault::Exhausted {
                requested: 64,
                available: 56
            }))
        );
        assert!(matches!(
            memory.sbrk(-4),
            Err(Fault::Heap(HeapFault::NegativeIncrement { increment: -4 }))
        ));
    }

    #[test]
    fn stack_grows_in_pages_up_to_the_limit() {
        let mut memory = memory();
        let below = Address::new(0x7fff_e000 - 8);
        assert!(matches!(
            memory.write(below, AccessWidth::Word, Word::ZERO),
            Err(Fault::Stack(StackFault::BelowCommitted { .. }))
        ));
        memory.grow_stack_to(below).expect("within limit");
        assert_eq!(memory.stack_bottom(), Address::new(0x7fff_d000));
        memory
            .write(below, AccessWidth::Word, Word::from_signed(9))
            .expect("committed");
        assert_eq!(memory.read(below, AccessWidth::Word), Ok(Word::from_signed(9)));

        let beyond = Address::new(0x7fff_c000 - 4);
        assert!(matches!(
            memory.grow_stack_to(beyond),
            Err(Fault::Stack(StackFault::Overflow { .. }))
        ));
    }

    #[test]
    fn c_strings_stop_at_nul() {
        let memory = memory();
        assert_eq!(
            memory.read_c_string(Address::new(0x1001_0008)),
            Ok(b"ok".to_vec())
        );
    }

    proptest! {
        #[test]
        fn every_text_write_is_read_only(slot in 0u32..8, width in prop_oneof![
            Just(AccessWidth::Byte),
            Just(AccessWidth::Half),
            Just(AccessWidth::Word),
        ]) {
            let mut memory = memory();
            let address = Address::new(0x0040_0000 + slot);
            prop_assert_eq!(
                memory.write(address, width, Word::from_unsigned(slot)),
                Err(Fault::Memory(MemoryFault::ReadOnly { address }))
            );
        }

        #[test]
        fn stack_writes_read_back(offset in 0u32..1024, value in any::<u32>()) {
            let mut memory = memory();
            let address = Address::new(0x7fff_effc - offset * 4);
            memory.write(address, AccessWidth::Word, Word::from_unsigned(value)).expect("committed page");
            prop_assert_eq!(memory.read(address, AccessWidth::Word), Ok(Word::from_unsigned(value)));
        }
    }
}
