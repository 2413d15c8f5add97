//! Segment map derived from a loaded program.

use std::fmt;

use crate::Address;
use crate::Program;

/// Granularity of stack growth.
pub const STACK_PAGE_BYTES: u32 = 4096;
/// Default ceiling for the dynamic segment.
pub const DEFAULT_MAX_HEAP_BYTES: u32 = 4 * 1024 * 1024;
/// Default ceiling for the stack segment.
pub const DEFAULT_MAX_STACK_BYTES: u32 = 4 * 1024 * 1024;

/// Memory segment classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Segment {
    /// Statements; read-only and not addressable as data.
    Text,
    /// Assembled static data image.
    StaticData,
    /// Dynamic segment grown by `sbrk`.
    Heap,
    /// Downward-growing stack.
    Stack,
}

impl Segment {
    /// Human-readable segment name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::StaticData => "static data",
            Self::Heap => "heap",
            Self::Stack => "stack",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Half-open address range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentBounds {
    /// Inclusive start.
    pub start: Address,
    /// Exclusive end.
    pub end: Address,
}

impl SegmentBounds {
    /// True when `address` lies inside the range.
    #[must_use]
    pub fn contains(self, address: Address) -> bool {
        self.start <= address && address < self.end
    }

    /// Size in bytes.
    #[must_use]
    pub const fn len(self) -> u32 {
        self.end.value().saturating_sub(self.start.value())
    }

    /// True for an empty range.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len() == 0
    }
}

/// Growth ceilings for the dynamic and stack segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryLimits {
    /// Maximum heap size in bytes.
    pub max_heap_bytes: u32,
    /// Maximum stack size in bytes.
    pub max_stack_bytes: u32,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            max_heap_bytes: DEFAULT_MAX_HEAP_BYTES,
            max_stack_bytes: DEFAULT_MAX_STACK_BYTES,
        }
    }
}

/// Maximal extents of every segment for one program.
///
/// Heap and stack bounds are the largest extents growth may reach; the
/// committed portion is tracked by [`crate::MainMemory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentLayout {
    /// Text segment.
    pub text: SegmentBounds,
    /// Static data image.
    pub static_data: SegmentBounds,
    /// Dynamic segment up to its growth limit.
    pub heap: SegmentBounds,
    /// Stack from its growth limit up to the top.
    pub stack: SegmentBounds,
}

impl SegmentLayout {
    /// Derives the layout from program bases and growth limits.
    #[must_use]
    pub fn for_program(program: &Program, limits: MemoryLimits) -> Self {
        let text_end = if program.text_segment.is_empty() {
            program.text_segment_start
        } else {
            program.text_segment_end().unwrap_or(Address::MAX)
        };
        let data_end = program.data_segment_end().unwrap_or(Address::MAX);
        let heap_start = program.dynamic_segment_start;
        let heap_end = heap_start
            .checked_add(limits.max_heap_bytes)
            .unwrap_or(Address::MAX);
        let stack_top = program
            .initial_sp
            .checked_add(4)
            .unwrap_or(Address::MAX);
        let stack_limit = stack_top
            .checked_sub(limits.max_stack_bytes)
            .unwrap_or_default();

        Self {
            text: SegmentBounds {
                start: program.text_segment_start,
                end: text_end,
            },
            static_data: SegmentBounds {
                start: program.data_segment_start,
                end: data_end,
            },
            heap: SegmentBounds {
                start: heap_start,
                end: heap_end,
            },
            stack: SegmentBounds {
                start: stack_limit,
                end: stack_top,
            },
        }
    }

    /// Segment `address` nominally belongs to, checked in text, data, heap, stack order.
    ///
    /// The gap between the heap ceiling and the stack limit classifies as
    /// stack, so a runaway push reports a stack overflow.
    #[must_use]
    pub fn classify(&self, address: Address) -> Option<Segment> {
        let stack_reach = SegmentBounds {
            start: self.heap.end.min(self.stack.start),
            end: self.stack.end,
        };
        [
            (Segment::Text, self.text),
            (Segment::StaticData, self.static_data),
            (Segment::Heap, self.heap),
            (Segment::Stack, stack_reach),
        ]
        .into_iter()
        .find_map(|(segment, bounds)| bounds.contains(address).then_some(segment))
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryLimits, Segment, SegmentLayout};
    use crate::{Address, Instruction, ProgramBuilder};
    use rstest::rstest;

    fn layout() -> SegmentLayout {
        let program = ProgramBuilder::new()
            .label("main")
            .instruction(Instruction::Nop, Vec::new())
            .instruction(Instruction::Exit, Vec::new())
            .words("value", &[7])
            .build();
        SegmentLayout::for_program(&program, MemoryLimits::default())
    }

    #[rstest]
    #[case(0x0040_0000, Some(Segment::Text))]
    #[case(0x0040_0004, Some(Segment::Text))]
    #[case(0x0040_0008, None)]
    #[case(0x1001_0000, Some(Segment::StaticData))]
    #[case(0x1001_0004, None)]
    #[case(0x1004_0000, Some(Segment::Heap))]
    #[case(0x7fff_effc, Some(Segment::Stack))]
    #[case(0x2000_0000, Some(Segment::Stack))]
    #[case(0x7fff_f000, None)]
    #[case(0x0000_0000, None)]
    fn classification(#[case] address: u32, #[case] expected: Option<Segment>) {
        assert_eq!(layout().classify(Address::new(address)), expected);
    }

    #[test]
    fn stack_limit_follows_configured_size() {
        let layout = layout();
        assert_eq!(layout.stack.end, Address::new(0x7fff_f000));
        assert_eq!(layout.stack.len(), MemoryLimits::default().max_stack_bytes);
    }
}
