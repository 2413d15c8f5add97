use super::{
    Address, Annotation, Instruction, Operand, Program, Statement, DEFAULT_DATA_START,
    DEFAULT_TEXT_START, INSTRUCTION_BYTES,
};

/// Incremental [`Program`] constructor for hosts and tests that do not run an assembler.
///
/// Statements are laid out contiguously from the text start; data items are
/// appended word-aligned from the data start.
#[derive(Debug, Clone)]
pub struct ProgramBuilder {
    program: Program,
    next_text: Address,
    last_statement: Option<Address>,
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramBuilder {
    /// Starts an empty program at the default segment bases.
    #[must_use]
    pub fn new() -> Self {
        Self::with_bases(DEFAULT_TEXT_START, DEFAULT_DATA_START)
    }

    /// Starts an empty program with explicit text and data bases.
    #[must_use]
    pub fn with_bases(text_start: Address, data_start: Address) -> Self {
        let program = Program {
            text_segment_start: text_start,
            text_segment_last: text_start,
            data_segment_start: data_start,
            ..Program::default()
        };
        Self {
            program,
            next_text: text_start,
            last_statement: None,
        }
    }

    /// Address the next statement will occupy.
    #[must_use]
    pub const fn next_text_address(&self) -> Address {
        self.next_text
    }

    /// Binds `name` to the next statement address.
    #[must_use]
    pub fn label(mut self, name: impl Into<String>) -> Self {
        self.program.labels.insert(name.into(), self.next_text);
        self
    }

    /// Appends a statement.
    #[must_use]
    pub fn statement(mut self, statement: Statement) -> Self {
        let address = self.next_text;
        self.program.text_segment.insert(address, statement);
        self.program.text_segment_last = address;
        self.last_statement = Some(address);
        self.next_text = address
            .checked_add(INSTRUCTION_BYTES)
            .unwrap_or(Address::MAX);
        self
    }

    /// Appends `instruction` with `operands`.
    #[must_use]
    pub fn instruction(self, instruction: Instruction, operands: impl Into<Vec<Operand>>) -> Self {
        self.statement(Statement::new(instruction, operands))
    }

    /// Attaches an annotation to the most recently appended statement.
    ///
    /// Before any statement exists the annotation is attached to the text start.
    #[must_use]
    pub fn annotate(mut self, code: impl Into<String>) -> Self {
        let address = self
            .last_statement
            .unwrap_or(self.program.text_segment_start);
        self.program.annotations.insert(address, Annotation::new(code));
        self
    }

    /// Sets the annotation dispatched once when a run starts.
    #[must_use]
    pub fn init_annotation(mut self, code: impl Into<String>) -> Self {
        self.program.init_annotation = Some(Annotation::new(code));
        self
    }

    /// Appends raw bytes to static data under `name`, padding to the next word.
    #[must_use]
    pub fn data(mut self, name: impl Into<String>, bytes: &[u8]) -> Self {
        let offset = u32::try_from(self.program.data_segment.len()).unwrap_or(u32::MAX);
        if let Some(address) = self.program.data_segment_start.checked_add(offset) {
            self.program.labels.insert(name.into(), address);
        }
        self.program.data_segment.extend_from_slice(bytes);
        let padded = self.program.data_segment.len().next_multiple_of(4);
        self.program.data_segment.resize(padded, 0);
        self
    }

    /// Appends big-endian words under `name`.
    #[must_use]
    pub fn words(self, name: impl Into<String>, values: &[i32]) -> Self {
        let bytes: Vec<u8> = values.iter().flat_map(|value| value.to_be_bytes()).collect();
        self.data(name, &bytes)
    }

    /// Appends a NUL-terminated string under `name`.
    #[must_use]
    pub fn asciiz(self, name: impl Into<String>, text: &str) -> Self {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        self.data(name, &bytes)
    }

    /// Overrides the initial stack pointer.
    #[must_use]
    pub const fn stack_pointer(mut self, sp: Address) -> Self {
        self.program.initial_sp = sp;
        self
    }

    /// Overrides the first dynamic-segment address.
    #[must_use]
    pub const fn dynamic_segment_start(mut self, start: Address) -> Self {
        self.program.dynamic_segment_start = start;
        self
    }

    /// Finishes the program.
    #[must_use]
    pub fn build(self) -> Program {
        self.program
    }
}
