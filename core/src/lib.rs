//! Sable core: a single-pass compiler from Sable source to register bytecode,
//! and the virtual machine that runs it.
//!
//! The pipeline has no syntax tree. The parser drives the slot allocator and
//! the instruction emitter directly while it recognizes the grammar:
//!
//! ```text
//! source -> lexer -> parser (scope/slot allocator + emitter) -> Program -> VM
//! ```

pub mod api;
pub mod compiler;
pub mod lexer;
pub mod types;
pub mod vm;

pub use vm::{Bytecode, Instruction, Opcode, Program, UnitId, Value, Vm};

/// Byte range into the source text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Span(pub core::ops::Range<usize>);

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self(start..end)
    }

    pub fn combine(a: &Span, b: &Span) -> Span {
        Span::new(a.0.start, b.0.end)
    }

    pub fn str_of<'a>(&self, source: &'a str) -> &'a str {
        &source[self.0.start..self.0.end]
    }
}
