//! Single-pass compiler from Sable source to register bytecode.
//!
//! ## Design
//!
//! - The parser recognizes the grammar and emits instructions in the same
//!   pass; there is no syntax tree.
//! - Each function being compiled owns a [`scope::Frame`]: its scopes, a LIFO
//!   slot allocator and an [`emitter::Emitter`].
//! - Forward branches are backpatched with absolute targets; a unit with an
//!   unpatched branch is never finalized.

mod emitter;
mod error;
mod parser;
mod scope;


pub use emitter::{Emitter, PendingJump};
pub use error::{CompileError, CompileErrorKind};
pub use parser::{Compilation, Parser, compile};
pub use scope::{Frame, LoopContext, Slot, Variable};
