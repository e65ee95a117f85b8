//! Public API for compiling and running Sable programs.
//!
//! An [`Engine`] owns the host environment (native functions callable from
//! scripts) and default options. Compiling source yields a
//! [`CompiledProgram`], which can be run any number of times; every run gets a
//! fresh register file.
//!
//! # Example
//!
//! ```
//! use sable_core::api::{Engine, EngineOptions};
//!
//! let engine = Engine::new(EngineOptions::default(), |_env| {});
//!
//! let program = engine
//!     .compile("fn sq(x: i64): i64 { return x * x } return sq(7)")
//!     .unwrap();
//! let result = program.run().unwrap();
//! assert_eq!(result.map(|v| v.as_int()), Some(49));
//! ```

pub mod engine;
pub mod environment;
pub mod error;
pub mod options;
pub mod program;

pub use engine::Engine;
pub use environment::Environment;
pub use error::{Diagnostic, Error, RelatedInfo, Severity};
pub use options::{CompilationOptions, EngineOptions, ExecutionOptions};
pub use program::CompiledProgram;
