//! Sable - a small compiled scripting language with a C bridge
//!
//! # Overview
//!
//! Sable source is compiled in a single pass to register bytecode and run on
//! a compact virtual machine. Scripts can call `extern "C"` host functions
//! declared with `extern fn`; arguments are marshalled through libffi.
//!
//! # Quick Start
//!
//! ```
//! use sable::{Engine, EngineOptions};
//!
//! let engine = Engine::new(EngineOptions::default(), |_env| {});
//! let program = engine
//!     .compile("let total = 0\nlet i = 1\nwhile i <= 10 { total += i\ni += 1 }\nreturn total")
//!     .unwrap();
//! assert_eq!(program.run().unwrap().map(|v| v.as_int()), Some(55));
//! ```
//!
//! # Host Functions
//!
//! ```
//! use sable::{Engine, EngineOptions};
//!
//! extern "C" fn log_code(_code: i32) {}
//!
//! let engine = Engine::new(EngineOptions::default(), |env| unsafe {
//!     env.register_native("log_code", log_code as *const core::ffi::c_void);
//! });
//! let program = engine
//!     .compile("extern fn log_code(code: i32)\nlog_code(404)")
//!     .unwrap();
//! assert_eq!(program.run().unwrap(), None);
//! ```

mod error_renderer;

pub use error_renderer::{
    render_error, render_error_to, render_error_to_string, render_error_to_string_no_color,
    render_warnings_to,
};

pub use sable_core::api::{
    CompilationOptions, CompiledProgram, Diagnostic, Engine, EngineOptions, Environment, Error,
    ExecutionOptions, RelatedInfo, Severity,
};
pub use sable_core::types::{self, Type};
pub use sable_core::vm::{self, Program, Value};
