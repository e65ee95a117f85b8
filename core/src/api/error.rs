//! Public error types for the Sable API.
//!
//! Internal errors (`CompileError`, `ExecutionError`) are converted to these
//! types at the API boundary.

use core::fmt;

use crate::Span;
use crate::compiler::CompileError;
use crate::vm::ExecutionError;

/// Public error type for all Sable operations.
#[derive(Debug)]
pub enum Error {
    /// Invalid API usage (e.g. running a function that does not exist).
    Api(String),

    /// Compilation failure, with the source it refers to.
    Compilation {
        diagnostics: Vec<Diagnostic>,
        source: String,
    },

    /// Runtime errors during execution (e.g. division by zero).
    Runtime(String),

    /// Resource limits exceeded (register file or call depth).
    ResourceExceeded(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Api(msg) => write!(f, "API error: {}", msg),
            Error::Compilation { diagnostics, .. } => {
                let errors: Vec<_> = diagnostics
                    .iter()
                    .filter(|d| d.severity == Severity::Error)
                    .collect();
                match errors.as_slice() {
                    [only] => write!(f, "Compilation failed: {}", only.message),
                    _ => write!(f, "Compilation failed with {} error(s)", errors.len()),
                }
            }
            Error::Runtime(msg) => write!(f, "Runtime error: {}", msg),
            Error::ResourceExceeded(msg) => write!(f, "Resource limit exceeded: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// A diagnostic message (error, warning, or info) with source location.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    /// Severity level (error, warning, info).
    pub severity: Severity,

    /// Primary diagnostic message.
    pub message: String,

    /// Source location of the primary issue.
    pub span: Span,

    /// Related locations that provide additional context.
    pub related: Vec<RelatedInfo>,

    /// Optional help text suggesting how to fix the issue.
    pub help: Option<String>,

    /// Optional error code (e.g., "E001") for documentation lookup.
    pub code: Option<String>,
}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Error - compilation cannot succeed.
    Error,
    /// Warning - suspicious code that might be wrong.
    Warning,
    /// Info - informational message.
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// Related information for a diagnostic (e.g., "previously declared here").
#[derive(Debug, Clone, PartialEq)]
pub struct RelatedInfo {
    pub span: Span,
    pub message: String,
}

impl Error {
    pub(crate) fn from_compile(err: &CompileError, source: &str) -> Self {
        Error::Compilation {
            diagnostics: vec![err.to_diagnostic()],
            source: source.to_owned(),
        }
    }
}

impl From<ExecutionError> for Error {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::Runtime(e) => Error::Runtime(e.to_string()),
            ExecutionError::ResourceExceeded(e) => Error::ResourceExceeded(e.to_string()),
        }
    }
}
