//! Compilation errors.

use crate::Span;
use crate::api::{Diagnostic, Severity};
use crate::lexer::{LexError, SpannedLexError};

/// A fatal compilation error. Compilation stops at the first one.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileErrorKind {
    #[error("{0}")]
    Lex(LexError),

    #[error("Expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },

    #[error("Undefined variable `{0}`")]
    UndefinedVariable(String),

    #[error("Undefined function `{0}`")]
    UndefinedFunction(String),

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Unknown type `{0}`")]
    UnknownType(String),

    #[error("Type {ty} cannot be passed to native function `{function}`")]
    UnsupportedNativeType { function: String, ty: String },

    #[error("No native symbol named `{0}` is registered")]
    UnknownNativeSymbol(String),

    #[error("Extern function `{0}` must return void")]
    NonVoidExtern(String),

    #[error("`{function}` takes {expected} argument(s), got {found}")]
    ArityMismatch {
        function: String,
        expected: usize,
        found: usize,
    },

    #[error("`{function}` can reach its end without returning a {ty}")]
    MissingReturn { function: String, ty: String },

    #[error("`break` outside of a loop")]
    BreakOutsideLoop,

    #[error("Invalid assignment target")]
    InvalidAssignmentTarget,

    #[error("Too many live slots in one function (limit: {limit})")]
    TooManySlots { limit: usize },

    #[error("Too many constants in one function (limit: {limit})")]
    TooManyConstants { limit: usize },

    #[error("Too many functions in one program (limit: {limit})")]
    TooManyFunctions { limit: usize },

    #[error("Jump target {target} does not fit in a branch instruction")]
    JumpTooFar { target: usize },

    #[error("{pending} unpatched branch(es) in `{unit}`")]
    UnpatchedBranch { unit: String, pending: usize },
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Stable code for documentation lookup.
    pub fn code(&self) -> &'static str {
        use CompileErrorKind::*;
        match self.kind {
            Lex(_) => "E001",
            UnexpectedToken { .. } => "E002",
            UndefinedVariable(_) => "E003",
            UndefinedFunction(_) => "E004",
            TypeMismatch { .. } => "E005",
            UnknownType(_) => "E006",
            UnsupportedNativeType { .. } => "E007",
            UnknownNativeSymbol(_) => "E008",
            NonVoidExtern(_) => "E009",
            ArityMismatch { .. } => "E010",
            BreakOutsideLoop => "E011",
            InvalidAssignmentTarget => "E012",
            TooManySlots { .. } => "E013",
            TooManyConstants { .. } => "E014",
            JumpTooFar { .. } => "E015",
            UnpatchedBranch { .. } => "E016",
            TooManyFunctions { .. } => "E017",
            MissingReturn { .. } => "E018",
        }
    }

    fn help(&self) -> Option<String> {
        match &self.kind {
            CompileErrorKind::UnknownNativeSymbol(name) => Some(format!(
                "register `{name}` with `Environment::register_native` before compiling"
            )),
            CompileErrorKind::MissingReturn { .. } => {
                Some("add a `return` at the end of the function body".to_owned())
            }
            CompileErrorKind::BreakOutsideLoop => {
                Some("`break` is only valid inside `while` or `loop`".to_owned())
            }
            CompileErrorKind::InvalidAssignmentTarget => {
                Some("only variables can be assigned to".to_owned())
            }
            _ => None,
        }
    }

    /// Convert to a Diagnostic for API boundary.
    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic {
            severity: Severity::Error,
            message: self.kind.to_string(),
            span: self.span.clone(),
            related: Vec::new(),
            help: self.help(),
            code: Some(self.code().to_owned()),
        }
    }
}

impl From<SpannedLexError> for CompileError {
    fn from(err: SpannedLexError) -> Self {
        CompileError::new(CompileErrorKind::Lex(err.error), err.span)
    }
}
