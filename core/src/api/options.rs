//! Configuration options for the Sable engine.

/// Configuration options for compilation.
///
/// # Example
///
/// ```
/// use sable_core::api::CompilationOptions;
///
/// let options = CompilationOptions {
///     max_slots: 64,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct CompilationOptions {
    /// Maximum number of slots live at once in a single function. Values
    /// above 256 are clamped, since register operands are 8 bits wide.
    ///
    /// Default: 256
    pub max_slots: usize,

    /// Maximum number of entries in a single function's constant pool. Values
    /// above 65536 are clamped to the width of the Bx operand.
    ///
    /// Default: 65536
    pub max_constants: usize,
}

impl Default for CompilationOptions {
    fn default() -> Self {
        Self {
            max_slots: 256,
            max_constants: 65536,
        }
    }
}

/// Configuration options for program execution.
///
/// # Example
///
/// ```
/// use sable_core::api::ExecutionOptions;
///
/// let options = ExecutionOptions {
///     register_capacity: 4096,
///     max_call_depth: 200,
/// };
/// ```
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Number of register cells shared by every active call window.
    ///
    /// Default: 1000
    pub register_capacity: usize,

    /// Maximum number of nested script calls (recursion protection).
    ///
    /// Default: 1000
    pub max_call_depth: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            register_capacity: 1000,
            max_call_depth: 1000,
        }
    }
}

/// Configuration options for the Sable engine.
///
/// These options set the defaults for compilation and execution,
/// which can be overridden on a per-call basis.
///
/// # Example
///
/// ```
/// use sable_core::api::{EngineOptions, CompilationOptions, ExecutionOptions};
///
/// let options = EngineOptions {
///     default_compilation_options: CompilationOptions::default(),
///     default_execution_options: ExecutionOptions {
///         register_capacity: 4096,
///         max_call_depth: 200,
///     },
/// };
/// ```
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Default options for compilation.
    ///
    /// These can be overridden when calling `Engine::compile_with()`.
    pub default_compilation_options: CompilationOptions,

    /// Default options for execution.
    ///
    /// These can be overridden when calling `CompiledProgram::run_with()`.
    pub default_execution_options: ExecutionOptions,
}
