//! The Sable compilation engine.

use super::{CompilationOptions, CompiledProgram, EngineOptions, Environment, Error};
use crate::compiler;

/// Compiles Sable source against a fixed host environment.
///
/// The engine holds:
/// - the native functions scripts may bind with `extern fn`
/// - default compilation and execution options
///
/// # Example
///
/// ```
/// use sable_core::api::{Engine, EngineOptions};
///
/// let engine = Engine::new(EngineOptions::default(), |_env| {});
/// let program = engine.compile("let x = 40\nreturn x + 2").unwrap();
/// assert_eq!(program.run().unwrap().map(|v| v.as_int()), Some(42));
/// ```
pub struct Engine {
    environment: Environment,
    options: EngineOptions,
}

impl Engine {
    /// Create an engine. The closure registers the host environment.
    pub fn new(options: EngineOptions, init: impl FnOnce(&mut Environment)) -> Self {
        let mut environment = Environment::new();
        init(&mut environment);
        Self {
            environment,
            options,
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Compile a whole program with the engine's default options.
    pub fn compile(&self, source: &str) -> Result<CompiledProgram, Error> {
        self.compile_with(&self.options.default_compilation_options, source)
    }

    /// Compile with explicit options.
    ///
    /// Warnings are attached to the returned program; the first error aborts
    /// compilation.
    pub fn compile_with(
        &self,
        options: &CompilationOptions,
        source: &str,
    ) -> Result<CompiledProgram, Error> {
        let compilation = compiler::compile(source, self.environment.natives(), options)
            .map_err(|err| {
                tracing::debug!(error = %err, span = ?err.span, "compilation failed");
                Error::from_compile(&err, source)
            })?;
        Ok(CompiledProgram::new(
            compilation.program,
            compilation.warnings,
            self.options.default_execution_options.clone(),
        ))
    }
}
