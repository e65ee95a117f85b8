//! Compiled Sable programs.

use super::{Diagnostic, Error, ExecutionOptions};
use crate::vm::{Program, Value, Vm};

/// A compiled program ready for execution.
///
/// Runs are independent: each one builds a VM with a fresh register file, so
/// a failed run leaves nothing behind for the next.
pub struct CompiledProgram {
    program: Program,
    warnings: Vec<Diagnostic>,
    options: ExecutionOptions,
}

impl CompiledProgram {
    pub(crate) fn new(program: Program, warnings: Vec<Diagnostic>, options: ExecutionOptions) -> Self {
        Self {
            program,
            warnings,
            options,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Non-fatal diagnostics produced while compiling.
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    /// Run the top-level code. Returns the value of a top-level `return`, if
    /// it had one.
    pub fn run(&self) -> Result<Option<Value>, Error> {
        self.run_with(&self.options)
    }

    pub fn run_with(&self, options: &ExecutionOptions) -> Result<Option<Value>, Error> {
        let mut vm = Vm::new(&self.program, options);
        Ok(vm.run()?)
    }

    /// Call a script function by name.
    ///
    /// Arguments are raw cells; the caller is responsible for encoding them
    /// the way the function's parameter types expect.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Option<Value>, Error> {
        let Some(id) = self.program.find(name) else {
            return Err(Error::Api(format!("No function named `{name}`")));
        };
        let expected = self.program.unit(id).params.len();
        if args.len() != expected {
            return Err(Error::Api(format!(
                "Argument count mismatch: expected {}, got {}",
                expected,
                args.len()
            )));
        }
        let mut vm = Vm::new(&self.program, &self.options);
        Ok(vm.call(id, args)?)
    }

    /// Human-readable listing of every unit.
    pub fn disassemble(&self) -> String {
        format!("{:?}", self.program)
    }
}

#[cfg(test)]
mod tests {
    use crate::api::{Engine, EngineOptions, Error, ExecutionOptions};
    use crate::vm::Value;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const SOURCE: &str = indoc! {"
        fn fib(n: int): int {
            if n < 2 { return n }
            return fib(n - 1) + fib(n - 2)
        }
        return fib(15)
    "};

    fn compiled(source: &str) -> super::CompiledProgram {
        Engine::new(EngineOptions::default(), |_| {})
            .compile(source)
            .unwrap()
    }

    #[test]
    fn test_run_is_repeatable() {
        let program = compiled(SOURCE);
        assert_eq!(program.run().unwrap(), Some(Value::from_int(610)));
        assert_eq!(program.run().unwrap(), Some(Value::from_int(610)));
    }

    #[test]
    fn test_call_by_name() {
        let program = compiled(SOURCE);
        let result = program.call("fib", &[Value::from_int(20)]).unwrap();
        assert_eq!(result.map(Value::as_int), Some(6765));
    }

    #[test]
    fn test_call_validates_name_and_arity() {
        let program = compiled(SOURCE);
        assert!(matches!(program.call("fob", &[]), Err(Error::Api(_))));
        assert!(matches!(program.call("fib", &[]), Err(Error::Api(_))));
    }

    #[test]
    fn test_run_with_small_register_file() {
        let program = compiled(SOURCE);
        let options = ExecutionOptions {
            register_capacity: 16,
            ..Default::default()
        };
        assert!(matches!(
            program.run_with(&options),
            Err(Error::ResourceExceeded(_))
        ));
        // The failed run does not poison later ones.
        assert_eq!(program.run().unwrap(), Some(Value::from_int(610)));
    }

    #[test]
    fn test_runtime_error_is_reported() {
        let program = compiled("let z = 0\nreturn 10 / z");
        let err = program.run().unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
        assert!(err.to_string().starts_with("Runtime error: "));
    }

    #[test]
    fn test_warnings_survive_compilation() {
        let program = compiled("let x = 1\nlet x = 2\nreturn x");
        assert_eq!(program.warnings().len(), 1);
        assert_eq!(program.warnings()[0].code.as_deref(), Some("W001"));
        assert_eq!(program.run().unwrap(), Some(Value::from_int(2)));
    }

    #[test]
    fn test_disassembly_names_every_unit() {
        let listing = compiled(SOURCE).disassemble();
        assert!(listing.contains("fib"));
        assert!(listing.contains("main"));
    }
}
