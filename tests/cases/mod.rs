#![allow(dead_code)]

use sable::{Engine, EngineOptions, Error, Value};

pub fn engine() -> Engine {
    Engine::new(EngineOptions::default(), |_| {})
}

pub fn run(source: &str) -> Result<Option<Value>, Error> {
    engine().compile(source)?.run()
}

/// Code of the first error diagnostic, for sources that must not compile.
pub fn compile_error_code(source: &str) -> String {
    match engine().compile(source) {
        Err(Error::Compilation { diagnostics, .. }) => diagnostics
            .into_iter()
            .find_map(|d| d.code)
            .unwrap_or_default(),
        Err(other) => panic!("expected a compilation error, got {other}"),
        Ok(_) => panic!("expected a compilation error for {source:?}"),
    }
}

#[macro_export]
macro_rules! test_case {
    ($name:ident, input: $input:expr, int: $expected:expr $(,)?) => {
        #[test]
        fn $name() {
            let result = cases::run($input).unwrap();
            pretty_assertions::assert_eq!(result.map(|v| v.as_int()), Some($expected));
        }
    };
    ($name:ident, input: $input:expr, float: $expected:expr $(,)?) => {
        #[test]
        fn $name() {
            let result = cases::run($input).unwrap();
            pretty_assertions::assert_eq!(result.map(|v| v.as_float()), Some($expected));
        }
    };
    ($name:ident, input: $input:expr, void $(,)?) => {
        #[test]
        fn $name() {
            pretty_assertions::assert_eq!(cases::run($input).unwrap(), None);
        }
    };
    ($name:ident, input: $input:expr, error: $code:expr $(,)?) => {
        #[test]
        fn $name() {
            pretty_assertions::assert_eq!(cases::compile_error_code($input), $code);
        }
    };
    ($name:ident, input: $input:expr, fails: $pattern:pat $(,)?) => {
        #[test]
        fn $name() {
            let result = cases::run($input);
            assert!(matches!(result, Err($pattern)), "{:?}", result);
        }
    };
}
