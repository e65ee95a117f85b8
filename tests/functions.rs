mod cases;

use indoc::indoc;
use sable::{Error, ExecutionOptions, Value};

test_case!(
    recursion,
    input: indoc! {"
        fn gcd(a: int, b: int): int {
            if b == 0 { return a }
            return gcd(b, a % b)
        }
        return gcd(1071, 462)
    "},
    int: 21,
);

test_case!(
    calls_between_functions,
    input: indoc! {"
        fn square(x: float): float { return x * x }
        fn hyp2(a: float, b: float): float { return square(a) + square(b) }
        return hyp2(3.0, 4.0)
    "},
    float: 25.0,
);

test_case!(
    void_function,
    input: indoc! {"
        fn nothing(x: int) {
            if x > 0 { return }
        }
        nothing(1)
    "},
    void,
);

test_case!(
    arity_is_checked,
    input: "fn one(a: int): int { return a }\nreturn one(1, 2)",
    error: "E010",
);

test_case!(
    argument_types_are_checked,
    input: "fn one(a: int): int { return a }\nreturn one(1.0)",
    error: "E005",
);

test_case!(
    return_type_is_checked,
    input: "fn f(): int { return 1.5 }",
    error: "E005",
);

test_case!(
    missing_return_is_rejected,
    input: indoc! {"
        fn f(a: int): int {
            if a > 100 { return 1 }
        }
        return f(7)
    "},
    error: "E018",
);

test_case!(
    undefined_function,
    input: "return nope()",
    error: "E004",
);

test_case!(
    unbounded_recursion_is_stopped,
    input: "fn down(n: int): int { return down(n + 1) }\nreturn down(0)",
    fails: Error::ResourceExceeded(_),
);

#[test]
fn test_call_depth_limit_is_configurable() {
    let program = cases::engine()
        .compile(indoc! {"
            fn depth(n: int): int {
                if n == 0 { return 0 }
                return 1 + depth(n - 1)
            }
            return depth(50)
        "})
        .unwrap();

    assert_eq!(program.run().unwrap(), Some(Value::from_int(50)));
    let shallow = ExecutionOptions {
        max_call_depth: 10,
        ..Default::default()
    };
    assert!(matches!(
        program.run_with(&shallow),
        Err(Error::ResourceExceeded(_))
    ));
    assert_eq!(
        program.call("depth", &[Value::from_int(5)]).unwrap(),
        Some(Value::from_int(5))
    );
}

#[test]
fn test_call_by_name_uses_latest_declaration() {
    let program = cases::engine()
        .compile("fn f(): int { return 1 }\nfn f(): int { return 2 }\nreturn f()")
        .unwrap();

    assert_eq!(program.warnings()[0].code.as_deref(), Some("W002"));
    assert_eq!(program.run().unwrap(), Some(Value::from_int(2)));
    assert_eq!(program.call("f", &[]).unwrap(), Some(Value::from_int(2)));
}
