mod cases;

use indoc::indoc;
use pretty_assertions::assert_eq;
use sable::{Error, Severity, render_error_to_string_no_color};

test_case!(
    unterminated_string,
    input: "let s = \"abc",
    error: "E001",
);

test_case!(
    unexpected_token,
    input: "let = 3",
    error: "E002",
);

test_case!(
    undefined_variable,
    input: "return missing + 1",
    error: "E003",
);

test_case!(
    unknown_type,
    input: "fn f(x: quaternion) { }",
    error: "E006",
);

test_case!(
    invalid_assignment_target,
    input: "let a = 1\na + 1 = 2",
    error: "E012",
);

#[test]
fn test_compilation_stops_at_first_error() {
    let source = indoc! {"
        let a = 1
        let b = a + nope
        let c = also_nope
    "};
    let Err(Error::Compilation { diagnostics, .. }) = cases::engine().compile(source) else {
        panic!("expected a compilation error");
    };
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].span.str_of(source), "nope");
}

#[test]
fn test_rendered_error_points_at_source() {
    let source = "let total = 1\nreturn total + 2.5";
    let err = cases::engine().compile(source).err().unwrap();
    let rendered = render_error_to_string_no_color(&err);
    assert!(rendered.contains("E005"), "{rendered}");
    assert!(rendered.contains("return total + 2.5"), "{rendered}");
}

#[test]
fn test_redeclaration_warning_keeps_program_usable() {
    let program = cases::engine()
        .compile("let n = 1\nlet n = n + 1\nreturn n")
        .unwrap();
    let warning = &program.warnings()[0];
    assert_eq!(warning.severity, Severity::Warning);
    assert_eq!(warning.related.len(), 1);
    assert_eq!(program.run().unwrap().map(|v| v.as_int()), Some(2));
}
