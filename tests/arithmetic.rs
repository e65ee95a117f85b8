mod cases;

use sable::Error;

test_case!(
    integer_precedence,
    input: "return 2 + 3 * 4 - 10 / 5",
    int: 12,
);

test_case!(
    parentheses,
    input: "return (2 + 3) * (4 - 10) / 5",
    int: -6,
);

test_case!(
    modulo_and_negation,
    input: "return -17 % 5",
    int: -2,
);

test_case!(
    bitwise_operators,
    input: "return ((240 | 15) & ~3) ^ ((1 << 4) >> 1)",
    int: 244,
);

test_case!(
    wrapping_overflow,
    input: "let big = 9223372036854775807\nreturn big + 1",
    int: i64::MIN,
);

test_case!(
    float_arithmetic,
    input: "let r = 2.0\nreturn 3.0 * r * r - 0.5",
    float: 11.5,
);

test_case!(
    compound_assignment,
    input: "let x = 10\nx += 5\nx -= 3\nx *= 2\nx /= 4\nx %= 4\nreturn x",
    int: 2,
);

test_case!(
    mixed_numeric_classes,
    input: "return 1 + 2.0",
    error: "E005",
);

test_case!(
    float_modulo_rejected,
    input: "return 5.0 % 2.0",
    error: "E005",
);

test_case!(
    division_by_zero,
    input: "let zero = 0\nreturn 10 / zero",
    fails: Error::Runtime(_),
);

test_case!(
    float_division_by_zero_is_infinite,
    input: "return 1.0 / 0.0",
    float: f64::INFINITY,
);
