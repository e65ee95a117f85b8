//! Scripts calling host functions through the foreign-call bridge.

use core::ffi::{CStr, c_char, c_void};
use std::sync::Mutex;

use indoc::indoc;
use once_cell::sync::Lazy;
use pretty_assertions::assert_eq;
use sable_core::api::{Engine, EngineOptions, Error};
use sable_core::types::NativeKind;
use sable_core::vm::{ForeignCallBridge, NativeArg, Value};

#[derive(Debug, Clone, PartialEq)]
struct Record {
    code: i32,
    ratio: f64,
    label: String,
}

static RECORDS: Lazy<Mutex<Vec<Record>>> = Lazy::new(|| Mutex::new(Vec::new()));
static TOTALS: Lazy<Mutex<Vec<(i8, i16, i64, f32)>>> = Lazy::new(|| Mutex::new(Vec::new()));

extern "C" fn record(code: i32, ratio: f64, label: *const c_char) {
    let label = unsafe { CStr::from_ptr(label) }
        .to_string_lossy()
        .into_owned();
    RECORDS.lock().unwrap().push(Record { code, ratio, label });
}

extern "C" fn total(flag: i8, small: i16, wide: i64, single: f32) {
    TOTALS.lock().unwrap().push((flag, small, wide, single));
}

fn engine() -> Engine {
    Engine::new(EngineOptions::default(), |env| unsafe {
        env.register_native("record", record as *const c_void);
        env.register_native("total", total as *const c_void);
    })
}

#[test]
fn test_script_calls_native_in_a_loop() {
    let source = indoc! {r#"
        extern fn record(code: i32, ratio: f64, label: string)
        let i = 0
        while i < 3 {
            record(i * 10, 0.25, "tick")
            i += 1
        }
        return i
    "#};
    let program = engine().compile(source).unwrap();
    assert_eq!(program.run().unwrap(), Some(Value::from_int(3)));

    let ticks: Vec<_> = RECORDS
        .lock()
        .unwrap()
        .iter()
        .filter(|r| r.label == "tick")
        .map(|r| (r.code, r.ratio))
        .collect();
    assert_eq!(ticks, vec![(0, 0.25), (10, 0.25), (20, 0.25)]);
}

#[test]
fn test_mixed_widths_are_narrowed_at_the_boundary() {
    let source = indoc! {"
        extern fn total(flag: bool, small: i16, wide: int, single: f32)
        fn go(x: int) {
            total(x > 0, x, x * 1000000, 0.5)
        }
        go(7)
    "};
    let program = engine().compile(source).unwrap();
    assert_eq!(program.run().unwrap(), None);
    assert_eq!(*TOTALS.lock().unwrap(), vec![(1, 7, 7_000_000, 0.5)]);
}

#[test]
fn test_extern_signature_errors() {
    let engine = engine();
    let cases = [
        ("extern fn nope(x: int)", "E008"),
        ("extern fn record(x: int): int", "E009"),
        ("extern fn record(code: i32, ratio: f64, label: string)\nrecord(1, 2.0)", "E010"),
        ("extern fn record(code: i32, ratio: f64, label: string)\nrecord(1.0, 2.0, \"x\")", "E005"),
    ];
    for (source, code) in cases {
        let Err(Error::Compilation { diagnostics, .. }) = engine.compile(source) else {
            panic!("expected a compilation error for {source:?}");
        };
        assert_eq!(diagnostics[0].code.as_deref(), Some(code), "{source}");
    }
}

#[test]
fn test_bridge_used_directly() {
    let label = c"direct";
    let mut bridge = ForeignCallBridge::new();
    bridge.push(NativeArg::from_value(NativeKind::I32, Value::from_int(-5)));
    bridge.push(NativeArg::from_value(NativeKind::F64, Value::from_float(1.25)));
    bridge.push(NativeArg::from_value(
        NativeKind::Pointer,
        Value::from_ptr(label.as_ptr()),
    ));
    assert!(!bridge.is_idle());
    unsafe { bridge.invoke(record as *const c_void) };
    assert!(bridge.is_idle());

    let records = RECORDS.lock().unwrap();
    assert!(records.contains(&Record {
        code: -5,
        ratio: 1.25,
        label: "direct".to_owned(),
    }));
}
