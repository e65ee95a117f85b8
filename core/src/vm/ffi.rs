//! Foreign-call bridge.
//!
//! A call site stages its arguments one typed push at a time; `xcallv` then
//! consumes the whole ordered list at once. The libffi call interface is built
//! from the staged kinds at invoke time and dropped right after the call, so
//! nothing from one native call leaks into the next.

use core::ffi::c_void;

use libffi::middle::{Arg, Cif, CodePtr, Type as FfiType};
use smallvec::SmallVec;

use crate::{types::NativeKind, vm::Value};

/// One marshalled argument: the declared kind together with the narrowed value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NativeArg {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Pointer(*mut c_void),
}

impl NativeArg {
    /// Narrows a register cell to the declared kind. Integers truncate, floats
    /// round to nearest like a C cast.
    pub fn from_value(kind: NativeKind, value: Value) -> Self {
        match kind {
            NativeKind::I8 => NativeArg::I8(value.as_int() as i8),
            NativeKind::I16 => NativeArg::I16(value.as_int() as i16),
            NativeKind::I32 => NativeArg::I32(value.as_int() as i32),
            NativeKind::I64 => NativeArg::I64(value.as_int()),
            NativeKind::F32 => NativeArg::F32(value.as_float() as f32),
            NativeKind::F64 => NativeArg::F64(value.as_float()),
            NativeKind::Pointer => NativeArg::Pointer(value.as_ptr()),
        }
    }

    pub fn kind(&self) -> NativeKind {
        match self {
            NativeArg::I8(_) => NativeKind::I8,
            NativeArg::I16(_) => NativeKind::I16,
            NativeArg::I32(_) => NativeKind::I32,
            NativeArg::I64(_) => NativeKind::I64,
            NativeArg::F32(_) => NativeKind::F32,
            NativeArg::F64(_) => NativeKind::F64,
            NativeArg::Pointer(_) => NativeKind::Pointer,
        }
    }

    fn ffi_type(&self) -> FfiType {
        match self {
            NativeArg::I8(_) => FfiType::i8(),
            NativeArg::I16(_) => FfiType::i16(),
            NativeArg::I32(_) => FfiType::i32(),
            NativeArg::I64(_) => FfiType::i64(),
            NativeArg::F32(_) => FfiType::f32(),
            NativeArg::F64(_) => FfiType::f64(),
            NativeArg::Pointer(_) => FfiType::pointer(),
        }
    }

    fn as_ffi_arg(&self) -> Arg {
        match self {
            NativeArg::I8(v) => Arg::new(v),
            NativeArg::I16(v) => Arg::new(v),
            NativeArg::I32(v) => Arg::new(v),
            NativeArg::I64(v) => Arg::new(v),
            NativeArg::F32(v) => Arg::new(v),
            NativeArg::F64(v) => Arg::new(v),
            NativeArg::Pointer(v) => Arg::new(v),
        }
    }
}

/// The VM's single native call-construction context.
///
/// Only `&mut` access is offered, so a second call cannot be built while one
/// is being staged or invoked.
#[derive(Debug, Default)]
pub struct ForeignCallBridge {
    staged: SmallVec<[NativeArg; 8]>,
}

impl ForeignCallBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, arg: NativeArg) {
        self.staged.push(arg);
    }

    pub fn staged(&self) -> &[NativeArg] {
        &self.staged
    }

    pub fn is_idle(&self) -> bool {
        self.staged.is_empty()
    }

    /// Calls `function` with the staged arguments, discarding any result.
    ///
    /// The staged list is emptied whether or not the call happens.
    ///
    /// # Safety
    ///
    /// `function` must point to an `extern "C"` function returning `void`
    /// whose parameters match the staged kinds in order, and pointer
    /// arguments must be valid for whatever the function does with them.
    pub unsafe fn invoke(&mut self, function: *const c_void) {
        let args = core::mem::take(&mut self.staged);
        let cif = Cif::new(args.iter().map(NativeArg::ffi_type), FfiType::void());
        let ffi_args: SmallVec<[Arg; 8]> = args.iter().map(NativeArg::as_ffi_arg).collect();
        tracing::debug!(?function, argc = args.len(), "native call");
        // SAFETY: upheld by the caller, see above.
        unsafe { cif.call::<()>(CodePtr::from_ptr(function), &ffi_args) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static SEEN: Mutex<Vec<(i16, f32, u64)>> = Mutex::new(Vec::new());

    extern "C" fn record(a: i16, b: f32, c: u64) {
        SEEN.lock().unwrap().push((a, b, c));
    }

    #[test]
    fn test_from_value_narrows() {
        assert_eq!(
            NativeArg::from_value(NativeKind::I8, Value::from_int(0x1FF)),
            NativeArg::I8(-1)
        );
        assert_eq!(
            NativeArg::from_value(NativeKind::F32, Value::from_float(0.5)),
            NativeArg::F32(0.5)
        );
        assert_eq!(NativeArg::I32(3).kind(), NativeKind::I32);
    }

    #[test]
    fn test_invoke_resets_staging() {
        let mut bridge = ForeignCallBridge::new();
        bridge.push(NativeArg::I16(-3));
        bridge.push(NativeArg::F32(2.5));
        bridge.push(NativeArg::I64(1 << 40));
        assert_eq!(bridge.staged().len(), 3);

        unsafe { bridge.invoke(record as *const c_void) };

        assert!(bridge.is_idle());
        assert_eq!(SEEN.lock().unwrap().as_slice(), &[(-3, 2.5, 1 << 40)]);
    }
}
