//! Host functions made visible to scripts.

use core::ffi::c_void;

use crate::vm::NativeSymbol;

/// Native functions a script may bind with `extern fn`.
///
/// Registration only records a name and an address. The signature is given
/// by the script's `extern fn` declaration, which the compiler checks against
/// the names registered here.
///
/// # Example
///
/// ```
/// use sable_core::api::{Engine, EngineOptions};
///
/// extern "C" fn ping(_code: i32) {}
///
/// let engine = Engine::new(EngineOptions::default(), |env| unsafe {
///     env.register_native("ping", ping as *const core::ffi::c_void);
/// });
/// assert_eq!(engine.environment().natives().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Environment {
    natives: Vec<NativeSymbol>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `address` under `name`. A later registration of the same
    /// name replaces the earlier one.
    ///
    /// # Safety
    ///
    /// `address` must point to an `extern "C"` function returning nothing,
    /// and every script declaring `name` must describe its parameters
    /// exactly. The function must stay valid for as long as any program
    /// compiled against this environment can run.
    pub unsafe fn register_native(&mut self, name: &str, address: *const c_void) {
        tracing::debug!(name, ?address, "registering native function");
        match self.natives.iter_mut().find(|native| native.name == name) {
            Some(existing) => existing.address = address,
            None => self.natives.push(NativeSymbol {
                name: name.to_owned(),
                address,
            }),
        }
    }

    pub fn natives(&self) -> &[NativeSymbol] {
        &self.natives
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reregistration_replaces_address() {
        let mut env = Environment::new();
        let first = 0x1000 as *const c_void;
        let second = 0x2000 as *const c_void;
        unsafe {
            env.register_native("f", first);
            env.register_native("g", first);
            env.register_native("f", second);
        }
        let natives: Vec<_> = env
            .natives()
            .iter()
            .map(|n| (n.name.as_str(), n.address))
            .collect();
        assert_eq!(natives, vec![("f", second), ("g", first)]);
    }
}
