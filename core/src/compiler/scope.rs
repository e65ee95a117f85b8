//! Per-function compile state: lexical scopes and the slot allocator.

use hashbrown::HashMap;

use crate::{Span, types::Type, vm::UnitId};

use super::{
    emitter::{Emitter, PendingJump},
    error::CompileErrorKind,
};

/// Register index within one function's window.
pub type Slot = u8;

/// A named binding: where it lives and how its cell is interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub slot: Slot,
    pub ty: Type,
    pub span: Span,
}

#[derive(Debug, Default)]
struct Scope {
    names: HashMap<String, Variable>,
    /// Every slot bound in this scope, shadowed ones included, in binding order.
    owned: Vec<Slot>,
}

/// Branches out of one `while` or `loop`, patched to its exit.
#[derive(Debug, Default)]
pub struct LoopContext {
    pub breaks: Vec<PendingJump>,
}

/// Compile-time state of one function being compiled.
///
/// Frames nest the way function declarations do. The parser keeps the
/// enclosing frame aside while a nested body is compiled.
pub struct Frame {
    pub name: String,
    pub unit: UnitId,
    pub params: Vec<String>,
    pub return_type: Type,
    /// Whether `return` values are checked against `return_type`. The top
    /// level unit is unchecked and adopts the type of its first `return`.
    pub checked_return: bool,
    pub emitter: Emitter,
    pub loops: Vec<LoopContext>,
    scopes: Vec<Scope>,
    free: Vec<Slot>,
    stack_size: usize,
    max_slots: usize,
}

impl Frame {
    pub fn new(name: String, unit: UnitId, max_slots: usize, max_constants: usize) -> Self {
        Frame {
            name,
            unit,
            params: Vec::new(),
            return_type: Type::Void,
            checked_return: true,
            emitter: Emitter::new(max_constants),
            loops: Vec::new(),
            scopes: vec![Scope::default()],
            free: Vec::new(),
            stack_size: 0,
            max_slots: max_slots.min(Slot::MAX as usize + 1),
        }
    }

    /// High-water mark of simultaneously allocated slots. Never shrinks.
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Takes the most recently released slot, or extends the window by one.
    pub fn allocate(&mut self) -> Result<Slot, CompileErrorKind> {
        if let Some(slot) = self.free.pop() {
            return Ok(slot);
        }
        if self.stack_size >= self.max_slots {
            return Err(CompileErrorKind::TooManySlots {
                limit: self.max_slots,
            });
        }
        let slot = self.stack_size as Slot;
        self.stack_size += 1;
        Ok(slot)
    }

    pub fn release(&mut self, slot: Slot) {
        debug_assert!(
            (slot as usize) < self.stack_size && !self.free.contains(&slot),
            "slot {slot} released twice or never allocated"
        );
        self.free.push(slot);
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Ends the innermost scope and returns its slots, latest binding first.
    pub fn pop_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1, "cannot pop the function scope");
        if let Some(scope) = self.scopes.pop() {
            for &slot in scope.owned.iter().rev() {
                self.release(slot);
            }
        }
    }

    /// Binds `name` to an already allocated `slot`, which from now on belongs
    /// to the innermost scope. Returns the binding it replaced when the name
    /// was already declared in that same scope.
    pub fn declare(&mut self, name: &str, slot: Slot, ty: Type, span: Span) -> Option<Variable> {
        let scope = self
            .scopes
            .last_mut()
            .expect("a frame always has its function scope");
        scope.owned.push(slot);
        scope
            .names
            .insert(name.to_owned(), Variable { slot, ty, span })
    }

    /// Innermost binding of `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<&Variable> {
        self.scopes.iter().rev().find_map(|scope| scope.names.get(name))
    }
}
