//! Instruction emitter for one bytecode unit.
//!
//! Builders come in two layers: one per operand shape (`abc`, `abx`, `asbx`,
//! `sax`) and one per opcode family on top of them. Every builder returns the
//! index of the instruction it appended.
//!
//! Forward branches are emitted with a placeholder target and handed back as
//! a [`PendingJump`]. The only way to get rid of one is [`Emitter::patch`],
//! which rewrites the target field alone; `finalize` refuses a unit that
//! still has branches outstanding.

use hashbrown::HashMap;

use crate::{
    types::{NativeKind, Type},
    vm::{Bytecode, Instruction, Opcode, Value},
};

use super::{error::CompileErrorKind, scope::Slot};

/// Largest absolute target the signed 24-bit branch field can hold.
const MAX_BRANCH_TARGET: usize = (1 << 23) - 1;

/// A forward branch whose target is not known yet.
#[must_use = "a pending jump must be patched before the unit is finalized"]
#[derive(Debug)]
pub struct PendingJump(usize);

impl PendingJump {
    /// Index of the branch instruction.
    pub fn index(&self) -> usize {
        self.0
    }
}

pub struct Emitter {
    instructions: Vec<Instruction>,
    constants: Vec<Value>,
    constant_index: HashMap<u64, u16>,
    max_constants: usize,
    pending: usize,
}

impl Emitter {
    pub fn new(max_constants: usize) -> Self {
        Self {
            instructions: Vec::new(),
            constants: Vec::new(),
            constant_index: HashMap::new(),
            max_constants: max_constants.min(u16::MAX as usize + 1),
            pending: 0,
        }
    }

    /// Index the next instruction will get.
    pub fn label(&self) -> usize {
        self.instructions.len()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Branches emitted but not patched yet.
    pub fn pending(&self) -> usize {
        self.pending
    }

    fn emit(&mut self, instruction: Instruction) -> usize {
        let index = self.instructions.len();
        self.instructions.push(instruction);
        index
    }

    // === Shape builders ===

    pub fn abc(&mut self, op: Opcode, a: Slot, b: Slot, c: Slot) -> usize {
        self.emit(Instruction::abc(op, a as u32, b as u32, c as u32))
    }

    pub fn abx(&mut self, op: Opcode, a: Slot, bx: u16) -> usize {
        self.emit(Instruction::abx(op, a as u32, bx as u32))
    }

    pub fn asbx(&mut self, op: Opcode, a: Slot, sbx: i16) -> usize {
        self.emit(Instruction::asbx(op, a as u32, sbx as i32))
    }

    /// Unsigned 24-bit operand. Wider values are truncated to the field.
    pub fn ax(&mut self, op: Opcode, ax: u32) -> usize {
        self.emit(Instruction::ax(op, ax))
    }

    pub fn sax(&mut self, op: Opcode, target: usize) -> Result<usize, CompileErrorKind> {
        if target > MAX_BRANCH_TARGET {
            return Err(CompileErrorKind::JumpTooFar { target });
        }
        Ok(self.emit(Instruction::sax(op, target as i32)))
    }

    // === Opcode builders ===

    pub fn mov(&mut self, dst: Slot, src: Slot) -> usize {
        self.abc(Opcode::Move, dst, src, 0)
    }

    pub fn load_int(&mut self, dst: Slot, value: i16) -> usize {
        self.asbx(Opcode::LoadInt, dst, value)
    }

    pub fn load_const(&mut self, dst: Slot, index: u16) -> usize {
        self.abx(Opcode::LoadConst, dst, index)
    }

    pub fn load_native(&mut self, dst: Slot, index: u16) -> usize {
        self.abx(Opcode::LoadNative, dst, index)
    }

    /// `dst = lhs <op> rhs` for the three-register arithmetic family.
    pub fn binary(&mut self, op: Opcode, dst: Slot, lhs: Slot, rhs: Slot) -> usize {
        debug_assert_eq!(op.shape(), crate::vm::Shape::ABC);
        self.abc(op, dst, lhs, rhs)
    }

    /// `dst = <op> src` for negation and the two nots.
    pub fn unary(&mut self, op: Opcode, dst: Slot, src: Slot) -> usize {
        self.abc(op, dst, src, 0)
    }

    /// Sets the flag from `lhs` compared with `rhs`.
    pub fn compare(&mut self, op: Opcode, lhs: Slot, rhs: Slot) -> usize {
        self.abc(op, lhs, rhs, 0)
    }

    /// Sets the flag from `slot` compared with zero.
    pub fn test(&mut self, slot: Slot) -> usize {
        self.abc(Opcode::Test, slot, 0, 0)
    }

    /// Emits a branch to a target that is already known (a backward jump).
    pub fn jump_to(&mut self, op: Opcode, target: usize) -> Result<usize, CompileErrorKind> {
        debug_assert!(op.is_branch());
        self.sax(op, target)
    }

    /// Emits a branch whose target will be patched later.
    pub fn jump(&mut self, op: Opcode) -> PendingJump {
        debug_assert!(op.is_branch());
        self.pending += 1;
        PendingJump(self.emit(Instruction::sax(op, 0)))
    }

    /// Points a pending branch at `target`, leaving its opcode untouched.
    pub fn patch(&mut self, jump: PendingJump, target: usize) -> Result<(), CompileErrorKind> {
        if target > MAX_BRANCH_TARGET {
            return Err(CompileErrorKind::JumpTooFar { target });
        }
        let slot = &mut self.instructions[jump.0];
        *slot = slot.with_sax(target as i32);
        self.pending -= 1;
        Ok(())
    }

    /// Points a pending branch at the next instruction to be emitted.
    pub fn patch_here(&mut self, jump: PendingJump) -> Result<(), CompileErrorKind> {
        let here = self.label();
        self.patch(jump, here)
    }

    pub fn param(&mut self, src: Slot) -> usize {
        self.abc(Opcode::Param, src, 0, 0)
    }

    pub fn call(&mut self, dst: Slot, unit: u16) -> usize {
        self.abx(Opcode::Call, dst, unit)
    }

    pub fn ret(&mut self) -> usize {
        self.abc(Opcode::Return, 0, 0, 0)
    }

    pub fn ret_value(&mut self, src: Slot) -> usize {
        self.abc(Opcode::ReturnValue, src, 0, 0)
    }

    /// Stages `src` as the next native argument, narrowed to `kind`.
    pub fn push_native(&mut self, kind: NativeKind, src: Slot) -> usize {
        let op = match kind {
            NativeKind::I8 => Opcode::XPushI8,
            NativeKind::I16 => Opcode::XPushI16,
            NativeKind::I32 => Opcode::XPushI32,
            NativeKind::I64 => Opcode::XPushI64,
            NativeKind::F32 => Opcode::XPushF32,
            NativeKind::F64 => Opcode::XPushF64,
            NativeKind::Pointer => Opcode::XPushPtr,
        };
        self.abc(op, src, 0, 0)
    }

    pub fn call_native_void(&mut self, function: Slot) -> usize {
        self.abc(Opcode::XCallVoid, function, 0, 0)
    }

    // === Constant pool ===

    /// Adds a constant to the pool, reusing an existing entry with the same bits.
    pub fn constant(&mut self, value: Value) -> Result<u16, CompileErrorKind> {
        if let Some(&index) = self.constant_index.get(&value.to_bits()) {
            return Ok(index);
        }
        if self.constants.len() >= self.max_constants {
            return Err(CompileErrorKind::TooManyConstants {
                limit: self.max_constants,
            });
        }
        let index = self.constants.len() as u16;
        self.constants.push(value);
        self.constant_index.insert(value.to_bits(), index);
        Ok(index)
    }

    /// Seals the unit.
    pub fn finalize(
        self,
        name: String,
        params: Vec<String>,
        return_type: Type,
        stack_size: usize,
    ) -> Result<Bytecode, CompileErrorKind> {
        if self.pending != 0 {
            return Err(CompileErrorKind::UnpatchedBranch {
                unit: name,
                pending: self.pending,
            });
        }
        Ok(Bytecode {
            name,
            params,
            return_type,
            stack_size,
            instructions: self.instructions,
            constants: self.constants,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_return_indices() {
        let mut e = Emitter::new(16);
        assert_eq!(e.load_int(0, 5), 0);
        assert_eq!(e.mov(1, 0), 1);
        assert_eq!(e.label(), 2);
    }

    #[test]
    fn test_shape_builders_truncate_to_field_width() {
        let mut e = Emitter::new(16);
        e.ax(Opcode::Nop, 0x12_3456);
        e.ax(Opcode::Nop, 0xAB_12_3456);
        e.asbx(Opcode::LoadInt, 3, -2);
        let code = e.instructions();
        assert_eq!(code[0].ax_field(), 0x12_3456);
        assert_eq!(code[1].ax_field(), 0x12_3456);
        assert_eq!(code[1].opcode(), Ok(Opcode::Nop));
        assert_eq!((code[2].a(), code[2].sbx()), (3, -2));
    }

    #[test]
    fn test_patch_rewrites_only_target() {
        let mut e = Emitter::new(16);
        e.test(0);
        let jump = e.jump(Opcode::Je);
        assert_eq!(jump.index(), 1);
        e.load_int(0, 1);
        e.patch_here(jump).unwrap();

        let instr = e.instructions()[1];
        assert_eq!(instr.opcode(), Ok(Opcode::Je));
        assert_eq!(instr.sax_field(), 3);
        assert_eq!(e.pending(), 0);
    }

    #[test]
    fn test_finalize_rejects_unpatched_branch() {
        let mut e = Emitter::new(16);
        let _forgotten = e.jump(Opcode::Jmp);
        e.ret();
        assert_eq!(
            e.finalize("main".into(), vec![], Type::Void, 0).err(),
            Some(CompileErrorKind::UnpatchedBranch {
                unit: "main".into(),
                pending: 1
            })
        );
    }

    #[test]
    fn test_branch_range() {
        let mut e = Emitter::new(16);
        assert_eq!(
            e.jump_to(Opcode::Jmp, 1 << 23),
            Err(CompileErrorKind::JumpTooFar { target: 1 << 23 })
        );
    }

    #[test]
    fn test_constants_are_deduplicated_and_bounded() {
        let mut e = Emitter::new(2);
        assert_eq!(e.constant(Value::from_int(1 << 40)), Ok(0));
        assert_eq!(e.constant(Value::from_float(0.5)), Ok(1));
        assert_eq!(e.constant(Value::from_int(1 << 40)), Ok(0));
        assert_eq!(
            e.constant(Value::from_int(7)),
            Err(CompileErrorKind::TooManyConstants { limit: 2 })
        );
    }
}
