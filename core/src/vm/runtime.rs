use core::cmp::Ordering;

use smallvec::SmallVec;

use crate::{
    api::ExecutionOptions,
    types::NativeKind,
    vm::{
        Bytecode, ExecutionError, Instruction, Opcode, Program, ResourceExceededError,
        RuntimeError, UnitId, Value,
        ffi::{ForeignCallBridge, NativeArg},
    },
};

/// Result of the last comparison. Only the jump that immediately follows a
/// compare may read it; conditional jumps reset it to `Undefined`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flag {
    #[default]
    Undefined,
    Less,
    Equal,
    Greater,
}

impl From<Option<Ordering>> for Flag {
    fn from(ordering: Option<Ordering>) -> Self {
        match ordering {
            Some(Ordering::Less) => Flag::Less,
            Some(Ordering::Equal) => Flag::Equal,
            Some(Ordering::Greater) => Flag::Greater,
            None => Flag::Undefined,
        }
    }
}

/// Caller state saved by `call` and restored by `ret`/`retv`.
#[derive(Debug, Clone, Copy)]
struct CallFrame {
    unit: UnitId,
    return_ip: usize,
    base: usize,
    result_slot: usize,
}

/// Register virtual machine.
///
/// All active calls share one fixed-size register file. Each call sees a
/// window of `stack_size` cells starting at its base; a callee's window opens
/// directly above its caller's and is released on return.
pub struct Vm<'p> {
    program: &'p Program,
    max_call_depth: usize,
    registers: Vec<Value>,
    base: usize,
    ip: usize,
    flag: Flag,
    frames: Vec<CallFrame>,
    params: SmallVec<[Value; 8]>,
    bridge: ForeignCallBridge,
}

impl<'p> Vm<'p> {
    pub fn new(program: &'p Program, options: &ExecutionOptions) -> Self {
        Vm {
            program,
            max_call_depth: options.max_call_depth,
            registers: vec![Value::ZERO; options.register_capacity],
            base: 0,
            ip: 0,
            flag: Flag::Undefined,
            frames: Vec::new(),
            params: SmallVec::new(),
            bridge: ForeignCallBridge::new(),
        }
    }

    /// Runs the program's entry unit.
    pub fn run(&mut self) -> Result<Option<Value>, ExecutionError> {
        self.call(self.program.entry(), &[])
    }

    /// Invokes one unit with `args` in its first slots and runs it to
    /// completion. Returns the value of `retv`, or `None` for a plain `ret`.
    pub fn call(&mut self, id: UnitId, args: &[Value]) -> Result<Option<Value>, ExecutionError> {
        let program = self.program;
        let unit = program.unit(id);
        if args.len() != unit.params.len() {
            return Err(RuntimeError::ArgumentCountMismatch {
                unit: unit.name.clone(),
                expected: unit.params.len(),
                got: args.len(),
            }
            .into());
        }

        self.frames.clear();
        self.params.clear();
        self.bridge = ForeignCallBridge::new();
        self.flag = Flag::Undefined;
        self.open_window(0, unit, args)?;
        self.ip = 0;

        tracing::debug!(unit = %unit.name, argc = args.len(), "vm run");
        let result = self.execute(id);
        if let Err(err) = &result {
            tracing::debug!(error = %err, "vm run failed");
            self.frames.clear();
            self.base = 0;
        }
        result
    }

    /// Current window base. Back at zero once the outermost call returns.
    pub fn stack_pointer(&self) -> usize {
        self.base
    }

    pub fn flag(&self) -> Flag {
        self.flag
    }

    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    fn open_window(
        &mut self,
        base: usize,
        unit: &Bytecode,
        args: &[Value],
    ) -> Result<(), ExecutionError> {
        let required = base + unit.stack_size.max(args.len());
        if required > self.registers.len() {
            return Err(ResourceExceededError::StackOverflow {
                required,
                capacity: self.registers.len(),
            }
            .into());
        }
        let window = &mut self.registers[base..required];
        window.fill(Value::ZERO);
        window[..args.len()].copy_from_slice(args);
        self.base = base;
        Ok(())
    }

    #[inline]
    fn reg(&self, index: usize) -> Value {
        self.registers[self.base + index]
    }

    #[inline]
    fn set(&mut self, index: usize, value: Value) {
        self.registers[self.base + index] = value;
    }

    #[inline]
    fn int_binop(&mut self, instr: Instruction, op: impl FnOnce(i64, i64) -> i64) {
        let result = op(self.reg(instr.b()).as_int(), self.reg(instr.c()).as_int());
        self.set(instr.a(), Value::from_int(result));
    }

    #[inline]
    fn float_binop(&mut self, instr: Instruction, op: impl FnOnce(f64, f64) -> f64) {
        let result = op(
            self.reg(instr.b()).as_float(),
            self.reg(instr.c()).as_float(),
        );
        self.set(instr.a(), Value::from_float(result));
    }

    /// Reads and clears the flag, then jumps if `taken` holds.
    #[inline]
    fn branch_if(&mut self, instr: Instruction, taken: impl FnOnce(Flag) -> bool) {
        let flag = core::mem::take(&mut self.flag);
        if taken(flag) {
            self.ip = instr.sax_field() as usize;
        }
    }

    fn ensure_bridge_idle(&self, unit: &Bytecode, ip: usize) -> Result<(), RuntimeError> {
        if self.bridge.is_idle() {
            Ok(())
        } else {
            Err(RuntimeError::ForeignCallInProgress {
                unit: unit.name.clone(),
                ip,
                staged: self.bridge.staged().len(),
            })
        }
    }

    fn execute(&mut self, entry: UnitId) -> Result<Option<Value>, ExecutionError> {
        let program = self.program;
        let mut current = entry;
        let mut unit = program.unit(current);

        loop {
            let ip = self.ip;
            let Some(&instr) = unit.instructions.get(ip) else {
                return Err(RuntimeError::InstructionOutOfRange {
                    unit: unit.name.clone(),
                    ip,
                }
                .into());
            };
            self.ip += 1;

            let op = instr
                .opcode()
                .map_err(|err| RuntimeError::IllegalInstruction {
                    opcode: err.0,
                    unit: unit.name.clone(),
                    ip,
                })?;
            tracing::trace!(unit = %unit.name, ip, ?instr, "dispatch");

            use Opcode::*;
            match op {
                Nop => {}
                Move => self.set(instr.a(), self.reg(instr.b())),
                LoadInt => self.set(instr.a(), Value::from_int(instr.sbx() as i64)),
                LoadConst => self.set(instr.a(), unit.constants[instr.bx()]),
                LoadNative => {
                    let native = &program.natives()[instr.bx()];
                    self.set(instr.a(), Value::from_ptr(native.address));
                }

                IAdd => self.int_binop(instr, i64::wrapping_add),
                ISub => self.int_binop(instr, i64::wrapping_sub),
                IMul => self.int_binop(instr, i64::wrapping_mul),
                IDiv | IMod => {
                    let lhs = self.reg(instr.b()).as_int();
                    let rhs = self.reg(instr.c()).as_int();
                    if rhs == 0 {
                        return Err(RuntimeError::DivisionByZero {
                            unit: unit.name.clone(),
                            ip,
                        }
                        .into());
                    }
                    let result = if op == IDiv {
                        lhs.wrapping_div(rhs)
                    } else {
                        lhs.wrapping_rem(rhs)
                    };
                    self.set(instr.a(), Value::from_int(result));
                }
                IAnd => self.int_binop(instr, |a, b| a & b),
                IOr => self.int_binop(instr, |a, b| a | b),
                IXor => self.int_binop(instr, |a, b| a ^ b),
                IShl => self.int_binop(instr, |a, b| a.wrapping_shl(b as u32)),
                IShr => self.int_binop(instr, |a, b| a.wrapping_shr(b as u32)),
                INeg => {
                    let value = self.reg(instr.b()).as_int();
                    self.set(instr.a(), Value::from_int(value.wrapping_neg()));
                }
                IBNot => {
                    let value = self.reg(instr.b()).as_int();
                    self.set(instr.a(), Value::from_int(!value));
                }
                Not => {
                    let value = self.reg(instr.b()).as_int();
                    self.set(instr.a(), Value::from_bool(value == 0));
                }

                FAdd => self.float_binop(instr, |a, b| a + b),
                FSub => self.float_binop(instr, |a, b| a - b),
                FMul => self.float_binop(instr, |a, b| a * b),
                FDiv => self.float_binop(instr, |a, b| a / b),
                FNeg => {
                    let value = self.reg(instr.b()).as_float();
                    self.set(instr.a(), Value::from_float(-value));
                }

                ICmp => {
                    let lhs = self.reg(instr.a()).as_int();
                    let rhs = self.reg(instr.b()).as_int();
                    self.flag = Flag::from(lhs.partial_cmp(&rhs));
                }
                FCmp => {
                    let lhs = self.reg(instr.a()).as_float();
                    let rhs = self.reg(instr.b()).as_float();
                    self.flag = Flag::from(lhs.partial_cmp(&rhs));
                }
                Test => {
                    let value = self.reg(instr.a()).as_int();
                    self.flag = Flag::from(value.partial_cmp(&0));
                }

                Jmp => self.ip = instr.sax_field() as usize,
                Je => self.branch_if(instr, |f| f == Flag::Equal),
                Jne => self.branch_if(instr, |f| f != Flag::Equal),
                Jlt => self.branch_if(instr, |f| f == Flag::Less),
                Jle => self.branch_if(instr, |f| matches!(f, Flag::Less | Flag::Equal)),
                Jgt => self.branch_if(instr, |f| f == Flag::Greater),
                Jge => self.branch_if(instr, |f| matches!(f, Flag::Greater | Flag::Equal)),

                Param => {
                    let value = self.reg(instr.a());
                    self.params.push(value);
                }
                Call => {
                    self.ensure_bridge_idle(unit, ip)?;
                    let callee_id = UnitId(instr.bx() as u16);
                    let callee = program.unit(callee_id);
                    let args = core::mem::take(&mut self.params);
                    if args.len() != callee.params.len() {
                        return Err(RuntimeError::ArgumentCountMismatch {
                            unit: callee.name.clone(),
                            expected: callee.params.len(),
                            got: args.len(),
                        }
                        .into());
                    }
                    if self.frames.len() >= self.max_call_depth {
                        return Err(ResourceExceededError::CallDepthExceeded {
                            depth: self.frames.len() + 1,
                            max_depth: self.max_call_depth,
                        }
                        .into());
                    }

                    let frame = CallFrame {
                        unit: current,
                        return_ip: self.ip,
                        base: self.base,
                        result_slot: instr.a(),
                    };
                    self.open_window(self.base + unit.stack_size, callee, &args)?;
                    self.frames.push(frame);
                    current = callee_id;
                    unit = callee;
                    self.ip = 0;
                }
                Return | ReturnValue => {
                    self.ensure_bridge_idle(unit, ip)?;
                    let result = (op == ReturnValue).then(|| self.reg(instr.a()));
                    let Some(frame) = self.frames.pop() else {
                        self.base = 0;
                        return Ok(result);
                    };
                    self.base = frame.base;
                    self.ip = frame.return_ip;
                    current = frame.unit;
                    unit = program.unit(current);
                    if let Some(value) = result {
                        self.set(frame.result_slot, value);
                    }
                }

                XPushI8 => self.push_native(NativeKind::I8, instr),
                XPushI16 => self.push_native(NativeKind::I16, instr),
                XPushI32 => self.push_native(NativeKind::I32, instr),
                XPushI64 => self.push_native(NativeKind::I64, instr),
                XPushF32 => self.push_native(NativeKind::F32, instr),
                XPushF64 => self.push_native(NativeKind::F64, instr),
                XPushPtr => self.push_native(NativeKind::Pointer, instr),
                XCallVoid => {
                    let function = self.reg(instr.a()).as_ptr();
                    if function.is_null() {
                        self.bridge = ForeignCallBridge::new();
                        return Err(RuntimeError::NullNativePointer {
                            unit: unit.name.clone(),
                            ip,
                        }
                        .into());
                    }
                    // SAFETY: native addresses come from `register_native`, whose
                    // caller vouched for the signature the compiler checked the
                    // staged kinds against.
                    unsafe { self.bridge.invoke(function) };
                }
            }
        }
    }

    #[inline]
    fn push_native(&mut self, kind: NativeKind, instr: Instruction) {
        let value = self.reg(instr.a());
        self.bridge.push(NativeArg::from_value(kind, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Type, TypeTable};
    use crate::vm::NativeSymbol;
    use Opcode::*;

    fn unit(name: &str, params: usize, stack_size: usize, code: Vec<Instruction>) -> Bytecode {
        Bytecode {
            name: name.into(),
            params: (0..params).map(|i| format!("p{i}")).collect(),
            return_type: Type::INT,
            stack_size,
            instructions: code,
            constants: vec![],
        }
    }

    fn program(units: Vec<Bytecode>) -> Program {
        Program {
            units,
            entry: UnitId(0),
            natives: vec![],
            types: TypeTable::new(),
            strings: vec![],
        }
    }

    fn run(program: &Program) -> Result<Option<Value>, ExecutionError> {
        Vm::new(program, &ExecutionOptions::default()).run()
    }

    #[test]
    fn test_arithmetic_wraps() {
        let p = program(vec![Bytecode {
            constants: vec![Value::from_int(i64::MAX)],
            ..unit(
                "main",
                0,
                2,
                vec![
                    Instruction::abx(LoadConst, 0, 0),
                    Instruction::asbx(LoadInt, 1, 1),
                    Instruction::abc(IAdd, 0, 0, 1),
                    Instruction::abc(ReturnValue, 0, 0, 0),
                ],
            )
        }]);
        assert_eq!(run(&p).unwrap().unwrap().as_int(), i64::MIN);
    }

    #[test]
    fn test_division_by_zero_is_recoverable() {
        let p = program(vec![unit(
            "main",
            0,
            2,
            vec![
                Instruction::asbx(LoadInt, 0, 7),
                Instruction::asbx(LoadInt, 1, 0),
                Instruction::abc(IMod, 0, 0, 1),
                Instruction::abc(ReturnValue, 0, 0, 0),
            ],
        )]);
        let mut vm = Vm::new(&p, &ExecutionOptions::default());
        assert_eq!(
            vm.run(),
            Err(ExecutionError::Runtime(RuntimeError::DivisionByZero {
                unit: "main".into(),
                ip: 2
            }))
        );
        // The VM stays usable after a runtime error.
        assert_eq!(vm.stack_pointer(), 0);
        assert!(matches!(vm.run(), Err(ExecutionError::Runtime(_))));
    }

    #[test]
    fn test_nan_compare_only_takes_jne() {
        let p = program(vec![Bytecode {
            constants: vec![Value::from_float(f64::NAN)],
            ..unit(
                "main",
                0,
                2,
                vec![
                    Instruction::abx(LoadConst, 0, 0),
                    Instruction::abc(FCmp, 0, 0, 0),
                    Instruction::sax(Jle, 6),
                    Instruction::abc(FCmp, 0, 0, 0),
                    Instruction::sax(Jne, 8),
                    Instruction::abc(Return, 0, 0, 0),
                    Instruction::asbx(LoadInt, 1, 1),
                    Instruction::abc(ReturnValue, 1, 0, 0),
                    Instruction::asbx(LoadInt, 1, 2),
                    Instruction::abc(ReturnValue, 1, 0, 0),
                ],
            )
        }]);
        assert_eq!(run(&p).unwrap().unwrap().as_int(), 2);
    }

    #[test]
    fn test_illegal_opcode() {
        let p = program(vec![unit(
            "main",
            0,
            0,
            vec![Instruction::from_bits(0xEE)],
        )]);
        assert_eq!(
            run(&p),
            Err(ExecutionError::Runtime(RuntimeError::IllegalInstruction {
                opcode: 0xEE,
                unit: "main".into(),
                ip: 0
            }))
        );
    }

    // fact(n) = n <= 1 ? 1 : n * fact(n - 1)
    fn factorial() -> Program {
        program(vec![
            unit(
                "main",
                0,
                1,
                vec![
                    Instruction::asbx(LoadInt, 0, 10),
                    Instruction::abc(Param, 0, 0, 0),
                    Instruction::abx(Call, 0, 1),
                    Instruction::abc(ReturnValue, 0, 0, 0),
                ],
            ),
            unit(
                "fact",
                1,
                3,
                vec![
                    Instruction::asbx(LoadInt, 1, 1),
                    Instruction::abc(ICmp, 0, 1, 0),
                    Instruction::sax(Jgt, 4),
                    Instruction::abc(ReturnValue, 1, 0, 0),
                    Instruction::abc(ISub, 2, 0, 1),
                    Instruction::abc(Param, 2, 0, 0),
                    Instruction::abx(Call, 2, 1),
                    Instruction::abc(IMul, 2, 0, 2),
                    Instruction::abc(ReturnValue, 2, 0, 0),
                ],
            ),
        ])
    }

    #[test]
    fn test_recursive_call_frames() {
        crate::test_utils::init_test_logging();
        let p = factorial();
        let mut vm = Vm::new(&p, &ExecutionOptions::default());
        assert_eq!(vm.run().unwrap().unwrap().as_int(), 3_628_800);
        assert_eq!(vm.stack_pointer(), 0);
        assert_eq!(vm.call_depth(), 0);

        let fact = p.find("fact").unwrap();
        assert_eq!(
            vm.call(fact, &[Value::from_int(5)]).unwrap().unwrap().as_int(),
            120
        );
    }

    #[test]
    fn test_register_capacity_overflow() {
        let p = factorial();
        let options = ExecutionOptions {
            register_capacity: 12,
            ..Default::default()
        };
        assert_eq!(
            Vm::new(&p, &options).run(),
            Err(ExecutionError::ResourceExceeded(
                ResourceExceededError::StackOverflow {
                    required: 13,
                    capacity: 12
                }
            ))
        );
    }

    #[test]
    fn test_call_depth_limit() {
        let p = factorial();
        let options = ExecutionOptions {
            max_call_depth: 4,
            ..Default::default()
        };
        assert_eq!(
            Vm::new(&p, &options).run(),
            Err(ExecutionError::ResourceExceeded(
                ResourceExceededError::CallDepthExceeded {
                    depth: 5,
                    max_depth: 4
                }
            ))
        );
    }

    #[test]
    fn test_argument_count_checked() {
        let p = factorial();
        let mut vm = Vm::new(&p, &ExecutionOptions::default());
        assert!(matches!(
            vm.call(UnitId(1), &[]),
            Err(ExecutionError::Runtime(
                RuntimeError::ArgumentCountMismatch { expected: 1, got: 0, .. }
            ))
        ));
    }

    #[test]
    fn test_null_native_pointer() {
        let mut p = program(vec![unit(
            "main",
            0,
            1,
            vec![
                Instruction::abx(LoadNative, 0, 0),
                Instruction::abc(XPushI64, 0, 0, 0),
                Instruction::abc(XCallVoid, 0, 0, 0),
                Instruction::abc(Return, 0, 0, 0),
            ],
        )]);
        p.natives.push(NativeSymbol {
            name: "nothing".into(),
            address: core::ptr::null(),
        });
        assert!(matches!(
            run(&p),
            Err(ExecutionError::Runtime(RuntimeError::NullNativePointer { ip: 2, .. }))
        ));
    }

    #[test]
    fn test_return_with_staged_native_args() {
        let p = program(vec![unit(
            "main",
            0,
            1,
            vec![
                Instruction::abc(XPushI32, 0, 0, 0),
                Instruction::abc(Return, 0, 0, 0),
            ],
        )]);
        assert!(matches!(
            run(&p),
            Err(ExecutionError::Runtime(RuntimeError::ForeignCallInProgress { staged: 1, .. }))
        ));
    }
}
