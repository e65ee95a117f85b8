//! Sable VM Instructions - Fixed 32-bit Format
//!
//! # Instruction Format
//!
//! **ALL instructions are exactly 32 bits**. The low byte is the opcode; the
//! remaining 24 bits hold operands in one of five shapes:
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┐
//! │  opcode  │    A     │    B     │    C     │   ABC   three u8 fields
//! ├──────────┼──────────┼──────────┴──────────┤
//! │  opcode  │    A     │        Bx           │   ABx   u8 + u16
//! │  opcode  │    A     │        sBx          │   AsBx  u8 + i16
//! ├──────────┼──────────┴─────────────────────┤
//! │  opcode  │              Ax                │   Ax    u24
//! │  opcode  │              sAx               │   sAx   i24
//! └──────────┴────────────────────────────────┘
//! ```
//!
//! Operands are truncated to their field width when an instruction is built.
//! Keeping them in range is the caller's job (the emitter checks slot counts,
//! constant pool size and jump distance before building).
//!
//! Register operands (A, B, C) are offsets into the executing unit's register
//! window. Branch targets (sAx) are absolute instruction indices, never
//! relative offsets.

use core::fmt;

/// Operation code stored in the low byte of an [`Instruction`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ========================================================================
    // Moves & Constants (0x00 - 0x0F)
    // ========================================================================
    /// No operation
    Nop = 0x00,
    /// ABC: R[A] = R[B]
    Move = 0x01,
    /// AsBx: R[A] = sBx
    LoadInt = 0x02,
    /// ABx: R[A] = K[Bx] (unit constant pool)
    LoadConst = 0x03,
    /// ABx: R[A] = address of native symbol Bx
    LoadNative = 0x04,

    // ========================================================================
    // Integer Arithmetic (0x10 - 0x1F)
    // ========================================================================
    /// ABC: R[A] = R[B] + R[C] (wrapping)
    IAdd = 0x10,
    ISub = 0x11,
    IMul = 0x12,
    /// ABC: R[A] = R[B] / R[C] (truncating, can error)
    IDiv = 0x13,
    /// ABC: R[A] = R[B] % R[C] (can error)
    IMod = 0x14,
    IAnd = 0x15,
    IOr = 0x16,
    IXor = 0x17,
    IShl = 0x18,
    /// Arithmetic shift right
    IShr = 0x19,
    /// ABC: R[A] = -R[B]
    INeg = 0x1A,
    /// ABC: R[A] = !R[B] (bitwise)
    IBNot = 0x1B,
    /// ABC: R[A] = (R[B] == 0) as int
    Not = 0x1C,

    // ========================================================================
    // Float Arithmetic (0x20 - 0x2F)
    // ========================================================================
    FAdd = 0x20,
    FSub = 0x21,
    FMul = 0x22,
    FDiv = 0x23,
    FNeg = 0x24,

    // ========================================================================
    // Comparison (0x30 - 0x37) - set the flag, write no register
    // ========================================================================
    /// ABC: flag = R[A] <=> R[B] as i64
    ICmp = 0x30,
    /// ABC: flag = R[A] <=> R[B] as f64 (NaN leaves the flag undefined)
    FCmp = 0x31,
    /// ABC: flag = R[A] <=> 0
    Test = 0x32,

    // ========================================================================
    // Control Flow (0x38 - 0x4F) - sAx is an absolute target
    // ========================================================================
    Jmp = 0x38,
    Je = 0x39,
    Jne = 0x3A,
    Jlt = 0x3B,
    Jle = 0x3C,
    Jgt = 0x3D,
    Jge = 0x3E,

    /// ABC: stage R[A] as the next argument of a script call
    Param = 0x40,
    /// ABx: call unit Bx with the staged arguments, result into R[A]
    Call = 0x41,
    /// Return without a value
    Return = 0x42,
    /// ABC: return R[A]
    ReturnValue = 0x43,

    // ========================================================================
    // Foreign Calls (0x50 - 0x5F)
    // ========================================================================
    XPushI8 = 0x50,
    XPushI16 = 0x51,
    XPushI32 = 0x52,
    XPushI64 = 0x53,
    XPushF32 = 0x54,
    XPushF64 = 0x55,
    XPushPtr = 0x56,
    /// ABC: invoke the native function whose address is in R[A], discard
    /// the result and reset the staged arguments
    XCallVoid = 0x5F,
}

/// Operand layout of an opcode, used for decoding and disassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    None,
    A,
    AB,
    ABC,
    ABx,
    AsBx,
    SAx,
}

impl Opcode {
    pub const fn shape(self) -> Shape {
        use Opcode::*;
        match self {
            Nop | Return => Shape::None,
            Test | Param | ReturnValue | XPushI8 | XPushI16 | XPushI32 | XPushI64 | XPushF32
            | XPushF64 | XPushPtr | XCallVoid => Shape::A,
            Move | INeg | IBNot | Not | FNeg | ICmp | FCmp => Shape::AB,
            IAdd | ISub | IMul | IDiv | IMod | IAnd | IOr | IXor | IShl | IShr | FAdd | FSub
            | FMul | FDiv => Shape::ABC,
            LoadConst | LoadNative | Call => Shape::ABx,
            LoadInt => Shape::AsBx,
            Jmp | Je | Jne | Jlt | Jle | Jgt | Jge => Shape::SAx,
        }
    }

    /// Whether the sAx field is a branch target that must be patched.
    pub const fn is_branch(self) -> bool {
        matches!(self.shape(), Shape::SAx)
    }

    pub const fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "nop",
            Move => "move",
            LoadInt => "loadi",
            LoadConst => "loadk",
            LoadNative => "loadn",
            IAdd => "iadd",
            ISub => "isub",
            IMul => "imul",
            IDiv => "idiv",
            IMod => "imod",
            IAnd => "iand",
            IOr => "ior",
            IXor => "ixor",
            IShl => "ishl",
            IShr => "ishr",
            INeg => "ineg",
            IBNot => "ibnot",
            Not => "not",
            FAdd => "fadd",
            FSub => "fsub",
            FMul => "fmul",
            FDiv => "fdiv",
            FNeg => "fneg",
            ICmp => "icmp",
            FCmp => "fcmp",
            Test => "test",
            Jmp => "jmp",
            Je => "je",
            Jne => "jne",
            Jlt => "jlt",
            Jle => "jle",
            Jgt => "jgt",
            Jge => "jge",
            Param => "param",
            Call => "call",
            Return => "ret",
            ReturnValue => "retv",
            XPushI8 => "xpushc",
            XPushI16 => "xpushs",
            XPushI32 => "xpushi",
            XPushI64 => "xpushll",
            XPushF32 => "xpushf",
            XPushF64 => "xpushd",
            XPushPtr => "xpushp",
            XCallVoid => "xcallv",
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = InvalidInstruction;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        use Opcode::*;
        Ok(match byte {
            0x00 => Nop,
            0x01 => Move,
            0x02 => LoadInt,
            0x03 => LoadConst,
            0x04 => LoadNative,
            0x10 => IAdd,
            0x11 => ISub,
            0x12 => IMul,
            0x13 => IDiv,
            0x14 => IMod,
            0x15 => IAnd,
            0x16 => IOr,
            0x17 => IXor,
            0x18 => IShl,
            0x19 => IShr,
            0x1A => INeg,
            0x1B => IBNot,
            0x1C => Not,
            0x20 => FAdd,
            0x21 => FSub,
            0x22 => FMul,
            0x23 => FDiv,
            0x24 => FNeg,
            0x30 => ICmp,
            0x31 => FCmp,
            0x32 => Test,
            0x38 => Jmp,
            0x39 => Je,
            0x3A => Jne,
            0x3B => Jlt,
            0x3C => Jle,
            0x3D => Jgt,
            0x3E => Jge,
            0x40 => Param,
            0x41 => Call,
            0x42 => Return,
            0x43 => ReturnValue,
            0x50 => XPushI8,
            0x51 => XPushI16,
            0x52 => XPushI32,
            0x53 => XPushI64,
            0x54 => XPushF32,
            0x55 => XPushF64,
            0x56 => XPushPtr,
            0x5F => XCallVoid,
            other => return Err(InvalidInstruction(other)),
        })
    }
}

/// A single VM instruction (exactly 32 bits).
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction(u32);
static_assertions::assert_eq_size!(Instruction, [u8; 4]);

const U8: u32 = 0xFF;
const U16: u32 = 0xFFFF;
const U24: u32 = 0xFF_FFFF;

impl Instruction {
    /// Size of an instruction in bytes
    pub const SIZE: usize = 4;

    pub const fn abc(op: Opcode, a: u32, b: u32, c: u32) -> Self {
        Self(op as u32 | (a & U8) << 8 | (b & U8) << 16 | (c & U8) << 24)
    }

    pub const fn abx(op: Opcode, a: u32, bx: u32) -> Self {
        Self(op as u32 | (a & U8) << 8 | (bx & U16) << 16)
    }

    pub const fn asbx(op: Opcode, a: u32, sbx: i32) -> Self {
        Self(op as u32 | (a & U8) << 8 | (sbx as u32 & U16) << 16)
    }

    pub const fn ax(op: Opcode, ax: u32) -> Self {
        Self(op as u32 | (ax & U24) << 8)
    }

    pub const fn sax(op: Opcode, sax: i32) -> Self {
        Self(op as u32 | (sax as u32 & U24) << 8)
    }

    /// Raw word, e.g. for writing bytecode out.
    pub const fn to_bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn op_byte(self) -> u8 {
        (self.0 & U8) as u8
    }

    pub fn opcode(self) -> Result<Opcode, InvalidInstruction> {
        Opcode::try_from(self.op_byte())
    }

    pub const fn a(self) -> usize {
        ((self.0 >> 8) & U8) as usize
    }

    pub const fn b(self) -> usize {
        ((self.0 >> 16) & U8) as usize
    }

    pub const fn c(self) -> usize {
        (self.0 >> 24) as usize
    }

    pub const fn bx(self) -> usize {
        (self.0 >> 16) as usize
    }

    pub const fn sbx(self) -> i32 {
        (self.0 as i32) >> 16
    }

    pub const fn ax_field(self) -> u32 {
        self.0 >> 8
    }

    pub const fn sax_field(self) -> i32 {
        (self.0 as i32) >> 8
    }

    /// Same instruction with only the sAx field replaced. This is the whole
    /// backpatching mechanism: the opcode byte is never touched.
    pub const fn with_sax(self, sax: i32) -> Self {
        Self((self.0 & U8) | (sax as u32 & U24) << 8)
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.opcode() {
            Ok(op) => op,
            Err(InvalidInstruction(byte)) => return write!(f, "<invalid 0x{:02X}>", byte),
        };
        let name = op.mnemonic();
        match op.shape() {
            Shape::None => write!(f, "{}", name),
            Shape::A => write!(f, "{:<7} %{}", name, self.a()),
            Shape::AB => write!(f, "{:<7} %{} %{}", name, self.a(), self.b()),
            Shape::ABC => write!(f, "{:<7} %{} %{} %{}", name, self.a(), self.b(), self.c()),
            Shape::ABx => write!(f, "{:<7} %{} {}", name, self.a(), self.bx()),
            Shape::AsBx => write!(f, "{:<7} %{} {}", name, self.a(), self.sbx()),
            Shape::SAx => write!(f, "{:<7} ${}", name, self.sax_field()),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid instruction discriminant: 0x{0:02X}")]
pub struct InvalidInstruction(pub u8);
