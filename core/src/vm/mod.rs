mod code;
mod error;
mod ffi;
mod instruction_set;
mod runtime;
mod value;

pub use code::{Bytecode, NativeSymbol, Program, UnitId};
pub use error::{ExecutionError, ResourceExceededError, RuntimeError};
pub use ffi::{ForeignCallBridge, NativeArg};
pub use instruction_set::{Instruction, InvalidInstruction, Opcode, Shape};
pub use runtime::{Flag, Vm};
pub use value::{Typed, Value};
