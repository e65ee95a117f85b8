//! Runtime execution errors.
//!
//! # Error Categories
//!
//! - **Runtime errors**: faults of the executing program itself, such as an
//!   integer division by zero or a malformed instruction stream.
//!
//! - **Resource exceeded errors**: the program asked for more register space or
//!   call depth than the VM was configured with.

/// Runtime execution error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    ResourceExceeded(#[from] ResourceExceededError),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    /// Integer division or remainder with a zero divisor.
    #[error("Division by zero in `{unit}` at instruction {ip}")]
    DivisionByZero { unit: String, ip: usize },

    /// The opcode byte does not name any instruction.
    #[error("Illegal instruction 0x{opcode:02X} in `{unit}` at instruction {ip}")]
    IllegalInstruction { opcode: u8, unit: String, ip: usize },

    /// A branch or a missing return moved the instruction pointer out of the unit.
    #[error("Instruction pointer {ip} is outside `{unit}`")]
    InstructionOutOfRange { unit: String, ip: usize },

    /// `xcallv` was asked to call through a null function pointer.
    #[error("Native call through a null function pointer in `{unit}` at instruction {ip}")]
    NullNativePointer { unit: String, ip: usize },

    /// Native arguments were staged but the unit called or returned before
    /// invoking them.
    #[error("Unfinished native call in `{unit}` at instruction {ip}: {staged} argument(s) staged")]
    ForeignCallInProgress {
        unit: String,
        ip: usize,
        staged: usize,
    },

    /// A unit was invoked with the wrong number of arguments.
    #[error("`{unit}` expects {expected} argument(s), got {got}")]
    ArgumentCountMismatch {
        unit: String,
        expected: usize,
        got: usize,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResourceExceededError {
    /// Opening a register window would run past the register file.
    #[error("Stack overflow: {required} registers required, capacity is {capacity}")]
    StackOverflow { required: usize, capacity: usize },

    /// Too many nested script calls.
    #[error("Call depth {depth} exceeds maximum of {max_depth}")]
    CallDepthExceeded { depth: usize, max_depth: usize },
}
