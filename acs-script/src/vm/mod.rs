//! The interpreter: opcode table, operand stack, script instances and the dispatch loop.

mod decode;
mod instance;
mod interp;
mod opcode;
mod stack;

pub use decode::{decode_at, Instruction};
pub use instance::{ScriptInstance, ScriptState};
pub use opcode::{Operand, Pcode};
pub use stack::{Frame, OperandStack, ReturnRecord, Slot};

pub(crate) use interp::Exec;

/// Faults that end one script instance. They are logged and never leave the scheduler.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("stack overflow (capacity={capacity})")]
    StackOverflow { capacity: usize },

    #[error("stack underflow")]
    StackUnderflow,

    #[error("function index {index} out of range (count={count})")]
    FunctionOutOfRange { index: u32, count: usize },

    #[error("function {index} is imported and not resolved")]
    UnresolvedFunction { index: u32 },

    #[error("pc out of range: pc=0x{pc:X}, module_len=0x{len:X}")]
    PcOutOfRange { pc: u32, len: u32 },

    #[error("corrupt call frame at slot {slot}")]
    BadFrame { slot: usize },

    #[error("return outside a function")]
    ReturnOutsideFunction,
}
