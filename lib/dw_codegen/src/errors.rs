//! Code generation errors definition.

use dw_ir::errors::IrError;
use dw_ir::InsnId;
use thiserror::Error;

pub type CodegenResult<T> = Result<T, CodegenError>;

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("IR error: {0}")]
    Ir(#[from] IrError),

    #[error("{0} has no concrete type, the body must be typed first")]
    Untyped(String),

    #[error("register index {index} does not fit in {mnemonic} at {insn}")]
    RegisterOutOfRange {
        insn: InsnId,
        mnemonic: String,
        index: u16,
    },

    #[error("too many registers ({0} words)")]
    TooManyRegisters(usize),

    #[error("literal {value} does not fit in {mnemonic} at {insn}")]
    LiteralOutOfRange {
        insn: InsnId,
        mnemonic: String,
        value: i64,
    },

    #[error("branch offset {offset} cannot be encoded by {mnemonic} at {insn}")]
    BranchOutOfRange {
        insn: InsnId,
        mnemonic: String,
        offset: i32,
    },

    #[error("no Dalvik opcode for {0}")]
    NoOpcode(String),

    #[error("code offsets did not converge after {0} updates")]
    NoConvergence(usize),

    #[error("structural error: {0}")]
    Structure(String),
}
