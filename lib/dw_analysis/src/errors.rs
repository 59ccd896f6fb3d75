//! Analysis errors definition.

use crate::typing::errors::TypeError;
use dw_ir::errors::IrError;
use dw_ir::InsnId;
use thiserror::Error;

pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("internal error: {0}")]
    Internal(String),

    #[error("IR error: {0}")]
    Ir(#[from] IrError),

    #[error("instruction not found: {0}")]
    InstructionNotFound(InsnId),

    #[error("execution falls through the end of the method after {0}")]
    FallThrough(InsnId),

    #[error("the method has no implementation")]
    NoCode,

    #[error("typing error: {0}")]
    Type(#[from] TypeError),
}
