//! Register IR errors definitions.

use crate::body::InsnId;
use crate::registers::Reg;
use std::fmt;
use thiserror::Error;

/// An alias for result that can be an [`IrError`].
pub type IrResult<T> = Result<T, IrError>;

/// The register IR error type.
#[derive(Debug, Error)]
pub enum IrError {
    /// Error that can be returned when formatting IR parts.
    #[error("Formatting error: {0}")]
    Fmt(#[from] fmt::Error),

    /// Error that can be returned by the textual reader.
    #[error("parsing error at line {line}: {msg}")]
    Parsing { line: usize, msg: String },

    #[error("could not convert {} into {}", from, to)]
    Conversion { from: String, to: String },

    #[error("instruction not found: {0}")]
    InstructionNotFound(InsnId),

    #[error("register not found: {0}")]
    RegisterNotFound(Reg),

    #[error("unknown label: {0}")]
    UnknownLabel(String),

    /// The body does not respect a structural invariant (dangling branch, etc.).
    #[error("body structure is invalid: {0}")]
    Structure(String),
}

impl IrError {
    pub(crate) fn parsing<S: Into<String>>(line: usize, msg: S) -> Self {
        Self::Parsing {
            line,
            msg: msg.into(),
        }
    }
}
