//! Global error handling.
//!
//! Each sub-crate of the project defines its own type error.
//! Their types can be unified, for example in a main function,
//! when winding results at the top-level.
//!
//! ```rust
//! use dwlower::prelude::*;
//!
//! fn main() -> DwResult<()> { // can return a DwError
//!    let _bodies = ir::parse(".method static La;->f()V\n    return-void\n.end method\n")?; // can return an IrError
//!    Ok(())
//! }
//! ```

use dw_analysis::errors::AnalysisError;
use dw_codegen::errors::CodegenError;
use dw_ir::errors::IrError;
use std::io;
use thiserror::Error;

/// An alias for result that can be a [`DwError`].
pub type DwResult<T> = Result<T, DwError>;

/// The main error type for error winding at the top-level.
/// It mainly consists of transparent wrapper over error types that
/// are defined in dependencies.
#[derive(Debug, Error)]
pub enum DwError {
    /// Custom error for reporting bad command line arguments usage.
    #[error("bad arguments: {0}")]
    BadArguments(String),

    /// Error that can be returned from [I/O operations](std::io).
    #[error(transparent)]
    IO(#[from] io::Error),

    /// Error that can be returned from regex compilation.
    #[error(transparent)]
    Regex(#[from] regex::Error),

    /// Error that can be returned from JSON serialization.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Error that can be returned from [`dw_ir`] functions.
    #[error(transparent)]
    Ir(#[from] IrError),

    /// Error that can be returned from [`dw_analysis`] functions.
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// Error that can be returned from [`dw_codegen`] functions.
    #[error(transparent)]
    Codegen(#[from] CodegenError),
}
