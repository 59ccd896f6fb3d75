//! This crate provides register IR analysis algorithms for the `DroidWorks`
//! lowering toolchain.

pub mod controlflow;
pub mod errors;
pub mod typing;

use crate::errors::AnalysisResult;
use dw_ir::Body;

/// Resolves every ambiguous type of the body and types its registers.
///
/// # Errors
///
/// Fails on type conflicts, on bodies that remain ambiguous after dead code removal
/// and on structurally invalid bodies.
pub fn retype(body: &mut Body) -> AnalysisResult<()> {
    typing::DexTyper::new(body)?.run()
}
