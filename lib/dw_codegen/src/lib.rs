//! Lowering of typed register IR bodies to Dalvik code.
//!
//! The hard parts of lowering are register allocation under the contiguity
//! constraints of range instructions ([`constraints`], [`assign`]) and the
//! computation of branch offsets when instruction sizes depend on them
//! ([`offsets`]).

pub mod assign;
pub mod constraints;
pub mod errors;
pub mod format;
pub mod lower;
pub mod offsets;

pub use crate::lower::{lower, lower_with, LoweredCode};
