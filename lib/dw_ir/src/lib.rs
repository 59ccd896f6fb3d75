//! Register-based intermediate representation of Dalvik method bodies.

mod parsers;

pub mod body;
pub mod errors;
pub mod instrs;
pub mod registers;
pub mod types;

pub use crate::body::{Body, Handler, InsnId, TryBlock};
pub use crate::instrs::{Instr, PrettyPrint, PrettyPrinter};
pub use crate::parsers::parse;
pub use crate::registers::{Reg, RegInfo, RegKind};
pub use crate::types::Type;
