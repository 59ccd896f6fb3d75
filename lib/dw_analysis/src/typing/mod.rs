//! Register IR typing pass.
//!
//! Constants, moves and array accesses read from bytecode carry ambiguous types
//! (`?0`, `?32`, `?64`) since their bit patterns do not tell integers, floats and
//! null references apart. The pass recovers concrete types from the way values
//! flow between instructions, then types every register.

mod hints;
mod state;
mod typer;

pub mod errors;
pub mod types;

pub use hints::{access, Access, Operand, Shape};
pub use state::{RegisterState, Source};
pub use typer::DexTyper;
