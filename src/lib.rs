//! # `dwlower`
//!
//! `dwlower` is the entry crate of the register IR typing and lowering toolset.
//! It reexports the sub-crates and provides the command line tools.
//!
//! ## Library basics
//!
//! Method bodies are read from their textual form, typed, then lowered to a flat
//! list of positioned Dalvik instructions:
//!
//! ```rust
//! use dwlower::prelude::*;
//!
//! let mut bodies = ir::parse(
//!     ".method static La;->f()I\n    const:?32 a, 1\n    return a\n.end method\n",
//! )?;
//! let body = &mut bodies[0];
//! analysis::retype(body)?;
//! let code = codegen::lower(body)?;
//! assert_eq!(code.insns_size, 2);
//! # Ok::<(), DwError>(())
//! ```
//!
//! ## Sub-crates
//!
//!  - [`dw_ir`] contains the register IR: types, registers, instructions, method
//!    bodies, and their textual reader and printer,
//!  - [`dw_analysis`] contains the control flow graph and the typing pass that
//!    resolves ambiguous types,
//!  - [`dw_codegen`] contains register allocation under range constraints, code
//!    offsets computation and lowering.

mod errors;

pub mod cli;
pub mod dw_lower;
pub mod dw_retype;

pub use dw_analysis as analysis;
pub use dw_codegen as codegen;
pub use dw_ir as ir;

/// Reexport module of commonly used structures and functions:
///
/// ```rust
/// use dwlower::prelude::*;
/// ```
pub mod prelude {
    pub use crate::errors::{DwError, DwResult};

    pub use dw_analysis::controlflow::Cfg;
    pub use dw_analysis::{self as analysis, errors::AnalysisError};
    pub use dw_codegen::{self as codegen, errors::CodegenError, LoweredCode};
    pub use dw_ir::{self as ir, errors::IrError, Body};

    use clap::ArgMatches;
    use regex::Regex;
    use std::fs;

    pub fn init_logger(args: &ArgMatches) {
        let env = env_logger::Env::new()
            .filter_or("DW_LOG", "info")
            .write_style("DW_LOG_STYLE");

        let mut builder = env_logger::Builder::from_env(env);
        if args.get_flag("verbose") {
            builder.filter_level(log::LevelFilter::Trace);
        } else if args.get_flag("debug") {
            builder.filter_level(log::LevelFilter::Debug);
        }
        if args.get_flag("ecslog") {
            builder.format(ecs_logger::format);
        }
        builder.init();
    }

    /// Reads the method bodies of the input file, keeping those whose method
    /// descriptor matches the `filter-method` pattern.
    pub fn read_bodies(args: &ArgMatches) -> DwResult<Vec<Body>> {
        let input_fname = args
            .get_one::<String>("input")
            .ok_or_else(|| DwError::BadArguments("--input needed".to_string()))?;
        let bodies = ir::parse(&fs::read_to_string(input_fname)?)?;
        log::debug!("{} method(s) read from {input_fname}", bodies.len());

        match args.get_one::<String>("filter-method") {
            None => Ok(bodies),
            Some(pattern) => {
                let pattern = Regex::new(pattern)?;
                log::debug!("filtering methods on pattern {pattern:?}");
                Ok(bodies
                    .into_iter()
                    .filter(|body| pattern.is_match(&body.method().to_string()))
                    .collect())
            }
        }
    }
}
