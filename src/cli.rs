//! Main `dwlower` binary command line arguments options.
//!
//! This module declares a function to build `clap` command line arguments
//! parser, so that it can be used from other places than the main binary,
//! such as from bash completion file generator.

use clap::{value_parser, Arg, ArgAction, Command};
use clap_complete::Shell;

const NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");
const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

fn arg_debug() -> Arg {
    Arg::new("debug")
        .short('d')
        .long("debug")
        .action(ArgAction::SetTrue)
        .help("Activate debug mode")
}

fn arg_verbose() -> Arg {
    Arg::new("verbose")
        .short('v')
        .long("verbose")
        .action(ArgAction::SetTrue)
        .help("Activate verbose mode")
}

fn arg_ecslog() -> Arg {
    Arg::new("ecslog")
        .short('e')
        .long("ecslog")
        .action(ArgAction::SetTrue)
        .help("Output logs in ECS format")
}

fn arg_input() -> Arg {
    Arg::new("input")
        .short('i')
        .long("input")
        .action(ArgAction::Set)
        .required(true)
        .help("Input register IR file")
}

fn arg_output(help: &str) -> Arg {
    Arg::new("output")
        .short('o')
        .long("output")
        .action(ArgAction::Set)
        .help(help.to_string())
}

fn arg_filter_method() -> Arg {
    Arg::new("filter-method")
        .long("filter-method")
        .action(ArgAction::Set)
        .help("Method(s) regex filter")
}

#[must_use]
pub fn dwlower() -> Command {
    Command::new(NAME)
        .version(VERSION)
        .author(AUTHORS)
        .about(DESCRIPTION)
        .subcommand(retype())
        .subcommand(lower())
        .subcommand(
            Command::new("gen-completions")
                .about("Generates completions file")
                .arg(
                    Arg::new("shell")
                        .short('s')
                        .long("shell")
                        .action(ArgAction::Set)
                        .value_parser(value_parser!(Shell))
                        .required(true)
                        .help("Shell type for completion generation"),
                ),
        )
}

#[must_use]
pub fn retype() -> Command {
    Command::new("retype")
        .bin_name("dw-retype")
        .version(VERSION)
        .author(AUTHORS)
        .about("Resolves ambiguous register types and prints typed bodies")
        .arg(arg_debug())
        .arg(arg_verbose())
        .arg(arg_ecslog())
        .arg(arg_input())
        .arg(arg_output("Output directory for control flow graphs dot files"))
        .arg(arg_filter_method())
}

#[must_use]
pub fn lower() -> Command {
    Command::new("lower")
        .bin_name("dw-lower")
        .version(VERSION)
        .author(AUTHORS)
        .about("Types and lowers bodies to positioned Dalvik instructions")
        .arg(arg_debug())
        .arg(arg_verbose())
        .arg(arg_ecslog())
        .arg(arg_input())
        .arg(arg_filter_method())
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print lowered code as JSON"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands() {
        dwlower().debug_assert();
        let args = dwlower()
            .try_get_matches_from(["dwlower", "lower", "-i", "a.dwir", "--json", "-d"])
            .unwrap();
        let (name, sub) = args.subcommand().unwrap();
        assert_eq!(name, "lower");
        assert!(sub.get_flag("json"));
        assert!(sub.get_flag("debug"));
        assert!(retype().try_get_matches_from(["dw-retype"]).is_err());
    }
}
