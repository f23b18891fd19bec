//! Main `JFlow` binary command line arguments options.
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
        .help("Input assembly file")
}

fn arg_system() -> Arg {
    Arg::new("system")
        .short('s')
        .long("system")
        .action(ArgAction::Set)
        .help("Additional system classes declarations file")
}

fn arg_output(help: &str) -> Arg {
    Arg::new("output")
        .short('o')
        .long("output")
        .action(ArgAction::Set)
        .help(help.to_string())
}

fn arg_filter_class() -> Arg {
    Arg::new("filter-class")
        .long("filter-class")
        .action(ArgAction::Set)
        .help("Class(es) regex filter")
}

fn arg_filter_method() -> Arg {
    Arg::new("filter-method")
        .long("filter-method")
        .action(ArgAction::Set)
        .help("Method(s) regex filter")
}

fn arg_max_iterations() -> Arg {
    Arg::new("max-iterations")
        .long("max-iterations")
        .action(ArgAction::Set)
        .value_parser(value_parser!(usize))
        .help("Solver iterations cap (defaults to JF_MAX_ITERATIONS or 10000)")
}

#[must_use]
pub fn jflow() -> Command {
    Command::new(NAME)
        .version(VERSION)
        .author(AUTHORS)
        .about(DESCRIPTION)
        .subcommand(cfg())
        .subcommand(dataflow())
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
pub fn cfg() -> Command {
    Command::new("cfg")
        .bin_name("jf-cfg")
        .version(VERSION)
        .author(AUTHORS)
        .about("Builds methods control flow graphs")
        .arg(arg_debug())
        .arg(arg_verbose())
        .arg(arg_ecslog())
        .arg(arg_input())
        .arg(arg_system())
        .arg(arg_output("Dot output directory"))
        .arg(arg_filter_class())
        .arg(arg_filter_method())
        .arg(
            Arg::new("raw")
                .long("raw")
                .action(ArgAction::SetTrue)
                .help("Keep infeasible edges (skip the pruning passes)"),
        )
}

#[must_use]
pub fn dataflow() -> Command {
    Command::new("dataflow")
        .bin_name("jf-dataflow")
        .version(VERSION)
        .author(AUTHORS)
        .about("Runs a dataflow analysis on methods and dumps its results")
        .arg(arg_debug())
        .arg(arg_verbose())
        .arg(arg_ecslog())
        .arg(arg_input())
        .arg(arg_system())
        .arg(arg_filter_class())
        .arg(arg_filter_method())
        .arg(arg_max_iterations())
        .arg(
            Arg::new("analysis")
                .short('a')
                .long("analysis")
                .action(ArgAction::Set)
                .value_parser([
                    "types",
                    "stack-depth",
                    "live-locals",
                    "dominators",
                    "post-dominators",
                ])
                .default_value("types")
                .help("Analysis to run"),
        )
        .arg(
            Arg::new("edges")
                .long("edges")
                .action(ArgAction::SetTrue)
                .help("Also print the facts flowing along edges"),
        )
}
