//! # `JFlow`
//!
//! `jflow` is the main crate of the `JFlow` JVM bytecode analysis project. It
//! reexports the sub-crates and the most used structures and functions within
//! the `jflow::prelude` namespace, and hosts the command line tools.
//!
//! ## Library basics
//!
//! Methods are read from a textual assembly file into a [`Program`](prelude::Program),
//! whose class declarations make up the [`Hierarchy`](prelude::Hierarchy) used to
//! resolve classes during analysis:
//!
//! ```rust
//! use jflow::prelude::*;
//!
//! let program = jflow::bytecode::parse(
//!     "method Foo.id(I)I static locals 1\n  0: iload 0\n  1: ireturn\nend",
//! )?;
//! let hierarchy = Hierarchy::from_program(&program);
//! let method = program.get_method("Foo.id(I)I").expect("parsed method");
//! let cache = MethodAnalysisCache::new(method, &hierarchy, &LogLookupFailures, DataflowConfig::new());
//! println!("{}", cache.type_dataflow()?.fact_before_exit());
//! # Ok::<(), JfError>(())
//! ```
//!
//! ## Sub-crates
//!
//!  - [`jf_bytecode`] contains the bytecode data structures and the textual
//!    assembly parser,
//!  - [`jf_analysis`] contains the control flow graphs, the dataflow engine and
//!    the analyses built on top of it.

mod errors;

pub mod cli;
pub mod jf_cfg;
pub mod jf_dataflow;

pub use jf_analysis as analysis;
pub use jf_bytecode as bytecode;

/// Reexport module of commonly used structures and functions from `JFlow` project
/// sub-crates:
///
/// ```rust
/// use jflow::prelude::*;
/// ```
pub mod prelude {
    pub use crate::errors::{JfError, JfResult};

    pub use jf_analysis::cfg::{Cfg, CfgBuilder};
    pub use jf_analysis::context::{ClassContext, MethodAnalysisCache};
    pub use jf_analysis::dataflow::{Dataflow, DataflowConfig};
    pub use jf_analysis::hierarchy::{Hierarchy, LogLookupFailures};

    pub use jf_bytecode::methods::Method;
    pub use jf_bytecode::{Addr, Program};

    use clap::ArgMatches;
    use regex::Regex;

    pub fn init_logger(args: &ArgMatches) {
        let env = env_logger::Env::new()
            .filter_or("JF_LOG", "info")
            .write_style("JF_LOG_STYLE");

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

    /// Reads the `--input` program and the classes of the optional `--system` one,
    /// and builds their hierarchy.
    ///
    /// # Errors
    ///
    /// Fails on missing arguments, unreadable files and parsing errors.
    pub fn load_program(args: &ArgMatches) -> JfResult<(Program, Hierarchy)> {
        let input_fname = args
            .get_one::<String>("input")
            .ok_or_else(|| JfError::BadArguments("--input needed".to_string()))?;
        let program = Program::from_file(input_fname)?;
        let hierarchy = match args.get_one::<String>("system") {
            Some(sys_fname) => {
                let sys = Program::from_file(sys_fname)?;
                Hierarchy::from_programs([&sys, &program])
            }
            None => Hierarchy::from_program(&program),
        };
        log::info!(
            "{} methods read from {input_fname}",
            program.methods_count()
        );
        Ok((program, hierarchy))
    }

    /// Methods with code selected by the `--filter-class` and `--filter-method`
    /// regexes.
    ///
    /// # Errors
    ///
    /// Fails on invalid regexes.
    pub fn filtered_methods<'p>(
        program: &'p Program,
        args: &ArgMatches,
    ) -> JfResult<Vec<&'p Method>> {
        let class_pattern = args
            .get_one::<String>("filter-class")
            .map(|r| Regex::new(r))
            .transpose()?;
        let method_pattern = args
            .get_one::<String>("filter-method")
            .map(|r| Regex::new(r))
            .transpose()?;
        log::debug!(
            "filtering methods on class pattern {:?}, method pattern {:?}",
            class_pattern,
            method_pattern
        );
        Ok(program
            .iter_methods()
            .filter(|method| method.code().is_some())
            .filter(|method| {
                class_pattern
                    .as_ref()
                    .map_or(true, |r| r.is_match(method.class_name()))
                    && method_pattern
                        .as_ref()
                        .map_or(true, |r| r.is_match(method.name()))
            })
            .collect())
    }
}
