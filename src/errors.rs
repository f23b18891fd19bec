//! Global error handling.
//!
//! Each sub-crate of the project defines its own type error.
//! Their types can be unified, for example in a main function,
//! when winding results at the top-level.
//!
//! ```rust
//! use jflow::prelude::*;
//!
//! fn main() -> JfResult<()> { // can return a JfError
//!    let _program = jflow::bytecode::parse("")?; // can return a BytecodeError
//!    Ok(())
//! }
//! ```

use jf_analysis::errors::AnalysisError;
use jf_bytecode::errors::BytecodeError;
use std::io;
use thiserror::Error;

/// An alias for result that can be a [`JfError`].
pub type JfResult<T> = Result<T, JfError>;

/// The main error type for error winding at the top-level.
/// It mainly consists of transparent wrapper over error types that
/// are defined in dependencies.
#[derive(Debug, Error)]
pub enum JfError {
    /// Custom error for reporting bad command line arguments usage.
    #[error("bad arguments: {0}")]
    BadArguments(String),

    /// Error that can be returned from [I/O operations](std::io).
    #[error(transparent)]
    IO(#[from] io::Error),

    /// Error that can be returned from regex compilation.
    #[error(transparent)]
    Regex(#[from] regex::Error),

    /// Error that can be returned from [`jf_analysis`] functions.
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// Error that can be returned from [`jf_bytecode`] functions.
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),
}
