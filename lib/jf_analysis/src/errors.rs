//! Analysis errors definition.

use crate::hierarchy::LookupFailure;
use crate::typing::errors::TypeError;
use jf_bytecode::errors::BytecodeError;
use jf_bytecode::Addr;
use std::sync::Arc;
use thiserror::Error;

pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("internal error: {0}")]
    Internal(String),

    #[error("bytecode error: {0}")]
    Bytecode(#[from] BytecodeError),

    #[error("{0}")]
    Lookup(#[from] LookupFailure),

    #[error("the method has no implementation")]
    NoCode,

    #[error("invalid branch target: {0}")]
    InvalidBranchTarget(Addr),

    #[error("control flow falls off the end of the code after {0}")]
    FallsOffCode(Addr),

    #[error("malformed subroutine: {0}")]
    MalformedSubroutine(String),

    #[error("duplicate edge B{src} -> B{dst}")]
    DuplicateEdge { src: usize, dst: usize },

    #[error("operand stack underflow")]
    StackUnderflow,

    #[error("invalid local variable index: {0}")]
    InvalidLocal(usize),

    #[error("{analysis} did not converge after {iterations} iterations on {method}")]
    MaxIterations {
        analysis: String,
        method: String,
        iterations: usize,
    },

    #[error("analysis cancelled")]
    Cancelled,

    #[error("{what} is unavailable for {method}: {cause}")]
    Unavailable {
        what: &'static str,
        method: String,
        cause: Arc<AnalysisError>,
    },

    #[error("recursive request for {what} of {method}")]
    Reentrant { what: &'static str, method: String },

    #[error("typing error: {0}")]
    Type(#[from] TypeError),
}
