//! Bytecode errors definitions.

use crate::Addr;
use std::fmt;
use thiserror::Error;

/// An alias for result that can be a [`BytecodeError`].
pub type BytecodeResult<T> = Result<T, BytecodeError>;

/// The bytecode front end error type.
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// Error that can be returned when formatting bytecode parts.
    #[error("Formatting error: {0}")]
    Fmt(#[from] fmt::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// Error that can be returned at parsing, with the (1-based) faulty line.
    #[error("parsing error at line {line}: {message}")]
    Parsing { line: usize, message: String },

    /// Custom internal error type.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("could not convert {} into {}", from, to)]
    Conversion { from: String, to: String },

    #[error("invalid type")]
    InvalidType,

    #[error("unknown mnemonic: {0}")]
    UnknownMnemonic(String),

    #[error("Instruction not found (address: {0})")]
    InstructionNotFound(Addr),

    #[error("Duplicate instruction address: {0}")]
    DuplicateAddress(Addr),

    #[error("invalid exception handler: {0}")]
    InvalidHandler(String),
}
