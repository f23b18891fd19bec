//! Typing errors definitions.

use thiserror::Error;

/// An alias for result that can be a [`TypeError`].
pub type TypeResult<T> = Result<T, TypeError>;

/// The typing error type.
#[derive(Debug, Error)]
pub enum TypeError {
    #[error("void type used as a value type")]
    VoidValue,

    #[error("array type expected, found {0}")]
    ExpectedArray(String),

    #[error("broken wide value in local {0}")]
    BrokenWideValue(usize),
}
