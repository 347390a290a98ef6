//! Error types for the optimizer.
//!
//! Expected failures (malformed module input, rewrite-limit overruns) surface
//! as `CompilerError` through `Result`. Violations of IR well-formedness that
//! the front end guarantees (unbound locals, impossible accessor targets) are
//! programmer errors and panic with a diagnostic instead.

use thiserror::Error;

use crate::ast::{ModuleName, Qualified};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompilerError {
    /// The optimize fixpoint for a declaration did not converge within the
    /// configured iteration cap. This is an engineering bug in a rewrite
    /// rule, never a property of the input program.
    #[error("rewrite limit {1} exceeded while optimizing {0}")]
    RewriteLimit(Qualified, u32),

    /// A recursive binding group with no members.
    #[error("empty recursive binding group in module {0}")]
    EmptyRecGroup(ModuleName),

    /// Malformed surface IR encountered during conversion.
    #[error("convert error: {0}")]
    Convert(String),
}

pub type Result<T> = std::result::Result<T, CompilerError>;

/// Construct a `CompilerError::Convert` from format arguments.
#[macro_export]
macro_rules! err_convert {
    ($($arg:tt)*) => {
        $crate::error::CompilerError::Convert(format!($($arg)*))
    };
}

/// Return early with a `CompilerError::Convert`.
#[macro_export]
macro_rules! bail_convert {
    ($($arg:tt)*) => {
        return Err($crate::err_convert!($($arg)*))
    };
}
