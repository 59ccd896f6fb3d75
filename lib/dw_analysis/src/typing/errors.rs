//! Typing errors definitions.

use dw_ir::{InsnId, Type};
use thiserror::Error;

/// An alias for result that can be a [`TypeError`].
pub type TypeResult<T> = Result<T, TypeError>;

/// The typing error type.
#[derive(Debug, Error)]
pub enum TypeError {
    /// Two incompatible concrete types are demanded for the same value.
    #[error("type conflict between {left} and {right}{context}")]
    Conflict {
        left: Type,
        right: Type,
        context: String,
    },

    /// Ambiguous instructions remain once every typing information is exhausted.
    #[error("untypable method, ambiguous instructions remain: {}", list(.0))]
    Untypable(Vec<InsnId>),

    #[error("move-result at {0} must follow an invoke with a result or a filled-new-array")]
    MissingResult(InsnId),

    #[error("declared return and effective return at {0} don't match")]
    BadReturnType(InsnId),

    #[error("bad arity of invocation at {0}")]
    BadArity(InsnId),

    #[error("array type expected, found {0}")]
    ExpectedArray(Type),

    #[error("internal typing error: {0}")]
    Internal(String),
}

fn list(ids: &[InsnId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl TypeError {
    /// Attaches a location to a type conflict.
    #[must_use]
    pub fn at(self, location: &str) -> Self {
        match self {
            Self::Conflict { left, right, .. } => Self::Conflict {
                left,
                right,
                context: format!(" ({location})"),
            },
            err => err,
        }
    }
}
