//! Error types for the bridge
//!
//! Every failure at the host/interpreter boundary is a [`PerlError`]. The
//! variants that concern a particular value keep an owning handle to it, so
//! the value can still be inspected or re-raised after the error crossed
//! into host code.

use thiserror::Error;

use crate::raw::SvKind;
use crate::value::{PerlScalar, PerlValue};

/// Bridge error
#[derive(Debug, Error)]
pub enum PerlError {
    /// `die` was called on the interpreter side. Holds a copy of `$@`,
    /// which may be a plain message or any value passed to `die`.
    #[error("{}", died_message(.0))]
    Died(PerlScalar),

    /// A positional argument the callee needs was not passed
    #[error("no argument on the stack at position {at}")]
    NoArgumentOnStack {
        /// Zero-based argument position
        at: usize,
    },

    /// More arguments were passed than the callee accepts
    #[error("too many arguments: expected at most {expected}, got {got}")]
    ArityMismatch {
        /// Declared arity
        expected: usize,
        /// Arguments on the stack
        got: usize,
    },

    /// An undefined value reached a place that needs a defined one
    #[error("unexpected undef")]
    UnexpectedUndef(PerlValue),

    /// The value has the wrong kind (array expected, hash found, ...)
    #[error("expected {want}, got {value}")]
    UnexpectedValueType {
        /// Offending value
        value: PerlValue,
        /// Kind that was asked for
        want: SvKind,
    },

    /// Not a number, or a number outside the range of the target type
    #[error("{value} is not a number representable as {want}")]
    NotNumber {
        /// Offending value
        value: PerlValue,
        /// Host type that was asked for
        want: &'static str,
    },

    /// Neither a string nor a number
    #[error("{0} is not a string or a number")]
    NotStringOrNumber(PerlValue),

    /// A reference was required
    #[error("{0} is not a reference")]
    NotReference(PerlValue),

    /// A blessed reference was required
    #[error("{0} is not an object")]
    NotObject(PerlValue),

    /// The object is blessed but does not wrap a host instance
    #[error("{0} does not wrap a host object")]
    NotWrappedObject(PerlValue),

    /// The object belongs to a class other than the one asked for
    #[error("{value} is not an instance of {want}")]
    UnexpectedObjectType {
        /// Offending object
        value: PerlValue,
        /// Expected class
        want: String,
    },

    /// Array index with nothing stored at it
    #[error("no element at index {index}")]
    ElementNotExists {
        /// Requested index
        index: isize,
    },

    /// Hash built from a list with an odd number of elements
    #[error("odd number of elements in hash assignment")]
    OddElementsHash,

    /// A call argument failed to convert
    #[error("argument {index}: {source}")]
    Argument {
        /// Zero-based argument position
        index: usize,
        /// Conversion failure
        #[source]
        source: Box<PerlError>,
    },

    /// Error raised by host code
    #[error(transparent)]
    Host(#[from] anyhow::Error),
}

/// Result type for bridge operations
pub type PerlResult<T> = std::result::Result<T, PerlError>;

fn died_message(err: &PerlScalar) -> String {
    err.string_unchecked().trim_end_matches('\n').to_string()
}

impl PerlError {
    /// Wrap a conversion failure with the position of the argument.
    pub fn at_argument(self, index: usize) -> Self {
        match self {
            PerlError::NoArgumentOnStack { .. } | PerlError::Argument { .. } => self,
            other => PerlError::Argument {
                index,
                source: Box::new(other),
            },
        }
    }

    /// The value passed to `die`, if this error came from the interpreter.
    pub fn died_value(&self) -> Option<&PerlScalar> {
        match self {
            PerlError::Died(value) => Some(value),
            _ => None,
        }
    }

    /// Error from a plain message, raised as a host error.
    pub fn msg(message: impl std::fmt::Display) -> Self {
        PerlError::Host(anyhow::anyhow!("{message}"))
    }

    /// Render the error into a `Send + Sync` [`anyhow::Error`], releasing
    /// any runtime value it holds. Host errors keep their source chain.
    pub fn into_detached(self) -> anyhow::Error {
        match self {
            PerlError::Host(err) => err,
            other => anyhow::anyhow!("{other}"),
        }
    }
}

impl From<std::convert::Infallible> for PerlError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::EmbeddedPerl;

    fn assert_send_sync<T: Send + Sync>(_: &T) {}

    #[test]
    fn test_detached_died_keeps_message() {
        let perl = EmbeddedPerl::new();
        let err = perl.eval_void("die 'lost power'").unwrap_err();
        let detached = err.into_detached();
        assert_send_sync(&detached);
        assert_eq!(detached.to_string(), "lost power at (eval) line 1.");
    }

    #[test]
    fn test_detached_host_error_keeps_chain() {
        let inner = anyhow::anyhow!("disk full").context("saving state");
        let detached = PerlError::Host(inner).into_detached();
        assert_eq!(detached.to_string(), "saving state");
        assert_eq!(detached.root_cause().to_string(), "disk full");
    }
}
