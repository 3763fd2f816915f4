//! Perlbridge – typed, refcount-safe access to an embedded Perl-style
//! interpreter
//!
//! This crate bridges host code and interpreter values:
//! - Owning wrappers over scalars, arrays, hashes, subs and objects whose
//!   construction and drop are the only places reference counts change
//! - Strict and unchecked conversions side by side, through the
//!   [`FromPerl`] and [`IntoPerl`] traits
//! - Host closures exposed as native subs, with errors and panics raised
//!   as interpreter exceptions
//! - Calls into the interpreter in scalar, list or void context, with
//!   `die` surfacing as [`PerlError::Died`]
//! - Host types for interpreter classes, and host instances handed to the
//!   interpreter as blessed objects
//!
//! ```no_run
//! use perlbridge::{EmbeddedPerl, PerlError, PerlSub};
//!
//! let perl = EmbeddedPerl::new();
//! PerlSub::new_named(*perl, "add", |a: i64, b: i64| Ok::<_, PerlError>(a + b));
//! let sum: i64 = perl.eval("add(2, 3)").unwrap();
//! assert_eq!(sum, 5);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Embedded interpreter runtime
pub mod runtime;

pub mod config;
pub mod context;
pub mod convert;
pub mod error;
pub mod interpreter;
pub mod object;
pub mod raw;
pub mod stack;
pub mod util;
pub mod value;
pub mod xsub;

// Re-export key types for convenience
pub use config::{ConfigError, InterpreterConfig};
pub use convert::{FromPerl, IntoPerl};
pub use error::{PerlError, PerlResult};
pub use interpreter::{EmbeddedPerl, PerlInterpreter};
pub use object::{BridgedObject, ClassRegistry, PerlBridgedObject, PerlNamedClass, RegisteredObject};
pub use stack::{CallContext, XSubStack};
pub use value::{AnyPerl, PerlArray, PerlHash, PerlObject, PerlScalar, PerlSub, PerlValue};
pub use xsub::{List, XsClosure, XsReturn};

/// Current version of the bridge
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
