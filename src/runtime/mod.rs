//! Embedded interpreter runtime.
//!
//! A small, single-threaded value machine with the classic embedding
//! surface: reference-counted values behind raw handles, an argument stack
//! with marks, a temporaries stack, scopes, packages with `@ISA`
//! inheritance, extension magic and native subs. Everything here works on
//! raw [`SvPtr`] handles and is `unsafe` to call; the safe surface lives in
//! [`crate::value`] and [`crate::interpreter`].
//!
//! Exceptions are Rust unwinds carrying [`Croak`]. A `G_EVAL` call or
//! [`Interpreter::eval_pv`] traps them into `$@`.

pub mod av;
pub mod cv;
mod eval;
pub mod hv;
pub mod interp;
pub mod magic;
pub mod numeric;
pub mod sv;

pub use cv::Xsub;
pub use interp::{
    Croak, G_DISCARD, G_EVAL, G_LIST, G_METHOD, G_NOARGS, G_SCALAR, G_VOID, G_WANT, GV_ADD,
    InterpPtr, Interpreter, ModuleBoot, get_context, main_interpreter, set_context, sys_init,
    sys_term,
};
pub use magic::{Magic, MgVtbl, PERL_MAGIC_EXT};
pub use numeric::Numeric;
pub use sv::{Sv, SvPtr};
