//! Argument stack protocol for calls in both directions.
//!
//! Host to interpreter: [`call`] pushes arguments as mortal aliases, calls
//! under `G_EVAL` inside its own scope, converts the results before the
//! scope's temporaries are freed, and turns a true `$@` into
//! [`PerlError::Died`].
//!
//! Interpreter to host: [`XSubStack`] unpacks the arguments a native sub
//! was called with.

use crate::context::SvContext;
use crate::convert::{FromPerl, IntoPerl};
use crate::error::{PerlError, PerlResult};
use crate::interpreter::PerlInterpreter;
use crate::runtime::{G_EVAL, G_LIST, G_SCALAR, G_VOID, G_WANT, SvPtr};
use crate::value::{PerlScalar, PerlValue};

/// Context a call is made in. It decides how many values come back: list
/// context returns everything, scalar context exactly one value (the last
/// one, or undef), void context nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallContext {
    /// One value
    Scalar,
    /// Every value
    List,
    /// No value
    Void,
}

impl CallContext {
    /// Calling-convention flag.
    pub fn flags(self) -> u32 {
        match self {
            CallContext::Scalar => G_SCALAR,
            CallContext::List => G_LIST,
            CallContext::Void => G_VOID,
        }
    }

    /// Context from calling-convention flags.
    pub fn from_flags(flags: u32) -> Self {
        match flags & G_WANT {
            G_LIST => CallContext::List,
            G_VOID => CallContext::Void,
            _ => CallContext::Scalar,
        }
    }
}

/// What a host-side call invokes.
#[derive(Debug, Clone, Copy)]
pub(crate) enum CallTarget<'a> {
    /// Code value, or a reference to one
    Sv(SvPtr),
    /// Sub by name
    Name(&'a str),
    /// Method on the first argument
    Method(&'a str),
    /// Source text; takes no arguments
    Eval(&'a str),
}

/// Call `target` with `args` in `context`, passing the results to `collect`
/// while they are still on the stack.
pub(crate) fn call<R>(
    perl: PerlInterpreter,
    target: CallTarget<'_>,
    args: &[&dyn IntoPerl],
    context: CallContext,
    collect: impl FnOnce(&[SvContext]) -> PerlResult<R>,
) -> PerlResult<R> {
    let interp = perl.raw();
    interp.enter();
    interp.savetmps();

    let base = interp.stack_len();
    if !matches!(target, CallTarget::Eval(_)) {
        interp.push_mark();
        for arg in args {
            let sv = arg.to_arg(perl);
            interp.stack_push(interp.sv_2mortal(sv));
        }
    }
    let flags = context.flags() | G_EVAL;
    let count = unsafe {
        match target {
            CallTarget::Sv(sv) => interp.call_sv(sv, flags),
            CallTarget::Name(name) => interp.call_pv(name, flags),
            CallTarget::Method(name) => interp.call_method(name, flags),
            CallTarget::Eval(source) => interp.eval_pv(source, flags),
        }
    };

    let errsv = interp.errsv();
    let result = if unsafe { interp.sv_true(errsv) } {
        let err = unsafe { PerlValue::from_copy(perl.context(errsv)) };
        tracing::debug!(error = %err, "call died");
        Err(PerlError::Died(PerlScalar::from_value_unchecked(err)))
    } else {
        let results: Vec<SvContext> = interp
            .stack_slice(interp.stack_len() - count)
            .into_iter()
            .map(|sv| perl.context(sv))
            .collect();
        collect(&results)
    };

    interp.stack_truncate(base);
    unsafe { interp.freetmps() };
    interp.leave();
    result
}

/// Copy every result into an owned scalar.
pub(crate) fn collect_list(results: &[SvContext]) -> PerlResult<Vec<PerlScalar>> {
    results
        .iter()
        .map(|ctx| PerlScalar::from_sv_copy(*ctx))
        .collect()
}

/// Convert the single scalar-context result.
pub(crate) fn collect_scalar<T: FromPerl>(results: &[SvContext]) -> PerlResult<T> {
    match results.last() {
        Some(ctx) => T::from_sv_copy(*ctx),
        None => Err(PerlError::NoArgumentOnStack { at: 0 }),
    }
}

/// Arguments of a native sub, as found on the stack when it was called.
#[derive(Debug)]
pub struct XSubStack {
    perl: PerlInterpreter,
    args: Vec<SvPtr>,
    context: CallContext,
}

impl XSubStack {
    pub(crate) fn new(perl: PerlInterpreter, args: Vec<SvPtr>, context: CallContext) -> Self {
        Self {
            perl,
            args,
            context,
        }
    }

    /// Interpreter the sub runs in.
    pub fn interpreter(&self) -> PerlInterpreter {
        self.perl
    }

    /// Context the caller asked for.
    pub fn context(&self) -> CallContext {
        self.context
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Whether no arguments were passed.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Convert the argument at `index` by copy. A missing argument is an
    /// error unless `T` accepts absence (as `Option` does).
    pub fn arg<T: FromPerl>(&self, index: usize) -> PerlResult<T> {
        let converted = match self.args.get(index) {
            Some(sv) => T::from_sv_copy(self.perl.context(*sv)),
            None => T::from_missing(index),
        };
        converted.map_err(|err| err.at_argument(index))
    }

    /// Every argument as an owned copy.
    pub fn scalars(&self) -> Vec<PerlScalar> {
        self.args
            .iter()
            .map(|sv| {
                let ctx = self.perl.context(*sv);
                PerlScalar::from_value_unchecked(unsafe { PerlValue::from_copy(ctx) })
            })
            .collect()
    }

    /// Fail when more than `arity` arguments were passed.
    pub fn check_arity(&self, arity: usize) -> PerlResult<()> {
        if self.args.len() > arity {
            return Err(PerlError::ArityMismatch {
                expected: arity,
                got: self.args.len(),
            });
        }
        Ok(())
    }
}
