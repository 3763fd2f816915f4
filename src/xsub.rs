//! Native subs backed by host closures
//!
//! A closure of up to five [`FromPerl`] parameters returning
//! `Result<R, E>` becomes a sub with [`PerlSub::new`] or
//! [`PerlSub::new_named`]. Every call unpacks the stack into the
//! parameters, runs the closure and pushes the results back as mortals.
//! Trailing `Option` parameters may be left out by the caller.
//!
//! Nothing fails silently: an arity mismatch, a conversion failure, an
//! `Err` from the closure and a host panic all raise an exception at the
//! call site. A [`PerlError::Died`] is re-raised with its original value.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::convert::{FromPerl, IntoPerl};
use crate::error::{PerlError, PerlResult};
use crate::interpreter::PerlInterpreter;
use crate::runtime::{Croak, InterpPtr, SvPtr};
use crate::stack::{CallContext, XSubStack};
use crate::value::{PerlScalar, PerlSub, PerlValue};

type XsBody = Box<dyn Fn(&XSubStack) -> PerlResult<Vec<SvPtr>>>;

/// Values a native sub can return. A single value pushes one result, `()`
/// none, tuples and [`List`] one per element.
pub trait XsReturn {
    /// Owned handles, one per result.
    fn into_values(self, perl: PerlInterpreter) -> Vec<SvPtr>;
}

impl<T: IntoPerl> XsReturn for T {
    fn into_values(self, perl: PerlInterpreter) -> Vec<SvPtr> {
        vec![self.to_sv(perl)]
    }
}

impl XsReturn for () {
    fn into_values(self, _perl: PerlInterpreter) -> Vec<SvPtr> {
        Vec::new()
    }
}

/// Several results of one type, returned as a flat list rather than an
/// array reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct List<T>(pub Vec<T>);

impl<T: IntoPerl> XsReturn for List<T> {
    fn into_values(self, perl: PerlInterpreter) -> Vec<SvPtr> {
        self.0.iter().map(|value| value.to_sv(perl)).collect()
    }
}

impl<T> From<Vec<T>> for List<T> {
    fn from(values: Vec<T>) -> Self {
        List(values)
    }
}

macro_rules! tuple_return {
    ($($name:ident),+) => {
        impl<$($name: IntoPerl),+> XsReturn for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_values(self, perl: PerlInterpreter) -> Vec<SvPtr> {
                let ($($name,)+) = self;
                vec![$($name.to_sv(perl)),+]
            }
        }
    };
}

tuple_return!(A, B);
tuple_return!(A, B, C);
tuple_return!(A, B, C, D);

/// Host closures callable as native subs. `Args` is the parameter tuple;
/// it only exists to tell the arities apart.
pub trait XsClosure<Args>: 'static {
    /// Declared number of parameters.
    const ARITY: usize;

    /// Unpack the arguments, run the closure and convert its results.
    fn invoke(&self, stack: &XSubStack) -> PerlResult<Vec<SvPtr>>;
}

macro_rules! xs_closure {
    ($arity:expr; $($arg:ident $index:tt),*) => {
        impl<Func, R, E, $($arg),*> XsClosure<($($arg,)*)> for Func
        where
            Func: Fn($($arg),*) -> Result<R, E> + 'static,
            R: XsReturn,
            E: Into<PerlError>,
            $($arg: FromPerl,)*
        {
            const ARITY: usize = $arity;

            fn invoke(&self, stack: &XSubStack) -> PerlResult<Vec<SvPtr>> {
                stack.check_arity($arity)?;
                let result = (self)($(stack.arg::<$arg>($index)?),*).map_err(Into::into)?;
                Ok(result.into_values(stack.interpreter()))
            }
        }
    };
}

xs_closure!(0;);
xs_closure!(1; A 0);
xs_closure!(2; A 0, B 1);
xs_closure!(3; A 0, B 1, C 2);
xs_closure!(4; A 0, B 1, C 2, D 3);
xs_closure!(5; A 0, B 1, C 2, D 3, E5 4);

impl PerlSub {
    /// Anonymous sub running `body`.
    pub fn new<Args, F: XsClosure<Args>>(perl: PerlInterpreter, body: F) -> Self {
        Self::install(perl, None, Box::new(move |stack| body.invoke(stack)))
    }

    /// Sub `&name` running `body`, replacing any previous definition.
    pub fn new_named<Args, F: XsClosure<Args>>(perl: PerlInterpreter, name: &str, body: F) -> Self {
        Self::install(perl, Some(name), Box::new(move |stack| body.invoke(stack)))
    }

    /// Sub taking any number of arguments. `body` receives copies of them and
    /// the context it was called in.
    pub fn new_variadic<F, E>(perl: PerlInterpreter, name: Option<&str>, body: F) -> Self
    where
        F: Fn(Vec<PerlScalar>, CallContext) -> Result<Vec<PerlScalar>, E> + 'static,
        E: Into<PerlError>,
    {
        Self::install(
            perl,
            name,
            Box::new(move |stack| {
                let results = body(stack.scalars(), stack.context()).map_err(Into::into)?;
                Ok(results
                    .into_iter()
                    .map(|scalar| scalar.into_value().into_raw())
                    .collect())
            }),
        )
    }

    fn install(perl: PerlInterpreter, name: Option<&str>, body: XsBody) -> Self {
        let interp = perl.raw();
        let cv = interp.new_xs(name, trampoline, file!());
        let body: Rc<dyn Any> = Rc::new(body);
        unsafe { interp.cv_set_any(cv, body) };
        let ctx = perl.context(cv);
        let value = match name {
            // the glob keeps the only reference
            Some(name) => {
                tracing::debug!(sub = name, "native sub installed");
                unsafe { PerlValue::from_inc(ctx) }
            }
            None => unsafe { PerlValue::from_noinc(ctx) },
        };
        PerlSub::from_value_unchecked(value)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

unsafe fn trampoline(perl: InterpPtr, cv: SvPtr) {
    let interp = unsafe { perl.as_ref() };
    let handle = unsafe { PerlInterpreter::from_raw(perl) };
    let mark = interp.pop_mark();
    let context = CallContext::from_flags(interp.gimme());
    let args = interp.stack_slice(mark);
    let name = unsafe { interp.cv_name(cv) }.unwrap_or_else(|| "__ANON__".to_string());

    let body = unsafe { interp.cv_any(cv) }.and_then(|any| any.downcast::<XsBody>().ok());
    let Some(body) = body else {
        interp.croak(&format!("native sub {name} has no body\n"));
    };

    let stack = XSubStack::new(handle, args, context);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&stack)));
    drop(stack);
    drop(body);

    match outcome {
        Ok(Ok(values)) => {
            interp.stack_truncate(mark);
            interp.stack_extend(values.len());
            for sv in values {
                interp.stack_push(interp.sv_2mortal(sv));
            }
        }
        Ok(Err(PerlError::Died(value))) => {
            tracing::debug!(sub = %name, "native sub re-raised an exception");
            let err = interp.sv_2mortal(value.into_value().into_raw());
            unsafe { interp.croak_sv(err) }
        }
        Ok(Err(err)) => {
            tracing::debug!(sub = %name, error = %err, "native sub failed");
            let message = format!("{name}: {err}");
            interp.croak(&format!("{}\n", message.trim_end_matches('\n')))
        }
        Err(payload) if payload.is::<Croak>() => panic::resume_unwind(payload),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(sub = %name, panic = %message, "native sub panicked");
            interp.croak(&format!("{name} panicked: {message}\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::EmbeddedPerl;

    #[test]
    fn test_typed_closure_round_trip() {
        let perl = EmbeddedPerl::new();
        PerlSub::new_named(*perl, "add", |a: i64, b: i64| Ok::<_, PerlError>(a + b));
        assert_eq!(perl.eval::<i64>("add(2, 40)").unwrap(), 42);
    }

    #[test]
    fn test_optional_trailing_argument() {
        let perl = EmbeddedPerl::new();
        PerlSub::new_named(*perl, "greet", |name: String, greeting: Option<String>| {
            Ok::<_, PerlError>(format!("{}, {name}", greeting.as_deref().unwrap_or("hello")))
        });
        assert_eq!(perl.eval::<String>("greet('ann')").unwrap(), "hello, ann");
        assert_eq!(perl.eval::<String>("greet('ann', 'hi')").unwrap(), "hi, ann");
        let err = perl.eval::<String>("greet()").unwrap_err();
        assert!(err.to_string().contains("no argument on the stack at position 0"), "{err}");
    }

    #[test]
    fn test_arity_mismatch_raises() {
        let perl = EmbeddedPerl::new();
        PerlSub::new_named(*perl, "one", |a: i64| Ok::<_, PerlError>(a));
        let err = perl.eval::<i64>("one(1, 2)").unwrap_err();
        assert!(matches!(err, PerlError::Died(_)));
        assert!(err.to_string().contains("expected at most 1, got 2"), "{err}");
    }

    #[test]
    fn test_host_error_and_panic_surface() {
        let perl = EmbeddedPerl::new();
        PerlSub::new_named(*perl, "fails", || -> anyhow::Result<i64> {
            anyhow::bail!("disk on fire")
        });
        PerlSub::new_named(*perl, "panics", || -> Result<(), PerlError> {
            panic!("unreachable state")
        });
        let err = perl.eval::<i64>("fails()").unwrap_err();
        assert!(err.to_string().contains("disk on fire"), "{err}");
        let err = perl.eval_void("panics()").unwrap_err();
        assert!(err.to_string().contains("panicked: unreachable state"), "{err}");
    }

    #[test]
    fn test_died_value_is_preserved() {
        let perl = EmbeddedPerl::new();
        PerlSub::new_named(*perl, "rethrow", |err: PerlScalar| {
            Err::<(), _>(PerlError::Died(err))
        });
        let err = perl.eval_void("rethrow({ code => 7 })").unwrap_err();
        let value = err.died_value().unwrap();
        let code: Option<i64> = value.get::<crate::value::PerlHash>().unwrap().fetch("code").unwrap();
        assert_eq!(code, Some(7));
    }

    #[test]
    fn test_multiple_returns_follow_context() {
        let perl = EmbeddedPerl::new();
        PerlSub::new_named(*perl, "abc", || Ok::<_, PerlError>(("a", "b", "c")));
        PerlSub::new_named(*perl, "numbers", || Ok::<_, PerlError>(List(vec![1i64, 2, 3])));
        assert_eq!(perl.eval::<String>("abc()").unwrap(), "c");
        let list = perl.eval_list("abc()").unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].try_string().unwrap(), "a");
        assert_eq!(perl.eval_list("numbers()").unwrap().len(), 3);
    }

    #[test]
    fn test_variadic_sees_context() {
        let perl = EmbeddedPerl::new();
        let sub = PerlSub::new_variadic(*perl, None, |args, context| {
            let perl = PerlInterpreter::current().ok_or_else(|| PerlError::msg("no interpreter"))?;
            let tag = match context {
                CallContext::List => "list",
                CallContext::Scalar => "scalar",
                CallContext::Void => "void",
            };
            Ok::<_, PerlError>(vec![
                PerlScalar::new(perl, &(args.len() as i64)),
                PerlScalar::new(perl, tag),
            ])
        });
        assert_eq!(sub.call_scalar::<String>(&[&1i64, &2i64]).unwrap(), "scalar");
        let list = sub.call_list(&[&"x"]).unwrap();
        assert_eq!(list[0].try_i64().unwrap(), 1);
        assert_eq!(list[1].try_string().unwrap(), "list");
        assert!(sub.name().is_none());
    }
}
