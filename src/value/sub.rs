use std::fmt;

use super::{PerlScalar, PerlValue};
use crate::context::CvContext;
use crate::convert::{FromPerl, IntoPerl};
use crate::error::{PerlError, PerlResult};
use crate::interpreter::PerlInterpreter;
use crate::raw::SvKind;
use crate::stack::{self, CallContext, CallTarget};

/// A sub. The same sub may return different things depending on the
/// context it is called in, so every call names one.
#[derive(Clone)]
pub struct PerlSub(PerlValue);

impl PerlSub {
    pub(crate) fn from_value_unchecked(value: PerlValue) -> Self {
        Self(value)
    }

    /// Wrap an owning handle after checking it is code.
    pub fn from_value(value: PerlValue) -> PerlResult<Self> {
        match value.kind() {
            SvKind::Code => Ok(Self(value)),
            _ => Err(PerlError::UnexpectedValueType {
                value,
                want: SvKind::Code,
            }),
        }
    }

    /// Named sub `&name`, if defined.
    pub fn global(perl: PerlInterpreter, name: &str) -> Option<Self> {
        let cv = perl.raw().get_cv(name, 0)?;
        Some(Self(unsafe { PerlValue::from_inc(perl.context(cv)) }))
    }

    /// Owning handle.
    pub fn value(&self) -> &PerlValue {
        &self.0
    }

    /// Unwrap the owning handle.
    pub fn into_value(self) -> PerlValue {
        self.0
    }

    fn cv(&self) -> CvContext {
        match self.0.context().as_cv() {
            Some(cv) => cv,
            None => unreachable!("PerlSub holds a non-code value"),
        }
    }

    /// Qualified name; `None` for anonymous subs.
    pub fn name(&self) -> Option<String> {
        self.cv().name()
    }

    /// File the sub was declared in.
    pub fn file(&self) -> Option<String> {
        self.cv().file()
    }

    /// Whether the sub has a body. Declared-only subs croak when called.
    pub fn is_defined(&self) -> bool {
        self.cv().is_defined()
    }

    /// Call in scalar context and convert the result.
    pub fn call_scalar<T: FromPerl>(&self, args: &[&dyn IntoPerl]) -> PerlResult<T> {
        stack::call(
            self.0.interpreter(),
            CallTarget::Sv(self.0.as_ptr()),
            args,
            CallContext::Scalar,
            stack::collect_scalar,
        )
    }

    /// Call in list context.
    pub fn call_list(&self, args: &[&dyn IntoPerl]) -> PerlResult<Vec<PerlScalar>> {
        self.call(args, CallContext::List)
    }

    /// Call in void context.
    pub fn call_void(&self, args: &[&dyn IntoPerl]) -> PerlResult<()> {
        self.call(args, CallContext::Void).map(drop)
    }

    /// Call in `context`. Scalar context yields exactly one value.
    pub fn call(&self, args: &[&dyn IntoPerl], context: CallContext) -> PerlResult<Vec<PerlScalar>> {
        stack::call(
            self.0.interpreter(),
            CallTarget::Sv(self.0.as_ptr()),
            args,
            context,
            stack::collect_list,
        )
    }

    /// New reference to this sub.
    pub fn to_ref(&self) -> PerlScalar {
        PerlScalar::new_ref(&self.0)
    }
}

impl fmt::Debug for PerlSub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "PerlSub(&{name})"),
            None => write!(f, "PerlSub(__ANON__)"),
        }
    }
}
