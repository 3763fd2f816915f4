use std::fmt;

use super::{PerlScalar, PerlValue};
use crate::convert::{FromPerl, IntoPerl};
use crate::error::{PerlError, PerlResult};
use crate::interpreter::PerlInterpreter;
use crate::stack::{self, CallContext, CallTarget};

/// A blessed reference with no host type attached.
#[derive(Clone)]
pub struct PerlObject(PerlScalar);

impl PerlObject {
    pub(crate) fn from_scalar_unchecked(scalar: PerlScalar) -> Self {
        Self(scalar)
    }

    /// Wrap a scalar after checking it is a blessed reference.
    pub fn from_scalar(scalar: PerlScalar) -> PerlResult<Self> {
        if scalar.is_object() {
            Ok(Self(scalar))
        } else {
            Err(PerlError::NotObject(scalar.into_value()))
        }
    }

    /// Call the class-method constructor `Class->new(args)`.
    pub fn construct(perl: PerlInterpreter, class: &str, args: &[&dyn IntoPerl]) -> PerlResult<Self> {
        Self::construct_with(perl, class, "new", args)
    }

    /// Call a named class-method constructor and check the result is an
    /// object.
    pub fn construct_with(
        perl: PerlInterpreter,
        class: &str,
        constructor: &str,
        args: &[&dyn IntoPerl],
    ) -> PerlResult<Self> {
        let mut full: Vec<&dyn IntoPerl> = Vec::with_capacity(args.len() + 1);
        full.push(&class);
        full.extend_from_slice(args);
        let scalar: PerlScalar = stack::call(
            perl,
            CallTarget::Method(constructor),
            &full,
            CallContext::Scalar,
            stack::collect_scalar,
        )?;
        Self::from_scalar(scalar)
    }

    /// Owning handle of the reference.
    pub fn value(&self) -> &PerlValue {
        self.0.value()
    }

    /// The reference as a plain scalar.
    pub fn as_scalar(&self) -> &PerlScalar {
        &self.0
    }

    /// Unwrap the reference.
    pub fn into_scalar(self) -> PerlScalar {
        self.0
    }

    /// Interpreter owning the object.
    pub fn interpreter(&self) -> PerlInterpreter {
        self.0.interpreter()
    }

    /// Class the referent is blessed into.
    pub fn class_name(&self) -> String {
        self.0.class_name().unwrap_or_default()
    }

    /// Whether the object's class is `class` or inherits from it.
    pub fn isa(&self, class: &str) -> bool {
        self.0.context().derived_from(class)
    }

    /// Whether the class has a method `name`, inherited or not.
    pub fn can(&self, name: &str) -> bool {
        self.interpreter()
            .raw()
            .find_method(&self.class_name(), name)
            .is_some()
    }

    /// Call a method in scalar context and convert the result.
    pub fn call_method_scalar<T: FromPerl>(&self, name: &str, args: &[&dyn IntoPerl]) -> PerlResult<T> {
        self.invoke(name, args, CallContext::Scalar, stack::collect_scalar)
    }

    /// Call a method in list context.
    pub fn call_method_list(&self, name: &str, args: &[&dyn IntoPerl]) -> PerlResult<Vec<PerlScalar>> {
        self.invoke(name, args, CallContext::List, stack::collect_list)
    }

    /// Call a method in void context.
    pub fn call_method_void(&self, name: &str, args: &[&dyn IntoPerl]) -> PerlResult<()> {
        self.invoke(name, args, CallContext::Void, stack::collect_list)
            .map(drop)
    }

    fn invoke<R>(
        &self,
        name: &str,
        args: &[&dyn IntoPerl],
        context: CallContext,
        collect: impl FnOnce(&[crate::context::SvContext]) -> PerlResult<R>,
    ) -> PerlResult<R> {
        let mut full: Vec<&dyn IntoPerl> = Vec::with_capacity(args.len() + 1);
        full.push(&self.0);
        full.extend_from_slice(args);
        stack::call(
            self.interpreter(),
            CallTarget::Method(name),
            &full,
            context,
            collect,
        )
    }
}

impl fmt::Debug for PerlObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PerlObject").field(self.0.value()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::EmbeddedPerl;
    use crate::value::PerlHash;

    #[test]
    fn test_from_scalar_rejects_plain_reference() {
        let perl = EmbeddedPerl::new();
        let hash = PerlHash::new(*perl);
        let err = PerlObject::from_scalar(hash.to_ref()).unwrap_err();
        assert!(matches!(err, PerlError::NotObject(_)));
    }

    #[test]
    fn test_blessed_reference_reports_class() {
        let perl = EmbeddedPerl::new();
        let scalar: PerlScalar = perl.eval("bless {}, 'Counter'").unwrap();
        let object = PerlObject::from_scalar(scalar).unwrap();
        assert_eq!(object.class_name(), "Counter");
        assert!(object.isa("Counter"));
        assert!(!object.isa("Other"));
        assert!(!object.can("missing"));
    }

    #[test]
    fn test_missing_method_is_died_error() {
        let perl = EmbeddedPerl::new();
        let scalar: PerlScalar = perl.eval("bless [], 'Empty'").unwrap();
        let object = PerlObject::from_scalar(scalar).unwrap();
        let err = object.call_method_void("frobnicate", &[]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Can't locate object method \"frobnicate\""), "{message}");
    }
}
