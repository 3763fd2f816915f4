//! Typed value wrappers
//!
//! [`PerlValue`] is the owning handle every wrapper is built on: it holds
//! exactly one reference on its value for as long as it lives. Cloning takes
//! another reference and dropping releases it. Wrappers are `!Send`; they
//! belong to the thread of their interpreter.
//!
//! Values crossing into host code without a static type are classified into
//! [`AnyPerl`] straight away.

mod array;
mod hash;
mod object;
mod scalar;
mod sub;

use std::fmt;
use std::mem::ManuallyDrop;

pub use array::{ArrayIter, PerlArray};
pub use hash::{HashIter, PerlHash};
pub use object::PerlObject;
pub use scalar::PerlScalar;
pub use sub::PerlSub;

use crate::context::SvContext;
use crate::interpreter::{self, PerlInterpreter};
use crate::object::{BridgedObject, ClassRegistry, RegisteredObject, bridged_instance};
use crate::raw::SvKind;
use crate::runtime::SvPtr;

/// Owning handle to a runtime value of any kind.
pub struct PerlValue {
    ctx: SvContext,
}

impl PerlValue {
    /// Adopt a reference the caller already owns.
    ///
    /// # Safety
    /// The caller must own one reference on the handle and gives it up.
    pub unsafe fn from_noinc(ctx: SvContext) -> Self {
        Self { ctx }
    }

    /// Take a new reference on a borrowed handle.
    ///
    /// # Safety
    /// The handle must be live.
    pub unsafe fn from_inc(ctx: SvContext) -> Self {
        unsafe { ctx.refcnt_inc() };
        Self { ctx }
    }

    /// Duplicate the value into a fresh allocation. Used for temporaries
    /// that must not be aliased.
    ///
    /// # Safety
    /// The handle must be live.
    pub unsafe fn from_copy(ctx: SvContext) -> Self {
        let copy = unsafe { ctx.interp().sv_dup_value(ctx.as_ptr()) };
        unsafe { Self::from_noinc(ctx.with(copy)) }
    }

    /// Context of the held handle, valid while `self` lives.
    pub(crate) fn context(&self) -> SvContext {
        self.ctx
    }

    /// Raw handle, still owned by `self`.
    pub fn as_ptr(&self) -> SvPtr {
        self.ctx.as_ptr()
    }

    /// Interpreter owning the value.
    pub fn interpreter(&self) -> PerlInterpreter {
        unsafe { PerlInterpreter::from_raw(self.ctx.perl()) }
    }

    /// Current reference count.
    pub fn refcnt(&self) -> u32 {
        self.ctx.refcnt()
    }

    /// Kind of the held value.
    pub fn kind(&self) -> SvKind {
        self.ctx.kind()
    }

    /// Give up ownership, returning the handle with its reference.
    pub fn into_raw(self) -> SvPtr {
        ManuallyDrop::new(self).ctx.as_ptr()
    }

    /// The handle with a new reference for the caller.
    pub fn to_owned_ptr(&self) -> SvPtr {
        unsafe { self.ctx.refcnt_inc() };
        self.ctx.as_ptr()
    }

    /// Short description for diagnostics.
    pub fn describe(&self) -> String {
        self.ctx.describe()
    }

    /// Classify by kind and, for objects, by class registration.
    pub fn into_any(self) -> AnyPerl {
        AnyPerl::from_value(self)
    }
}

impl Clone for PerlValue {
    fn clone(&self) -> Self {
        unsafe { Self::from_inc(self.ctx) }
    }
}

impl Drop for PerlValue {
    fn drop(&mut self) {
        // the interpreter may be gone already; leak rather than touch it
        if interpreter::is_alive(self.ctx.perl()) {
            unsafe { self.ctx.refcnt_dec() };
        }
    }
}

impl fmt::Debug for PerlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if interpreter::is_alive(self.ctx.perl()) {
            write!(f, "PerlValue({})", self.describe())
        } else {
            write!(f, "PerlValue({:?})", self.ctx.as_ptr())
        }
    }
}

impl fmt::Display for PerlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// A value classified at the boundary.
#[derive(Debug)]
pub enum AnyPerl {
    /// Plain scalar, references included
    Scalar(PerlScalar),
    /// Array
    Array(PerlArray),
    /// Hash
    Hash(PerlHash),
    /// Code
    Sub(PerlSub),
    /// Blessed reference with no host registration
    Object(PerlObject),
    /// Instance of a registered host class
    Registered(RegisteredObject),
    /// Host instance exposed to the interpreter
    Bridged(BridgedObject),
    /// Formats, io handles and unknown kinds
    Other(PerlValue),
}

impl AnyPerl {
    /// Classify an owned value.
    pub fn from_value(value: PerlValue) -> Self {
        match value.kind() {
            SvKind::Array => AnyPerl::Array(PerlArray::from_value_unchecked(value)),
            SvKind::Hash => AnyPerl::Hash(PerlHash::from_value_unchecked(value)),
            SvKind::Code => AnyPerl::Sub(PerlSub::from_value_unchecked(value)),
            SvKind::Scalar if value.context().is_object() => {
                let object = PerlObject::from_scalar_unchecked(PerlScalar::from_value_unchecked(value));
                if let Some(instance) = bridged_instance(&object) {
                    return AnyPerl::Bridged(BridgedObject::new(object, instance));
                }
                match ClassRegistry::global().resolve(object, None) {
                    Ok(registered) => AnyPerl::Registered(registered),
                    Err(object) => AnyPerl::Object(object),
                }
            }
            SvKind::Scalar => AnyPerl::Scalar(PerlScalar::from_value_unchecked(value)),
            SvKind::Format | SvKind::Io | SvKind::Unknown => AnyPerl::Other(value),
        }
    }

    /// Underlying owning handle.
    pub fn value(&self) -> &PerlValue {
        match self {
            AnyPerl::Scalar(scalar) => scalar.value(),
            AnyPerl::Array(array) => array.value(),
            AnyPerl::Hash(hash) => hash.value(),
            AnyPerl::Sub(sub) => sub.value(),
            AnyPerl::Object(object) => object.value(),
            AnyPerl::Registered(registered) => registered.object().value(),
            AnyPerl::Bridged(bridged) => bridged.object().value(),
            AnyPerl::Other(value) => value,
        }
    }

    /// Kind of the underlying value.
    pub fn kind(&self) -> SvKind {
        self.value().kind()
    }

    /// Defined value.
    pub fn defined(&self) -> bool {
        self.value().context().defined()
    }

    /// Integer scalar.
    pub fn is_integer(&self) -> bool {
        self.value().context().is_integer()
    }

    /// String scalar.
    pub fn is_string(&self) -> bool {
        self.value().context().is_string()
    }

    /// Reference, blessed or not.
    pub fn is_ref(&self) -> bool {
        self.value().context().is_ref()
    }

    /// Blessed reference.
    pub fn is_object(&self) -> bool {
        matches!(
            self,
            AnyPerl::Object(_) | AnyPerl::Registered(_) | AnyPerl::Bridged(_)
        )
    }

    /// What a reference points to, classified. `None` for non-references.
    pub fn referent(&self) -> Option<AnyPerl> {
        let target = self.value().context().referent()?;
        Some(unsafe { PerlValue::from_inc(target) }.into_any())
    }
}

impl From<PerlValue> for AnyPerl {
    fn from(value: PerlValue) -> Self {
        AnyPerl::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::EmbeddedPerl;

    fn adopt(perl: PerlInterpreter, sv: SvPtr) -> PerlValue {
        unsafe { PerlValue::from_noinc(SvContext::new(sv, perl.as_ptr())) }
    }

    #[test]
    fn test_format_and_io_classify_as_other() {
        let perl = EmbeddedPerl::new();
        let baseline = perl.live_values();

        let format = adopt(*perl, perl.raw().new_format());
        assert_eq!(format.kind(), SvKind::Format);
        let io = adopt(*perl, perl.raw().new_io());
        assert_eq!(io.kind(), SvKind::Io);

        for value in [format, io] {
            let kind = value.kind();
            match value.into_any() {
                AnyPerl::Other(other) => assert_eq!(other.kind(), kind),
                other => panic!("expected Other, got {other:?}"),
            }
        }
        assert_eq!(perl.live_values(), baseline);
    }

    #[test]
    fn test_reference_to_io_reports_kind() {
        let perl = EmbeddedPerl::new();
        let io = adopt(*perl, perl.raw().new_io());
        let reference = super::PerlScalar::new_ref(&io);
        assert_eq!(reference.referent().map(|any| any.kind()), Some(SvKind::Io));
        assert!(reference.string_unchecked().starts_with("IO(0x"));
    }
}
