use std::fmt;
use std::hash::{Hash, Hasher};

use super::{AnyPerl, PerlValue};
use crate::context::SvContext;
use crate::convert::{FromPerl, IntoPerl};
use crate::error::{PerlError, PerlResult};
use crate::interpreter::PerlInterpreter;
use crate::raw::SvKind;
use crate::runtime::GV_ADD;

/// A scalar: undef, a number, a string or a reference.
///
/// Equality and hashing follow the string value, so two distinct scalars
/// holding `"1"` and `1` compare equal.
#[derive(Clone)]
pub struct PerlScalar(PerlValue);

impl PerlScalar {
    pub(crate) fn from_value_unchecked(value: PerlValue) -> Self {
        Self(value)
    }

    /// Wrap an owning handle after checking it is a scalar.
    pub fn from_value(value: PerlValue) -> PerlResult<Self> {
        match value.kind() {
            SvKind::Scalar => Ok(Self(value)),
            _ => Err(PerlError::UnexpectedValueType {
                value,
                want: SvKind::Scalar,
            }),
        }
    }

    /// New undefined scalar.
    pub fn undef(perl: PerlInterpreter) -> Self {
        let sv = perl.raw().new_sv();
        Self(unsafe { PerlValue::from_noinc(perl.context(sv)) })
    }

    /// New scalar holding `value`.
    pub fn new<T: IntoPerl + ?Sized>(perl: PerlInterpreter, value: &T) -> Self {
        let sv = value.to_sv(perl);
        Self(unsafe { PerlValue::from_noinc(perl.context(sv)) })
    }

    /// New string scalar from raw bytes, flagged UTF-8 or not.
    pub fn from_bytes(perl: PerlInterpreter, bytes: &[u8], utf8: bool) -> Self {
        let sv = perl.raw().new_sv_pv(bytes, utf8);
        Self(unsafe { PerlValue::from_noinc(perl.context(sv)) })
    }

    /// New reference to `target`.
    pub fn new_ref(target: &PerlValue) -> Self {
        let ctx = target.context();
        let rv = unsafe { ctx.interp().new_rv_inc(ctx.as_ptr()) };
        Self(unsafe { PerlValue::from_noinc(ctx.with(rv)) })
    }

    /// Global `$name`, if it exists.
    pub fn global(perl: PerlInterpreter, name: &str) -> Option<Self> {
        let sv = perl.raw().get_sv(name, 0)?;
        Some(Self(unsafe { PerlValue::from_inc(perl.context(sv)) }))
    }

    /// Global `$name`, created when missing.
    pub fn global_creating(perl: PerlInterpreter, name: &str) -> Self {
        let sv = perl.raw().get_sv(name, GV_ADD).unwrap_or_else(|| perl.raw().new_sv());
        Self(unsafe { PerlValue::from_inc(perl.context(sv)) })
    }

    /// Owning handle.
    pub fn value(&self) -> &PerlValue {
        &self.0
    }

    /// Unwrap the owning handle.
    pub fn into_value(self) -> PerlValue {
        self.0
    }

    pub(crate) fn context(&self) -> SvContext {
        self.0.context()
    }

    /// Interpreter owning the value.
    pub fn interpreter(&self) -> PerlInterpreter {
        self.0.interpreter()
    }

    // ----- inspection -----

    /// Defined value.
    pub fn defined(&self) -> bool {
        self.context().defined()
    }

    /// Holds an integer.
    pub fn is_integer(&self) -> bool {
        self.context().is_integer()
    }

    /// Holds a float.
    pub fn is_double(&self) -> bool {
        self.context().is_double()
    }

    /// Holds a string.
    pub fn is_string(&self) -> bool {
        self.context().is_string()
    }

    /// String is flagged UTF-8.
    pub fn is_utf8(&self) -> bool {
        self.context().is_utf8()
    }

    /// Is a reference.
    pub fn is_ref(&self) -> bool {
        self.context().is_ref()
    }

    /// Is a blessed reference.
    pub fn is_object(&self) -> bool {
        self.context().is_object()
    }

    /// Truthiness.
    pub fn is_true(&self) -> bool {
        self.context().is_true()
    }

    /// Class of the referenced object.
    pub fn class_name(&self) -> Option<String> {
        self.context().class_name()
    }

    /// What the reference points to, classified.
    pub fn referent(&self) -> Option<AnyPerl> {
        let target = self.context().referent()?;
        Some(unsafe { PerlValue::from_inc(target) }.into_any())
    }

    // ----- conversion -----

    /// Convert to any host type.
    pub fn get<T: FromPerl>(&self) -> PerlResult<T> {
        T::from_sv_inc(self.context())
    }

    /// Strict signed integer.
    pub fn try_i64(&self) -> PerlResult<i64> {
        self.context().try_i64()
    }

    /// Strict unsigned integer.
    pub fn try_u64(&self) -> PerlResult<u64> {
        self.context().try_u64()
    }

    /// Strict float.
    pub fn try_f64(&self) -> PerlResult<f64> {
        self.context().try_f64()
    }

    /// Strict string.
    pub fn try_string(&self) -> PerlResult<String> {
        self.context().try_string()
    }

    /// Strict byte string with its UTF-8 flag.
    pub fn try_bytes(&self) -> PerlResult<(Vec<u8>, bool)> {
        self.context().try_bytes()
    }

    /// Signed integer, `0` on failure.
    pub fn i64_unchecked(&self) -> i64 {
        self.context().i64_unchecked()
    }

    /// Unsigned integer, `0` on failure.
    pub fn u64_unchecked(&self) -> u64 {
        self.context().u64_unchecked()
    }

    /// Float, `0.0` on failure.
    pub fn f64_unchecked(&self) -> f64 {
        self.context().f64_unchecked()
    }

    /// String, empty for undef.
    pub fn string_unchecked(&self) -> String {
        self.context().string_unchecked()
    }

    /// Apply `f` to a defined value; `None` for undef.
    pub fn map<T>(&self, f: impl FnOnce(&Self) -> PerlResult<T>) -> PerlResult<Option<T>> {
        if self.defined() { f(self).map(Some) } else { Ok(None) }
    }

    /// Convert a defined value, or fall back to `default` for undef.
    pub fn or_else<T: FromPerl>(&self, default: impl FnOnce() -> T) -> PerlResult<T> {
        if self.defined() { self.get() } else { Ok(default()) }
    }

    // ----- assignment -----

    /// Assign any host value, as `$x = value`.
    pub fn set<T: IntoPerl + ?Sized>(&self, value: &T) {
        let perl = self.interpreter();
        let fresh = value.to_sv(perl);
        unsafe {
            perl.raw().sv_setsv(self.0.as_ptr(), fresh);
            perl.raw().sv_refcnt_dec(fresh);
        }
    }

    /// Assign a signed integer.
    pub fn set_i64(&self, value: i64) {
        unsafe { self.context().interp().sv_setiv(self.0.as_ptr(), value) }
    }

    /// Assign an unsigned integer.
    pub fn set_u64(&self, value: u64) {
        unsafe { self.context().interp().sv_setuv(self.0.as_ptr(), value) }
    }

    /// Assign a float.
    pub fn set_f64(&self, value: f64) {
        unsafe { self.context().interp().sv_setnv(self.0.as_ptr(), value) }
    }

    /// Assign a string.
    pub fn set_string(&self, value: &str) {
        unsafe {
            self.context()
                .interp()
                .sv_setpvn(self.0.as_ptr(), value.as_bytes(), !value.is_ascii())
        }
    }

    /// Assign raw bytes.
    pub fn set_bytes(&self, bytes: &[u8], utf8: bool) {
        unsafe { self.context().interp().sv_setpvn(self.0.as_ptr(), bytes, utf8) }
    }

    /// Assign a boolean.
    pub fn set_bool(&self, value: bool) {
        unsafe { self.context().interp().sv_setbool(self.0.as_ptr(), value) }
    }

    /// Make undefined.
    pub fn set_undef(&self) {
        unsafe { self.context().interp().sv_set_undef(self.0.as_ptr()) }
    }

    /// Make a reference to `target`.
    pub fn set_ref(&self, target: &PerlValue) {
        unsafe {
            self.context()
                .interp()
                .sv_setrv_inc(self.0.as_ptr(), target.as_ptr())
        }
    }
}

impl PartialEq for PerlScalar {
    fn eq(&self, other: &Self) -> bool {
        self.context().str_eq(&other.context())
    }
}

impl Eq for PerlScalar {}

impl Hash for PerlScalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.context().str_hash());
    }
}

impl fmt::Debug for PerlScalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PerlScalar").field(&self.0).finish()
    }
}

impl fmt::Display for PerlScalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string_unchecked())
    }
}

impl TryFrom<&PerlScalar> for i64 {
    type Error = PerlError;

    fn try_from(scalar: &PerlScalar) -> PerlResult<Self> {
        scalar.try_i64()
    }
}

impl TryFrom<&PerlScalar> for u64 {
    type Error = PerlError;

    fn try_from(scalar: &PerlScalar) -> PerlResult<Self> {
        scalar.try_u64()
    }
}

impl TryFrom<&PerlScalar> for f64 {
    type Error = PerlError;

    fn try_from(scalar: &PerlScalar) -> PerlResult<Self> {
        scalar.try_f64()
    }
}

impl TryFrom<&PerlScalar> for String {
    type Error = PerlError;

    fn try_from(scalar: &PerlScalar) -> PerlResult<Self> {
        scalar.try_string()
    }
}

impl From<&PerlScalar> for bool {
    fn from(scalar: &PerlScalar) -> Self {
        scalar.is_true()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::EmbeddedPerl;

    #[test]
    fn test_strict_and_unchecked_side_by_side() {
        let perl = EmbeddedPerl::new();
        let text = PerlScalar::new(*perl, "50sec");
        assert!(matches!(text.try_i64(), Err(PerlError::NotNumber { want: "i64", .. })));
        assert_eq!(text.i64_unchecked(), 50);

        let undef = PerlScalar::undef(*perl);
        assert!(matches!(undef.try_string(), Err(PerlError::UnexpectedUndef(_))));
        assert_eq!(undef.string_unchecked(), "");
        assert_eq!(undef.map(|s| s.try_i64()).unwrap(), None);
        assert_eq!(undef.or_else(|| 7i64).unwrap(), 7);
    }

    #[test]
    fn test_equality_by_string_value() {
        let perl = EmbeddedPerl::new();
        let number = PerlScalar::new(*perl, &1i64);
        let text = PerlScalar::new(*perl, "1");
        assert_ne!(number.value().as_ptr(), text.value().as_ptr());
        assert_eq!(number, text);
        assert_ne!(number, PerlScalar::new(*perl, "1.0"));
    }

    #[test]
    fn test_setters_keep_identity() {
        let perl = EmbeddedPerl::new();
        let scalar = PerlScalar::undef(*perl);
        let alias = scalar.clone();
        scalar.set_i64(5);
        assert_eq!(alias.try_i64().unwrap(), 5);
        scalar.set(&"text");
        assert_eq!(alias.try_string().unwrap(), "text");
        scalar.set_undef();
        assert!(!alias.defined());
    }
}
