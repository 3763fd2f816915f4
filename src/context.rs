//! Reference-counted context layer
//!
//! A context pairs a raw handle with the interpreter that owns it. Contexts
//! are `Copy` and carry no ownership; the owning wrappers in
//! [`crate::value`] hold one and are the only callers of
//! [`SvContext::refcnt_inc`] and [`SvContext::refcnt_dec`].
//!
//! Outside this crate a context is only obtained through the `unsafe`
//! constructors or as the argument of [`FromPerl`](crate::convert::FromPerl),
//! where it is borrowed for the call. The safe readers rely on that.
//!
//! Conversions come in two flavours kept side by side: strict `try_*`
//! readers that fail with a [`PerlError`] naming the value and the wanted
//! type, and `*_unchecked` readers that return the runtime's own fallback
//! (`0`, `""`).

use crate::error::{PerlError, PerlResult};
use crate::raw::{AvCollection, HvCollection, SvKind};
use crate::runtime::hv::perl_hash;
use crate::runtime::numeric::{self, Numeric};
use crate::runtime::{InterpPtr, Interpreter, SvPtr};
use crate::value::PerlValue;

/// A handle and its interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SvContext {
    sv: SvPtr,
    perl: InterpPtr,
}

/// An array handle and its interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvContext {
    av: SvPtr,
    perl: InterpPtr,
}

/// A hash handle and its interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HvContext {
    hv: SvPtr,
    perl: InterpPtr,
}

/// A code handle and its interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CvContext {
    cv: SvPtr,
    perl: InterpPtr,
}

const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

impl SvContext {
    /// # Safety
    /// `sv` must be live and owned by `perl` for as long as the context is
    /// used.
    pub unsafe fn new(sv: SvPtr, perl: InterpPtr) -> Self {
        Self { sv, perl }
    }

    /// Raw handle.
    pub fn as_ptr(&self) -> SvPtr {
        self.sv
    }

    /// Owning interpreter.
    pub fn perl(&self) -> InterpPtr {
        self.perl
    }

    pub(crate) fn interp(&self) -> &Interpreter {
        unsafe { self.perl.as_ref() }
    }

    /// Same interpreter, another handle.
    ///
    /// # Safety
    /// As for [`SvContext::new`].
    pub unsafe fn with(&self, sv: SvPtr) -> Self {
        Self { sv, perl: self.perl }
    }

    /// Current reference count.
    pub fn refcnt(&self) -> u32 {
        unsafe { self.interp().sv_refcnt(self.sv) }
    }

    /// Take one reference.
    ///
    /// # Safety
    /// The caller becomes responsible for releasing it.
    pub unsafe fn refcnt_inc(&self) {
        unsafe { self.interp().sv_refcnt_inc(self.sv) };
    }

    /// Release one reference.
    ///
    /// # Safety
    /// The caller must own the reference; the handle may be freed.
    pub unsafe fn refcnt_dec(&self) {
        unsafe { self.interp().sv_refcnt_dec(self.sv) };
    }

    /// Kind from the type tag.
    pub fn kind(&self) -> SvKind {
        SvKind::from_tag(unsafe { self.interp().sv_type(self.sv) })
    }

    /// Reinterpret as an array after checking the tag.
    pub fn as_av(&self) -> Option<AvContext> {
        (self.kind() == SvKind::Array).then_some(AvContext {
            av: self.sv,
            perl: self.perl,
        })
    }

    /// Reinterpret as a hash after checking the tag.
    pub fn as_hv(&self) -> Option<HvContext> {
        (self.kind() == SvKind::Hash).then_some(HvContext {
            hv: self.sv,
            perl: self.perl,
        })
    }

    /// Reinterpret as code after checking the tag.
    pub fn as_cv(&self) -> Option<CvContext> {
        (self.kind() == SvKind::Code).then_some(CvContext {
            cv: self.sv,
            perl: self.perl,
        })
    }

    /// Referent of a reference, without taking a count.
    pub fn referent(&self) -> Option<SvContext> {
        let target = unsafe { self.interp().sv_rv(self.sv) }?;
        Some(Self {
            sv: target,
            perl: self.perl,
        })
    }

    /// Follow a reference.
    pub fn deref(&self) -> PerlResult<SvContext> {
        self.referent()
            .ok_or_else(|| PerlError::NotReference(self.retain()))
    }

    /// Follow a reference when there is one, otherwise stay put. Used when
    /// a container may arrive either directly or by reference.
    pub fn deref_or_self(&self) -> SvContext {
        self.referent().unwrap_or(*self)
    }

    /// Owning handle with a fresh reference, for error reporting.
    pub(crate) fn retain(&self) -> PerlValue {
        unsafe { PerlValue::from_inc(*self) }
    }

    // ----- predicates -----

    /// Defined value (get-magic applies).
    pub fn defined(&self) -> bool {
        unsafe { self.interp().sv_ok(self.sv) }
    }

    /// Integer slot is valid.
    pub fn is_integer(&self) -> bool {
        unsafe { self.interp().sv_iok(self.sv) }
    }

    /// Float slot is valid.
    pub fn is_double(&self) -> bool {
        unsafe { self.interp().sv_nok(self.sv) }
    }

    /// String slot is valid.
    pub fn is_string(&self) -> bool {
        unsafe { self.interp().sv_pok(self.sv) }
    }

    /// String slot carries the UTF-8 flag.
    pub fn is_utf8(&self) -> bool {
        unsafe { self.interp().sv_utf8(self.sv) }
    }

    /// Reference.
    pub fn is_ref(&self) -> bool {
        unsafe { self.interp().sv_rok(self.sv) }
    }

    /// Blessed reference.
    pub fn is_object(&self) -> bool {
        unsafe { self.interp().sv_isobject(self.sv) }
    }

    /// Class of the referenced object.
    pub fn class_name(&self) -> Option<String> {
        unsafe { self.interp().sv_object_class(self.sv) }
    }

    /// Whether the value (object or class name) derives from `class`.
    pub fn derived_from(&self, class: &str) -> bool {
        unsafe { self.interp().sv_derived_from(self.sv, class) }
    }

    /// Truthiness.
    pub fn is_true(&self) -> bool {
        unsafe { self.interp().sv_true(self.sv) }
    }

    // ----- unchecked conversions -----

    /// Signed integer, `0` when not numeric.
    pub fn i64_unchecked(&self) -> i64 {
        unsafe { self.interp().sv_2iv(self.sv) }
    }

    /// Unsigned integer, `0` when not numeric.
    pub fn u64_unchecked(&self) -> u64 {
        unsafe { self.interp().sv_2uv(self.sv) }
    }

    /// Float, `0.0` when not numeric.
    pub fn f64_unchecked(&self) -> f64 {
        unsafe { self.interp().sv_2nv(self.sv) }
    }

    /// String bytes and the UTF-8 flag, empty for undef.
    pub fn bytes_unchecked(&self) -> (Vec<u8>, bool) {
        unsafe { self.interp().sv_2pv(self.sv) }
    }

    /// String, lossily decoded, empty for undef.
    pub fn string_unchecked(&self) -> String {
        unsafe { self.interp().sv_2pv_string(self.sv) }
    }

    // ----- strict conversions -----

    fn strict_numeric(&self, want: &'static str) -> PerlResult<Numeric> {
        let not_number = || PerlError::NotNumber {
            value: self.retain(),
            want,
        };
        if !self.defined() {
            return Err(PerlError::UnexpectedUndef(self.retain()));
        }
        if self.kind() != SvKind::Scalar || self.is_ref() {
            return Err(not_number());
        }
        if self.is_integer() || self.is_double() {
            return Ok(unsafe { self.interp().sv_numeric(self.sv) });
        }
        if self.is_string() {
            let (bytes, _) = self.bytes_unchecked();
            return numeric::grok_number(&bytes).ok_or_else(not_number);
        }
        Err(not_number())
    }

    /// Signed integer. Floats are truncated toward zero; strings must be
    /// entirely numeric.
    pub fn try_i64(&self) -> PerlResult<i64> {
        let out_of_range = || PerlError::NotNumber {
            value: self.retain(),
            want: "i64",
        };
        match self.strict_numeric("i64")? {
            Numeric::Int(value) => Ok(value),
            Numeric::UInt(value) => i64::try_from(value).map_err(|_| out_of_range()),
            Numeric::Float(value) if value.is_finite() && value >= -TWO_POW_63 && value < TWO_POW_63 => {
                Ok(value as i64)
            }
            Numeric::Float(_) => Err(out_of_range()),
        }
    }

    /// Unsigned integer. Negative values are rejected.
    pub fn try_u64(&self) -> PerlResult<u64> {
        let out_of_range = || PerlError::NotNumber {
            value: self.retain(),
            want: "u64",
        };
        match self.strict_numeric("u64")? {
            Numeric::Int(value) => u64::try_from(value).map_err(|_| out_of_range()),
            Numeric::UInt(value) => Ok(value),
            Numeric::Float(value) if value.is_finite() && value >= 0.0 && value < TWO_POW_64 => {
                Ok(value as u64)
            }
            Numeric::Float(_) => Err(out_of_range()),
        }
    }

    /// Float.
    pub fn try_f64(&self) -> PerlResult<f64> {
        Ok(self.strict_numeric("f64")?.to_nv())
    }

    /// String bytes of a defined, non-reference scalar.
    pub fn try_bytes(&self) -> PerlResult<(Vec<u8>, bool)> {
        if !self.defined() {
            return Err(PerlError::UnexpectedUndef(self.retain()));
        }
        if self.kind() != SvKind::Scalar || self.is_ref() {
            return Err(PerlError::NotStringOrNumber(self.retain()));
        }
        Ok(self.bytes_unchecked())
    }

    /// String of a defined, non-reference scalar, lossily decoded.
    pub fn try_string(&self) -> PerlResult<String> {
        let (bytes, _) = self.try_bytes()?;
        Ok(match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        })
    }

    // ----- equality -----

    /// Equality by string value, as the runtime's `eq`.
    pub fn str_eq(&self, other: &SvContext) -> bool {
        self.bytes_unchecked().0 == other.bytes_unchecked().0
    }

    /// Hash of the string value, consistent with [`str_eq`](Self::str_eq).
    pub fn str_hash(&self) -> u32 {
        perl_hash(&self.bytes_unchecked().0)
    }

    /// Short description for diagnostics: `undef`, a quoted string, a
    /// number, or the reference form `Class=HASH(0x...)`.
    pub fn describe(&self) -> String {
        match self.kind() {
            SvKind::Scalar => {
                if !self.defined() {
                    "undef".to_string()
                } else if self.is_string() && !self.is_ref() {
                    format!("{:?}", self.string_unchecked())
                } else {
                    self.string_unchecked()
                }
            }
            kind => format!("{kind}(0x{:x})", self.sv.as_ptr() as usize),
        }
    }
}

impl AvContext {
    /// Generic view of the same handle.
    pub fn as_sv(&self) -> SvContext {
        SvContext {
            sv: self.av,
            perl: self.perl,
        }
    }

    /// Raw collection view.
    pub fn collection(&self) -> AvCollection {
        unsafe { AvCollection::new(self.av, self.perl) }
    }
}

impl HvContext {
    /// Generic view of the same handle.
    pub fn as_sv(&self) -> SvContext {
        SvContext {
            sv: self.hv,
            perl: self.perl,
        }
    }

    /// Raw collection view.
    pub fn collection(&self) -> HvCollection {
        unsafe { HvCollection::new(self.hv, self.perl) }
    }
}

impl CvContext {
    /// Generic view of the same handle.
    pub fn as_sv(&self) -> SvContext {
        SvContext {
            sv: self.cv,
            perl: self.perl,
        }
    }

    /// Qualified name, `None` for anonymous subs.
    pub fn name(&self) -> Option<String> {
        unsafe { self.as_sv().interp().cv_name(self.cv) }
    }

    /// File the sub was declared in.
    pub fn file(&self) -> Option<String> {
        unsafe { self.as_sv().interp().cv_file(self.cv) }
    }

    /// Whether the sub has a body.
    pub fn is_defined(&self) -> bool {
        unsafe { self.as_sv().interp().cv_xsub(self.cv) }.is_some()
    }
}
