//! Conversion between host types and runtime values
//!
//! [`FromPerl`] reads a host value out of a handle. It comes in two modes:
//! `from_sv_inc` for handles the caller only borrows (container elements,
//! globals) and `from_sv_copy` for temporaries that must not be aliased
//! (call arguments and results). [`IntoPerl`] goes the other way and always
//! hands back a fresh handle carrying one reference for the caller.
//!
//! Containers convert element by element. A failing element aborts the whole
//! conversion and every element converted before it is released.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use crate::context::SvContext;
use crate::error::{PerlError, PerlResult};
use crate::interpreter::PerlInterpreter;
use crate::raw::SvKind;
use crate::runtime::SvPtr;
use crate::value::{AnyPerl, PerlArray, PerlHash, PerlObject, PerlScalar, PerlSub, PerlValue};

/// Host types that can be read from a runtime value.
///
/// The context passed in is only valid for the duration of the call; keep
/// what the result needs through an owning wrapper, never the context.
pub trait FromPerl: Sized {
    /// Convert a borrowed handle. Values kept by the result take their own
    /// reference.
    fn from_sv_inc(ctx: SvContext) -> PerlResult<Self>;

    /// Convert a temporary. Values kept by the result are duplicated rather
    /// than aliased.
    fn from_sv_copy(ctx: SvContext) -> PerlResult<Self> {
        Self::from_sv_inc(ctx)
    }

    /// Result for an argument the caller did not pass.
    fn from_missing(index: usize) -> PerlResult<Self> {
        Err(PerlError::NoArgumentOnStack { at: index })
    }
}

/// Host values that can be turned into runtime values.
pub trait IntoPerl {
    /// New value with one reference owned by the caller. Containers and
    /// code come back as references.
    fn to_sv(&self, perl: PerlInterpreter) -> SvPtr;

    /// Value to pass as a call argument, with one reference owned by the
    /// caller. Wrappers pass their own scalar so the callee can assign
    /// through it; everything else passes a fresh value.
    fn to_arg(&self, perl: PerlInterpreter) -> SvPtr {
        self.to_sv(perl)
    }
}

fn out_of_range(ctx: SvContext, want: &'static str) -> PerlError {
    PerlError::NotNumber {
        value: ctx.retain(),
        want,
    }
}

// ----- scalars -----

impl FromPerl for bool {
    fn from_sv_inc(ctx: SvContext) -> PerlResult<Self> {
        Ok(ctx.is_true())
    }
}

impl IntoPerl for bool {
    fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
        perl.raw().new_sv_bool(*self)
    }
}

macro_rules! signed_conversions {
    ($($ty:ty),*) => {$(
        impl FromPerl for $ty {
            fn from_sv_inc(ctx: SvContext) -> PerlResult<Self> {
                let wide = ctx.try_i64()?;
                <$ty>::try_from(wide).map_err(|_| out_of_range(ctx, stringify!($ty)))
            }
        }

        impl IntoPerl for $ty {
            fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
                perl.raw().new_sv_iv(*self as i64)
            }
        }
    )*};
}

macro_rules! unsigned_conversions {
    ($($ty:ty),*) => {$(
        impl FromPerl for $ty {
            fn from_sv_inc(ctx: SvContext) -> PerlResult<Self> {
                let wide = ctx.try_u64()?;
                <$ty>::try_from(wide).map_err(|_| out_of_range(ctx, stringify!($ty)))
            }
        }

        impl IntoPerl for $ty {
            fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
                perl.raw().new_sv_uv(*self as u64)
            }
        }
    )*};
}

signed_conversions!(i8, i16, i32, i64, isize);
unsigned_conversions!(u8, u16, u32, u64, usize);

impl FromPerl for f64 {
    fn from_sv_inc(ctx: SvContext) -> PerlResult<Self> {
        ctx.try_f64()
    }
}

impl IntoPerl for f64 {
    fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
        perl.raw().new_sv_nv(*self)
    }
}

impl FromPerl for f32 {
    fn from_sv_inc(ctx: SvContext) -> PerlResult<Self> {
        ctx.try_f64().map(|value| value as f32)
    }
}

impl IntoPerl for f32 {
    fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
        perl.raw().new_sv_nv(f64::from(*self))
    }
}

impl FromPerl for String {
    fn from_sv_inc(ctx: SvContext) -> PerlResult<Self> {
        ctx.try_string()
    }
}

impl IntoPerl for String {
    fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
        perl.raw().new_sv_str(self)
    }
}

impl IntoPerl for str {
    fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
        perl.raw().new_sv_str(self)
    }
}

impl IntoPerl for &str {
    fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
        perl.raw().new_sv_str(self)
    }
}

// ----- optional values -----

/// Undef converts to `None` for every `T`, never to a default `T`.
impl<T: FromPerl> FromPerl for Option<T> {
    fn from_sv_inc(ctx: SvContext) -> PerlResult<Self> {
        if ctx.defined() {
            T::from_sv_inc(ctx).map(Some)
        } else {
            Ok(None)
        }
    }

    fn from_sv_copy(ctx: SvContext) -> PerlResult<Self> {
        if ctx.defined() {
            T::from_sv_copy(ctx).map(Some)
        } else {
            Ok(None)
        }
    }

    fn from_missing(_index: usize) -> PerlResult<Self> {
        Ok(None)
    }
}

impl<T: IntoPerl> IntoPerl for Option<T> {
    fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
        match self {
            Some(value) => value.to_sv(perl),
            None => perl.raw().new_sv(),
        }
    }

    fn to_arg(&self, perl: PerlInterpreter) -> SvPtr {
        match self {
            Some(value) => value.to_arg(perl),
            None => perl.raw().new_sv(),
        }
    }
}

// ----- collections -----

fn array_of(ctx: SvContext) -> PerlResult<PerlArray> {
    match ctx.deref_or_self().as_av() {
        Some(av) => Ok(PerlArray::from_value_unchecked(unsafe {
            PerlValue::from_inc(av.as_sv())
        })),
        None => Err(PerlError::UnexpectedValueType {
            value: ctx.retain(),
            want: SvKind::Array,
        }),
    }
}

fn hash_of(ctx: SvContext) -> PerlResult<PerlHash> {
    match ctx.deref_or_self().as_hv() {
        Some(hv) => Ok(PerlHash::from_value_unchecked(unsafe {
            PerlValue::from_inc(hv.as_sv())
        })),
        None => Err(PerlError::UnexpectedValueType {
            value: ctx.retain(),
            want: SvKind::Hash,
        }),
    }
}

fn sub_of(ctx: SvContext) -> PerlResult<PerlSub> {
    match ctx.deref_or_self().as_cv() {
        Some(cv) => Ok(PerlSub::from_value_unchecked(unsafe {
            PerlValue::from_inc(cv.as_sv())
        })),
        None => Err(PerlError::UnexpectedValueType {
            value: ctx.retain(),
            want: SvKind::Code,
        }),
    }
}

/// Reference to a new container, handing the container's own reference to
/// the new one.
fn reference_to(value: PerlValue) -> SvPtr {
    let perl = value.interpreter();
    perl.raw().new_rv_noinc(value.into_raw())
}

/// Accepts an array or a reference to one.
impl<T: FromPerl> FromPerl for Vec<T> {
    fn from_sv_inc(ctx: SvContext) -> PerlResult<Self> {
        array_of(ctx)?.to_vec()
    }
}

impl<T: IntoPerl> IntoPerl for [T] {
    fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
        let array = PerlArray::new(perl);
        array.reserve(self.len());
        for item in self {
            array.push(item);
        }
        reference_to(array.into_value())
    }
}

impl<T: IntoPerl> IntoPerl for Vec<T> {
    fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
        self.as_slice().to_sv(perl)
    }
}

/// Accepts a hash or a reference to one.
impl<T: FromPerl, S: BuildHasher + Default> FromPerl for HashMap<String, T, S> {
    fn from_sv_inc(ctx: SvContext) -> PerlResult<Self> {
        hash_of(ctx)?.to_map()
    }
}

impl<T: IntoPerl, S> IntoPerl for HashMap<String, T, S> {
    fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
        let hash = PerlHash::new(perl);
        for (key, value) in self {
            hash.set(key, value);
        }
        reference_to(hash.into_value())
    }
}

/// Accepts a hash or a reference to one.
impl<T: FromPerl> FromPerl for BTreeMap<String, T> {
    fn from_sv_inc(ctx: SvContext) -> PerlResult<Self> {
        hash_of(ctx)?.to_map()
    }
}

impl<T: IntoPerl> IntoPerl for BTreeMap<String, T> {
    fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
        let hash = PerlHash::new(perl);
        for (key, value) in self {
            hash.set(key, value);
        }
        reference_to(hash.into_value())
    }
}

// ----- wrappers -----

impl FromPerl for PerlValue {
    fn from_sv_inc(ctx: SvContext) -> PerlResult<Self> {
        Ok(unsafe { PerlValue::from_inc(ctx) })
    }

    fn from_sv_copy(ctx: SvContext) -> PerlResult<Self> {
        Ok(unsafe { PerlValue::from_copy(ctx) })
    }
}

impl IntoPerl for PerlValue {
    fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
        let ctx = self.context();
        match ctx.kind() {
            SvKind::Scalar => unsafe { perl.raw().new_sv_sv(ctx.as_ptr()) },
            _ => unsafe { perl.raw().new_rv_inc(ctx.as_ptr()) },
        }
    }

    fn to_arg(&self, perl: PerlInterpreter) -> SvPtr {
        match self.kind() {
            SvKind::Scalar => self.to_owned_ptr(),
            _ => self.to_sv(perl),
        }
    }
}

impl FromPerl for PerlScalar {
    fn from_sv_inc(ctx: SvContext) -> PerlResult<Self> {
        PerlScalar::from_value(unsafe { PerlValue::from_inc(ctx) })
    }

    fn from_sv_copy(ctx: SvContext) -> PerlResult<Self> {
        match ctx.kind() {
            SvKind::Scalar => Ok(PerlScalar::from_value_unchecked(unsafe {
                PerlValue::from_copy(ctx)
            })),
            _ => Err(PerlError::UnexpectedValueType {
                value: ctx.retain(),
                want: SvKind::Scalar,
            }),
        }
    }
}

impl IntoPerl for PerlScalar {
    fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
        self.value().to_sv(perl)
    }

    fn to_arg(&self, _perl: PerlInterpreter) -> SvPtr {
        self.value().to_owned_ptr()
    }
}

/// Accepts an array or a reference to one; the array is shared, not
/// copied.
impl FromPerl for PerlArray {
    fn from_sv_inc(ctx: SvContext) -> PerlResult<Self> {
        array_of(ctx)
    }
}

impl IntoPerl for PerlArray {
    fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
        self.value().to_sv(perl)
    }
}

/// Accepts a hash or a reference to one; the hash is shared, not copied.
impl FromPerl for PerlHash {
    fn from_sv_inc(ctx: SvContext) -> PerlResult<Self> {
        hash_of(ctx)
    }
}

impl IntoPerl for PerlHash {
    fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
        self.value().to_sv(perl)
    }
}

/// Accepts code or a reference to it.
impl FromPerl for PerlSub {
    fn from_sv_inc(ctx: SvContext) -> PerlResult<Self> {
        sub_of(ctx)
    }
}

impl IntoPerl for PerlSub {
    fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
        self.value().to_sv(perl)
    }
}

impl FromPerl for PerlObject {
    fn from_sv_inc(ctx: SvContext) -> PerlResult<Self> {
        PerlObject::from_scalar(PerlScalar::from_sv_inc(ctx)?)
    }

    fn from_sv_copy(ctx: SvContext) -> PerlResult<Self> {
        PerlObject::from_scalar(PerlScalar::from_sv_copy(ctx)?)
    }
}

impl IntoPerl for PerlObject {
    fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
        self.as_scalar().to_sv(perl)
    }

    fn to_arg(&self, perl: PerlInterpreter) -> SvPtr {
        self.as_scalar().to_arg(perl)
    }
}

impl FromPerl for AnyPerl {
    fn from_sv_inc(ctx: SvContext) -> PerlResult<Self> {
        Ok(AnyPerl::from_value(unsafe { PerlValue::from_inc(ctx) }))
    }

    fn from_sv_copy(ctx: SvContext) -> PerlResult<Self> {
        Ok(AnyPerl::from_value(unsafe { PerlValue::from_copy(ctx) }))
    }
}

impl IntoPerl for AnyPerl {
    fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
        self.value().to_sv(perl)
    }

    fn to_arg(&self, perl: PerlInterpreter) -> SvPtr {
        self.value().to_arg(perl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::EmbeddedPerl;

    fn through<T: IntoPerl + ?Sized, R: FromPerl>(perl: PerlInterpreter, value: &T) -> PerlResult<R> {
        PerlScalar::new(perl, value).get()
    }

    #[test]
    fn test_integer_range_checks() {
        let perl = EmbeddedPerl::new();
        assert_eq!(through::<_, u8>(*perl, &255i64).unwrap(), 255);
        assert!(matches!(
            through::<_, u8>(*perl, &256i64),
            Err(PerlError::NotNumber { want: "u8", .. })
        ));
        assert!(matches!(
            through::<_, u32>(*perl, &-1i64),
            Err(PerlError::NotNumber { .. })
        ));
        assert_eq!(through::<_, i64>(*perl, &u64::MAX).ok(), None);
        assert_eq!(through::<_, u64>(*perl, &u64::MAX).unwrap(), u64::MAX);
    }

    #[test]
    fn test_undef_is_none_not_default() {
        let perl = EmbeddedPerl::new();
        let undef = PerlScalar::undef(*perl);
        assert_eq!(undef.get::<Option<i64>>().unwrap(), None);
        assert_eq!(undef.get::<Option<String>>().unwrap(), None);
        assert!(matches!(undef.get::<i64>(), Err(PerlError::UnexpectedUndef(_))));
        assert_eq!(Option::<u8>::from_missing(3).unwrap(), None);
        assert!(matches!(
            i64::from_missing(3),
            Err(PerlError::NoArgumentOnStack { at: 3 })
        ));
    }

    #[test]
    fn test_nested_collections() {
        let perl = EmbeddedPerl::new();
        let nested = vec![vec![1i64, 2], vec![], vec![3]];
        let back: Vec<Vec<i64>> = through(*perl, &nested).unwrap();
        assert_eq!(back, nested);

        let map = BTreeMap::from([
            ("a".to_string(), vec!["x".to_string()]),
            ("b".to_string(), vec![]),
        ]);
        let back: BTreeMap<String, Vec<String>> = through(*perl, &map).unwrap();
        assert_eq!(back, map);

        let counts = HashMap::from([("one".to_string(), 1i64), ("two".to_string(), 2)]);
        let back: HashMap<String, i64> = through(*perl, &counts).unwrap();
        assert_eq!(back, counts);
    }

    #[test]
    fn test_failed_bulk_conversion_releases_elements() {
        let perl = EmbeddedPerl::new();
        let array = PerlArray::from_items(*perl, ["1", "2", "three"]);
        let before = perl.live_values();
        let result: PerlResult<Vec<PerlScalar>> = array.to_vec();
        assert_eq!(result.unwrap().len(), 3);
        let result: PerlResult<Vec<i64>> = array.to_vec();
        assert!(result.is_err());
        assert_eq!(perl.live_values(), before);
    }

    #[test]
    fn test_wrong_container_kind() {
        let perl = EmbeddedPerl::new();
        let hash = PerlHash::new(*perl);
        let err = through::<_, Vec<i64>>(*perl, &hash).unwrap_err();
        assert!(matches!(
            err,
            PerlError::UnexpectedValueType {
                want: SvKind::Array,
                ..
            }
        ));
        let array: PerlArray = through(*perl, &PerlArray::from_items(*perl, [1i64])).unwrap();
        assert_eq!(array.len(), 1);
    }

    #[test]
    fn test_scalar_argument_is_alias_copy_is_not() {
        let perl = EmbeddedPerl::new();
        let scalar = PerlScalar::new(*perl, &1i64);
        let arg = scalar.to_arg(*perl);
        assert_eq!(arg, scalar.value().as_ptr());
        let copy = scalar.to_sv(*perl);
        assert_ne!(copy, scalar.value().as_ptr());
        unsafe {
            perl.raw().sv_refcnt_dec(arg);
            perl.raw().sv_refcnt_dec(copy);
        }
    }
}
