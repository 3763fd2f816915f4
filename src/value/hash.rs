use std::fmt;

use super::{PerlScalar, PerlValue};
use crate::context::HvContext;
use crate::convert::{FromPerl, IntoPerl};
use crate::error::{PerlError, PerlResult};
use crate::interpreter::PerlInterpreter;
use crate::raw::{HvCollection, HvCursor, SvKind};
use crate::runtime::{GV_ADD, SvPtr};

/// A hash with string keys. Entry order is unspecified.
///
/// Reads distinguish an absent key (`None`) from a key holding undef
/// (`Some` of an undefined scalar). Assigning `None` through
/// [`assign`](PerlHash::assign) deletes the key.
#[derive(Clone)]
pub struct PerlHash(PerlValue);

impl PerlHash {
    pub(crate) fn from_value_unchecked(value: PerlValue) -> Self {
        Self(value)
    }

    /// Wrap an owning handle after checking it is a hash.
    pub fn from_value(value: PerlValue) -> PerlResult<Self> {
        match value.kind() {
            SvKind::Hash => Ok(Self(value)),
            _ => Err(PerlError::UnexpectedValueType {
                value,
                want: SvKind::Hash,
            }),
        }
    }

    /// New empty hash.
    pub fn new(perl: PerlInterpreter) -> Self {
        let hv = perl.raw().new_hv();
        Self(unsafe { PerlValue::from_noinc(perl.context(hv)) })
    }

    /// New hash from key/value pairs.
    pub fn from_pairs<K, V>(perl: PerlInterpreter, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: IntoPerl,
    {
        let hash = Self::new(perl);
        for (key, value) in pairs {
            hash.set(key.as_ref(), &value);
        }
        hash
    }

    /// New hash from a flat `key, value, ...` list, as `%h = (...)`.
    pub fn from_list(perl: PerlInterpreter, items: &[PerlScalar]) -> PerlResult<Self> {
        if items.len() % 2 != 0 {
            return Err(PerlError::OddElementsHash);
        }
        let hash = Self::new(perl);
        for pair in items.chunks(2) {
            hash.set_ent(&pair[0], &pair[1]);
        }
        Ok(hash)
    }

    /// Global `%name`, if it exists.
    pub fn global(perl: PerlInterpreter, name: &str) -> Option<Self> {
        let hv = perl.raw().get_hv(name, 0)?;
        Some(Self(unsafe { PerlValue::from_inc(perl.context(hv)) }))
    }

    /// Global `%name`, created when missing.
    pub fn global_creating(perl: PerlInterpreter, name: &str) -> Self {
        let hv = perl.raw().get_hv(name, GV_ADD).unwrap_or_else(|| perl.raw().new_hv());
        Self(unsafe { PerlValue::from_inc(perl.context(hv)) })
    }

    /// Owning handle.
    pub fn value(&self) -> &PerlValue {
        &self.0
    }

    /// Unwrap the owning handle.
    pub fn into_value(self) -> PerlValue {
        self.0
    }

    fn hv(&self) -> HvContext {
        match self.0.context().as_hv() {
            Some(hv) => hv,
            None => unreachable!("PerlHash holds a non-hash"),
        }
    }

    fn raw(&self) -> HvCollection {
        self.hv().collection()
    }

    fn element(&self, sv: SvPtr) -> PerlScalar {
        let ctx = unsafe { self.0.context().with(sv) };
        PerlScalar::from_value_unchecked(unsafe { PerlValue::from_inc(ctx) })
    }

    fn adopt(&self, sv: SvPtr) -> PerlScalar {
        let ctx = unsafe { self.0.context().with(sv) };
        PerlScalar::from_value_unchecked(unsafe { PerlValue::from_noinc(ctx) })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.raw().len()
    }

    /// Whether the hash is empty.
    pub fn is_empty(&self) -> bool {
        self.raw().is_empty()
    }

    /// The value under `key`, aliased. `None` when the key is absent.
    pub fn get(&self, key: &str) -> Option<PerlScalar> {
        self.raw()
            .fetch(key.as_bytes(), false)
            .map(|sv| self.element(sv))
    }

    /// The value under `key`, converted. `None` when the key is absent.
    pub fn fetch<T: FromPerl>(&self, key: &str) -> PerlResult<Option<T>> {
        match self.raw().fetch(key.as_bytes(), false) {
            Some(sv) => T::from_sv_inc(unsafe { self.0.context().with(sv) }).map(Some),
            None => Ok(None),
        }
    }

    /// The value under `key`, created as undef when absent.
    pub fn get_lvalue(&self, key: &str) -> PerlScalar {
        match self.raw().fetch(key.as_bytes(), true) {
            Some(sv) => self.element(sv),
            None => unreachable!("lvalue fetch always yields an entry"),
        }
    }

    /// Store a copy of `value` under `key`.
    pub fn set<T: IntoPerl + ?Sized>(&self, key: &str, value: &T) {
        let sv = value.to_sv(self.0.interpreter());
        if let Some(previous) = self.raw().store(key.as_bytes(), sv) {
            drop(self.adopt(previous));
        }
    }

    /// Store `value`, or delete the key when `value` is `None`.
    pub fn assign<T: IntoPerl>(&self, key: &str, value: Option<T>) {
        match value {
            Some(value) => self.set(key, &value),
            None => {
                self.raw().delete(key.as_bytes(), true);
            }
        }
    }

    /// Remove `key`, returning its value.
    pub fn delete(&self, key: &str) -> Option<PerlScalar> {
        self.raw()
            .delete(key.as_bytes(), false)
            .map(|sv| self.adopt(sv))
    }

    /// Whether `key` is present, even with an undefined value.
    pub fn exists(&self, key: &str) -> bool {
        self.raw().exists(key.as_bytes())
    }

    /// [`get`](Self::get) by a scalar key. The key is stringified first,
    /// so float keys use the runtime's `%.15g` form.
    pub fn get_ent(&self, key: &PerlScalar) -> Option<PerlScalar> {
        unsafe { self.raw().fetch_ent(key.value().as_ptr(), false) }.map(|sv| self.element(sv))
    }

    /// [`set`](Self::set) by a scalar key.
    pub fn set_ent<T: IntoPerl + ?Sized>(&self, key: &PerlScalar, value: &T) {
        let sv = value.to_sv(self.0.interpreter());
        if let Some(previous) = unsafe { self.raw().store_ent(key.value().as_ptr(), sv) } {
            drop(self.adopt(previous));
        }
    }

    /// [`delete`](Self::delete) by a scalar key.
    pub fn delete_ent(&self, key: &PerlScalar) -> Option<PerlScalar> {
        unsafe { self.raw().delete_ent(key.value().as_ptr(), false) }.map(|sv| self.adopt(sv))
    }

    /// [`exists`](Self::exists) by a scalar key.
    pub fn exists_ent(&self, key: &PerlScalar) -> bool {
        unsafe { self.raw().exists_ent(key.value().as_ptr()) }
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.raw().clear();
    }

    /// Iterate entries through the hash's single cursor. Starting another
    /// iteration of the same hash before this one finishes restarts it.
    pub fn iter(&self) -> HashIter<'_> {
        HashIter {
            hash: self,
            cursor: self.raw().cursor(),
        }
    }

    /// Keys, in unspecified order. Does not disturb a running [`iter`](PerlHash::iter).
    pub fn keys(&self) -> Vec<String> {
        self.raw()
            .entries()
            .into_iter()
            .map(|(key, _)| String::from_utf8_lossy(&key).into_owned())
            .collect()
    }

    /// Convert every value. Fails on the first value that does not convert.
    pub fn to_map<T: FromPerl, M: FromIterator<(String, T)>>(&self) -> PerlResult<M> {
        let ctx = self.0.context();
        self.raw()
            .entries()
            .into_iter()
            .map(|(key, sv)| {
                let key = String::from_utf8_lossy(&key).into_owned();
                T::from_sv_inc(unsafe { ctx.with(sv) }).map(|value| (key, value))
            })
            .collect()
    }

    /// New reference to this hash.
    pub fn to_ref(&self) -> PerlScalar {
        PerlScalar::new_ref(&self.0)
    }
}

impl fmt::Debug for PerlHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.raw().entries().into_iter().map(|(key, sv)| {
            (String::from_utf8_lossy(&key).into_owned(), self.element(sv))
        });
        f.debug_map().entries(entries).finish()
    }
}

/// Iterator over a [`PerlHash`]; values are aliased.
pub struct HashIter<'a> {
    hash: &'a PerlHash,
    cursor: HvCursor,
}

impl Iterator for HashIter<'_> {
    type Item = (String, PerlScalar);

    fn next(&mut self) -> Option<Self::Item> {
        let (key, sv) = self.cursor.next()?;
        let key = String::from_utf8_lossy(&key).into_owned();
        Some((key, self.hash.element(sv)))
    }
}

impl<'a> IntoIterator for &'a PerlHash {
    type Item = (String, PerlScalar);
    type IntoIter = HashIter<'a>;

    fn into_iter(self) -> HashIter<'a> {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::EmbeddedPerl;
    use std::collections::BTreeMap;

    #[test]
    fn test_absent_versus_undefined() {
        let perl = EmbeddedPerl::new();
        let hash = PerlHash::new(*perl);
        hash.set("present", &None::<i64>);

        assert!(hash.exists("present"));
        let value = hash.get("present").unwrap();
        assert!(!value.defined());

        assert!(!hash.exists("absent"));
        assert!(hash.get("absent").is_none());
        assert_eq!(hash.fetch::<Option<i64>>("present").unwrap(), Some(None));
        assert_eq!(hash.fetch::<Option<i64>>("absent").unwrap(), None);
    }

    #[test]
    fn test_assign_none_deletes() {
        let perl = EmbeddedPerl::new();
        let hash = PerlHash::from_pairs(*perl, [("a", 1i64), ("b", 2)]);
        hash.assign("a", None::<i64>);
        hash.assign("c", Some(3i64));
        let map: BTreeMap<String, i64> = hash.to_map().unwrap();
        assert_eq!(map, BTreeMap::from([("b".to_string(), 2), ("c".to_string(), 3)]));
    }

    #[test]
    fn test_scalar_keys_are_stringified() {
        let perl = EmbeddedPerl::new();
        let hash = PerlHash::new(*perl);
        let key = PerlScalar::new(*perl, &0.1f64);
        hash.set_ent(&key, &"tenth");
        assert!(hash.exists("0.1"));
        assert_eq!(hash.get_ent(&key).unwrap().try_string().unwrap(), "tenth");
        assert!(hash.exists_ent(&key));
        assert!(hash.delete_ent(&key).is_some());
        assert!(hash.is_empty());
    }

    #[test]
    fn test_from_list_rejects_odd_length() {
        let perl = EmbeddedPerl::new();
        let items = [PerlScalar::new(*perl, "k")];
        assert!(matches!(
            PerlHash::from_list(*perl, &items),
            Err(PerlError::OddElementsHash)
        ));
    }
}
