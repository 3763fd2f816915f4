use std::fmt;

use super::{PerlScalar, PerlValue};
use crate::context::AvContext;
use crate::convert::{FromPerl, IntoPerl};
use crate::error::{PerlError, PerlResult};
use crate::interpreter::PerlInterpreter;
use crate::raw::{AvCollection, SvKind};
use crate::runtime::GV_ADD;

/// An array. Indices are zero-based; negative indices count from the end.
#[derive(Clone)]
pub struct PerlArray(PerlValue);

impl PerlArray {
    pub(crate) fn from_value_unchecked(value: PerlValue) -> Self {
        Self(value)
    }

    /// Wrap an owning handle after checking it is an array.
    pub fn from_value(value: PerlValue) -> PerlResult<Self> {
        match value.kind() {
            SvKind::Array => Ok(Self(value)),
            _ => Err(PerlError::UnexpectedValueType {
                value,
                want: SvKind::Array,
            }),
        }
    }

    /// New empty array.
    pub fn new(perl: PerlInterpreter) -> Self {
        let av = perl.raw().new_av();
        Self(unsafe { PerlValue::from_noinc(perl.context(av)) })
    }

    /// New array holding converted `items`.
    pub fn from_items<T: IntoPerl>(perl: PerlInterpreter, items: impl IntoIterator<Item = T>) -> Self {
        let array = Self::new(perl);
        for item in items {
            array.push(&item);
        }
        array
    }

    /// Global `@name`, if it exists.
    pub fn global(perl: PerlInterpreter, name: &str) -> Option<Self> {
        let av = perl.raw().get_av(name, 0)?;
        Some(Self(unsafe { PerlValue::from_inc(perl.context(av)) }))
    }

    /// Global `@name`, created when missing.
    pub fn global_creating(perl: PerlInterpreter, name: &str) -> Self {
        let av = perl.raw().get_av(name, GV_ADD).unwrap_or_else(|| perl.raw().new_av());
        Self(unsafe { PerlValue::from_inc(perl.context(av)) })
    }

    /// Owning handle.
    pub fn value(&self) -> &PerlValue {
        &self.0
    }

    /// Unwrap the owning handle.
    pub fn into_value(self) -> PerlValue {
        self.0
    }

    fn av(&self) -> AvContext {
        match self.0.context().as_av() {
            Some(av) => av,
            None => unreachable!("PerlArray holds a non-array"),
        }
    }

    fn raw(&self) -> AvCollection {
        self.av().collection()
    }

    fn element(&self, sv: crate::runtime::SvPtr) -> PerlScalar {
        let ctx = unsafe { self.0.context().with(sv) };
        PerlScalar::from_value_unchecked(unsafe { PerlValue::from_inc(ctx) })
    }

    fn adopt(&self, sv: crate::runtime::SvPtr) -> PerlScalar {
        let ctx = unsafe { self.0.context().with(sv) };
        PerlScalar::from_value_unchecked(unsafe { PerlValue::from_noinc(ctx) })
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.raw().len()
    }

    /// Whether the array is empty.
    pub fn is_empty(&self) -> bool {
        self.raw().is_empty()
    }

    /// Allocated slots.
    pub fn capacity(&self) -> usize {
        self.raw().capacity()
    }

    /// Preallocate room for `count` elements in total.
    pub fn reserve(&self, count: usize) {
        self.raw().extend(count);
    }

    /// The element at `index`, aliased: assigning through it changes the
    /// array. `None` when nothing is stored there.
    pub fn get(&self, index: isize) -> Option<PerlScalar> {
        self.raw().fetch(index, false).map(|sv| self.element(sv))
    }

    /// The element at `index`, or a fresh undef when nothing is stored.
    pub fn get_or_undef(&self, index: isize) -> PerlScalar {
        self.get(index)
            .unwrap_or_else(|| PerlScalar::undef(self.0.interpreter()))
    }

    /// The element at `index`, failing when nothing is stored there.
    pub fn element_at(&self, index: isize) -> PerlResult<PerlScalar> {
        self.get(index)
            .ok_or(PerlError::ElementNotExists { index })
    }

    /// The element at `index`, converted. `None` when nothing is stored.
    pub fn fetch<T: FromPerl>(&self, index: isize) -> PerlResult<Option<T>> {
        match self.raw().fetch(index, false) {
            Some(sv) => T::from_sv_inc(unsafe { self.0.context().with(sv) }).map(Some),
            None => Ok(None),
        }
    }

    /// Negative indices count from the end and cannot reach before the
    /// first element.
    fn creatable(&self, index: isize) -> PerlResult<()> {
        if index < 0 && index.unsigned_abs() > self.len() {
            return Err(PerlError::ElementNotExists { index });
        }
        Ok(())
    }

    /// The element at `index`, created as undef when missing. Assigning
    /// through it stores into the array.
    pub fn get_lvalue(&self, index: isize) -> PerlResult<PerlScalar> {
        self.creatable(index)?;
        self.raw()
            .fetch(index, true)
            .map(|sv| self.element(sv))
            .ok_or(PerlError::ElementNotExists { index })
    }

    /// Store a copy of `value` at `index`, growing the array as needed.
    pub fn set<T: IntoPerl + ?Sized>(&self, index: isize, value: &T) -> PerlResult<()> {
        self.creatable(index)?;
        let sv = value.to_sv(self.0.interpreter());
        if let Some(previous) = self.raw().store(index, sv) {
            drop(self.adopt(previous));
        }
        Ok(())
    }

    /// Remove the element at `index`, returning it. The last element shrinks
    /// the array; others leave a hole.
    pub fn delete(&self, index: isize) -> Option<PerlScalar> {
        self.raw().delete(index, false).map(|sv| self.adopt(sv))
    }

    /// Whether an element is stored at `index`.
    pub fn exists(&self, index: isize) -> bool {
        self.raw().exists(index)
    }

    /// Append a copy of `value`.
    pub fn push<T: IntoPerl + ?Sized>(&self, value: &T) {
        let sv = value.to_sv(self.0.interpreter());
        self.raw().append(sv);
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Option<PerlScalar> {
        self.raw().pop().map(|sv| self.adopt(sv))
    }

    /// Remove and return the first element. O(n): every remaining element
    /// moves down one slot.
    pub fn shift(&self) -> Option<PerlScalar> {
        self.raw().remove_first().map(|sv| self.adopt(sv))
    }

    /// Insert a copy of `value` at the front. O(n).
    pub fn unshift<T: IntoPerl + ?Sized>(&self, value: &T) {
        let sv = value.to_sv(self.0.interpreter());
        self.raw().prepend(sv);
    }

    /// Remove every element.
    pub fn clear(&self) {
        self.raw().clear();
    }

    /// Elements in order. Holes yield fresh undefs.
    pub fn iter(&self) -> ArrayIter<'_> {
        ArrayIter {
            array: self,
            index: 0,
        }
    }

    /// Convert every element. Fails on the first element that does not
    /// convert; elements converted so far are released.
    /// Holes become fresh undefs, never the shared read-only one.
    pub fn to_vec<T: FromPerl>(&self) -> PerlResult<Vec<T>> {
        let ctx = self.0.context();
        let mut items = Vec::with_capacity(self.len());
        for (index, slot) in self.raw().iter().enumerate() {
            let item = match slot {
                Some(sv) => T::from_sv_inc(unsafe { ctx.with(sv) }),
                None => {
                    let hole = PerlScalar::undef(self.0.interpreter());
                    T::from_sv_inc(hole.context())
                }
            };
            items.push(item.map_err(|err| err.at_argument(index))?);
        }
        Ok(items)
    }

    /// New reference to this array.
    pub fn to_ref(&self) -> PerlScalar {
        PerlScalar::new_ref(&self.0)
    }
}

impl fmt::Debug for PerlArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Iterator over a [`PerlArray`].
#[derive(Debug)]
pub struct ArrayIter<'a> {
    array: &'a PerlArray,
    index: usize,
}

impl Iterator for ArrayIter<'_> {
    type Item = PerlScalar;

    fn next(&mut self) -> Option<PerlScalar> {
        if self.index >= self.array.len() {
            return None;
        }
        let item = self.array.get_or_undef(self.index as isize);
        self.index += 1;
        Some(item)
    }
}

impl<'a> IntoIterator for &'a PerlArray {
    type Item = PerlScalar;
    type IntoIter = ArrayIter<'a>;

    fn into_iter(self) -> ArrayIter<'a> {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::EmbeddedPerl;

    #[test]
    fn test_out_of_range_reads_undef() {
        let perl = EmbeddedPerl::new();
        let array = PerlArray::from_items(*perl, [1i64, 2, 3]);
        assert_eq!(array.len(), 3);
        assert!(array.get(10).is_none());
        assert!(!array.get_or_undef(10).defined());
        assert!(matches!(
            array.element_at(10),
            Err(PerlError::ElementNotExists { index: 10 })
        ));
        assert_eq!(array.get(-1).unwrap().try_i64().unwrap(), 3);
    }

    #[test]
    fn test_shift_pop_and_holes() {
        let perl = EmbeddedPerl::new();
        let array = PerlArray::new(*perl);
        array.set(2, &"c").unwrap();
        assert_eq!(array.len(), 3);
        assert!(!array.exists(0));
        assert_eq!(array.fetch::<String>(0).unwrap(), None);

        array.unshift(&"z");
        assert_eq!(array.shift().unwrap().try_string().unwrap(), "z");
        assert_eq!(array.pop().unwrap().try_string().unwrap(), "c");
        assert_eq!(array.len(), 2);

        array.clear();
        assert!(array.is_empty());
    }

    #[test]
    fn test_elements_are_aliases() {
        let perl = EmbeddedPerl::new();
        let array = PerlArray::from_items(*perl, ["a"]);
        let element = array.get(0).unwrap();
        element.set(&"b");
        assert_eq!(array.fetch::<String>(0).unwrap().as_deref(), Some("b"));

        let created = array.get_lvalue(3).unwrap();
        assert!(matches!(
            array.get_lvalue(-5),
            Err(PerlError::ElementNotExists { index: -5 })
        ));
        created.set_i64(4);
        assert_eq!(array.len(), 4);
        assert_eq!(array.fetch::<i64>(3).unwrap(), Some(4));
    }

    #[test]
    fn test_to_vec_reports_failing_element() {
        let perl = EmbeddedPerl::new();
        let array = PerlArray::from_items(*perl, ["1", "2", "x"]);
        let err = array.to_vec::<i64>().unwrap_err();
        assert!(matches!(err, PerlError::Argument { index: 2, .. }));
        assert_eq!(array.to_vec::<String>().unwrap(), vec!["1", "2", "x"]);
    }

    #[test]
    fn test_negative_store_before_start_is_an_error() {
        let perl = EmbeddedPerl::new();
        let empty = PerlArray::new(*perl);
        assert!(matches!(
            empty.set(-3, &1i64),
            Err(PerlError::ElementNotExists { index: -3 })
        ));
        assert!(empty.is_empty());

        let array = PerlArray::from_items(*perl, [1i64, 2, 3]);
        array.set(-3, &10i64).unwrap();
        assert_eq!(array.fetch::<i64>(0).unwrap(), Some(10));
        assert!(array.set(-4, &0i64).is_err());
        assert_eq!(array.len(), 3);
    }

    #[test]
    fn test_to_vec_holes_are_writable() {
        let perl = EmbeddedPerl::new();
        let array = PerlArray::new(*perl);
        array.set(1, "x").unwrap();

        let items: Vec<PerlScalar> = array.to_vec().unwrap();
        assert!(!items[0].defined());
        items[0].set_i64(5);
        assert_eq!(items[0].try_i64().unwrap(), 5);
        assert!(!array.exists(0));
        assert!(!PerlScalar::undef(*perl).defined());
    }
}
