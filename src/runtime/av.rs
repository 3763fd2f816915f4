//! Array bodies.
//!
//! Slots own one reference each; `None` is a hole that reads as absent.
//! Negative indices count from the end. Store and delete hand the displaced
//! value's reference to the caller.

use super::interp::Interpreter;
use super::sv::{Body, SvPtr, head};

#[derive(Default)]
pub(crate) struct ArrayBody {
    pub items: Vec<Option<SvPtr>>,
}

impl Interpreter {
    /// New empty array.
    pub fn new_av(&self) -> SvPtr {
        self.alloc_sv(Body::Array(ArrayBody::default()))
    }

    unsafe fn with_av<R>(&self, av: SvPtr, edit: impl FnOnce(&mut Vec<Option<SvPtr>>) -> R) -> R {
        let result = match &mut *unsafe { head(av) }.body.borrow_mut() {
            Body::Array(array) => Some(edit(&mut array.items)),
            _ => None,
        };
        match result {
            Some(result) => result,
            None => self.croak("Not an ARRAY reference"),
        }
    }

    fn normalize(len: usize, key: isize) -> Option<usize> {
        if key >= 0 {
            Some(key as usize)
        } else {
            let from_end = len as isize + key;
            (from_end >= 0).then_some(from_end as usize)
        }
    }

    /// Number of elements, holes included.
    ///
    /// # Safety
    /// `av` must be a live array.
    pub unsafe fn av_len(&self, av: SvPtr) -> usize {
        unsafe { self.with_av(av, |items| items.len()) }
    }

    /// Highest index, `-1` when empty.
    ///
    /// # Safety
    /// `av` must be a live array.
    pub unsafe fn av_top_index(&self, av: SvPtr) -> isize {
        unsafe { self.av_len(av) as isize - 1 }
    }

    /// Allocated slots.
    ///
    /// # Safety
    /// `av` must be a live array.
    pub unsafe fn av_capacity(&self, av: SvPtr) -> usize {
        unsafe { self.with_av(av, |items| items.capacity()) }
    }

    /// Borrow the element at `key`. With `lval`, a missing element is
    /// created as a fresh undefined scalar.
    ///
    /// # Safety
    /// `av` must be a live array.
    pub unsafe fn av_fetch(&self, av: SvPtr, key: isize, lval: bool) -> Option<SvPtr> {
        let found = unsafe {
            self.with_av(av, |items| {
                Self::normalize(items.len(), key).and_then(|index| items.get(index).copied().flatten())
            })
        };
        if found.is_some() || !lval {
            return found;
        }
        let fresh = self.new_sv();
        let previous = unsafe { self.av_store(av, key, fresh) };
        if let Some(previous) = previous {
            unsafe { self.sv_refcnt_dec(previous) };
        }
        Some(fresh)
    }

    /// Store `value` at `key`, adopting its reference. Returns the previous
    /// occupant with its reference, which the caller must release.
    ///
    /// # Safety
    /// `av` must be a live array and the caller must own `value`.
    pub unsafe fn av_store(&self, av: SvPtr, key: isize, value: SvPtr) -> Option<SvPtr> {
        let stored = unsafe {
            self.with_av(av, |items| {
                let index = Self::normalize(items.len(), key)?;
                if index >= items.len() {
                    items.resize(index + 1, None);
                }
                Some(items[index].replace(value))
            })
        };
        match stored {
            Some(previous) => previous,
            None => {
                unsafe { self.sv_refcnt_dec(value) };
                self.croak("Modification of non-creatable array value attempted")
            }
        }
    }

    /// Remove the element at `key`. The last element shrinks the array,
    /// others leave a hole. With `discard` the value is released and `None`
    /// returned; otherwise the caller receives its reference.
    ///
    /// # Safety
    /// `av` must be a live array.
    pub unsafe fn av_delete(&self, av: SvPtr, key: isize, discard: bool) -> Option<SvPtr> {
        let removed = unsafe {
            self.with_av(av, |items| {
                let index = Self::normalize(items.len(), key)?;
                if index >= items.len() {
                    return None;
                }
                let removed = items[index].take();
                while items.last().is_some_and(Option::is_none) {
                    items.pop();
                }
                removed
            })
        };
        match removed {
            Some(value) if discard => {
                unsafe { self.sv_refcnt_dec(value) };
                None
            }
            other => other,
        }
    }

    /// Whether an element (not a hole) lives at `key`.
    ///
    /// # Safety
    /// `av` must be a live array.
    pub unsafe fn av_exists(&self, av: SvPtr, key: isize) -> bool {
        unsafe {
            self.with_av(av, |items| {
                Self::normalize(items.len(), key)
                    .and_then(|index| items.get(index))
                    .is_some_and(Option::is_some)
            })
        }
    }

    /// Make room for index `key` without changing the length.
    ///
    /// # Safety
    /// `av` must be a live array.
    pub unsafe fn av_extend(&self, av: SvPtr, key: usize) {
        unsafe {
            self.with_av(av, |items| {
                let wanted = key + 1;
                if wanted > items.capacity() {
                    items.reserve(wanted - items.len());
                }
            })
        }
    }

    /// Append, adopting the caller's reference.
    ///
    /// # Safety
    /// `av` must be a live array and the caller must own `value`.
    pub unsafe fn av_push(&self, av: SvPtr, value: SvPtr) {
        unsafe { self.with_av(av, |items| items.push(Some(value))) }
    }

    /// Remove the last element, handing over its reference.
    ///
    /// # Safety
    /// `av` must be a live array.
    pub unsafe fn av_pop(&self, av: SvPtr) -> Option<SvPtr> {
        unsafe { self.with_av(av, |items| items.pop().flatten()) }
    }

    /// Remove the first element, handing over its reference. Linear in the
    /// array length.
    ///
    /// # Safety
    /// `av` must be a live array.
    pub unsafe fn av_shift(&self, av: SvPtr) -> Option<SvPtr> {
        unsafe {
            self.with_av(av, |items| {
                if items.is_empty() {
                    None
                } else {
                    items.remove(0)
                }
            })
        }
    }

    /// Insert `count` holes at the front.
    ///
    /// # Safety
    /// `av` must be a live array.
    pub unsafe fn av_unshift(&self, av: SvPtr, count: usize) {
        unsafe {
            self.with_av(av, |items| {
                items.splice(0..0, std::iter::repeat_n(None, count));
            })
        }
    }

    /// Release every element.
    ///
    /// # Safety
    /// `av` must be a live array.
    pub unsafe fn av_clear(&self, av: SvPtr) {
        let items = unsafe { self.with_av(av, std::mem::take) };
        for item in items.into_iter().flatten() {
            unsafe { self.sv_refcnt_dec(item) };
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::interp::{self, Interpreter};

    #[test]
    fn test_store_fetch_delete() {
        interp::sys_init();
        let perl = Interpreter::alloc();
        unsafe {
            Interpreter::construct(perl);
            let this = perl.as_ref();
            let av = this.new_av();

            assert!(this.av_store(av, 2, this.new_sv_iv(30)).is_none());
            assert_eq!(this.av_len(av), 3);
            assert!(!this.av_exists(av, 0));
            assert!(this.av_fetch(av, 0, false).is_none());
            assert_eq!(this.av_fetch(av, -1, false).map(|sv| this.sv_2iv(sv)), Some(30));

            let created = this.av_fetch(av, 0, true).unwrap();
            assert!(!this.sv_ok(created));
            assert!(this.av_exists(av, 0));

            let previous = this.av_store(av, 0, this.new_sv_iv(10)).unwrap();
            assert_eq!(this.sv_refcnt(previous), 1);
            this.sv_refcnt_dec(previous);

            let removed = this.av_delete(av, 2, false).unwrap();
            assert_eq!(this.sv_2iv(removed), 30);
            this.sv_refcnt_dec(removed);
            assert_eq!(this.av_len(av), 1);

            let first = this.av_shift(av).unwrap();
            assert_eq!(this.sv_2iv(first), 10);
            this.sv_refcnt_dec(first);
            assert_eq!(this.av_len(av), 0);

            this.sv_refcnt_dec(av);
            Interpreter::destruct(perl);
            Interpreter::free(perl);
        }
    }
}
