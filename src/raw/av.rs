use crate::runtime::{Interpreter, InterpPtr, SvPtr};

/// Unchecked view of an array.
#[derive(Debug, Clone, Copy)]
pub struct AvCollection {
    av: SvPtr,
    perl: InterpPtr,
}

impl AvCollection {
    /// # Safety
    /// `av` must be an array owned by `perl`, and both must stay live while
    /// the view is used.
    pub unsafe fn new(av: SvPtr, perl: InterpPtr) -> Self {
        Self { av, perl }
    }

    fn interp(&self) -> &Interpreter {
        unsafe { self.perl.as_ref() }
    }

    /// Array handle.
    pub fn as_ptr(&self) -> SvPtr {
        self.av
    }

    /// Number of elements, holes included.
    pub fn len(&self) -> usize {
        unsafe { self.interp().av_len(self.av) }
    }

    /// Whether the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocated slots.
    pub fn capacity(&self) -> usize {
        unsafe { self.interp().av_capacity(self.av) }
    }

    /// Borrow the element at `index`.
    pub fn fetch(&self, index: isize, create: bool) -> Option<SvPtr> {
        unsafe { self.interp().av_fetch(self.av, index, create) }
    }

    /// Store an owned `value`. The previous occupant is handed back owned.
    pub fn store(&self, index: isize, value: SvPtr) -> Option<SvPtr> {
        unsafe { self.interp().av_store(self.av, index, value) }
    }

    /// Remove the element at `index`; see [`Interpreter::av_delete`].
    pub fn delete(&self, index: isize, discard: bool) -> Option<SvPtr> {
        unsafe { self.interp().av_delete(self.av, index, discard) }
    }

    /// Whether an element lives at `index`.
    pub fn exists(&self, index: isize) -> bool {
        unsafe { self.interp().av_exists(self.av, index) }
    }

    /// Preallocate room for `count` elements.
    pub fn extend(&self, count: usize) {
        if count > 0 {
            unsafe { self.interp().av_extend(self.av, count - 1) }
        }
    }

    /// Append an owned value.
    pub fn append(&self, value: SvPtr) {
        unsafe { self.interp().av_push(self.av, value) }
    }

    /// Remove the last element, owned.
    pub fn pop(&self) -> Option<SvPtr> {
        unsafe { self.interp().av_pop(self.av) }
    }

    /// Remove the first element, owned. O(n): the remaining elements move.
    pub fn remove_first(&self) -> Option<SvPtr> {
        unsafe { self.interp().av_shift(self.av) }
    }

    /// Insert an owned value at the front. O(n).
    pub fn prepend(&self, value: SvPtr) {
        let interp = self.interp();
        unsafe {
            interp.av_unshift(self.av, 1);
            if let Some(hole) = interp.av_store(self.av, 0, value) {
                interp.sv_refcnt_dec(hole);
            }
        }
    }

    /// Release every element.
    pub fn clear(&self) {
        unsafe { self.interp().av_clear(self.av) }
    }

    /// Borrowed elements in index order; holes yield `None`.
    pub fn iter(&self) -> AvIter {
        AvIter {
            collection: *self,
            index: 0,
        }
    }
}

/// Iterator over an array's slots. The length is read on every step, so
/// the array may change during iteration.
#[derive(Debug)]
pub struct AvIter {
    collection: AvCollection,
    index: usize,
}

impl Iterator for AvIter {
    type Item = Option<SvPtr>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.collection.len() {
            return None;
        }
        let item = self.collection.fetch(self.index as isize, false);
        self.index += 1;
        Some(item)
    }
}
