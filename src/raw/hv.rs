use crate::runtime::{Interpreter, InterpPtr, SvPtr};

/// Unchecked view of a hash.
///
/// A hash has a single iteration cursor. Starting a second iteration while
/// one is in progress restarts the first; callers must not interleave them.
#[derive(Debug, Clone, Copy)]
pub struct HvCollection {
    hv: SvPtr,
    perl: InterpPtr,
}

impl HvCollection {
    /// # Safety
    /// `hv` must be a hash owned by `perl`, and both must stay live while
    /// the view is used.
    pub unsafe fn new(hv: SvPtr, perl: InterpPtr) -> Self {
        Self { hv, perl }
    }

    fn interp(&self) -> &Interpreter {
        unsafe { self.perl.as_ref() }
    }

    /// Hash handle.
    pub fn as_ptr(&self) -> SvPtr {
        self.hv
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        unsafe { self.interp().hv_len(self.hv) }
    }

    /// Whether the hash is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the value under `key`.
    pub fn fetch(&self, key: &[u8], create: bool) -> Option<SvPtr> {
        unsafe { self.interp().hv_fetch(self.hv, key, create) }
    }

    /// Store an owned `value`. The previous value is handed back owned.
    pub fn store(&self, key: &[u8], value: SvPtr) -> Option<SvPtr> {
        unsafe { self.interp().hv_store(self.hv, key, value) }
    }

    /// Remove `key`; see [`Interpreter::hv_delete`].
    pub fn delete(&self, key: &[u8], discard: bool) -> Option<SvPtr> {
        unsafe { self.interp().hv_delete(self.hv, key, discard) }
    }

    /// Whether `key` is present.
    pub fn exists(&self, key: &[u8]) -> bool {
        unsafe { self.interp().hv_exists(self.hv, key) }
    }

    /// [`fetch`](Self::fetch) by a scalar key, stringified first.
    ///
    /// # Safety
    /// `key` must be live.
    pub unsafe fn fetch_ent(&self, key: SvPtr, create: bool) -> Option<SvPtr> {
        unsafe { self.interp().hv_fetch_ent(self.hv, key, create) }
    }

    /// [`store`](Self::store) by a scalar key.
    ///
    /// # Safety
    /// `key` must be live.
    pub unsafe fn store_ent(&self, key: SvPtr, value: SvPtr) -> Option<SvPtr> {
        unsafe { self.interp().hv_store_ent(self.hv, key, value) }
    }

    /// [`delete`](Self::delete) by a scalar key.
    ///
    /// # Safety
    /// `key` must be live.
    pub unsafe fn delete_ent(&self, key: SvPtr, discard: bool) -> Option<SvPtr> {
        unsafe { self.interp().hv_delete_ent(self.hv, key, discard) }
    }

    /// [`exists`](Self::exists) by a scalar key.
    ///
    /// # Safety
    /// `key` must be live.
    pub unsafe fn exists_ent(&self, key: SvPtr) -> bool {
        unsafe { self.interp().hv_exists_ent(self.hv, key) }
    }

    /// Release every entry.
    pub fn clear(&self) {
        unsafe { self.interp().hv_clear(self.hv) }
    }

    /// Snapshot of every entry with borrowed values. Leaves the cursor alone.
    pub fn entries(&self) -> Vec<(Vec<u8>, SvPtr)> {
        unsafe { self.interp().hv_entries(self.hv) }
    }

    /// Reset the cursor and iterate entries with borrowed values.
    pub fn cursor(&self) -> HvCursor {
        let remaining = unsafe { self.interp().hv_iterinit(self.hv) };
        HvCursor {
            collection: *self,
            remaining,
        }
    }
}

/// The hash's own iteration cursor.
#[derive(Debug)]
pub struct HvCursor {
    collection: HvCollection,
    remaining: usize,
}

impl Iterator for HvCursor {
    type Item = (Vec<u8>, SvPtr);

    fn next(&mut self) -> Option<Self::Item> {
        let collection = &self.collection;
        let entry = unsafe { collection.interp().hv_iternext(collection.hv) };
        if entry.is_some() {
            self.remaining = self.remaining.saturating_sub(1);
        }
        entry
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}
