//! Hash bodies.
//!
//! Keys are byte strings. Each hash has a single iteration cursor, reset by
//! [`Interpreter::hv_iterinit`]; iteration order is unspecified.

use std::collections::HashMap;

use super::interp::Interpreter;
use super::sv::{Body, SvPtr, head};

#[derive(Default)]
pub(crate) struct HashBody {
    pub entries: HashMap<Vec<u8>, SvPtr>,
    cursor: Option<Cursor>,
}

struct Cursor {
    keys: Vec<Vec<u8>>,
    position: usize,
}

/// One-at-a-time hash of a key, as used for bucket selection.
pub fn perl_hash(key: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    for &byte in key {
        hash = hash.wrapping_add(byte as u32);
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash.wrapping_add(hash << 15)
}

impl Interpreter {
    /// New empty hash.
    pub fn new_hv(&self) -> SvPtr {
        self.alloc_sv(Body::Hash(HashBody::default()))
    }

    unsafe fn with_hv<R>(&self, hv: SvPtr, edit: impl FnOnce(&mut HashBody) -> R) -> R {
        let result = match &mut *unsafe { head(hv) }.body.borrow_mut() {
            Body::Hash(hash) => Some(edit(hash)),
            _ => None,
        };
        match result {
            Some(result) => result,
            None => self.croak("Not a HASH reference"),
        }
    }

    /// Number of entries.
    ///
    /// # Safety
    /// `hv` must be a live hash.
    pub unsafe fn hv_len(&self, hv: SvPtr) -> usize {
        unsafe { self.with_hv(hv, |hash| hash.entries.len()) }
    }

    /// Borrow the value under `key`. With `lval`, a missing entry is created
    /// as a fresh undefined scalar.
    ///
    /// # Safety
    /// `hv` must be a live hash.
    pub unsafe fn hv_fetch(&self, hv: SvPtr, key: &[u8], lval: bool) -> Option<SvPtr> {
        let found = unsafe { self.with_hv(hv, |hash| hash.entries.get(key).copied()) };
        if found.is_some() || !lval {
            return found;
        }
        let fresh = self.new_sv();
        unsafe { self.with_hv(hv, |hash| hash.entries.insert(key.to_vec(), fresh)) };
        Some(fresh)
    }

    /// Store `value` under `key`, adopting its reference. Returns the
    /// previous value with its reference, which the caller must release.
    ///
    /// # Safety
    /// `hv` must be a live hash and the caller must own `value`.
    pub unsafe fn hv_store(&self, hv: SvPtr, key: &[u8], value: SvPtr) -> Option<SvPtr> {
        unsafe { self.with_hv(hv, |hash| hash.entries.insert(key.to_vec(), value)) }
    }

    /// Remove `key`. With `discard` the value is released and `None`
    /// returned; otherwise the caller receives its reference.
    ///
    /// # Safety
    /// `hv` must be a live hash.
    pub unsafe fn hv_delete(&self, hv: SvPtr, key: &[u8], discard: bool) -> Option<SvPtr> {
        let removed = unsafe { self.with_hv(hv, |hash| hash.entries.remove(key)) };
        match removed {
            Some(value) if discard => {
                unsafe { self.sv_refcnt_dec(value) };
                None
            }
            other => other,
        }
    }

    /// Whether `key` is present.
    ///
    /// # Safety
    /// `hv` must be a live hash.
    pub unsafe fn hv_exists(&self, hv: SvPtr, key: &[u8]) -> bool {
        unsafe { self.with_hv(hv, |hash| hash.entries.contains_key(key)) }
    }

    /// Release every entry and reset the cursor.
    ///
    /// # Safety
    /// `hv` must be a live hash.
    pub unsafe fn hv_clear(&self, hv: SvPtr) {
        let entries = unsafe {
            self.with_hv(hv, |hash| {
                hash.cursor = None;
                std::mem::take(&mut hash.entries)
            })
        };
        for (_, value) in entries {
            unsafe { self.sv_refcnt_dec(value) };
        }
    }

    /// Reset the cursor and return the entry count.
    ///
    /// # Safety
    /// `hv` must be a live hash.
    pub unsafe fn hv_iterinit(&self, hv: SvPtr) -> usize {
        unsafe {
            self.with_hv(hv, |hash| {
                let keys: Vec<Vec<u8>> = hash.entries.keys().cloned().collect();
                let count = keys.len();
                hash.cursor = Some(Cursor { keys, position: 0 });
                count
            })
        }
    }

    /// Advance the cursor. Entries deleted since [`hv_iterinit`] are
    /// skipped; the value is borrowed.
    ///
    /// [`hv_iterinit`]: Interpreter::hv_iterinit
    ///
    /// # Safety
    /// `hv` must be a live hash.
    pub unsafe fn hv_iternext(&self, hv: SvPtr) -> Option<(Vec<u8>, SvPtr)> {
        unsafe {
            self.with_hv(hv, |hash| {
                let cursor = hash.cursor.as_mut()?;
                while cursor.position < cursor.keys.len() {
                    let key = &cursor.keys[cursor.position];
                    cursor.position += 1;
                    if let Some(value) = hash.entries.get(key) {
                        return Some((key.clone(), *value));
                    }
                }
                hash.cursor = None;
                None
            })
        }
    }

    /// Snapshot of every entry, values borrowed.
    ///
    /// # Safety
    /// `hv` must be a live hash.
    pub unsafe fn hv_entries(&self, hv: SvPtr) -> Vec<(Vec<u8>, SvPtr)> {
        unsafe {
            self.with_hv(hv, |hash| {
                hash.entries
                    .iter()
                    .map(|(key, value)| (key.clone(), *value))
                    .collect()
            })
        }
    }

    /// [`hv_fetch`](Interpreter::hv_fetch) keyed by a scalar's string value.
    ///
    /// # Safety
    /// Both handles must be live.
    pub unsafe fn hv_fetch_ent(&self, hv: SvPtr, key: SvPtr, lval: bool) -> Option<SvPtr> {
        let (key, _) = unsafe { self.sv_2pv(key) };
        unsafe { self.hv_fetch(hv, &key, lval) }
    }

    /// [`hv_store`](Interpreter::hv_store) keyed by a scalar's string value.
    ///
    /// # Safety
    /// Both handles must be live and the caller must own `value`.
    pub unsafe fn hv_store_ent(&self, hv: SvPtr, key: SvPtr, value: SvPtr) -> Option<SvPtr> {
        let (key, _) = unsafe { self.sv_2pv(key) };
        unsafe { self.hv_store(hv, &key, value) }
    }

    /// [`hv_delete`](Interpreter::hv_delete) keyed by a scalar's string value.
    ///
    /// # Safety
    /// Both handles must be live.
    pub unsafe fn hv_delete_ent(&self, hv: SvPtr, key: SvPtr, discard: bool) -> Option<SvPtr> {
        let (key, _) = unsafe { self.sv_2pv(key) };
        unsafe { self.hv_delete(hv, &key, discard) }
    }

    /// [`hv_exists`](Interpreter::hv_exists) keyed by a scalar's string value.
    ///
    /// # Safety
    /// Both handles must be live.
    pub unsafe fn hv_exists_ent(&self, hv: SvPtr, key: SvPtr) -> bool {
        let (key, _) = unsafe { self.sv_2pv(key) };
        unsafe { self.hv_exists(hv, &key) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::interp;

    #[test]
    fn test_cursor_skips_deleted_entries() {
        interp::sys_init();
        let perl = Interpreter::alloc();
        unsafe {
            Interpreter::construct(perl);
            let this = perl.as_ref();
            let hv = this.new_hv();
            for (key, value) in [(b"a", 1), (b"b", 2), (b"c", 3)] {
                assert!(this.hv_store(hv, key, this.new_sv_iv(value)).is_none());
            }
            assert_eq!(this.hv_iterinit(hv), 3);
            let (first, _) = this.hv_iternext(hv).unwrap();
            let others: Vec<Vec<u8>> = [b"a", b"b", b"c"]
                .iter()
                .map(|key| key.to_vec())
                .filter(|key| *key != first)
                .collect();
            this.hv_delete(hv, &others[0], true);

            let mut rest = Vec::new();
            while let Some((key, _)) = this.hv_iternext(hv) {
                rest.push(key);
            }
            assert_eq!(rest, vec![others[1].clone()]);
            assert!(this.hv_iternext(hv).is_none());

            this.sv_refcnt_dec(hv);
            Interpreter::destruct(perl);
            Interpreter::free(perl);
        }
    }

    #[test]
    fn test_perl_hash_is_stable() {
        assert_eq!(perl_hash(b"key"), perl_hash(b"key"));
        assert_ne!(perl_hash(b"key"), perl_hash(b"kez"));
        assert_eq!(perl_hash(b""), 0);
    }
}
