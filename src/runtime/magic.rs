//! Extension magic: per-value hook tables.
//!
//! A value may carry any number of [`Magic`] records. Each points at a
//! static [`MgVtbl`]; the runtime calls `svt_get` before reading a scalar,
//! `svt_set` after writing one, and `svt_free` exactly once when the value
//! is released. The remaining slots complete the table shape and are carried
//! for extensions that inspect them.

use super::interp::{InterpPtr, Interpreter};
use super::sv::{SvPtr, head};

/// Extension magic type.
pub const PERL_MAGIC_EXT: u8 = b'~';

/// Hook invoked with the value and its magic record.
pub type MgHook = unsafe fn(InterpPtr, SvPtr, &Magic) -> i32;
/// Length hook.
pub type MgLenHook = unsafe fn(InterpPtr, SvPtr, &Magic) -> u32;
/// Copy hook for element magic.
pub type MgCopyHook = unsafe fn(InterpPtr, SvPtr, &Magic, SvPtr, &[u8]) -> i32;
/// Thread duplication hook.
pub type MgDupHook = unsafe fn(InterpPtr, &Magic) -> i32;
/// `local` hook.
pub type MgLocalHook = unsafe fn(InterpPtr, SvPtr, &Magic) -> i32;

/// Hook table. Compared by address, so instances should be `static`.
#[derive(Default)]
pub struct MgVtbl {
    /// Before a read.
    pub svt_get: Option<MgHook>,
    /// After a write.
    pub svt_set: Option<MgHook>,
    /// Length query.
    pub svt_len: Option<MgLenHook>,
    /// Clear.
    pub svt_clear: Option<MgHook>,
    /// Release of the carrying value.
    pub svt_free: Option<MgHook>,
    /// Element copy.
    pub svt_copy: Option<MgCopyHook>,
    /// Thread duplication.
    pub svt_dup: Option<MgDupHook>,
    /// `local`.
    pub svt_local: Option<MgLocalHook>,
}

/// One magic record attached to a value.
#[derive(Clone, Copy)]
pub struct Magic {
    /// Magic type, usually [`PERL_MAGIC_EXT`].
    pub ty: u8,
    /// Hook table.
    pub vtbl: &'static MgVtbl,
    /// Opaque word owned by the extension.
    pub ptr: usize,
}

impl std::fmt::Debug for Magic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Magic")
            .field("ty", &(self.ty as char))
            .field("vtbl", &(self.vtbl as *const MgVtbl))
            .field("ptr", &self.ptr)
            .finish()
    }
}

impl Interpreter {
    /// Attach extension magic.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_magicext(&self, sv: SvPtr, ty: u8, vtbl: &'static MgVtbl, ptr: usize) {
        unsafe { head(sv) }.magic.borrow_mut().push(Magic { ty, vtbl, ptr });
    }

    /// Find magic of type `ty` using exactly `vtbl`.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn mg_findext(&self, sv: SvPtr, ty: u8, vtbl: &'static MgVtbl) -> Option<Magic> {
        unsafe { head(sv) }
            .magic
            .borrow()
            .iter()
            .find(|mg| mg.ty == ty && std::ptr::eq(mg.vtbl, vtbl))
            .copied()
    }

    /// Detach magic of type `ty` using `vtbl` without running its free hook.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_unmagicext(&self, sv: SvPtr, ty: u8, vtbl: &'static MgVtbl) -> Option<Magic> {
        let mut magic = unsafe { head(sv) }.magic.borrow_mut();
        let index = magic
            .iter()
            .position(|mg| mg.ty == ty && std::ptr::eq(mg.vtbl, vtbl))?;
        Some(magic.remove(index))
    }

    /// Run get hooks.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn mg_get(&self, sv: SvPtr) {
        unsafe { self.run_hooks(sv, |vtbl| vtbl.svt_get) };
    }

    /// Run set hooks.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn mg_set(&self, sv: SvPtr) {
        unsafe { self.run_hooks(sv, |vtbl| vtbl.svt_set) };
    }

    unsafe fn run_hooks(&self, sv: SvPtr, pick: impl Fn(&MgVtbl) -> Option<MgHook>) {
        let head = unsafe { head(sv) };
        let hooked: Vec<(MgHook, Magic)> = {
            let magic = head.magic.borrow();
            if magic.is_empty() {
                return;
            }
            magic
                .iter()
                .filter_map(|mg| pick(mg.vtbl).map(|hook| (hook, *mg)))
                .collect()
        };
        for (hook, mg) in &hooked {
            unsafe { hook(self.as_ptr(), sv, mg) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::interp::{self, Interpreter};
    use std::cell::Cell;

    thread_local! {
        static FREED: Cell<usize> = const { Cell::new(0) };
        static READS: Cell<usize> = const { Cell::new(0) };
    }

    unsafe fn count_free(_perl: InterpPtr, _sv: SvPtr, mg: &Magic) -> i32 {
        FREED.with(|freed| freed.set(freed.get() + mg.ptr));
        0
    }

    unsafe fn count_read(_perl: InterpPtr, _sv: SvPtr, _mg: &Magic) -> i32 {
        READS.with(|reads| reads.set(reads.get() + 1));
        0
    }

    static COUNTING: MgVtbl = MgVtbl {
        svt_get: Some(count_read),
        svt_set: None,
        svt_len: None,
        svt_clear: None,
        svt_free: Some(count_free),
        svt_copy: None,
        svt_dup: None,
        svt_local: None,
    };

    #[test]
    fn test_free_hook_runs_once_and_get_hook_on_reads() {
        interp::sys_init();
        let perl = Interpreter::alloc();
        unsafe {
            Interpreter::construct(perl);
            let this = perl.as_ref();
            let sv = this.new_sv_iv(7);
            this.sv_magicext(sv, PERL_MAGIC_EXT, &COUNTING, 3);
            assert!(this.mg_findext(sv, PERL_MAGIC_EXT, &COUNTING).is_some());
            assert_eq!(this.sv_2iv(sv), 7);
            assert_eq!(READS.with(Cell::get), 1);

            this.sv_refcnt_inc(sv);
            this.sv_refcnt_dec(sv);
            assert_eq!(FREED.with(Cell::get), 0);
            this.sv_refcnt_dec(sv);
            assert_eq!(FREED.with(Cell::get), 3);

            Interpreter::destruct(perl);
            Interpreter::free(perl);
        }
    }
}
