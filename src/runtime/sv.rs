//! Value heads, reference counting and the scalar body.
//!
//! Every value the runtime hands out is an [`Sv`] on the heap, addressed
//! through [`SvPtr`]. The head carries an intrusive reference count and a
//! body: scalar, array, hash, code, format or io. Scalars keep independent
//! integer, float, string and reference slots, mirroring the classic
//! IOK/NOK/POK/ROK flag set.

use std::cell::{Cell, RefCell};
use std::ptr::NonNull;
use std::rc::Rc;

use super::av::ArrayBody;
use super::cv::CodeBody;
use super::hv::HashBody;
use super::interp::Interpreter;
use super::magic::Magic;
use super::numeric::{self, Numeric};

/// Raw handle to a runtime value.
pub type SvPtr = NonNull<Sv>;

/// Undefined scalar.
pub const SVT_NULL: u32 = 0;
/// Integer scalar.
pub const SVT_IV: u32 = 1;
/// Float scalar.
pub const SVT_NV: u32 = 2;
/// String scalar.
pub const SVT_PV: u32 = 3;
/// Inversion list (never produced, reserved).
pub const SVT_INVLIST: u32 = 4;
/// String plus integer.
pub const SVT_PVIV: u32 = 5;
/// String plus float.
pub const SVT_PVNV: u32 = 6;
/// Scalar with magic or a blessing.
pub const SVT_PVMG: u32 = 7;
/// Compiled regular expression (never produced, reserved).
pub const SVT_REGEXP: u32 = 8;
/// Glob (never produced, reserved).
pub const SVT_PVGV: u32 = 9;
/// Lvalue (never produced, reserved).
pub const SVT_PVLV: u32 = 10;
/// Array.
pub const SVT_PVAV: u32 = 11;
/// Hash.
pub const SVT_PVHV: u32 = 12;
/// Code.
pub const SVT_PVCV: u32 = 13;
/// Format.
pub const SVT_PVFM: u32 = 14;
/// I/O handle.
pub const SVT_PVIO: u32 = 15;

/// A runtime value head.
pub struct Sv {
    refcnt: Cell<u32>,
    immortal: bool,
    pub(crate) body: RefCell<Body>,
    pub(crate) magic: RefCell<Vec<Magic>>,
    pub(crate) stash: RefCell<Option<Rc<str>>>,
}

pub(crate) enum Body {
    Scalar(Scalar),
    Array(ArrayBody),
    Hash(HashBody),
    Code(CodeBody),
    Format,
    Io,
    Freed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Iv {
    Signed(i64),
    Unsigned(u64),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Pv {
    pub bytes: Vec<u8>,
    pub utf8: bool,
}

/// Scalar slots. The reference slot owns one count on its target.
#[derive(Debug, Default)]
pub(crate) struct Scalar {
    pub iv: Option<Iv>,
    pub nv: Option<f64>,
    pub pv: Option<Pv>,
    pub rv: Option<SvPtr>,
}

impl Scalar {
    pub fn is_defined(&self) -> bool {
        self.iv.is_some() || self.nv.is_some() || self.pv.is_some() || self.rv.is_some()
    }

    fn numeric(&self) -> Numeric {
        if let Some(iv) = self.iv {
            match iv {
                Iv::Signed(value) => Numeric::Int(value),
                Iv::Unsigned(value) => Numeric::UInt(value),
            }
        } else if let Some(nv) = self.nv {
            Numeric::Float(nv)
        } else if let Some(pv) = &self.pv {
            numeric::parse_prefix(&pv.bytes)
        } else if let Some(rv) = self.rv {
            Numeric::UInt(rv.as_ptr() as usize as u64)
        } else {
            Numeric::Int(0)
        }
    }
}

/// Borrow the head behind a handle.
///
/// # Safety
/// `sv` must point to a live value.
pub(crate) unsafe fn head<'a>(sv: SvPtr) -> &'a Sv {
    unsafe { &*sv.as_ptr() }
}

fn boxed(body: Body, immortal: bool) -> SvPtr {
    let sv = Box::new(Sv {
        refcnt: Cell::new(1),
        immortal,
        body: RefCell::new(body),
        magic: RefCell::new(Vec::new()),
        stash: RefCell::new(None),
    });
    NonNull::from(Box::leak(sv))
}

pub(crate) fn alloc_immortal(scalar: Scalar) -> SvPtr {
    boxed(Body::Scalar(scalar), true)
}

/// Release an immortal head at interpreter teardown.
///
/// # Safety
/// `sv` must come from [`alloc_immortal`] and be unreachable afterwards.
pub(crate) unsafe fn free_immortal(sv: SvPtr) {
    drop(unsafe { Box::from_raw(sv.as_ptr()) });
}

impl Interpreter {
    pub(crate) fn alloc_sv(&self, body: Body) -> SvPtr {
        self.live.set(self.live.get() + 1);
        boxed(body, false)
    }

    // ----- reference counting -----

    /// Current reference count.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_refcnt(&self, sv: SvPtr) -> u32 {
        unsafe { head(sv) }.refcnt.get()
    }

    /// Add one reference.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_refcnt_inc(&self, sv: SvPtr) -> SvPtr {
        let head = unsafe { head(sv) };
        if !head.immortal {
            head.refcnt.set(head.refcnt.get() + 1);
        }
        sv
    }

    /// Drop one reference, freeing the value when the count reaches zero.
    ///
    /// # Safety
    /// The caller must own the reference being released.
    pub unsafe fn sv_refcnt_dec(&self, sv: SvPtr) {
        let head = unsafe { head(sv) };
        if head.immortal {
            return;
        }
        match head.refcnt.get() {
            0 => tracing::warn!(sv = ?sv.as_ptr(), "attempt to free unreferenced value"),
            1 => {
                head.refcnt.set(0);
                unsafe { self.sv_free(sv) };
            }
            n => head.refcnt.set(n - 1),
        }
    }

    unsafe fn sv_free(&self, sv: SvPtr) {
        let head = unsafe { head(sv) };
        let magic = std::mem::take(&mut *head.magic.borrow_mut());
        for mg in &magic {
            if let Some(free) = mg.vtbl.svt_free {
                unsafe { free(self.as_ptr(), sv, mg) };
            }
        }
        let body = head.body.replace(Body::Freed);
        head.stash.take();
        self.live.set(self.live.get().saturating_sub(1));
        drop(unsafe { Box::from_raw(sv.as_ptr()) });
        unsafe { self.release_body(body) };
    }

    pub(crate) unsafe fn release_body(&self, body: Body) {
        match body {
            Body::Scalar(scalar) => {
                if let Some(rv) = scalar.rv {
                    unsafe { self.sv_refcnt_dec(rv) };
                }
            }
            Body::Array(array) => {
                for item in array.items.into_iter().flatten() {
                    unsafe { self.sv_refcnt_dec(item) };
                }
            }
            Body::Hash(hash) => {
                for (_, value) in hash.entries {
                    unsafe { self.sv_refcnt_dec(value) };
                }
            }
            Body::Code(code) => drop(code),
            Body::Format | Body::Io | Body::Freed => {}
        }
    }

    // ----- construction -----

    /// New undefined scalar.
    pub fn new_sv(&self) -> SvPtr {
        self.alloc_sv(Body::Scalar(Scalar::default()))
    }

    /// New, empty format body.
    pub fn new_format(&self) -> SvPtr {
        self.alloc_sv(Body::Format)
    }

    /// New, unopened I/O handle.
    pub fn new_io(&self) -> SvPtr {
        self.alloc_sv(Body::Io)
    }

    /// New integer scalar.
    pub fn new_sv_iv(&self, value: i64) -> SvPtr {
        self.alloc_sv(Body::Scalar(Scalar {
            iv: Some(Iv::Signed(value)),
            ..Scalar::default()
        }))
    }

    /// New unsigned integer scalar.
    pub fn new_sv_uv(&self, value: u64) -> SvPtr {
        self.alloc_sv(Body::Scalar(Scalar {
            iv: Some(uv_slot(value)),
            ..Scalar::default()
        }))
    }

    /// New float scalar.
    pub fn new_sv_nv(&self, value: f64) -> SvPtr {
        self.alloc_sv(Body::Scalar(Scalar {
            nv: Some(value),
            ..Scalar::default()
        }))
    }

    /// New string scalar from raw bytes.
    pub fn new_sv_pv(&self, bytes: &[u8], utf8: bool) -> SvPtr {
        self.alloc_sv(Body::Scalar(Scalar {
            pv: Some(Pv {
                bytes: bytes.to_vec(),
                utf8,
            }),
            ..Scalar::default()
        }))
    }

    /// New string scalar from text, flagged UTF-8 when it leaves ASCII.
    pub fn new_sv_str(&self, text: &str) -> SvPtr {
        self.new_sv_pv(text.as_bytes(), !text.is_ascii())
    }

    /// New scalar holding the canonical true or false value.
    pub fn new_sv_bool(&self, value: bool) -> SvPtr {
        self.alloc_sv(Body::Scalar(bool_scalar(value)))
    }

    /// New scalar holding a copy of `src` (`newSVsv`).
    ///
    /// # Safety
    /// `src` must be live.
    pub unsafe fn new_sv_sv(&self, src: SvPtr) -> SvPtr {
        let copy = unsafe { self.scalar_copy(src) };
        self.alloc_sv(Body::Scalar(copy))
    }

    /// New reference to `target`, taking an extra count on it.
    ///
    /// # Safety
    /// `target` must be live.
    pub unsafe fn new_rv_inc(&self, target: SvPtr) -> SvPtr {
        let target = unsafe { self.sv_refcnt_inc(target) };
        self.new_rv_noinc(target)
    }

    /// New reference to `target`, adopting the caller's count.
    pub fn new_rv_noinc(&self, target: SvPtr) -> SvPtr {
        self.alloc_sv(Body::Scalar(Scalar {
            rv: Some(target),
            ..Scalar::default()
        }))
    }

    /// Duplicate any value: scalars by value, arrays and hashes one level
    /// deep. Code, format and io values cannot be duplicated and come back
    /// as the same value with one more reference.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_dup_value(&self, sv: SvPtr) -> SvPtr {
        let tag = unsafe { self.sv_type(sv) };
        match tag {
            SVT_PVAV => {
                let av = self.new_av();
                let len = unsafe { self.av_len(sv) };
                for index in 0..len {
                    if let Some(item) = unsafe { self.av_fetch(sv, index as isize, false) } {
                        let copy = unsafe { self.new_sv_sv(item) };
                        unsafe { self.av_store(av, index as isize, copy) };
                    }
                }
                av
            }
            SVT_PVHV => {
                let hv = self.new_hv();
                for (key, value) in unsafe { self.hv_entries(sv) } {
                    let copy = unsafe { self.new_sv_sv(value) };
                    if let Some(old) = unsafe { self.hv_store(hv, &key, copy) } {
                        unsafe { self.sv_refcnt_dec(old) };
                    }
                }
                hv
            }
            SVT_PVCV | SVT_PVFM | SVT_PVIO => unsafe { self.sv_refcnt_inc(sv) },
            _ => unsafe { self.new_sv_sv(sv) },
        }
    }

    // ----- inspection -----

    /// Type tag of the value.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_type(&self, sv: SvPtr) -> u32 {
        let head = unsafe { head(sv) };
        let decorated = head.stash.borrow().is_some() || !head.magic.borrow().is_empty();
        match &*head.body.borrow() {
            Body::Scalar(_) if decorated => SVT_PVMG,
            Body::Scalar(scalar) => {
                let int = scalar.iv.is_some() || scalar.rv.is_some();
                match (int, scalar.nv.is_some(), scalar.pv.is_some()) {
                    (_, true, true) | (true, true, false) => SVT_PVNV,
                    (true, false, true) => SVT_PVIV,
                    (false, false, true) => SVT_PV,
                    (false, true, false) => SVT_NV,
                    (true, false, false) => SVT_IV,
                    (false, false, false) => SVT_NULL,
                }
            }
            Body::Array(_) => SVT_PVAV,
            Body::Hash(_) => SVT_PVHV,
            Body::Code(_) => SVT_PVCV,
            Body::Format => SVT_PVFM,
            Body::Io => SVT_PVIO,
            Body::Freed => SVT_NULL,
        }
    }

    unsafe fn with_scalar<R>(&self, sv: SvPtr, read: impl FnOnce(&Scalar) -> R) -> Option<R> {
        match &*unsafe { head(sv) }.body.borrow() {
            Body::Scalar(scalar) => Some(read(scalar)),
            _ => None,
        }
    }

    /// Whether the value is defined. Containers and code always are.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_ok(&self, sv: SvPtr) -> bool {
        unsafe { self.mg_get(sv) };
        match &*unsafe { head(sv) }.body.borrow() {
            Body::Scalar(scalar) => scalar.is_defined(),
            Body::Freed => false,
            _ => true,
        }
    }

    /// Integer slot is valid.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_iok(&self, sv: SvPtr) -> bool {
        unsafe { self.with_scalar(sv, |s| s.iv.is_some()) }.unwrap_or(false)
    }

    /// Integer slot holds an unsigned value above `i64::MAX`.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_isuv(&self, sv: SvPtr) -> bool {
        unsafe { self.with_scalar(sv, |s| matches!(s.iv, Some(Iv::Unsigned(_)))) }
            .unwrap_or(false)
    }

    /// Float slot is valid.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_nok(&self, sv: SvPtr) -> bool {
        unsafe { self.with_scalar(sv, |s| s.nv.is_some()) }.unwrap_or(false)
    }

    /// String slot is valid.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_pok(&self, sv: SvPtr) -> bool {
        unsafe { self.with_scalar(sv, |s| s.pv.is_some()) }.unwrap_or(false)
    }

    /// Scalar is a reference.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_rok(&self, sv: SvPtr) -> bool {
        unsafe { self.with_scalar(sv, |s| s.rv.is_some()) }.unwrap_or(false)
    }

    /// String slot is flagged as UTF-8.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_utf8(&self, sv: SvPtr) -> bool {
        unsafe { self.with_scalar(sv, |s| s.pv.as_ref().is_some_and(|pv| pv.utf8)) }
            .unwrap_or(false)
    }

    /// Referent of a reference. The caller does not own the result.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_rv(&self, sv: SvPtr) -> Option<SvPtr> {
        unsafe { self.with_scalar(sv, |s| s.rv) }.flatten()
    }

    unsafe fn numeric(&self, sv: SvPtr) -> Numeric {
        unsafe { self.mg_get(sv) };
        unsafe { self.with_scalar(sv, Scalar::numeric) }
            .unwrap_or(Numeric::UInt(sv.as_ptr() as usize as u64))
    }

    /// Signed integer reading (`SvIV`).
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_2iv(&self, sv: SvPtr) -> i64 {
        unsafe { self.numeric(sv) }.to_iv()
    }

    /// Unsigned integer reading (`SvUV`).
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_2uv(&self, sv: SvPtr) -> u64 {
        unsafe { self.numeric(sv) }.to_uv()
    }

    /// Float reading (`SvNV`).
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_2nv(&self, sv: SvPtr) -> f64 {
        unsafe { self.numeric(sv) }.to_nv()
    }

    /// Numeric reading without collapsing to one representation.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_numeric(&self, sv: SvPtr) -> Numeric {
        unsafe { self.numeric(sv) }
    }

    /// String reading (`SvPV`). Returns the bytes and the UTF-8 flag.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_2pv(&self, sv: SvPtr) -> (Vec<u8>, bool) {
        unsafe { self.mg_get(sv) };
        let reading = unsafe {
            self.with_scalar(sv, |s| {
                if let Some(pv) = &s.pv {
                    Ok((pv.bytes.clone(), pv.utf8))
                } else if let Some(iv) = s.iv {
                    let text = match iv {
                        Iv::Signed(value) => value.to_string(),
                        Iv::Unsigned(value) => value.to_string(),
                    };
                    Ok((text.into_bytes(), false))
                } else if let Some(nv) = s.nv {
                    Ok((numeric::format_nv(nv).into_bytes(), false))
                } else if let Some(rv) = s.rv {
                    Err(rv)
                } else {
                    Ok((Vec::new(), false))
                }
            })
        };
        match reading {
            Some(Ok(reading)) => reading,
            Some(Err(rv)) => {
                let text = unsafe { self.describe_reference(rv) };
                (text.into_bytes(), false)
            }
            None => {
                let text = unsafe { self.describe_reference(sv) };
                (text.into_bytes(), false)
            }
        }
    }

    /// String reading decoded lossily as UTF-8.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_2pv_string(&self, sv: SvPtr) -> String {
        let (bytes, _) = unsafe { self.sv_2pv(sv) };
        match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        }
    }

    unsafe fn describe_reference(&self, referent: SvPtr) -> String {
        let kind = unsafe { self.sv_reftype(referent, false) };
        let address = referent.as_ptr() as usize;
        match unsafe { self.sv_stash_name(referent) } {
            Some(class) => format!("{class}={kind}(0x{address:x})"),
            None => format!("{kind}(0x{address:x})"),
        }
    }

    /// Truthiness (`SvTRUE`).
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_true(&self, sv: SvPtr) -> bool {
        unsafe { self.mg_get(sv) };
        match &*unsafe { head(sv) }.body.borrow() {
            Body::Scalar(s) => {
                if let Some(pv) = &s.pv {
                    !(pv.bytes.is_empty() || pv.bytes == b"0")
                } else if let Some(iv) = s.iv {
                    iv != Iv::Signed(0) && iv != Iv::Unsigned(0)
                } else if let Some(nv) = s.nv {
                    nv != 0.0
                } else {
                    s.rv.is_some()
                }
            }
            Body::Freed => false,
            _ => true,
        }
    }

    // ----- assignment -----

    pub(crate) unsafe fn scalar_copy(&self, src: SvPtr) -> Scalar {
        unsafe { self.mg_get(src) };
        let copy = unsafe {
            self.with_scalar(src, |s| Scalar {
                iv: s.iv,
                nv: s.nv,
                pv: s.pv.clone(),
                rv: s.rv,
            })
        };
        match copy {
            Some(copy) => {
                if let Some(rv) = copy.rv {
                    unsafe { self.sv_refcnt_inc(rv) };
                }
                copy
            }
            None => self.croak("Can't copy a non-scalar value into a scalar"),
        }
    }

    unsafe fn replace_scalar(&self, sv: SvPtr, value: Scalar) {
        let head = unsafe { head(sv) };
        if head.immortal {
            if let Some(rv) = value.rv {
                unsafe { self.sv_refcnt_dec(rv) };
            }
            self.croak("Modification of a read-only value attempted");
        }
        let previous = match &mut *head.body.borrow_mut() {
            Body::Scalar(slot) => Some(std::mem::replace(slot, value)),
            _ => None,
        };
        match previous {
            Some(previous) => {
                if let Some(rv) = previous.rv {
                    unsafe { self.sv_refcnt_dec(rv) };
                }
                unsafe { self.mg_set(sv) };
            }
            None => self.croak("Modification of a non-scalar value attempted"),
        }
    }

    /// Copy the value of `src` into `dst` (`sv_setsv`).
    ///
    /// # Safety
    /// Both handles must be live.
    pub unsafe fn sv_setsv(&self, dst: SvPtr, src: SvPtr) {
        if dst == src {
            return;
        }
        let copy = unsafe { self.scalar_copy(src) };
        unsafe { self.replace_scalar(dst, copy) };
    }

    /// Store a signed integer.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_setiv(&self, sv: SvPtr, value: i64) {
        let scalar = Scalar {
            iv: Some(Iv::Signed(value)),
            ..Scalar::default()
        };
        unsafe { self.replace_scalar(sv, scalar) };
    }

    /// Store an unsigned integer.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_setuv(&self, sv: SvPtr, value: u64) {
        let scalar = Scalar {
            iv: Some(uv_slot(value)),
            ..Scalar::default()
        };
        unsafe { self.replace_scalar(sv, scalar) };
    }

    /// Store a float.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_setnv(&self, sv: SvPtr, value: f64) {
        let scalar = Scalar {
            nv: Some(value),
            ..Scalar::default()
        };
        unsafe { self.replace_scalar(sv, scalar) };
    }

    /// Store a byte string.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_setpvn(&self, sv: SvPtr, bytes: &[u8], utf8: bool) {
        let scalar = Scalar {
            pv: Some(Pv {
                bytes: bytes.to_vec(),
                utf8,
            }),
            ..Scalar::default()
        };
        unsafe { self.replace_scalar(sv, scalar) };
    }

    /// Store the canonical true or false value.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_setbool(&self, sv: SvPtr, value: bool) {
        unsafe { self.replace_scalar(sv, bool_scalar(value)) };
    }

    /// Make the scalar undefined.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_set_undef(&self, sv: SvPtr) {
        unsafe { self.replace_scalar(sv, Scalar::default()) };
    }

    /// Make the scalar a reference to `target`, taking a count on it.
    ///
    /// # Safety
    /// Both handles must be live.
    pub unsafe fn sv_setrv_inc(&self, sv: SvPtr, target: SvPtr) {
        let target = unsafe { self.sv_refcnt_inc(target) };
        unsafe { self.sv_setrv_noinc(sv, target) };
    }

    /// Make the scalar a reference to `target`, adopting the caller's count.
    ///
    /// # Safety
    /// Both handles must be live.
    pub unsafe fn sv_setrv_noinc(&self, sv: SvPtr, target: SvPtr) {
        let scalar = Scalar {
            rv: Some(target),
            ..Scalar::default()
        };
        unsafe { self.replace_scalar(sv, scalar) };
    }
}

fn uv_slot(value: u64) -> Iv {
    if value <= i64::MAX as u64 {
        Iv::Signed(value as i64)
    } else {
        Iv::Unsigned(value)
    }
}

pub(crate) fn bool_scalar(value: bool) -> Scalar {
    let (int, text): (i64, &[u8]) = if value { (1, b"1") } else { (0, b"") };
    Scalar {
        iv: Some(Iv::Signed(int)),
        nv: Some(int as f64),
        pv: Some(Pv {
            bytes: text.to_vec(),
            utf8: false,
        }),
        rv: None,
    }
}
