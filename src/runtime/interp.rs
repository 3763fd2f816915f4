//! Interpreter state, lifecycle and the call protocol.
//!
//! An interpreter owns the argument stack and its marks, the temporaries
//! stack with its floor, scope frames, the symbol table and the module
//! table. Exceptions (`croak`) unwind to the nearest `G_EVAL` frame, which
//! restores the stacks and leaves the error in `$@`.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};
use std::rc::Rc;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use super::eval;
use super::sv::{self, Scalar, SvPtr, bool_scalar};

/// Raw handle to an interpreter.
pub type InterpPtr = NonNull<Interpreter>;

/// Module bootstrap, run once by [`Interpreter::require_module`].
pub type ModuleBoot = Rc<dyn Fn(InterpPtr)>;

/// Void context.
pub const G_VOID: u32 = 1;
/// Scalar context.
pub const G_SCALAR: u32 = 2;
/// List context.
pub const G_LIST: u32 = 3;
/// Context mask.
pub const G_WANT: u32 = 3;
/// Drop results and temporaries created by the call.
pub const G_DISCARD: u32 = 0x4;
/// Trap exceptions into `$@`.
pub const G_EVAL: u32 = 0x8;
/// Call without arguments and without popping a mark.
pub const G_NOARGS: u32 = 0x10;
/// Resolve the target as a method on the first argument.
pub const G_METHOD: u32 = 0x40;

/// Create missing globals on lookup.
pub const GV_ADD: u32 = 0x1;

/// Unwind payload of a runtime exception.
#[derive(Debug)]
pub struct Croak;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Constructed,
    Running,
    Destructing,
}

#[derive(Default)]
pub(crate) struct Glob {
    pub sv: Option<SvPtr>,
    pub av: Option<SvPtr>,
    pub hv: Option<SvPtr>,
    pub cv: Option<SvPtr>,
}

impl Glob {
    fn slots(self) -> impl Iterator<Item = SvPtr> {
        [self.sv, self.av, self.hv, self.cv].into_iter().flatten()
    }
}

struct Frame {
    stack: usize,
    marks: usize,
    contexts: usize,
    scopes: usize,
    floor: usize,
}

/// Interpreter state.
pub struct Interpreter {
    stack: RefCell<Vec<SvPtr>>,
    marks: RefCell<Vec<usize>>,
    tmps: RefCell<Vec<SvPtr>>,
    tmps_floor: Cell<usize>,
    scopes: RefCell<Vec<Vec<usize>>>,
    contexts: RefCell<Vec<u32>>,
    symbols: RefCell<HashMap<String, Glob>>,
    modules: RefCell<HashMap<String, ModuleBoot>>,
    loaded: RefCell<HashSet<String>>,
    errsv: Cell<Option<SvPtr>>,
    pub(crate) live: Cell<usize>,
    phase: Cell<Phase>,
    destruct_level: Cell<u8>,
    sv_undef: SvPtr,
    sv_yes: SvPtr,
    sv_no: SvPtr,
}

static SYS_INIT: Once = Once::new();
static SYS_READY: AtomicBool = AtomicBool::new(false);
static MAIN: AtomicPtr<Interpreter> = AtomicPtr::new(ptr::null_mut());

thread_local! {
    static CURRENT: Cell<Option<InterpPtr>> = const { Cell::new(None) };
}

/// Process-wide initialisation. Runs once; later calls are no-ops.
pub fn sys_init() {
    SYS_INIT.call_once(|| {
        tracing::debug!("runtime process initialisation");
        SYS_READY.store(true, Ordering::SeqCst);
    });
}

/// Process-wide teardown. No interpreter may be allocated afterwards.
pub fn sys_term() {
    SYS_READY.store(false, Ordering::SeqCst);
    tracing::debug!("runtime process teardown");
}

/// The interpreter current on this thread.
pub fn get_context() -> Option<InterpPtr> {
    CURRENT.with(Cell::get)
}

/// Make `perl` current on this thread.
pub fn set_context(perl: Option<InterpPtr>) {
    CURRENT.with(|current| current.set(perl));
}

/// The first interpreter allocated in the process, while it lives.
pub fn main_interpreter() -> Option<InterpPtr> {
    NonNull::new(MAIN.load(Ordering::SeqCst))
}

fn want(flags: u32) -> u32 {
    match flags & G_WANT {
        0 => G_SCALAR,
        gimme => gimme,
    }
}

impl Interpreter {
    // ----- lifecycle -----

    /// Allocate an interpreter.
    ///
    /// # Panics
    /// If [`sys_init`] has not run, which is unrecoverable.
    pub fn alloc() -> InterpPtr {
        assert!(
            SYS_READY.load(Ordering::SeqCst),
            "interpreter allocated before process initialisation"
        );
        let interp = Box::new(Interpreter {
            stack: RefCell::new(Vec::new()),
            marks: RefCell::new(Vec::new()),
            tmps: RefCell::new(Vec::new()),
            tmps_floor: Cell::new(0),
            scopes: RefCell::new(Vec::new()),
            contexts: RefCell::new(Vec::new()),
            symbols: RefCell::new(HashMap::new()),
            modules: RefCell::new(HashMap::new()),
            loaded: RefCell::new(HashSet::new()),
            errsv: Cell::new(None),
            live: Cell::new(0),
            phase: Cell::new(Phase::Constructed),
            destruct_level: Cell::new(1),
            sv_undef: sv::alloc_immortal(Scalar::default()),
            sv_yes: sv::alloc_immortal(bool_scalar(true)),
            sv_no: sv::alloc_immortal(bool_scalar(false)),
        });
        let perl = NonNull::from(Box::leak(interp));
        let _ = MAIN.compare_exchange(
            ptr::null_mut(),
            perl.as_ptr(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        perl
    }

    /// Set up the error variable and the `main` package.
    ///
    /// # Safety
    /// `perl` must come from [`Interpreter::alloc`].
    pub unsafe fn construct(perl: InterpPtr) {
        let this = unsafe { perl.as_ref() };
        let errsv = this.gv_fetch_sv("@");
        unsafe { this.sv_setpvn(errsv, b"", false) };
        this.errsv.set(Some(errsv));
        this.phase.set(Phase::Constructed);
    }

    /// Record the program name and run the extension initialiser.
    ///
    /// # Safety
    /// `perl` must be constructed.
    pub unsafe fn parse(perl: InterpPtr, xs_init: Option<fn(InterpPtr)>, args: &[String]) -> i32 {
        let this = unsafe { perl.as_ref() };
        let program = this.gv_fetch_sv("0");
        let name = args.first().map(String::as_str).unwrap_or("perlbridge");
        unsafe { this.sv_setpvn(program, name.as_bytes(), !name.is_ascii()) };
        let argv = this.gv_fetch_av("ARGV");
        for arg in args.iter().skip(1) {
            unsafe { this.av_push(argv, this.new_sv_str(arg)) };
        }
        if let Some(xs_init) = xs_init {
            xs_init(perl);
        }
        0
    }

    /// Enter the running phase.
    ///
    /// # Safety
    /// `perl` must be parsed.
    pub unsafe fn run(perl: InterpPtr) -> i32 {
        unsafe { perl.as_ref() }.phase.set(Phase::Running);
        0
    }

    /// Release temporaries and, unless the destruct level is zero, every
    /// global. Values still referenced from outside stay allocated and are
    /// reported by [`Interpreter::live_values`].
    ///
    /// # Safety
    /// `perl` must be constructed; nothing may run on it afterwards except
    /// [`Interpreter::free`].
    pub unsafe fn destruct(perl: InterpPtr) -> i32 {
        let this = unsafe { perl.as_ref() };
        this.phase.set(Phase::Destructing);
        this.stack.borrow_mut().clear();
        this.marks.borrow_mut().clear();
        this.contexts.borrow_mut().clear();
        this.scopes.borrow_mut().clear();
        this.tmps_floor.set(0);
        unsafe { this.freetmps() };
        if this.destruct_level.get() == 0 {
            tracing::debug!(live = this.live.get(), "interpreter destructed, globals kept");
            return 0;
        }

        // finalizers may create globals again; bounded so a misbehaving one
        // cannot keep teardown alive
        for _ in 0..16 {
            let symbols = std::mem::take(&mut *this.symbols.borrow_mut());
            if symbols.is_empty() {
                break;
            }
            this.errsv.set(None);
            for (_, glob) in symbols {
                for sv in glob.slots() {
                    unsafe { this.sv_refcnt_dec(sv) };
                }
            }
            unsafe { this.freetmps() };
        }
        this.errsv.set(None);
        this.modules.borrow_mut().clear();
        tracing::debug!(live = this.live.get(), "interpreter destructed");
        0
    }

    /// Free the interpreter itself.
    ///
    /// # Safety
    /// `perl` must be destructed and unused afterwards.
    pub unsafe fn free(perl: InterpPtr) {
        let _ = MAIN.compare_exchange(
            perl.as_ptr(),
            ptr::null_mut(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if get_context() == Some(perl) {
            set_context(None);
        }
        let this = unsafe { Box::from_raw(perl.as_ptr()) };
        for immortal in [this.sv_undef, this.sv_yes, this.sv_no] {
            unsafe { sv::free_immortal(immortal) };
        }
    }

    /// How much [`destruct`](Self::destruct) releases: `0` leaves globals
    /// to the process, anything else frees them.
    pub fn set_destruct_level(&self, level: u8) {
        self.destruct_level.set(level);
    }

    /// Handle to this interpreter.
    pub fn as_ptr(&self) -> InterpPtr {
        NonNull::from(self)
    }

    /// Whether the interpreter is tearing down.
    pub fn is_destructing(&self) -> bool {
        self.phase.get() == Phase::Destructing
    }

    /// Values allocated and not yet freed, immortals excluded.
    pub fn live_values(&self) -> usize {
        self.live.get()
    }

    /// The immortal undefined value.
    pub fn sv_undef(&self) -> SvPtr {
        self.sv_undef
    }

    /// The immortal true value.
    pub fn sv_yes(&self) -> SvPtr {
        self.sv_yes
    }

    /// The immortal false value.
    pub fn sv_no(&self) -> SvPtr {
        self.sv_no
    }

    /// The error variable `$@`.
    pub fn errsv(&self) -> SvPtr {
        match self.errsv.get() {
            Some(errsv) => errsv,
            None => {
                let errsv = self.gv_fetch_sv("@");
                self.errsv.set(Some(errsv));
                errsv
            }
        }
    }

    // ----- argument stack -----

    /// Remember the current stack height as the start of an argument list.
    pub fn push_mark(&self) {
        let height = self.stack.borrow().len();
        self.marks.borrow_mut().push(height);
    }

    /// Pop the innermost mark.
    pub fn pop_mark(&self) -> usize {
        self.marks.borrow_mut().pop().unwrap_or(0)
    }

    /// Innermost mark.
    pub fn top_mark(&self) -> usize {
        self.marks.borrow().last().copied().unwrap_or(0)
    }

    /// Stack height.
    pub fn stack_len(&self) -> usize {
        self.stack.borrow().len()
    }

    /// Push a borrowed value.
    pub fn stack_push(&self, sv: SvPtr) {
        self.stack.borrow_mut().push(sv);
    }

    /// Value at `index`.
    pub fn stack_get(&self, index: usize) -> Option<SvPtr> {
        self.stack.borrow().get(index).copied()
    }

    /// Overwrite the slot at `index`, growing the stack with `undef`.
    pub fn stack_set(&self, index: usize, sv: SvPtr) {
        let mut stack = self.stack.borrow_mut();
        if index >= stack.len() {
            stack.resize(index + 1, self.sv_undef);
        }
        stack[index] = sv;
    }

    /// Shrink the stack to `len`.
    pub fn stack_truncate(&self, len: usize) {
        self.stack.borrow_mut().truncate(len);
    }

    /// Reserve room for `additional` pushes.
    pub fn stack_extend(&self, additional: usize) {
        self.stack.borrow_mut().reserve(additional);
    }

    /// Copy of the stack from `from` to the top.
    pub fn stack_slice(&self, from: usize) -> Vec<SvPtr> {
        let stack = self.stack.borrow();
        stack.get(from..).map(<[SvPtr]>::to_vec).unwrap_or_default()
    }

    /// Context of the innermost active sub call.
    pub fn gimme(&self) -> u32 {
        self.contexts.borrow().last().copied().unwrap_or(G_VOID)
    }

    // ----- temporaries and scopes -----

    /// Schedule `sv` for release at the next [`freetmps`](Self::freetmps)
    /// above the current floor.
    pub fn sv_2mortal(&self, sv: SvPtr) -> SvPtr {
        self.tmps.borrow_mut().push(sv);
        sv
    }

    /// Open a scope.
    pub fn enter(&self) {
        self.scopes.borrow_mut().push(Vec::new());
    }

    /// Raise the temporaries floor, restored by the enclosing [`leave`](Self::leave).
    pub fn savetmps(&self) {
        let floor = self.tmps_floor.get();
        if let Some(frame) = self.scopes.borrow_mut().last_mut() {
            frame.push(floor);
        }
        self.tmps_floor.set(self.tmps.borrow().len());
    }

    /// Release temporaries above the floor.
    ///
    /// # Safety
    /// Every temporary must still own its reference.
    pub unsafe fn freetmps(&self) {
        loop {
            let next = {
                let mut tmps = self.tmps.borrow_mut();
                if tmps.len() <= self.tmps_floor.get() {
                    break;
                }
                tmps.pop()
            };
            if let Some(sv) = next {
                unsafe { self.sv_refcnt_dec(sv) };
            }
        }
    }

    /// Close a scope, restoring any floor it saved.
    pub fn leave(&self) {
        let frame = self.scopes.borrow_mut().pop();
        if let Some(saved) = frame.and_then(|frame| frame.first().copied()) {
            self.tmps_floor.set(saved);
        }
    }

    fn frame(&self, stack: usize) -> Frame {
        Frame {
            stack,
            marks: self.marks.borrow().len(),
            contexts: self.contexts.borrow().len(),
            scopes: self.scopes.borrow().len(),
            floor: self.tmps_floor.get(),
        }
    }

    fn unwind_to(&self, frame: &Frame) {
        self.stack.borrow_mut().truncate(frame.stack);
        self.marks.borrow_mut().truncate(frame.marks);
        self.contexts.borrow_mut().truncate(frame.contexts);
        self.scopes.borrow_mut().truncate(frame.scopes);
        self.tmps_floor.set(frame.floor);
    }

    // ----- globals -----

    pub(crate) fn qualify(name: &str) -> String {
        if let Some(rest) = name.strip_prefix("::") {
            format!("main::{rest}")
        } else if name.contains("::") {
            name.to_string()
        } else {
            format!("main::{name}")
        }
    }

    fn glob_slot(&self, name: &str, slot: fn(&mut Glob) -> &mut Option<SvPtr>) -> Option<SvPtr> {
        let mut symbols = self.symbols.borrow_mut();
        symbols.get_mut(&Self::qualify(name)).and_then(|glob| *slot(glob))
    }

    fn glob_fill(
        &self,
        name: &str,
        slot: fn(&mut Glob) -> &mut Option<SvPtr>,
        create: impl FnOnce() -> SvPtr,
    ) -> SvPtr {
        if let Some(existing) = self.glob_slot(name, slot) {
            return existing;
        }
        let fresh = create();
        let mut symbols = self.symbols.borrow_mut();
        *slot(symbols.entry(Self::qualify(name)).or_default()) = Some(fresh);
        fresh
    }

    fn gv_fetch_sv(&self, name: &str) -> SvPtr {
        self.glob_fill(name, |glob| &mut glob.sv, || self.new_sv())
    }

    fn gv_fetch_av(&self, name: &str) -> SvPtr {
        self.glob_fill(name, |glob| &mut glob.av, || self.new_av())
    }

    /// Global scalar `$name`. The glob keeps the reference.
    pub fn get_sv(&self, name: &str, flags: u32) -> Option<SvPtr> {
        if flags & GV_ADD != 0 {
            Some(self.gv_fetch_sv(name))
        } else {
            self.glob_slot(name, |glob| &mut glob.sv)
        }
    }

    /// Global array `@name`. The glob keeps the reference.
    pub fn get_av(&self, name: &str, flags: u32) -> Option<SvPtr> {
        if flags & GV_ADD != 0 {
            Some(self.gv_fetch_av(name))
        } else {
            self.glob_slot(name, |glob| &mut glob.av)
        }
    }

    /// Global hash `%name`. The glob keeps the reference.
    pub fn get_hv(&self, name: &str, flags: u32) -> Option<SvPtr> {
        if flags & GV_ADD != 0 {
            Some(self.glob_fill(name, |glob| &mut glob.hv, || self.new_hv()))
        } else {
            self.glob_slot(name, |glob| &mut glob.hv)
        }
    }

    /// Sub `&name`. With [`GV_ADD`] a missing sub is declared as a stub
    /// that croaks when called.
    pub fn get_cv(&self, name: &str, flags: u32) -> Option<SvPtr> {
        if flags & GV_ADD != 0 {
            Some(self.glob_fill(name, |glob| &mut glob.cv, || self.new_stub(name)))
        } else {
            self.glob_slot(name, |glob| &mut glob.cv)
        }
    }

    pub(crate) fn install_cv(&self, name: &str, cv: SvPtr) {
        let previous = {
            let mut symbols = self.symbols.borrow_mut();
            symbols
                .entry(Self::qualify(name))
                .or_default()
                .cv
                .replace(cv)
        };
        if let Some(previous) = previous {
            unsafe { self.sv_refcnt_dec(previous) };
        }
    }

    // ----- classes -----

    /// Bless the referent of `rv` into `class`.
    ///
    /// # Safety
    /// `rv` must be live.
    pub unsafe fn sv_bless(&self, rv: SvPtr, class: &str) -> SvPtr {
        let Some(target) = (unsafe { self.sv_rv(rv) }) else {
            self.croak("Can't bless non-reference value");
        };
        *unsafe { sv::head(target) }.stash.borrow_mut() = Some(Rc::from(class));
        rv
    }

    /// Turn `rv` into a reference to a new integer scalar holding `value`,
    /// optionally blessed into `class`.
    ///
    /// # Safety
    /// `rv` must be live.
    pub unsafe fn sv_setref_iv(&self, rv: SvPtr, class: Option<&str>, value: i64) -> SvPtr {
        let target = self.new_sv_iv(value);
        unsafe { self.sv_setrv_noinc(rv, target) };
        if let Some(class) = class {
            unsafe { self.sv_bless(rv, class) };
        }
        rv
    }

    /// Package a referent is blessed into.
    ///
    /// # Safety
    /// `referent` must be live.
    pub unsafe fn sv_stash_name(&self, referent: SvPtr) -> Option<String> {
        unsafe { sv::head(referent) }
            .stash
            .borrow()
            .as_deref()
            .map(str::to_string)
    }

    /// Class of the object `sv` refers to.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_object_class(&self, sv: SvPtr) -> Option<String> {
        let target = unsafe { self.sv_rv(sv) }?;
        unsafe { self.sv_stash_name(target) }
    }

    /// Whether `sv` is a reference to a blessed value.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_isobject(&self, sv: SvPtr) -> bool {
        unsafe { self.sv_object_class(sv) }.is_some()
    }

    /// Reference type of a referent: `SCALAR`, `REF`, `ARRAY`, `HASH`,
    /// `CODE`, `FORMAT` or `IO`, or the class name when `ob` is set and the
    /// referent is blessed.
    ///
    /// # Safety
    /// `referent` must be live.
    pub unsafe fn sv_reftype(&self, referent: SvPtr, ob: bool) -> String {
        if ob {
            if let Some(class) = unsafe { self.sv_stash_name(referent) } {
                return class;
            }
        }
        let kind = match unsafe { self.sv_type(referent) } {
            sv::SVT_PVAV => "ARRAY",
            sv::SVT_PVHV => "HASH",
            sv::SVT_PVCV => "CODE",
            sv::SVT_PVFM => "FORMAT",
            sv::SVT_PVIO => "IO",
            _ if unsafe { self.sv_rok(referent) } => "REF",
            _ => "SCALAR",
        };
        kind.to_string()
    }

    /// Parent classes listed in `@Class::ISA`.
    pub fn isa(&self, class: &str) -> Vec<String> {
        let Some(av) = self.get_av(&format!("{class}::ISA"), 0) else {
            return Vec::new();
        };
        let len = unsafe { self.av_len(av) };
        (0..len)
            .filter_map(|index| unsafe { self.av_fetch(av, index as isize, false) })
            .map(|sv| unsafe { self.sv_2pv_string(sv) })
            .collect()
    }

    /// Whether `child` is `parent` or inherits from it.
    pub fn class_derives(&self, child: &str, parent: &str) -> bool {
        self.class_derives_at(child, parent, 0)
    }

    fn class_derives_at(&self, child: &str, parent: &str, depth: usize) -> bool {
        if child == parent {
            return true;
        }
        if depth > 100 {
            self.croak(&format!("Recursive inheritance detected in package '{child}'"));
        }
        self.isa(child)
            .iter()
            .any(|base| self.class_derives_at(base, parent, depth + 1))
    }

    /// Whether `child` inherits from `parent` and is not `parent` itself.
    pub fn is_strict_subclass(&self, child: &str, parent: &str) -> bool {
        child != parent && self.class_derives(child, parent)
    }

    /// Whether `sv` (an object or a class name) derives from `class`.
    ///
    /// # Safety
    /// `sv` must be live.
    pub unsafe fn sv_derived_from(&self, sv: SvPtr, class: &str) -> bool {
        if let Some(target) = unsafe { self.sv_rv(sv) } {
            match unsafe { self.sv_stash_name(target) } {
                Some(name) => self.class_derives(&name, class),
                None => (unsafe { self.sv_reftype(target, false) }) == class,
            }
        } else {
            let name = unsafe { self.sv_2pv_string(sv) };
            self.class_derives(&name, class)
        }
    }

    /// Find `method` in `class` or its ancestors, depth first.
    pub fn find_method(&self, class: &str, method: &str) -> Option<SvPtr> {
        self.find_method_at(class, method, 0)
    }

    fn find_method_at(&self, class: &str, method: &str, depth: usize) -> Option<SvPtr> {
        if depth > 100 {
            self.croak(&format!("Recursive inheritance detected in package '{class}'"));
        }
        if let Some(cv) = self.get_cv(&format!("{class}::{method}"), 0) {
            if unsafe { self.cv_xsub(cv) }.is_some() {
                return Some(cv);
            }
        }
        self.isa(class)
            .iter()
            .find_map(|base| self.find_method_at(base, method, depth + 1))
    }

    // ----- exceptions -----

    /// Raise `err` as an exception.
    ///
    /// # Safety
    /// `err` must be live.
    pub unsafe fn croak_sv(&self, err: SvPtr) -> ! {
        let errsv = self.errsv();
        unsafe { self.sv_setsv(errsv, err) };
        tracing::trace!("croak");
        panic::resume_unwind(Box::new(Croak))
    }

    /// Raise a message as an exception.
    pub fn croak(&self, message: &str) -> ! {
        let err = self.sv_2mortal(self.new_sv_str(message));
        unsafe { self.croak_sv(err) }
    }

    fn clear_errsv(&self) {
        unsafe { self.sv_setpvn(self.errsv(), b"", false) };
    }

    /// Run `body` as an eval block rooted at `mark`. A croak restores the
    /// stacks to the frame, leaves the error in `$@`, and yields `undef` in
    /// scalar context. Other panics continue unwinding.
    pub(crate) fn eval_frame(&self, mark: usize, gimme: u32, body: impl FnOnce() -> usize) -> usize {
        let frame = self.frame(mark);
        self.clear_errsv();
        match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(count) => count,
            Err(payload) => {
                if !payload.is::<Croak>() {
                    panic::resume_unwind(payload);
                }
                self.unwind_to(&frame);
                if gimme == G_SCALAR {
                    self.stack_push(self.sv_undef);
                    1
                } else {
                    0
                }
            }
        }
    }

    // ----- calls -----

    /// Call `target` (a code value, a reference to one, or a sub name; with
    /// [`G_METHOD`], a method name) with the arguments above the top mark.
    /// Returns the number of results left on the stack from that mark.
    ///
    /// # Safety
    /// Every value on the stack must be live.
    pub unsafe fn call_sv(&self, target: SvPtr, flags: u32) -> usize {
        let gimme = want(flags);
        let mark = if flags & G_NOARGS != 0 {
            self.stack_len()
        } else {
            self.pop_mark()
        };
        if flags & G_DISCARD != 0 {
            self.enter();
            self.savetmps();
        }
        let count = if flags & G_EVAL != 0 {
            self.eval_frame(mark, gimme, || unsafe { self.invoke(target, mark, gimme, flags) })
        } else {
            unsafe { self.invoke(target, mark, gimme, flags) }
        };
        if flags & G_DISCARD != 0 {
            self.stack_truncate(mark);
            unsafe { self.freetmps() };
            self.leave();
            return 0;
        }
        count
    }

    /// [`call_sv`](Self::call_sv) by sub name.
    ///
    /// # Safety
    /// Every value on the stack must be live.
    pub unsafe fn call_pv(&self, name: &str, flags: u32) -> usize {
        let target = self.sv_2mortal(self.new_sv_str(name));
        unsafe { self.call_sv(target, flags) }
    }

    /// [`call_sv`](Self::call_sv) of a method on the first argument.
    ///
    /// # Safety
    /// Every value on the stack must be live.
    pub unsafe fn call_method(&self, method: &str, flags: u32) -> usize {
        let target = self.sv_2mortal(self.new_sv_str(method));
        unsafe { self.call_sv(target, flags | G_METHOD) }
    }

    unsafe fn invoke(&self, target: SvPtr, mark: usize, gimme: u32, flags: u32) -> usize {
        let cv = if flags & G_METHOD != 0 {
            unsafe { self.resolve_method(target, mark) }
        } else {
            unsafe { self.resolve_cv(target) }
        };
        let Some(xsub) = (unsafe { self.cv_xsub(cv) }) else {
            let name = unsafe { self.cv_name(cv) }.unwrap_or_else(|| "__ANON__".to_string());
            self.croak(&format!("Undefined subroutine &{name} called"));
        };

        self.marks.borrow_mut().push(mark);
        self.contexts.borrow_mut().push(gimme);
        let active = ActiveSub::enter(self, cv);
        unsafe { xsub(self.as_ptr(), cv) };
        drop(active);
        self.settle(mark, gimme)
    }

    pub(crate) fn settle(&self, mark: usize, gimme: u32) -> usize {
        let mut stack = self.stack.borrow_mut();
        let count = stack.len().saturating_sub(mark);
        match gimme {
            G_VOID => {
                stack.truncate(mark);
                0
            }
            G_SCALAR => {
                if count == 0 {
                    stack.truncate(mark);
                    stack.push(self.sv_undef);
                } else if count > 1 {
                    let last = stack[stack.len() - 1];
                    stack.truncate(mark);
                    stack.push(last);
                }
                1
            }
            _ => count,
        }
    }

    unsafe fn resolve_cv(&self, target: SvPtr) -> SvPtr {
        match unsafe { self.sv_type(target) } {
            sv::SVT_PVCV => target,
            sv::SVT_PVAV | sv::SVT_PVHV | sv::SVT_PVFM | sv::SVT_PVIO => {
                self.croak("Not a CODE reference")
            }
            _ => {
                if let Some(referent) = unsafe { self.sv_rv(target) } {
                    if unsafe { self.sv_type(referent) } == sv::SVT_PVCV {
                        return referent;
                    }
                    self.croak("Not a CODE reference");
                }
                let name = unsafe { self.sv_2pv_string(target) };
                match self.get_cv(&name, 0) {
                    Some(cv) => cv,
                    None => self.croak(&format!(
                        "Undefined subroutine &{} called",
                        Self::qualify(&name)
                    )),
                }
            }
        }
    }

    unsafe fn resolve_method(&self, target: SvPtr, mark: usize) -> SvPtr {
        let method = unsafe { self.sv_2pv_string(target) };
        if method.contains("::") {
            return unsafe { self.resolve_cv(target) };
        }
        let Some(invocant) = self.stack_get(mark) else {
            self.croak(&format!(
                "Can't call method \"{method}\" without a package or object reference"
            ));
        };
        let class = if let Some(class) = unsafe { self.sv_object_class(invocant) } {
            class
        } else if unsafe { self.sv_rok(invocant) } {
            self.croak(&format!("Can't call method \"{method}\" on unblessed reference"));
        } else {
            let name = unsafe { self.sv_2pv_string(invocant) };
            if name.is_empty() {
                self.croak(&format!(
                    "Can't call method \"{method}\" without a package or object reference"
                ));
            }
            name
        };
        match self.find_method(&class, &method) {
            Some(cv) => cv,
            None => self.croak(&format!(
                "Can't locate object method \"{method}\" via package \"{class}\""
            )),
        }
    }

    // ----- parse and run -----

    /// Evaluate source text, trapping exceptions into `$@`. Results are left
    /// on the stack like [`call_sv`](Self::call_sv).
    ///
    /// # Safety
    /// Every value on the stack must be live.
    pub unsafe fn eval_pv(&self, source: &str, flags: u32) -> usize {
        let gimme = want(flags);
        let mark = self.stack_len();
        self.eval_frame(mark, gimme, || {
            let values = unsafe { eval::run(self, source, gimme) };
            self.stack.borrow_mut().extend(values);
            self.settle(mark, gimme)
        })
    }

    // ----- modules -----

    /// Make `name` loadable by [`require_module`](Self::require_module).
    pub fn register_module(&self, name: &str, boot: ModuleBoot) {
        self.modules.borrow_mut().insert(name.to_string(), boot);
    }

    /// Whether `name` has been loaded.
    pub fn module_loaded(&self, name: &str) -> bool {
        self.loaded.borrow().contains(name)
    }

    /// Load a registered module once; croak if it is unknown.
    pub fn require_module(&self, name: &str) {
        if self.module_loaded(name) {
            return;
        }
        let boot = self.modules.borrow().get(name).cloned();
        match boot {
            Some(boot) => {
                tracing::debug!(module = name, "loading module");
                boot(self.as_ptr());
                self.loaded.borrow_mut().insert(name.to_string());
            }
            None => {
                let path = name.replace("::", "/");
                self.croak(&format!(
                    "Can't locate {path}.pm in @INC (you may need to install the {name} module)"
                ));
            }
        }
    }
}

/// Keeps the called sub alive and pops its context on every exit path.
struct ActiveSub<'a> {
    perl: &'a Interpreter,
    cv: SvPtr,
}

impl<'a> ActiveSub<'a> {
    fn enter(perl: &'a Interpreter, cv: SvPtr) -> Self {
        unsafe { perl.sv_refcnt_inc(cv) };
        Self { perl, cv }
    }
}

impl Drop for ActiveSub<'_> {
    fn drop(&mut self) {
        self.perl.contexts.borrow_mut().pop();
        unsafe { self.perl.sv_refcnt_dec(self.cv) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_interpreter(body: impl FnOnce(&Interpreter)) {
        sys_init();
        let perl = Interpreter::alloc();
        unsafe {
            Interpreter::construct(perl);
            Interpreter::parse(perl, None, &[]);
            Interpreter::run(perl);
            body(perl.as_ref());
            Interpreter::destruct(perl);
            Interpreter::free(perl);
        }
    }

    unsafe fn three_values(perl: InterpPtr, _cv: SvPtr) {
        let this = unsafe { perl.as_ref() };
        let mark = this.pop_mark();
        this.stack_truncate(mark);
        for value in 1..=3 {
            this.stack_push(this.sv_2mortal(this.new_sv_iv(value)));
        }
    }

    unsafe fn always_dies(perl: InterpPtr, _cv: SvPtr) {
        let this = unsafe { perl.as_ref() };
        this.pop_mark();
        this.croak("boom\n");
    }

    #[test]
    fn test_scalar_context_keeps_last_value() {
        with_interpreter(|perl| unsafe {
            perl.new_xs(Some("three"), three_values, file!());
            perl.enter();
            perl.savetmps();

            perl.push_mark();
            assert_eq!(perl.call_pv("three", G_SCALAR), 1);
            let top = perl.stack_get(perl.stack_len() - 1).unwrap();
            assert_eq!(perl.sv_2iv(top), 3);
            perl.stack_truncate(0);

            perl.push_mark();
            assert_eq!(perl.call_pv("three", G_LIST), 3);
            perl.stack_truncate(0);

            perl.push_mark();
            assert_eq!(perl.call_pv("three", G_VOID), 0);
            assert_eq!(perl.stack_len(), 0);

            perl.freetmps();
            perl.leave();
        });
    }

    #[test]
    fn test_croak_is_trapped_by_eval_flag() {
        with_interpreter(|perl| unsafe {
            perl.new_xs(Some("dies"), always_dies, file!());
            perl.enter();
            perl.savetmps();
            perl.push_mark();
            perl.stack_push(perl.sv_2mortal(perl.new_sv_iv(1)));
            let marks = perl.marks.borrow().len();

            assert_eq!(perl.call_pv("dies", G_SCALAR | G_EVAL), 1);
            assert_eq!(perl.sv_2pv_string(perl.errsv()), "boom\n");
            assert!(!perl.sv_ok(perl.stack_get(0).unwrap()));
            assert_eq!(perl.marks.borrow().len(), marks - 1);
            assert_eq!(perl.gimme(), G_VOID);

            perl.stack_truncate(0);
            perl.freetmps();
            perl.leave();
        });
    }

    #[test]
    fn test_method_resolution_walks_isa() {
        with_interpreter(|perl| unsafe {
            perl.new_xs(Some("Base::three"), three_values, file!());
            let isa = perl.get_av("Derived::ISA", GV_ADD).unwrap();
            perl.av_push(isa, perl.new_sv_str("Base"));

            assert!(perl.find_method("Derived", "three").is_some());
            assert!(perl.find_method("Derived", "four").is_none());
            assert!(perl.is_strict_subclass("Derived", "Base"));
            assert!(!perl.is_strict_subclass("Base", "Base"));
            assert!(perl.class_derives("Base", "Base"));
        });
    }

    #[test]
    fn test_derived_from_objects_plain_refs_and_names() {
        with_interpreter(|perl| unsafe {
            let isa = perl.get_av("Circle::ISA", GV_ADD).unwrap();
            perl.av_push(isa, perl.new_sv_str("Shape"));

            let object = perl.new_sv();
            perl.sv_setref_iv(object, Some("Circle"), 1);
            assert!(perl.sv_derived_from(object, "Shape"));
            assert!(!perl.sv_derived_from(object, "HASH"));

            let plain = perl.new_rv_noinc(perl.new_hv());
            assert!(perl.sv_derived_from(plain, "HASH"));
            assert!(!perl.sv_derived_from(plain, "ARRAY"));

            let name = perl.new_sv_str("Circle");
            assert!(perl.sv_derived_from(name, "Shape"));

            for sv in [object, plain, name] {
                perl.sv_refcnt_dec(sv);
            }
        });
    }

    #[test]
    fn test_destruct_releases_globals() {
        sys_init();
        let perl = Interpreter::alloc();
        unsafe {
            Interpreter::construct(perl);
            let this = perl.as_ref();
            let sv = this.get_sv("answer", GV_ADD).unwrap();
            this.sv_setiv(sv, 42);
            let hv = this.get_hv("config", GV_ADD).unwrap();
            this.hv_store(hv, b"k", this.new_sv_iv(1));
            assert!(this.live_values() >= 3);

            Interpreter::destruct(perl);
            assert_eq!(this.live_values(), 0);
            Interpreter::free(perl);
        }
    }
}
