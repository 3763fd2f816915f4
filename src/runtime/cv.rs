//! Code values with native bodies.

use std::any::Any;
use std::rc::Rc;

use super::interp::{InterpPtr, Interpreter};
use super::sv::{Body, SvPtr, head};

/// Native sub body. Arguments sit on the stack above the top mark; results
/// are written back from that mark.
pub type Xsub = unsafe fn(InterpPtr, SvPtr);

pub(crate) struct CodeBody {
    pub name: Option<String>,
    pub file: String,
    pub xsub: Option<Xsub>,
    pub any: Option<Rc<dyn Any>>,
}

impl Interpreter {
    /// Create a code value. A named sub is installed in its glob, which
    /// keeps the only reference; an anonymous one belongs to the caller.
    pub fn new_xs(&self, name: Option<&str>, xsub: Xsub, file: &str) -> SvPtr {
        let cv = self.alloc_sv(Body::Code(CodeBody {
            name: name.map(Self::qualify),
            file: file.to_string(),
            xsub: Some(xsub),
            any: None,
        }));
        if let Some(name) = name {
            self.install_cv(name, cv);
        }
        cv
    }

    pub(crate) fn new_stub(&self, name: &str) -> SvPtr {
        self.alloc_sv(Body::Code(CodeBody {
            name: Some(Self::qualify(name)),
            file: String::new(),
            xsub: None,
            any: None,
        }))
    }

    unsafe fn with_cv<R>(&self, cv: SvPtr, read: impl FnOnce(&mut CodeBody) -> R) -> Option<R> {
        match &mut *unsafe { head(cv) }.body.borrow_mut() {
            Body::Code(code) => Some(read(code)),
            _ => None,
        }
    }

    /// Attach the extension payload (`XSUBANY`).
    ///
    /// # Safety
    /// `cv` must be a live code value.
    pub unsafe fn cv_set_any(&self, cv: SvPtr, any: Rc<dyn Any>) {
        let previous = unsafe { self.with_cv(cv, |code| code.any.replace(any)) };
        drop(previous);
    }

    /// Extension payload, shared.
    ///
    /// # Safety
    /// `cv` must be a live code value.
    pub unsafe fn cv_any(&self, cv: SvPtr) -> Option<Rc<dyn Any>> {
        unsafe { self.with_cv(cv, |code| code.any.clone()) }.flatten()
    }

    /// Native body, if defined.
    ///
    /// # Safety
    /// `cv` must be live.
    pub unsafe fn cv_xsub(&self, cv: SvPtr) -> Option<Xsub> {
        unsafe { self.with_cv(cv, |code| code.xsub) }.flatten()
    }

    /// Fully qualified name of a named sub.
    ///
    /// # Safety
    /// `cv` must be a live code value.
    pub unsafe fn cv_name(&self, cv: SvPtr) -> Option<String> {
        unsafe { self.with_cv(cv, |code| code.name.clone()) }.flatten()
    }

    /// File the sub was declared in.
    ///
    /// # Safety
    /// `cv` must be a live code value.
    pub unsafe fn cv_file(&self, cv: SvPtr) -> Option<String> {
        unsafe { self.with_cv(cv, |code| code.file.clone()) }
    }
}
