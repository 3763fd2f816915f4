//! Embedding an interpreter
//!
//! [`EmbeddedPerl`] owns an interpreter from construction to teardown and
//! makes it current on its thread for as long as it lives.
//! [`PerlInterpreter`] is the `Copy` handle everything else passes around.
//!
//! Handles can outlive their interpreter. Every owning wrapper checks that
//! its interpreter is still alive before touching it and leaks its value
//! otherwise.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use crate::config::InterpreterConfig;
use crate::context::SvContext;
use crate::convert::{FromPerl, IntoPerl};
use crate::error::PerlResult;
use crate::runtime::{self, InterpPtr, Interpreter, SvPtr};
use crate::stack::{self, CallContext, CallTarget};
use crate::value::PerlScalar;

thread_local! {
    static ALIVE: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
}

/// Whether `perl` is a live interpreter created on this thread.
pub(crate) fn is_alive(perl: InterpPtr) -> bool {
    ALIVE.with(|alive| alive.borrow().contains(&(perl.as_ptr() as usize)))
}

fn set_alive(perl: InterpPtr, alive: bool) {
    ALIVE.with(|set| {
        let key = perl.as_ptr() as usize;
        if alive {
            set.borrow_mut().insert(key);
        } else {
            set.borrow_mut().remove(&key);
        }
    });
}

/// Handle to a live interpreter.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PerlInterpreter(InterpPtr);

impl PerlInterpreter {
    /// # Safety
    /// `perl` must be a live interpreter.
    pub unsafe fn from_raw(perl: InterpPtr) -> Self {
        Self(perl)
    }

    /// The interpreter current on this thread.
    pub fn current() -> Option<Self> {
        runtime::get_context()
            .filter(|perl| is_alive(*perl))
            .map(Self)
    }

    /// The first interpreter of the process, if it lives on this thread.
    pub fn main() -> Option<Self> {
        runtime::main_interpreter()
            .filter(|perl| is_alive(*perl))
            .map(Self)
    }

    /// Raw handle.
    pub fn as_ptr(&self) -> InterpPtr {
        self.0
    }

    pub(crate) fn raw(&self) -> &Interpreter {
        debug_assert!(is_alive(self.0), "interpreter used after destruction");
        unsafe { self.0.as_ref() }
    }

    pub(crate) fn context(&self, sv: SvPtr) -> SvContext {
        unsafe { SvContext::new(sv, self.0) }
    }

    /// Make this interpreter current on the thread.
    pub fn make_current(&self) {
        runtime::set_context(Some(self.0));
    }

    /// Values allocated and not yet freed.
    pub fn live_values(&self) -> usize {
        self.raw().live_values()
    }

    // ----- source -----

    /// Evaluate `source` in scalar context and convert the result.
    pub fn eval<T: FromPerl>(&self, source: &str) -> PerlResult<T> {
        stack::call(
            *self,
            CallTarget::Eval(source),
            &[],
            CallContext::Scalar,
            stack::collect_scalar,
        )
    }

    /// Evaluate `source` in list context.
    pub fn eval_list(&self, source: &str) -> PerlResult<Vec<PerlScalar>> {
        stack::call(
            *self,
            CallTarget::Eval(source),
            &[],
            CallContext::List,
            stack::collect_list,
        )
    }

    /// Evaluate `source` in void context.
    pub fn eval_void(&self, source: &str) -> PerlResult<()> {
        stack::call(
            *self,
            CallTarget::Eval(source),
            &[],
            CallContext::Void,
            |_| Ok(()),
        )
    }

    /// Load a module registered with
    /// [`register_module`](Self::register_module).
    pub fn require(&self, module: &str) -> PerlResult<()> {
        self.eval_void(&format!("require {module}"))
    }

    /// Make `name` loadable. `boot` runs on the first `require`.
    pub fn register_module(&self, name: &str, boot: impl Fn(PerlInterpreter) + 'static) {
        let boot: runtime::ModuleBoot = Rc::new(move |perl| boot(unsafe { PerlInterpreter::from_raw(perl) }));
        self.raw().register_module(name, boot);
    }

    /// Whether `name` has been loaded.
    pub fn module_loaded(&self, name: &str) -> bool {
        self.raw().module_loaded(name)
    }

    // ----- calls by name -----

    /// Call sub `name` in scalar context and convert the result.
    pub fn call_scalar<T: FromPerl>(&self, name: &str, args: &[&dyn IntoPerl]) -> PerlResult<T> {
        stack::call(
            *self,
            CallTarget::Name(name),
            args,
            CallContext::Scalar,
            stack::collect_scalar,
        )
    }

    /// Call sub `name` in list context.
    pub fn call_list(&self, name: &str, args: &[&dyn IntoPerl]) -> PerlResult<Vec<PerlScalar>> {
        self.call_sub(name, args, CallContext::List)
    }

    /// Call sub `name` in void context.
    pub fn call_void(&self, name: &str, args: &[&dyn IntoPerl]) -> PerlResult<()> {
        self.call_sub(name, args, CallContext::Void).map(drop)
    }

    /// Call sub `name` in `context`.
    pub fn call_sub(&self, name: &str, args: &[&dyn IntoPerl], context: CallContext) -> PerlResult<Vec<PerlScalar>> {
        stack::call(*self, CallTarget::Name(name), args, context, stack::collect_list)
    }

    // ----- method calls -----

    /// Call `method` on `invocant` (an object or a class name) in scalar
    /// context and convert the result.
    pub fn call_method_scalar<T: FromPerl>(
        &self,
        invocant: &dyn IntoPerl,
        method: &str,
        args: &[&dyn IntoPerl],
    ) -> PerlResult<T> {
        let full = with_invocant(invocant, args);
        stack::call(
            *self,
            CallTarget::Method(method),
            &full,
            CallContext::Scalar,
            stack::collect_scalar,
        )
    }

    /// Call `method` on `invocant` in list context.
    pub fn call_method_list(
        &self,
        invocant: &dyn IntoPerl,
        method: &str,
        args: &[&dyn IntoPerl],
    ) -> PerlResult<Vec<PerlScalar>> {
        let full = with_invocant(invocant, args);
        stack::call(
            *self,
            CallTarget::Method(method),
            &full,
            CallContext::List,
            stack::collect_list,
        )
    }

    /// Call `method` on `invocant` in void context.
    pub fn call_method_void(&self, invocant: &dyn IntoPerl, method: &str, args: &[&dyn IntoPerl]) -> PerlResult<()> {
        let full = with_invocant(invocant, args);
        stack::call(
            *self,
            CallTarget::Method(method),
            &full,
            CallContext::Void,
            |_| Ok(()),
        )
    }
}

fn with_invocant<'a>(invocant: &'a dyn IntoPerl, args: &[&'a dyn IntoPerl]) -> Vec<&'a dyn IntoPerl> {
    let mut full = Vec::with_capacity(args.len() + 1);
    full.push(invocant);
    full.extend_from_slice(args);
    full
}

impl fmt::Debug for PerlInterpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PerlInterpreter({:p})", self.0.as_ptr())
    }
}

/// An interpreter owned by the host. It is current on its thread while it
/// lives and is torn down on drop.
pub struct EmbeddedPerl {
    perl: PerlInterpreter,
    previous: Option<InterpPtr>,
    config: InterpreterConfig,
}

impl EmbeddedPerl {
    /// Interpreter with the default configuration.
    pub fn new() -> Self {
        Self::boot(InterpreterConfig::default())
    }

    /// Interpreter set up from `config`, with its modules preloaded.
    pub fn with_config(config: InterpreterConfig) -> PerlResult<Self> {
        let preload = config.preload.clone();
        let embedded = Self::boot(config);
        for module in &preload {
            embedded.require(module)?;
        }
        Ok(embedded)
    }

    /// Boot failures leave no way to recover, so they abort.
    fn boot(config: InterpreterConfig) -> Self {
        runtime::sys_init();
        let ptr = Interpreter::alloc();
        let args = vec![config.script_name.clone()];
        unsafe {
            Interpreter::construct(ptr);
            let status = Interpreter::parse(ptr, None, &args);
            assert_eq!(status, 0, "interpreter failed to parse its arguments");
            let status = Interpreter::run(ptr);
            assert_eq!(status, 0, "interpreter failed to start");
        }
        set_alive(ptr, true);

        let interp = unsafe { ptr.as_ref() };
        interp.set_destruct_level(config.destruct_level);
        interp.stack_extend(config.stack_reserve);

        let previous = runtime::get_context();
        runtime::set_context(Some(ptr));
        tracing::debug!(script = %config.script_name, "interpreter started");
        Self {
            perl: PerlInterpreter(ptr),
            previous,
            config,
        }
    }

    /// Handle to the interpreter.
    pub fn interpreter(&self) -> PerlInterpreter {
        self.perl
    }

    /// Configuration the interpreter was created with.
    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }
}

impl Default for EmbeddedPerl {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for EmbeddedPerl {
    type Target = PerlInterpreter;

    fn deref(&self) -> &PerlInterpreter {
        &self.perl
    }
}

impl fmt::Debug for EmbeddedPerl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedPerl")
            .field("perl", &self.perl)
            .field("script_name", &self.config.script_name)
            .finish()
    }
}

impl Drop for EmbeddedPerl {
    fn drop(&mut self) {
        let ptr = self.perl.as_ptr();
        unsafe {
            Interpreter::destruct(ptr);
            let leaked = ptr.as_ref().live_values();
            if leaked > 0 && self.config.warn_on_leaks {
                tracing::warn!(leaked, "values still referenced at interpreter teardown");
            }
            set_alive(ptr, false);
            Interpreter::free(ptr);
        }
        if let Some(previous) = self.previous.filter(|previous| is_alive(*previous)) {
            runtime::set_context(Some(previous));
        }
        tracing::debug!("interpreter destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PerlError;
    use crate::value::PerlSub;

    #[test]
    fn test_current_follows_lifetime() {
        let outer = EmbeddedPerl::new();
        assert_eq!(PerlInterpreter::current(), Some(*outer));
        {
            let inner = EmbeddedPerl::new();
            assert_eq!(PerlInterpreter::current(), Some(*inner));
        }
        assert_eq!(PerlInterpreter::current(), Some(*outer));
    }

    #[test]
    fn test_values_outliving_interpreter_are_leaked() {
        let perl = EmbeddedPerl::new();
        let scalar = PerlScalar::new(*perl, "kept");
        drop(perl);
        // dropping must not touch the freed interpreter
        drop(scalar);
    }

    #[test]
    fn test_register_and_require_module() {
        let perl = EmbeddedPerl::new();
        perl.register_module("Test::Boot", |perl| {
            PerlSub::new_named(perl, "Test::Boot::answer", || Ok::<_, PerlError>(42i64));
        });
        assert!(!perl.module_loaded("Test::Boot"));
        perl.require("Test::Boot").unwrap();
        assert!(perl.module_loaded("Test::Boot"));
        assert_eq!(perl.call_scalar::<i64>("Test::Boot::answer", &[]).unwrap(), 42);

        let err = perl.require("Test::Missing").unwrap_err();
        assert!(err.to_string().starts_with("Can't locate Test/Missing.pm"), "{err}");
    }

    #[test]
    fn test_preload_failure_is_reported() {
        let config = InterpreterConfig {
            preload: vec!["Not::There".to_string()],
            ..InterpreterConfig::default()
        };
        assert!(matches!(EmbeddedPerl::with_config(config), Err(PerlError::Died(_))));
    }

    #[test]
    fn test_class_method_call() {
        let perl = EmbeddedPerl::new();
        PerlSub::new_named(*perl, "Test::Factory::name", |class: String| {
            Ok::<_, PerlError>(format!("made by {class}"))
        });
        let made: String = perl
            .call_method_scalar(&"Test::Factory", "name", &[])
            .unwrap();
        assert_eq!(made, "made by Test::Factory");
    }
}
