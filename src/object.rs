//! Object bridging in both directions
//!
//! Runtime objects reach host code as instances of registered host types:
//! a [`PerlNamedClass`] registered in the [`ClassRegistry`] is picked by the
//! object's class name. Host instances reach the runtime as
//! [`PerlBridgedObject`]s: an `Arc<T>` converted with
//! [`IntoPerl`](crate::convert::IntoPerl) becomes a blessed reference that
//! holds one claim on the instance until the runtime frees it.
//!
//! Both registries are process-wide. Registration is expected to happen
//! while interpreters are being set up; afterwards the maps are mostly read.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::context::SvContext;
use crate::convert::{FromPerl, IntoPerl};
use crate::error::{PerlError, PerlResult};
use crate::interpreter::PerlInterpreter;
use crate::runtime::{InterpPtr, Magic, MgVtbl, PERL_MAGIC_EXT, SvPtr};
use crate::value::{PerlObject, PerlSub};
use crate::xsub::XsClosure;

// ----- host types for runtime classes -----

/// Host type standing for a runtime class. The instance wraps the object;
/// methods usually forward to [`PerlObject::call_method_scalar`] and friends.
pub trait PerlNamedClass: Sized + 'static {
    /// Runtime class name.
    const PERL_CLASS_NAME: &'static str;

    /// Wrap an object already checked to derive from the class.
    fn from_object(object: PerlObject) -> Self;

    /// The wrapped object.
    fn as_object(&self) -> &PerlObject;

    /// Register the type so that objects of the class are recognised when
    /// they cross into host code untyped.
    fn register() {
        ClassRegistry::global().register::<Self>();
    }
}

/// Requires a blessed reference deriving from the class.
impl<T: PerlNamedClass> FromPerl for T {
    fn from_sv_inc(ctx: SvContext) -> PerlResult<Self> {
        named_from_object(PerlObject::from_sv_inc(ctx)?)
    }

    fn from_sv_copy(ctx: SvContext) -> PerlResult<Self> {
        named_from_object(PerlObject::from_sv_copy(ctx)?)
    }
}

impl<T: PerlNamedClass> IntoPerl for T {
    fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
        self.as_object().to_sv(perl)
    }

    fn to_arg(&self, perl: PerlInterpreter) -> SvPtr {
        self.as_object().to_arg(perl)
    }
}

fn named_from_object<T: PerlNamedClass>(object: PerlObject) -> PerlResult<T> {
    if object.isa(T::PERL_CLASS_NAME) {
        Ok(T::from_object(object))
    } else {
        Err(PerlError::UnexpectedObjectType {
            value: object.into_scalar().into_value(),
            want: T::PERL_CLASS_NAME.to_string(),
        })
    }
}

struct Registration {
    class: &'static str,
    type_id: TypeId,
    type_name: &'static str,
    wrap: fn(PerlObject) -> Box<dyn Any>,
}

fn wrap_as<T: PerlNamedClass>(object: PerlObject) -> Box<dyn Any> {
    Box::new(T::from_object(object))
}

/// Process-wide map from runtime class names to host types.
pub struct ClassRegistry {
    classes: RwLock<HashMap<&'static str, Registration>>,
}

static REGISTRY: Lazy<ClassRegistry> = Lazy::new(|| ClassRegistry {
    classes: RwLock::new(HashMap::new()),
});

impl ClassRegistry {
    /// The registry.
    pub fn global() -> &'static ClassRegistry {
        &REGISTRY
    }

    /// Register `T` under its class name, replacing an earlier registration.
    pub fn register<T: PerlNamedClass>(&self) {
        let registration = Registration {
            class: T::PERL_CLASS_NAME,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            wrap: wrap_as::<T>,
        };
        let previous = self.classes.write().insert(T::PERL_CLASS_NAME, registration);
        match previous {
            Some(previous) if previous.type_id != TypeId::of::<T>() => {
                tracing::warn!(
                    class = T::PERL_CLASS_NAME,
                    replaced = previous.type_name,
                    "class registration replaced"
                );
            }
            _ => tracing::debug!(class = T::PERL_CLASS_NAME, "class registered"),
        }
    }

    /// Whether a host type is registered for `class`.
    pub fn is_registered(&self, class: &str) -> bool {
        self.classes.read().contains_key(class)
    }

    /// Registered class names.
    pub fn classes(&self) -> Vec<&'static str> {
        self.classes.read().keys().copied().collect()
    }

    /// Wrap `object` in the host type registered for its class. With an
    /// `expected` class, the registration must be that class or a strict
    /// subclass of it. The object comes back unchanged when nothing fits.
    pub fn resolve(&self, object: PerlObject, expected: Option<&str>) -> Result<RegisteredObject, PerlObject> {
        let class = object.class_name();
        let found = self
            .classes
            .read()
            .get(class.as_str())
            .map(|registration| (registration.class, registration.type_name, registration.wrap));
        let Some((registered, type_name, wrap)) = found else {
            return Err(object);
        };
        if let Some(expected) = expected {
            let perl = object.interpreter();
            let fits = registered == expected || perl.raw().is_strict_subclass(registered, expected);
            if !fits {
                return Err(object);
            }
        }
        Ok(RegisteredObject {
            class: registered,
            type_name,
            object: object.clone(),
            inner: wrap(object),
        })
    }
}

/// Object wrapped in its registered host type.
pub struct RegisteredObject {
    class: &'static str,
    type_name: &'static str,
    object: PerlObject,
    inner: Box<dyn Any>,
}

impl RegisteredObject {
    /// Registered class name.
    pub fn class(&self) -> &'static str {
        self.class
    }

    /// The object.
    pub fn object(&self) -> &PerlObject {
        &self.object
    }

    /// Borrow the host instance as `T`.
    pub fn downcast_ref<T: PerlNamedClass>(&self) -> Option<&T> {
        self.inner.downcast_ref()
    }

    /// Take the host instance as `T`, or get `self` back.
    pub fn downcast<T: PerlNamedClass>(self) -> Result<T, Self> {
        let RegisteredObject {
            class,
            type_name,
            object,
            inner,
        } = self;
        match inner.downcast::<T>() {
            Ok(inner) => Ok(*inner),
            Err(inner) => Err(RegisteredObject {
                class,
                type_name,
                object,
                inner,
            }),
        }
    }
}

impl fmt::Debug for RegisteredObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredObject")
            .field("class", &self.class)
            .field("type", &self.type_name)
            .field("object", &self.object)
            .finish()
    }
}

impl IntoPerl for RegisteredObject {
    fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
        self.object.to_sv(perl)
    }

    fn to_arg(&self, perl: PerlInterpreter) -> SvPtr {
        self.object.to_arg(perl)
    }
}

// ----- host instances as runtime objects -----

/// Host type whose shared instances can be handed to the runtime.
pub trait PerlBridgedObject: Any + Send + Sync {
    /// Class the runtime objects are blessed into.
    const PERL_CLASS_NAME: &'static str;
}

struct Claimed {
    instance: Arc<dyn Any + Send + Sync>,
    claims: usize,
}

static INSTANCES: Lazy<RwLock<HashMap<usize, Claimed>>> = Lazy::new(|| RwLock::new(HashMap::new()));

static BRIDGE_VTBL: MgVtbl = MgVtbl {
    svt_get: None,
    svt_set: None,
    svt_len: None,
    svt_clear: None,
    svt_free: Some(release_claim),
    svt_copy: None,
    svt_dup: None,
    svt_local: None,
};

fn identity_of<T: ?Sized>(instance: &Arc<T>) -> usize {
    Arc::as_ptr(instance) as *const () as usize
}

unsafe fn release_claim(_perl: InterpPtr, _sv: SvPtr, magic: &Magic) -> i32 {
    let released = {
        let mut instances = INSTANCES.write();
        match instances.get_mut(&magic.ptr) {
            Some(entry) if entry.claims > 1 => {
                entry.claims -= 1;
                None
            }
            Some(_) => instances.remove(&magic.ptr),
            None => {
                tracing::warn!(identity = magic.ptr, "finalizer for an unknown host instance");
                None
            }
        }
    };
    if released.is_some() {
        tracing::trace!(identity = magic.ptr, "last runtime claim released");
    }
    // the instance may run its own destructor here, outside the lock
    drop(released);
    0
}

/// Number of runtime objects currently holding `instance`.
pub fn runtime_claims<T: PerlBridgedObject>(instance: &Arc<T>) -> usize {
    INSTANCES
        .read()
        .get(&identity_of(instance))
        .map_or(0, |entry| entry.claims)
}

/// Host instance behind a bridged object.
pub fn bridged_instance(object: &PerlObject) -> Option<Arc<dyn Any + Send + Sync>> {
    let referent = object.as_scalar().context().referent()?;
    let magic = unsafe {
        referent
            .interp()
            .mg_findext(referent.as_ptr(), PERL_MAGIC_EXT, &BRIDGE_VTBL)
    }?;
    INSTANCES
        .read()
        .get(&magic.ptr)
        .map(|entry| Arc::clone(&entry.instance))
}

/// Every conversion creates a new object holding one claim; the claim is
/// released when the runtime frees the object.
impl<T: PerlBridgedObject> IntoPerl for Arc<T> {
    fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
        let identity = identity_of(self);
        {
            let mut instances = INSTANCES.write();
            let entry = instances.entry(identity).or_insert_with(|| Claimed {
                instance: Arc::clone(self) as Arc<dyn Any + Send + Sync>,
                claims: 0,
            });
            entry.claims += 1;
        }
        let interp = perl.raw();
        let rv = interp.new_sv();
        unsafe {
            interp.sv_setref_iv(rv, Some(T::PERL_CLASS_NAME), identity as i64);
            if let Some(referent) = interp.sv_rv(rv) {
                interp.sv_magicext(referent, PERL_MAGIC_EXT, &BRIDGE_VTBL, identity);
            }
        }
        tracing::trace!(class = T::PERL_CLASS_NAME, identity, "host instance bridged");
        rv
    }
}

impl<T: PerlBridgedObject> FromPerl for Arc<T> {
    fn from_sv_inc(ctx: SvContext) -> PerlResult<Self> {
        if !ctx.is_object() {
            return Err(PerlError::NotObject(ctx.retain()));
        }
        let object = PerlObject::from_sv_inc(ctx)?;
        let Some(instance) = bridged_instance(&object) else {
            return Err(PerlError::NotWrappedObject(ctx.retain()));
        };
        instance
            .downcast::<T>()
            .map_err(|_| PerlError::UnexpectedObjectType {
                value: ctx.retain(),
                want: T::PERL_CLASS_NAME.to_string(),
            })
    }
}

/// Bridged object that crossed back into host code untyped.
pub struct BridgedObject {
    object: PerlObject,
    instance: Arc<dyn Any + Send + Sync>,
}

impl BridgedObject {
    pub(crate) fn new(object: PerlObject, instance: Arc<dyn Any + Send + Sync>) -> Self {
        Self { object, instance }
    }

    /// The runtime object.
    pub fn object(&self) -> &PerlObject {
        &self.object
    }

    /// The host instance as `T`.
    pub fn downcast<T: PerlBridgedObject>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.instance).downcast::<T>().ok()
    }
}

impl fmt::Debug for BridgedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgedObject")
            .field("class", &self.object.class_name())
            .field("identity", &(Arc::as_ptr(&self.instance) as *const () as usize))
            .finish()
    }
}

impl IntoPerl for BridgedObject {
    fn to_sv(&self, perl: PerlInterpreter) -> SvPtr {
        self.object.to_sv(perl)
    }

    fn to_arg(&self, perl: PerlInterpreter) -> SvPtr {
        self.object.to_arg(perl)
    }
}

// ----- methods -----

/// Define `class::name` as a native sub. The invocant is the first
/// parameter of `body`.
pub fn add_method<Args, F: XsClosure<Args>>(perl: PerlInterpreter, class: &str, name: &str, body: F) -> PerlSub {
    PerlSub::new_named(perl, &format!("{class}::{name}"), body)
}

/// Make `class` inherit from `parents`, in order.
pub fn set_parents(perl: PerlInterpreter, class: &str, parents: &[&str]) {
    let isa = crate::value::PerlArray::global_creating(perl, &format!("{class}::ISA"));
    isa.clear();
    for parent in parents {
        isa.push(parent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::EmbeddedPerl;
    use crate::value::{AnyPerl, PerlScalar};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static LIVE_GAUGES: AtomicUsize = AtomicUsize::new(0);

    struct Gauge {
        level: i64,
    }

    impl Gauge {
        fn new(level: i64) -> Arc<Self> {
            LIVE_GAUGES.fetch_add(1, Ordering::SeqCst);
            Arc::new(Self { level })
        }
    }

    impl Drop for Gauge {
        fn drop(&mut self) {
            LIVE_GAUGES.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl PerlBridgedObject for Gauge {
        const PERL_CLASS_NAME: &'static str = "Test::Gauge";
    }

    struct Meter {
        reading: i64,
    }

    impl PerlBridgedObject for Meter {
        const PERL_CLASS_NAME: &'static str = "Test::Meter";
    }

    struct Animal(PerlObject);

    impl PerlNamedClass for Animal {
        const PERL_CLASS_NAME: &'static str = "Test::Animal";

        fn from_object(object: PerlObject) -> Self {
            Animal(object)
        }

        fn as_object(&self) -> &PerlObject {
            &self.0
        }
    }

    #[test]
    fn test_bridged_instance_released_once() {
        let perl = EmbeddedPerl::new();
        let baseline = LIVE_GAUGES.load(Ordering::SeqCst);
        let gauge = Gauge::new(3);
        add_method(*perl, "Test::Gauge", "level", |this: Arc<Gauge>| Ok::<_, PerlError>(this.level));

        let object = PerlScalar::new(*perl, &gauge);
        let alias = object.clone();
        assert_eq!(runtime_claims(&gauge), 1);
        let level: i64 = PerlObject::from_scalar(object.clone())
            .unwrap()
            .call_method_scalar("level", &[])
            .unwrap();
        assert_eq!(level, 3);

        drop(object);
        drop(alias);
        assert_eq!(runtime_claims(&gauge), 0);
        assert_eq!(Arc::strong_count(&gauge), 1);
        drop(gauge);
        assert_eq!(LIVE_GAUGES.load(Ordering::SeqCst), baseline);
    }

    #[test]
    fn test_bridged_object_round_trip() {
        let perl = EmbeddedPerl::new();
        let meter = Arc::new(Meter { reading: 9 });
        let scalar = PerlScalar::new(*perl, &meter);
        let back: Arc<Meter> = scalar.get().unwrap();
        assert!(Arc::ptr_eq(&back, &meter));
        assert!(matches!(
            scalar.get::<Arc<Gauge>>(),
            Err(PerlError::UnexpectedObjectType { .. })
        ));

        match scalar.clone().into_value().into_any() {
            AnyPerl::Bridged(bridged) => {
                assert!(bridged.downcast::<Gauge>().is_none());
                assert_eq!(bridged.downcast::<Meter>().unwrap().reading, 9);
            }
            other => panic!("expected a bridged object, got {other:?}"),
        }
    }

    #[test]
    fn test_object_errors_stay_distinct() {
        let perl = EmbeddedPerl::new();
        let plain = PerlScalar::new(*perl, &1i64);
        assert!(matches!(plain.get::<Arc<Gauge>>(), Err(PerlError::NotObject(_))));

        let blessed: PerlScalar = perl.eval("bless {}, 'Test::Gauge'").unwrap();
        assert!(matches!(
            blessed.get::<Arc<Gauge>>(),
            Err(PerlError::NotWrappedObject(_))
        ));

        let other: PerlScalar = perl.eval("bless [], 'Test::Plant'").unwrap();
        assert!(matches!(
            other.get::<Animal>(),
            Err(PerlError::UnexpectedObjectType { .. })
        ));
    }

    #[test]
    fn test_registry_prefers_registered_subclass() {
        let perl = EmbeddedPerl::new();
        Animal::register();
        set_parents(*perl, "Test::Dog", &["Test::Animal"]);

        let animal: PerlScalar = perl.eval("bless {}, 'Test::Animal'").unwrap();
        match animal.into_value().into_any() {
            AnyPerl::Registered(registered) => {
                assert_eq!(registered.class(), "Test::Animal");
                assert!(registered.downcast_ref::<Animal>().is_some());
            }
            other => panic!("expected a registered object, got {other:?}"),
        }

        // a subclass without its own registration stays generic
        let dog: PerlScalar = perl.eval("bless {}, 'Test::Dog'").unwrap();
        let object = PerlObject::from_scalar(dog.clone()).unwrap();
        assert!(ClassRegistry::global().resolve(object, Some("Test::Animal")).is_err());
        let as_animal: Animal = dog.get().unwrap();
        assert_eq!(as_animal.as_object().class_name(), "Test::Dog");
    }
}
