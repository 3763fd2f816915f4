//! Reference count discipline of the owning wrappers
//!
//! Every construction mode must leave the count exactly where it found it
//! once the wrapper is dropped.

use perlbridge::context::SvContext;
use perlbridge::{EmbeddedPerl, PerlArray, PerlHash, PerlScalar, PerlValue};

fn context_of(scalar: &PerlScalar) -> SvContext {
    let perl = scalar.interpreter();
    unsafe { SvContext::new(scalar.value().as_ptr(), perl.as_ptr()) }
}

#[test]
fn test_inc_mode_restores_count() {
    let perl = EmbeddedPerl::new();
    let scalar = PerlScalar::new(*perl, &42i64);
    let before = scalar.value().refcnt();

    let extra = unsafe { PerlValue::from_inc(context_of(&scalar)) };
    assert_eq!(scalar.value().refcnt(), before + 1);
    drop(extra);
    assert_eq!(scalar.value().refcnt(), before);
}

#[test]
fn test_noinc_mode_adopts_existing_reference() {
    let perl = EmbeddedPerl::new();
    let scalar = PerlScalar::new(*perl, "adopted");
    let before = scalar.value().refcnt();

    let owned = scalar.value().to_owned_ptr();
    assert_eq!(scalar.value().refcnt(), before + 1);
    let adopted = unsafe { PerlValue::from_noinc(context_of(&scalar).with(owned)) };
    assert_eq!(scalar.value().refcnt(), before + 1);
    drop(adopted);
    assert_eq!(scalar.value().refcnt(), before);
}

#[test]
fn test_copy_mode_leaves_source_alone() {
    let perl = EmbeddedPerl::new();
    let scalar = PerlScalar::new(*perl, &2.5f64);
    let before = scalar.value().refcnt();
    let live = perl.live_values();

    let copy = unsafe { PerlValue::from_copy(context_of(&scalar)) };
    assert_ne!(copy.as_ptr(), scalar.value().as_ptr());
    assert_eq!(copy.refcnt(), 1);
    assert_eq!(scalar.value().refcnt(), before);
    assert_eq!(perl.live_values(), live + 1);

    drop(copy);
    assert_eq!(perl.live_values(), live);
}

#[test]
fn test_clone_and_drop_balance() {
    let perl = EmbeddedPerl::new();
    let array = PerlArray::from_items(*perl, [1i64, 2, 3]);
    let before = array.value().refcnt();
    let clones: Vec<PerlArray> = (0..5).map(|_| array.clone()).collect();
    assert_eq!(array.value().refcnt(), before + 5);
    drop(clones);
    assert_eq!(array.value().refcnt(), before);
}

#[test]
fn test_containers_free_their_elements() {
    let perl = EmbeddedPerl::new();
    let baseline = perl.live_values();
    {
        let hash = PerlHash::new(*perl);
        hash.set("list", &vec![1i64, 2, 3]);
        hash.set("name", "value");
        let reference = hash.to_ref();
        assert!(perl.live_values() > baseline);
        drop(reference);
    }
    assert_eq!(perl.live_values(), baseline);
}

#[test]
fn test_calls_do_not_leak_temporaries() {
    let perl = EmbeddedPerl::new();
    perl.eval_void("1").unwrap();
    let baseline = perl.live_values();
    for _ in 0..10 {
        let values = perl.eval_list("(1, 'two', [3])").unwrap();
        assert_eq!(values.len(), 3);
    }
    assert_eq!(perl.live_values(), baseline);
}
