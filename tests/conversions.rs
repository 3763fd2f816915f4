//! Host type round trips through runtime values
//!
//! Conversions of bool, integers, floats and strings are exact. The lossy
//! cases are float stringification and float hash keys, each checked
//! explicitly below.

use perlbridge::{EmbeddedPerl, PerlError, PerlHash, PerlScalar};
use proptest::prelude::*;

proptest! {
    #[test]
    fn prop_i64_round_trip(value in any::<i64>()) {
        let perl = EmbeddedPerl::new();
        let scalar = PerlScalar::new(*perl, &value);
        prop_assert_eq!(scalar.get::<i64>().unwrap(), value);
        prop_assert_eq!(scalar.i64_unchecked(), value);
    }

    #[test]
    fn prop_u64_round_trip(value in any::<u64>()) {
        let perl = EmbeddedPerl::new();
        let scalar = PerlScalar::new(*perl, &value);
        prop_assert_eq!(scalar.get::<u64>().unwrap(), value);
    }

    #[test]
    fn prop_finite_f64_round_trip(value in any::<f64>().prop_filter("finite", |v| v.is_finite())) {
        let perl = EmbeddedPerl::new();
        let scalar = PerlScalar::new(*perl, &value);
        prop_assert_eq!(scalar.get::<f64>().unwrap().to_bits(), value.to_bits());
    }

    #[test]
    fn prop_string_round_trip(value in ".*") {
        let perl = EmbeddedPerl::new();
        let scalar = PerlScalar::new(*perl, &value);
        prop_assert_eq!(scalar.get::<String>().unwrap(), value);
    }

    #[test]
    fn prop_integer_strings_parse(value in any::<i32>()) {
        let perl = EmbeddedPerl::new();
        let scalar = PerlScalar::new(*perl, &value.to_string());
        prop_assert_eq!(scalar.get::<i32>().unwrap(), value);
    }
}

#[test]
fn test_bool_round_trip() {
    let perl = EmbeddedPerl::new();
    for value in [true, false] {
        assert_eq!(PerlScalar::new(*perl, &value).get::<bool>().unwrap(), value);
    }
}

#[test]
fn test_float_stringification_is_lossy() {
    let perl = EmbeddedPerl::new();
    let sum = 0.1f64 + 0.2;
    let scalar = PerlScalar::new(*perl, &sum);
    assert_eq!(scalar.try_string().unwrap(), "0.3");
    // the number itself is kept exactly
    assert_eq!(scalar.try_f64().unwrap(), sum);

    let reparsed = PerlScalar::new(*perl, &scalar.try_string().unwrap());
    assert_ne!(reparsed.try_f64().unwrap(), sum);
}

#[test]
fn test_float_hash_keys_lose_precision() {
    let perl = EmbeddedPerl::new();
    let hash = PerlHash::new(*perl);
    let key = PerlScalar::new(*perl, &(1.0f64 / 3.0));
    hash.set_ent(&key, &1i64);
    assert_eq!(hash.keys(), vec!["0.333333333333333".to_string()]);
}

#[test]
fn test_strict_and_unchecked_disagree_on_bad_input() {
    let perl = EmbeddedPerl::new();
    let text = PerlScalar::new(*perl, "abc");
    assert!(matches!(text.try_i64(), Err(PerlError::NotNumber { .. })));
    assert_eq!(text.i64_unchecked(), 0);
    assert_eq!(text.f64_unchecked(), 0.0);

    let undef = PerlScalar::undef(*perl);
    assert!(matches!(undef.try_f64(), Err(PerlError::UnexpectedUndef(_))));
    assert_eq!(undef.get::<Option<f64>>().unwrap(), None);
}

#[test]
fn test_references_are_not_strings() {
    let perl = EmbeddedPerl::new();
    let reference: PerlScalar = perl.eval("[1, 2]").unwrap();
    assert!(matches!(
        reference.try_string(),
        Err(PerlError::NotStringOrNumber(_))
    ));
    assert!(reference.string_unchecked().starts_with("ARRAY(0x"));
}
