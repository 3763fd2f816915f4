//! Array and hash behaviour seen from host code

use std::collections::BTreeMap;

use perlbridge::{AnyPerl, EmbeddedPerl, PerlArray, PerlError, PerlHash, PerlScalar};

#[test]
fn test_array_store_then_fetch() {
    let perl = EmbeddedPerl::new();
    let array = PerlArray::new(*perl);

    array.set(0, &7i64).unwrap();
    array.set(1, "seven").unwrap();
    array.set(2, &vec![1i64, 2]).unwrap();
    array.set(3, &BTreeMap::from([("k".to_string(), 1i64)])).unwrap();

    assert_eq!(array.fetch::<i64>(0).unwrap(), Some(7));
    assert_eq!(array.fetch::<String>(1).unwrap().as_deref(), Some("seven"));
    assert_eq!(array.fetch::<Vec<i64>>(2).unwrap(), Some(vec![1, 2]));
    assert_eq!(
        array.fetch::<BTreeMap<String, i64>>(3).unwrap(),
        Some(BTreeMap::from([("k".to_string(), 1)]))
    );
}

#[test]
fn test_hash_store_then_fetch() {
    let perl = EmbeddedPerl::new();
    let hash = PerlHash::new(*perl);

    hash.set("int", &-3i64);
    hash.set("text", "hello");
    hash.set("list", &vec!["a".to_string(), "b".to_string()]);
    hash.set("map", &BTreeMap::from([("inner".to_string(), 2.5f64)]));

    assert_eq!(hash.fetch::<i64>("int").unwrap(), Some(-3));
    assert_eq!(hash.fetch::<String>("text").unwrap().as_deref(), Some("hello"));
    assert_eq!(
        hash.fetch::<Vec<String>>("list").unwrap(),
        Some(vec!["a".to_string(), "b".to_string()])
    );
    assert_eq!(
        hash.fetch::<BTreeMap<String, f64>>("map").unwrap(),
        Some(BTreeMap::from([("inner".to_string(), 2.5)]))
    );
}

#[test]
fn test_undefined_versus_absent_key() {
    let perl = EmbeddedPerl::new();
    let hash: PerlHash = perl.eval("{ present => undef }").unwrap();

    assert!(hash.exists("present"));
    let present = hash.get("present").expect("key is present");
    assert!(!present.defined());

    assert!(!hash.exists("absent"));
    assert!(hash.get("absent").is_none());
}

#[test]
fn test_nested_structures_from_source() {
    let perl = EmbeddedPerl::new();
    let data: PerlScalar = perl
        .eval("{ users => [ { name => 'ann', age => 31 }, { name => 'bob' } ] }")
        .unwrap();

    let AnyPerl::Hash(root) = data.referent().expect("a reference") else {
        panic!("expected a hash");
    };
    let users: PerlArray = root.fetch("users").unwrap().expect("users key");
    assert_eq!(users.len(), 2);

    let first: PerlHash = users.fetch(0).unwrap().expect("first user");
    assert_eq!(first.fetch::<String>("name").unwrap().as_deref(), Some("ann"));
    let second: PerlHash = users.fetch(1).unwrap().expect("second user");
    assert_eq!(second.fetch::<Option<i64>>("age").unwrap(), None);
}

#[test]
fn test_hash_iteration_visits_every_key() {
    let perl = EmbeddedPerl::new();
    let hash = PerlHash::from_pairs(*perl, (0..50).map(|i| (format!("k{i}"), i as i64)));
    let mut keys = hash.keys();
    keys.sort();
    let mut expected: Vec<String> = (0..50).map(|i| format!("k{i}")).collect();
    expected.sort();
    assert_eq!(keys, expected);

    let total: i64 = hash.iter().map(|(_, value)| value.try_i64().unwrap()).sum();
    assert_eq!(total, (0..50).sum::<i64>());
}

#[test]
fn test_globals_are_shared_with_source() {
    let perl = EmbeddedPerl::new();
    let items = PerlArray::global_creating(*perl, "main::items");
    items.push(&1i64);
    items.push(&2i64);
    assert_eq!(perl.eval::<i64>("@items").unwrap(), 2);

    perl.eval_void("$answer = 42").unwrap();
    let answer = PerlScalar::global(*perl, "answer").expect("global exists");
    assert_eq!(answer.try_i64().unwrap(), 42);
    assert!(PerlScalar::global(*perl, "never_set").is_none());
}

#[test]
fn test_store_before_first_element_is_recoverable() {
    let perl = EmbeddedPerl::new();
    let array = PerlArray::from_items(*perl, ["a", "b"]);

    let err = array.set(-3, "z").unwrap_err();
    assert!(matches!(err, PerlError::ElementNotExists { index: -3 }));
    assert!(array.get_lvalue(-3).is_err());

    // nothing changed, and the interpreter still works
    assert_eq!(array.to_vec::<String>().unwrap(), ["a", "b"]);
    assert_eq!(perl.eval::<i64>("1").unwrap(), 1);
}

#[test]
fn test_converted_holes_are_independent_values() {
    let perl = EmbeddedPerl::new();
    let array = PerlArray::new(*perl);
    array.set(2, &3i64).unwrap();

    let items: Vec<PerlScalar> = array.to_vec().unwrap();
    assert_eq!(items.len(), 3);
    items[0].set_i64(1);
    items[1].set(&"two");

    assert_eq!(items[0].try_i64().unwrap(), 1);
    assert_eq!(items[1].try_string().unwrap(), "two");
    assert!(!array.exists(0));
    assert!(!array.exists(1));
    assert!(!PerlScalar::undef(*perl).defined());
}

#[test]
fn test_debug_does_not_restart_iteration() {
    let perl = EmbeddedPerl::new();
    let hash = PerlHash::from_pairs(*perl, (0..10).map(|i| (format!("k{i}"), i as i64)));

    let mut seen = 0;
    for (_, _) in hash.iter() {
        seen += 1;
        let _ = format!("{hash:?}");
        assert_eq!(hash.keys().len(), 10);
    }
    assert_eq!(seen, 10);
}
