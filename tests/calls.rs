//! Calls across the boundary in both directions

use perlbridge::{CallContext, EmbeddedPerl, List, PerlError, PerlScalar, PerlSub};

fn install_abc(perl: &EmbeddedPerl) {
    PerlSub::new_named(perl.interpreter(), "abc", || Ok::<_, PerlError>(("a", "b", "c")));
}

#[test]
fn test_scalar_context_yields_last_value() {
    let perl = EmbeddedPerl::new();
    install_abc(&perl);
    assert_eq!(perl.call_scalar::<String>("abc", &[]).unwrap(), "c");
}

#[test]
fn test_list_context_yields_every_value() {
    let perl = EmbeddedPerl::new();
    install_abc(&perl);
    let values = perl.call_list("abc", &[]).unwrap();
    let values: Vec<String> = values.iter().map(|v| v.try_string().unwrap()).collect();
    assert_eq!(values, ["a", "b", "c"]);
}

#[test]
fn test_void_context_yields_nothing() {
    let perl = EmbeddedPerl::new();
    install_abc(&perl);
    assert!(perl.call_sub("abc", &[], CallContext::Void).unwrap().is_empty());
}

#[test]
fn test_host_error_is_catchable_exception() {
    let perl = EmbeddedPerl::new();
    PerlSub::new_named(*perl, "checked_div", |a: i64, b: i64| {
        if b == 0 {
            anyhow::bail!("division by zero");
        }
        Ok(a / b)
    });

    assert_eq!(perl.eval::<i64>("checked_div(10, 2)").unwrap(), 5);
    let err = perl.eval::<i64>("checked_div(1, 0)").unwrap_err();
    let died = err.died_value().expect("raised as an exception");
    assert!(died.try_string().unwrap().contains("division by zero"));
    // the interpreter is still usable afterwards
    assert_eq!(perl.eval::<i64>("checked_div(9, 3)").unwrap(), 3);
}

#[test]
fn test_conversion_failure_names_argument() {
    let perl = EmbeddedPerl::new();
    PerlSub::new_named(*perl, "square", |x: i64| Ok::<_, PerlError>(x * x));
    let err = perl.eval::<i64>("square('seven')").unwrap_err();
    assert!(err.to_string().contains("argument 0"), "{err}");
}

#[test]
fn test_die_with_value_keeps_value() {
    let perl = EmbeddedPerl::new();
    let err = perl.eval_void("die { code => 404 }").unwrap_err();
    let PerlError::Died(value) = err else {
        panic!("expected a died error");
    };
    let code: Option<i64> = value
        .get::<perlbridge::PerlHash>()
        .unwrap()
        .fetch("code")
        .unwrap();
    assert_eq!(code, Some(404));
}

#[test]
fn test_die_message_gets_location() {
    let perl = EmbeddedPerl::new();
    let err = perl.eval_void("die 'broken'").unwrap_err();
    assert_eq!(err.to_string(), "broken at (eval) line 1.");
}

#[test]
fn test_closure_arguments_are_copies() {
    let perl = EmbeddedPerl::new();
    let seen = PerlSub::new(*perl, |value: PerlScalar| {
        let next = value.try_i64()? + 1;
        value.set_i64(0);
        Ok::<_, PerlError>(next)
    });
    let input = PerlScalar::new(*perl, &41i64);
    assert_eq!(seen.call_scalar::<i64>(&[&input]).unwrap(), 42);
    assert_eq!(input.try_i64().unwrap(), 41);
}

#[test]
fn test_subs_pass_through_source() {
    let perl = EmbeddedPerl::new();
    let twice = PerlSub::new(*perl, |f: PerlSub, x: i64| {
        let once: i64 = f.call_scalar(&[&x])?;
        f.call_scalar::<i64>(&[&once])
    });
    PerlSub::new_named(*perl, "inc", |x: i64| Ok::<_, PerlError>(x + 1));
    let inc = PerlSub::global(*perl, "inc").expect("defined above");
    assert_eq!(twice.call_scalar::<i64>(&[&inc, &5i64]).unwrap(), 7);
}

#[test]
fn test_list_return_flattens() {
    let perl = EmbeddedPerl::new();
    PerlSub::new_named(*perl, "range", |n: i64| Ok::<_, PerlError>(List((0..n).collect())));
    let values = perl.eval_list("range(4)").unwrap();
    assert_eq!(values.len(), 4);
    assert_eq!(perl.eval::<i64>("range(4)").unwrap(), 3);
}
