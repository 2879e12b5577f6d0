//! End-to-end dispatch scenarios.

use std::sync::Arc;
use vesper_dispatch::registry::{define, registry};
use vesper_dispatch::{apply_generic, invoke, DispatchError};
use vesper_types::builtins as b;
use vesper_types::{Ty, Value};

fn int_body(n: i64) -> vesper_dispatch::BodyFn {
    Arc::new(move |_, _| Ok(Value::Int(n)))
}

fn str_body(s: &'static str) -> vesper_dispatch::BodyFn {
    Arc::new(move |_, _| Ok(Value::str(s)))
}

#[test]
fn scenario_exact_leaf_dispatch() {
    let f = registry().new_generic_function("s1_f", "main");
    let m1 = define(&f, vec![b::int(), b::int()], int_body(1));
    define(&f, vec![b::int(), b::real()], int_body(2));

    let out = apply_generic(&[f.clone(), Value::Int(3), Value::Int(4)]).unwrap();
    assert_eq!(out, Value::Int(1));

    let mt = registry().method_table_of(&f).unwrap();
    assert_eq!(mt.cache_len(), 1);
    let spec = mt
        .lookup_by_args(&[f.clone(), Value::Int(3), Value::Int(4)])
        .unwrap();
    assert!(Arc::ptr_eq(&spec.def().unwrap(), &m1));
}

#[test]
fn scenario_specificity() {
    let f = registry().new_generic_function("s2_f", "main");
    define(&f, vec![b::real(), b::real()], str_body("A"));
    define(&f, vec![b::int(), b::int()], str_body("B"));

    assert_eq!(
        apply_generic(&[f.clone(), Value::Int(2), Value::Int(3)]).unwrap(),
        Value::str("B")
    );
    assert_eq!(
        apply_generic(&[f.clone(), Value::Float(2.0), Value::Float(3.0)]).unwrap(),
        Value::str("A")
    );
    let mt = registry().method_table_of(&f).unwrap();
    assert_eq!(mt.cache_len(), 2);
}

#[test]
fn scenario_ambiguity() {
    let g = registry().new_generic_function("s3_g", "main");
    let mx = define(&g, vec![b::int(), Ty::any()], str_body("X"));
    let my = define(&g, vec![Ty::any(), b::int()], str_body("Y"));

    let err = apply_generic(&[g.clone(), Value::Int(1), Value::Int(2)]).unwrap_err();
    assert!(matches!(err, DispatchError::AmbiguousCall { .. }));

    assert_eq!(mx.ambiguities().len(), 1);
    assert!(Arc::ptr_eq(&mx.ambiguities()[0], &my));
    assert!(Arc::ptr_eq(&my.ambiguities()[0], &mx));

    // Outside the overlap both definitions still answer.
    assert_eq!(
        apply_generic(&[g.clone(), Value::Int(1), Value::str("s")]).unwrap(),
        Value::str("X")
    );
    assert_eq!(
        apply_generic(&[g.clone(), Value::str("s"), Value::Int(1)]).unwrap(),
        Value::str("Y")
    );

    // A covering definition resolves the call without erasing the record.
    define(&g, vec![b::int(), b::int()], str_body("Z"));
    assert_eq!(
        apply_generic(&[g.clone(), Value::Int(1), Value::Int(2)]).unwrap(),
        Value::str("Z")
    );
    assert_eq!(mx.ambiguities().len(), 1);
    assert_eq!(my.ambiguities().len(), 1);
}

#[test]
fn scenario_overwrite_invalidates() {
    let h = registry().new_generic_function("s4_h", "main");
    define(&h, vec![b::int()], int_body(1));
    assert_eq!(
        apply_generic(&[h.clone(), Value::Int(5)]).unwrap(),
        Value::Int(1)
    );
    let mt = registry().method_table_of(&h).unwrap();
    assert_eq!(mt.cache_len(), 1);

    // Redefinition with a type-equal signature displaces the old method and
    // drops its cached specialization.
    define(&h, vec![b::int()], int_body(2));
    assert_eq!(
        apply_generic(&[h.clone(), Value::Int(5)]).unwrap(),
        Value::Int(2)
    );
    assert_eq!(mt.defs_len(), 1);
}

#[test]
fn scenario_vararg_truncation() {
    let k = registry().new_generic_function("s5_k", "main");
    define(&k, vec![Ty::vararg(Ty::any())], int_body(7));
    let mt = registry().method_table_of(&k).unwrap();

    let args = [f_val(&k), Value::Int(1), Value::str("a"), Value::Int(3), Value::Int(4)];
    assert_eq!(apply_generic(&args).unwrap(), Value::Int(7));

    // The cached signature is truncated and ends in a vararg slot.
    let spec = mt.lookup_by_args(&args).unwrap();
    assert!(spec.sig.nparams() <= mt.max_args() + 2);
    assert!(spec.sig.has_trailing_vararg());

    // Homogeneous longer calls share one truncated entry.
    let homog1 = [
        f_val(&k),
        Value::str("b"),
        Value::str("c"),
        Value::str("d"),
        Value::str("e"),
    ];
    let homog2 = [
        f_val(&k),
        Value::str("p"),
        Value::str("q"),
        Value::str("r"),
        Value::str("s"),
        Value::str("t"),
    ];
    apply_generic(&homog1).unwrap();
    let cache_after = mt.cache_len();
    let s1 = mt.lookup_by_args(&homog1).unwrap();
    let s2 = mt.lookup_by_args(&homog2).unwrap();
    assert!(Arc::ptr_eq(&s1, &s2));
    assert_eq!(mt.cache_len(), cache_after);
}

#[test]
fn scenario_invoke() {
    let p = registry().new_generic_function("s6_p", "main");
    let m_real = define(&p, vec![b::real()], str_body("R"));
    define(&p, vec![b::int()], str_body("I"));

    assert_eq!(
        apply_generic(&[p.clone(), Value::Int(3)]).unwrap(),
        Value::str("I")
    );
    let mt = registry().method_table_of(&p).unwrap();
    let shared_before = mt.cache_len();

    // invoke forces the Real definition even though Int would win.
    assert_eq!(
        invoke(&p, &[b::real()], &[Value::Int(3)]).unwrap(),
        Value::str("R")
    );
    // The shared cache is untouched; the private invoke cache gained one.
    assert_eq!(mt.cache_len(), shared_before);
    assert_eq!(vesper_dispatch::apply::invoke_cache_len(&m_real), 1);

    // Repeat invokes hit the private cache.
    assert_eq!(
        invoke(&p, &[b::real()], &[Value::Int(4)]).unwrap(),
        Value::str("R")
    );
    assert_eq!(vesper_dispatch::apply::invoke_cache_len(&m_real), 1);
}

fn f_val(f: &Value) -> Value {
    f.clone()
}
