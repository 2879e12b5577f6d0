//! Tracer callbacks and the pure-context flag.
//!
//! Tracer registration is process-global, so everything runs in one test
//! body.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use vesper_dispatch::registry::{define, registry, DefineBuilder};
use vesper_dispatch::{
    apply_generic, is_in_pure_context, register_linfo_tracer, register_method_tracer,
    register_newmeth_tracer,
};
use vesper_types::builtins as b;
use vesper_types::Value;

#[test]
fn tracer_lifecycle() {
    let newmeth_count = Arc::new(AtomicUsize::new(0));
    let newmeth_pure = Arc::new(AtomicBool::new(false));
    {
        let count = newmeth_count.clone();
        let pure = newmeth_pure.clone();
        register_newmeth_tracer(Arc::new(move |_m| {
            count.fetch_add(1, Ordering::Relaxed);
            pure.store(is_in_pure_context(), Ordering::Relaxed);
        }));
    }

    let spec_traced = Arc::new(AtomicUsize::new(0));
    {
        let count = spec_traced.clone();
        register_method_tracer(Arc::new(move |_s| {
            count.fetch_add(1, Ordering::Relaxed);
        }));
    }

    let compiled = Arc::new(AtomicUsize::new(0));
    {
        let count = compiled.clone();
        register_linfo_tracer(Arc::new(move |_s| {
            count.fetch_add(1, Ordering::Relaxed);
        }));
    }

    // Insertion fires the new-method tracer, inside the pure context.
    let f = registry().new_generic_function("tr_f", "main");
    define(&f, vec![b::int()], Arc::new(|_, _| Ok(Value::Int(1))));
    assert_eq!(newmeth_count.load(Ordering::Relaxed), 1);
    assert!(newmeth_pure.load(Ordering::Relaxed));
    assert!(!is_in_pure_context());

    // An untraced method specializes without firing the method tracer.
    apply_generic(&[f.clone(), Value::Int(1)]).unwrap();
    assert_eq!(spec_traced.load(Ordering::Relaxed), 0);

    // A traced method fires it on specialization, and code generation
    // fires the linfo tracer.
    let g = registry().new_generic_function("tr_g", "main");
    DefineBuilder::new(&g, vec![b::int()], Arc::new(|_, _| Ok(Value::Int(2))))
        .traced()
        .finish();
    assert_eq!(newmeth_count.load(Ordering::Relaxed), 2);
    apply_generic(&[g.clone(), Value::Int(1)]).unwrap();
    assert!(spec_traced.load(Ordering::Relaxed) >= 1);
    assert!(compiled.load(Ordering::Relaxed) >= 1);

    // Trace toggling is per method.
    let h = registry().new_generic_function("tr_h", "main");
    let mh = define(&h, vec![b::int()], Arc::new(|_, _| Ok(Value::Int(3))));
    mh.set_traced(true);
    let before = spec_traced.load(Ordering::Relaxed);
    apply_generic(&[h.clone(), Value::Int(1)]).unwrap();
    assert!(spec_traced.load(Ordering::Relaxed) > before);

    // A panicking tracer is suppressed; dispatch is unaffected.
    register_method_tracer(Arc::new(|_s| panic!("tracer exploded")));
    let i = registry().new_generic_function("tr_i", "main");
    let mi = define(&i, vec![b::int()], Arc::new(|_, _| Ok(Value::Int(4))));
    mi.set_traced(true);
    assert_eq!(
        apply_generic(&[i.clone(), Value::Int(1)]).unwrap(),
        Value::Int(4)
    );
    assert!(!is_in_pure_context());
}
