//! Per-method specialization store.
//!
//! Each method owns a `TypeMap` from concrete signatures to specializations.
//! `get_or_create` enforces the at-most-one-build invariant: concurrent
//! callers for the same signature serialize on the codegen lock, and a
//! signature already holding code is never rebuilt.
//!
//! The unspecialized fallback lives here too: when inference or codegen fail
//! for a specialization, dispatch runs a shared unoptimized version instead.
//! A template body that reads its static parameters at run time gets a
//! per-specialization fallback carrying those values as data; any other body
//! shares the method's single template specialization.

use crate::hooks::codegen_lock;
use crate::method::{Method, Specialization};
use crate::signature::Signature;
use crate::typemap::{LookupMode, Payload};
use std::sync::Arc;
use vesper_types::TypeEnv;

/// Get or create the specialization of `method` at `sig`.
///
/// Returns an existing entry when its signature is type-equal and it already
/// carries code; otherwise a fresh specialization is built and published
/// (replacing any code-less predecessor).
pub fn get_or_create(
    method: &Arc<Method>,
    sig: &Signature,
    sparams: &TypeEnv,
) -> Arc<Specialization> {
    let _lock = codegen_lock();
    let mut map = method.specializations.lock();
    let mut env = TypeEnv::new();
    if let Some(entry) = map.assoc_by_type(sig, &mut env, LookupMode::Exact) {
        if let Some(spec) = entry.payload.as_spec() {
            if spec.has_code() {
                return spec.clone();
            }
        }
    }
    let spec = Specialization::new(method, sig.clone(), sparams.clone());
    map.insert(sig.clone(), None, Vec::new(), Payload::Spec(spec.clone()));
    spec
}

/// Look up the specialization of `method` at `sig` without creating one.
pub fn lookup(method: &Method, sig: &Signature) -> Option<Arc<Specialization>> {
    let map = method.specializations.lock();
    let mut env = TypeEnv::new();
    let entry = map.assoc_by_type(sig, &mut env, LookupMode::Exact)?;
    entry.payload.as_spec().cloned()
}

/// The shared unspecialized version run when `spec` has no code.
///
/// When the signature bound static parameters and the template needs them at
/// run time, the fallback is a specialization at the same signature whose
/// body receives the parameter values as data. Otherwise every
/// specialization of the method shares one template specialization.
pub fn get_unspecialized(spec: &Arc<Specialization>) -> Option<Arc<Specialization>> {
    if let Some(fb) = spec.fallback() {
        return Some(fb);
    }
    let def = spec.def()?;
    if !spec.sparams.is_empty() && def.uses_static_params {
        let ducttape = Specialization::new(&def, spec.sig.clone(), spec.sparams.clone());
        ducttape.install_code(def.template.clone());
        ducttape.set_fallback(ducttape.clone());
        spec.set_fallback(ducttape.clone());
        return Some(ducttape);
    }
    let mut slot = def.unspecialized_slot().lock();
    if let Some(shared) = slot.as_ref() {
        return Some(shared.clone());
    }
    let shared = Specialization::new(&def, def.sig.clone(), TypeEnv::new());
    shared.install_code(def.template.clone());
    *slot = Some(shared.clone());
    Some(shared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::BodyFn;
    use vesper_types::builtins as b;
    use vesper_types::{Ty, Value};

    fn body() -> BodyFn {
        Arc::new(|_, _| Ok(Value::Int(1)))
    }

    fn sig(slots: Vec<Ty>) -> Signature {
        Signature::new(slots, vec![])
    }

    #[test]
    fn test_at_most_one_per_signature() {
        let m = Method::builder("s", sig(vec![b::int()]), body()).build();
        let concrete = sig(vec![b::int()]);
        let s1 = get_or_create(&m, &concrete, &TypeEnv::new());
        s1.install_code(body());
        let s2 = get_or_create(&m, &concrete, &TypeEnv::new());
        assert!(Arc::ptr_eq(&s1, &s2));
        assert_eq!(m.specializations.lock().len(), 1);
    }

    #[test]
    fn test_codeless_entry_is_rebuilt() {
        let m = Method::builder("s2", sig(vec![b::int()]), body()).build();
        let concrete = sig(vec![b::int()]);
        let s1 = get_or_create(&m, &concrete, &TypeEnv::new());
        let s2 = get_or_create(&m, &concrete, &TypeEnv::new());
        assert!(!Arc::ptr_eq(&s1, &s2));
        // Still one cache entry: the rebuild replaced the old publication.
        assert_eq!(m.specializations.lock().len(), 1);
    }

    #[test]
    fn test_lookup_does_not_create() {
        let m = Method::builder("s3", sig(vec![b::int()]), body()).build();
        let concrete = sig(vec![b::int()]);
        assert!(lookup(&m, &concrete).is_none());
        get_or_create(&m, &concrete, &TypeEnv::new());
        assert!(lookup(&m, &concrete).is_some());
    }

    #[test]
    fn test_shared_template_fallback() {
        let t = Ty::fresh_var("T", Ty::bottom(), Ty::any());
        let m = Method::builder("s4", Signature::new(vec![t], vec![t]), body()).build();
        let concrete = sig(vec![b::int()]);
        let s1 = get_or_create(&m, &concrete, &TypeEnv::new());
        let s2 = get_or_create(&m, &sig(vec![b::str_ty()]), &TypeEnv::new());
        let f1 = get_unspecialized(&s1).unwrap();
        let f2 = get_unspecialized(&s2).unwrap();
        assert!(Arc::ptr_eq(&f1, &f2));
        assert!(f1.has_code());
    }

    #[test]
    fn test_sparam_fallback_is_per_specialization() {
        let t = Ty::fresh_var("T", Ty::bottom(), Ty::any());
        let m = Method::builder("s5", Signature::new(vec![t], vec![t]), body())
            .uses_static_params()
            .build();
        let mut env1 = TypeEnv::new();
        env1.bind(t, b::int());
        let s1 = get_or_create(&m, &sig(vec![b::int()]), &env1);
        let mut env2 = TypeEnv::new();
        env2.bind(t, b::str_ty());
        let s2 = get_or_create(&m, &sig(vec![b::str_ty()]), &env2);
        let f1 = get_unspecialized(&s1).unwrap();
        let f2 = get_unspecialized(&s2).unwrap();
        assert!(!Arc::ptr_eq(&f1, &f2));
        assert_eq!(f1.sparams.get(t), Some(b::int()));
        assert_eq!(f2.sparams.get(t), Some(b::str_ty()));
        // Memoized on the specialization.
        let f1b = get_unspecialized(&s1).unwrap();
        assert!(Arc::ptr_eq(&f1, &f1b));
    }
}
