//! Ahead-of-time specialization.
//!
//! `compile_hint` is the compile-time lookup: build and compile the one
//! specialization covering a concrete signature, refusing when the match is
//! not unique or is poisoned by a reachable ambiguity. `precompile` sweeps
//! the world: every inferred-but-uncompiled specialization first, then (in
//! `all` mode) a representative specialization per leaf branch of every
//! definition's unions: per union slot member and per union-bounded type
//! variable, extending each signature that becomes a leaf.

use crate::ambiguity;
use crate::hooks;
use crate::inference;
use crate::method::Specialization;
use crate::registry::registry;
use crate::signature::Signature;
use crate::specializations;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use vesper_types::{builtins, instantiate, Ty, TypeEnv};

/// Try to build and compile a specialization covering `types` (the full
/// signature, function slot included). Returns whether one was produced.
pub fn compile_hint(types: &Signature) -> bool {
    get_specialization1(types).is_some()
}

/// The compile-time method lookup: exactly one definition must match.
fn get_specialization1(types: &Signature) -> Option<Arc<Specialization>> {
    if types.nparams() == 0 {
        return None;
    }
    let tuple = types.as_tuple();
    if !tuple.is_concrete() || tuple.has_free_vars() {
        return None;
    }
    let mt = registry().method_table(types.slots()[0])?;
    // A DataType-typed or tuple-typed slot can match several Type{}
    // definitions at once; insist on a unique match before specializing.
    for &ti in types.slots() {
        if ti == builtins::datatype() || ti.is_tuple() {
            match mt.matching_methods(tuple, 1, false) {
                None => return None,
                Some(v) if v.is_empty() => return None,
                Some(_) => {}
            }
            break;
        }
    }
    // A staged definition's generator may raise at specialization time.
    let sf = catch_unwind(AssertUnwindSafe(|| mt.lookup_by_type(types, true, true)))
        .ok()
        .flatten()?;
    let def = sf.def()?;
    if ambiguity::has_call_ambiguities(tuple, &def) {
        return None;
    }
    if sf.in_inference() {
        return None;
    }
    if !sf.is_inferred() {
        inference::type_infer(&sf, false);
    }
    hooks::compile_spec(&sf);
    if sf.has_code() {
        Some(sf)
    } else {
        None
    }
}

/// Sweep inferred-but-uncompiled specializations, then optionally attempt
/// whole-world compilation.
pub fn precompile(all: bool) {
    compile_specializations();
    if all {
        compile_all();
    }
}

fn compile_specializations() {
    let mut pending: Vec<Signature> = Vec::new();
    for mt in registry().all_tables() {
        mt.each_method(&mut |method| {
            method.each_specialization(&mut |spec| {
                if spec.is_inferred() && !spec.has_code() {
                    pending.push(spec.sig.clone());
                }
            });
        });
    }
    for sig in pending {
        compile_hint(&sig);
    }
}

fn compile_all() {
    for mt in registry().all_tables() {
        let mut methods = Vec::new();
        mt.each_method(&mut |m| methods.push(m.clone()));
        for method in methods {
            if method.is_staged() {
                continue;
            }
            let complete = compile_all_union(&method.sig);
            if !complete {
                // Some branch stayed abstract: compile the template so the
                // unspecialized path at least runs native.
                let spec =
                    specializations::get_or_create(&method, &method.sig, &TypeEnv::new());
                hooks::compile_spec(&spec);
            }
        }
    }
}

/// Expand union-typed slots into their cartesian product of members; each
/// combination that reaches a leaf signature gets a specialization.
fn compile_all_union(sig: &Signature) -> bool {
    let slots = sig.slots();
    let union_positions: Vec<(usize, &[Ty])> = slots
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.union_alts().map(|alts| (i, alts)))
        .collect();
    if union_positions.is_empty() {
        return compile_all_tvar_union(sig);
    }
    let mut idx = vec![0usize; union_positions.len()];
    let mut complete = true;
    loop {
        let mut combo = slots.to_vec();
        for (k, &(i, alts)) in union_positions.iter().enumerate() {
            combo[i] = alts[idx[k]];
        }
        let branch = Signature::from_tuple(Ty::tuple(combo), sig.tvars().to_vec());
        if !compile_all_tvar_union(&branch) {
            complete = false;
        }
        let mut k = 0;
        loop {
            if k == idx.len() {
                return complete;
            }
            idx[k] += 1;
            if idx[k] < union_positions[k].1.len() {
                break;
            }
            idx[k] = 0;
            k += 1;
        }
    }
}

/// Expand union-bounded type variables the same way, substituting each
/// member and compiling the instantiations that become leaves.
fn compile_all_tvar_union(sig: &Signature) -> bool {
    let tvars = sig.tvars();
    if tvars.is_empty() {
        let tuple = sig.as_tuple();
        if tuple.is_concrete() && !tuple.has_free_vars() {
            return compile_hint(sig);
        }
        return false;
    }
    let axes: Vec<Vec<Ty>> = tvars
        .iter()
        .map(|tv| match tv.var_info() {
            Some(v) => match v.ub.union_alts() {
                Some(alts) => alts.to_vec(),
                None => vec![v.ub],
            },
            None => Vec::new(),
        })
        .collect();
    if axes.iter().any(Vec::is_empty) {
        return false;
    }
    let mut idx = vec![0usize; axes.len()];
    let mut complete = true;
    loop {
        let mut env = TypeEnv::new();
        for (k, tv) in tvars.iter().enumerate() {
            env.bind(*tv, axes[k][idx[k]]);
        }
        let inst = instantiate(sig.as_tuple(), &env);
        if inst.is_concrete() && !inst.has_free_vars() {
            if !compile_hint(&Signature::from_tuple(inst, Vec::new())) {
                complete = false;
            }
        } else {
            complete = false;
        }
        let mut k = 0;
        loop {
            if k == idx.len() {
                return complete;
            }
            idx[k] += 1;
            if idx[k] < axes[k].len() {
                break;
            }
            idx[k] = 0;
            k += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{define, DefineBuilder};
    use vesper_types::builtins as b;
    use vesper_types::Value;

    #[test]
    fn test_compile_hint_idempotent() {
        let f = registry().new_generic_function("pc_hint", "main");
        define(&f, vec![b::int()], Arc::new(|_, _| Ok(Value::Int(1))));
        let fty = f.as_function_ty().unwrap();
        let sig = Signature::new(vec![fty, b::int()], vec![]);
        assert!(compile_hint(&sig));
        assert!(compile_hint(&sig));
        let mt = registry().method_table(fty).unwrap();
        assert_eq!(mt.cache_len(), 1);
    }

    #[test]
    fn test_compile_hint_rejects_abstract() {
        let f = registry().new_generic_function("pc_abs", "main");
        define(&f, vec![b::real()], Arc::new(|_, _| Ok(Value::Int(1))));
        let fty = f.as_function_ty().unwrap();
        assert!(!compile_hint(&Signature::new(vec![fty, b::real()], vec![])));
        assert!(compile_hint(&Signature::new(vec![fty, b::int()], vec![])));
    }

    #[test]
    fn test_compile_hint_rejects_missing() {
        let f = registry().new_generic_function("pc_miss", "main");
        define(&f, vec![b::int()], Arc::new(|_, _| Ok(Value::Int(1))));
        let fty = f.as_function_ty().unwrap();
        assert!(!compile_hint(&Signature::new(vec![fty, b::str_ty()], vec![])));
    }

    #[test]
    fn test_precompile_expands_union_slots() {
        let f = registry().new_generic_function("pc_union", "main");
        define(
            &f,
            vec![Ty::union(vec![b::int(), b::float()])],
            Arc::new(|_, _| Ok(Value::Int(1))),
        );
        precompile(true);
        let fty = f.as_function_ty().unwrap();
        let mt = registry().method_table(fty).unwrap();
        // Both members reached a leaf specialization.
        let mut leaf_sigs = 0;
        mt.each_method(&mut |m| {
            m.each_specialization(&mut |s| {
                if s.sig.is_leaf() && s.has_code() {
                    leaf_sigs += 1;
                }
            });
        });
        assert!(leaf_sigs >= 2);
    }

    #[test]
    fn test_precompile_expands_tvar_unions() {
        let f = registry().new_generic_function("pc_tvar", "main");
        let t = Ty::fresh_var("T", Ty::bottom(), Ty::union(vec![b::int(), b::str_ty()]));
        DefineBuilder::new(&f, vec![t], Arc::new(|_, _| Ok(Value::Int(1))))
            .tvars(vec![t])
            .finish();
        precompile(true);
        let fty = f.as_function_ty().unwrap();
        let mt = registry().method_table(fty).unwrap();
        let mut leaf_sigs = 0;
        mt.each_method(&mut |m| {
            m.each_specialization(&mut |s| {
                if s.sig.is_leaf() && s.has_code() {
                    leaf_sigs += 1;
                }
            });
        });
        assert!(leaf_sigs >= 2);
    }
}
