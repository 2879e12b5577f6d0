//! The type-inference hook.
//!
//! The optimizing inferencer is an external collaborator reached through a
//! single installable callback. Installing it sweeps every pre-existing
//! uninferred specialization so the inferencer sees work that predates it,
//! and resets the dispatch caches of every table that has definitions so
//! future dispatches rebuild through the hook.
//!
//! The hook is allowed to allocate, type-check, and recursively dispatch; it
//! runs under the reentrant codegen lock. A hook that panics is treated as
//! an inference failure: the specialization is left uncompiled and dispatch
//! proceeds on the unspecialized fallback.

use crate::hooks;
use crate::method::Specialization;
use crate::registry::registry;
use parking_lot::RwLock;
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// `infer(specialization, force)`; may install code on the specialization.
pub type InferHook = Arc<dyn Fn(&Arc<Specialization>, bool) + Send + Sync>;

static INFER_HOOK: RwLock<Option<InferHook>> = RwLock::new(None);

thread_local! {
    static IN_INFERENCE: Cell<bool> = const { Cell::new(false) };
}

/// Install the inference hook and immediately sweep every reachable
/// uninferred specialization with `force = true`.
pub fn set_infer_hook(hook: InferHook) {
    *INFER_HOOK.write() = Some(hook);
    let mut pending: Vec<Arc<Specialization>> = Vec::new();
    for mt in registry().all_tables() {
        if mt.defs_len() == 0 {
            // Builtin tables dispatch through their single cache entry;
            // resetting it would orphan them.
            continue;
        }
        mt.reset_cache();
        mt.each_method(&mut |method| {
            method.each_specialization(&mut |spec| {
                if !spec.is_inferred() {
                    pending.push(spec.clone());
                }
            });
        });
    }
    for spec in pending {
        type_infer(&spec, true);
    }
}

/// Whether an inference hook is installed.
pub fn infer_hook_installed() -> bool {
    INFER_HOOK.read().is_some()
}

/// Run the inferencer on a specialization. Returns whether inference
/// completed; a missing hook, a recursive non-forced call, or a hook panic
/// all leave the specialization unchanged.
pub fn type_infer(spec: &Arc<Specialization>, force: bool) -> bool {
    let hook = INFER_HOOK.read().clone();
    let Some(hook) = hook else {
        return false;
    };
    let nested = IN_INFERENCE.with(Cell::get);
    if nested && !force {
        // The inferencer dispatching on itself must not re-enter.
        return false;
    }
    if spec.in_inference() {
        return false;
    }
    let _lock = hooks::codegen_lock();
    IN_INFERENCE.with(|c| c.set(true));
    spec.set_in_inference(true);
    let result = catch_unwind(AssertUnwindSafe(|| hook(spec, force)));
    spec.set_in_inference(false);
    IN_INFERENCE.with(|c| c.set(nested));
    match result {
        Ok(()) => {
            spec.mark_inferred();
            true
        }
        Err(_) => {
            eprintln!(
                "WARNING: type inference failed for {}; continuing uncompiled",
                spec.sig
            );
            false
        }
    }
}

/// Bracket the inferencer's own critical section.
pub fn typeinf_begin() {
    hooks::typeinf_begin();
}

pub fn typeinf_end() {
    hooks::typeinf_end();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::{BodyFn, Method};
    use crate::signature::Signature;
    use vesper_types::builtins as b;
    use vesper_types::{TypeEnv, Value};

    fn body() -> BodyFn {
        Arc::new(|_, _| Ok(Value::Int(1)))
    }

    // Hook installation is global; the sweep and failure paths are covered
    // by the integration tests, which own their process.

    #[test]
    fn test_infer_without_hook_is_noop() {
        let sig = Signature::new(vec![b::str_ty()], vec![]);
        let m = Method::builder("inf", sig.clone(), body()).build();
        let spec = crate::method::Specialization::new(&m, sig, TypeEnv::new());
        if !infer_hook_installed() {
            assert!(!type_infer(&spec, false));
            assert!(!spec.is_inferred());
        }
    }

    #[test]
    fn test_typeinf_bracket() {
        typeinf_begin();
        typeinf_end();
    }
}
