//! The generic-apply entry point and its call-site cache.
//!
//! Hot calls resolve in a handful of handle comparisons: a process-wide
//! open-addressed array of published cache entries is probed at four indices
//! derived from the call site, and a hit needs only an arity check plus
//! per-slot `type_of` handle equality. The fast path takes no lock.
//!
//! Slots hold raw pointers to entries whose reference count was
//! intentionally leaked at publication, so a racing reader can never observe
//! a freed entry; a displaced or flushed pointer simply stays live. Entries
//! removed from a table's dispatch cache are flushed from here as part of
//! the same invalidation, so a stale slot can only be observed during the
//! race window the memory model already allows.

use crate::ambiguity;
use crate::error::{DispatchError, DispatchResult};
use crate::hooks;
use crate::method::Specialization;
use crate::registry::{registry, registry_initialized};
use crate::signature::{arg_type_tuple, with_leading_function_type};
use crate::specialize;
use crate::specializations;
use crate::typemap::{LookupMode, TypeMapEntry};
use rustc_hash::FxHasher;
use std::hash::Hasher;
use std::panic::Location;
use std::sync::atomic::{AtomicPtr, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use vesper_types::{intersect, Ty, TypeEnv, Value};

/// Size of the call-site cache; a power of two.
pub const N_CALL_CACHE: usize = 4096;

struct CallSiteCache {
    slots: Box<[AtomicPtr<TypeMapEntry>]>,
    /// 2-bit round-robin counters choosing which of the four candidate
    /// slots an installation overwrites.
    pick_which: Box<[AtomicU8]>,
}

static CALL_CACHE: OnceLock<CallSiteCache> = OnceLock::new();

fn call_cache() -> &'static CallSiteCache {
    CALL_CACHE.get_or_init(|| CallSiteCache {
        slots: (0..N_CALL_CACHE)
            .map(|_| AtomicPtr::new(std::ptr::null_mut()))
            .collect(),
        pick_which: (0..N_CALL_CACHE).map(|_| AtomicU8::new(0)).collect(),
    })
}

/// A stable per-site identifier derived from the caller's source location.
fn callsite_hash(loc: &'static Location<'static>) -> u32 {
    let mut h = FxHasher::default();
    h.write_usize(loc.file().as_ptr() as usize);
    h.write_u32(loc.line());
    h.write_u32(loc.column());
    h.finish() as u32
}

/// Per-slot fast signature match: concrete types are hash-consed, so handle
/// comparison against `type_of` of each argument suffices.
#[inline(always)]
fn sig_match_fast(args: &[Value], slots: &[Ty]) -> bool {
    args.iter().zip(slots.iter()).all(|(a, &s)| a.type_of() == s)
}

/// Apply a generic function to argument values. `args[0]` is the function
/// itself; the call site of this function is the inline-cache key.
#[track_caller]
pub fn apply_generic(args: &[Value]) -> DispatchResult<Value> {
    apply_generic_at(callsite_hash(Location::caller()), args)
}

/// [`apply_generic`] with an explicit call-site identifier. Any stable
/// per-site value works; tests use this to pin cache geometry.
pub fn apply_generic_at(callsite: u32, args: &[Value]) -> DispatchResult<Value> {
    let nargs = args.len();
    let cc = call_cache();
    let mask = (N_CALL_CACHE - 1) as u32;
    // Four candidate indices from different parts of the hash, so one
    // collision cannot evict all of a site's entries.
    let idx = [
        (callsite & mask) as usize,
        ((callsite >> 8) & mask) as usize,
        ((callsite >> 16) & mask) as usize,
        (((callsite >> 24) | (callsite << 8)) & mask) as usize,
    ];

    let mut hit: Option<&TypeMapEntry> = None;
    for &i in &idx {
        let p = cc.slots[i].load(Ordering::Acquire);
        if p.is_null() {
            continue;
        }
        // Safety: slots only hold pointers obtained from `Arc::into_raw`
        // whose reference is never released; the entry outlives the process.
        let e = unsafe { &*p };
        if e.sig.nparams() == nargs && sig_match_fast(args, e.sig.slots()) {
            hit = Some(e);
            break;
        }
    }

    let spec: Arc<Specialization> = match hit {
        Some(entry) => match entry.payload.as_spec() {
            Some(s) => s.clone(),
            None => return Err(method_error(args)),
        },
        None => {
            let Some(mt) = args.first().and_then(|f| registry().method_table_of(f)) else {
                return Err(method_error(args));
            };
            let found = { mt.cache.read_recursive().assoc_exact(args) };
            match found {
                Some(entry) => {
                    if entry.cacheable_at_callsite() {
                        // Slightly randomize the slot choice per site.
                        let which = (cc.pick_which[idx[0]]
                            .fetch_add(1, Ordering::Relaxed)
                            .wrapping_add(1)
                            & 3) as usize;
                        install(&cc.slots[idx[which]], &entry);
                    }
                    match entry.payload.as_spec() {
                        Some(s) => s.clone(),
                        None => return Err(method_error(args)),
                    }
                }
                None => match mt.lookup_by_args(args) {
                    Some(s) => s,
                    None => return Err(method_error(args)),
                },
            }
        }
    };
    call_method_internal(&spec, args)
}

fn install(slot: &AtomicPtr<TypeMapEntry>, entry: &Arc<TypeMapEntry>) {
    let raw = Arc::into_raw(entry.clone()).cast_mut();
    // The displaced pointer stays live for any racing reader; one leaked
    // reference per displaced entry is the cost of the lock-free fast path.
    slot.swap(raw, Ordering::Release);
}

/// Drop every call-site slot whose entry the predicate selects. Runs as
/// part of cache invalidation, under the codegen lock.
pub(crate) fn flush_call_cache(pred: &dyn Fn(&TypeMapEntry) -> bool) {
    let Some(cc) = CALL_CACHE.get() else {
        return;
    };
    for slot in cc.slots.iter() {
        let p = slot.load(Ordering::Acquire);
        if p.is_null() {
            continue;
        }
        // Safety: see `apply_generic_at`.
        let e = unsafe { &*p };
        if pred(e) {
            let _ = slot.compare_exchange(
                p,
                std::ptr::null_mut(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
        }
    }
}

/// Occupancy and pick-which distribution, for profiling.
pub fn call_cache_stats() -> (usize, [usize; 4]) {
    let mut occupied = 0;
    let mut picks = [0usize; 4];
    if let Some(cc) = CALL_CACHE.get() {
        for slot in cc.slots.iter() {
            if !slot.load(Ordering::Acquire).is_null() {
                occupied += 1;
            }
        }
        for pick in cc.pick_which.iter() {
            picks[(pick.load(Ordering::Relaxed) & 3) as usize] += 1;
        }
    }
    (occupied, picks)
}

/// Run a specialization: generated code when present, otherwise compile on
/// demand, otherwise the shared unspecialized fallback.
pub(crate) fn call_method_internal(
    spec: &Arc<Specialization>,
    args: &[Value],
) -> DispatchResult<Value> {
    if let Some(code) = spec.code() {
        return code(args, &spec.sparams);
    }
    hooks::compile_spec(spec);
    if let Some(code) = spec.code() {
        return code(args, &spec.sparams);
    }
    match specializations::get_unspecialized(spec) {
        Some(fb) => match fb.code() {
            Some(code) => code(args, &spec.sparams),
            None => Err(method_error(args)),
        },
        None => Err(method_error(args)),
    }
}

/// Build the dispatch error for a failed call, distinguishing a reachable
/// ambiguity from a plain missing method.
pub(crate) fn method_error(args: &[Value]) -> DispatchError {
    if !registry_initialized() {
        // Bootstrap: the error machinery itself does not exist yet.
        eprintln!("A method error occurred before the dispatch error type was defined. Aborting...");
        for a in args {
            eprintln!("  ::{}", a.type_of());
        }
        std::process::abort();
    }
    let func = args.first().cloned().unwrap_or(Value::Bool(false));
    let rest = args.get(1..).unwrap_or(&[]).to_vec();
    if let Some(mt) = registry().method_table_of(&func) {
        let tt = arg_type_tuple(args);
        let defs = mt.defs.read_recursive();
        let mut env = TypeEnv::new();
        if let Some(entry) = defs.assoc_by_type(&tt, &mut env, LookupMode::Subtype) {
            if let Some(m) = entry.payload.as_method() {
                if ambiguity::has_call_ambiguities(tt.as_tuple(), m) {
                    return DispatchError::AmbiguousCall { func, args: rest };
                }
            }
        }
    }
    DispatchError::NoMethod { func, args: rest }
}

// =============================================================================
// invoke()
// =============================================================================

/// The definition `invoke` would select for the given lookup signature
/// (written without the function slot).
pub fn invoke_lookup(f: &Value, lookup: &[Ty]) -> Option<Arc<TypeMapEntry>> {
    let fty = f.as_function_ty()?;
    let mt = registry().method_table(fty)?;
    let types = with_leading_function_type(fty, lookup, Vec::new());
    let defs = mt.defs.read_recursive();
    let mut env = TypeEnv::new();
    defs.assoc_by_type(&types, &mut env, LookupMode::Subtype)
}

/// Dispatch to the definition matching `lookup` rather than the most
/// specific one for the argument types. Specializations built here live in
/// the method's private invoke cache, never in the shared dispatch cache.
///
/// The argument types must be subtypes of the lookup signature.
pub fn invoke(f: &Value, lookup: &[Ty], call_args: &[Value]) -> DispatchResult<Value> {
    let mut args: Vec<Value> = Vec::with_capacity(call_args.len() + 1);
    args.push(f.clone());
    args.extend_from_slice(call_args);

    let Some(fty) = f.as_function_ty() else {
        return Err(method_error(&args));
    };
    let Some(mt) = registry().method_table(fty) else {
        return Err(method_error(&args));
    };
    let Some(entry) = invoke_lookup(f, lookup) else {
        return Err(DispatchError::NoMethod {
            func: f.clone(),
            args: call_args.to_vec(),
        });
    };
    let Some(method) = entry.payload.as_method().cloned() else {
        return Err(method_error(&args));
    };

    {
        let invokes = method.invokes.lock();
        if let Some(hit) = invokes.assoc_exact(&args) {
            if let Some(spec) = hit.payload.as_spec() {
                let spec = spec.clone();
                drop(invokes);
                return call_method_internal(&spec, &args);
            }
        }
    }

    let tt = arg_type_tuple(&args);
    let mut tpenv = TypeEnv::new();
    if !entry.sig.tvars().is_empty() {
        let ti = intersect(tt.as_tuple(), entry.sig.as_tuple(), &mut tpenv);
        debug_assert!(!ti.is_bottom());
    }
    let spec_sig = specialize::join_tsig(&tt, &entry.sig);
    let spec = {
        let _lock = hooks::codegen_lock();
        let defs = mt.defs.read_recursive();
        let mut invokes = method.invokes.lock();
        specialize::cache_method(&mt, &mut invokes, &defs, &method, spec_sig, &tt, &entry, tpenv)
    };
    specialize::finish_new_specialization(&method, &spec);
    call_method_internal(&spec, &args)
}

/// Number of entries in a method's private invoke cache.
pub fn invoke_cache_len(mt_method: &crate::method::Method) -> usize {
    mt_method.invokes.lock().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::define;
    use std::sync::Arc;
    use vesper_types::builtins as b;

    #[test]
    fn test_apply_builtin() {
        let f = registry().make_builtin(
            "apply_b",
            Arc::new(|args, _| Ok(Value::Int(args.len() as i64 - 1))),
        );
        let out = apply_generic(&[f.clone(), Value::Int(1), Value::Int(2)]).unwrap();
        assert_eq!(out, Value::Int(2));
    }

    #[test]
    fn test_apply_non_function_errors() {
        let err = apply_generic(&[Value::Int(3)]).unwrap_err();
        assert!(matches!(err, DispatchError::NoMethod { .. }));
    }

    #[test]
    fn test_fast_path_matches_slow_path() {
        let f = registry().new_generic_function("apply_eq", "main");
        define(&f, vec![b::int()], Arc::new(|_, _| Ok(Value::Int(10))));
        define(&f, vec![b::str_ty()], Arc::new(|_, _| Ok(Value::Int(20))));
        let site = 0xDEAD_BEEF;
        // First call populates; repeats must agree through the fast path.
        for _ in 0..4 {
            assert_eq!(
                apply_generic_at(site, &[f.clone(), Value::Int(1)]).unwrap(),
                Value::Int(10)
            );
            assert_eq!(
                apply_generic_at(site, &[f.clone(), Value::str("s")]).unwrap(),
                Value::Int(20)
            );
        }
        let (occupied, _) = call_cache_stats();
        assert!(occupied >= 1);
    }

    #[test]
    fn test_invoke_selects_less_specific() {
        let f = registry().new_generic_function("apply_inv", "main");
        define(&f, vec![b::real()], Arc::new(|_, _| Ok(Value::str("real"))));
        define(&f, vec![b::int()], Arc::new(|_, _| Ok(Value::str("int"))));
        assert_eq!(
            apply_generic(&[f.clone(), Value::Int(3)]).unwrap(),
            Value::str("int")
        );
        assert_eq!(
            invoke(&f, &[b::real()], &[Value::Int(3)]).unwrap(),
            Value::str("real")
        );
    }
}
