//! Per-function method tables.
//!
//! A `MethodTable` owns the ordered definition list (`defs`, methods, most
//! specific first) and the dispatch cache (`cache`, specializations). All
//! definition-time work (insertion, the ambiguity scan, cache invalidation)
//! and all specialization building serialize on the codegen lock; lookups
//! take the table locks read-side only.

use crate::ambiguity;
use crate::hooks;
use crate::method::{Method, Specialization};
use crate::signature::{arg_type_tuple, Signature};
use crate::specialize;
use crate::specializations;
use crate::typemap::{LookupMode, Payload, TypeMap};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use vesper_types::{intersect, subtype, types_equal, Symbol, Ty, TypeEnv, Value};

/// One match produced by [`MethodTable::matching_methods`]: the
/// intersection with the query, the static parameters it bound, and the
/// matched method.
pub struct MethodMatch {
    pub ti: Ty,
    pub env: TypeEnv,
    pub method: Arc<Method>,
}

/// The method table of one generic function.
pub struct MethodTable {
    pub name: Symbol,
    pub module: Symbol,
    pub(crate) defs: RwLock<TypeMap>,
    pub(crate) cache: RwLock<TypeMap>,
    max_args: AtomicUsize,
    /// Sibling function handling keyword-sorted calls, created lazily.
    pub(crate) kwsorter: Mutex<Option<Value>>,
}

impl MethodTable {
    pub fn new(name: Symbol, module: Symbol) -> Arc<Self> {
        Arc::new(Self {
            name,
            module,
            // The function object's own type participates in the defs split
            // but not in the cache split.
            defs: RwLock::new(TypeMap::new(0)),
            cache: RwLock::new(TypeMap::new(1)),
            max_args: AtomicUsize::new(0),
            kwsorter: Mutex::new(None),
        })
    }

    pub fn max_args(&self) -> usize {
        self.max_args.load(Ordering::Relaxed)
    }

    pub fn defs_len(&self) -> usize {
        self.defs.read().len()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.read().len()
    }

    // -------------------------------------------------------------------------
    // Definition insertion
    // -------------------------------------------------------------------------

    /// Insert a definition, then run the ambiguity/shadowing analysis and
    /// invalidate newly shadowed cache entries.
    pub fn insert_method(self: &Arc<Self>, method: Arc<Method>, simplesig: Option<Signature>) {
        let _lock = hooks::codegen_lock();
        let sig = method.sig.clone();
        let shadowed = {
            let mut defs = self.defs.write();
            let (newentry, displaced) =
                defs.insert(sig.clone(), simplesig, Vec::new(), Payload::Method(method.clone()));
            match displaced.and_then(|p| p.as_method().cloned()) {
                Some(old) => {
                    // A type-equal signature was replaced: keep its recorded
                    // ambiguities alive on the newcomer and warn.
                    method.adopt_ambig_from(&old);
                    warn_overwrite(self, &method, &old);
                    vec![old]
                }
                None => ambiguity::check_ambiguous_matches(&defs, &newentry, &method),
            }
        };
        if !shadowed.is_empty() {
            {
                let mut cache = self.cache.write();
                ambiguity::invalidate_conflicting(&mut cache, sig.as_tuple(), &shadowed);
            }
            // The call-site cache may hold the just-unlinked entries; flush
            // them so steady-state fast-path hits stay equivalent to the
            // slow path.
            let newsig = sig.as_tuple();
            crate::apply::flush_call_cache(&|entry| {
                let Some(def) = entry.payload.def() else {
                    return false;
                };
                shadowed.iter().any(|m| Arc::ptr_eq(m, &def)) && {
                    let mut env = TypeEnv::new();
                    !intersect(newsig, entry.sig.as_tuple(), &mut env).is_bottom()
                }
            });
        }
        let arity = sig.non_vararg_arity();
        self.max_args.fetch_max(arity, Ordering::Relaxed);
        hooks::trace_new_method(&method);
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    /// Find (or build) the specialization covering a signature type.
    ///
    /// `cache` records the result in the dispatch cache; `inexact` accepts a
    /// match that only intersects the query. An inexact hit whose method has
    /// an ambiguity reachable under the query is rejected.
    pub fn lookup_by_type(
        self: &Arc<Self>,
        types: &Signature,
        cache: bool,
        inexact: bool,
    ) -> Option<Arc<Specialization>> {
        {
            let cache_map = self.cache.read_recursive();
            let mut env = TypeEnv::new();
            if let Some(entry) = cache_map.assoc_by_type(types, &mut env, LookupMode::Subtype) {
                if let Some(spec) = entry.payload.as_spec() {
                    return Some(spec.clone());
                }
            }
        }
        let cache = cache || types.as_tuple().is_concrete();
        self.assoc_by_type_slow(types, cache, inexact)
    }

    /// Fast path over the dispatch cache for an argument array; on miss the
    /// argument-type tuple is built and resolved through the definitions.
    pub fn lookup_by_args(self: &Arc<Self>, args: &[Value]) -> Option<Arc<Specialization>> {
        {
            let cache_map = self.cache.read_recursive();
            if let Some(entry) = cache_map.assoc_exact(args) {
                if let Some(spec) = entry.payload.as_spec() {
                    return Some(spec.clone());
                }
            }
        }
        let tt = arg_type_tuple(args);
        self.assoc_by_type_slow(&tt, true, false)
    }

    /// Whether some definition covers `types`. Does not populate the cache.
    pub fn exists(self: &Arc<Self>, types: &Signature) -> bool {
        self.lookup_by_type(types, false, false).is_some()
    }

    /// The definition whose signature is type-equal to `types`, if any.
    pub fn definition_for(&self, types: &Signature) -> Option<Arc<Method>> {
        let defs = self.defs.read_recursive();
        let mut env = TypeEnv::new();
        let entry = defs.assoc_by_type(types, &mut env, LookupMode::Exact)?;
        entry.payload.as_method().cloned()
    }

    /// Match a definition for the query tuple, repair the cache key, and
    /// build (optionally caching) the specialization.
    fn assoc_by_type_slow(
        self: &Arc<Self>,
        tt: &Signature,
        cache: bool,
        inexact: bool,
    ) -> Option<Arc<Specialization>> {
        let _lock = hooks::codegen_lock();
        let (spec, method, cached) = {
            let defs = self.defs.read_recursive();
            let mut env = TypeEnv::new();
            let mode = if inexact {
                LookupMode::Inexact
            } else {
                LookupMode::Subtype
            };
            let entry = defs.assoc_by_type(tt, &mut env, mode)?;
            let method = entry.payload.as_method()?.clone();
            if ambiguity::has_call_ambiguities(tt.as_tuple(), &method) {
                return None;
            }
            let spec_sig = specialize::join_tsig(tt, &entry.sig);
            if !cache {
                (
                    specializations::get_or_create(&method, &spec_sig, &env),
                    method,
                    false,
                )
            } else {
                let mut cache_map = self.cache.write();
                let spec = specialize::cache_method(
                    self, &mut cache_map, &defs, &method, spec_sig, tt, &entry, env,
                );
                (spec, method, true)
            }
        };
        // Inference runs with the table guards released: the hook may
        // dispatch recursively.
        if cached {
            specialize::finish_new_specialization(&method, &spec);
        }
        Some(spec)
    }

    // -------------------------------------------------------------------------
    // Sweeps
    // -------------------------------------------------------------------------

    /// Visit every method in the definition list.
    pub fn each_method(&self, f: &mut dyn FnMut(&Arc<Method>)) {
        let defs = self.defs.read_recursive();
        defs.visit_all(&mut |entry| {
            if let Some(m) = entry.payload.as_method() {
                f(m);
            }
            true
        });
    }

    /// Drop every cached specialization. Used when a newly installed
    /// inference hook must get a chance to see future dispatches.
    pub fn reset_cache(&self) {
        self.cache.write().clear();
        crate::apply::flush_call_cache(&|_| true);
    }

    // -------------------------------------------------------------------------
    // Collected matching
    // -------------------------------------------------------------------------

    /// Every definition whose signature intersects `query`, in specificity
    /// order, skipping matches fully covered by an earlier one and matches
    /// excluded by a reachable ambiguity. `lim < 0` means unbounded;
    /// otherwise exceeding `lim` matches returns `None` (overflow).
    pub fn matching_methods(
        &self,
        query: Ty,
        lim: isize,
        include_ambiguous: bool,
    ) -> Option<Vec<MethodMatch>> {
        let defs = self.defs.read_recursive();
        ml_matches(&defs, query, lim, include_ambiguous)
    }
}

/// The collect form of the intersection traversal.
pub(crate) fn ml_matches(
    defs: &TypeMap,
    query: Ty,
    lim: isize,
    include_ambiguous: bool,
) -> Option<Vec<MethodMatch>> {
    let mut out: Vec<MethodMatch> = Vec::new();
    let mut overflow = false;
    defs.intersection_visit(query, None, &mut |entry, ti, env, _after| {
        let Some(method) = entry.payload.as_method() else {
            return true;
        };
        // In limited mode a match already covered by a prior, more specific
        // one is skipped.
        if lim >= 0 {
            let covered = out.iter().any(|prior| {
                prior.ti.is_concrete()
                    && !prior.ti.has_free_vars()
                    && !ti.has_free_vars()
                    && subtype(ti, prior.ti)
            });
            if covered {
                return true;
            }
        }
        let matched_all_tvars = !env.has_unbound_vars();
        // The definition fully covers the query: the traversal can stop
        // after this entry.
        let done = matched_all_tvars
            && types_equal(ti, query)
            && subtype(query, entry.sig.as_tuple());
        let mut return_this_match = true;
        if method.has_ambiguities() && (!include_ambiguous || done) {
            for partner in method.ambiguities() {
                let mut penv = TypeEnv::new();
                let pti = intersect(query, partner.sig.as_tuple(), &mut penv);
                if pti.is_bottom() {
                    continue;
                }
                if include_ambiguous {
                    if !out.iter().any(|m| Arc::ptr_eq(&m.method, &partner)) {
                        out.push(MethodMatch {
                            ti: pti,
                            env: penv,
                            method: partner.clone(),
                        });
                    }
                } else {
                    // The entry loses this region to an unresolved overlap.
                    let mut aenv = TypeEnv::new();
                    let ambi = intersect(entry.sig.as_tuple(), partner.sig.as_tuple(), &mut aenv);
                    if subtype(ti, ambi) {
                        return_this_match = false;
                        break;
                    }
                }
            }
        }
        if return_this_match {
            if lim >= 0 && out.len() >= lim as usize {
                overflow = true;
                return false;
            }
            out.push(MethodMatch {
                ti,
                env: env.clone(),
                method: method.clone(),
            });
        }
        !done
    });
    if overflow {
        None
    } else {
        Some(out)
    }
}

fn warn_overwrite(mt: &MethodTable, new: &Method, old: &Method) {
    eprintln!(
        "WARNING: method definition {}{} in module {} at {}:{} overwritten at {}:{}.",
        mt.name, new.sig, old.module, old.file, old.line, new.file, new.line,
    );
}
