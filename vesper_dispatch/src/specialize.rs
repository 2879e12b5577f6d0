//! Building cached specializations.
//!
//! Matching a definition for a concrete call is the easy half; deciding what
//! signature to *cache* the resulting specialization under is where the
//! policy lives. Caching the exact argument types gives the fastest lookups
//! but can flood the cache (every closure type, every `Type{X}`); caching a
//! widened signature covers more calls per entry but risks swallowing calls
//! that belong to a more specific definition. The builder widens where the
//! declaration says the precision is unused, then protects the widened entry
//! with guard signatures extracted from the competing definitions, or gives
//! up and caches under the original concrete signature when guards cannot
//! express the conflicts.

use crate::hooks;
use crate::inference;
use crate::method::{Method, Specialization};
use crate::signature::Signature;
use crate::specializations;
use crate::table::{self, MethodTable};
use crate::typemap::{Payload, TypeMap, TypeMapEntry};
use std::sync::Arc;
use vesper_types::{builtins, instantiate, intersect, subtype, Ty, TypeEnv};

/// Widening is abandoned when distinguishing the entry would take more than
/// this many guard signatures.
const MAX_UNSPECIALIZED_CONFLICTS: usize = 32;

/// A "very general" declared slot: `Any`, the `ANY` marker, or the
/// unconstrained `Type{T}`. Such a slot must not be specialized per type
/// argument, since every type would mint its own cache entry.
fn very_general_type(t: Option<Ty>) -> bool {
    match t {
        Some(t) => t.is_any() || t.is_any_marker() || t == builtins::type_type(),
        None => false,
    }
}

/// Repair the argument-type tuple after intersection: a slot holding
/// `Type{X}` where the definition actually matched on the *kind* must be
/// cached as the kind, or lookups would believe the entry matches on
/// `Type{X}` itself.
pub(crate) fn join_tsig(tt: &Signature, decl: &Signature) -> Signature {
    let mut slots: Vec<Ty> = tt.slots().to_vec();
    let mut changed = false;
    for (i, slot) in slots.iter_mut().enumerate() {
        let Some(inner) = slot.typeof_inner() else {
            continue;
        };
        let Some(decl_i) = decl.as_tuple().nth_slot_ty(i) else {
            continue;
        };
        let kind = inner.kind_of();
        if subtype(kind, decl_i) && !subtype(builtins::type_type(), decl_i) {
            *slot = kind;
            changed = true;
        }
    }
    if changed {
        Signature::new(slots, Vec::new())
    } else {
        tt.clone()
    }
}

/// Build a specialization for the matched definition and record it in
/// `cache` under the signature the widening rules select.
///
/// `spec_sig` is the repaired argument-type tuple, `tt` the original one,
/// `defn_entry` the matched definition entry, and `sparams` the static
/// parameters the match bound.
#[allow(clippy::too_many_arguments)]
pub(crate) fn cache_method(
    mt: &MethodTable,
    cache: &mut TypeMap,
    defs: &TypeMap,
    definition: &Arc<Method>,
    spec_sig: Signature,
    tt: &Signature,
    defn_entry: &Arc<TypeMapEntry>,
    sparams: TypeEnv,
) -> Arc<Specialization> {
    let _lock = hooks::codegen_lock();
    let decl = &defn_entry.sig;
    let isstaged = definition.is_staged();
    let mut need_guard_entries = false;
    let mut has_new_params = false;
    let mut make_simplesig = false;
    let np = spec_sig.nparams();
    let mut newparams: Vec<Ty> = spec_sig.slots().to_vec();
    let tt_slots = tt.slots();

    for i in 0..np {
        let mut elt = newparams[i];
        let decl_i = decl.as_tuple().nth_slot_ty(i);

        // A slot swapped to its kind by the signature repair (or seen as a
        // kind directly) always needs guards: subtypes of Type{} may match
        // other definitions.
        if (spec_sig.as_tuple() != tt.as_tuple() && tt_slots.get(i).copied() != Some(elt))
            || elt.is_kind()
        {
            need_guard_entries = true;
            continue;
        }

        // Staged bodies are generated per concrete signature.
        if isstaged {
            continue;
        }

        // Avoid specializing on tuple-type arguments unless the declaration
        // matches on `Type` itself.
        if let Some(inner) = elt.typeof_inner() {
            if inner.is_tuple()
                && decl_i.map_or(true, |d| !subtype(d, builtins::type_type()) || d.is_kind())
            {
                elt = builtins::anytuple_type();
                newparams[i] = elt;
                has_new_params = true;
                need_guard_entries = true;
            }
        }

        let notcalled_func = (1..=8).contains(&i)
            && !definition.arg_is_called(i)
            && subtype(elt, builtins::function());

        if decl_i == Some(Ty::any_marker()) {
            // Slots marked ANY are never specialized.
            newparams[i] = Ty::any();
            has_new_params = true;
            need_guard_entries = true;
        } else if notcalled_func && decl_i.map_or(false, despecializable_callable_decl) {
            // The body never calls this argument: one Function entry serves
            // every closure type.
            newparams[i] = builtins::function();
            make_simplesig = true;
            has_new_params = true;
            need_guard_entries = true;
        } else if elt.typeof_inner().map_or(false, Ty::is_type_of_type)
            && (elt
                .typeof_inner()
                .and_then(Ty::typeof_inner)
                .map_or(false, Ty::is_type_of_type)
                || decl_i.map_or(true, |d| !d.has_free_vars()))
        {
            // The argument was itself a Type{...}, so its type is
            // Type{Type{...}}. Bound the nesting through an intersection
            // with the declaration instead of caching ever-deeper towers.
            let target = if i < decl.nparams() {
                let mut declt = decl.slots()[i];
                if let Some(e) = declt.vararg_elem() {
                    declt = e;
                }
                let mut env = TypeEnv::new();
                let di = intersect(declt, builtins::type_type(), &mut env);
                debug_assert!(!di.is_bottom());
                if di.is_kind() {
                    builtins::type_type()
                } else {
                    di
                }
            } else {
                builtins::type_type()
            };
            newparams[i] = target;
            has_new_params = true;
            need_guard_entries = true;
        } else if elt.is_type_of_type()
            && very_general_type(decl_i)
            && decl_i.map_or(true, |d| !d.has_free_vars())
        {
            // Every type X has its own Type{X}; a general declared slot
            // would otherwise specialize once per type argument.
            newparams[i] = builtins::type_type();
            has_new_params = true;
            need_guard_entries = true;
        }
    }

    // Varargs methods only specialize up to max_args arguments; longer
    // calls share one truncated entry.
    if !isstaged && np > mt.max_args() && decl.as_tuple().has_trailing_vararg() {
        let nspec = mt.max_args() + 2;
        let mut limited: Vec<Ty> = newparams[..nspec - 1].to_vec();
        let lasttype = newparams[nspec - 2];
        // If every truncated argument fits under the last kept type,
        // specialize the tail on that; otherwise fall back to the declared
        // vararg element with static parameters substituted.
        let all_subtypes = newparams[nspec - 1..].iter().all(|&t| subtype(t, lasttype));
        if all_subtypes {
            let lt = if lasttype.typeof_inner().map_or(false, Ty::is_type_of_type) {
                builtins::type_type()
            } else {
                lasttype
            };
            limited.push(Ty::vararg(lt));
        } else {
            let lastdecl = decl.slots()[decl.nparams() - 1];
            limited.push(instantiate(lastdecl, &sparams));
        }
        newparams = limited;
        has_new_params = true;
        // The truncated signature is broader than the call; guards keep it
        // from swallowing calls owned by other definitions.
        need_guard_entries = true;
    }

    let widened = if has_new_params {
        Signature::new(newparams, Vec::new())
    } else {
        spec_sig.clone()
    };

    let mut cache_with_orig = false;
    let mut guardsigs: Vec<Signature> = Vec::new();
    if need_guard_entries {
        match table::ml_matches(defs, widened.as_tuple(), -1, false) {
            None => cache_with_orig = true,
            Some(matches) => {
                let mut guards = 0usize;
                for m in &matches {
                    // Guards cannot express a conflict that needs type
                    // variables to tell apart, and too many guards cost
                    // more than they save.
                    if m.env.has_unbound_vars() || guards > MAX_UNSPECIALIZED_CONFLICTS {
                        cache_with_orig = true;
                        break;
                    }
                    if !Arc::ptr_eq(&m.method, definition) {
                        guards += 1;
                    }
                }
                if !cache_with_orig && guards > 0 {
                    guardsigs = matches
                        .iter()
                        .filter(|m| !Arc::ptr_eq(&m.method, definition))
                        .map(|m| Signature::from_tuple(m.ti, Vec::new()))
                        .collect();
                }
            }
        }
    }

    // The specialization itself is always built at the widened signature;
    // only the cache key varies.
    let newmeth = specializations::get_or_create(definition, &widened, &sparams);

    let (primary, simplesig, guards) = if cache_with_orig {
        // Cache under the original concrete signature; the repaired
        // signature doubles as the rejection filter when it differs.
        let ss = if spec_sig.as_tuple() != tt.as_tuple() {
            Some(spec_sig.clone())
        } else {
            None
        };
        (tt.clone(), ss, Vec::new())
    } else {
        let ss = if make_simplesig {
            Some(simplesig_from(&widened))
        } else {
            None
        };
        (widened, ss, guardsigs)
    };
    cache.insert(primary, simplesig, guards, Payload::Spec(newmeth.clone()));
    newmeth
}

/// Post-insertion work for a freshly cached specialization: the inference
/// trigger and the traced-method callback.
///
/// Runs after the caller has released its table guards; the inference hook
/// may recursively dispatch, which must be free to retake them.
pub(crate) fn finish_new_specialization(definition: &Arc<Method>, spec: &Arc<Specialization>) {
    if !spec.is_inferred()
        && !spec.in_inference()
        && hooks::compile_mode() != hooks::CompileMode::Off
        && !definition.name.as_str().starts_with('@')
    {
        inference::type_infer(spec, false);
    }
    if definition.is_traced() {
        hooks::trace_specialized(spec);
    }
}

/// Declared slot types eligible for the uncalled-Function despecialization:
/// `Any`, `Function`, or a two-member union spanning functions and types.
fn despecializable_callable_decl(d: Ty) -> bool {
    if d.is_any() || d == builtins::function() {
        return true;
    }
    match d.union_alts() {
        Some(alts) => {
            alts.len() == 2
                && subtype(builtins::function(), d)
                && subtype(builtins::datatype(), d)
        }
        None => false,
    }
}

/// The coarser rejection signature for a despecialized entry: `Function`
/// slots become `Any`.
fn simplesig_from(sig: &Signature) -> Signature {
    Signature::new(
        sig.slots()
            .iter()
            .map(|&s| if s == builtins::function() { Ty::any() } else { s })
            .collect(),
        Vec::new(),
    )
}
