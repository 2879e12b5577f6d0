//! Definition-time ambiguity and shadowing analysis.
//!
//! Runs immediately after a new method lands in the definition list. Two
//! definitions are ambiguous when their signatures overlap, neither is more
//! specific on the overlap, and no third definition owns exactly that
//! intersection. The relation is recorded symmetrically on both methods and
//! never removed; a later covering definition resolves the *calls* without
//! clearing the record.
//!
//! Shadowing is the other outcome of the same scan: a prior, less specific
//! definition whose domain the newcomer overlaps must have its cached
//! specializations dropped from the dispatch cache.

use crate::method::Method;
use crate::signature::Signature;
use crate::typemap::{LookupMode, TypeMap, TypeMapEntry};
use std::sync::Arc;
use vesper_types::{intersect, more_specific, types_equal, Ty, TypeEnv};

/// Whether ambiguity diagnostics print at definition time. The record is
/// kept either way; the diagnostic is purely observational.
const EAGER_AMBIGUITY_PRINTING: bool = false;

/// Scan `defs` for definitions ambiguous with or shadowed by `newentry`.
/// Records pairwise ambiguities on the methods and returns the set of
/// shadowed methods whose cache entries must be invalidated.
pub(crate) fn check_ambiguous_matches(
    defs: &TypeMap,
    newentry: &Arc<TypeMapEntry>,
    newmethod: &Arc<Method>,
) -> Vec<Arc<Method>> {
    let newsig = newentry.sig.as_tuple();
    let mut shadowed: Vec<Arc<Method>> = Vec::new();
    defs.intersection_visit(newsig, Some(newentry), &mut |oldentry, isect, _env, after| {
        let Some(oldmethod) = oldentry.payload.as_method() else {
            return true;
        };
        let oldsig = oldentry.sig.as_tuple();
        // Entries are ordered most-specific-first, so the entry reached
        // before the pivot is the earlier (more specific) side.
        let (earlier, later) = if after {
            (newsig, oldsig)
        } else {
            (oldsig, newsig)
        };
        // If the intersection *is* the later signature, the later definition
        // is contained in the earlier one; the ordering already resolves it.
        if types_equal(isect, later) {
            return true;
        }
        if !more_specific(earlier, later) {
            // Neither direction resolves the overlap. A third definition
            // owning exactly the intersection covers it.
            let isect_sig = Signature::from_tuple(isect, Vec::new());
            let mut env = TypeEnv::new();
            if defs
                .assoc_by_type(&isect_sig, &mut env, LookupMode::Exact)
                .is_some()
            {
                return true;
            }
            newmethod.push_ambig(oldmethod);
            oldmethod.push_ambig(newmethod);
            if EAGER_AMBIGUITY_PRINTING {
                eprintln!(
                    "WARNING: new definition {}{} is ambiguous with {}{}; define {} to fix",
                    newmethod.name, newentry.sig, oldmethod.name, oldentry.sig, isect,
                );
            }
        } else if after {
            // The newcomer is more specific than this later entry: part of
            // the old definition's domain is now shadowed.
            if !shadowed.iter().any(|m| Arc::ptr_eq(m, oldmethod)) {
                shadowed.push(oldmethod.clone());
            }
        }
        true
    });
    shadowed
}

/// Whether `method` has a recorded ambiguity reachable under the concrete
/// query type: some partner's signature still intersects it.
pub(crate) fn has_call_ambiguities(query: Ty, method: &Method) -> bool {
    method.ambiguities().iter().any(|partner| {
        let mut env = TypeEnv::new();
        !intersect(partner.sig.as_tuple(), query, &mut env).is_bottom()
    })
}

/// Drop every cached specialization whose defining method is shadowed and
/// whose signature overlaps the new definition. Walks both level tables and
/// the linear tail of the cache.
pub(crate) fn invalidate_conflicting(
    cache: &mut TypeMap,
    newsig: Ty,
    shadowed: &[Arc<Method>],
) -> usize {
    cache.unlink_where(&mut |entry| {
        let Some(def) = entry.payload.def() else {
            return false;
        };
        if !shadowed.iter().any(|m| Arc::ptr_eq(m, &def)) {
            return false;
        }
        let mut env = TypeEnv::new();
        !intersect(newsig, entry.sig.as_tuple(), &mut env).is_bottom()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::BodyFn;
    use crate::typemap::Payload;
    use vesper_types::builtins as b;
    use vesper_types::Value;

    fn body() -> BodyFn {
        Arc::new(|_, _| Ok(Value::Int(0)))
    }

    fn define(defs: &mut TypeMap, slots: Vec<Ty>) -> (Arc<TypeMapEntry>, Arc<Method>) {
        let sig = Signature::new(slots, vec![]);
        let m = Method::builder("g", sig.clone(), body()).build();
        let (entry, _) = defs.insert(sig, None, vec![], Payload::Method(m.clone()));
        (entry, m)
    }

    #[test]
    fn test_crossed_pair_is_ambiguous() {
        let mut defs = TypeMap::new(0);
        let (_, m1) = define(&mut defs, vec![b::int(), Ty::any()]);
        let (e2, m2) = define(&mut defs, vec![Ty::any(), b::int()]);
        let shadowed = check_ambiguous_matches(&defs, &e2, &m2);
        assert!(shadowed.is_empty());
        assert_eq!(m1.ambiguities().len(), 1);
        assert_eq!(m2.ambiguities().len(), 1);
        assert!(Arc::ptr_eq(&m1.ambiguities()[0], &m2));
    }

    #[test]
    fn test_covering_definition_prevents_ambiguity() {
        let mut defs = TypeMap::new(0);
        // The exact intersection (Int, Int) is defined up front.
        define(&mut defs, vec![b::int(), b::int()]);
        let (_, m1) = define(&mut defs, vec![b::int(), Ty::any()]);
        let (e2, m2) = define(&mut defs, vec![Ty::any(), b::int()]);
        let shadowed = check_ambiguous_matches(&defs, &e2, &m2);
        assert!(shadowed.is_empty());
        assert!(m1.ambiguities().is_empty());
        assert!(m2.ambiguities().is_empty());
    }

    #[test]
    fn test_more_specific_newcomer_shadows() {
        let mut defs = TypeMap::new(0);
        let (_, old) = define(&mut defs, vec![b::real(), b::real()]);
        let (e2, m2) = define(&mut defs, vec![b::int(), b::int()]);
        let shadowed = check_ambiguous_matches(&defs, &e2, &m2);
        assert_eq!(shadowed.len(), 1);
        assert!(Arc::ptr_eq(&shadowed[0], &old));
        assert!(m2.ambiguities().is_empty());
    }

    #[test]
    fn test_disjoint_slots_not_ambiguous() {
        let mut defs = TypeMap::new(0);
        // Overlap in one slot, disjoint in another: no confusion possible.
        let (_, m1) = define(&mut defs, vec![b::real(), b::int(), b::str_ty()]);
        let (e2, m2) = define(&mut defs, vec![b::int(), b::real(), b::int()]);
        let shadowed = check_ambiguous_matches(&defs, &e2, &m2);
        assert!(shadowed.is_empty());
        assert!(m1.ambiguities().is_empty());
        assert!(m2.ambiguities().is_empty());
    }

    #[test]
    fn test_has_call_ambiguities_scoped_to_query() {
        let mut defs = TypeMap::new(0);
        let (_, m1) = define(&mut defs, vec![b::int(), Ty::any()]);
        let (e2, m2) = define(&mut defs, vec![Ty::any(), b::int()]);
        check_ambiguous_matches(&defs, &e2, &m2);
        assert!(has_call_ambiguities(
            Ty::tuple(vec![b::int(), b::int()]),
            &m1
        ));
        // Outside the overlap the recorded ambiguity is unreachable.
        assert!(!has_call_ambiguities(
            Ty::tuple(vec![b::int(), b::str_ty()]),
            &m2
        ));
    }

    #[test]
    fn test_invalidate_conflicting() {
        let mut defs = TypeMap::new(0);
        let (_, old) = define(&mut defs, vec![b::real()]);
        let mut cache = TypeMap::new(0);
        let spec_sig = Signature::new(vec![b::int()], vec![]);
        let spec = crate::method::Specialization::new(&old, spec_sig.clone(), TypeEnv::new());
        cache.insert(spec_sig, None, vec![], Payload::Spec(spec));
        let other_sig = Signature::new(vec![b::str_ty()], vec![]);
        let other = crate::method::Specialization::new(&old, other_sig.clone(), TypeEnv::new());
        cache.insert(other_sig, None, vec![], Payload::Spec(other));

        let removed = invalidate_conflicting(
            &mut cache,
            Ty::tuple(vec![b::int()]),
            std::slice::from_ref(&old),
        );
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
    }
}
