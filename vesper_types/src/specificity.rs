//! Definition ordering: the "more specific" relation over signatures.
//!
//! The method table keeps definitions sorted so that a more specific
//! signature is always tried first. A strict subtype is more specific;
//! otherwise tuples are compared slot by slot, with `Type{X}` beating the
//! bare kind and fixed arity beating a vararg tail. When neither direction
//! holds the pair is a candidate ambiguity.

use crate::subtype::{subtype, types_equal};
use crate::ty::Ty;

/// Whether signature `a` should be tried before signature `b`.
pub fn more_specific(a: Ty, b: Ty) -> bool {
    if types_equal(a, b) {
        return false;
    }
    if subtype(a, b) {
        // Extensionally equal pairs like (T, T) vs (Any, Any) subtype both
        // ways; the variable-constrained side wins the ordering.
        if subtype(b, a) {
            return a.has_free_vars() && !b.has_free_vars();
        }
        return true;
    }
    if subtype(b, a) {
        return false;
    }
    let (Some(xs), Some(ys)) = (a.tuple_elems(), b.tuple_elems()) else {
        return false;
    };
    tuple_more_specific(a, b, xs, ys)
}

fn tuple_more_specific(a: Ty, b: Ty, xs: &[Ty], ys: &[Ty]) -> bool {
    let xv = xs.last().map(|t| t.is_vararg()).unwrap_or(false);
    let yv = ys.last().map(|t| t.is_vararg()).unwrap_or(false);
    let nx = xs.len() - usize::from(xv);
    let ny = ys.len() - usize::from(yv);

    // Disjoint fixed arities never overlap; neither is more specific.
    if !xv && !yv && nx != ny {
        return false;
    }

    let nslots = nx.max(ny).max(1);
    let mut strict = false;
    for i in 0..nslots {
        let (Some(sx), Some(sy)) = (a.nth_slot_ty(i), b.nth_slot_ty(i)) else {
            return false;
        };
        if !slot_covers(sx, sy) {
            return false;
        }
        if slot_strictly_more_specific(sx, sy) {
            strict = true;
        }
    }
    // Fixed arity is more specific than an open vararg tail.
    if !xv && yv {
        strict = true;
    }
    strict
}

/// Slot-level "no less specific" check.
fn slot_covers(x: Ty, y: Ty) -> bool {
    types_equal(x, y) || subtype(x, y) || (x.is_type_of_type() && y.is_kind())
}

/// Slot-level strictly-more-specific check.
fn slot_strictly_more_specific(x: Ty, y: Ty) -> bool {
    (subtype(x, y) && !subtype(y, x)) || (x.is_type_of_type() && y.is_kind())
}
