//! Subtyping and type equality.

use crate::ty::{Ty, TyKind};

/// Structural type equality. Types are hash-consed, so identity is equality.
#[inline]
pub fn types_equal(a: Ty, b: Ty) -> bool {
    a == b
}

/// Equality up to renaming of bound type variables.
///
/// Two signatures that differ only in the identity of their binders are the
/// same definition; the method table uses this to detect overwrites.
pub fn equal_generic(a: Ty, b: Ty) -> bool {
    fn go(a: Ty, b: Ty, pairs: &mut Vec<(Ty, Ty)>) -> bool {
        if a == b {
            return true;
        }
        match (a.kind(), b.kind()) {
            (TyKind::Var(va), TyKind::Var(vb)) => {
                for &(pa, pb) in pairs.iter() {
                    if pa == a || pb == b {
                        return pa == a && pb == b;
                    }
                }
                if !go(va.lb, vb.lb, pairs) || !go(va.ub, vb.ub, pairs) {
                    return false;
                }
                pairs.push((a, b));
                true
            }
            (TyKind::Data(da), TyKind::Data(db)) => {
                da.name == db.name
                    && da.is_abstract == db.is_abstract
                    && da.params.len() == db.params.len()
                    && da
                        .params
                        .iter()
                        .zip(db.params.iter())
                        .all(|(&p, &q)| go(p, q, pairs))
            }
            (TyKind::Tuple(xs), TyKind::Tuple(ys)) => {
                xs.len() == ys.len() && xs.iter().zip(ys.iter()).all(|(&x, &y)| go(x, y, pairs))
            }
            (TyKind::Union(xs), TyKind::Union(ys)) => {
                xs.len() == ys.len() && xs.iter().zip(ys.iter()).all(|(&x, &y)| go(x, y, pairs))
            }
            (TyKind::Vararg(x), TyKind::Vararg(y)) => go(*x, *y, pairs),
            (TyKind::TypeOf(x), TyKind::TypeOf(y)) => go(*x, *y, pairs),
            _ => false,
        }
    }
    go(a, b, &mut Vec::new())
}

/// Whether a value of type `a` is always acceptable where `b` is expected.
pub fn subtype(a: Ty, b: Ty) -> bool {
    if a == b {
        return true;
    }
    if a.is_bottom() {
        return true;
    }
    if b.is_any() || b.is_any_marker() {
        return true;
    }
    if a.is_any() || a.is_any_marker() {
        return false;
    }
    // Unions: forall on the left, exists on the right.
    if let TyKind::Union(alts) = a.kind() {
        return alts.iter().all(|&alt| subtype(alt, b));
    }
    if let TyKind::Union(alts) = b.kind() {
        return alts.iter().any(|&alt| subtype(a, alt));
    }
    match (a.kind(), b.kind()) {
        // A variable stands for anything within its bounds.
        (TyKind::Var(va), _) => subtype(va.ub, b),
        (_, TyKind::Var(vb)) => subtype(a, vb.ub) && subtype(vb.lb, a),
        (TyKind::Vararg(x), TyKind::Vararg(y)) => subtype(*x, *y),
        (TyKind::TypeOf(x), TyKind::TypeOf(y)) => match y.kind() {
            // Type{X} is invariant, except against a bounded binder.
            TyKind::Var(vy) => subtype(*x, vy.ub) && subtype(vy.lb, *x),
            _ => false,
        },
        // Type{X} is a value of the kind of X: Type{Int} <: DataType. An
        // undetermined inner type could be of any kind, so Type{T} is not
        // below any one of them.
        (TyKind::TypeOf(x), TyKind::Data(_)) => !x.is_var() && subtype(x.kind_of(), b),
        (TyKind::Data(da), TyKind::Data(db)) => {
            // Walk the supertype chain looking for b's nominal head.
            if da.name == db.name {
                return da.params.len() == db.params.len()
                    && da
                        .params
                        .iter()
                        .zip(db.params.iter())
                        .all(|(&p, &q)| param_matches(p, q));
            }
            let mut cur = da.super_ty;
            loop {
                if cur == b {
                    return true;
                }
                match cur.kind() {
                    TyKind::Data(dc) => {
                        if dc.name == db.name {
                            return dc.params.len() == db.params.len()
                                && dc
                                    .params
                                    .iter()
                                    .zip(db.params.iter())
                                    .all(|(&p, &q)| param_matches(p, q));
                        }
                        cur = dc.super_ty;
                    }
                    _ => return false,
                }
            }
        }
        (TyKind::Tuple(xs), TyKind::Tuple(ys)) => tuple_subtype(xs, ys),
        // Tuples are only below Any (handled) and other tuples.
        _ => false,
    }
}

/// Invariant parameter match: equal, or within the bounds of a binder.
fn param_matches(p: Ty, q: Ty) -> bool {
    if types_equal(p, q) {
        return true;
    }
    if let TyKind::Var(vq) = q.kind() {
        return subtype(p, vq.ub) && subtype(vq.lb, p);
    }
    false
}

/// Covariant tuple subtyping with trailing-vararg absorption.
fn tuple_subtype(xs: &[Ty], ys: &[Ty]) -> bool {
    match (xs.split_first(), ys.split_first()) {
        (None, None) => true,
        // () <: (Vararg{T},): a vararg admits zero elements.
        (None, Some((y, rest))) => y.is_vararg() && rest.is_empty(),
        (Some(_), None) => false,
        (Some((&x, xrest)), Some((&y, yrest))) => match (x.vararg_elem(), y.vararg_elem()) {
            (Some(xe), Some(ye)) => xrest.is_empty() && yrest.is_empty() && subtype(xe, ye),
            // An unbounded count cannot fit a fixed arity.
            (Some(_), None) => false,
            // Fixed slot absorbed by the final vararg.
            (None, Some(ye)) => yrest.is_empty() && subtype(x, ye) && tuple_subtype(xrest, ys),
            (None, None) => subtype(x, y) && tuple_subtype(xrest, yrest),
        },
    }
}
