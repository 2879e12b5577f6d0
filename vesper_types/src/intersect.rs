//! Type intersection with variable matching.
//!
//! `intersect(a, b, env)` computes the meet of two types while binding the
//! free variables of `b` (the *signature* side) into `env`. This is the
//! primitive the dispatcher uses both to match a call's argument-type tuple
//! against a method signature (capturing static parameters) and to detect
//! overlap between definitions.
//!
//! A variable that cannot be determined by the match is bound to itself; the
//! caller can detect this through [`TypeEnv::has_unbound_vars`].

use crate::env::TypeEnv;
use crate::subtype::{subtype, types_equal};
use crate::ty::{Ty, TyKind};

/// The intersection of `a` and `b`, binding `b`'s free variables into `env`.
/// Returns `Bottom` when the types are disjoint.
pub fn intersect(a: Ty, b: Ty, env: &mut TypeEnv) -> Ty {
    // The ANY marker is extensionally Any.
    let a = if a.is_any_marker() { Ty::any() } else { a };
    let b = if b.is_any_marker() { Ty::any() } else { b };
    if a == b {
        return a;
    }
    if a.is_bottom() || b.is_bottom() {
        return Ty::bottom();
    }
    if a.is_any() {
        return b;
    }
    if b.is_any() {
        return a;
    }
    if let TyKind::Var(vb) = b.kind() {
        if let Some(bound) = env.get(b) {
            if bound == b {
                return a;
            }
            return intersect(a, bound, env);
        }
        let ti = intersect(a, vb.ub, env);
        if ti.is_bottom() || !subtype(vb.lb, ti) {
            return Ty::bottom();
        }
        env.bind(b, ti);
        return ti;
    }
    if let TyKind::Var(va) = a.kind() {
        return intersect(va.ub, b, env);
    }
    if let TyKind::Union(alts) = a.kind() {
        let pieces: Vec<Ty> = alts
            .iter()
            .map(|&alt| intersect(alt, b, env))
            .filter(|t| !t.is_bottom())
            .collect();
        return Ty::union(pieces);
    }
    if let TyKind::Union(alts) = b.kind() {
        let pieces: Vec<Ty> = alts
            .iter()
            .map(|&alt| intersect(a, alt, env))
            .filter(|t| !t.is_bottom())
            .collect();
        return Ty::union(pieces);
    }
    match (a.kind(), b.kind()) {
        (TyKind::TypeOf(x), TyKind::TypeOf(y)) => {
            let inner = intersect(*x, *y, env);
            if inner.is_bottom() {
                Ty::bottom()
            } else {
                Ty::type_of(inner)
            }
        }
        // Type{X} against a kind keeps the meta-type when the kind fits.
        (TyKind::TypeOf(x), TyKind::Data(_)) => {
            if subtype(x.kind_of(), b) {
                a
            } else {
                Ty::bottom()
            }
        }
        (TyKind::Data(_), TyKind::TypeOf(y)) => {
            if subtype(y.kind_of(), a) {
                // The match does not determine the inner type.
                if y.is_var() && env.get(*y).is_none() {
                    env.bind(*y, *y);
                }
                b
            } else {
                Ty::bottom()
            }
        }
        (TyKind::Data(_), TyKind::Data(_)) => {
            if nominal_fits(a, b, env) {
                a
            } else if nominal_fits(b, a, env) {
                b
            } else {
                Ty::bottom()
            }
        }
        (TyKind::Tuple(xs), TyKind::Tuple(ys)) => tuple_intersect(xs, ys, env),
        _ => Ty::bottom(),
    }
}

/// Whether `sub`'s nominal chain reaches `sup`'s head with matching
/// parameters, binding `sup`-side variables.
fn nominal_fits(sub: Ty, sup: Ty, env: &mut TypeEnv) -> bool {
    let (Some(_), Some(dsup)) = (sub.data_info(), sup.data_info()) else {
        return false;
    };
    let mut cur = sub;
    loop {
        let Some(dcur) = cur.data_info() else {
            return false;
        };
        if dcur.name == dsup.name {
            return dcur.params.len() == dsup.params.len()
                && dcur
                    .params
                    .iter()
                    .zip(dsup.params.iter())
                    .all(|(&p, &q)| match_param(p, q, env));
        }
        if dcur.super_ty.is_any() {
            return false;
        }
        cur = dcur.super_ty;
    }
}

/// Invariant parameter match with binding on the `q` side.
fn match_param(p: Ty, q: Ty, env: &mut TypeEnv) -> bool {
    if types_equal(p, q) {
        return true;
    }
    if let TyKind::Var(vq) = q.kind() {
        if let Some(bound) = env.get(q) {
            return bound == q || types_equal(p, bound);
        }
        if subtype(p, vq.ub) && subtype(vq.lb, p) {
            env.bind(q, p);
            return true;
        }
        return false;
    }
    if let TyKind::Var(vp) = p.kind() {
        return subtype(q, vp.ub) && subtype(vp.lb, q);
    }
    false
}

/// Elementwise tuple intersection with vararg expansion.
fn tuple_intersect(xs: &[Ty], ys: &[Ty], env: &mut TypeEnv) -> Ty {
    let xv = xs.last().and_then(|t| t.vararg_elem());
    let yv = ys.last().and_then(|t| t.vararg_elem());
    let nx = xs.len() - usize::from(xv.is_some());
    let ny = ys.len() - usize::from(yv.is_some());

    let fixed = nx.max(ny);
    // A fixed-arity side must be able to reach the other's fixed prefix.
    if (xv.is_none() && fixed > nx) || (yv.is_none() && fixed > ny) {
        return Ty::bottom();
    }
    // Both fixed: arities must agree.
    if xv.is_none() && yv.is_none() && nx != ny {
        return Ty::bottom();
    }

    let slot = |side: &[Ty], n: usize, va: Option<Ty>, i: usize| -> Ty {
        if i < n {
            side[i]
        } else {
            // Reachable only when the side has a vararg.
            va.unwrap_or_else(Ty::bottom)
        }
    };

    let mut elems = Vec::with_capacity(fixed + 1);
    for i in 0..fixed {
        let ti = intersect(slot(xs, nx, xv, i), slot(ys, ny, yv, i), env);
        if ti.is_bottom() {
            return Ty::bottom();
        }
        elems.push(ti);
    }
    if let (Some(xe), Some(ye)) = (xv, yv) {
        let te = intersect(xe, ye, env);
        if !te.is_bottom() {
            elems.push(Ty::vararg(te));
        }
    }
    Ty::tuple(elems)
}

/// Substitute environment bindings into `t`. Unbound variables survive.
pub fn instantiate(t: Ty, env: &TypeEnv) -> Ty {
    match t.kind() {
        TyKind::Var(_) => match env.get(t) {
            Some(bound) if bound != t => instantiate(bound, env),
            _ => t,
        },
        TyKind::Data(d) => {
            if d.params.is_empty() {
                t
            } else {
                let params = d.params.iter().map(|&p| instantiate(p, env)).collect();
                Ty::new_data(d.name.as_str(), d.super_ty, params, d.is_abstract)
            }
        }
        TyKind::Tuple(elems) => {
            Ty::tuple(elems.iter().map(|&e| instantiate(e, env)).collect())
        }
        TyKind::Union(alts) => Ty::union(alts.iter().map(|&a| instantiate(a, env)).collect()),
        TyKind::Vararg(elem) => Ty::vararg(instantiate(*elem, env)),
        TyKind::TypeOf(inner) => Ty::type_of(instantiate(*inner, env)),
        _ => t,
    }
}
