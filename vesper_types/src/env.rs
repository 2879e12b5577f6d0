//! Type-variable environments.
//!
//! An environment records the bindings discovered while matching a signature
//! against argument types: an ordered, flat sequence of `(var, binding)`
//! pairs. Environments are append-only during matching and immutable once a
//! specialization publishes them.

use crate::ty::Ty;
use smallvec::SmallVec;

/// Ordered mapping from type variables to the types they were bound to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeEnv {
    pairs: SmallVec<[(Ty, Ty); 4]>,
}

impl TypeEnv {
    pub fn new() -> Self {
        Self {
            pairs: SmallVec::new(),
        }
    }

    /// Look up the binding for a variable.
    pub fn get(&self, var: Ty) -> Option<Ty> {
        self.pairs
            .iter()
            .find(|(v, _)| *v == var)
            .map(|(_, binding)| *binding)
    }

    /// Record a binding. The first binding for a variable wins; matching code
    /// must check [`get`](Self::get) before binding again.
    pub fn bind(&mut self, var: Ty, binding: Ty) {
        debug_assert!(var.is_var());
        debug_assert!(self.get(var).is_none());
        self.pairs.push((var, binding));
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Iterate `(var, binding)` pairs in binding order.
    pub fn iter(&self) -> impl Iterator<Item = (Ty, Ty)> + '_ {
        self.pairs.iter().copied()
    }

    /// Whether any binding is itself an unresolved type variable. Such an
    /// environment means the match did not fully determine the signature's
    /// static parameters.
    pub fn has_unbound_vars(&self) -> bool {
        self.pairs.iter().any(|(_, binding)| binding.is_var())
    }
}

impl FromIterator<(Ty, Ty)> for TypeEnv {
    fn from_iter<I: IntoIterator<Item = (Ty, Ty)>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
        }
    }
}
