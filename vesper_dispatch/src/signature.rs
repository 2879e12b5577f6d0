//! Method and call signatures.
//!
//! A signature is an ordered tuple of slot types, possibly ending in a
//! vararg, plus the list of type variables bound by the definition. The slot
//! tuple itself is an interned [`Ty`], so signature equality and hashing are
//! handle operations. Signatures are immutable once published.

use smallvec::SmallVec;
use std::fmt;
use vesper_types::{subtype, Ty, Value};

/// An immutable tuple-of-types signature.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    tuple: Ty,
    tvars: SmallVec<[Ty; 2]>,
}

impl Signature {
    /// Build a signature from slot types and bound variables.
    pub fn new(slots: Vec<Ty>, tvars: Vec<Ty>) -> Self {
        debug_assert!(tvars.iter().all(|t| t.is_var()));
        Self {
            tuple: Ty::tuple(slots),
            tvars: tvars.into(),
        }
    }

    /// Wrap an existing tuple type.
    pub fn from_tuple(tuple: Ty, tvars: Vec<Ty>) -> Self {
        debug_assert!(tuple.is_tuple());
        Self {
            tuple,
            tvars: tvars.into(),
        }
    }

    /// The interned tuple of slot types.
    #[inline]
    pub fn as_tuple(&self) -> Ty {
        self.tuple
    }

    #[inline]
    pub fn slots(&self) -> &'static [Ty] {
        self.tuple.tuple_elems().unwrap_or(&[])
    }

    #[inline]
    pub fn nparams(&self) -> usize {
        self.slots().len()
    }

    pub fn tvars(&self) -> &[Ty] {
        &self.tvars
    }

    /// Slot type at `i`, looking through a trailing vararg.
    pub fn nth_slot(&self, i: usize) -> Option<Ty> {
        self.tuple.nth_slot_ty(i)
    }

    pub fn has_trailing_vararg(&self) -> bool {
        self.tuple.has_trailing_vararg()
    }

    /// Arity not counting a trailing vararg slot.
    pub fn non_vararg_arity(&self) -> usize {
        self.nparams() - usize::from(self.has_trailing_vararg())
    }

    /// A leaf signature: every slot is a concrete run-time type: no type
    /// variable, no union, no vararg, no `Type{}`. Leaf signatures admit the
    /// slot-by-slot handle comparison of the dispatch fast path.
    pub fn is_leaf(&self) -> bool {
        self.slots().iter().all(|s| {
            !s.is_vararg() && !s.is_type_of_type() && !s.is_union() && s.is_concrete()
        })
    }

    /// Whether the argument count `nargs` is admissible for this signature.
    #[inline]
    pub fn arity_matches(&self, nargs: usize) -> bool {
        if self.has_trailing_vararg() {
            nargs >= self.nparams() - 1
        } else {
            nargs == self.nparams()
        }
    }

    /// Subtype-aware match of argument values against this signature.
    /// Type-valued arguments dispatch as `Type{X}`.
    pub fn matches_args(&self, args: &[Value]) -> bool {
        if !self.arity_matches(args.len()) {
            return false;
        }
        args.iter().enumerate().all(|(i, a)| match self.nth_slot(i) {
            Some(slot) => subtype(a.dispatch_ty(), slot),
            None => false,
        })
    }

    /// Exact match of argument run-time types against a leaf signature:
    /// handle equality per slot. Callers must have checked `is_leaf`.
    #[inline]
    pub fn matches_arg_types_exact(&self, args: &[Value]) -> bool {
        let slots = self.slots();
        args.len() == slots.len()
            && args
                .iter()
                .zip(slots.iter())
                .all(|(a, &slot)| a.type_of() == slot)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tuple)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tuple)
    }
}

/// The argument-type tuple of a call: `type_of` of each argument, with type
/// values wrapped as `Type{X}` so meta-level definitions can match.
pub fn arg_type_tuple(args: &[Value]) -> Signature {
    Signature::new(args.iter().map(Value::dispatch_ty).collect(), Vec::new())
}

/// Prepend the function's own type to a signature's slots. Used by the
/// invoke and precompile surfaces, whose callers write signatures without
/// the function slot.
pub fn with_leading_function_type(fty: Ty, slots: &[Ty], tvars: Vec<Ty>) -> Signature {
    let mut all = Vec::with_capacity(slots.len() + 1);
    all.push(fty);
    all.extend_from_slice(slots);
    Signature::new(all, tvars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_types::builtins as b;

    #[test]
    fn test_leaf_classification() {
        let leaf = Signature::new(vec![b::int(), b::str_ty()], vec![]);
        assert!(leaf.is_leaf());
        let va = Signature::new(vec![b::int(), Ty::vararg(b::int())], vec![]);
        assert!(!va.is_leaf());
        let abs = Signature::new(vec![b::real()], vec![]);
        assert!(!abs.is_leaf());
        let meta = Signature::new(vec![Ty::type_of(b::int())], vec![]);
        assert!(!meta.is_leaf());
    }

    #[test]
    fn test_arity() {
        let sig = Signature::new(vec![b::int(), Ty::vararg(Ty::any())], vec![]);
        assert!(sig.arity_matches(1));
        assert!(sig.arity_matches(5));
        assert!(!sig.arity_matches(0));
        assert_eq!(sig.non_vararg_arity(), 1);
    }

    #[test]
    fn test_matches_args() {
        let sig = Signature::new(vec![b::real(), b::real()], vec![]);
        assert!(sig.matches_args(&[Value::Int(1), Value::Float(2.0)]));
        assert!(!sig.matches_args(&[Value::Int(1), Value::str("x")]));
        assert!(!sig.matches_args(&[Value::Int(1)]));
    }

    #[test]
    fn test_exact_match_is_handle_equality() {
        let sig = Signature::new(vec![b::int(), b::int()], vec![]);
        assert!(sig.matches_arg_types_exact(&[Value::Int(1), Value::Int(2)]));
        assert!(!sig.matches_arg_types_exact(&[Value::Int(1), Value::Float(2.0)]));
    }

    #[test]
    fn test_arg_type_tuple_wraps_types() {
        let tt = arg_type_tuple(&[Value::Int(3), Value::Type(b::int())]);
        assert_eq!(tt.slots()[0], b::int());
        assert_eq!(tt.slots()[1], Ty::type_of(b::int()));
    }
}
