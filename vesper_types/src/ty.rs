//! Hash-consed type values.
//!
//! Every type in the runtime is interned into a process-wide table; a [`Ty`]
//! is a compact handle into that table. Structurally identical types intern
//! to the same handle, so `Ty` equality is type identity. This is the
//! property the dispatcher's fast path exploits: matching a concrete
//! argument type against a cached signature slot is a single handle compare.
//!
//! # Kinds of types
//!
//! - `Any` / `Bottom`: top and bottom of the lattice
//! - `AnyMarker`: the `::ANY` slot annotation; extensionally equal to `Any`
//!   but kept identity-distinct so the specializer can see it
//! - `Data`: nominal types with a single supertype and invariant parameters
//! - `Tuple`: covariant argument tuples, final slot may be a `Vararg`
//! - `Union`: flattened, deduplicated alternatives
//! - `TypeOf`: the meta-type `Type{X}`
//! - `Var`: a bounded type variable introduced by a method signature

use crate::intern::Symbol;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

/// Interned type handle. Equality is type identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ty(u32);

/// Nominal type payload.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct DataInfo {
    pub name: Symbol,
    /// Immediate supertype; `Any` for roots.
    pub super_ty: Ty,
    /// Invariant type parameters (may contain variables).
    pub params: Vec<Ty>,
    /// Abstract types have no direct instances.
    pub is_abstract: bool,
    /// Whether this nominal type is a kind (a type of types).
    pub is_kind: bool,
}

/// Bounded type variable payload.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct VarInfo {
    /// Globally unique binder identity.
    pub id: u32,
    pub name: Symbol,
    pub lb: Ty,
    pub ub: Ty,
}

/// The structural node behind a `Ty` handle.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TyKind {
    Any,
    AnyMarker,
    Bottom,
    Data(DataInfo),
    Tuple(Vec<Ty>),
    Vararg(Ty),
    Union(Vec<Ty>),
    TypeOf(Ty),
    Var(VarInfo),
}

// =============================================================================
// Interner
// =============================================================================

struct TyInterner {
    inner: RwLock<TyInternerInner>,
}

struct TyInternerInner {
    nodes: Vec<&'static TyKind>,
    index: FxHashMap<&'static TyKind, u32>,
}

static INTERNER: OnceLock<TyInterner> = OnceLock::new();
static NEXT_VAR_ID: AtomicU32 = AtomicU32::new(0);

fn interner() -> &'static TyInterner {
    INTERNER.get_or_init(|| TyInterner {
        inner: RwLock::new(TyInternerInner {
            nodes: Vec::new(),
            index: FxHashMap::default(),
        }),
    })
}

fn intern(kind: TyKind) -> Ty {
    let it = interner();
    {
        let inner = it.inner.read();
        if let Some(&id) = inner.index.get(&kind) {
            return Ty(id);
        }
    }
    let mut inner = it.inner.write();
    if let Some(&id) = inner.index.get(&kind) {
        return Ty(id);
    }
    let leaked: &'static TyKind = Box::leak(Box::new(kind));
    let id = inner.nodes.len() as u32;
    inner.nodes.push(leaked);
    inner.index.insert(leaked, id);
    Ty(id)
}

// =============================================================================
// Constructors
// =============================================================================

impl Ty {
    pub fn any() -> Ty {
        intern(TyKind::Any)
    }

    /// The `::ANY` slot marker. Behaves as `Any` in the lattice.
    pub fn any_marker() -> Ty {
        intern(TyKind::AnyMarker)
    }

    pub fn bottom() -> Ty {
        intern(TyKind::Bottom)
    }

    /// A new abstract nominal type.
    pub fn new_abstract(name: &str, super_ty: Ty) -> Ty {
        intern(TyKind::Data(DataInfo {
            name: Symbol::intern(name),
            super_ty,
            params: Vec::new(),
            is_abstract: true,
            is_kind: false,
        }))
    }

    /// A new concrete nominal type.
    pub fn new_concrete(name: &str, super_ty: Ty) -> Ty {
        intern(TyKind::Data(DataInfo {
            name: Symbol::intern(name),
            super_ty,
            params: Vec::new(),
            is_abstract: false,
            is_kind: false,
        }))
    }

    /// A nominal type with invariant parameters.
    pub fn new_data(name: &str, super_ty: Ty, params: Vec<Ty>, is_abstract: bool) -> Ty {
        intern(TyKind::Data(DataInfo {
            name: Symbol::intern(name),
            super_ty,
            params,
            is_abstract,
            is_kind: false,
        }))
    }

    fn new_kind(name: &str, super_ty: Ty) -> Ty {
        intern(TyKind::Data(DataInfo {
            name: Symbol::intern(name),
            super_ty,
            params: Vec::new(),
            is_abstract: false,
            is_kind: true,
        }))
    }

    pub fn tuple(elems: Vec<Ty>) -> Ty {
        intern(TyKind::Tuple(elems))
    }

    pub fn vararg(elem: Ty) -> Ty {
        intern(TyKind::Vararg(elem))
    }

    /// Normalized union: flattens nested unions, deduplicates, and collapses
    /// empty/singleton alternative lists.
    pub fn union(alts: Vec<Ty>) -> Ty {
        let mut flat = Vec::new();
        for alt in alts {
            match alt.kind() {
                TyKind::Union(inner) => {
                    for &t in inner {
                        if !t.is_bottom() && !flat.contains(&t) {
                            flat.push(t);
                        }
                    }
                }
                TyKind::Bottom => {}
                _ => {
                    if !flat.contains(&alt) {
                        flat.push(alt);
                    }
                }
            }
        }
        match flat.len() {
            0 => Ty::bottom(),
            1 => flat[0],
            _ => {
                flat.sort();
                intern(TyKind::Union(flat))
            }
        }
    }

    /// The meta-type `Type{inner}`.
    pub fn type_of(inner: Ty) -> Ty {
        intern(TyKind::TypeOf(inner))
    }

    /// A fresh bounded type variable. Each call creates a distinct binder.
    pub fn fresh_var(name: &str, lb: Ty, ub: Ty) -> Ty {
        let id = NEXT_VAR_ID.fetch_add(1, Ordering::Relaxed);
        intern(TyKind::Var(VarInfo {
            id,
            name: Symbol::intern(name),
            lb,
            ub,
        }))
    }
}

// =============================================================================
// Accessors & predicates
// =============================================================================

impl Ty {
    /// The structural node behind this handle.
    #[inline]
    pub fn kind(self) -> &'static TyKind {
        interner().inner.read().nodes[self.0 as usize]
    }

    #[inline]
    pub fn is_any(self) -> bool {
        matches!(self.kind(), TyKind::Any)
    }

    #[inline]
    pub fn is_any_marker(self) -> bool {
        matches!(self.kind(), TyKind::AnyMarker)
    }

    #[inline]
    pub fn is_bottom(self) -> bool {
        matches!(self.kind(), TyKind::Bottom)
    }

    #[inline]
    pub fn is_tuple(self) -> bool {
        matches!(self.kind(), TyKind::Tuple(_))
    }

    #[inline]
    pub fn is_union(self) -> bool {
        matches!(self.kind(), TyKind::Union(_))
    }

    #[inline]
    pub fn is_vararg(self) -> bool {
        matches!(self.kind(), TyKind::Vararg(_))
    }

    #[inline]
    pub fn is_type_of_type(self) -> bool {
        matches!(self.kind(), TyKind::TypeOf(_))
    }

    #[inline]
    pub fn is_var(self) -> bool {
        matches!(self.kind(), TyKind::Var(_))
    }

    /// Whether this is a kind: the type of a type (`DataType`, `UnionType`).
    #[inline]
    pub fn is_kind(self) -> bool {
        matches!(self.kind(), TyKind::Data(d) if d.is_kind)
    }

    pub fn data_info(self) -> Option<&'static DataInfo> {
        match self.kind() {
            TyKind::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn var_info(self) -> Option<&'static VarInfo> {
        match self.kind() {
            TyKind::Var(v) => Some(v),
            _ => None,
        }
    }

    pub fn tuple_elems(self) -> Option<&'static [Ty]> {
        match self.kind() {
            TyKind::Tuple(elems) => Some(elems),
            _ => None,
        }
    }

    pub fn union_alts(self) -> Option<&'static [Ty]> {
        match self.kind() {
            TyKind::Union(alts) => Some(alts),
            _ => None,
        }
    }

    pub fn vararg_elem(self) -> Option<Ty> {
        match self.kind() {
            TyKind::Vararg(elem) => Some(*elem),
            _ => None,
        }
    }

    pub fn typeof_inner(self) -> Option<Ty> {
        match self.kind() {
            TyKind::TypeOf(inner) => Some(*inner),
            _ => None,
        }
    }

    /// Whether values of this type exist and the type is fully determined:
    /// no abstractness, no free variables, no union, no vararg.
    pub fn is_concrete(self) -> bool {
        match self.kind() {
            TyKind::Data(d) => !d.is_abstract && d.params.iter().all(|p| p.is_concrete()),
            TyKind::Tuple(elems) => elems.iter().all(|e| !e.is_vararg() && e.is_concrete()),
            TyKind::TypeOf(inner) => !inner.has_free_vars(),
            _ => false,
        }
    }

    /// Whether the type carries type parameters (its own or free variables).
    pub fn is_parametric(self) -> bool {
        match self.kind() {
            TyKind::Data(d) => !d.params.is_empty(),
            TyKind::Tuple(_) | TyKind::Union(_) | TyKind::TypeOf(_) => self.has_free_vars(),
            TyKind::Var(_) => true,
            _ => false,
        }
    }

    /// Whether any type variable occurs in this type.
    pub fn has_free_vars(self) -> bool {
        match self.kind() {
            TyKind::Var(_) => true,
            TyKind::Data(d) => d.params.iter().any(|p| p.has_free_vars()),
            TyKind::Tuple(elems) => elems.iter().any(|e| e.has_free_vars()),
            TyKind::Union(alts) => alts.iter().any(|a| a.has_free_vars()),
            TyKind::Vararg(elem) => elem.has_free_vars(),
            TyKind::TypeOf(inner) => inner.has_free_vars(),
            _ => false,
        }
    }

    /// The kind of this type when viewed as a value: `DataType` for nominal
    /// types (and everything else), `UnionType` for unions.
    pub fn kind_of(self) -> Ty {
        match self.kind() {
            TyKind::Union(_) => builtins::uniontype(),
            _ => builtins::datatype(),
        }
    }

    /// Slot type at position `i` of a signature tuple, looking through a
    /// trailing vararg: positions at or past a final `Vararg{T}` yield `T`.
    pub fn nth_slot_ty(self, i: usize) -> Option<Ty> {
        let elems = self.tuple_elems()?;
        let len = elems.len();
        if len == 0 {
            return None;
        }
        if i < len - 1 {
            return Some(elems[i]);
        }
        if let Some(elem) = elems[len - 1].vararg_elem() {
            return Some(elem);
        }
        if i == len - 1 {
            return Some(elems[i]);
        }
        None
    }

    /// Whether a signature tuple ends with an unbounded vararg slot.
    pub fn has_trailing_vararg(self) -> bool {
        match self.tuple_elems() {
            Some([.., last]) => last.is_vararg(),
            _ => false,
        }
    }
}

// =============================================================================
// Builtin lattice
// =============================================================================

/// Well-known types shared by the runtime and its tests.
///
/// The numeric fragment (`Int <: Real <: Number <: Any`) is the model lattice
/// the dispatcher's scenario tests are written against; `Function`,
/// `DataType`, and the `Type{T}` family are load-bearing for the engine
/// itself.
pub mod builtins {
    use super::*;

    struct Builtins {
        function: Ty,
        datatype: Ty,
        uniontype: Ty,
        number: Ty,
        real: Ty,
        int: Ty,
        float: Ty,
        bool_: Ty,
        str_: Ty,
        tuple_any: Ty,
        type_type: Ty,
        anytuple_type: Ty,
    }

    static BUILTINS: OnceLock<Builtins> = OnceLock::new();

    fn all() -> &'static Builtins {
        BUILTINS.get_or_init(|| {
            let any = Ty::any();
            let function = Ty::new_abstract("Function", any);
            let datatype = Ty::new_kind("DataType", any);
            let uniontype = Ty::new_kind("UnionType", any);
            let number = Ty::new_abstract("Number", any);
            let real = Ty::new_abstract("Real", number);
            let int = Ty::new_concrete("Int", real);
            let float = Ty::new_concrete("Float", real);
            let bool_ = Ty::new_concrete("Bool", any);
            let str_ = Ty::new_concrete("Str", any);
            let tuple_any = Ty::tuple(vec![Ty::vararg(any)]);
            let type_type = Ty::type_of(Ty::fresh_var("T", Ty::bottom(), any));
            let anytuple_type = Ty::type_of(Ty::fresh_var("T", Ty::bottom(), tuple_any));
            Builtins {
                function,
                datatype,
                uniontype,
                number,
                real,
                int,
                float,
                bool_,
                str_,
                tuple_any,
                type_type,
                anytuple_type,
            }
        })
    }

    pub fn function() -> Ty {
        all().function
    }

    /// The kind of nominal types.
    pub fn datatype() -> Ty {
        all().datatype
    }

    /// The kind of union types.
    pub fn uniontype() -> Ty {
        all().uniontype
    }

    pub fn number() -> Ty {
        all().number
    }

    pub fn real() -> Ty {
        all().real
    }

    pub fn int() -> Ty {
        all().int
    }

    pub fn float() -> Ty {
        all().float
    }

    pub fn bool_ty() -> Ty {
        all().bool_
    }

    pub fn str_ty() -> Ty {
        all().str_
    }

    /// `Tuple{Vararg{Any}}`, the type of every argument tuple.
    pub fn tuple_any() -> Ty {
        all().tuple_any
    }

    /// `Type{T}` for an unconstrained `T`, the general meta-type.
    pub fn type_type() -> Ty {
        all().type_type
    }

    /// `Type{T <: Tuple}`, the widening target for tuple-type arguments.
    pub fn anytuple_type() -> Ty {
        all().anytuple_type
    }
}

// =============================================================================
// Display
// =============================================================================

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            TyKind::Any => f.write_str("Any"),
            TyKind::AnyMarker => f.write_str("ANY"),
            TyKind::Bottom => f.write_str("Union{}"),
            TyKind::Data(d) => {
                write!(f, "{}", d.name)?;
                if !d.params.is_empty() {
                    f.write_str("{")?;
                    for (i, p) in d.params.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{}", p)?;
                    }
                    f.write_str("}")?;
                }
                Ok(())
            }
            TyKind::Tuple(elems) => {
                f.write_str("Tuple{")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                f.write_str("}")
            }
            TyKind::Vararg(elem) => write!(f, "Vararg{{{}}}", elem),
            TyKind::Union(alts) => {
                f.write_str("Union{")?;
                for (i, a) in alts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                f.write_str("}")
            }
            TyKind::TypeOf(inner) => write!(f, "Type{{{}}}", inner),
            TyKind::Var(v) => {
                if v.ub.is_any() {
                    write!(f, "{}", v.name)
                } else {
                    write!(f, "{}<:{}", v.name, v.ub)
                }
            }
        }
    }
}

impl fmt::Debug for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_consing() {
        let t1 = Ty::tuple(vec![builtins::int(), builtins::real()]);
        let t2 = Ty::tuple(vec![builtins::int(), builtins::real()]);
        assert_eq!(t1, t2);
        let t3 = Ty::tuple(vec![builtins::real(), builtins::int()]);
        assert_ne!(t1, t3);
    }

    #[test]
    fn test_fresh_vars_distinct() {
        let v1 = Ty::fresh_var("T", Ty::bottom(), Ty::any());
        let v2 = Ty::fresh_var("T", Ty::bottom(), Ty::any());
        assert_ne!(v1, v2);
    }

    #[test]
    fn test_concrete() {
        assert!(builtins::int().is_concrete());
        assert!(!builtins::real().is_concrete());
        assert!(Ty::tuple(vec![builtins::int()]).is_concrete());
        assert!(!Ty::tuple(vec![Ty::vararg(builtins::int())]).is_concrete());
        assert!(Ty::type_of(builtins::int()).is_concrete());
        assert!(!builtins::type_type().is_concrete());
    }

    #[test]
    fn test_union_normalization() {
        let u = Ty::union(vec![builtins::int(), builtins::int()]);
        assert_eq!(u, builtins::int());
        let u2 = Ty::union(vec![builtins::int(), Ty::bottom()]);
        assert_eq!(u2, builtins::int());
        let u3 = Ty::union(vec![builtins::int(), builtins::float()]);
        let u4 = Ty::union(vec![builtins::float(), builtins::int()]);
        assert_eq!(u3, u4);
        assert!(u3.is_union());
    }

    #[test]
    fn test_nth_slot_vararg_overhang() {
        let sig = Ty::tuple(vec![builtins::int(), Ty::vararg(builtins::real())]);
        assert_eq!(sig.nth_slot_ty(0), Some(builtins::int()));
        assert_eq!(sig.nth_slot_ty(1), Some(builtins::real()));
        assert_eq!(sig.nth_slot_ty(5), Some(builtins::real()));
        let fixed = Ty::tuple(vec![builtins::int()]);
        assert_eq!(fixed.nth_slot_ty(1), None);
    }

    #[test]
    fn test_kind_of() {
        assert_eq!(builtins::int().kind_of(), builtins::datatype());
        let u = Ty::union(vec![builtins::int(), builtins::str_ty()]);
        assert_eq!(u.kind_of(), builtins::uniontype());
    }

    #[test]
    fn test_display() {
        let sig = Ty::tuple(vec![builtins::int(), Ty::vararg(Ty::any())]);
        assert_eq!(format!("{}", sig), "Tuple{Int, Vararg{Any}}");
        assert_eq!(format!("{}", Ty::type_of(builtins::int())), "Type{Int}");
    }
}
