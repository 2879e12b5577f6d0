//! Signature-keyed associative container.
//!
//! A `TypeMap` stores `(signature, payload)` pairs ordered so that a more
//! specific signature is always reached before a less specific one. It backs
//! both the definition list of a method table (payloads are methods) and its
//! dispatch cache (payloads are specializations).
//!
//! Three query modes are supported:
//!
//! 1. [`TypeMap::assoc_exact`]: match a flat argument array; leaf-signature
//!    entries match by per-slot handle comparison
//! 2. [`TypeMap::assoc_by_type`]: match a signature type exactly, up to
//!    variable substitution, or by subtyping
//! 3. [`TypeMap::intersection_visit`]: walk every entry whose signature
//!    intersects a query type
//!
//! Past a small size the map upgrades to a two-level structure: one bucket
//! table keyed by the concrete type declared at slot `offs`, one keyed by the
//! inner type of `Type{X}` slots, and a linear tail for signatures that fit
//! neither split. Entries carry an optional `simplesig` (a coarser signature
//! used only to reject fast) and `guardsigs` (signatures that must *not*
//! match; see the specialization builder).

use crate::method::{Method, Specialization};
use crate::signature::Signature;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use vesper_types::{
    equal_generic, intersect, more_specific, subtype, types_equal, Ty, TypeEnv, Value,
};

/// Number of root entries above which a map upgrades to a level node.
const LEVEL_THRESHOLD: usize = 8;

/// What an entry resolves to.
#[derive(Clone)]
pub enum Payload {
    Method(Arc<Method>),
    Spec(Arc<Specialization>),
}

impl Payload {
    pub fn as_method(&self) -> Option<&Arc<Method>> {
        match self {
            Payload::Method(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_spec(&self) -> Option<&Arc<Specialization>> {
        match self {
            Payload::Spec(s) => Some(s),
            _ => None,
        }
    }

    /// The method this payload belongs to, directly or through its
    /// specialization's back-reference.
    pub fn def(&self) -> Option<Arc<Method>> {
        match self {
            Payload::Method(m) => Some(m.clone()),
            Payload::Spec(s) => s.def(),
        }
    }
}

/// One published `(signature, payload)` pair.
pub struct TypeMapEntry {
    pub sig: Signature,
    /// Coarser signature checked first to reject mismatches cheaply.
    pub simplesig: Option<Signature>,
    /// Competing signatures; a match against one of these skips this entry.
    pub guardsigs: Box<[Signature]>,
    /// Every slot concrete, no variables, unions, varargs, or `Type{}`.
    pub is_leafsig: bool,
    pub payload: Payload,
}

impl TypeMapEntry {
    fn new(
        sig: Signature,
        simplesig: Option<Signature>,
        guardsigs: Vec<Signature>,
        payload: Payload,
    ) -> Arc<Self> {
        let is_leafsig = sig.is_leaf();
        Arc::new(Self {
            sig,
            simplesig,
            guardsigs: guardsigs.into_boxed_slice(),
            is_leafsig,
            payload,
        })
    }

    /// Eligible for the call-site cache: a plain leaf entry with no
    /// rejection filter and no guards.
    pub fn cacheable_at_callsite(&self) -> bool {
        self.is_leafsig && self.simplesig.is_none() && self.guardsigs.is_empty()
    }

    /// Match argument values against this entry: arity, the simplesig
    /// filter, the signature itself, and finally the guards.
    pub fn matches_args(&self, args: &[Value]) -> bool {
        if !self.sig.arity_matches(args.len()) {
            return false;
        }
        if let Some(ss) = &self.simplesig {
            if !ss.matches_args(args) {
                return false;
            }
        }
        let matched = if self.is_leafsig {
            self.sig.matches_arg_types_exact(args)
        } else {
            self.sig.matches_args(args)
        };
        if !matched {
            return false;
        }
        // A guard hit means a more specific definition exists for these
        // argument types; the entry must be skipped.
        !self.guardsigs.iter().any(|g| g.matches_args(args))
    }
}

/// How `assoc_by_type` compares the query against entry signatures.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LookupMode {
    /// Signature equality up to variable renaming.
    Exact,
    /// The query must be fully covered: `query ∩ sig == query`.
    Subtype,
    /// Any non-empty intersection is accepted.
    Inexact,
}

enum Node {
    Linear(Vec<Arc<TypeMapEntry>>),
    Level(Box<Level>),
}

struct Level {
    /// Keyed by the concrete type declared at slot `offs`.
    arg1: FxHashMap<Ty, Vec<Arc<TypeMapEntry>>>,
    /// Keyed by `X` for `Type{X}` slots at `offs`.
    targ: FxHashMap<Ty, Vec<Arc<TypeMapEntry>>>,
    /// Signatures unsuited to either split.
    linear: Vec<Arc<TypeMapEntry>>,
}

enum SplitKey {
    Concrete(Ty),
    TypeArg(Ty),
    None,
}

fn split_key(entry: &TypeMapEntry, offs: usize) -> SplitKey {
    let slots = entry.sig.slots();
    let Some(&slot) = slots.get(offs) else {
        return SplitKey::None;
    };
    if let Some(inner) = slot.typeof_inner() {
        if !inner.has_free_vars() {
            return SplitKey::TypeArg(inner);
        }
        return SplitKey::None;
    }
    if slot.is_concrete() {
        return SplitKey::Concrete(slot);
    }
    SplitKey::None
}

/// Ordered signature-keyed map.
pub struct TypeMap {
    offs: usize,
    root: Node,
}

impl TypeMap {
    /// `offs` selects the argument slot used for two-level discrimination:
    /// 0 includes the function object's own type, 1 skips it.
    pub fn new(offs: usize) -> Self {
        debug_assert!(offs <= 1);
        Self {
            offs,
            root: Node::Linear(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match &self.root {
            Node::Linear(v) => v.len(),
            Node::Level(level) => {
                level.arg1.values().map(Vec::len).sum::<usize>()
                    + level.targ.values().map(Vec::len).sum::<usize>()
                    + level.linear.len()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.root = Node::Linear(Vec::new());
    }

    // -------------------------------------------------------------------------
    // Insertion
    // -------------------------------------------------------------------------

    /// Insert a signature with its payload, keeping more-specific-first
    /// order. A type-equal existing entry is replaced and its payload
    /// returned so the caller can handle the overwrite.
    pub fn insert(
        &mut self,
        sig: Signature,
        simplesig: Option<Signature>,
        guardsigs: Vec<Signature>,
        payload: Payload,
    ) -> (Arc<TypeMapEntry>, Option<Payload>) {
        let entry = TypeMapEntry::new(sig, simplesig, guardsigs, payload);
        let offs = self.offs;
        let mut needs_upgrade = false;
        let old = match &mut self.root {
            Node::Linear(list) => {
                let old = insert_ordered(list, entry.clone());
                needs_upgrade = list.len() > LEVEL_THRESHOLD;
                old
            }
            Node::Level(level) => {
                let bucket = match split_key(&entry, offs) {
                    SplitKey::Concrete(key) => level.arg1.entry(key).or_default(),
                    SplitKey::TypeArg(key) => level.targ.entry(key).or_default(),
                    SplitKey::None => &mut level.linear,
                };
                insert_ordered(bucket, entry.clone())
            }
        };
        if needs_upgrade {
            self.upgrade_to_level();
        }
        (entry, old)
    }

    fn upgrade_to_level(&mut self) {
        let Node::Linear(list) = std::mem::replace(&mut self.root, Node::Linear(Vec::new()))
        else {
            return;
        };
        let mut level = Level {
            arg1: FxHashMap::default(),
            targ: FxHashMap::default(),
            linear: Vec::new(),
        };
        for entry in list {
            let bucket = match split_key(&entry, self.offs) {
                SplitKey::Concrete(key) => level.arg1.entry(key).or_default(),
                SplitKey::TypeArg(key) => level.targ.entry(key).or_default(),
                SplitKey::None => &mut level.linear,
            };
            bucket.push(entry);
        }
        self.root = Node::Level(Box::new(level));
    }

    // -------------------------------------------------------------------------
    // Exact-argument query
    // -------------------------------------------------------------------------

    /// First entry matching the argument array, in specificity order.
    pub fn assoc_exact(&self, args: &[Value]) -> Option<Arc<TypeMapEntry>> {
        match &self.root {
            Node::Linear(list) => scan(list, args),
            Node::Level(level) => {
                if let Some(arg) = args.get(self.offs) {
                    if let Some(t) = arg.as_type() {
                        if let Some(bucket) = level.targ.get(&t) {
                            if let Some(found) = scan(bucket, args) {
                                return Some(found);
                            }
                        }
                    }
                    if let Some(bucket) = level.arg1.get(&arg.type_of()) {
                        if let Some(found) = scan(bucket, args) {
                            return Some(found);
                        }
                    }
                }
                scan(&level.linear, args)
            }
        }
    }

    // -------------------------------------------------------------------------
    // By-type query
    // -------------------------------------------------------------------------

    /// First entry matching the signature type `query`. In `Subtype` and
    /// `Inexact` modes, variable bindings discovered during the match are
    /// written into `env`.
    pub fn assoc_by_type(
        &self,
        query: &Signature,
        env: &mut TypeEnv,
        mode: LookupMode,
    ) -> Option<Arc<TypeMapEntry>> {
        match &self.root {
            Node::Linear(list) => scan_by_type(list, query, env, mode),
            Node::Level(level) => {
                let slot = query.slots().get(self.offs).copied();
                // An abstract discrimination slot can intersect entries in
                // any bucket; only a concrete slot narrows the search.
                let narrow = match (mode, slot) {
                    (_, Some(s)) if s.is_concrete() || s.is_type_of_type() => true,
                    _ => false,
                };
                if !narrow {
                    for bucket in level.arg1.values().chain(level.targ.values()) {
                        if let Some(found) = scan_by_type(bucket, query, env, mode) {
                            return Some(found);
                        }
                    }
                    return scan_by_type(&level.linear, query, env, mode);
                }
                let slot = slot.unwrap_or_else(Ty::any);
                if let Some(inner) = slot.typeof_inner() {
                    if !inner.has_free_vars() {
                        if let Some(bucket) = level.targ.get(&inner) {
                            if let Some(found) = scan_by_type(bucket, query, env, mode) {
                                return Some(found);
                            }
                        }
                    }
                    // Kind-declared slots live in the concrete table.
                    if let Some(bucket) = level.arg1.get(&inner.kind_of()) {
                        if let Some(found) = scan_by_type(bucket, query, env, mode) {
                            return Some(found);
                        }
                    }
                } else if let Some(bucket) = level.arg1.get(&slot) {
                    if let Some(found) = scan_by_type(bucket, query, env, mode) {
                        return Some(found);
                    }
                }
                scan_by_type(&level.linear, query, env, mode)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Traversal
    // -------------------------------------------------------------------------

    /// Visit every entry whose signature intersects `query`, passing the
    /// intersection, the variable environment it produced, and whether the
    /// entry was reached after `pivot`. The pivot itself is not visited.
    /// The visitor returns `false` to stop; the call returns `false` when
    /// stopped early.
    pub fn intersection_visit(
        &self,
        query: Ty,
        pivot: Option<&Arc<TypeMapEntry>>,
        f: &mut dyn FnMut(&Arc<TypeMapEntry>, Ty, &TypeEnv, bool) -> bool,
    ) -> bool {
        let mut after = false;
        let mut go = |entry: &Arc<TypeMapEntry>| -> bool {
            if let Some(p) = pivot {
                if Arc::ptr_eq(p, entry) {
                    after = true;
                    return true;
                }
            }
            let mut env = TypeEnv::new();
            let ti = intersect(query, entry.sig.as_tuple(), &mut env);
            if ti.is_bottom() {
                return true;
            }
            f(entry, ti, &env, after)
        };
        self.each_bucket(&mut |bucket| {
            for entry in bucket {
                if !go(entry) {
                    return false;
                }
            }
            true
        })
    }

    /// Visit every entry. The visitor returns `false` to stop.
    pub fn visit_all(&self, f: &mut dyn FnMut(&Arc<TypeMapEntry>) -> bool) -> bool {
        self.each_bucket(&mut |bucket| {
            for entry in bucket {
                if !f(entry) {
                    return false;
                }
            }
            true
        })
    }

    fn each_bucket(&self, f: &mut dyn FnMut(&[Arc<TypeMapEntry>]) -> bool) -> bool {
        match &self.root {
            Node::Linear(list) => f(list),
            Node::Level(level) => {
                for bucket in level.arg1.values() {
                    if !f(bucket) {
                        return false;
                    }
                }
                for bucket in level.targ.values() {
                    if !f(bucket) {
                        return false;
                    }
                }
                f(&level.linear)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Invalidation
    // -------------------------------------------------------------------------

    /// Unlink every entry the predicate selects, walking both level tables
    /// and the linear tail. Returns how many entries were removed.
    pub fn unlink_where(&mut self, pred: &mut dyn FnMut(&TypeMapEntry) -> bool) -> usize {
        let mut removed = 0;
        let mut sweep = |bucket: &mut Vec<Arc<TypeMapEntry>>| {
            let before = bucket.len();
            bucket.retain(|e| !pred(e));
            removed += before - bucket.len();
        };
        match &mut self.root {
            Node::Linear(list) => sweep(list),
            Node::Level(level) => {
                for bucket in level.arg1.values_mut() {
                    sweep(bucket);
                }
                for bucket in level.targ.values_mut() {
                    sweep(bucket);
                }
                sweep(&mut level.linear);
            }
        }
        removed
    }
}

/// Ordered insert: replace a generically-equal signature, otherwise place
/// the entry before the first strictly less specific one.
fn insert_ordered(bucket: &mut Vec<Arc<TypeMapEntry>>, entry: Arc<TypeMapEntry>) -> Option<Payload> {
    for (i, existing) in bucket.iter().enumerate() {
        if equal_generic(entry.sig.as_tuple(), existing.sig.as_tuple()) {
            let old = existing.payload.clone();
            bucket[i] = entry;
            return Some(old);
        }
    }
    let pos = bucket
        .iter()
        .position(|existing| more_specific(entry.sig.as_tuple(), existing.sig.as_tuple()))
        .unwrap_or(bucket.len());
    bucket.insert(pos, entry);
    None
}

fn scan(bucket: &[Arc<TypeMapEntry>], args: &[Value]) -> Option<Arc<TypeMapEntry>> {
    bucket.iter().find(|e| e.matches_args(args)).cloned()
}

fn scan_by_type(
    bucket: &[Arc<TypeMapEntry>],
    query: &Signature,
    env: &mut TypeEnv,
    mode: LookupMode,
) -> Option<Arc<TypeMapEntry>> {
    for entry in bucket {
        match mode {
            LookupMode::Exact => {
                if equal_generic(query.as_tuple(), entry.sig.as_tuple()) {
                    return Some(entry.clone());
                }
            }
            LookupMode::Subtype | LookupMode::Inexact => {
                let mut local = TypeEnv::new();
                let ti = intersect(query.as_tuple(), entry.sig.as_tuple(), &mut local);
                if ti.is_bottom() {
                    continue;
                }
                let covered = types_equal(ti, query.as_tuple())
                    || subtype(query.as_tuple(), entry.sig.as_tuple());
                if covered || mode == LookupMode::Inexact {
                    // A query falling inside a guard belongs to a more
                    // specific entry; skip this one.
                    if entry
                        .guardsigs
                        .iter()
                        .any(|g| subtype(query.as_tuple(), g.as_tuple()))
                    {
                        continue;
                    }
                    *env = local;
                    return Some(entry.clone());
                }
            }
        }
    }
    None
}
