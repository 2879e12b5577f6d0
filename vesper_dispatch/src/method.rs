//! Method definitions and their specializations.
//!
//! A [`Method`] is a user-supplied definition: a signature plus an
//! uncompiled body template. A [`Specialization`] is that definition
//! concretized at one argument-type tuple, optionally carrying generated
//! code. Methods are inserted once and never removed; identity is by
//! allocation (`Arc::ptr_eq`), which is distinct from generic equality of
//! their signatures.
//!
//! Back-references (specialization → method, ambiguity partners) are
//! non-owning so that the cyclic shape of the dispatch graph cannot leak.

use crate::error::DispatchResult;
use crate::signature::Signature;
use crate::typemap::TypeMap;
use bitflags::bitflags;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use vesper_types::{Symbol, TypeEnv, Value};

/// An uncompiled method body. Receives the argument values and the static
/// parameter bindings of the matched specialization.
pub type BodyFn = Arc<dyn Fn(&[Value], &TypeEnv) -> DispatchResult<Value> + Send + Sync>;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodFlags: u32 {
        /// Body is generated per signature; the specializer must not widen.
        const STAGED = 1 << 0;
        /// Fire the method tracer after each specialization.
        const TRACED = 1 << 1;
    }
}

/// A user-supplied method definition.
pub struct Method {
    pub name: Symbol,
    pub module: Symbol,
    pub file: &'static str,
    pub line: u32,
    pub sig: Signature,
    /// The uncompiled code template.
    pub template: BodyFn,
    /// Bit `i` set means argument position `i + 1` is used as a callable
    /// inside the body. Positions beyond bit 8 are treated as called.
    pub called_mask: u32,
    /// Whether the template body references the static parameters at run
    /// time, forcing the unspecialized fallback to bind them as data.
    pub uses_static_params: bool,
    flags: AtomicU32,
    /// Definitions this one is pairwise-ambiguous with.
    ambig: Mutex<Vec<Weak<Method>>>,
    /// Concrete signature → specialization, at most one build each.
    pub(crate) specializations: Mutex<TypeMap>,
    /// Private dispatch cache for the explicit `invoke` pathway.
    pub(crate) invokes: Mutex<TypeMap>,
    /// Shared unspecialized fallback (the template as a specialization).
    unspecialized: Mutex<Option<Arc<Specialization>>>,
}

impl Method {
    pub fn builder(name: &str, sig: Signature, template: BodyFn) -> MethodBuilder {
        MethodBuilder {
            name: Symbol::intern(name),
            module: Symbol::intern("main"),
            file: "<unknown>",
            line: 0,
            sig,
            template,
            called_mask: u32::MAX,
            uses_static_params: false,
            flags: MethodFlags::empty(),
        }
    }

    #[inline]
    pub fn is_staged(&self) -> bool {
        MethodFlags::from_bits_truncate(self.flags.load(Ordering::Relaxed))
            .contains(MethodFlags::STAGED)
    }

    #[inline]
    pub fn is_traced(&self) -> bool {
        MethodFlags::from_bits_truncate(self.flags.load(Ordering::Relaxed))
            .contains(MethodFlags::TRACED)
    }

    pub fn set_traced(&self, traced: bool) {
        if traced {
            self.flags.fetch_or(MethodFlags::TRACED.bits(), Ordering::Relaxed);
        } else {
            self.flags.fetch_and(!MethodFlags::TRACED.bits(), Ordering::Relaxed);
        }
    }

    /// Live ambiguity partners of this definition.
    pub fn ambiguities(&self) -> Vec<Arc<Method>> {
        self.ambig
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn has_ambiguities(&self) -> bool {
        self.ambig.lock().iter().any(|w| w.strong_count() > 0)
    }

    pub(crate) fn push_ambig(&self, other: &Arc<Method>) {
        self.ambig.lock().push(Arc::downgrade(other));
    }

    /// Adopt the ambiguity list of an overwritten predecessor, preserving
    /// its recorded relations.
    pub(crate) fn adopt_ambig_from(&self, old: &Method) {
        let mut mine = self.ambig.lock();
        for w in old.ambig.lock().iter() {
            mine.push(w.clone());
        }
    }

    /// Shared template-as-specialization fallback slot.
    pub(crate) fn unspecialized_slot(&self) -> &Mutex<Option<Arc<Specialization>>> {
        &self.unspecialized
    }

    /// Visit every specialization recorded for this method, including the
    /// private invoke cache.
    pub fn each_specialization(&self, f: &mut dyn FnMut(&Arc<Specialization>)) {
        for map in [&self.specializations, &self.invokes] {
            map.lock().visit_all(&mut |entry| {
                if let Some(spec) = entry.payload.as_spec() {
                    f(spec);
                }
                true
            });
        }
    }

    /// Whether argument position `i` (0 = the function slot) is recorded as
    /// called inside the body. Mirrors the 8-bit window of the mask.
    pub fn arg_is_called(&self, i: usize) -> bool {
        if i == 0 || i > 8 {
            return true;
        }
        self.called_mask & (1 << (i - 1)) != 0
    }
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.name, self.sig)
    }
}

/// Builder for method definitions. The frontend fills in what it knows; the
/// defaults are the conservative choices (every argument called, no static
/// parameter use).
pub struct MethodBuilder {
    name: Symbol,
    module: Symbol,
    file: &'static str,
    line: u32,
    sig: Signature,
    template: BodyFn,
    called_mask: u32,
    uses_static_params: bool,
    flags: MethodFlags,
}

impl MethodBuilder {
    pub fn module(mut self, module: &str) -> Self {
        self.module = Symbol::intern(module);
        self
    }

    pub fn at(mut self, file: &'static str, line: u32) -> Self {
        self.file = file;
        self.line = line;
        self
    }

    pub fn staged(mut self) -> Self {
        self.flags |= MethodFlags::STAGED;
        self
    }

    pub fn traced(mut self) -> Self {
        self.flags |= MethodFlags::TRACED;
        self
    }

    /// Record which argument positions the body calls; bit `i` is argument
    /// `i + 1`. Clearing a bit lets the specializer despecialize Function
    /// arguments in that slot.
    pub fn called_mask(mut self, mask: u32) -> Self {
        self.called_mask = mask;
        self
    }

    pub fn uses_static_params(mut self) -> Self {
        self.uses_static_params = true;
        self
    }

    pub fn build(self) -> Arc<Method> {
        Arc::new(Method {
            name: self.name,
            module: self.module,
            file: self.file,
            line: self.line,
            sig: self.sig,
            template: self.template,
            called_mask: self.called_mask,
            uses_static_params: self.uses_static_params,
            flags: AtomicU32::new(self.flags.bits()),
            ambig: Mutex::new(Vec::new()),
            specializations: Mutex::new(TypeMap::new(0)),
            invokes: Mutex::new(TypeMap::new(1)),
            unspecialized: Mutex::new(None),
        })
    }
}

/// A method concretized at one signature.
pub struct Specialization {
    pub sig: Signature,
    /// Static parameter values captured during signature matching.
    pub sparams: TypeEnv,
    method: Weak<Method>,
    code: Mutex<Option<BodyFn>>,
    inferred: AtomicBool,
    in_inference: AtomicBool,
    /// Whether the code generator should fire the linfo tracer for this
    /// specialization specifically.
    compile_traced: AtomicBool,
    /// Per-specialization fallback used when inference or codegen fail.
    fallback: Mutex<Option<Arc<Specialization>>>,
}

impl Specialization {
    pub(crate) fn new(method: &Arc<Method>, sig: Signature, sparams: TypeEnv) -> Arc<Self> {
        Arc::new(Self {
            sig,
            sparams,
            method: Arc::downgrade(method),
            code: Mutex::new(None),
            inferred: AtomicBool::new(false),
            in_inference: AtomicBool::new(false),
            compile_traced: AtomicBool::new(false),
            fallback: Mutex::new(None),
        })
    }

    /// The defining method, while it is alive.
    pub fn def(&self) -> Option<Arc<Method>> {
        self.method.upgrade()
    }

    pub fn has_code(&self) -> bool {
        self.code.lock().is_some()
    }

    pub fn code(&self) -> Option<BodyFn> {
        self.code.lock().clone()
    }

    /// Publish generated code. The entry must be fully built before any
    /// reader can observe it; the mutex guarantees that here.
    pub fn install_code(&self, code: BodyFn) {
        *self.code.lock() = Some(code);
    }

    pub fn is_inferred(&self) -> bool {
        self.inferred.load(Ordering::Acquire)
    }

    pub fn mark_inferred(&self) {
        self.inferred.store(true, Ordering::Release);
    }

    pub fn in_inference(&self) -> bool {
        self.in_inference.load(Ordering::Acquire)
    }

    pub(crate) fn set_in_inference(&self, flag: bool) {
        self.in_inference.store(flag, Ordering::Release);
    }

    pub fn is_compile_traced(&self) -> bool {
        self.compile_traced.load(Ordering::Relaxed)
    }

    pub fn set_compile_traced(&self, traced: bool) {
        self.compile_traced.store(traced, Ordering::Relaxed);
    }

    pub fn fallback(&self) -> Option<Arc<Specialization>> {
        self.fallback.lock().clone()
    }

    pub(crate) fn set_fallback(&self, fb: Arc<Specialization>) {
        *self.fallback.lock() = Some(fb);
    }
}

impl std::fmt::Debug for Specialization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Specialization({})", self.sig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_types::builtins as b;
    use vesper_types::Ty;

    fn body() -> BodyFn {
        Arc::new(|_, _| Ok(Value::Int(0)))
    }

    #[test]
    fn test_builder_defaults() {
        let sig = Signature::new(vec![b::int()], vec![]);
        let m = Method::builder("f", sig, body()).build();
        assert!(!m.is_staged());
        assert!(!m.is_traced());
        assert!(m.arg_is_called(1));
        assert!(m.arg_is_called(12));
    }

    #[test]
    fn test_called_mask_window() {
        let sig = Signature::new(vec![b::int(), b::int()], vec![]);
        let m = Method::builder("f", sig, body()).called_mask(0b10).build();
        assert!(m.arg_is_called(0));
        assert!(!m.arg_is_called(1));
        assert!(m.arg_is_called(2));
    }

    #[test]
    fn test_trace_toggle() {
        let sig = Signature::new(vec![b::int()], vec![]);
        let m = Method::builder("f", sig, body()).build();
        m.set_traced(true);
        assert!(m.is_traced());
        m.set_traced(false);
        assert!(!m.is_traced());
    }

    #[test]
    fn test_specialization_back_reference() {
        let sig = Signature::new(vec![b::int()], vec![]);
        let m = Method::builder("f", sig.clone(), body()).build();
        let spec = Specialization::new(&m, sig, TypeEnv::new());
        assert!(spec.def().is_some());
        assert!(!spec.has_code());
        drop(m);
        assert!(spec.def().is_none());
    }

    #[test]
    fn test_ambig_is_non_owning() {
        let sig = Signature::new(vec![Ty::any()], vec![]);
        let m1 = Method::builder("g", sig.clone(), body()).build();
        let m2 = Method::builder("g", sig, body()).build();
        m1.push_ambig(&m2);
        m2.push_ambig(&m1);
        assert_eq!(m1.ambiguities().len(), 1);
        drop(m2);
        assert!(m1.ambiguities().is_empty());
    }
}
