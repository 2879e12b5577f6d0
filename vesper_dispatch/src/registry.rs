//! The generic-function registry.
//!
//! A generic function value is nothing but its unique singleton function
//! type; this registry maps that type to the function's method table. The
//! slow dispatch path resolves `type_of(args[0])` here, the inference sweep
//! and the precompile scans enumerate tables here, and the keyword-sorter
//! sibling function is created here on first request.

use crate::method::{BodyFn, Method, Specialization};
use crate::signature::Signature;
use crate::table::MethodTable;
use crate::typemap::Payload;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use vesper_types::{builtins, Symbol, Ty, TypeEnv, Value};

/// Process-wide function type → method table map.
pub struct FunctionRegistry {
    tables: DashMap<Ty, Arc<MethodTable>>,
}

static REGISTRY: OnceLock<FunctionRegistry> = OnceLock::new();

/// The global registry.
pub fn registry() -> &'static FunctionRegistry {
    REGISTRY.get_or_init(|| FunctionRegistry {
        tables: DashMap::new(),
    })
}

/// Whether the registry has been touched yet. The method-error path uses
/// this to detect the pre-bootstrap window.
pub(crate) fn registry_initialized() -> bool {
    REGISTRY.get().is_some()
}

impl FunctionRegistry {
    /// Create a generic function named `name`. The function's singleton
    /// type is `#name`; creating the same name twice yields the same
    /// function value.
    pub fn new_generic_function(&self, name: &str, module: &str) -> Value {
        self.new_function_with_type_name(&format!("#{}", name), name, module)
    }

    fn new_function_with_type_name(&self, tyname: &str, name: &str, module: &str) -> Value {
        let fty = Ty::new_concrete(tyname, builtins::function());
        self.tables.entry(fty).or_insert_with(|| {
            MethodTable::new(Symbol::intern(name), Symbol::intern(module))
        });
        Value::Function(fty)
    }

    /// The method table registered for a function type.
    pub fn method_table(&self, fty: Ty) -> Option<Arc<MethodTable>> {
        self.tables.get(&fty).map(|entry| entry.value().clone())
    }

    /// The method table behind a function value.
    pub fn method_table_of(&self, f: &Value) -> Option<Arc<MethodTable>> {
        self.method_table(f.as_function_ty()?)
    }

    /// Snapshot of every registered table, for sweeps.
    pub fn all_tables(&self) -> Vec<Arc<MethodTable>> {
        self.tables.iter().map(|e| e.value().clone()).collect()
    }

    /// The keyword-sorter sibling of `f`, created on first request as the
    /// generic function `#kw#name`.
    pub fn get_kwsorter(&self, f: &Value) -> Option<Value> {
        let mt = self.method_table_of(f)?;
        let mut slot = mt.kwsorter.lock();
        if let Some(kw) = slot.as_ref() {
            return Some(kw.clone());
        }
        let name = mt.name.as_str();
        let kw = self.new_function_with_type_name(
            &format!("#kw#{}", name),
            name,
            mt.module.as_str(),
        );
        *slot = Some(kw.clone());
        Some(kw)
    }

    /// A builtin function: one catch-all cache entry over `(Vararg{Any})`
    /// bound to a native body, bypassing the definition list entirely.
    pub fn make_builtin(&self, name: &str, body: BodyFn) -> Value {
        let f = self.new_generic_function(name, "core");
        let fty = f.as_function_ty().unwrap_or_else(Ty::any);
        let mt = match self.method_table(fty) {
            Some(mt) => mt,
            None => return f,
        };
        let sig = Signature::new(vec![fty, Ty::vararg(Ty::any())], Vec::new());
        let method = Method::builder(name, sig.clone(), body.clone())
            .module("core")
            .build();
        let spec = Specialization::new(&method, sig.clone(), TypeEnv::new());
        spec.install_code(body);
        spec.mark_inferred();
        // Builtins live only in the cache: their definition list stays empty
        // so cache-reset sweeps leave their single entry alone.
        let mut cache = mt.cache.write();
        cache.insert(sig, None, Vec::new(), Payload::Spec(spec));
        f
    }
}

/// Define a method on an existing generic function. The function's own type
/// is prepended to `slots`, matching how call signatures are formed.
pub fn define(f: &Value, slots: Vec<Ty>, body: BodyFn) -> Arc<Method> {
    DefineBuilder::new(f, slots, body).finish()
}

/// Builder variant of [`define`] exposing the less common knobs.
pub struct DefineBuilder {
    fty: Ty,
    slots: Vec<Ty>,
    tvars: Vec<Ty>,
    body: BodyFn,
    staged: bool,
    traced: bool,
    called_mask: u32,
    uses_static_params: bool,
    simplesig: Option<Signature>,
}

impl DefineBuilder {
    pub fn new(f: &Value, slots: Vec<Ty>, body: BodyFn) -> Self {
        Self {
            fty: f.as_function_ty().unwrap_or_else(Ty::any),
            slots,
            tvars: Vec::new(),
            body,
            staged: false,
            traced: false,
            called_mask: u32::MAX,
            uses_static_params: false,
            simplesig: None,
        }
    }

    pub fn tvars(mut self, tvars: Vec<Ty>) -> Self {
        self.tvars = tvars;
        self
    }

    pub fn staged(mut self) -> Self {
        self.staged = true;
        self
    }

    pub fn traced(mut self) -> Self {
        self.traced = true;
        self
    }

    pub fn called_mask(mut self, mask: u32) -> Self {
        self.called_mask = mask;
        self
    }

    pub fn uses_static_params(mut self) -> Self {
        self.uses_static_params = true;
        self
    }

    pub fn simplesig(mut self, simplesig: Signature) -> Self {
        self.simplesig = Some(simplesig);
        self
    }

    pub fn finish(self) -> Arc<Method> {
        let mt = registry()
            .method_table(self.fty)
            .unwrap_or_else(|| MethodTable::new(Symbol::intern("anonymous"), Symbol::intern("main")));
        let mut all = Vec::with_capacity(self.slots.len() + 1);
        all.push(self.fty);
        all.extend_from_slice(&self.slots);
        let sig = Signature::new(all, self.tvars);
        let mut builder = Method::builder(mt.name.as_str(), sig, self.body)
            .module(mt.module.as_str())
            .called_mask(self.called_mask);
        if self.staged {
            builder = builder.staged();
        }
        if self.traced {
            builder = builder.traced();
        }
        if self.uses_static_params {
            builder = builder.uses_static_params();
        }
        let method = builder.build();
        mt.insert_method(method.clone(), self.simplesig);
        method
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_types::builtins as b;
    use vesper_types::subtype;

    #[test]
    fn test_function_identity_is_type() {
        let f = registry().new_generic_function("reg_f", "main");
        let g = registry().new_generic_function("reg_g", "main");
        assert_ne!(f.type_of(), g.type_of());
        assert!(subtype(f.type_of(), b::function()));
        // Re-creating the same name yields the same function.
        let f2 = registry().new_generic_function("reg_f", "main");
        assert_eq!(f.type_of(), f2.type_of());
    }

    #[test]
    fn test_define_prepends_function_slot() {
        let f = registry().new_generic_function("reg_def", "main");
        let m = define(&f, vec![b::int()], Arc::new(|_, _| Ok(Value::Int(1))));
        assert_eq!(m.sig.nparams(), 2);
        assert_eq!(m.sig.slots()[0], f.type_of());
        assert_eq!(m.sig.slots()[1], b::int());
        let mt = registry().method_table_of(&f).unwrap();
        assert_eq!(mt.defs_len(), 1);
    }

    #[test]
    fn test_kwsorter_lazy_singleton() {
        let f = registry().new_generic_function("reg_kw", "main");
        let kw1 = registry().get_kwsorter(&f).unwrap();
        let kw2 = registry().get_kwsorter(&f).unwrap();
        assert_eq!(kw1.type_of(), kw2.type_of());
        assert_ne!(kw1.type_of(), f.type_of());
        assert!(registry().method_table_of(&kw1).is_some());
    }

    #[test]
    fn test_builtin_has_catchall_cache_entry() {
        let f = registry()
            .make_builtin("reg_builtin", Arc::new(|args, _| Ok(Value::Int(args.len() as i64))));
        let mt = registry().method_table_of(&f).unwrap();
        assert_eq!(mt.cache_len(), 1);
        let spec = mt
            .lookup_by_args(&[f.clone(), Value::Int(1), Value::str("x")])
            .unwrap();
        assert!(spec.has_code());
    }
}
