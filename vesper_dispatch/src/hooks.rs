//! Global locks, installable callbacks, and the pure-context flag.
//!
//! Definition insertion, specialization building, inference, and cache
//! invalidation all serialize on the `codegen` lock. It is reentrant because
//! the inference hook is allowed to dispatch recursively on the same thread.
//! The separate `typeinf` lock is exposed as a begin/end pair so the
//! inferencer can bracket its own critical sections.
//!
//! Tracer callbacks run inside a thread-local "pure context": collaborators
//! query [`is_in_pure_context`] to suppress side effects, and a callback
//! that panics is caught, reported, and suppressed.

use crate::method::{BodyFn, Method, Specialization};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

// =============================================================================
// Locks
// =============================================================================

static CODEGEN_LOCK: ReentrantMutex<()> = ReentrantMutex::new(());
static TYPEINF_LOCK: Mutex<()> = Mutex::new(());

/// Acquire the codegen lock. Reentrant: the inference hook may re-enter
/// dispatch while holding it.
pub fn codegen_lock() -> ReentrantMutexGuard<'static, ()> {
    CODEGEN_LOCK.lock()
}

/// Enter the inferencer's critical section.
pub fn typeinf_begin() {
    std::mem::forget(TYPEINF_LOCK.lock());
}

/// Leave the inferencer's critical section.
pub fn typeinf_end() {
    // Safety: paired with the guard leaked by `typeinf_begin`.
    unsafe { TYPEINF_LOCK.force_unlock() }
}

// =============================================================================
// Pure context
// =============================================================================

thread_local! {
    static IN_PURE_CALLBACK: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is running inside a tracer callback.
pub fn is_in_pure_context() -> bool {
    IN_PURE_CALLBACK.with(Cell::get)
}

/// Run a callback in the pure context, catching and reporting panics.
/// Failures never propagate into dispatch.
pub(crate) fn call_tracer<T>(cb: &dyn Fn(&T), arg: &T) {
    let last = IN_PURE_CALLBACK.with(|flag| flag.replace(true));
    let result = catch_unwind(AssertUnwindSafe(|| cb(arg)));
    IN_PURE_CALLBACK.with(|flag| flag.set(last));
    if result.is_err() {
        eprintln!("WARNING: tracer callback function threw an error");
    }
}

// =============================================================================
// Tracers
// =============================================================================

pub type SpecTracer = Arc<dyn Fn(&Arc<Specialization>) + Send + Sync>;
pub type MethodTracer = Arc<dyn Fn(&Arc<Method>) + Send + Sync>;

static METHOD_TRACER: RwLock<Option<SpecTracer>> = RwLock::new(None);
static NEWMETH_TRACER: RwLock<Option<MethodTracer>> = RwLock::new(None);
static LINFO_TRACER: RwLock<Option<SpecTracer>> = RwLock::new(None);

/// Install the tracer fired after specialization of a traced method.
pub fn register_method_tracer(cb: SpecTracer) {
    *METHOD_TRACER.write() = Some(cb);
}

/// Install the tracer fired after every method insertion.
pub fn register_newmeth_tracer(cb: MethodTracer) {
    *NEWMETH_TRACER.write() = Some(cb);
}

/// Install the tracer fired after code generation for a specialization.
pub fn register_linfo_tracer(cb: SpecTracer) {
    *LINFO_TRACER.write() = Some(cb);
}

pub(crate) fn trace_specialized(spec: &Arc<Specialization>) {
    let tracer = METHOD_TRACER.read().clone();
    if let Some(cb) = tracer {
        call_tracer(&*cb, spec);
    }
}

pub(crate) fn trace_new_method(method: &Arc<Method>) {
    let tracer = NEWMETH_TRACER.read().clone();
    if let Some(cb) = tracer {
        call_tracer(&*cb, method);
    }
}

pub(crate) fn trace_compiled(spec: &Arc<Specialization>) {
    let tracer = LINFO_TRACER.read().clone();
    if let Some(cb) = tracer {
        call_tracer(&*cb, spec);
    }
}

// =============================================================================
// Compile mode & code generator hook
// =============================================================================

/// Whether specializations are compiled eagerly after inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileMode {
    On,
    Off,
}

static COMPILE_MODE: AtomicU8 = AtomicU8::new(0);

pub fn compile_mode() -> CompileMode {
    match COMPILE_MODE.load(Ordering::Relaxed) {
        0 => CompileMode::On,
        _ => CompileMode::Off,
    }
}

pub fn set_compile_mode(mode: CompileMode) {
    let raw = match mode {
        CompileMode::On => 0,
        CompileMode::Off => 1,
    };
    COMPILE_MODE.store(raw, Ordering::Relaxed);
}

/// The external code generator: materializes code inside a specialization.
pub type CompileHook = Arc<dyn Fn(&Arc<Specialization>) + Send + Sync>;

static COMPILE_HOOK: RwLock<Option<CompileHook>> = RwLock::new(None);

/// Install a code generator. Absent a hook, compilation promotes the
/// method's template body unchanged.
pub fn set_compile_hook(hook: CompileHook) {
    *COMPILE_HOOK.write() = Some(hook);
}

/// Compile a specialization through the installed hook, then fire the
/// code-generation tracer if code appeared.
pub(crate) fn compile_spec(spec: &Arc<Specialization>) {
    if spec.has_code() {
        return;
    }
    let _lock = codegen_lock();
    if spec.has_code() {
        return;
    }
    let hook = COMPILE_HOOK.read().clone();
    match hook {
        Some(cb) => cb(spec),
        None => {
            if let Some(def) = spec.def() {
                let template: BodyFn = def.template.clone();
                spec.install_code(template);
            }
        }
    }
    if spec.has_code() {
        trace_compiled(spec);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::Signature;
    use std::sync::atomic::AtomicBool;
    use vesper_types::builtins as b;
    use vesper_types::{TypeEnv, Value};

    #[test]
    fn test_pure_context_flag() {
        assert!(!is_in_pure_context());
        let observed = AtomicBool::new(false);
        let cb = |_: &u32| {
            observed.store(is_in_pure_context(), Ordering::Relaxed);
        };
        call_tracer(&cb, &0u32);
        assert!(observed.load(Ordering::Relaxed));
        assert!(!is_in_pure_context());
    }

    #[test]
    fn test_tracer_panic_suppressed() {
        let cb = |_: &u32| panic!("tracer misbehaved");
        call_tracer(&cb, &0u32);
        assert!(!is_in_pure_context());
    }

    #[test]
    fn test_codegen_lock_reentrant() {
        let _a = codegen_lock();
        let _b = codegen_lock();
    }

    #[test]
    fn test_compile_promotes_template() {
        let sig = Signature::new(vec![b::int()], vec![]);
        let m = Method::builder(
            "c",
            sig.clone(),
            Arc::new(|_, _| Ok(Value::Int(7))),
        )
        .build();
        let spec = Specialization::new(&m, sig, TypeEnv::new());
        compile_spec(&spec);
        let code = spec.code().unwrap();
        assert_eq!(code(&[], &TypeEnv::new()).unwrap(), Value::Int(7));
    }

    #[test]
    fn test_compile_idempotent() {
        let sig = Signature::new(vec![b::str_ty()], vec![]);
        let m = Method::builder(
            "c2",
            sig.clone(),
            Arc::new(|_, _| Ok(Value::Bool(true))),
        )
        .build();
        let spec = Specialization::new(&m, sig, TypeEnv::new());
        compile_spec(&spec);
        compile_spec(&spec);
        assert!(spec.has_code());
    }
}
