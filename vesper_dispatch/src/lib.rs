//! Multiple-dispatch method tables and the generic call engine.
//!
//! This crate is the dispatch subsystem of the Vesper runtime: given a
//! generic function and a tuple of argument values, find the most specific
//! definition whose signature matches the argument types, build (and cache)
//! a specialization of it, and keep hot repeat calls down to a handful of
//! handle comparisons.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ apply_generic(args)                                          │
//! │   │ call-site cache: 4 probes, handle compares, no locks     │
//! │   ▼ miss                                                     │
//! │ MethodTable.cache ── TypeMap<Specialization>                 │
//! │   │ miss: build argument-type tuple                          │
//! │   ▼                                                          │
//! │ MethodTable.defs ── TypeMap<Method>, most specific first     │
//! │   │ match + static params                                    │
//! │   ▼                                                          │
//! │ specialize::cache_method ── widen, guard, insert, infer      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Definition insertion runs the ambiguity/shadowing analysis and
//! invalidates overlapped cache entries; the explicit [`invoke`] pathway
//! dispatches to a chosen definition through that method's private cache.
//! Type predicates (subtyping, intersection, specificity) come from
//! `vesper_types`; the optimizing inferencer and the code generator are
//! external collaborators reached through installable hooks.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use vesper_dispatch::{apply_generic, registry::{self, define}};
//! use vesper_types::{builtins, Value};
//!
//! let f = registry::registry().new_generic_function("double", "main");
//! define(&f, vec![builtins::int()], Arc::new(|args, _| {
//!     match args[1] {
//!         Value::Int(n) => Ok(Value::Int(2 * n)),
//!         _ => unreachable!(),
//!     }
//! }));
//! let out = apply_generic(&[f.clone(), Value::Int(21)]).unwrap();
//! assert_eq!(out, Value::Int(42));
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::new_without_default)]

pub mod ambiguity;
pub mod apply;
pub mod error;
pub mod hooks;
pub mod inference;
pub mod method;
pub mod precompile;
pub mod registry;
pub mod signature;
pub mod specializations;
pub mod specialize;
pub mod table;
pub mod typemap;

pub use apply::{apply_generic, apply_generic_at, call_cache_stats, invoke, invoke_lookup};
pub use error::{DispatchError, DispatchResult};
pub use hooks::{
    codegen_lock, compile_mode, is_in_pure_context, register_linfo_tracer,
    register_method_tracer, register_newmeth_tracer, set_compile_hook, set_compile_mode,
    CompileMode,
};
pub use inference::{set_infer_hook, type_infer, typeinf_begin, typeinf_end, InferHook};
pub use method::{BodyFn, Method, MethodFlags, Specialization};
pub use precompile::{compile_hint, precompile};
pub use registry::{define, DefineBuilder, FunctionRegistry};
pub use signature::{arg_type_tuple, Signature};
pub use table::{MethodMatch, MethodTable};
pub use typemap::{LookupMode, Payload, TypeMap, TypeMapEntry};
