//! Type values and type predicates for the Vesper runtime.
//!
//! This crate is the type-system collaborator of the dispatch engine. It
//! supplies hash-consed type values (`Ty`), the runtime value representation
//! (`Value`), and the predicate surface the dispatcher consumes:
//!
//! - **Subtyping** (`subtype`) over nominal types, covariant tuples with
//!   trailing varargs, unions, `Type{X}` meta-types, and bounded variables
//! - **Intersection with matching** (`intersect`) which binds free type
//!   variables of the right-hand signature into a [`TypeEnv`]
//! - **Specificity** (`more_specific`) used to order method definitions
//!
//! Types are interned process-wide: two structurally identical types are the
//! same `Ty` handle, so handle comparison is type equality. The dispatch fast
//! path relies on this for its per-slot pointer-style checks.

pub mod env;
pub mod intern;
pub mod intersect;
pub mod specificity;
pub mod subtype;
pub mod ty;
pub mod value;

pub use env::TypeEnv;
pub use intern::Symbol;
pub use intersect::{instantiate, intersect};
pub use specificity::more_specific;
pub use subtype::{equal_generic, subtype, types_equal};
pub use ty::{builtins, DataInfo, Ty, TyKind, VarInfo};
pub use value::Value;
