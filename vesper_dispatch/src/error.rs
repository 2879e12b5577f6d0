//! Dispatch error types.
//!
//! Only the recoverable dispatch failures are values; invariant violations
//! panic. Inference and tracer failures never surface here; they are caught
//! at their call sites and the engine proceeds on a fallback path.

use std::fmt;
use vesper_types::Value;

/// A dispatch failure surfaced to the caller.
#[derive(Debug, Clone)]
pub enum DispatchError {
    /// No definition covers the argument tuple.
    NoMethod { func: Value, args: Vec<Value> },
    /// Two or more definitions cover the argument tuple and none is most
    /// specific.
    AmbiguousCall { func: Value, args: Vec<Value> },
}

pub type DispatchResult<T> = Result<T, DispatchError>;

impl DispatchError {
    /// The function value the failed call targeted.
    pub fn func(&self) -> &Value {
        match self {
            DispatchError::NoMethod { func, .. } => func,
            DispatchError::AmbiguousCall { func, .. } => func,
        }
    }

    /// The argument values of the failed call (function excluded).
    pub fn args(&self) -> &[Value] {
        match self {
            DispatchError::NoMethod { args, .. } => args,
            DispatchError::AmbiguousCall { args, .. } => args,
        }
    }
}

fn write_call(f: &mut fmt::Formatter<'_>, func: &Value, args: &[Value]) -> fmt::Result {
    write!(f, "{}(", func)?;
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "::{}", a.type_of())?;
    }
    f.write_str(")")
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::NoMethod { func, args } => {
                f.write_str("MethodError: no method matching ")?;
                write_call(f, func, args)
            }
            DispatchError::AmbiguousCall { func, args } => {
                f.write_str("MethodError: ambiguous call ")?;
                write_call(f, func, args)
            }
        }
    }
}

impl std::error::Error for DispatchError {}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_types::{builtins, Ty};

    #[test]
    fn test_no_method_display() {
        let fty = Ty::new_concrete("#show", builtins::function());
        let err = DispatchError::NoMethod {
            func: Value::Function(fty),
            args: vec![Value::Int(1), Value::str("x")],
        };
        assert_eq!(
            format!("{}", err),
            "MethodError: no method matching show(::Int, ::Str)"
        );
    }
}
