use thiserror::Error;

use crate::Value;

/// Catchable failures raised while bridging a call.
///
/// Frame corruption is never a value a program can observe, see
/// [`frame_corruption`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CallError {
    #[error("{0:?} is not a function")]
    NonCallable(Value),
    #[error("maximum call stack size exceeded")]
    StackOverflow,
    #[error("class constructor {0} cannot be invoked without 'new'")]
    ClassConstructorMisuse(String),
    #[error("{0:?} is not a constructor")]
    NotAConstructor(Value),
    #[error("derived constructor {0} returned a non-object")]
    InvalidConstructorResult(String),
    #[error("generator is already running or has completed")]
    InvalidGeneratorState,
    #[error("invalid operand for {0}")]
    InvalidOperand(&'static str),
    /// A program-level exception unwinding through the bridge.
    #[error("uncaught exception: {0:?}")]
    Thrown(Value),
}

impl CallError {
    /// The value a handler receives in its accumulator. Engine-raised
    /// errors carry no program value and surface as the exception marker.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Thrown(value) => *value,
            _ => Value::EXCEPTION,
        }
    }
}

pub type CallResult<T> = Result<T, CallError>;

/// Aborts on a broken frame invariant.
#[cold]
#[track_caller]
pub fn frame_corruption(args: core::fmt::Arguments<'_>) -> ! {
    log::error!("internal frame corruption: {args}");
    panic!("internal frame corruption: {args}");
}
