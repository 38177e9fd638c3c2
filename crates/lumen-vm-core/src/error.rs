//! VM error types

use crate::value::Value;
use lumen_vm_bytecode::ErrorCode;
use thiserror::Error;

/// VM execution errors
#[derive(Debug, Error)]
pub enum VmError {
    /// Plain `Error` raised by the bytecode
    #[error("Error: {0}")]
    Error(String),

    /// Type error (e.g., calling non-function)
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Reference error (unresolvable name)
    #[error("ReferenceError: {0}")]
    ReferenceError(String),

    /// Range error (e.g., invalid array length)
    #[error("RangeError: {0}")]
    RangeError(String),

    /// Syntax error (eval compilation failures)
    #[error("SyntaxError: {0}")]
    SyntaxError(String),

    /// Internal error: a VM invariant was violated
    #[error("InternalError: {0}")]
    InternalError(String),

    /// Stack overflow
    #[error("RangeError: Maximum call stack size exceeded")]
    StackOverflow,

    /// Thrown JS exception
    #[error("Uncaught exception: {0}")]
    Exception(Box<ThrownValue>),

    /// Bytecode error
    #[error("Bytecode error: {0}")]
    Bytecode(#[from] lumen_vm_bytecode::BytecodeError),
}

/// Coarse classification of a [`VmError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Plain Error
    Error,
    /// RangeError, including stack exhaustion
    Range,
    /// TypeError
    Type,
    /// ReferenceError
    Reference,
    /// SyntaxError
    Syntax,
    /// A value thrown by script
    User,
    /// VM invariant violation; never catchable by script
    Internal,
}

/// A thrown JavaScript value
#[derive(Debug)]
pub struct ThrownValue {
    /// The thrown value
    pub value: Value,
    /// The thrown value (as a string representation)
    pub message: String,
}

impl std::fmt::Display for ThrownValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl VmError {
    /// Create a type error
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    /// Create a reference error
    pub fn reference_error(msg: impl Into<String>) -> Self {
        Self::ReferenceError(msg.into())
    }

    /// Create a range error
    pub fn range_error(msg: impl Into<String>) -> Self {
        Self::RangeError(msg.into())
    }

    /// Create a syntax error
    pub fn syntax_error(msg: impl Into<String>) -> Self {
        Self::SyntaxError(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Create an error of the kind named by a `Raise` instruction
    pub fn raise(code: ErrorCode, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match code {
            ErrorCode::Error => Self::Error(msg),
            ErrorCode::Type => Self::TypeError(msg),
            ErrorCode::Reference => Self::ReferenceError(msg),
            ErrorCode::Range => Self::RangeError(msg),
            ErrorCode::Syntax => Self::SyntaxError(msg),
        }
    }

    /// Create an exception from a thrown JS value
    pub fn exception(value: Value) -> Self {
        let message = value.describe();
        Self::Exception(Box::new(ThrownValue { message, value }))
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Error(_) => ErrorKind::Error,
            Self::TypeError(_) => ErrorKind::Type,
            Self::ReferenceError(_) => ErrorKind::Reference,
            Self::RangeError(_) | Self::StackOverflow => ErrorKind::Range,
            Self::SyntaxError(_) => ErrorKind::Syntax,
            Self::Exception(_) => ErrorKind::User,
            Self::InternalError(_) | Self::Bytecode(_) => ErrorKind::Internal,
        }
    }

    /// Whether script `catch`/`finally` handlers may observe this error
    #[inline]
    pub fn is_catchable(&self) -> bool {
        self.kind() != ErrorKind::Internal
    }

    /// Error object kind used when this error is materialized for script
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self.kind() {
            ErrorKind::Error => Some(ErrorCode::Error),
            ErrorKind::Range => Some(ErrorCode::Range),
            ErrorKind::Type => Some(ErrorCode::Type),
            ErrorKind::Reference => Some(ErrorCode::Reference),
            ErrorKind::Syntax => Some(ErrorCode::Syntax),
            ErrorKind::User | ErrorKind::Internal => None,
        }
    }

    /// Message without the kind prefix
    pub fn message(&self) -> String {
        match self {
            Self::Error(m)
            | Self::TypeError(m)
            | Self::ReferenceError(m)
            | Self::RangeError(m)
            | Self::SyntaxError(m)
            | Self::InternalError(m) => m.clone(),
            Self::StackOverflow => "Maximum call stack size exceeded".to_string(),
            Self::Exception(thrown) => thrown.message.clone(),
            Self::Bytecode(e) => e.to_string(),
        }
    }

    /// The thrown value, for user exceptions
    pub fn thrown_value(&self) -> Option<&Value> {
        match self {
            Self::Exception(thrown) => Some(&thrown.value),
            _ => None,
        }
    }
}

/// Result type for VM operations
pub type VmResult<T> = std::result::Result<T, VmError>;

/// The single pending error of a context
///
/// Failing instructions report here; the unwinder takes the error back out
/// when it picks a handler or surfaces it to the host.
#[derive(Debug, Default)]
pub struct ErrorSlot {
    pending: Option<VmError>,
}

impl ErrorSlot {
    /// Record an error, replacing any earlier one
    pub fn report(&mut self, error: VmError) {
        if let Some(previous) = self.pending.replace(error) {
            tracing::trace!(%previous, "pending error overwritten");
        }
    }

    /// Take the pending error, clearing the slot
    #[inline]
    pub fn take(&mut self) -> Option<VmError> {
        self.pending.take()
    }

    /// Inspect the pending error
    #[inline]
    pub fn peek(&self) -> Option<&VmError> {
        self.pending.as_ref()
    }

    /// Whether an error is pending
    #[inline]
    pub fn is_set(&self) -> bool {
        self.pending.is_some()
    }
}
