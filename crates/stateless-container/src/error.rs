//! Error types for the stateless container.
//!
//! Failures are split along the line the whole invocation pipeline is built
//! around:
//!
//! - [`ApplicationError`] is a *declared* exception. A bean method or lifecycle
//!   callback raises it as part of its documented contract. It never travels
//!   up the chain as a fault; the reflective boundary turns it into an
//!   [`InvocationResult`](crate::InvocationResult) carrying the exception.
//! - [`SystemError`] is an *unchecked* failure (runtime exception, error, or a
//!   panic caught at the reflective boundary). It becomes [`Error::System`] and
//!   propagates as a fault, destroying the instance that raised it.
//! - [`Error`] is everything the container itself can fail with.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// A declared (checked) exception raised by bean code.
///
/// Carries a type name (`"CreateException"`, `"InsufficientFundsException"`),
/// a message and an optional cause, mirroring an exception cause chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationError {
    kind: String,
    message: String,
    cause: Option<Box<ApplicationError>>,
}

impl ApplicationError {
    /// Creates a declared exception of the given type.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            cause: None,
        }
    }

    /// Attaches a cause to this exception.
    #[must_use]
    pub fn with_cause(mut self, cause: ApplicationError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the exception type name.
    #[inline]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the exception message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the direct cause, if any.
    #[inline]
    pub fn cause(&self) -> Option<&ApplicationError> {
        self.cause.as_deref()
    }

    /// Returns `true` if this exception or anything in its cause chain has
    /// the given type name.
    pub fn caused_by(&self, kind: &str) -> bool {
        let mut current = Some(self);
        while let Some(error) = current {
            if error.kind == kind {
                return true;
            }
            current = error.cause();
        }
        false
    }
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ApplicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

/// An unchecked failure raised by bean code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct SystemError {
    kind: String,
    message: String,
}

impl SystemError {
    /// Creates an unchecked failure of the given type.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a `RuntimeException`.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new("RuntimeException", message)
    }

    /// Failure produced when bean code panics.
    pub(crate) fn panic(message: impl Into<String>) -> Self {
        Self::new("Panic", message)
    }

    /// Returns the failure type name.
    #[inline]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the failure message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// How a bean method (business or lifecycle) can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BeanFailure {
    /// A declared exception; recovered into an `InvocationResult`.
    #[error("declared exception {0}")]
    Declared(#[source] ApplicationError),

    /// An unchecked failure; propagated as a fault.
    #[error("unchecked failure {0}")]
    Unchecked(#[source] SystemError),
}

impl From<ApplicationError> for BeanFailure {
    fn from(error: ApplicationError) -> Self {
        BeanFailure::Declared(error)
    }
}

impl From<SystemError> for BeanFailure {
    fn from(error: SystemError) -> Self {
        BeanFailure::Unchecked(error)
    }
}

/// Result type returned by bean methods.
pub type BeanResult<T> = std::result::Result<T, BeanFailure>;

/// Faults raised by the container.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Bean code raised an unchecked failure.
    #[error("system exception in '{deployment}': {source}")]
    System {
        /// Deployment whose bean failed.
        deployment: String,
        /// The failure raised by the bean.
        #[source]
        source: SystemError,
    },

    /// A lifecycle or pool operation was attempted in the wrong state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The invocation targets a deployment that has no instance pool.
    #[error("deployment '{0}' has no instance pool")]
    NoInstancePool(String),

    /// No instance became available within the access timeout.
    #[error("no instances available in pool for '{deployment}', waited {waited:?}")]
    AccessTimeout {
        /// Deployment whose pool was exhausted.
        deployment: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The pool was closed while (or before) acquiring.
    #[error("instance pool for '{0}' is closed")]
    PoolClosed(String),

    /// A fresh instance could not be constructed or initialized.
    #[error("cannot obtain a free instance of '{deployment}'")]
    InstanceCreation {
        /// Deployment whose instance failed to initialize.
        deployment: String,
        /// What went wrong during construction or initialization.
        #[source]
        source: BeanFailure,
    },

    /// The method index does not exist in the deployment's method table.
    #[error("method index {index} not found in '{deployment}'")]
    MethodNotFound {
        /// Deployment that was targeted.
        deployment: String,
        /// The missing method index.
        index: usize,
    },

    /// A callback dispatcher received an invocation it cannot route.
    #[error("unknown callback for '{deployment}': {kind}")]
    UnknownCallback {
        /// Deployment that was targeted.
        deployment: String,
        /// Description of the unroutable invocation.
        kind: String,
    },

    /// Transaction demarcation failed.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// A web-service handler failed outside of fault handling.
    #[error("handler chain error: {0}")]
    HandlerChain(String),

    /// The container that owns an instance has been dropped.
    #[error("container is no longer available")]
    ContainerUnavailable,

    /// Invalid container or pool configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Returns the declared exception somewhere in this fault's source chain.
    pub fn application_cause(&self) -> Option<&ApplicationError> {
        match self {
            Error::InstanceCreation {
                source: BeanFailure::Declared(error),
                ..
            } => Some(error),
            _ => None,
        }
    }

    /// Returns `true` if this fault wraps an unchecked bean failure.
    pub fn is_system(&self) -> bool {
        matches!(self, Error::System { .. })
    }
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, Error>;
