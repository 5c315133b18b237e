//! Invocation outcomes.
//!
//! A chain returns `Result<InvocationResult>`: the `Err` side carries faults
//! (system failures, container errors), while the `Ok` side separates normal
//! completion from a declared exception the bean raised on purpose.

use crate::error::{ApplicationError, BeanFailure, Error, Result};
use crate::value::Value;

/// Outcome of an invocation that did not fault.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationResult {
    /// The method returned normally.
    Normal(Value),
    /// The method raised a declared exception.
    Exception(ApplicationError),
}

impl InvocationResult {
    /// Normal completion with no value; the usual outcome of a lifecycle callback.
    pub const NULL: InvocationResult = InvocationResult::Normal(Value::Null);

    /// Returns `true` for a declared-exception outcome.
    #[inline]
    pub fn is_exception(&self) -> bool {
        matches!(self, InvocationResult::Exception(_))
    }

    /// Returns the normal value, if any.
    pub fn value(&self) -> Option<&Value> {
        match self {
            InvocationResult::Normal(value) => Some(value),
            InvocationResult::Exception(_) => None,
        }
    }

    /// Returns the declared exception, if any.
    pub fn exception(&self) -> Option<&ApplicationError> {
        match self {
            InvocationResult::Normal(_) => None,
            InvocationResult::Exception(error) => Some(error),
        }
    }

    /// Converts into a plain `Result`, as a caller of the business method sees it.
    pub fn into_result(self) -> std::result::Result<Value, ApplicationError> {
        match self {
            InvocationResult::Normal(value) => Ok(value),
            InvocationResult::Exception(error) => Err(error),
        }
    }
}

impl From<Value> for InvocationResult {
    fn from(value: Value) -> Self {
        InvocationResult::Normal(value)
    }
}

/// Applies the reflective-boundary rule to a bean method outcome.
///
/// Declared exceptions are recovered into [`InvocationResult::Exception`];
/// unchecked failures become [`Error::System`] faults.
pub(crate) fn translate(deployment: &str, outcome: std::result::Result<Value, BeanFailure>) -> Result<InvocationResult> {
    match outcome {
        Ok(value) => Ok(InvocationResult::Normal(value)),
        Err(BeanFailure::Declared(error)) => Ok(InvocationResult::Exception(error)),
        Err(BeanFailure::Unchecked(source)) => Err(Error::System {
            deployment: deployment.to_owned(),
            source,
        }),
    }
}
