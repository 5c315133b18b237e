//! Per-instance operation markers.

use std::fmt;

use crate::instance::InstanceContext;

/// What an instance context is doing right now.
///
/// Set for the duration of a single callback or business call and reset to
/// [`Operation::Inactive`] afterwards, whatever the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Operation {
    /// Pooled or idle; no bean code is running.
    #[default]
    Inactive,
    /// Running `setSessionContext`.
    SetContext,
    /// Running `ejbCreate`.
    EjbCreate,
    /// Running a business method.
    Business,
    /// Running a timer callback.
    Timeout,
    /// Running `ejbRemove`.
    EjbRemove,
}

impl Operation {
    /// Returns the marker name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Operation::Inactive => "INACTIVE",
            Operation::SetContext => "SETCONTEXT",
            Operation::EjbCreate => "EJBCREATE",
            Operation::Business => "BUSINESS",
            Operation::Timeout => "TIMEOUT",
            Operation::EjbRemove => "EJBREMOVE",
        }
    }

    /// Returns `true` while a lifecycle callback (not a business call) runs.
    pub const fn is_callback(&self) -> bool {
        matches!(
            self,
            Operation::SetContext | Operation::EjbCreate | Operation::EjbRemove
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resets an instance's operation marker to [`Operation::Inactive`] on drop.
///
/// Returned by [`InstanceContext::enter_operation`]; the reset happens on
/// every exit path, including faults and caught panics.
#[must_use = "the operation marker is reset as soon as the guard is dropped"]
pub struct OperationGuard<'a> {
    context: &'a InstanceContext,
}

impl<'a> OperationGuard<'a> {
    pub(crate) fn new(context: &'a InstanceContext) -> Self {
        Self { context }
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.context.set_operation(Operation::Inactive);
    }
}
