//! Lifecycle virtual operations.
//!
//! Each operation performs one lifecycle action against the bean instance
//! bound to a callback invocation: mark the instance's operation, locate the
//! callback in the method table, call it, and reset the marker. A bean that
//! does not declare the callback simply completes normally.

use std::sync::Arc;

use crate::bean::{EJB_CREATE, EJB_REMOVE, SET_SESSION_CONTEXT};
use crate::error::{Error, Result};
use crate::invocation::{CallbackKind, Invocation};
use crate::operation::Operation;
use crate::result::{self, InvocationResult};
use crate::value::Value;

/// A single lifecycle action run by the callback dispatcher.
pub trait VirtualOperation: Send + Sync {
    /// The callback kind this operation serves.
    fn callback(&self) -> CallbackKind;

    /// Runs the action against the invocation's bound instance.
    fn execute(&self, invocation: &mut Invocation) -> Result<InvocationResult>;
}

fn run_callback(
    invocation: &Invocation,
    operation: Operation,
    method_name: &str,
    arguments: &[Value],
) -> Result<InvocationResult> {
    let deployment = invocation.deployment();
    let context = invocation.instance().ok_or_else(|| {
        Error::IllegalState(format!(
            "{method_name} invoked without an instance context on '{}'",
            deployment.id()
        ))
    })?;

    let Some(method) = deployment
        .bean_class()
        .methods()
        .find(method_name, arguments.len())
    else {
        return Ok(InvocationResult::NULL);
    };

    let _guard = context.enter_operation(operation);
    let outcome = context.with_bean(|bean| method.call(bean, arguments))?;
    result::translate(deployment.id(), outcome)
}

/// Delivers `setSessionContext(SessionContext)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetSessionContextOperation;

impl VirtualOperation for SetSessionContextOperation {
    fn callback(&self) -> CallbackKind {
        CallbackKind::SetContext
    }

    fn execute(&self, invocation: &mut Invocation) -> Result<InvocationResult> {
        let session = invocation
            .instance()
            .map(|context| Value::shared(Arc::clone(context.session_context())))
            .unwrap_or_default();
        run_callback(invocation, Operation::SetContext, SET_SESSION_CONTEXT, &[session])
    }
}

/// Delivers `ejbCreate()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EjbCreateMethod;

impl VirtualOperation for EjbCreateMethod {
    fn callback(&self) -> CallbackKind {
        CallbackKind::Create
    }

    fn execute(&self, invocation: &mut Invocation) -> Result<InvocationResult> {
        run_callback(invocation, Operation::EjbCreate, EJB_CREATE, &[])
    }
}

/// Delivers `ejbRemove()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveMethod;

impl VirtualOperation for RemoveMethod {
    fn callback(&self) -> CallbackKind {
        CallbackKind::Remove
    }

    fn execute(&self, invocation: &mut Invocation) -> Result<InvocationResult> {
        run_callback(invocation, Operation::EjbRemove, EJB_REMOVE, &[])
    }
}
