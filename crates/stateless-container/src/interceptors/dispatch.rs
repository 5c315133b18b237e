//! Terminal links: business dispatcher and callback dispatcher.

use std::sync::Arc;

use fxhash::FxHashMap;

use crate::error::{Error, Result};
use crate::interceptor::Interceptor;
use crate::invocation::{CallbackKind, Invocation, InvocationKind};
use crate::operation::Operation;
use crate::operations::{EjbCreateMethod, RemoveMethod, SetSessionContextOperation, VirtualOperation};
use crate::result::{self, InvocationResult};

/// Invokes the targeted business (or timeout) method on the bound instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatelessBeanDispatcher;

impl Interceptor for StatelessBeanDispatcher {
    fn invoke(&self, invocation: &mut Invocation) -> Result<InvocationResult> {
        let (index, operation) = match invocation.kind() {
            InvocationKind::Business(index) => (index, Operation::Business),
            InvocationKind::Timeout(index) => (index, Operation::Timeout),
            InvocationKind::Callback(kind) => {
                return Err(Error::IllegalState(format!(
                    "callback {} routed to the business dispatcher",
                    kind.as_str()
                )));
            }
        };

        let deployment = invocation.deployment();
        let method = deployment
            .bean_class()
            .methods()
            .get(index)
            .ok_or_else(|| Error::MethodNotFound {
                deployment: deployment.id().to_owned(),
                index: index.0,
            })?;
        let context = invocation.instance().ok_or_else(|| {
            Error::IllegalState(format!("no instance bound for '{}'", deployment.id()))
        })?;

        let _guard = context.enter_operation(operation);
        let outcome = context.with_bean(|bean| method.call(bean, invocation.arguments()))?;
        result::translate(deployment.id(), outcome)
    }

    fn name(&self) -> &'static str {
        "bean-dispatcher"
    }
}

/// Routes callback invocations to their virtual operation.
pub struct StatelessCallbackInterceptor {
    operations: FxHashMap<CallbackKind, Arc<dyn VirtualOperation>>,
}

impl StatelessCallbackInterceptor {
    /// Creates the dispatcher with the three stateless lifecycle operations.
    pub fn new() -> Self {
        Self::with_operations([
            Arc::new(SetSessionContextOperation) as Arc<dyn VirtualOperation>,
            Arc::new(EjbCreateMethod),
            Arc::new(RemoveMethod),
        ])
    }

    /// Creates a dispatcher over an explicit set of operations.
    pub fn with_operations<I>(operations: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn VirtualOperation>>,
    {
        Self {
            operations: operations
                .into_iter()
                .map(|operation| (operation.callback(), operation))
                .collect(),
        }
    }

    /// Returns `true` if `kind` has an operation.
    pub fn routes(&self, kind: CallbackKind) -> bool {
        self.operations.contains_key(&kind)
    }
}

impl Default for StatelessCallbackInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Interceptor for StatelessCallbackInterceptor {
    fn invoke(&self, invocation: &mut Invocation) -> Result<InvocationResult> {
        let operation = invocation
            .callback_kind()
            .and_then(|kind| self.operations.get(&kind))
            .cloned()
            .ok_or_else(|| Error::UnknownCallback {
                deployment: invocation.deployment().id().to_owned(),
                kind: invocation.kind().to_string(),
            })?;
        operation.execute(invocation)
    }

    fn name(&self) -> &'static str {
        "callback-dispatcher"
    }
}
