//! System-exception logging link.

use std::sync::Arc;

use tracing::error;

use crate::error::Result;
use crate::interceptor::Interceptor;
use crate::invocation::Invocation;
use crate::result::InvocationResult;

/// Logs every fault that reaches it and passes it on unchanged.
pub struct SystemExceptionInterceptor {
    next: Arc<dyn Interceptor>,
}

impl SystemExceptionInterceptor {
    /// Wraps `next`.
    pub fn new(next: Arc<dyn Interceptor>) -> Self {
        Self { next }
    }
}

impl Interceptor for SystemExceptionInterceptor {
    fn invoke(&self, invocation: &mut Invocation) -> Result<InvocationResult> {
        self.next.invoke(invocation).inspect_err(|fault| {
            error!(
                deployment = %invocation.deployment().id(),
                kind = %invocation.kind(),
                system = fault.is_system(),
                %fault,
                "invocation failed"
            );
        })
    }

    fn name(&self) -> &'static str {
        "system-exception-logging"
    }
}
