//! Web-service handler chain link.
//!
//! Only active when the invocation carries a [`MessageContext`] and the
//! deployment configures a handler chain. The chain sees the request before
//! the bean, the response or fault after it, and may veto the call.

use std::sync::Arc;

use tracing::warn;

use crate::error::{ApplicationError, Result};
use crate::interceptor::Interceptor;
use crate::invocation::{Invocation, MessageContext};
use crate::result::InvocationResult;

/// Declared exception type produced when a handler fails.
pub const HANDLER_FAULT: &str = "SOAPFaultException";

/// A configured chain of message handlers, created per call.
pub trait HandlerChain: Send {
    /// Runs request handlers; `false` stops processing.
    fn handle_request(&mut self, context: &MessageContext) -> Result<bool>;

    /// Runs response handlers; `false` stops processing.
    fn handle_response(&mut self, context: &MessageContext) -> Result<bool>;

    /// Runs fault handlers; `false` stops processing.
    fn handle_fault(&mut self, context: &MessageContext) -> Result<bool>;

    /// Tears the chain down. Always called, whatever the outcome.
    fn destroy(&mut self);
}

/// Creates handler chains for a deployment.
pub trait HandlerChainFactory: Send + Sync {
    /// Builds a fresh chain for one call.
    fn create(&self) -> Result<Box<dyn HandlerChain>>;
}

/// Runs the deployment's handler chain around the rest of the chain.
pub struct HandlerChainInterceptor {
    next: Arc<dyn Interceptor>,
}

impl HandlerChainInterceptor {
    /// Wraps `next`.
    pub fn new(next: Arc<dyn Interceptor>) -> Self {
        Self { next }
    }

    fn run(
        &self,
        chain: &mut dyn HandlerChain,
        message: &MessageContext,
        invocation: &mut Invocation,
    ) -> Result<InvocationResult> {
        match chain.handle_request(message) {
            Ok(true) => {}
            Ok(false) => return Ok(InvocationResult::NULL),
            Err(error) => return Ok(handler_fault(chain, message, error.to_string())),
        }

        match self.next.invoke(invocation) {
            Ok(InvocationResult::Normal(value)) => match chain.handle_response(message) {
                Ok(_) => Ok(InvocationResult::Normal(value)),
                Err(error) => Ok(handler_fault(chain, message, error.to_string())),
            },
            Ok(InvocationResult::Exception(declared)) => {
                report_fault(chain, message, declared.to_string());
                Ok(InvocationResult::Exception(declared))
            }
            Err(fault) => {
                report_fault(chain, message, fault.to_string());
                Err(fault)
            }
        }
    }
}

fn report_fault(chain: &mut dyn HandlerChain, message: &MessageContext, fault: String) {
    message.set_fault(fault);
    if let Err(error) = chain.handle_fault(message) {
        warn!(%error, "fault handler failed");
    }
}

fn handler_fault(chain: &mut dyn HandlerChain, message: &MessageContext, fault: String) -> InvocationResult {
    report_fault(chain, message, fault.clone());
    InvocationResult::Exception(ApplicationError::new(HANDLER_FAULT, fault))
}

impl Interceptor for HandlerChainInterceptor {
    fn invoke(&self, invocation: &mut Invocation) -> Result<InvocationResult> {
        let Some(message) = invocation.message_context() else {
            return self.next.invoke(invocation);
        };
        let Some(factory) = invocation.deployment().handler_chain().cloned() else {
            return self.next.invoke(invocation);
        };

        let mut chain = factory.create()?;
        let outcome = self.run(chain.as_mut(), &message, invocation);
        chain.destroy();
        outcome
    }

    fn name(&self) -> &'static str {
        "handler-chain"
    }
}
