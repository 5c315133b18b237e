//! Transaction links.
//!
//! [`TransactionPolicyInterceptor`] demarcates according to the method's
//! transaction attribute (container-managed) or isolates the bean's own
//! transactions (bean-managed). [`TransactionContextInterceptor`], just
//! inside it, records which transaction the call ended up in.

use std::sync::Arc;

use tracing::warn;

use crate::deployment::{Deployment, TransactionAttribute};
use crate::error::{Error, Result};
use crate::interceptor::Interceptor;
use crate::invocation::{AttributeKey, Invocation};
use crate::result::InvocationResult;
use crate::transaction::{TransactionData, TransactionId, TransactionManager};
use crate::value::Value;

fn attribute_of(deployment: &Deployment, invocation: &Invocation) -> TransactionAttribute {
    invocation
        .method_name()
        .map(|method| deployment.transaction_attribute(method))
        .unwrap_or_default()
}

/// Records the call's transaction on the invocation.
pub struct TransactionContextInterceptor {
    next: Arc<dyn Interceptor>,
    manager: Arc<dyn TransactionManager>,
}

impl TransactionContextInterceptor {
    /// Wraps `next`.
    pub fn new(next: Arc<dyn Interceptor>, manager: Arc<dyn TransactionManager>) -> Self {
        Self { next, manager }
    }
}

impl Interceptor for TransactionContextInterceptor {
    fn invoke(&self, invocation: &mut Invocation) -> Result<InvocationResult> {
        let deployment = Arc::clone(invocation.deployment());
        let data = TransactionData {
            attribute: (!deployment.is_bean_managed_transaction())
                .then(|| attribute_of(&deployment, invocation)),
            transaction: self.manager.current(),
        };

        let previous = invocation.set_attribute(AttributeKey::TransactionData, Value::object(data));
        let outcome = self.next.invoke(invocation);
        match previous {
            Some(previous) => invocation.set_attribute(AttributeKey::TransactionData, previous),
            None => invocation.remove_attribute(AttributeKey::TransactionData),
        };
        outcome
    }

    fn name(&self) -> &'static str {
        "transaction-context"
    }
}

/// Applies transaction demarcation around the call.
pub struct TransactionPolicyInterceptor {
    next: Arc<dyn Interceptor>,
    manager: Arc<dyn TransactionManager>,
}

impl TransactionPolicyInterceptor {
    /// Wraps `next`.
    pub fn new(next: Arc<dyn Interceptor>, manager: Arc<dyn TransactionManager>) -> Self {
        Self { next, manager }
    }

    fn container_managed(&self, deployment: &Deployment, invocation: &mut Invocation) -> Result<InvocationResult> {
        let attribute = attribute_of(deployment, invocation);
        let caller = self.manager.current();

        let (suspended, join_caller) = match attribute {
            TransactionAttribute::Required | TransactionAttribute::Supports => (None, caller.is_some()),
            TransactionAttribute::RequiresNew | TransactionAttribute::NotSupported => {
                (self.manager.suspend(), false)
            }
            TransactionAttribute::Mandatory => {
                if caller.is_none() {
                    return Err(Error::Transaction(format!(
                        "'{}' requires a caller transaction ({attribute})",
                        deployment.id()
                    )));
                }
                (None, true)
            }
            TransactionAttribute::Never => {
                if let Some(caller) = caller {
                    return Err(Error::Transaction(format!(
                        "'{}' must not be called within {caller} ({attribute})",
                        deployment.id()
                    )));
                }
                (None, false)
            }
        };

        let begin = matches!(attribute, TransactionAttribute::RequiresNew)
            || (attribute == TransactionAttribute::Required && caller.is_none());
        if begin {
            if let Err(error) = self.manager.begin() {
                self.resume(suspended);
                return Err(error);
            }
        }

        let outcome = self.next.invoke(invocation);
        let outcome = if begin {
            self.complete(outcome)
        } else {
            if join_caller && outcome.is_err() {
                if let Err(error) = self.manager.set_rollback_only() {
                    warn!(deployment = %deployment.id(), %error, "could not mark caller transaction rollback-only");
                }
            }
            outcome
        };

        self.resume(suspended);
        outcome
    }

    /// Ends a transaction this link began.
    ///
    /// Faults roll back; normal and declared-exception outcomes commit.
    fn complete(&self, outcome: Result<InvocationResult>) -> Result<InvocationResult> {
        match outcome {
            Err(fault) => {
                if let Err(error) = self.manager.rollback() {
                    warn!(%error, "rollback after fault failed");
                }
                Err(fault)
            }
            Ok(result) => self.manager.commit().map(|()| result),
        }
    }

    fn bean_managed(&self, deployment: &Deployment, invocation: &mut Invocation) -> Result<InvocationResult> {
        let suspended = self.manager.suspend();
        let mut outcome = self.next.invoke(invocation);

        if let Some(leftover) = self.manager.current() {
            warn!(deployment = %deployment.id(), transaction = %leftover, "bean returned without completing its transaction");
            if let Err(error) = self.manager.rollback() {
                warn!(deployment = %deployment.id(), %error, "rollback of unfinished transaction failed");
            }
            if outcome.is_ok() {
                outcome = Err(Error::Transaction(format!(
                    "stateless bean '{}' returned without completing {leftover}",
                    deployment.id()
                )));
            }
        }

        self.resume(suspended);
        outcome
    }

    fn resume(&self, suspended: Option<TransactionId>) {
        if let Some(transaction) = suspended {
            if let Err(error) = self.manager.resume(transaction) {
                warn!(%transaction, %error, "could not resume suspended transaction");
            }
        }
    }
}

impl Interceptor for TransactionPolicyInterceptor {
    fn invoke(&self, invocation: &mut Invocation) -> Result<InvocationResult> {
        let deployment = Arc::clone(invocation.deployment());
        if deployment.is_bean_managed_transaction() {
            self.bean_managed(&deployment, invocation)
        } else {
            self.container_managed(&deployment, invocation)
        }
    }

    fn name(&self) -> &'static str {
        "transaction-policy"
    }
}
