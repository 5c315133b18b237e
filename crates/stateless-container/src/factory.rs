//! Instance construction.

use std::sync::{Arc, Weak};

use tracing::debug;

use crate::deployment::Deployment;
use crate::error::{BeanFailure, Error, Result};
use crate::instance::{InstanceContext, LifecycleCallbacks};
use crate::result::InvocationResult;
use crate::transaction::{TransactionManager, UserTransaction};

/// Builds ready-to-pool instance contexts.
pub trait InstanceFactory: Send + Sync {
    /// Creates and fully initializes a new context.
    fn create(&self) -> Result<Arc<InstanceContext>>;
}

/// Creates stateless bean instances: construct, `setSessionContext`, then
/// `ejbCreate`.
///
/// If any step fails the half-built instance is dropped without `ejbRemove`
/// and the failure is reported as [`Error::InstanceCreation`].
pub struct StatelessInstanceFactory {
    deployment: Weak<Deployment>,
    callbacks: Weak<dyn LifecycleCallbacks>,
    transactions: Arc<dyn TransactionManager>,
}

impl StatelessInstanceFactory {
    /// Creates a factory for `deployment` whose callbacks run through
    /// `callbacks`.
    pub fn new(
        deployment: &Arc<Deployment>,
        callbacks: Weak<dyn LifecycleCallbacks>,
        transactions: Arc<dyn TransactionManager>,
    ) -> Self {
        Self {
            deployment: Arc::downgrade(deployment),
            callbacks,
            transactions,
        }
    }
}

impl InstanceFactory for StatelessInstanceFactory {
    fn create(&self) -> Result<Arc<InstanceContext>> {
        let deployment = self
            .deployment
            .upgrade()
            .ok_or_else(|| Error::IllegalState("deployment has been dropped".into()))?;
        let creation_failed = |source: BeanFailure| Error::InstanceCreation {
            deployment: deployment.id().to_owned(),
            source,
        };

        let bean = deployment.bean_class().instantiate().map_err(creation_failed)?;
        let user_transaction = deployment
            .is_bean_managed_transaction()
            .then(|| UserTransaction::new(Arc::clone(&self.transactions)));
        let context = InstanceContext::new(&deployment, self.callbacks.clone(), bean, user_transaction);

        for step in [InstanceContext::set_context, InstanceContext::ejb_create] {
            let failure = match step(&context) {
                Ok(InvocationResult::Normal(_)) => continue,
                Ok(InvocationResult::Exception(error)) => creation_failed(BeanFailure::Declared(error)),
                Err(Error::System { source, .. }) => creation_failed(BeanFailure::Unchecked(source)),
                Err(error) => error,
            };
            context.abandon();
            return Err(failure);
        }

        debug!(deployment = %deployment.id(), instance = %context.id(), "instance initialized");
        Ok(context)
    }
}
