//! Instance pooling link.
//!
//! Checks an instance context out of the deployment's pool for the duration
//! of one business call and guarantees it is either returned (`exit`) or
//! destroyed (`die`) afterwards. Only faults destroy the instance; a
//! declared exception result leaves it healthy and poolable.
//!
//! A strict pool that stays exhausted for the whole access timeout is a busy
//! bean, not a broken container: the caller gets a declared
//! [`ACCESS_TIMEOUT`] exception and its transaction is left alone.

use std::sync::Arc;

use tracing::{debug, error};

use crate::error::{ApplicationError, Error, Result};
use crate::interceptor::Interceptor;
use crate::invocation::Invocation;
use crate::result::InvocationResult;
use crate::tracker::InvocationTracker;

/// Declared exception type of a call that found no free instance in time.
pub const ACCESS_TIMEOUT: &str = "ConcurrentAccessTimeoutException";

/// Borrows an instance from the pool around the rest of the chain.
pub struct StatelessInstanceInterceptor {
    next: Arc<dyn Interceptor>,
    tracker: Arc<dyn InvocationTracker>,
}

impl StatelessInstanceInterceptor {
    /// Wraps `next`, reporting each call to `tracker`.
    pub fn new(next: Arc<dyn Interceptor>, tracker: Arc<dyn InvocationTracker>) -> Self {
        Self { next, tracker }
    }
}

impl Interceptor for StatelessInstanceInterceptor {
    fn invoke(&self, invocation: &mut Invocation) -> Result<InvocationResult> {
        let deployment = Arc::clone(invocation.deployment());
        let pool = deployment
            .pool()
            .ok_or_else(|| Error::NoInstancePool(deployment.id().to_owned()))?;

        let context = match pool.acquire() {
            Ok(context) => context,
            Err(Error::AccessTimeout { deployment: id, waited }) => {
                debug!(deployment = %id, ?waited, "no free instance, reporting access timeout");
                return Ok(InvocationResult::Exception(ApplicationError::new(
                    ACCESS_TIMEOUT,
                    format!("no instance of '{id}' became available within {waited:?}"),
                )));
            }
            Err(error) => return Err(error),
        };
        context.set_pool(&pool);

        if !context.has_instance() || context.is_in_call() {
            error!(
                deployment = %deployment.id(),
                instance = %context.id(),
                has_instance = context.has_instance(),
                in_call = context.is_in_call(),
                "pool handed out an unusable instance"
            );
            context.die();
            return Err(Error::IllegalState(format!(
                "pool for '{}' handed out unusable {}",
                deployment.id(),
                context.id()
            )));
        }

        invocation.set_instance(Some(Arc::clone(&context)));
        context.set_message_context(invocation.message_context());

        let record = match self.tracker.begin_invocation(&context) {
            Ok(record) => record,
            Err(error) => {
                invocation.set_instance(None);
                context.set_message_context(None);
                context.die();
                return Err(error);
            }
        };

        let outcome = self.next.invoke(invocation);
        if outcome.is_err() {
            context.die();
        }

        self.tracker.end_invocation(record);
        invocation.set_instance(None);
        context.set_message_context(None);

        if outcome.is_ok() {
            context.exit();
        }
        outcome
    }

    fn name(&self) -> &'static str {
        "instance-pool"
    }
}
