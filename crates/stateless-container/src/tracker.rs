//! Current-invocation bookkeeping.
//!
//! The pooling interceptor registers the instance it checked out as "the
//! current invocation target" before delegating, and restores whatever was
//! current before once the call is over. A bean that calls another bean (or
//! its own deployment) on the same thread therefore nests cleanly.

use std::cell::RefCell;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::instance::InstanceContext;

thread_local! {
    static CURRENT_INSTANCE: RefCell<Option<Arc<InstanceContext>>> = const { RefCell::new(None) };
}

/// What `begin_invocation` displaced; handed back to `end_invocation`.
#[derive(Debug)]
pub struct InvocationRecord {
    /// The context the call runs on.
    pub context: Arc<InstanceContext>,
    /// The context that was current before the call.
    pub previous: Option<Arc<InstanceContext>>,
}

/// Begin/end bookkeeping around each business call.
pub trait InvocationTracker: Send + Sync {
    /// Marks `context` in-call and makes it current.
    fn begin_invocation(&self, context: &Arc<InstanceContext>) -> Result<InvocationRecord>;

    /// Clears the in-call mark and restores the previous current context.
    fn end_invocation(&self, record: InvocationRecord);

    /// Returns the context the calling thread is currently running.
    fn current(&self) -> Option<Arc<InstanceContext>>;
}

/// Tracks the current instance in a thread-local slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadInvocationTracker;

impl InvocationTracker for ThreadInvocationTracker {
    fn begin_invocation(&self, context: &Arc<InstanceContext>) -> Result<InvocationRecord> {
        if context.mark_in_call(true) {
            return Err(Error::IllegalState(format!(
                "{} is already in a call",
                context.id()
            )));
        }
        let previous = CURRENT_INSTANCE.with(|current| current.replace(Some(Arc::clone(context))));
        Ok(InvocationRecord {
            context: Arc::clone(context),
            previous,
        })
    }

    fn end_invocation(&self, record: InvocationRecord) {
        record.context.mark_in_call(false);
        CURRENT_INSTANCE.with(|current| *current.borrow_mut() = record.previous);
    }

    fn current(&self) -> Option<Arc<InstanceContext>> {
        CURRENT_INSTANCE.with(|current| current.borrow().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bean::BeanClass;
    use crate::deployment::Deployment;
    use crate::instance::LifecycleCallbacks;
    use crate::result::InvocationResult;

    struct NoCallbacks;

    impl LifecycleCallbacks for NoCallbacks {
        fn set_context(&self, _: &Arc<InstanceContext>) -> Result<InvocationResult> {
            Ok(InvocationResult::NULL)
        }
        fn ejb_create(&self, _: &Arc<InstanceContext>) -> Result<InvocationResult> {
            Ok(InvocationResult::NULL)
        }
        fn ejb_remove(&self, _: &Arc<InstanceContext>) -> Result<InvocationResult> {
            Ok(InvocationResult::NULL)
        }
    }

    #[test]
    fn test_nested_invocations_restore_outer() {
        let class = BeanClass::builder("Nested", || Ok(())).build();
        let deployment = Deployment::builder("Nested", class).build().expect("deployment");
        let callbacks: Arc<dyn LifecycleCallbacks> = Arc::new(NoCallbacks);
        let x = InstanceContext::new(&deployment, Arc::downgrade(&callbacks), Box::new(()), None);
        let y = InstanceContext::new(&deployment, Arc::downgrade(&callbacks), Box::new(()), None);
        let tracker = ThreadInvocationTracker;

        let outer = tracker.begin_invocation(&x).expect("outer");
        assert!(x.is_in_call());
        {
            let inner = tracker.begin_invocation(&y).expect("inner");
            assert_eq!(tracker.current().map(|c| c.id()), Some(y.id()));
            tracker.end_invocation(inner);
        }
        assert_eq!(tracker.current().map(|c| c.id()), Some(x.id()));
        assert!(!y.is_in_call());

        assert!(matches!(tracker.begin_invocation(&x), Err(Error::IllegalState(_))));
        tracker.end_invocation(outer);
        assert!(tracker.current().is_none());
        assert!(!x.is_in_call());
    }
}
