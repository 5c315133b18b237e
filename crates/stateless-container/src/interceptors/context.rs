//! Naming and connection-tracking links.

use std::sync::Arc;

use crate::connector::ConnectionTracker;
use crate::error::Result;
use crate::interceptor::Interceptor;
use crate::invocation::Invocation;
use crate::result::InvocationResult;
use crate::thread_context;

/// Installs the deployment's ENC on the calling thread.
pub struct ComponentContextInterceptor {
    next: Arc<dyn Interceptor>,
}

impl ComponentContextInterceptor {
    /// Wraps `next`.
    pub fn new(next: Arc<dyn Interceptor>) -> Self {
        Self { next }
    }
}

impl Interceptor for ComponentContextInterceptor {
    fn invoke(&self, invocation: &mut Invocation) -> Result<InvocationResult> {
        let context = Arc::clone(invocation.deployment().component_context());
        let _scope = thread_context::enter_component_context(Some(context));
        self.next.invoke(invocation)
    }

    fn name(&self) -> &'static str {
        "component-context"
    }
}

/// Tracks resource-adapter connections opened during the call.
pub struct ConnectionTrackingInterceptor {
    next: Arc<dyn Interceptor>,
    tracker: Arc<dyn ConnectionTracker>,
}

impl ConnectionTrackingInterceptor {
    /// Wraps `next`.
    pub fn new(next: Arc<dyn Interceptor>, tracker: Arc<dyn ConnectionTracker>) -> Self {
        Self { next, tracker }
    }
}

impl Interceptor for ConnectionTrackingInterceptor {
    fn invoke(&self, invocation: &mut Invocation) -> Result<InvocationResult> {
        let instance = invocation.instance().map(|context| context.id());
        let state = self.tracker.enter(invocation.deployment().id(), instance);
        let outcome = self.next.invoke(invocation);
        self.tracker.exit(state);
        outcome
    }

    fn name(&self) -> &'static str {
        "connection-tracking"
    }
}

/// Suspends connection enlisting while transaction demarcation runs.
pub struct NoConnectionEnlistingInterceptor {
    next: Arc<dyn Interceptor>,
    tracker: Arc<dyn ConnectionTracker>,
}

impl NoConnectionEnlistingInterceptor {
    /// Wraps `next`.
    pub fn new(next: Arc<dyn Interceptor>, tracker: Arc<dyn ConnectionTracker>) -> Self {
        Self { next, tracker }
    }
}

impl Interceptor for NoConnectionEnlistingInterceptor {
    fn invoke(&self, invocation: &mut Invocation) -> Result<InvocationResult> {
        let previous = self.tracker.set_enlisting(false);
        let outcome = self.next.invoke(invocation);
        self.tracker.set_enlisting(previous);
        outcome
    }

    fn name(&self) -> &'static str {
        "no-connection-enlisting"
    }
}
