//! Identity and authorization links.
//!
//! Subjects flow through thread-scoped slots: the default-subject link
//! installs the caller, the delegation and run-as links derive the
//! identities used for outbound calls, and the permission check consults
//! the configured [`SecurityService`].

use std::sync::Arc;

use tracing::debug;

use crate::error::{ApplicationError, Result};
use crate::interceptor::Interceptor;
use crate::invocation::{Invocation, InvocationKind};
use crate::result::InvocationResult;
use crate::security::{SecurityService, Subject};
use crate::thread_context;

/// Declared exception type of a denied call.
pub const ACCESS_DENIED: &str = "EJBAccessException";

/// Makes sure every invocation runs as some subject.
///
/// Uses the invocation's own subject, else the run-as identity of a calling
/// bean on this thread, else the configured default.
pub struct DefaultSubjectInterceptor {
    next: Arc<dyn Interceptor>,
    default_subject: Subject,
}

impl DefaultSubjectInterceptor {
    /// Wraps `next`.
    pub fn new(next: Arc<dyn Interceptor>, default_subject: Subject) -> Self {
        Self { next, default_subject }
    }
}

impl Interceptor for DefaultSubjectInterceptor {
    fn invoke(&self, invocation: &mut Invocation) -> Result<InvocationResult> {
        let subject = invocation
            .subject()
            .cloned()
            .or_else(thread_context::run_as)
            .unwrap_or_else(|| self.default_subject.clone());
        invocation.set_subject(Some(subject.clone()));

        let _caller = thread_context::enter_caller(Some(subject));
        self.next.invoke(invocation)
    }

    fn name(&self) -> &'static str {
        "default-subject"
    }
}

/// Propagates the caller's identity as the delegated identity.
pub struct IdentityDelegationInterceptor {
    next: Arc<dyn Interceptor>,
}

impl IdentityDelegationInterceptor {
    /// Wraps `next`.
    pub fn new(next: Arc<dyn Interceptor>) -> Self {
        Self { next }
    }
}

impl Interceptor for IdentityDelegationInterceptor {
    fn invoke(&self, invocation: &mut Invocation) -> Result<InvocationResult> {
        let _do_as = thread_context::enter_do_as(thread_context::caller());
        self.next.invoke(invocation)
    }

    fn name(&self) -> &'static str {
        "identity-delegation"
    }
}

/// Rejects business calls the caller is not permitted to make.
///
/// Timer callbacks originate in the container and are not checked.
pub struct PermissionCheckInterceptor {
    next: Arc<dyn Interceptor>,
    security: Arc<dyn SecurityService>,
}

impl PermissionCheckInterceptor {
    /// Wraps `next`.
    pub fn new(next: Arc<dyn Interceptor>, security: Arc<dyn SecurityService>) -> Self {
        Self { next, security }
    }
}

impl Interceptor for PermissionCheckInterceptor {
    fn invoke(&self, invocation: &mut Invocation) -> Result<InvocationResult> {
        if let InvocationKind::Business(_) = invocation.kind() {
            let subject = invocation.subject().cloned().or_else(thread_context::caller);
            let method = invocation.method_name().unwrap_or_default();
            let deployment = invocation.deployment();

            if !self
                .security
                .is_caller_authorized(deployment, method, subject.as_ref())
            {
                let principal = subject
                    .as_ref()
                    .map_or("<none>", Subject::principal)
                    .to_owned();
                debug!(deployment = %deployment.id(), method, %principal, "access denied");
                return Ok(InvocationResult::Exception(ApplicationError::new(
                    ACCESS_DENIED,
                    format!("'{principal}' is not permitted to invoke '{method}' on '{}'", deployment.id()),
                )));
            }
        }
        self.next.invoke(invocation)
    }

    fn name(&self) -> &'static str {
        "permission-check"
    }
}

/// Installs the identity the bean uses for outbound calls.
///
/// The deployment's run-as subject if it declares one, else the caller.
pub struct RunAsInterceptor {
    next: Arc<dyn Interceptor>,
}

impl RunAsInterceptor {
    /// Wraps `next`.
    pub fn new(next: Arc<dyn Interceptor>) -> Self {
        Self { next }
    }
}

impl Interceptor for RunAsInterceptor {
    fn invoke(&self, invocation: &mut Invocation) -> Result<InvocationResult> {
        let run_as = invocation
            .deployment()
            .run_as()
            .cloned()
            .or_else(thread_context::caller);
        let _run_as = thread_context::enter_run_as(run_as);
        self.next.invoke(invocation)
    }

    fn name(&self) -> &'static str {
        "run-as"
    }
}

/// Installs the deployment's JACC policy context id.
pub struct PolicyContextHandlerInterceptor {
    next: Arc<dyn Interceptor>,
}

impl PolicyContextHandlerInterceptor {
    /// Wraps `next`.
    pub fn new(next: Arc<dyn Interceptor>) -> Self {
        Self { next }
    }
}

impl Interceptor for PolicyContextHandlerInterceptor {
    fn invoke(&self, invocation: &mut Invocation) -> Result<InvocationResult> {
        let policy = invocation
            .deployment()
            .policy_context_id()
            .map(str::to_owned)
            .or_else(|| Some(invocation.deployment().id().to_owned()));
        let _policy = thread_context::enter_policy_context(policy);
        self.next.invoke(invocation)
    }

    fn name(&self) -> &'static str {
        "policy-context"
    }
}
