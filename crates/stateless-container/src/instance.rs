//! Instance contexts.
//!
//! An [`InstanceContext`] wraps exactly one bean instance and carries its
//! lifecycle state:
//!
//! ```text
//!   created ──set_context──► ejb_create ──exit──► pooled ◄──┐
//!                                                   │       │
//!                                                acquire   exit
//!                                                   ▼       │
//!                                              checked out ─┘
//!                                                   │
//!                                                  die ──► destroyed
//! ```
//!
//! Lifecycle callbacks are not run directly: the context hands itself to its
//! container's callback chain through [`LifecycleCallbacks`], so callbacks
//! see the same naming and security context as business calls do.
//!
//! # Ownership
//!
//! Contexts refer to their deployment, container and pool weakly. The pool
//! owns idle contexts, an invocation owns a checked-out one, and nothing
//! points back up strongly, so undeploying or dropping the container frees
//! the whole graph.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::bean::BeanInstance;
use crate::deployment::Deployment;
use crate::error::{Error, Result};
use crate::invocation::MessageContext;
use crate::naming::ComponentContext;
use crate::operation::{Operation, OperationGuard};
use crate::pool::InstancePool;
use crate::result::InvocationResult;
use crate::security::Subject;
use crate::thread_context;
use crate::transaction::UserTransaction;
use crate::value::Value;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an instance context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

impl InstanceId {
    fn next() -> Self {
        InstanceId(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance-{}", self.0)
    }
}

/// Runs lifecycle callbacks against an instance context.
///
/// Implemented by the container, which threads each call through its
/// callback chain.
pub trait LifecycleCallbacks: Send + Sync {
    /// Delivers `setSessionContext`.
    fn set_context(&self, context: &Arc<InstanceContext>) -> Result<InvocationResult>;

    /// Delivers `ejbCreate`.
    fn ejb_create(&self, context: &Arc<InstanceContext>) -> Result<InvocationResult>;

    /// Delivers `ejbRemove`.
    fn ejb_remove(&self, context: &Arc<InstanceContext>) -> Result<InvocationResult>;
}

#[derive(Debug, Default)]
struct ContextState {
    operation: Operation,
    pool: Option<Weak<InstancePool>>,
    dead: bool,
    in_call: bool,
}

/// Per-instance state wrapper.
pub struct InstanceContext {
    id: InstanceId,
    deployment: Weak<Deployment>,
    deployment_id: String,
    callbacks: Weak<dyn LifecycleCallbacks>,
    bean: Mutex<Option<BeanInstance>>,
    state: Mutex<ContextState>,
    message_context: Mutex<Option<Arc<MessageContext>>>,
    session_context: Arc<SessionContext>,
}

impl InstanceContext {
    /// Wraps a freshly constructed bean.
    ///
    /// `user_transaction` is handed to bean-managed beans through their
    /// session context.
    pub(crate) fn new(
        deployment: &Arc<Deployment>,
        callbacks: Weak<dyn LifecycleCallbacks>,
        bean: BeanInstance,
        user_transaction: Option<UserTransaction>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| InstanceContext {
            id: InstanceId::next(),
            deployment: Arc::downgrade(deployment),
            deployment_id: deployment.id().to_owned(),
            callbacks,
            bean: Mutex::new(Some(bean)),
            state: Mutex::new(ContextState::default()),
            message_context: Mutex::new(None),
            session_context: Arc::new(SessionContext {
                instance: this.clone(),
                deployment_id: deployment.id().to_owned(),
                component_context: Arc::clone(deployment.component_context()),
                user_transaction,
            }),
        })
    }

    /// Returns the context id.
    #[inline]
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Returns the id of the owning deployment.
    #[inline]
    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    /// Returns the owning deployment, if it is still alive.
    pub fn deployment(&self) -> Option<Arc<Deployment>> {
        self.deployment.upgrade()
    }

    /// Returns the session context handed to the bean.
    #[inline]
    pub fn session_context(&self) -> &Arc<SessionContext> {
        &self.session_context
    }

    /// Returns the current operation marker.
    pub fn operation(&self) -> Operation {
        self.state.lock().operation
    }

    pub(crate) fn set_operation(&self, operation: Operation) {
        self.state.lock().operation = operation;
    }

    /// Sets the operation marker until the returned guard is dropped.
    pub fn enter_operation(&self, operation: Operation) -> OperationGuard<'_> {
        self.set_operation(operation);
        OperationGuard::new(self)
    }

    /// Returns `true` once the context has been destroyed.
    pub fn is_dead(&self) -> bool {
        self.state.lock().dead
    }

    /// Returns `true` while an invocation is running on this context.
    pub fn is_in_call(&self) -> bool {
        self.state.lock().in_call
    }

    /// Sets the in-call flag, returning its previous value.
    ///
    /// Driven by the invocation tracker's begin/end bookkeeping.
    pub fn mark_in_call(&self, in_call: bool) -> bool {
        std::mem::replace(&mut self.state.lock().in_call, in_call)
    }

    /// Returns `true` while the context still holds a bean instance.
    pub fn has_instance(&self) -> bool {
        self.bean.lock().is_some()
    }

    /// Records the pool this context was acquired from.
    pub fn set_pool(&self, pool: &Arc<InstancePool>) {
        self.state.lock().pool = Some(Arc::downgrade(pool));
    }

    /// Returns `true` while a pool back-reference is recorded.
    pub fn is_pool_bound(&self) -> bool {
        self.state.lock().pool.is_some()
    }

    /// Returns the message context attached for the current call.
    pub fn message_context(&self) -> Option<Arc<MessageContext>> {
        self.message_context.lock().clone()
    }

    /// Attaches (or clears) the message context for the current call.
    pub fn set_message_context(&self, context: Option<Arc<MessageContext>>) {
        *self.message_context.lock() = context;
    }

    /// Runs `f` against the bean instance.
    pub(crate) fn with_bean<R>(&self, f: impl FnOnce(&mut (dyn Any + Send)) -> R) -> Result<R> {
        let mut bean = self.bean.lock();
        let bean = bean
            .as_mut()
            .ok_or_else(|| Error::IllegalState(format!("{} has no bean instance", self.id)))?;
        Ok(f(bean.as_mut()))
    }

    fn callbacks(&self) -> Result<Arc<dyn LifecycleCallbacks>> {
        self.callbacks.upgrade().ok_or(Error::ContainerUnavailable)
    }

    fn ensure_alive(&self, callback: &str) -> Result<()> {
        if self.is_dead() {
            return Err(Error::IllegalState(format!(
                "cannot run {callback} on dead {}",
                self.id
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Lifecycle transitions
    // ========================================================================

    /// Delivers `setSessionContext`. Fails on a dead context.
    pub fn set_context(self: &Arc<Self>) -> Result<InvocationResult> {
        self.ensure_alive("setSessionContext")?;
        self.callbacks()?.set_context(self)
    }

    /// Delivers `ejbCreate`. Fails on a dead context.
    pub fn ejb_create(self: &Arc<Self>) -> Result<InvocationResult> {
        self.ensure_alive("ejbCreate")?;
        self.callbacks()?.ejb_create(self)
    }

    /// Delivers `ejbRemove`.
    pub fn ejb_remove(self: &Arc<Self>) -> Result<InvocationResult> {
        self.callbacks()?.ejb_remove(self)
    }

    /// Destroys the context: removes it from its pool for good and runs
    /// `ejbRemove` best-effort. Calling it again is a no-op.
    pub fn die(self: &Arc<Self>) {
        let pool = {
            let mut state = self.state.lock();
            if std::mem::replace(&mut state.dead, true) {
                return;
            }
            state.pool.take()
        };

        if let Some(pool) = pool.and_then(|pool| pool.upgrade()) {
            pool.remove(self);
        }
        debug!(deployment = %self.deployment_id, instance = %self.id, "instance died");
        self.destroy();
    }

    /// Returns the context to the pool it was acquired from.
    ///
    /// Without a pool back-reference this only resets the operation marker.
    /// If the pool declines the instance (overdraw surplus, stale version,
    /// closed pool) the instance is destroyed instead.
    pub fn exit(self: &Arc<Self>) {
        let pool = {
            let mut state = self.state.lock();
            state.operation = Operation::Inactive;
            state.pool.take()
        };

        let Some(pool) = pool.and_then(|pool| pool.upgrade()) else {
            return;
        };
        if !pool.release(self) {
            self.discard();
        }
    }

    /// Destroys a context the pool has already let go of.
    pub(crate) fn discard(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if std::mem::replace(&mut state.dead, true) {
                return;
            }
            state.pool = None;
        }
        self.destroy();
    }

    /// Drops a context whose initialization failed, without `ejbRemove`.
    pub(crate) fn abandon(&self) {
        self.state.lock().dead = true;
        self.bean.lock().take();
    }

    fn destroy(self: &Arc<Self>) {
        match self.ejb_remove() {
            Ok(InvocationResult::Normal(_)) => {}
            Ok(InvocationResult::Exception(error)) => {
                warn!(deployment = %self.deployment_id, instance = %self.id, %error, "ejbRemove raised an exception");
            }
            Err(error) => {
                warn!(deployment = %self.deployment_id, instance = %self.id, %error, "ejbRemove failed");
            }
        }
        self.bean.lock().take();
        self.message_context.lock().take();
    }
}

impl fmt::Debug for InstanceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InstanceContext")
            .field("id", &self.id)
            .field("deployment", &self.deployment_id)
            .field("operation", &state.operation)
            .field("dead", &state.dead)
            .field("in_call", &state.in_call)
            .field("pooled", &state.pool.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Session context
// ============================================================================

/// The bean's view of its container, passed to `setSessionContext`.
pub struct SessionContext {
    instance: Weak<InstanceContext>,
    deployment_id: String,
    component_context: Arc<ComponentContext>,
    user_transaction: Option<UserTransaction>,
}

impl SessionContext {
    /// Returns the id of the bean's deployment.
    #[inline]
    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    /// Returns what the bean instance is currently doing.
    pub fn current_operation(&self) -> Operation {
        self.instance
            .upgrade()
            .map_or(Operation::Inactive, |instance| instance.operation())
    }

    /// Returns the caller's subject.
    ///
    /// Not available from lifecycle callbacks, which have no caller.
    pub fn caller_subject(&self) -> Result<Option<Subject>> {
        let operation = self.current_operation();
        if operation.is_callback() {
            return Err(Error::IllegalState(format!(
                "caller subject is not available during {operation}"
            )));
        }
        Ok(thread_context::caller())
    }

    /// Returns `true` if the caller holds `role`.
    pub fn is_caller_in_role(&self, role: &str) -> Result<bool> {
        Ok(self
            .caller_subject()?
            .is_some_and(|subject| subject.has_role(role)))
    }

    /// Returns the web-service message context of the current call.
    pub fn message_context(&self) -> Option<Arc<MessageContext>> {
        self.instance
            .upgrade()
            .and_then(|instance| instance.message_context())
    }

    /// Resolves a name in the bean's environment.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.component_context.lookup(name)
    }

    /// Returns the bean-managed transaction handle.
    ///
    /// Container-managed beans have none; bean-managed beans cannot use it
    /// from `setSessionContext`.
    pub fn user_transaction(&self) -> Result<&UserTransaction> {
        let user_transaction = self.user_transaction.as_ref().ok_or_else(|| {
            Error::IllegalState(format!(
                "'{}' uses container-managed transactions",
                self.deployment_id
            ))
        })?;
        if self.current_operation() == Operation::SetContext {
            return Err(Error::IllegalState(
                "user transaction is not available during SETCONTEXT".into(),
            ));
        }
        Ok(user_transaction)
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("deployment_id", &self.deployment_id)
            .field("bean_managed", &self.user_transaction.is_some())
            .finish_non_exhaustive()
    }
}
