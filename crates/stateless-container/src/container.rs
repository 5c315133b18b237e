//! The stateless container: composition root of the invocation pipeline.
//!
//! A [`StatelessContainer`] owns two interceptor chains, composed once from
//! its [`ContainerConfig`] and collaborators:
//!
//! ```text
//! business (outermost first)              callback (outermost first)
//! ─────────────────────────               ──────────────────────────
//! default-subject                         [identity-delegation]
//! system-exception-logging                [connection-tracking]
//! [no-connection-enlisting]               component-context
//! transaction-policy                      handler-chain
//! transaction-context                     callback-dispatcher
//! instance-pool
//! [policy-context]
//! run-as
//! [permission-check]
//! [identity-delegation]
//! [connection-tracking]
//! component-context
//! handler-chain
//! bean-dispatcher
//! ```
//!
//! Bracketed links are present only when configured. The callback chain has
//! no pooling, transaction or authorization links: callbacks run on a
//! context the caller already owns.
//!
//! # Example
//!
//! ```rust
//! use stateless_container::{BeanClass, Deployment, Invocation, StatelessContainer, Value};
//!
//! let class = BeanClass::builder("Calculator", || Ok(()))
//!     .method("add", 2, |_, args| {
//!         let sum = args.iter().filter_map(Value::as_int).sum::<i64>();
//!         Ok(Value::Int(sum))
//!     })
//!     .build();
//! let deployment = Deployment::builder("Calculator", class).build().unwrap();
//!
//! let container = StatelessContainer::builder().build();
//! container.deploy(&deployment).unwrap();
//!
//! let add = deployment.bean_class().methods().locate("add", 2).unwrap();
//! let mut invocation = Invocation::business(deployment.clone(), add, vec![Value::Int(2), Value::Int(3)]);
//! let result = container.invoke(&mut invocation).unwrap();
//! assert_eq!(result.value(), Some(&Value::Int(5)));
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use fxhash::FxHashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::bean::MethodIndex;
use crate::config::ContainerConfig;
use crate::connector::ConnectionTracker;
use crate::deployment::Deployment;
use crate::error::{Error, Result};
use crate::factory::StatelessInstanceFactory;
use crate::instance::{InstanceContext, LifecycleCallbacks};
use crate::interceptor::{Chain, ChainBuilder};
use crate::interceptors::{
    ComponentContextInterceptor, ConnectionTrackingInterceptor, DefaultSubjectInterceptor, HandlerChainInterceptor,
    IdentityDelegationInterceptor, NoConnectionEnlistingInterceptor, PermissionCheckInterceptor,
    PolicyContextHandlerInterceptor, RunAsInterceptor, StatelessBeanDispatcher, StatelessCallbackInterceptor,
    StatelessInstanceInterceptor, SystemExceptionInterceptor, TransactionContextInterceptor,
    TransactionPolicyInterceptor,
};
use crate::invocation::{CallbackKind, Invocation, Timer};
use crate::pool::InstancePool;
use crate::result::InvocationResult;
use crate::security::{DeclaredRoles, SecurityService, Subject};
use crate::thread_context;
use crate::tracker::{InvocationTracker, ThreadInvocationTracker};
use crate::transaction::{ThreadTransactionManager, TransactionManager};
use crate::value::Value;

/// Runs stateless session beans.
pub struct StatelessContainer {
    this: Weak<StatelessContainer>,
    config: ContainerConfig,
    transactions: Arc<dyn TransactionManager>,
    tracker: Arc<dyn InvocationTracker>,
    business: Chain,
    callbacks: Chain,
    deployments: RwLock<FxHashMap<String, Arc<Deployment>>>,
}

impl StatelessContainer {
    /// Starts configuring a container.
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::default()
    }

    /// Returns the composition settings.
    #[inline]
    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Returns the transaction manager the chains demarcate with.
    #[inline]
    pub fn transaction_manager(&self) -> &Arc<dyn TransactionManager> {
        &self.transactions
    }

    /// Returns the invocation tracker.
    #[inline]
    pub fn invocation_tracker(&self) -> &Arc<dyn InvocationTracker> {
        &self.tracker
    }

    /// Business chain link names, innermost first.
    pub fn business_layers(&self) -> &[&'static str] {
        self.business.layers()
    }

    /// Callback chain link names, innermost first.
    pub fn callback_layers(&self) -> &[&'static str] {
        self.callbacks.layers()
    }

    // ========================================================================
    // Deployment
    // ========================================================================

    /// Deploys a bean: creates its pool, pre-fills it to `min_size` and
    /// starts its sweeper when the pool configuration needs one.
    pub fn deploy(&self, deployment: &Arc<Deployment>) -> Result<()> {
        let id = deployment.id().to_owned();
        let mut deployments = self.deployments.write();
        if deployments.contains_key(&id) {
            return Err(Error::IllegalState(format!("'{id}' is already deployed")));
        }

        let callbacks: Weak<dyn LifecycleCallbacks> = self.this.clone();
        let factory = StatelessInstanceFactory::new(deployment, callbacks, Arc::clone(&self.transactions));
        let pool = Arc::new(InstancePool::new(id.clone(), *deployment.pool_config(), Arc::new(factory)));
        deployment.install_pool(Arc::clone(&pool))?;
        deployments.insert(id.clone(), Arc::clone(deployment));
        drop(deployments);

        let filled = pool.fill();
        let sweeping = pool.start();
        debug!(deployment = %id, filled, sweeping, "deployed");
        Ok(())
    }

    /// Undeploys a bean: closes its pool, destroys idle instances and waits
    /// up to the pool's close timeout for checked-out ones.
    pub fn undeploy(&self, deployment_id: &str) -> Result<()> {
        let deployment = self
            .deployments
            .write()
            .remove(deployment_id)
            .ok_or_else(|| Error::IllegalState(format!("'{deployment_id}' is not deployed")))?;

        if let Some(pool) = deployment.take_pool() {
            let destroyed = pool.close();
            debug!(deployment = %deployment_id, destroyed, "undeployed");
        }
        Ok(())
    }

    /// Returns a deployed bean by id.
    pub fn deployment(&self, deployment_id: &str) -> Option<Arc<Deployment>> {
        self.deployments.read().get(deployment_id).cloned()
    }

    /// Ids of all deployed beans, sorted.
    pub fn deployment_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.deployments.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    // ========================================================================
    // Invocation
    // ========================================================================

    /// Threads a business invocation through the business chain.
    pub fn invoke(&self, invocation: &mut Invocation) -> Result<InvocationResult> {
        if let Some(kind) = invocation.callback_kind() {
            return Err(Error::IllegalState(format!(
                "callback {} cannot be invoked as a business call",
                kind.as_str()
            )));
        }
        self.business.invoke(invocation)
    }

    /// Delivers a timer expiration to `method`.
    ///
    /// The deployment's context loader is installed for the duration of the
    /// call. Faults are logged and swallowed; `None` means the call faulted.
    pub fn timeout(
        &self,
        deployment: &Arc<Deployment>,
        id: Option<Value>,
        timer: Timer,
        method: MethodIndex,
    ) -> Option<InvocationResult> {
        let _loader = deployment
            .context_loader()
            .map(|loader| thread_context::enter_context_loader(Some(loader.clone())));

        let timer_id = timer.id();
        let mut invocation = Invocation::timeout(Arc::clone(deployment), id, timer, method);
        match self.business.invoke(&mut invocation) {
            Ok(result) => Some(result),
            Err(fault) => {
                warn!(deployment = %deployment.id(), timer = timer_id, %fault, "timer callback failed");
                None
            }
        }
    }

    /// Delivers `setSessionContext` through the callback chain.
    pub fn set_context(&self, context: &Arc<InstanceContext>) -> Result<InvocationResult> {
        self.callback(context, CallbackKind::SetContext)
    }

    /// Delivers `ejbCreate` through the callback chain.
    pub fn ejb_create(&self, context: &Arc<InstanceContext>) -> Result<InvocationResult> {
        self.callback(context, CallbackKind::Create)
    }

    /// Delivers `ejbRemove` through the callback chain.
    pub fn ejb_remove(&self, context: &Arc<InstanceContext>) -> Result<InvocationResult> {
        self.callback(context, CallbackKind::Remove)
    }

    fn callback(&self, context: &Arc<InstanceContext>, kind: CallbackKind) -> Result<InvocationResult> {
        if kind != CallbackKind::Remove && context.is_dead() {
            return Err(Error::IllegalState(format!(
                "cannot deliver {} to dead {}",
                kind.as_str(),
                context.id()
            )));
        }
        let deployment = context.deployment().ok_or_else(|| {
            Error::IllegalState(format!(
                "deployment '{}' of {} has been dropped",
                context.deployment_id(),
                context.id()
            ))
        })?;

        let mut invocation = Invocation::callback(deployment, kind, Arc::clone(context));
        self.callbacks.invoke(&mut invocation)
    }
}

impl LifecycleCallbacks for StatelessContainer {
    fn set_context(&self, context: &Arc<InstanceContext>) -> Result<InvocationResult> {
        StatelessContainer::set_context(self, context)
    }

    fn ejb_create(&self, context: &Arc<InstanceContext>) -> Result<InvocationResult> {
        StatelessContainer::ejb_create(self, context)
    }

    fn ejb_remove(&self, context: &Arc<InstanceContext>) -> Result<InvocationResult> {
        StatelessContainer::ejb_remove(self, context)
    }
}

impl fmt::Debug for StatelessContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatelessContainer")
            .field("config", &self.config)
            .field("business", &self.business)
            .field("callbacks", &self.callbacks)
            .field("deployments", &self.deployment_ids())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Configures and composes a [`StatelessContainer`].
#[derive(Default)]
pub struct ContainerBuilder {
    config: ContainerConfig,
    transactions: Option<Arc<dyn TransactionManager>>,
    tracker: Option<Arc<dyn InvocationTracker>>,
    security: Option<Arc<dyn SecurityService>>,
    connections: Option<Arc<dyn ConnectionTracker>>,
}

impl ContainerBuilder {
    /// Replaces all composition settings.
    #[must_use]
    pub fn config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self
    }

    /// Enables the permission-check link.
    #[must_use]
    pub fn security_enabled(mut self, enabled: bool) -> Self {
        self.config.security_enabled = enabled;
        self
    }

    /// Enables the identity-delegation link.
    #[must_use]
    pub fn do_as_current_caller(mut self, enabled: bool) -> Self {
        self.config.do_as_current_caller = enabled;
        self
    }

    /// Enables the policy-context-handler link.
    #[must_use]
    pub fn use_context_handler(mut self, enabled: bool) -> Self {
        self.config.use_context_handler = enabled;
        self
    }

    /// Sets the subject for invocations that arrive without one.
    #[must_use]
    pub fn default_subject(mut self, subject: Subject) -> Self {
        self.config.default_subject = subject;
        self
    }

    /// Uses `manager` for transaction demarcation.
    #[must_use]
    pub fn transaction_manager(mut self, manager: Arc<dyn TransactionManager>) -> Self {
        self.transactions = Some(manager);
        self
    }

    /// Uses `tracker` for current-invocation bookkeeping.
    #[must_use]
    pub fn invocation_tracker(mut self, tracker: Arc<dyn InvocationTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Uses `service` for permission checks.
    #[must_use]
    pub fn security_service(mut self, service: Arc<dyn SecurityService>) -> Self {
        self.security = Some(service);
        self
    }

    /// Adds the connection-tracking links, driven by `tracker`.
    #[must_use]
    pub fn connection_tracker(mut self, tracker: Arc<dyn ConnectionTracker>) -> Self {
        self.connections = Some(tracker);
        self
    }

    /// Composes both chains and returns the container.
    pub fn build(self) -> Arc<StatelessContainer> {
        let config = self.config;
        let transactions = self
            .transactions
            .unwrap_or_else(|| Arc::new(ThreadTransactionManager::new()));
        let tracker = self
            .tracker
            .unwrap_or_else(|| Arc::new(ThreadInvocationTracker));
        let security = self.security.unwrap_or_else(|| Arc::new(DeclaredRoles));
        let connections = self.connections;

        let business = ChainBuilder::new(StatelessBeanDispatcher)
            .wrap(HandlerChainInterceptor::new)
            .wrap(ComponentContextInterceptor::new)
            .wrap_some(connections.clone(), ConnectionTrackingInterceptor::new)
            .wrap_if(config.do_as_current_caller, IdentityDelegationInterceptor::new)
            .wrap_some(config.security_enabled.then_some(security), PermissionCheckInterceptor::new)
            .wrap(RunAsInterceptor::new)
            .wrap_if(config.use_context_handler, PolicyContextHandlerInterceptor::new)
            .wrap(|next| StatelessInstanceInterceptor::new(next, Arc::clone(&tracker)))
            .wrap(|next| TransactionContextInterceptor::new(next, Arc::clone(&transactions)))
            .wrap(|next| TransactionPolicyInterceptor::new(next, Arc::clone(&transactions)))
            .wrap_some(connections.clone(), NoConnectionEnlistingInterceptor::new)
            .wrap(SystemExceptionInterceptor::new)
            .wrap(|next| DefaultSubjectInterceptor::new(next, config.default_subject.clone()))
            .build();

        let callbacks = ChainBuilder::new(StatelessCallbackInterceptor::new())
            .wrap(HandlerChainInterceptor::new)
            .wrap(ComponentContextInterceptor::new)
            .wrap_some(connections, ConnectionTrackingInterceptor::new)
            .wrap_if(config.do_as_current_caller, IdentityDelegationInterceptor::new)
            .build();

        Arc::new_cyclic(|this| StatelessContainer {
            this: this.clone(),
            config,
            transactions,
            tracker,
            business,
            callbacks,
            deployments: RwLock::new(FxHashMap::default()),
        })
    }
}
