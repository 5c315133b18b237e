//! Deployment records.
//!
//! A [`Deployment`] is everything deployment processing produced for one
//! stateless bean: its class and method table, transaction and security
//! metadata, naming context, and, once deployed into a container, its
//! instance pool.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use fxhash::FxHashMap;
use parking_lot::RwLock;

use crate::bean::BeanClass;
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::interceptors::HandlerChainFactory;
use crate::naming::ComponentContext;
use crate::pool::InstancePool;
use crate::security::Subject;
use crate::thread_context::ContextLoader;

/// Container-managed transaction attribute of a business method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionAttribute {
    /// Join the caller's transaction or begin one.
    #[default]
    Required,
    /// Always begin a new transaction, suspending the caller's.
    RequiresNew,
    /// Fail unless the caller has a transaction.
    Mandatory,
    /// Run in the caller's transaction, if any.
    Supports,
    /// Run with the caller's transaction suspended.
    NotSupported,
    /// Fail if the caller has a transaction.
    Never,
}

impl TransactionAttribute {
    /// Returns the attribute name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransactionAttribute::Required => "Required",
            TransactionAttribute::RequiresNew => "RequiresNew",
            TransactionAttribute::Mandatory => "Mandatory",
            TransactionAttribute::Supports => "Supports",
            TransactionAttribute::NotSupported => "NotSupported",
            TransactionAttribute::Never => "Never",
        }
    }
}

impl fmt::Display for TransactionAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionAttribute {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let attribute = match s.trim().to_ascii_lowercase().as_str() {
            "required" => TransactionAttribute::Required,
            "requiresnew" | "requires_new" => TransactionAttribute::RequiresNew,
            "mandatory" => TransactionAttribute::Mandatory,
            "supports" => TransactionAttribute::Supports,
            "notsupported" | "not_supported" => TransactionAttribute::NotSupported,
            "never" => TransactionAttribute::Never,
            _ => return Err(Error::Config(format!("unknown transaction attribute '{s}'"))),
        };
        Ok(attribute)
    }
}

/// One deployed stateless bean.
pub struct Deployment {
    id: String,
    bean_class: BeanClass,
    bean_managed_transactions: bool,
    default_transaction_attribute: TransactionAttribute,
    transaction_attributes: FxHashMap<String, TransactionAttribute>,
    method_permissions: FxHashMap<String, Vec<String>>,
    run_as: Option<Subject>,
    handler_chain: Option<Arc<dyn HandlerChainFactory>>,
    component_context: Arc<ComponentContext>,
    context_loader: Option<ContextLoader>,
    policy_context_id: Option<String>,
    pool_config: PoolConfig,
    pool: RwLock<Option<Arc<InstancePool>>>,
}

impl Deployment {
    /// Starts describing a deployment of `bean_class`.
    pub fn builder(id: impl Into<String>, bean_class: BeanClass) -> DeploymentBuilder {
        DeploymentBuilder {
            id: id.into(),
            bean_class,
            bean_managed_transactions: false,
            default_transaction_attribute: TransactionAttribute::default(),
            transaction_attributes: FxHashMap::default(),
            method_permissions: FxHashMap::default(),
            run_as: None,
            handler_chain: None,
            component_context: ComponentContext::new(),
            context_loader: None,
            policy_context_id: None,
            pool_config: PoolConfig::default(),
        }
    }

    /// Returns the deployment id.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the bean class.
    #[inline]
    pub fn bean_class(&self) -> &BeanClass {
        &self.bean_class
    }

    /// Returns `true` if the bean demarcates its own transactions.
    #[inline]
    pub fn is_bean_managed_transaction(&self) -> bool {
        self.bean_managed_transactions
    }

    /// Returns the container-managed transaction attribute of a method.
    pub fn transaction_attribute(&self, method: &str) -> TransactionAttribute {
        self.transaction_attributes
            .get(method)
            .copied()
            .unwrap_or(self.default_transaction_attribute)
    }

    /// Returns the roles allowed to call `method`, or `None` if unchecked.
    ///
    /// A `*` entry applies to methods without their own entry.
    pub fn method_permissions(&self, method: &str) -> Option<&[String]> {
        self.method_permissions
            .get(method)
            .or_else(|| self.method_permissions.get("*"))
            .map(Vec::as_slice)
    }

    /// Returns the run-as identity.
    #[inline]
    pub fn run_as(&self) -> Option<&Subject> {
        self.run_as.as_ref()
    }

    /// Returns the web-service handler chain configuration.
    #[inline]
    pub fn handler_chain(&self) -> Option<&Arc<dyn HandlerChainFactory>> {
        self.handler_chain.as_ref()
    }

    /// Returns the component naming context.
    #[inline]
    pub fn component_context(&self) -> &Arc<ComponentContext> {
        &self.component_context
    }

    /// Returns the loader the bean's code runs under.
    #[inline]
    pub fn context_loader(&self) -> Option<&ContextLoader> {
        self.context_loader.as_ref()
    }

    /// Returns the JACC policy context id.
    #[inline]
    pub fn policy_context_id(&self) -> Option<&str> {
        self.policy_context_id.as_deref()
    }

    /// Returns the pool configuration.
    #[inline]
    pub fn pool_config(&self) -> &PoolConfig {
        &self.pool_config
    }

    /// Returns the instance pool, present while deployed.
    pub fn pool(&self) -> Option<Arc<InstancePool>> {
        self.pool.read().clone()
    }

    pub(crate) fn install_pool(&self, pool: Arc<InstancePool>) -> Result<()> {
        let mut slot = self.pool.write();
        if slot.is_some() {
            return Err(Error::IllegalState(format!(
                "deployment '{}' is already deployed",
                self.id
            )));
        }
        *slot = Some(pool);
        Ok(())
    }

    pub(crate) fn take_pool(&self) -> Option<Arc<InstancePool>> {
        self.pool.write().take()
    }
}

impl fmt::Debug for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deployment")
            .field("id", &self.id)
            .field("bean_class", &self.bean_class.name())
            .field("bean_managed_transactions", &self.bean_managed_transactions)
            .field("pool_config", &self.pool_config)
            .field("deployed", &self.pool.read().is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Deployment`].
pub struct DeploymentBuilder {
    id: String,
    bean_class: BeanClass,
    bean_managed_transactions: bool,
    default_transaction_attribute: TransactionAttribute,
    transaction_attributes: FxHashMap<String, TransactionAttribute>,
    method_permissions: FxHashMap<String, Vec<String>>,
    run_as: Option<Subject>,
    handler_chain: Option<Arc<dyn HandlerChainFactory>>,
    component_context: ComponentContext,
    context_loader: Option<ContextLoader>,
    policy_context_id: Option<String>,
    pool_config: PoolConfig,
}

impl DeploymentBuilder {
    /// Marks the bean as demarcating its own transactions.
    #[must_use]
    pub fn bean_managed_transactions(mut self, bean_managed: bool) -> Self {
        self.bean_managed_transactions = bean_managed;
        self
    }

    /// Sets the attribute for methods without their own.
    #[must_use]
    pub fn default_transaction_attribute(mut self, attribute: TransactionAttribute) -> Self {
        self.default_transaction_attribute = attribute;
        self
    }

    /// Sets the transaction attribute of one method (all overloads).
    #[must_use]
    pub fn transaction_attribute(mut self, method: impl Into<String>, attribute: TransactionAttribute) -> Self {
        self.transaction_attributes.insert(method.into(), attribute);
        self
    }

    /// Restricts `method` (or `*`) to the given roles.
    #[must_use]
    pub fn method_permission<I, R>(mut self, method: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        self.method_permissions
            .entry(method.into())
            .or_default()
            .extend(roles.into_iter().map(Into::into));
        self
    }

    /// Sets the run-as identity.
    #[must_use]
    pub fn run_as(mut self, subject: Subject) -> Self {
        self.run_as = Some(subject);
        self
    }

    /// Configures the web-service handler chain.
    #[must_use]
    pub fn handler_chain(mut self, factory: Arc<dyn HandlerChainFactory>) -> Self {
        self.handler_chain = Some(factory);
        self
    }

    /// Sets the component naming context.
    #[must_use]
    pub fn component_context(mut self, context: ComponentContext) -> Self {
        self.component_context = context;
        self
    }

    /// Sets the loader the bean's code runs under.
    #[must_use]
    pub fn context_loader(mut self, loader: ContextLoader) -> Self {
        self.context_loader = Some(loader);
        self
    }

    /// Sets the JACC policy context id.
    #[must_use]
    pub fn policy_context_id(mut self, id: impl Into<String>) -> Self {
        self.policy_context_id = Some(id.into());
        self
    }

    /// Sets the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Validates and finishes the deployment.
    pub fn build(self) -> Result<Arc<Deployment>> {
        if self.id.is_empty() {
            return Err(Error::Config("deployment id must not be empty".into()));
        }
        self.pool_config.validate()?;

        Ok(Arc::new(Deployment {
            id: self.id,
            bean_class: self.bean_class,
            bean_managed_transactions: self.bean_managed_transactions,
            default_transaction_attribute: self.default_transaction_attribute,
            transaction_attributes: self.transaction_attributes,
            method_permissions: self.method_permissions,
            run_as: self.run_as,
            handler_chain: self.handler_chain,
            component_context: Arc::new(self.component_context),
            context_loader: self.context_loader,
            policy_context_id: self.policy_context_id,
            pool_config: self.pool_config,
            pool: RwLock::new(None),
        }))
    }
}
