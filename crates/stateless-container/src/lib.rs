//! `stateless-container`: a stateless session bean container.
//!
//! The container hosts *stateless* beans: interchangeable, pooled instances
//! that carry no conversational state between calls. Every request is an
//! [`Invocation`] threaded through an ordered chain of [`Interceptor`]s, each
//! adding one cross-cutting concern before the bean method runs:
//!
//! - **Instance Pooling** with bounded, optionally strict pools and reuse
//! - **Lifecycle Callbacks** (`setSessionContext`, `ejbCreate`, `ejbRemove`)
//!   delivered through their own chain
//! - **Transaction Demarcation** for container- and bean-managed transactions
//! - **Security Propagation** of caller, run-as and do-as identities
//! - **Fault Containment**: declared exceptions become results, unchecked
//!   failures destroy the instance that raised them
//!
//! # Architecture
//!
//! - **Composition Layer**: [`StatelessContainer`] builds both chains once
//!   from its configuration
//! - **Interceptor Layer**: the links in [`interceptors`], each holding the
//!   next one
//! - **Instance Layer**: [`InstanceContext`], [`InstancePool`] and the
//!   [`InstanceFactory`] that creates and initializes instances
//!
//! # Example
//!
//! ```rust
//! use stateless_container::{
//!     ApplicationError, BeanClass, Deployment, Invocation, StatelessContainer, Value,
//! };
//!
//! #[derive(Default)]
//! struct Account {
//!     created: bool,
//! }
//!
//! let class = BeanClass::builder("Account", || Ok(Account::default()))
//!     .ejb_create(|bean| {
//!         bean.created = true;
//!         Ok(())
//!     })
//!     .method("withdraw", 1, |_, args| {
//!         let amount = args[0].as_int().unwrap_or_default();
//!         if amount > 100 {
//!             return Err(ApplicationError::new("InsufficientFunds", "balance is 100").into());
//!         }
//!         Ok(Value::Int(100 - amount))
//!     })
//!     .build();
//!
//! let deployment = Deployment::builder("Account", class).build().unwrap();
//! let container = StatelessContainer::builder().build();
//! container.deploy(&deployment).unwrap();
//!
//! let withdraw = deployment.bean_class().methods().locate("withdraw", 1).unwrap();
//!
//! let mut ok = Invocation::business(deployment.clone(), withdraw, vec![Value::Int(30)]);
//! assert_eq!(container.invoke(&mut ok).unwrap().value(), Some(&Value::Int(70)));
//!
//! let mut declined = Invocation::business(deployment.clone(), withdraw, vec![Value::Int(500)]);
//! let result = container.invoke(&mut declined).unwrap();
//! assert_eq!(result.exception().map(|e| e.kind()), Some("InsufficientFunds"));
//! ```

pub mod bean;
pub mod config;
pub mod connector;
pub mod container;
pub mod deployment;
pub mod error;
pub mod factory;
pub mod instance;
pub mod interceptor;
pub mod interceptors;
pub mod invocation;
pub mod naming;
pub mod operation;
pub mod operations;
pub mod pool;
pub mod result;
pub mod security;
pub mod thread_context;
pub mod tracker;
pub mod transaction;
pub mod value;

// Re-export commonly used types
pub use bean::{BeanClass, BeanClassBuilder, MethodIndex, MethodTable};
pub use config::{ContainerConfig, PoolConfig};
pub use container::{ContainerBuilder, StatelessContainer};
pub use deployment::{Deployment, DeploymentBuilder, TransactionAttribute};
pub use error::{ApplicationError, BeanFailure, BeanResult, Error, Result, SystemError};
pub use factory::{InstanceFactory, StatelessInstanceFactory};
pub use instance::{InstanceContext, InstanceId, LifecycleCallbacks, SessionContext};
pub use interceptor::{Chain, ChainBuilder, Interceptor};
pub use invocation::{AttributeKey, CallbackKind, Invocation, InvocationKind, MessageContext, Timer};
pub use naming::ComponentContext;
pub use operation::Operation;
pub use pool::{InstancePool, PoolStats};
pub use result::InvocationResult;
pub use security::{SecurityService, Subject};
pub use transaction::{TransactionId, TransactionManager, TransactionStatus, UserTransaction};
pub use value::Value;
