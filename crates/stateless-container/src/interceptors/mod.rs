//! Concrete interceptor links.
//!
//! | Link | Chain | Concern |
//! |------|-------|---------|
//! | [`StatelessBeanDispatcher`] | business | invokes the business method |
//! | [`StatelessCallbackInterceptor`] | callback | routes lifecycle callbacks |
//! | [`HandlerChainInterceptor`] | both | web-service handlers |
//! | [`ComponentContextInterceptor`] | both | installs the ENC |
//! | [`ConnectionTrackingInterceptor`] | both, optional | connection tracking |
//! | [`IdentityDelegationInterceptor`] | both, optional | do-as-current-caller |
//! | [`PermissionCheckInterceptor`] | business, optional | method permissions |
//! | [`RunAsInterceptor`] | business | outbound identity |
//! | [`PolicyContextHandlerInterceptor`] | business, optional | JACC policy context |
//! | [`StatelessInstanceInterceptor`] | business | instance pooling |
//! | [`TransactionContextInterceptor`] | business | transaction bookkeeping |
//! | [`TransactionPolicyInterceptor`] | business | transaction demarcation |
//! | [`NoConnectionEnlistingInterceptor`] | business, optional | enlisting off during demarcation |
//! | [`SystemExceptionInterceptor`] | business | fault logging |
//! | [`DefaultSubjectInterceptor`] | business | default caller subject |

mod context;
mod dispatch;
mod handler_chain;
mod logging;
mod pooling;
mod security;
mod transaction;

pub use context::{ComponentContextInterceptor, ConnectionTrackingInterceptor, NoConnectionEnlistingInterceptor};
pub use dispatch::{StatelessBeanDispatcher, StatelessCallbackInterceptor};
pub use handler_chain::{HANDLER_FAULT, HandlerChain, HandlerChainFactory, HandlerChainInterceptor};
pub use logging::SystemExceptionInterceptor;
pub use pooling::{ACCESS_TIMEOUT, StatelessInstanceInterceptor};
pub use security::{
    ACCESS_DENIED, DefaultSubjectInterceptor, IdentityDelegationInterceptor, PermissionCheckInterceptor,
    PolicyContextHandlerInterceptor, RunAsInterceptor,
};
pub use transaction::{TransactionContextInterceptor, TransactionPolicyInterceptor};
