//! Invocation objects threaded through interceptor chains.
//!
//! An [`Invocation`] identifies the target deployment, what to run (a
//! business method by index, a timer callback, or a lifecycle callback), the
//! arguments, and an open attribute bag that interceptors use to hand
//! cross-cutting data to each other without knowing about each other.
//!
//! # Design
//!
//! One invocation is owned by one call. It is mutated while it travels down
//! the chain (the pooling interceptor binds an instance context, the
//! transaction-context interceptor records transaction data) and every layer
//! that binds something is responsible for unbinding it on the way out.
//!
//! # Example
//!
//! ```rust
//! use stateless_container::{AttributeKey, BeanClass, Deployment, Invocation, Value};
//!
//! let class = BeanClass::builder("Echo", || Ok(()))
//!     .method("echo", 1, |_, args| Ok(args[0].clone()))
//!     .build();
//! let deployment = Deployment::builder("Echo", class).build().unwrap();
//! let method = deployment.bean_class().methods().locate("echo", 1).unwrap();
//!
//! let mut invocation = Invocation::business(deployment, method, vec![Value::from("hi")]);
//! invocation.set_attribute(AttributeKey::Custom("trace-id"), Value::from("abc"));
//! assert_eq!(invocation.method_name(), Some("echo"));
//! ```

use std::fmt;
use std::sync::Arc;

use fxhash::FxHashMap;
use parking_lot::Mutex;

use crate::bean::MethodIndex;
use crate::deployment::Deployment;
use crate::instance::InstanceContext;
use crate::security::Subject;
use crate::transaction::TransactionData;
use crate::value::Value;

/// Lifecycle callbacks routed through the callback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    /// `setSessionContext(SessionContext)`.
    SetContext,
    /// `ejbCreate()`.
    Create,
    /// `ejbRemove()`.
    Remove,
}

impl CallbackKind {
    /// All callback kinds, in lifecycle order.
    pub const ALL: [CallbackKind; 3] = [
        CallbackKind::SetContext,
        CallbackKind::Create,
        CallbackKind::Remove,
    ];

    /// Returns the callback name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            CallbackKind::SetContext => "SET_CONTEXT",
            CallbackKind::Create => "CREATE",
            CallbackKind::Remove => "REMOVE",
        }
    }
}

/// What an invocation asks the bean to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationKind {
    /// A business method call.
    Business(MethodIndex),
    /// A timer callback delivered to a business-table method.
    Timeout(MethodIndex),
    /// A lifecycle callback.
    Callback(CallbackKind),
}

impl fmt::Display for InvocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationKind::Business(index) => write!(f, "business {index}"),
            InvocationKind::Timeout(index) => write!(f, "timeout {index}"),
            InvocationKind::Callback(kind) => write!(f, "callback {}", kind.as_str()),
        }
    }
}

/// Well-known attribute keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKey {
    /// Web-service message context ([`MessageContext`]).
    MessageContext,
    /// Transaction data recorded by the transaction-context interceptor.
    TransactionData,
    /// Application-defined attribute.
    Custom(&'static str),
}

/// A timer expiration delivered through [`StatelessContainer::timeout`].
///
/// [`StatelessContainer::timeout`]: crate::StatelessContainer::timeout
#[derive(Debug, Clone, PartialEq)]
pub struct Timer {
    id: u64,
    info: Value,
}

impl Timer {
    /// Creates a timer handle.
    pub fn new(id: u64, info: Value) -> Self {
        Self { id, info }
    }

    /// Returns the timer id.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the info object the timer was scheduled with.
    #[inline]
    pub fn info(&self) -> &Value {
        &self.info
    }
}

/// Web-service message context attached to an invocation.
///
/// Handlers and the bean share it, so its state sits behind a lock.
#[derive(Debug, Default)]
pub struct MessageContext {
    properties: Mutex<FxHashMap<String, Value>>,
    fault: Mutex<Option<String>>,
}

impl MessageContext {
    /// Creates an empty message context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a property, returning the previous value.
    pub fn set_property(&self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.properties.lock().insert(name.into(), value)
    }

    /// Returns a property.
    pub fn property(&self, name: &str) -> Option<Value> {
        self.properties.lock().get(name).cloned()
    }

    /// Records a fault description.
    pub fn set_fault(&self, fault: impl Into<String>) {
        *self.fault.lock() = Some(fault.into());
    }

    /// Returns the recorded fault description.
    pub fn fault(&self) -> Option<String> {
        self.fault.lock().clone()
    }
}

/// A single call travelling through an interceptor chain.
pub struct Invocation {
    deployment: Arc<Deployment>,
    kind: InvocationKind,
    arguments: Vec<Value>,
    attributes: FxHashMap<AttributeKey, Value>,
    instance: Option<Arc<InstanceContext>>,
    subject: Option<Subject>,
    id: Option<Value>,
}

impl Invocation {
    fn new(deployment: Arc<Deployment>, kind: InvocationKind, arguments: Vec<Value>) -> Self {
        Self {
            deployment,
            kind,
            arguments,
            attributes: FxHashMap::default(),
            instance: None,
            subject: None,
            id: None,
        }
    }

    /// Creates a business-method invocation.
    pub fn business(deployment: Arc<Deployment>, method: MethodIndex, arguments: Vec<Value>) -> Self {
        Self::new(deployment, InvocationKind::Business(method), arguments)
    }

    /// Creates a timer-callback invocation; the timer is the single argument.
    pub fn timeout(
        deployment: Arc<Deployment>,
        id: Option<Value>,
        timer: Timer,
        method: MethodIndex,
    ) -> Self {
        let mut invocation =
            Self::new(deployment, InvocationKind::Timeout(method), vec![Value::object(timer)]);
        invocation.id = id;
        invocation
    }

    /// Creates a lifecycle-callback invocation bound to `instance`.
    pub fn callback(
        deployment: Arc<Deployment>,
        kind: CallbackKind,
        instance: Arc<InstanceContext>,
    ) -> Self {
        let mut invocation = Self::new(deployment, InvocationKind::Callback(kind), Vec::new());
        invocation.instance = Some(instance);
        invocation
    }

    /// Attaches a caller subject.
    #[must_use]
    pub fn with_subject(mut self, subject: Subject) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Attaches a web-service message context.
    #[must_use]
    pub fn with_message_context(mut self, context: Arc<MessageContext>) -> Self {
        self.attributes
            .insert(AttributeKey::MessageContext, Value::shared(context));
        self
    }

    /// Returns the target deployment.
    #[inline]
    pub fn deployment(&self) -> &Arc<Deployment> {
        &self.deployment
    }

    /// Returns what this invocation asks for.
    #[inline]
    pub fn kind(&self) -> InvocationKind {
        self.kind
    }

    /// Returns the business or timeout method index.
    pub fn method_index(&self) -> Option<MethodIndex> {
        match self.kind {
            InvocationKind::Business(index) | InvocationKind::Timeout(index) => Some(index),
            InvocationKind::Callback(_) => None,
        }
    }

    /// Returns the callback kind, for callback invocations.
    pub fn callback_kind(&self) -> Option<CallbackKind> {
        match self.kind {
            InvocationKind::Callback(kind) => Some(kind),
            _ => None,
        }
    }

    /// Returns the name of the targeted business method.
    pub fn method_name(&self) -> Option<&str> {
        self.method_index()
            .and_then(|index| self.deployment.bean_class().methods().get(index))
            .map(|method| method.name())
    }

    /// Returns the arguments.
    #[inline]
    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    /// Returns the primary key / instance id the call was addressed to.
    #[inline]
    pub fn id(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    /// Returns the instance context bound to this call.
    #[inline]
    pub fn instance(&self) -> Option<&Arc<InstanceContext>> {
        self.instance.as_ref()
    }

    /// Binds (or clears) the instance context, returning the previous one.
    pub fn set_instance(&mut self, instance: Option<Arc<InstanceContext>>) -> Option<Arc<InstanceContext>> {
        std::mem::replace(&mut self.instance, instance)
    }

    /// Returns the caller subject.
    #[inline]
    pub fn subject(&self) -> Option<&Subject> {
        self.subject.as_ref()
    }

    /// Replaces the caller subject, returning the previous one.
    pub fn set_subject(&mut self, subject: Option<Subject>) -> Option<Subject> {
        std::mem::replace(&mut self.subject, subject)
    }

    /// Returns an attribute.
    pub fn attribute(&self, key: AttributeKey) -> Option<&Value> {
        self.attributes.get(&key)
    }

    /// Sets an attribute, returning the previous value.
    pub fn set_attribute(&mut self, key: AttributeKey, value: Value) -> Option<Value> {
        self.attributes.insert(key, value)
    }

    /// Removes an attribute.
    pub fn remove_attribute(&mut self, key: AttributeKey) -> Option<Value> {
        self.attributes.remove(&key)
    }

    /// Returns the attached web-service message context.
    pub fn message_context(&self) -> Option<Arc<MessageContext>> {
        self.attribute(AttributeKey::MessageContext)
            .and_then(Value::downcast_arc::<MessageContext>)
    }

    /// Returns the transaction data recorded for this call.
    pub fn transaction_data(&self) -> Option<Arc<TransactionData>> {
        self.attribute(AttributeKey::TransactionData)
            .and_then(Value::downcast_arc::<TransactionData>)
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("deployment", &self.deployment.id())
            .field("kind", &self.kind)
            .field("arguments", &self.arguments.len())
            .field("instance", &self.instance.as_ref().map(|ctx| ctx.id()))
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}
