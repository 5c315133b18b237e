//! Bean classes and their method tables.
//!
//! There is no runtime reflection to locate `ejbCreate` or a business method
//! by name, so a bean class is described up front: a constructor plus a table
//! of type-erased callables keyed by `(name, arity)`. Deployment processing
//! builds the table once; invocations address business methods by
//! [`MethodIndex`] and lifecycle operations locate their callback by name.
//!
//! # Example
//!
//! ```rust
//! use stateless_container::{BeanClass, Value};
//!
//! #[derive(Default)]
//! struct Counter {
//!     hits: i64,
//! }
//!
//! let class = BeanClass::builder("Counter", || Ok(Counter::default()))
//!     .method("hit", 0, |bean: &mut Counter, _args| {
//!         bean.hits += 1;
//!         Ok(Value::Int(bean.hits))
//!     })
//!     .build();
//!
//! assert!(class.methods().locate("hit", 0).is_some());
//! ```

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use fxhash::FxHashMap;

use crate::error::{BeanFailure, BeanResult, SystemError};
use crate::instance::SessionContext;
use crate::invocation::Timer;
use crate::value::Value;

/// Name of the `setSessionContext(SessionContext)` callback.
pub const SET_SESSION_CONTEXT: &str = "setSessionContext";
/// Name of the `ejbCreate()` callback.
pub const EJB_CREATE: &str = "ejbCreate";
/// Name of the `ejbRemove()` callback.
pub const EJB_REMOVE: &str = "ejbRemove";
/// Name of the `ejbTimeout(Timer)` callback.
pub const EJB_TIMEOUT: &str = "ejbTimeout";

/// Live bean instance, exclusively owned by its instance context.
pub type BeanInstance = Box<dyn Any + Send>;

type MethodFn = dyn Fn(&mut (dyn Any + Send), &[Value]) -> BeanResult<Value> + Send + Sync;
type ConstructorFn = dyn Fn() -> BeanResult<BeanInstance> + Send + Sync;

/// Index of a method in a deployment's method table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodIndex(pub usize);

impl fmt::Display for MethodIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One entry of a method table.
#[derive(Clone)]
pub struct BeanMethod {
    name: String,
    arity: usize,
    func: Arc<MethodFn>,
}

impl BeanMethod {
    /// Returns the method name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of arguments the method takes.
    #[inline]
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Invokes the method on a bean instance.
    ///
    /// Panics raised by bean code are caught here and reported as unchecked
    /// failures, so they travel the chain like any other system exception.
    pub(crate) fn call(&self, bean: &mut (dyn Any + Send), args: &[Value]) -> BeanResult<Value> {
        if args.len() != self.arity {
            return Err(SystemError::new(
                "IllegalArgumentException",
                format!(
                    "{} expects {} argument(s), got {}",
                    self.name,
                    self.arity,
                    args.len()
                ),
            )
            .into());
        }

        panic::catch_unwind(AssertUnwindSafe(|| (self.func)(bean, args)))
            .unwrap_or_else(|payload| Err(SystemError::panic(panic_message(payload.as_ref())).into()))
    }
}

impl fmt::Debug for BeanMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanMethod")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Per-class table of invocable methods.
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    methods: Vec<BeanMethod>,
    by_signature: FxHashMap<(String, usize), MethodIndex>,
}

impl MethodTable {
    /// Returns the method at `index`.
    #[inline]
    pub fn get(&self, index: MethodIndex) -> Option<&BeanMethod> {
        self.methods.get(index.0)
    }

    /// Locates a method by name and arity.
    pub fn locate(&self, name: &str, arity: usize) -> Option<MethodIndex> {
        self.by_signature.get(&(name.to_owned(), arity)).copied()
    }

    /// Locates a method by name and arity and returns the entry itself.
    pub fn find(&self, name: &str, arity: usize) -> Option<&BeanMethod> {
        self.locate(name, arity).and_then(|index| self.get(index))
    }

    /// Number of methods in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Returns `true` if the table has no methods.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Iterates over all methods with their indexes.
    pub fn iter(&self) -> impl Iterator<Item = (MethodIndex, &BeanMethod)> {
        self.methods
            .iter()
            .enumerate()
            .map(|(index, method)| (MethodIndex(index), method))
    }

    fn insert(&mut self, method: BeanMethod) {
        let key = (method.name.clone(), method.arity);
        if let Some(index) = self.by_signature.get(&key) {
            self.methods[index.0] = method;
        } else {
            self.by_signature.insert(key, MethodIndex(self.methods.len()));
            self.methods.push(method);
        }
    }
}

/// Describes how to construct a bean and what it can be asked to do.
#[derive(Clone)]
pub struct BeanClass {
    name: String,
    constructor: Arc<ConstructorFn>,
    methods: MethodTable,
}

impl BeanClass {
    /// Starts describing a bean class of type `B`.
    pub fn builder<B, F>(name: impl Into<String>, constructor: F) -> BeanClassBuilder<B>
    where
        B: Any + Send,
        F: Fn() -> BeanResult<B> + Send + Sync + 'static,
    {
        BeanClassBuilder {
            name: name.into(),
            constructor: Arc::new(move || constructor().map(|bean| Box::new(bean) as BeanInstance)),
            methods: MethodTable::default(),
            _bean: PhantomData,
        }
    }

    /// Returns the class name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the method table.
    #[inline]
    pub fn methods(&self) -> &MethodTable {
        &self.methods
    }

    /// Constructs a fresh bean instance.
    pub(crate) fn instantiate(&self) -> BeanResult<BeanInstance> {
        panic::catch_unwind(AssertUnwindSafe(|| (self.constructor)()))
            .unwrap_or_else(|payload| Err(SystemError::panic(panic_message(payload.as_ref())).into()))
    }
}

impl fmt::Debug for BeanClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanClass")
            .field("name", &self.name)
            .field("methods", &self.methods.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`BeanClass`].
pub struct BeanClassBuilder<B> {
    name: String,
    constructor: Arc<ConstructorFn>,
    methods: MethodTable,
    _bean: PhantomData<fn() -> B>,
}

impl<B: Any + Send> BeanClassBuilder<B> {
    /// Registers a business method.
    ///
    /// Registering the same `(name, arity)` twice replaces the earlier entry.
    #[must_use]
    pub fn method<F>(mut self, name: &str, arity: usize, f: F) -> Self
    where
        F: Fn(&mut B, &[Value]) -> BeanResult<Value> + Send + Sync + 'static,
    {
        let class_name = self.name.clone();
        let func = move |bean: &mut (dyn Any + Send), args: &[Value]| {
            let bean = bean.downcast_mut::<B>().ok_or_else(|| {
                BeanFailure::from(SystemError::new(
                    "ClassCastException",
                    format!("instance is not a {class_name}"),
                ))
            })?;
            f(bean, args)
        };
        self.methods.insert(BeanMethod {
            name: name.to_owned(),
            arity,
            func: Arc::new(func),
        });
        self
    }

    /// Registers the `setSessionContext` callback.
    #[must_use]
    pub fn set_session_context<F>(self, f: F) -> Self
    where
        F: Fn(&mut B, Arc<SessionContext>) -> BeanResult<()> + Send + Sync + 'static,
    {
        self.method(SET_SESSION_CONTEXT, 1, move |bean, args| {
            let context = args[0].downcast_arc::<SessionContext>().ok_or_else(|| {
                BeanFailure::from(SystemError::new(
                    "IllegalArgumentException",
                    "setSessionContext expects a SessionContext",
                ))
            })?;
            f(bean, context).map(|()| Value::Null)
        })
    }

    /// Registers the `ejbCreate` callback.
    #[must_use]
    pub fn ejb_create<F>(self, f: F) -> Self
    where
        F: Fn(&mut B) -> BeanResult<()> + Send + Sync + 'static,
    {
        self.method(EJB_CREATE, 0, move |bean, _| f(bean).map(|()| Value::Null))
    }

    /// Registers the `ejbRemove` callback.
    #[must_use]
    pub fn ejb_remove<F>(self, f: F) -> Self
    where
        F: Fn(&mut B) -> BeanResult<()> + Send + Sync + 'static,
    {
        self.method(EJB_REMOVE, 0, move |bean, _| f(bean).map(|()| Value::Null))
    }

    /// Registers the `ejbTimeout` timer callback.
    #[must_use]
    pub fn ejb_timeout<F>(self, f: F) -> Self
    where
        F: Fn(&mut B, &Timer) -> BeanResult<()> + Send + Sync + 'static,
    {
        self.method(EJB_TIMEOUT, 1, move |bean, args| {
            let timer = args[0].downcast_ref::<Timer>().ok_or_else(|| {
                BeanFailure::from(SystemError::new(
                    "IllegalArgumentException",
                    "ejbTimeout expects a Timer",
                ))
            })?;
            f(bean, timer).map(|()| Value::Null)
        })
    }

    /// Finishes the class description.
    pub fn build(self) -> BeanClass {
        BeanClass {
            name: self.name,
            constructor: self.constructor,
            methods: self.methods,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "bean code panicked".to_owned()
    }
}
