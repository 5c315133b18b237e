//! Interceptor chains.
//!
//! An [`Interceptor`] receives an invocation and either delegates to the
//! next link it holds, short-circuits with a result of its own, or lets a
//! fault propagate. Chains are composed once, innermost link first, with
//! [`ChainBuilder`]; order is fixed at construction and never changes per
//! invocation.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use stateless_container::{ChainBuilder, Interceptor, Invocation, InvocationResult, Result, Value};
//!
//! struct Answer;
//!
//! impl Interceptor for Answer {
//!     fn invoke(&self, _: &mut Invocation) -> Result<InvocationResult> {
//!         Ok(InvocationResult::Normal(Value::Int(42)))
//!     }
//!     fn name(&self) -> &'static str {
//!         "answer"
//!     }
//! }
//!
//! struct Passthrough(Arc<dyn Interceptor>);
//!
//! impl Interceptor for Passthrough {
//!     fn invoke(&self, invocation: &mut Invocation) -> Result<InvocationResult> {
//!         self.0.invoke(invocation)
//!     }
//!     fn name(&self) -> &'static str {
//!         "passthrough"
//!     }
//! }
//!
//! let chain = ChainBuilder::new(Answer)
//!     .wrap(Passthrough)
//!     .wrap_if(false, Passthrough)
//!     .build();
//! assert_eq!(chain.layers(), ["answer", "passthrough"]);
//! ```

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::invocation::Invocation;
use crate::result::InvocationResult;

/// One link of an invocation chain.
pub trait Interceptor: Send + Sync {
    /// Handles the invocation, usually by delegating to the next link.
    fn invoke(&self, invocation: &mut Invocation) -> Result<InvocationResult>;

    /// Short name used in logs and for chain introspection.
    fn name(&self) -> &'static str;
}

/// Composes a chain from the innermost link outward.
pub struct ChainBuilder {
    head: Arc<dyn Interceptor>,
    layers: Vec<&'static str>,
}

impl ChainBuilder {
    /// Starts a chain with its terminal link.
    pub fn new<I: Interceptor + 'static>(terminal: I) -> Self {
        let layers = vec![terminal.name()];
        Self {
            head: Arc::new(terminal),
            layers,
        }
    }

    /// Wraps the chain built so far in another link.
    ///
    /// `wrap` receives the current head and returns the new outer link.
    #[must_use]
    pub fn wrap<I, F>(mut self, wrap: F) -> Self
    where
        I: Interceptor + 'static,
        F: FnOnce(Arc<dyn Interceptor>) -> I,
    {
        let outer = wrap(Arc::clone(&self.head));
        self.layers.push(outer.name());
        self.head = Arc::new(outer);
        self
    }

    /// Wraps only when `enabled`.
    #[must_use]
    pub fn wrap_if<I, F>(self, enabled: bool, wrap: F) -> Self
    where
        I: Interceptor + 'static,
        F: FnOnce(Arc<dyn Interceptor>) -> I,
    {
        if enabled { self.wrap(wrap) } else { self }
    }

    /// Wraps only when a collaborator is configured, handing it to the link.
    #[must_use]
    pub fn wrap_some<T, I, F>(self, collaborator: Option<T>, wrap: F) -> Self
    where
        I: Interceptor + 'static,
        F: FnOnce(Arc<dyn Interceptor>, T) -> I,
    {
        match collaborator {
            Some(collaborator) => self.wrap(|next| wrap(next, collaborator)),
            None => self,
        }
    }

    /// Finishes the chain.
    pub fn build(self) -> Chain {
        Chain {
            head: self.head,
            layers: self.layers,
        }
    }
}

/// A composed, immutable interceptor chain.
#[derive(Clone)]
pub struct Chain {
    head: Arc<dyn Interceptor>,
    layers: Vec<&'static str>,
}

impl Chain {
    /// Threads an invocation through the chain.
    #[inline]
    pub fn invoke(&self, invocation: &mut Invocation) -> Result<InvocationResult> {
        self.head.invoke(invocation)
    }

    /// Link names, innermost first.
    #[inline]
    pub fn layers(&self) -> &[&'static str] {
        &self.layers
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain").field("layers", &self.layers).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bean::{BeanClass, MethodIndex};
    use crate::deployment::Deployment;
    use crate::invocation::AttributeKey;
    use crate::value::Value;

    struct Terminal;

    impl Interceptor for Terminal {
        fn invoke(&self, invocation: &mut Invocation) -> Result<InvocationResult> {
            let trail = invocation
                .attribute(AttributeKey::Custom("trail"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            Ok(InvocationResult::Normal(Value::from(trail + "|terminal")))
        }

        fn name(&self) -> &'static str {
            "terminal"
        }
    }

    struct Mark {
        label: &'static str,
        next: Arc<dyn Interceptor>,
    }

    impl Interceptor for Mark {
        fn invoke(&self, invocation: &mut Invocation) -> Result<InvocationResult> {
            let key = AttributeKey::Custom("trail");
            let trail = invocation
                .attribute(key)
                .and_then(Value::as_str)
                .map(|trail| format!("{trail}>{}", self.label))
                .unwrap_or_else(|| self.label.to_owned());
            invocation.set_attribute(key, Value::from(trail));
            self.next.invoke(invocation)
        }

        fn name(&self) -> &'static str {
            self.label
        }
    }

    fn invocation() -> Invocation {
        let class = BeanClass::builder("Noop", || Ok(())).build();
        let deployment = Deployment::builder("Noop", class).build().expect("deployment");
        Invocation::business(deployment, MethodIndex(0), Vec::new())
    }

    #[test]
    fn test_outermost_runs_first() {
        let chain = ChainBuilder::new(Terminal)
            .wrap(|next| Mark { label: "inner", next })
            .wrap(|next| Mark { label: "outer", next })
            .build();

        let result = chain.invoke(&mut invocation()).expect("invoke");
        assert_eq!(result, InvocationResult::Normal(Value::from("outer>inner|terminal")));
        assert_eq!(chain.layers(), ["terminal", "inner", "outer"]);
    }

    #[test]
    fn test_wrap_if_skips_disabled_links() {
        let chain = ChainBuilder::new(Terminal)
            .wrap_if(false, |next| Mark { label: "skipped", next })
            .wrap_if(true, |next| Mark { label: "kept", next })
            .build();

        assert_eq!(chain.layers(), ["terminal", "kept"]);
    }
}
