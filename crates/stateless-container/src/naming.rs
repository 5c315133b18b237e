//! Component naming context (ENC).
//!
//! A deployment's environment entries and resource references, resolved by
//! name under `java:comp/env`. The context is read-only once built; the ENC
//! interceptor installs it on the calling thread so bean code can resolve
//! names through [`lookup`] or its session context.

use std::fmt;

use fxhash::FxHashMap;

use crate::thread_context;
use crate::value::Value;

/// Prefix accepted (and stripped) in front of environment names.
pub const ENV_PREFIX: &str = "java:comp/env/";

/// Read-only name bindings of one deployment.
#[derive(Clone, Default)]
pub struct ComponentContext {
    bindings: FxHashMap<String, Value>,
}

impl ComponentContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a binding.
    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, value: Value) -> Self {
        let name = name.into();
        let key = name.strip_prefix(ENV_PREFIX).map(str::to_owned).unwrap_or(name);
        self.bindings.insert(key, value);
        self
    }

    /// Resolves a name, with or without the `java:comp/env/` prefix.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let key = name.strip_prefix(ENV_PREFIX).unwrap_or(name);
        self.bindings.get(key).cloned()
    }

    /// Number of bindings.
    #[inline]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns `true` if nothing is bound.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl fmt::Debug for ComponentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.bindings.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ComponentContext").field("names", &names).finish()
    }
}

/// Resolves a name in the ENC installed on the calling thread.
pub fn lookup(name: &str) -> Option<Value> {
    thread_context::component_context().and_then(|context| context.lookup(name))
}
