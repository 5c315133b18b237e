//! Thread-scoped invocation context.
//!
//! Several interceptors install a value for the duration of a call (the ENC,
//! the caller subject, the run-as identity, the policy context id, the
//! context loader) and must put the previous value back afterwards, even
//! when the call faults or re-enters the container on the same thread.
//!
//! Each slot is a thread-local `RefCell<Option<T>>`. Entering a slot returns
//! a [`Scope`] guard holding the displaced value; dropping the guard restores
//! it. Nested scopes therefore unwind in LIFO order for free.
//!
//! # Example
//!
//! ```rust
//! use stateless_container::thread_context;
//!
//! assert_eq!(thread_context::policy_context(), None);
//! {
//!     let _outer = thread_context::enter_policy_context(Some("app-a".into()));
//!     {
//!         let _inner = thread_context::enter_policy_context(Some("app-b".into()));
//!         assert_eq!(thread_context::policy_context().as_deref(), Some("app-b"));
//!     }
//!     assert_eq!(thread_context::policy_context().as_deref(), Some("app-a"));
//! }
//! assert_eq!(thread_context::policy_context(), None);
//! ```

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::LocalKey;

use crate::naming::ComponentContext;
use crate::security::Subject;

// ============================================================================
// Slots
// ============================================================================

thread_local! {
    static CALLER: RefCell<Option<Subject>> = const { RefCell::new(None) };
    static RUN_AS: RefCell<Option<Subject>> = const { RefCell::new(None) };
    static DO_AS: RefCell<Option<Subject>> = const { RefCell::new(None) };
    static COMPONENT_CONTEXT: RefCell<Option<Arc<ComponentContext>>> = const { RefCell::new(None) };
    static POLICY_CONTEXT: RefCell<Option<String>> = const { RefCell::new(None) };
    static CONTEXT_LOADER: RefCell<Option<ContextLoader>> = const { RefCell::new(None) };
}

/// Identifies the loader a deployment's code expects to run under.
///
/// Timer callbacks arrive on foreign threads, so the container swaps the
/// thread's current loader for the deployment's while the callback runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextLoader(Arc<str>);

impl ContextLoader {
    /// Creates a loader handle with the given name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Returns the loader name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Scope guard
// ============================================================================

/// Restores a thread-local slot to its previous value when dropped.
///
/// Not `Send`: the guard must be dropped on the thread that created it.
#[must_use = "the previous value is restored as soon as the scope is dropped"]
pub struct Scope<T: 'static> {
    slot: &'static LocalKey<RefCell<Option<T>>>,
    previous: Option<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T: 'static> Scope<T> {
    fn enter(slot: &'static LocalKey<RefCell<Option<T>>>, value: Option<T>) -> Self {
        let previous = slot.with(|cell| cell.replace(value));
        Self {
            slot,
            previous,
            _not_send: PhantomData,
        }
    }

    /// Returns the value that was current before this scope was entered.
    #[inline]
    pub fn previous(&self) -> Option<&T> {
        self.previous.as_ref()
    }
}

impl<T: 'static> Drop for Scope<T> {
    fn drop(&mut self) {
        let previous = self.previous.take();
        // Slot may already be gone during thread teardown
        let _ = self.slot.try_with(|cell| cell.replace(previous));
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Scope<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("previous", &self.previous)
            .finish()
    }
}

fn current<T: Clone + 'static>(slot: &'static LocalKey<RefCell<Option<T>>>) -> Option<T> {
    slot.with(|cell| cell.borrow().clone())
}

// ============================================================================
// Accessors
// ============================================================================

/// Installs the subject the current call runs as.
pub fn enter_caller(subject: Option<Subject>) -> Scope<Subject> {
    Scope::enter(&CALLER, subject)
}

/// Returns the subject the current call runs as.
pub fn caller() -> Option<Subject> {
    current(&CALLER)
}

/// Installs the identity used for outbound calls made by the bean.
pub fn enter_run_as(subject: Option<Subject>) -> Scope<Subject> {
    Scope::enter(&RUN_AS, subject)
}

/// Returns the identity used for outbound calls made by the bean.
pub fn run_as() -> Option<Subject> {
    current(&RUN_AS)
}

/// Installs the delegated identity (`do-as-current-caller`).
pub fn enter_do_as(subject: Option<Subject>) -> Scope<Subject> {
    Scope::enter(&DO_AS, subject)
}

/// Returns the delegated identity.
pub fn do_as() -> Option<Subject> {
    current(&DO_AS)
}

/// Installs the component naming context (ENC).
pub fn enter_component_context(context: Option<Arc<ComponentContext>>) -> Scope<Arc<ComponentContext>> {
    Scope::enter(&COMPONENT_CONTEXT, context)
}

/// Returns the component naming context (ENC).
pub fn component_context() -> Option<Arc<ComponentContext>> {
    current(&COMPONENT_CONTEXT)
}

/// Installs the JACC policy context id.
pub fn enter_policy_context(id: Option<String>) -> Scope<String> {
    Scope::enter(&POLICY_CONTEXT, id)
}

/// Returns the JACC policy context id.
pub fn policy_context() -> Option<String> {
    current(&POLICY_CONTEXT)
}

/// Installs the context loader.
pub fn enter_context_loader(loader: Option<ContextLoader>) -> Scope<ContextLoader> {
    Scope::enter(&CONTEXT_LOADER, loader)
}

/// Returns the context loader.
pub fn context_loader() -> Option<ContextLoader> {
    current(&CONTEXT_LOADER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_restores_previous() {
        let alice = Subject::new("alice", ["admin"]);
        let bob = Subject::new("bob", ["user"]);

        let outer = enter_caller(Some(alice.clone()));
        assert!(outer.previous().is_none());
        {
            let inner = enter_caller(Some(bob.clone()));
            assert_eq!(inner.previous(), Some(&alice));
            assert_eq!(caller(), Some(bob));
        }
        assert_eq!(caller(), Some(alice));
        drop(outer);
        assert_eq!(caller(), None);
    }

    #[test]
    fn test_scope_can_clear_slot() {
        let _loader = enter_context_loader(Some(ContextLoader::new("app")));
        {
            let _cleared = enter_context_loader(None);
            assert_eq!(context_loader(), None);
        }
        assert_eq!(context_loader().map(|l| l.name().to_owned()), Some("app".to_owned()));
    }

    #[test]
    fn test_slots_are_per_thread() {
        let _run_as = enter_run_as(Some(Subject::new("system", ["admin"])));

        let seen = std::thread::spawn(run_as).join().expect("thread");
        assert_eq!(seen, None);
        assert_eq!(run_as().map(|s| s.principal().to_owned()), Some("system".to_owned()));
    }

    #[test]
    fn test_slots_are_independent() {
        let _do_as = enter_do_as(Some(Subject::new("carol", Vec::<String>::new())));
        assert!(run_as().is_none());
        assert!(caller().is_none());
        assert_eq!(do_as().map(|s| s.principal().to_owned()), Some("carol".to_owned()));
    }
}
