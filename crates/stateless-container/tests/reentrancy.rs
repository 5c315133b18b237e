// Reentrancy Integration Tests
//
// These tests verify that a bean calling another bean on the same thread
// nests the current-instance bookkeeping and the security identities.

mod common;

use std::sync::{Arc, OnceLock, Weak};

use stateless_container::tracker::{InvocationTracker, ThreadInvocationTracker};
use stateless_container::{Deployment, StatelessContainer, Subject, SystemError, Value, thread_context};

use common::{Journal, call, call_as, deploy, unchecked, worker_class};

type Wiring = OnceLock<(Weak<StatelessContainer>, Weak<Deployment>, Weak<Deployment>)>;

fn current_instance() -> Value {
    ThreadInvocationTracker
        .current()
        .map_or(Value::Null, |context| Value::Int(context.id().0 as i64))
}

fn caller_principal() -> Value {
    thread_context::caller().map_or(Value::Null, |subject| Value::from(subject.principal()))
}

/// Deploys `Outer` and `Inner`; `Outer.nest(target)` calls `target.whoami()`
fn nested_pair(container: &Arc<StatelessContainer>, journal: &Arc<Journal>) -> (Arc<Deployment>, Arc<Deployment>) {
    let wiring: Arc<Wiring> = Arc::default();
    let slot = Arc::clone(&wiring);

    let outer_class = worker_class(journal)
        .method("whoami", 0, |_, _| Ok(Value::List(vec![current_instance(), caller_principal()])))
        .method("nest", 1, move |_, args| {
            let (container, outer, inner) = slot.get().ok_or_else(|| SystemError::runtime("not wired"))?;
            let container = container.upgrade().ok_or_else(|| SystemError::runtime("container dropped"))?;
            let target = match args[0].as_str() {
                Some("self") => outer.upgrade(),
                _ => inner.upgrade(),
            }
            .ok_or_else(|| SystemError::runtime("deployment dropped"))?;

            let before = current_instance();
            let nested = call(&container, &target, "whoami", vec![]).map_err(unchecked)?;
            let after = current_instance();
            Ok(Value::List(vec![before, nested.value().cloned().unwrap_or_default(), after]))
        })
        .build();
    let inner_class = worker_class(journal)
        .method("whoami", 0, |_, _| Ok(Value::List(vec![current_instance(), caller_principal()])))
        .build();

    let outer = deploy(container, Deployment::builder("Outer", outer_class));
    let inner = deploy(container, Deployment::builder("Inner", inner_class));
    wiring
        .set((Arc::downgrade(container), Arc::downgrade(&outer), Arc::downgrade(&inner)))
        .unwrap_or_else(|_| panic!("wired twice"));
    (outer, inner)
}

fn unpack(value: &Value) -> (Value, Vec<Value>, Value) {
    let items = value.as_list().expect("list");
    let nested = items[1].as_list().expect("nested reply").to_vec();
    (items[0].clone(), nested, items[2].clone())
}

/// After a nested call the outer instance is current again
#[test]
fn test_nested_call_restores_current_instance() {
    common::init_tracing();
    let container = StatelessContainer::builder().build();
    let journal = Journal::new();
    let (outer, _inner) = nested_pair(&container, &journal);

    for target in ["inner", "self"] {
        let result = call(&container, &outer, "nest", vec![Value::from(target)]).expect("nest");
        let (before, nested, after) = unpack(result.value().expect("normal result"));

        assert!(!before.is_null(), "outer instance is current during the call");
        assert_ne!(nested[0], before, "nested call runs on another instance ({target})");
        assert_eq!(after, before, "outer instance is restored after the nested call ({target})");
    }
    assert!(ThreadInvocationTracker.current().is_none());
}

/// The outer caller's identity flows into the nested call
#[test]
fn test_nested_call_inherits_identity() {
    common::init_tracing();
    let container = StatelessContainer::builder().build();
    let journal = Journal::new();
    let (outer, _inner) = nested_pair(&container, &journal);

    let grace = Subject::new("grace", ["user"]);
    let result = call_as(&container, &outer, grace, "nest", vec![Value::from("inner")]).expect("nest");
    let (_, nested, _) = unpack(result.value().expect("normal result"));
    assert_eq!(nested[1], Value::from("grace"));

    assert!(thread_context::caller().is_none());
    assert!(thread_context::run_as().is_none());
}

/// A declared run-as identity replaces the caller for nested calls
#[test]
fn test_nested_call_uses_run_as() {
    common::init_tracing();
    let container = StatelessContainer::builder().build();
    let journal = Journal::new();

    let inner_class = worker_class(&journal)
        .method("whoami", 0, |_, _| Ok(caller_principal()))
        .build();
    let inner = deploy(&container, Deployment::builder("Backend", inner_class));

    let weak_container = Arc::downgrade(&container);
    let weak_inner = Arc::downgrade(&inner);
    let outer_class = worker_class(&journal)
        .method("forward", 0, move |_, _| {
            let container = weak_container.upgrade().ok_or_else(|| SystemError::runtime("container dropped"))?;
            let inner = weak_inner.upgrade().ok_or_else(|| SystemError::runtime("deployment dropped"))?;
            let result = call(&container, &inner, "whoami", vec![]).map_err(unchecked)?;
            Ok(result.value().cloned().unwrap_or_default())
        })
        .build();
    let outer = deploy(
        &container,
        Deployment::builder("Frontend", outer_class).run_as(Subject::new("batch", ["admin"])),
    );

    let heidi = Subject::new("heidi", ["user"]);
    let seen = call_as(&container, &outer, heidi, "forward", vec![]).expect("forward");
    assert_eq!(seen.value(), Some(&Value::from("batch")));
}
