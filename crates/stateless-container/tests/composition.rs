// Chain Composition Integration Tests
//
// These tests verify the configurable links of the business chain: security
// identities, permission checks, thread-scoped contexts, connection tracking
// and the web-service handler chain.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use stateless_container::connector::{ConnectionTracker, TrackingState};
use stateless_container::interceptors::{ACCESS_DENIED, HANDLER_FAULT, HandlerChain, HandlerChainFactory};
use stateless_container::{
    Deployment, Error, InstanceId, InvocationResult, MessageContext, Result, StatelessContainer, Subject, Value,
    naming, thread_context,
};

use common::{Journal, call, call_as, deploy, invocation, worker_class, worker_deployment};

fn principal(subject: Option<Subject>) -> Value {
    subject.map_or(Value::Null, |subject| Value::from(subject.principal()))
}

/// A deployment whose methods report the thread-scoped contexts they see
fn context_bean(id: &str, journal: &Arc<Journal>) -> stateless_container::DeploymentBuilder {
    let class = worker_class(journal)
        .method("runAs", 0, |_, _| Ok(principal(thread_context::run_as())))
        .method("doAs", 0, |_, _| Ok(principal(thread_context::do_as())))
        .method("policy", 0, |_, _| {
            Ok(thread_context::policy_context().map_or(Value::Null, Value::from))
        })
        .method("env", 1, |_, args| {
            Ok(naming::lookup(args[0].as_str().unwrap_or_default()).unwrap_or_default())
        })
        .build();
    Deployment::builder(id, class)
}

fn value(result: Result<InvocationResult>) -> Value {
    result.expect("call").value().cloned().expect("normal result")
}

/// Denied calls complete with a declared exception and keep the instance
#[test]
fn test_permission_check() {
    common::init_tracing();
    let container = StatelessContainer::builder().security_enabled(true).build();
    let journal = Journal::new();
    let deployment = deploy(
        &container,
        worker_deployment("Vault", &journal).method_permission("echo", ["admin"]),
    );

    let alice = Subject::new("alice", ["user"]);
    let denied = call_as(&container, &deployment, alice.clone(), "echo", vec![Value::Int(1)]).expect("result");
    let exception = denied.exception().expect("access denied");
    assert_eq!(exception.kind(), ACCESS_DENIED);
    assert!(exception.message().contains("alice"));

    let bob = Subject::new("bob", ["admin", "user"]);
    let allowed = call_as(&container, &deployment, bob, "echo", vec![Value::Int(1)]).expect("result");
    assert_eq!(allowed, InvocationResult::Normal(Value::Int(1)));

    // Methods without declared permissions are open to everyone
    assert!(!call_as(&container, &deployment, alice, "serial", vec![]).expect("result").is_exception());
    assert!(call(&container, &deployment, "echo", vec![Value::Int(1)]).expect("result").is_exception());
    assert_eq!(journal.constructed(), 1);
    assert_eq!(journal.count("ejbRemove"), 0);
}

/// Without the security gate nothing is checked
#[test]
fn test_permissions_ignored_when_security_disabled() {
    common::init_tracing();
    let container = StatelessContainer::builder().build();
    let journal = Journal::new();
    let deployment = deploy(
        &container,
        worker_deployment("Open", &journal).method_permission("*", ["admin"]),
    );

    let result = call_as(&container, &deployment, Subject::new("eve", ["user"]), "echo", vec![Value::Int(2)]);
    assert_eq!(value(result), Value::Int(2));
}

/// The caller subject defaults, and is visible only for the call
#[test]
fn test_caller_subject_propagation() {
    common::init_tracing();
    let container = StatelessContainer::builder()
        .default_subject(Subject::new("anonymous-client", Vec::<String>::new()))
        .build();
    let journal = Journal::new();
    let deployment = deploy(&container, worker_deployment("Callers", &journal));

    assert_eq!(value(call(&container, &deployment, "caller", vec![])), Value::from("anonymous-client"));
    let carol = Subject::new("carol", ["user"]);
    assert_eq!(value(call_as(&container, &deployment, carol, "caller", vec![])), Value::from("carol"));
    assert!(thread_context::caller().is_none());
}

/// Run-as uses the declared identity, else the caller
#[test]
fn test_run_as_identity() {
    common::init_tracing();
    let container = StatelessContainer::builder().build();
    let journal = Journal::new();
    let system = Subject::new("system", ["admin"]);
    let declared = deploy(&container, context_bean("Declared", &journal).run_as(system));
    let inherited = deploy(&container, context_bean("Inherited", &journal));

    let dave = Subject::new("dave", ["user"]);
    assert_eq!(value(call_as(&container, &declared, dave.clone(), "runAs", vec![])), Value::from("system"));
    assert_eq!(value(call_as(&container, &inherited, dave, "runAs", vec![])), Value::from("dave"));
    assert!(thread_context::run_as().is_none());
}

/// Delegation and policy-context links only run when enabled
#[test]
fn test_optional_context_links() {
    common::init_tracing();
    let journal = Journal::new();

    let plain = StatelessContainer::builder().build();
    let deployment = deploy(&plain, context_bean("Plain", &journal));
    assert_eq!(value(call(&plain, &deployment, "doAs", vec![])), Value::Null);
    assert_eq!(value(call(&plain, &deployment, "policy", vec![])), Value::Null);

    let full = StatelessContainer::builder()
        .do_as_current_caller(true)
        .use_context_handler(true)
        .build();
    let named = deploy(&full, context_bean("Named", &journal).policy_context_id("ear/named"));
    let unnamed = deploy(&full, context_bean("Unnamed", &journal));

    let frank = Subject::new("frank", ["user"]);
    assert_eq!(value(call_as(&full, &named, frank, "doAs", vec![])), Value::from("frank"));
    assert_eq!(value(call(&full, &named, "policy", vec![])), Value::from("ear/named"));
    assert_eq!(value(call(&full, &unnamed, "policy", vec![])), Value::from("Unnamed"));
    assert!(thread_context::do_as().is_none());
    assert!(thread_context::policy_context().is_none());
}

/// The ENC is installed for the call and removed afterwards
#[test]
fn test_component_context_installed() {
    common::init_tracing();
    let container = StatelessContainer::builder().build();
    let journal = Journal::new();
    let environment = stateless_container::ComponentContext::new()
        .bind("java:comp/env/jdbc/orders", Value::from("orders-ds"));
    let deployment = deploy(&container, context_bean("Naming", &journal).component_context(environment));

    let found = value(call(&container, &deployment, "env", vec![Value::from("java:comp/env/jdbc/orders")]));
    assert_eq!(found, Value::from("orders-ds"));
    assert!(naming::lookup("jdbc/orders").is_none());
    assert!(thread_context::component_context().is_none());
}

#[derive(Default)]
struct RecordingTracker {
    events: Mutex<Vec<String>>,
    next: AtomicU64,
    enlisting: Mutex<bool>,
}

impl ConnectionTracker for RecordingTracker {
    fn enter(&self, deployment: &str, instance: Option<InstanceId>) -> TrackingState {
        let state = TrackingState(self.next.fetch_add(1, Ordering::SeqCst));
        self.events
            .lock()
            .push(format!("enter {deployment} bound={}", instance.is_some()));
        state
    }

    fn exit(&self, state: TrackingState) {
        self.events.lock().push(format!("exit {}", state.0));
    }

    fn set_enlisting(&self, enabled: bool) -> bool {
        self.events.lock().push(format!("enlisting {enabled}"));
        std::mem::replace(&mut *self.enlisting.lock(), enabled)
    }
}

/// Connection tracking wraps the call; enlisting is off around demarcation
#[test]
fn test_connection_tracking() {
    common::init_tracing();
    let tracker = Arc::new(RecordingTracker {
        enlisting: Mutex::new(true),
        ..RecordingTracker::default()
    });
    let container = StatelessContainer::builder().connection_tracker(tracker.clone()).build();
    let journal = Journal::new();
    let deployment = deploy(&container, worker_deployment("Tracked", &journal));

    // The first call also runs the creation callbacks, which are tracked too
    call(&container, &deployment, "serial", vec![]).expect("first call");
    let callbacks = tracker.events.lock().iter().filter(|e| e.starts_with("enter")).count();
    assert_eq!(callbacks, 3);

    tracker.events.lock().clear();
    let state = tracker.next.load(Ordering::SeqCst);
    call(&container, &deployment, "serial", vec![]).expect("call");
    assert_eq!(
        *tracker.events.lock(),
        [
            "enlisting false".to_owned(),
            "enter Tracked bound=true".to_owned(),
            format!("exit {state}"),
            "enlisting true".to_owned(),
        ]
    );
    assert!(*tracker.enlisting.lock());
}

// ============================================================================
// Handler chain
// ============================================================================

#[derive(Default)]
struct HandlerLog {
    events: Mutex<Vec<&'static str>>,
}

impl HandlerLog {
    fn take(&self) -> Vec<&'static str> {
        std::mem::take(&mut *self.events.lock())
    }
}

struct RecordingChain {
    log: Arc<HandlerLog>,
}

impl HandlerChain for RecordingChain {
    fn handle_request(&mut self, context: &MessageContext) -> Result<bool> {
        self.log.events.lock().push("request");
        Ok(context.property("veto").is_none())
    }

    fn handle_response(&mut self, context: &MessageContext) -> Result<bool> {
        self.log.events.lock().push("response");
        if context.property("corrupt").is_some() {
            return Err(Error::HandlerChain("malformed envelope".into()));
        }
        Ok(true)
    }

    fn handle_fault(&mut self, _: &MessageContext) -> Result<bool> {
        self.log.events.lock().push("fault");
        Ok(true)
    }

    fn destroy(&mut self) {
        self.log.events.lock().push("destroy");
    }
}

struct RecordingFactory {
    log: Arc<HandlerLog>,
}

impl HandlerChainFactory for RecordingFactory {
    fn create(&self) -> Result<Box<dyn HandlerChain>> {
        Ok(Box::new(RecordingChain {
            log: Arc::clone(&self.log),
        }))
    }
}

fn soap_call(
    container: &StatelessContainer,
    deployment: &Arc<Deployment>,
    method: &str,
    properties: &[&str],
) -> (Result<InvocationResult>, Arc<MessageContext>) {
    let message = Arc::new(MessageContext::new());
    for property in properties {
        message.set_property(*property, Value::Bool(true));
    }
    let mut invocation = invocation(deployment, method, vec![]).with_message_context(Arc::clone(&message));
    (container.invoke(&mut invocation), message)
}

/// Handlers see request, response and faults around the bean
#[test]
fn test_handler_chain() {
    common::init_tracing();
    let log = Arc::new(HandlerLog::default());
    let container = StatelessContainer::builder().build();
    let journal = Journal::new();
    let class = worker_class(&journal)
        .method("action", 0, |bean, _| {
            let message = bean.session()?.message_context();
            Ok(message
                .and_then(|message| message.property("action"))
                .unwrap_or_default())
        })
        .build();
    let deployment = deploy(
        &container,
        Deployment::builder("Endpoint", class).handler_chain(Arc::new(RecordingFactory { log: Arc::clone(&log) })),
    );

    // Plain calls bypass the handlers entirely
    call(&container, &deployment, "serial", vec![]).expect("plain call");
    assert!(log.take().is_empty());

    let (result, _) = soap_call(&container, &deployment, "action", &["action"]);
    assert_eq!(result.expect("call"), InvocationResult::Normal(Value::Bool(true)));
    assert_eq!(log.take(), ["request", "response", "destroy"]);

    let (result, _) = soap_call(&container, &deployment, "boom", &["veto"]);
    assert_eq!(result.expect("vetoed call"), InvocationResult::NULL);
    assert_eq!(log.take(), ["request", "destroy"]);
    assert_eq!(journal.count("boom"), 0);

    let (result, message) = soap_call(&container, &deployment, "decline", &[]);
    assert!(result.expect("declared").is_exception());
    assert_eq!(log.take(), ["request", "fault", "destroy"]);
    assert!(message.fault().is_some_and(|fault| fault.contains("InsufficientFunds")));

    let (result, _) = soap_call(&container, &deployment, "serial", &["corrupt"]);
    let exception = result.expect("handler fault is a result").exception().cloned().expect("exception");
    assert_eq!(exception.kind(), HANDLER_FAULT);
    assert_eq!(log.take(), ["request", "response", "fault", "destroy"]);

    let (result, message) = soap_call(&container, &deployment, "boom", &[]);
    assert!(matches!(result, Err(Error::System { .. })));
    assert_eq!(log.take(), ["request", "fault", "destroy"]);
    assert!(message.fault().is_some());
    assert_eq!(journal.count("ejbRemove"), 1);
}
