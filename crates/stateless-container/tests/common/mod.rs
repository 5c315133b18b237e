// Common test utilities for container integration tests
//
// Provides a journaling bean class, deployment helpers and tracing setup
// shared by the integration test files.

#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use parking_lot::Mutex;
use stateless_container::{
    ApplicationError, BeanClassBuilder, Deployment, DeploymentBuilder, Invocation, InvocationResult, PoolConfig,
    Result, SessionContext, StatelessContainer, Subject, SystemError, Value,
};

static TRACING: Once = Once::new();

/// Installs a test-writer subscriber once per test binary.
///
/// Honors `RUST_LOG`; silent by default.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Ordered record of what bean instances did.
#[derive(Default)]
pub struct Journal {
    events: Mutex<Vec<String>>,
    serial: AtomicI64,
}

impl Journal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Number of events whose name (the part before `#`) is `name`.
    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.split('#').next() == Some(name))
            .count()
    }

    /// Number of bean instances constructed so far.
    pub fn constructed(&self) -> usize {
        self.serial.load(Ordering::SeqCst) as usize
    }

    fn next_serial(&self) -> i64 {
        self.serial.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Journaling bean used by most tests.
pub struct Worker {
    pub serial: i64,
    pub journal: Arc<Journal>,
    pub context: Option<Arc<SessionContext>>,
}

impl Worker {
    fn log(&self, event: &str) {
        self.journal.record(format!("{event}#{}", self.serial));
    }

    pub fn session(&self) -> std::result::Result<&Arc<SessionContext>, SystemError> {
        self.context
            .as_ref()
            .ok_or_else(|| SystemError::new("IllegalStateException", "no session context"))
    }
}

/// Maps a container fault raised inside bean code to an unchecked failure.
pub fn unchecked(error: stateless_container::Error) -> SystemError {
    SystemError::new("IllegalStateException", error.to_string())
}

/// The `Worker` class with its lifecycle callbacks and standard methods.
///
/// Tests add or replace methods on the returned builder.
pub fn worker_class(journal: &Arc<Journal>) -> BeanClassBuilder<Worker> {
    let constructor_journal = Arc::clone(journal);
    stateless_container::BeanClass::builder("Worker", move || {
        Ok(Worker {
            serial: constructor_journal.next_serial(),
            journal: Arc::clone(&constructor_journal),
            context: None,
        })
    })
    .set_session_context(|bean: &mut Worker, context| {
        bean.log("setSessionContext");
        bean.context = Some(context);
        Ok(())
    })
    .ejb_create(|bean| {
        bean.log("ejbCreate");
        Ok(())
    })
    .ejb_remove(|bean| {
        bean.log("ejbRemove");
        Ok(())
    })
    .method("serial", 0, |bean, _| Ok(Value::Int(bean.serial)))
    .method("echo", 1, |_, args| Ok(args[0].clone()))
    .method("boom", 0, |bean, _| {
        bean.log("boom");
        Err(SystemError::runtime("boom").into())
    })
    .method("decline", 0, |bean, _| {
        bean.log("decline");
        Err(ApplicationError::new("InsufficientFunds", "balance too low").into())
    })
    .method("caller", 0, |bean, _| {
        let subject = bean.session()?.caller_subject().map_err(unchecked)?;
        Ok(subject.map_or(Value::Null, |subject| Value::from(subject.principal())))
    })
    .method("lookup", 1, |bean, args| {
        let name = args[0].as_str().unwrap_or_default();
        Ok(bean.session()?.lookup(name).unwrap_or_default())
    })
    .method("sleep", 1, |bean, args| {
        let millis = args[0].as_int().unwrap_or_default();
        std::thread::sleep(Duration::from_millis(millis.unsigned_abs()));
        Ok(Value::Int(bean.serial))
    })
}

/// A deployment of the standard `Worker` class.
pub fn worker_deployment(id: &str, journal: &Arc<Journal>) -> DeploymentBuilder {
    Deployment::builder(id, worker_class(journal).build())
}

/// A strict pool of `max_size` with a short access timeout.
pub fn strict_pool(max_size: usize) -> PoolConfig {
    PoolConfig::default()
        .with_max_size(max_size)
        .with_access_timeout(Some(Duration::from_millis(200)))
}

/// Builds, deploys and returns a deployment.
pub fn deploy(container: &StatelessContainer, builder: DeploymentBuilder) -> Arc<Deployment> {
    let deployment = builder.build().expect("valid deployment");
    container.deploy(&deployment).expect("deploy");
    deployment
}

/// Invokes `method` (located by name and argument count) as the default caller.
pub fn call(container: &StatelessContainer, deployment: &Arc<Deployment>, method: &str, args: Vec<Value>) -> Result<InvocationResult> {
    let mut invocation = invocation(deployment, method, args);
    container.invoke(&mut invocation)
}

/// Invokes `method` as `subject`.
pub fn call_as(
    container: &StatelessContainer,
    deployment: &Arc<Deployment>,
    subject: Subject,
    method: &str,
    args: Vec<Value>,
) -> Result<InvocationResult> {
    let mut invocation = invocation(deployment, method, args).with_subject(subject);
    container.invoke(&mut invocation)
}

/// A business invocation of `method`, located by name and argument count.
pub fn invocation(deployment: &Arc<Deployment>, method: &str, args: Vec<Value>) -> Invocation {
    let index = deployment
        .bean_class()
        .methods()
        .locate(method, args.len())
        .unwrap_or_else(|| panic!("no method {method}/{}", args.len()));
    Invocation::business(Arc::clone(deployment), index, args)
}

/// The `serial` of the instance a call ran on.
pub fn serial_of(result: &InvocationResult) -> i64 {
    result.value().and_then(Value::as_int).expect("serial")
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
