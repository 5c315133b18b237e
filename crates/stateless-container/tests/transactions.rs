// Transaction Demarcation Integration Tests
//
// These tests verify container-managed transaction attributes, rollback on
// faults, and isolation of bean-managed transactions.

mod common;

use std::sync::Arc;

use stateless_container::interceptors::ACCESS_TIMEOUT;
use stateless_container::transaction::ThreadTransactionManager;
use stateless_container::{
    ApplicationError, Deployment, DeploymentBuilder, Error, StatelessContainer, TransactionAttribute,
    TransactionManager, TransactionStatus, Value,
};

use common::{Journal, call, deploy, strict_pool, unchecked, worker_class};

fn transaction_value(manager: &ThreadTransactionManager) -> Value {
    manager
        .current()
        .map_or(Value::Null, |transaction| Value::Int(transaction.0 as i64))
}

/// A worker whose `tx` method reports the transaction it runs in
fn transactional(id: &str, journal: &Arc<Journal>, manager: &Arc<ThreadTransactionManager>) -> DeploymentBuilder {
    let seen = Arc::clone(manager);
    let class = worker_class(journal)
        .method("tx", 0, move |_, _| Ok(transaction_value(&seen)))
        .build();
    Deployment::builder(id, class)
}

fn setup() -> (Arc<StatelessContainer>, Arc<ThreadTransactionManager>, Arc<Journal>) {
    common::init_tracing();
    let manager = Arc::new(ThreadTransactionManager::new());
    let container = StatelessContainer::builder()
        .transaction_manager(manager.clone())
        .build();
    (container, manager, Journal::new())
}

/// Required begins and commits a transaction when the caller has none
#[test]
fn test_required_begins_and_commits() {
    let (container, manager, journal) = setup();
    let deployment = deploy(&container, transactional("Required", &journal, &manager));

    let seen = call(&container, &deployment, "tx", vec![]).expect("call");
    assert!(seen.value().and_then(Value::as_int).is_some());
    assert_eq!(manager.committed(), 1);
    assert!(manager.current().is_none());
}

/// Required joins the caller's transaction and marks it on fault
#[test]
fn test_required_joins_caller() {
    let (container, manager, journal) = setup();
    let deployment = deploy(&container, transactional("Joiner", &journal, &manager));

    let caller = manager.begin().expect("caller transaction");
    let seen = call(&container, &deployment, "tx", vec![]).expect("call");
    assert_eq!(seen.value(), Some(&Value::Int(caller.0 as i64)));
    assert_eq!(manager.committed(), 0);
    assert_eq!(manager.current(), Some(caller));

    assert!(call(&container, &deployment, "boom", vec![]).is_err());
    assert_eq!(manager.status(caller), Some(TransactionStatus::MarkedRollback));
    assert!(matches!(manager.commit(), Err(Error::Transaction(_))));
    assert_eq!(manager.rolled_back(), 1);
}

/// Faults roll back a transaction the container began; declared exceptions commit
#[test]
fn test_fault_rolls_back_declared_commits() {
    let (container, manager, journal) = setup();
    let deployment = deploy(&container, transactional("Outcomes", &journal, &manager));

    assert!(call(&container, &deployment, "boom", vec![]).is_err());
    assert_eq!(manager.rolled_back(), 1);
    assert_eq!(manager.committed(), 0);

    assert!(call(&container, &deployment, "decline", vec![]).expect("declared").is_exception());
    assert_eq!(manager.committed(), 1);
    assert!(manager.current().is_none());
}

/// RequiresNew and NotSupported suspend the caller's transaction and resume it
#[test]
fn test_suspending_attributes() {
    let (container, manager, journal) = setup();
    let deployment = deploy(
        &container,
        transactional("Suspender", &journal, &manager)
            .transaction_attribute("tx", TransactionAttribute::RequiresNew)
            .transaction_attribute("serial", TransactionAttribute::NotSupported),
    );
    let tx_only = deploy(
        &container,
        transactional("Unsupported", &journal, &manager)
            .default_transaction_attribute(TransactionAttribute::NotSupported),
    );

    let caller = manager.begin().expect("caller transaction");

    let seen = call(&container, &deployment, "tx", vec![]).expect("requires new");
    let inner = seen.value().and_then(Value::as_int).expect("own transaction");
    assert_ne!(inner, caller.0 as i64);
    assert_eq!(manager.committed(), 1);
    assert_eq!(manager.current(), Some(caller));

    let seen = call(&container, &tx_only, "tx", vec![]).expect("not supported");
    assert_eq!(seen.value(), Some(&Value::Null));
    assert_eq!(manager.current(), Some(caller));

    manager.commit().expect("caller commit");
    assert_eq!(manager.committed(), 2);
}

/// Mandatory and Never enforce the caller's transaction state
#[test]
fn test_mandatory_and_never() {
    let (container, manager, journal) = setup();
    let mandatory = deploy(
        &container,
        transactional("Mandatory", &journal, &manager).default_transaction_attribute(TransactionAttribute::Mandatory),
    );
    let never = deploy(
        &container,
        transactional("Never", &journal, &manager).default_transaction_attribute(TransactionAttribute::Never),
    );
    let supports = deploy(
        &container,
        transactional("Supports", &journal, &manager).default_transaction_attribute(TransactionAttribute::Supports),
    );

    assert!(matches!(call(&container, &mandatory, "tx", vec![]), Err(Error::Transaction(_))));
    assert_eq!(call(&container, &never, "tx", vec![]).expect("never").value(), Some(&Value::Null));
    assert_eq!(call(&container, &supports, "tx", vec![]).expect("supports").value(), Some(&Value::Null));

    let caller = manager.begin().expect("caller transaction");
    let seen = call(&container, &mandatory, "tx", vec![]).expect("mandatory");
    assert_eq!(seen.value(), Some(&Value::Int(caller.0 as i64)));
    assert!(matches!(call(&container, &never, "tx", vec![]), Err(Error::Transaction(_))));
    let seen = call(&container, &supports, "tx", vec![]).expect("supports");
    assert_eq!(seen.value(), Some(&Value::Int(caller.0 as i64)));

    // Rejected calls never reach a bean
    assert_eq!(journal.constructed(), 3);
    manager.rollback().expect("caller rollback");
}

/// Bean-managed beans run outside the caller's transaction and must finish their own
#[test]
fn test_bean_managed_transactions() {
    let (container, manager, journal) = setup();
    let seen = Arc::clone(&manager);
    let class = worker_class(&journal)
        .method("commitWork", 0, move |bean, _| {
            let before = transaction_value(&seen);
            let utx = bean.session()?.user_transaction().map_err(unchecked)?;
            let transaction = utx.begin().map_err(unchecked)?;
            utx.commit().map_err(unchecked)?;
            Ok(Value::List(vec![before, Value::Int(transaction.0 as i64)]))
        })
        .method("forget", 0, |bean, _| {
            let utx = bean.session()?.user_transaction().map_err(unchecked)?;
            utx.begin().map_err(unchecked)?;
            Ok(Value::Null)
        })
        .method("hasUserTransaction", 0, |bean, _| {
            Ok(Value::Bool(bean.session()?.user_transaction().is_ok()))
        })
        .build();
    let deployment = deploy(
        &container,
        Deployment::builder("BeanManaged", class).bean_managed_transactions(true),
    );

    let caller = manager.begin().expect("caller transaction");

    let result = call(&container, &deployment, "commitWork", vec![]).expect("commit work");
    let seen = result.value().and_then(Value::as_list).expect("list").to_vec();
    assert_eq!(seen[0], Value::Null, "caller transaction is suspended");
    assert_ne!(seen[1], Value::Int(caller.0 as i64));
    assert_eq!(manager.committed(), 1);
    assert_eq!(manager.current(), Some(caller));

    let fault = call(&container, &deployment, "forget", vec![]).expect_err("unfinished transaction");
    assert!(matches!(fault, Error::Transaction(_)));
    assert_eq!(manager.rolled_back(), 1);
    assert_eq!(manager.current(), Some(caller));

    let result = call(&container, &deployment, "hasUserTransaction", vec![]).expect("call");
    assert_eq!(result.value(), Some(&Value::Bool(true)));

    manager.commit().expect("caller commit");
}

/// A busy pool does not doom the caller's transaction
#[test]
fn test_access_timeout_keeps_caller_transaction() {
    let (container, manager, journal) = setup();
    let deployment = deploy(
        &container,
        transactional("Busy", &journal, &manager).pool_config(strict_pool(1)),
    );
    let pool = deployment.pool().expect("pool");
    let held = pool.acquire().expect("only instance");
    held.set_pool(&pool);

    let caller = manager.begin().expect("caller transaction");
    let result = call(&container, &deployment, "tx", vec![]).expect("declared, not a fault");
    assert_eq!(result.exception().map(ApplicationError::kind), Some(ACCESS_TIMEOUT));
    assert_eq!(manager.status(caller), Some(TransactionStatus::Active));
    assert_eq!(manager.current(), Some(caller));

    held.exit();
    manager.commit().expect("caller commits");
    assert_eq!(manager.committed(), 1);
    assert_eq!(manager.rolled_back(), 0);
}
