//! Transaction manager seam.
//!
//! The container only demarcates: it begins, suspends, resumes, commits and
//! rolls back through [`TransactionManager`], and never looks inside a
//! transaction. [`ThreadTransactionManager`] is a small in-process manager
//! that associates at most one transaction with each thread; it is the
//! default collaborator and the one the tests drive.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

use fxhash::FxHashMap;
use parking_lot::Mutex;
use tracing::trace;

use crate::deployment::TransactionAttribute;
use crate::error::{Error, Result};

/// Identifies a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Running.
    Active,
    /// Running, but can only roll back.
    MarkedRollback,
    /// Committed.
    Committed,
    /// Rolled back.
    RolledBack,
}

/// Transaction demarcation used by the transaction interceptors.
///
/// "Current" always means the transaction associated with the calling thread.
pub trait TransactionManager: Send + Sync {
    /// Begins a transaction and associates it with the thread.
    fn begin(&self) -> Result<TransactionId>;

    /// Commits the current transaction and disassociates it.
    ///
    /// A transaction marked rollback-only is rolled back instead and the call
    /// fails.
    fn commit(&self) -> Result<()>;

    /// Rolls back the current transaction and disassociates it.
    fn rollback(&self) -> Result<()>;

    /// Marks the current transaction rollback-only.
    fn set_rollback_only(&self) -> Result<()>;

    /// Returns the current transaction.
    fn current(&self) -> Option<TransactionId>;

    /// Returns the status of a transaction this manager knows about.
    fn status(&self, transaction: TransactionId) -> Option<TransactionStatus>;

    /// Disassociates the current transaction from the thread and returns it.
    fn suspend(&self) -> Option<TransactionId>;

    /// Re-associates a suspended transaction with the thread.
    fn resume(&self, transaction: TransactionId) -> Result<()>;
}

/// What the transaction-context interceptor records on an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionData {
    /// Container-managed attribute in force, `None` for bean-managed beans.
    pub attribute: Option<TransactionAttribute>,
    /// Transaction the business method runs in.
    pub transaction: Option<TransactionId>,
}

// ============================================================================
// Thread transaction manager
// ============================================================================

/// In-process transaction manager with one association per thread.
#[derive(Debug, Default)]
pub struct ThreadTransactionManager {
    next_id: AtomicU64,
    associations: Mutex<FxHashMap<ThreadId, TransactionId>>,
    statuses: Mutex<FxHashMap<TransactionId, TransactionStatus>>,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
}

impl ThreadTransactionManager {
    /// Creates a manager with no transactions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transactions committed so far.
    pub fn committed(&self) -> usize {
        self.committed.load(Ordering::Relaxed)
    }

    /// Number of transactions rolled back so far.
    pub fn rolled_back(&self) -> usize {
        self.rolled_back.load(Ordering::Relaxed)
    }

    fn take_current(&self) -> Result<TransactionId> {
        self.associations
            .lock()
            .remove(&thread::current().id())
            .ok_or_else(|| Error::Transaction("no transaction associated with thread".into()))
    }

    fn complete(&self, transaction: TransactionId, status: TransactionStatus) {
        self.statuses.lock().insert(transaction, status);
        match status {
            TransactionStatus::Committed => self.committed.fetch_add(1, Ordering::Relaxed),
            _ => self.rolled_back.fetch_add(1, Ordering::Relaxed),
        };
        trace!(%transaction, ?status, "transaction completed");
    }
}

impl TransactionManager for ThreadTransactionManager {
    fn begin(&self) -> Result<TransactionId> {
        let mut associations = self.associations.lock();
        let thread = thread::current().id();
        if let Some(existing) = associations.get(&thread) {
            return Err(Error::Transaction(format!(
                "thread already associated with {existing}"
            )));
        }

        let transaction = TransactionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        associations.insert(thread, transaction);
        self.statuses.lock().insert(transaction, TransactionStatus::Active);
        trace!(%transaction, "transaction begun");
        Ok(transaction)
    }

    fn commit(&self) -> Result<()> {
        let transaction = self.take_current()?;
        match self.status(transaction) {
            Some(TransactionStatus::MarkedRollback) => {
                self.complete(transaction, TransactionStatus::RolledBack);
                Err(Error::Transaction(format!(
                    "{transaction} was marked rollback-only and has been rolled back"
                )))
            }
            _ => {
                self.complete(transaction, TransactionStatus::Committed);
                Ok(())
            }
        }
    }

    fn rollback(&self) -> Result<()> {
        let transaction = self.take_current()?;
        self.complete(transaction, TransactionStatus::RolledBack);
        Ok(())
    }

    fn set_rollback_only(&self) -> Result<()> {
        let transaction = self
            .current()
            .ok_or_else(|| Error::Transaction("no transaction associated with thread".into()))?;
        self.statuses
            .lock()
            .insert(transaction, TransactionStatus::MarkedRollback);
        Ok(())
    }

    fn current(&self) -> Option<TransactionId> {
        self.associations.lock().get(&thread::current().id()).copied()
    }

    fn status(&self, transaction: TransactionId) -> Option<TransactionStatus> {
        self.statuses.lock().get(&transaction).copied()
    }

    fn suspend(&self) -> Option<TransactionId> {
        self.associations.lock().remove(&thread::current().id())
    }

    fn resume(&self, transaction: TransactionId) -> Result<()> {
        let mut associations = self.associations.lock();
        let thread = thread::current().id();
        if let Some(existing) = associations.get(&thread) {
            return Err(Error::Transaction(format!(
                "cannot resume {transaction}: thread already associated with {existing}"
            )));
        }
        associations.insert(thread, transaction);
        Ok(())
    }
}

// ============================================================================
// User transaction
// ============================================================================

/// Bean-managed transaction demarcation handed to beans through their
/// session context.
#[derive(Clone)]
pub struct UserTransaction {
    manager: Arc<dyn TransactionManager>,
}

impl UserTransaction {
    pub(crate) fn new(manager: Arc<dyn TransactionManager>) -> Self {
        Self { manager }
    }

    /// Begins a transaction on the calling thread.
    pub fn begin(&self) -> Result<TransactionId> {
        self.manager.begin()
    }

    /// Commits the calling thread's transaction.
    pub fn commit(&self) -> Result<()> {
        self.manager.commit()
    }

    /// Rolls back the calling thread's transaction.
    pub fn rollback(&self) -> Result<()> {
        self.manager.rollback()
    }

    /// Marks the calling thread's transaction rollback-only.
    pub fn set_rollback_only(&self) -> Result<()> {
        self.manager.set_rollback_only()
    }

    /// Returns the status of the calling thread's transaction.
    pub fn status(&self) -> Option<TransactionStatus> {
        self.manager
            .current()
            .and_then(|transaction| self.manager.status(transaction))
    }
}

impl fmt::Debug for UserTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserTransaction")
            .field("current", &self.manager.current())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_commit() {
        let manager = ThreadTransactionManager::new();
        let tx = manager.begin().expect("begin");

        assert_eq!(manager.current(), Some(tx));
        assert_eq!(manager.status(tx), Some(TransactionStatus::Active));
        manager.commit().expect("commit");
        assert_eq!(manager.current(), None);
        assert_eq!(manager.status(tx), Some(TransactionStatus::Committed));
        assert_eq!(manager.committed(), 1);
    }

    #[test]
    fn test_rollback_only_commit_fails() {
        let manager = ThreadTransactionManager::new();
        let tx = manager.begin().expect("begin");
        manager.set_rollback_only().expect("mark");

        assert!(matches!(manager.commit(), Err(Error::Transaction(_))));
        assert_eq!(manager.status(tx), Some(TransactionStatus::RolledBack));
        assert_eq!(manager.rolled_back(), 1);
    }

    #[test]
    fn test_nested_begin_is_rejected() {
        let manager = ThreadTransactionManager::new();
        manager.begin().expect("begin");
        assert!(manager.begin().is_err());
        manager.rollback().expect("rollback");
    }

    #[test]
    fn test_suspend_resume() {
        let manager = ThreadTransactionManager::new();
        let outer = manager.begin().expect("begin");

        let suspended = manager.suspend();
        assert_eq!(suspended, Some(outer));
        assert_eq!(manager.current(), None);

        let inner = manager.begin().expect("inner");
        assert_ne!(inner, outer);
        manager.commit().expect("commit inner");

        manager.resume(outer).expect("resume");
        assert_eq!(manager.current(), Some(outer));
        manager.rollback().expect("rollback");
    }

    #[test]
    fn test_associations_are_per_thread() {
        let manager = Arc::new(ThreadTransactionManager::new());
        manager.begin().expect("begin");

        let other = Arc::clone(&manager);
        let seen = std::thread::spawn(move || other.current()).join().expect("thread");
        assert_eq!(seen, None);
        manager.rollback().expect("rollback");
    }

    #[test]
    fn test_user_transaction_status() {
        let manager: Arc<dyn TransactionManager> = Arc::new(ThreadTransactionManager::new());
        let user = UserTransaction::new(Arc::clone(&manager));

        assert_eq!(user.status(), None);
        user.begin().expect("begin");
        assert_eq!(user.status(), Some(TransactionStatus::Active));
        user.set_rollback_only().expect("mark");
        assert_eq!(user.status(), Some(TransactionStatus::MarkedRollback));
        user.rollback().expect("rollback");
        assert_eq!(user.status(), None);
    }
}
