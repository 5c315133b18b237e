//! Instance pool for stateless bean contexts.
//!
//! Each deployed bean owns one [`InstancePool`]. Invocation threads borrow an
//! instance context with [`acquire`](InstancePool::acquire) and hand it back
//! through the context's `exit()` (which calls
//! [`release`](InstancePool::release)) or destroy it with `die()` (which
//! calls [`remove`](InstancePool::remove)).
//!
//! # Design
//!
//! - **Exclusive hand-out**: a context is either idle in the pool or checked
//!   out by exactly one caller. The `busy` set is the source of truth.
//! - **Capacity accounting**: live instances are members plus instances
//!   currently being created. A removed (died) instance frees its slot, so the
//!   next `acquire` may create a replacement.
//! - **Strict pooling**: when `max_size` instances are live and none is idle,
//!   callers wait up to the access timeout and then fail with
//!   [`Error::AccessTimeout`].
//! - **Non-strict pooling**: callers never wait; the pool over-draws and
//!   discards the surplus when it is released.
//! - **Versioning**: [`flush`](InstancePool::flush) bumps the pool version;
//!   contexts created under an older version are discarded on release.
//! - **Sweeping**: [`sweep`](InstancePool::sweep) evicts idle instances past
//!   the idle timeout (never below `min_size`), retires instances past the
//!   max age, and creates replacements. Instances past the max age are
//!   also retired when they are released. A background sweeper thread,
//!   started by [`start`](InstancePool::start), sweeps every
//!   `sweep_interval` and is woken early whenever a discard leaves the pool
//!   below `min_size`.
//! - **Factory outside the lock**: bean construction and its lifecycle
//!   callbacks run with the pool mutex released.
//!
//! # Thread Safety
//!
//! One `parking_lot` mutex guards the bookkeeping and a condvar wakes strict
//! waiters (and a closing thread) when an instance is released, removed, or
//! a creation fails. Counters are atomics so [`stats`](InstancePool::stats)
//! is cheap. The sweeper holds the pool weakly and never keeps it alive.
//!
//! # Example
//!
//! ```rust
//! use stateless_container::{BeanClass, Deployment, PoolConfig, StatelessContainer};
//!
//! let class = BeanClass::builder("Greeter", || Ok(())).build();
//! let deployment = Deployment::builder("Greeter", class)
//!     .pool_config(PoolConfig::default().with_max_size(2).with_min_size(1))
//!     .build()
//!     .unwrap();
//!
//! let container = StatelessContainer::builder().build();
//! container.deploy(&deployment).unwrap();
//!
//! let pool = deployment.pool().unwrap();
//! assert_eq!(pool.stats().idle, 1);
//!
//! let context = pool.acquire().unwrap();
//! context.set_pool(&pool);
//! context.exit();
//! assert_eq!(pool.stats().reused, 1);
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use fxhash::{FxHashMap, FxHashSet};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::factory::InstanceFactory;
use crate::instance::{InstanceContext, InstanceId};

// ============================================================================
// Pool State
// ============================================================================

/// Bookkeeping for one live context.
#[derive(Clone, Copy)]
struct Member {
    version: u64,
    created: Instant,
}

/// A context waiting in the pool.
struct Idle {
    context: Arc<InstanceContext>,
    since: Instant,
}

#[derive(Default)]
struct PoolState {
    /// Contexts ready to be handed out, most recently released last.
    idle: VecDeque<Idle>,
    /// Every live context.
    members: FxHashMap<InstanceId, Member>,
    /// Contexts currently checked out.
    busy: FxHashSet<InstanceId>,
    /// Factory calls in flight; they count against capacity.
    creating: usize,
    /// Aged instances still owed a replacement.
    replacements: usize,
    closed: bool,
}

impl PoolState {
    fn live(&self) -> usize {
        self.members.len() + self.creating
    }

    fn push_idle(&mut self, context: Arc<InstanceContext>) {
        self.idle.push_back(Idle {
            context,
            since: Instant::now(),
        });
    }
}

/// Why a context left the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Eviction {
    Aged,
    IdleTimeout,
}

// ============================================================================
// Sweeper
// ============================================================================

#[derive(Default)]
struct SweepFlags {
    pending: bool,
    stopped: bool,
}

/// Wake-up channel between the pool and its sweeper thread.
#[derive(Default)]
struct SweepSignal {
    flags: Mutex<SweepFlags>,
    wake: Condvar,
}

impl SweepSignal {
    fn request(&self) {
        self.flags.lock().pending = true;
        self.wake.notify_one();
    }

    fn stop(&self) {
        self.flags.lock().stopped = true;
        self.wake.notify_one();
    }

    /// Blocks until a sweep is due; `false` once stopped.
    fn wait(&self, interval: Duration) -> bool {
        let mut flags = self.flags.lock();
        if !flags.pending && !flags.stopped {
            self.wake.wait_for(&mut flags, interval);
        }
        flags.pending = false;
        !flags.stopped
    }
}

fn sweep_loop(pool: Weak<InstancePool>, signal: Arc<SweepSignal>, interval: Duration) {
    while signal.wait(interval) {
        let Some(pool) = pool.upgrade() else {
            break;
        };
        pool.sweep();
    }
}

// ============================================================================
// Instance Pool
// ============================================================================

/// Bounded (strict) or growable (non-strict) pool of instance contexts.
pub struct InstancePool {
    deployment_id: String,
    config: PoolConfig,
    factory: Arc<dyn InstanceFactory>,
    state: Mutex<PoolState>,
    available: Condvar,
    version: AtomicU64,
    signal: Arc<SweepSignal>,
    sweeper: Mutex<Option<JoinHandle<()>>>,

    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
    timeouts: AtomicU64,
    aged: AtomicU64,
    idle_timeouts: AtomicU64,
    replaced: AtomicU64,
    sweeps: AtomicU64,
}

impl InstancePool {
    /// Creates an empty pool that builds contexts with `factory`.
    pub fn new(deployment_id: impl Into<String>, config: PoolConfig, factory: Arc<dyn InstanceFactory>) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            config,
            factory,
            state: Mutex::new(PoolState::default()),
            available: Condvar::new(),
            version: AtomicU64::new(0),
            signal: Arc::default(),
            sweeper: Mutex::new(None),
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            aged: AtomicU64::new(0),
            idle_timeouts: AtomicU64::new(0),
            replaced: AtomicU64::new(0),
            sweeps: AtomicU64::new(0),
        }
    }

    /// Starts the background sweeper if the configuration needs one.
    ///
    /// Returns `true` if a sweeper is running afterwards. Calling it again
    /// is a no-op; a failed thread spawn is logged and leaves the pool
    /// working without sweeps.
    pub fn start(self: &Arc<Self>) -> bool {
        if !self.config.needs_sweeper() || self.is_closed() {
            return false;
        }
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return true;
        }

        let pool = Arc::downgrade(self);
        let signal = Arc::clone(&self.signal);
        let interval = self.config.sweep_interval;
        let spawned = thread::Builder::new()
            .name(format!("pool-sweeper-{}", self.deployment_id))
            .spawn(move || sweep_loop(pool, signal, interval));

        match spawned {
            Ok(handle) => {
                debug!(deployment = %self.deployment_id, ?interval, "pool sweeper started");
                *sweeper = Some(handle);
                true
            }
            Err(error) => {
                warn!(deployment = %self.deployment_id, %error, "cannot start pool sweeper");
                false
            }
        }
    }

    fn stop_sweeper(&self) {
        self.signal.stop();
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            // The sweeper itself may close the pool while discarding
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!(deployment = %self.deployment_id, "pool sweeper panicked");
            }
        }
    }

    /// Returns the id of the deployment this pool serves.
    #[inline]
    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    /// Returns the pool configuration.
    #[inline]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Returns the current pool version.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Returns `true` once the pool has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Checks out a context for exclusive use.
    ///
    /// # Behavior
    ///
    /// 1. An idle context is handed out if there is one.
    /// 2. Otherwise a new one is created if capacity allows (always, in
    ///    non-strict mode).
    /// 3. Otherwise the caller waits for a release, up to the access timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolClosed`] if the pool is or becomes closed
    /// - [`Error::AccessTimeout`] if no context became available in time
    /// - whatever the factory failed with (normally [`Error::InstanceCreation`])
    pub fn acquire(&self) -> Result<Arc<InstanceContext>> {
        let started = Instant::now();
        let deadline = self.config.access_timeout.map(|timeout| started + timeout);
        let mut state = self.state.lock();

        loop {
            if state.closed {
                return Err(Error::PoolClosed(self.deployment_id.clone()));
            }

            if let Some(Idle { context, .. }) = state.idle.pop_back() {
                state.busy.insert(context.id());
                self.reused.fetch_add(1, Ordering::Relaxed);
                trace!(deployment = %self.deployment_id, instance = %context.id(), "reusing pooled instance");
                return Ok(context);
            }

            if !self.config.strict || state.live() < self.config.max_size {
                if state.live() >= self.config.max_size {
                    debug!(deployment = %self.deployment_id, live = state.live(), "pool over-drawn");
                }
                let context = self.create(&mut state)?;
                state.busy.insert(context.id());
                return Ok(context);
            }

            match deadline {
                None => self.available.wait(&mut state),
                Some(deadline) => {
                    if self.available.wait_until(&mut state, deadline).timed_out() {
                        self.timeouts.fetch_add(1, Ordering::Relaxed);
                        let waited = started.elapsed();
                        warn!(deployment = %self.deployment_id, ?waited, "no instance available");
                        return Err(Error::AccessTimeout {
                            deployment: self.deployment_id.clone(),
                            waited,
                        });
                    }
                }
            }
        }
    }

    /// Runs the factory with the lock released and registers the result.
    fn create(&self, state: &mut MutexGuard<'_, PoolState>) -> Result<Arc<InstanceContext>> {
        state.creating += 1;
        let version = self.version();
        let created = MutexGuard::unlocked(state, || self.factory.create());
        state.creating -= 1;

        let context = match created {
            Ok(context) => context,
            Err(error) => {
                // The reserved slot is free again
                self.available.notify_one();
                return Err(error);
            }
        };

        if state.closed {
            MutexGuard::unlocked(state, || context.discard());
            return Err(Error::PoolClosed(self.deployment_id.clone()));
        }

        state.members.insert(
            context.id(),
            Member {
                version,
                created: Instant::now(),
            },
        );
        self.created.fetch_add(1, Ordering::Relaxed);
        debug!(deployment = %self.deployment_id, instance = %context.id(), "created instance");
        Ok(context)
    }

    /// Takes back a checked-out context.
    ///
    /// Returns `true` if the pool kept it. On `false` the context is no
    /// longer a member (surplus, stale version, past its max age, closed
    /// pool, or unknown) and the caller must destroy it.
    pub fn release(&self, context: &Arc<InstanceContext>) -> bool {
        let id = context.id();
        let mut state = self.state.lock();

        if !state.busy.remove(&id) {
            // Not checked out: keep it only if it is already ours
            return state.members.contains_key(&id);
        }

        let Some(&member) = state.members.get(&id) else {
            return false;
        };

        let stale = member.version != self.version();
        let surplus = state.members.len() > self.config.max_size;
        let aged = self.is_aged(&member, Instant::now());
        if state.closed || stale || surplus || aged {
            state.members.remove(&id);
            self.discarded.fetch_add(1, Ordering::Relaxed);
            if aged {
                self.aged.fetch_add(1, Ordering::Relaxed);
                if self.config.replace_aged {
                    state.replacements += 1;
                }
            }
            self.wake_after_discard(&state);
            debug!(deployment = %self.deployment_id, instance = %id, stale, surplus, aged, "discarding released instance");
            return false;
        }

        state.push_idle(Arc::clone(context));
        self.available.notify_one();
        trace!(deployment = %self.deployment_id, instance = %id, "instance pooled");
        true
    }

    /// Permanently removes a context, freeing its slot.
    pub fn remove(&self, context: &InstanceContext) {
        let id = context.id();
        let mut state = self.state.lock();

        state.busy.remove(&id);
        state.idle.retain(|idle| idle.context.id() != id);
        if state.members.remove(&id).is_some() {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            self.wake_after_discard(&state);
        }
    }

    fn is_aged(&self, member: &Member, now: Instant) -> bool {
        self.config
            .max_age
            .is_some_and(|max_age| now.saturating_duration_since(member.created) > max_age)
    }

    /// Wakes whoever waits on a freed slot: strict waiters, a closing
    /// thread, and the sweeper when `min_size` must be restored.
    fn wake_after_discard(&self, state: &PoolState) {
        if state.closed {
            self.available.notify_all();
            return;
        }
        self.available.notify_one();
        if state.live() < self.config.min_size || state.replacements > 0 {
            self.signal.request();
        }
    }

    /// Creates instances until `min_size` are live, plus any replacements
    /// owed for aged instances (up to `max_size`).
    ///
    /// Creation failures are logged and stop the fill; they are not fatal.
    /// Returns the number of instances created.
    pub fn fill(&self) -> usize {
        let mut filled = 0;
        let mut state = self.state.lock();

        while !state.closed {
            if state.live() >= self.config.max_size {
                state.replacements = 0;
            }
            let replacing = state.replacements > 0;
            if !replacing && state.live() >= self.config.min_size {
                break;
            }
            match self.create(&mut state) {
                Ok(context) => {
                    if replacing {
                        state.replacements = state.replacements.saturating_sub(1);
                        self.replaced.fetch_add(1, Ordering::Relaxed);
                    }
                    state.push_idle(context);
                    self.available.notify_one();
                    filled += 1;
                }
                Err(error) => {
                    warn!(deployment = %self.deployment_id, %error, "pool pre-fill stopped");
                    break;
                }
            }
        }
        filled
    }

    /// Runs one eviction pass, then refills.
    ///
    /// Idle instances past the max age are retired. Idle instances unused
    /// for longer than the idle timeout are evicted, least recently used
    /// first, while more than `min_size` instances are live. Discarded
    /// instances get `ejbRemove`. Returns the number of instances evicted.
    pub fn sweep(&self) -> usize {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut evicted = Vec::new();
        {
            let mut state = self.state.lock();
            if state.closed {
                return 0;
            }

            if self.config.max_age.is_some() {
                let mut kept = VecDeque::with_capacity(state.idle.len());
                while let Some(idle) = state.idle.pop_front() {
                    let aged = state
                        .members
                        .get(&idle.context.id())
                        .is_some_and(|member| self.is_aged(member, now));
                    if aged {
                        state.members.remove(&idle.context.id());
                        if self.config.replace_aged {
                            state.replacements += 1;
                        }
                        evicted.push((idle.context, Eviction::Aged));
                    } else {
                        kept.push_back(idle);
                    }
                }
                state.idle = kept;
            }

            if let Some(idle_timeout) = self.config.idle_timeout {
                while state.members.len() > self.config.min_size {
                    let expired = state
                        .idle
                        .front()
                        .is_some_and(|idle| now.saturating_duration_since(idle.since) > idle_timeout);
                    if !expired {
                        break;
                    }
                    if let Some(idle) = state.idle.pop_front() {
                        state.members.remove(&idle.context.id());
                        evicted.push((idle.context, Eviction::IdleTimeout));
                    }
                }
            }

            self.discarded
                .fetch_add(evicted.len() as u64, Ordering::Relaxed);
            if !evicted.is_empty() {
                self.available.notify_all();
            }
        }

        let count = evicted.len();
        for (context, reason) in evicted {
            match reason {
                Eviction::Aged => self.aged.fetch_add(1, Ordering::Relaxed),
                Eviction::IdleTimeout => self.idle_timeouts.fetch_add(1, Ordering::Relaxed),
            };
            trace!(deployment = %self.deployment_id, instance = %context.id(), ?reason, "evicting instance");
            context.discard();
        }
        if count > 0 {
            debug!(deployment = %self.deployment_id, evicted = count, "pool swept");
        }
        self.fill();
        count
    }

    /// Retires every current instance.
    ///
    /// Idle instances are destroyed now; checked-out instances are destroyed
    /// when they are released. The pool is then refilled to `min_size`.
    /// Returns the number of idle instances destroyed.
    pub fn flush(&self) -> usize {
        self.version.fetch_add(1, Ordering::AcqRel);
        let drained = self.drain_idle(false);
        let count = drained.len();
        for context in drained {
            context.discard();
        }
        debug!(deployment = %self.deployment_id, flushed = count, "pool flushed");
        self.fill();
        count
    }

    /// Closes the pool.
    ///
    /// The sweeper stops, waiters fail with [`Error::PoolClosed`], idle
    /// instances are destroyed and checked-out instances are destroyed on
    /// release. Closing then waits up to `close_timeout` for checked-out
    /// instances to come back. Returns the number of idle instances
    /// destroyed.
    pub fn close(&self) -> usize {
        self.stop_sweeper();
        let drained = self.drain_idle(true);
        self.available.notify_all();
        let count = drained.len();
        for context in drained {
            context.discard();
        }

        let outstanding = self.await_checked_out(self.config.close_timeout);
        if outstanding > 0 {
            warn!(deployment = %self.deployment_id, outstanding, "pool closed with instances still checked out");
        }
        debug!(deployment = %self.deployment_id, destroyed = count, "pool closed");
        count
    }

    /// Waits until no context is checked out; returns how many still are.
    fn await_checked_out(&self, timeout: Duration) -> usize {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        while !state.busy.is_empty() {
            match deadline {
                None => self.available.wait(&mut state),
                Some(deadline) => {
                    if self.available.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        state.busy.len()
    }

    fn drain_idle(&self, close: bool) -> Vec<Arc<InstanceContext>> {
        let mut state = self.state.lock();
        if close {
            state.closed = true;
        }
        let drained: Vec<_> = state.idle.drain(..).map(|idle| idle.context).collect();
        for context in &drained {
            state.members.remove(&context.id());
        }
        self.discarded
            .fetch_add(drained.len() as u64, Ordering::Relaxed);
        drained
    }

    /// Returns pool statistics.
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            idle: state.idle.len(),
            checked_out: state.busy.len(),
            live: state.members.len(),
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            aged: self.aged.load(Ordering::Relaxed),
            idle_timeouts: self.idle_timeouts.load(Ordering::Relaxed),
            replaced: self.replaced.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
        }
    }
}

impl Drop for InstancePool {
    fn drop(&mut self) {
        self.signal.stop();
    }
}

impl fmt::Debug for InstancePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstancePool")
            .field("deployment_id", &self.deployment_id)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Pool Statistics
// ============================================================================

/// Snapshot of pool occupancy and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Contexts waiting in the pool.
    pub idle: usize,
    /// Contexts currently checked out.
    pub checked_out: usize,
    /// Live member contexts (idle plus checked out).
    pub live: usize,
    /// Contexts created by the factory.
    pub created: u64,
    /// Acquisitions served from idle contexts.
    pub reused: u64,
    /// Contexts removed, died, flushed or discarded on release.
    pub discarded: u64,
    /// Strict acquisitions that timed out.
    pub timeouts: u64,
    /// Contexts retired for exceeding the max age.
    pub aged: u64,
    /// Idle contexts evicted by the idle timeout.
    pub idle_timeouts: u64,
    /// Replacements created for aged contexts.
    pub replaced: u64,
    /// Sweeps run.
    pub sweeps: u64,
}

impl PoolStats {
    /// Fraction of acquisitions served without creating an instance.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.created + self.reused;
        if total == 0 {
            0.0
        } else {
            self.reused as f64 / total as f64
        }
    }
}
