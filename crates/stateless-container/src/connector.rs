//! Resource-adapter connection tracking.
//!
//! When a connection associator is configured the container tracks which
//! managed connections a bean opens during a call (so they can be closed or
//! enlisted), and suspends enlisting while it talks to the transaction
//! manager. The tracker itself is an external collaborator.

use crate::instance::InstanceId;

/// Opaque per-call tracking state returned by [`ConnectionTracker::enter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackingState(pub u64);

/// Connection associator consulted by the connection-tracking interceptors.
pub trait ConnectionTracker: Send + Sync {
    /// Starts tracking connections for a call on `instance`.
    fn enter(&self, deployment: &str, instance: Option<InstanceId>) -> TrackingState;

    /// Stops tracking; closes or releases anything the call left open.
    fn exit(&self, state: TrackingState);

    /// Turns automatic transaction enlisting on or off for this thread,
    /// returning the previous setting.
    fn set_enlisting(&self, enabled: bool) -> bool;
}
