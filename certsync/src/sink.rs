//! Sinks: the only places a read writes into application state.

use crate::error::TransportError;
use crate::guard::{FieldOverride, StaleWriteGuard};
use certsync_types::{ErrorEvent, LoadEvent, SequenceToken};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Receives the results of a dual-channel read.
pub trait ReadSink<T>: Send + Sync {
    /// A channel answered.
    fn on_load(&self, event: LoadEvent<T>);

    /// A channel failed.
    fn on_error(&self, event: ErrorEvent<TransportError>) {
        debug!(certified = event.certified, error = %event.error, "unhandled read error");
    }
}

/// [`ReadSink`] backed by two closures.
pub struct FnSink<L, E> {
    on_load: L,
    on_error: E,
}

/// Wraps a pair of closures as a [`ReadSink`].
pub fn sink_fn<T, L, E>(on_load: L, on_error: E) -> FnSink<L, E>
where
    L: Fn(LoadEvent<T>) + Send + Sync,
    E: Fn(ErrorEvent<TransportError>) + Send + Sync,
{
    FnSink { on_load, on_error }
}

impl<T, L, E> ReadSink<T> for FnSink<L, E>
where
    L: Fn(LoadEvent<T>) + Send + Sync,
    E: Fn(ErrorEvent<TransportError>) + Send + Sync,
{
    fn on_load(&self, event: LoadEvent<T>) {
        (self.on_load)(event);
    }

    fn on_error(&self, event: ErrorEvent<TransportError>) {
        (self.on_error)(event);
    }
}

/// Routes one read into a [`StaleWriteGuard`].
///
/// The ticket is taken when the sink is created, i.e. when the read is
/// issued. Uncertified errors are ignored. A certified error reverts any
/// uncertified data this read already wrote and blocks the uncertified
/// answer from landing afterwards.
pub struct GuardSink<S, K, V, F> {
    guard: Arc<StaleWriteGuard<S, K, V>>,
    token: SequenceToken,
    apply: F,
    certified_failed: AtomicBool,
}

impl<S, K, V, F> GuardSink<S, K, V, F>
where
    S: FieldOverride<K, V> + Clone + Default,
    K: PartialEq + Clone + Debug,
    V: Clone,
{
    /// Creates a sink writing through `guard` with a fresh ticket.
    pub fn new(guard: Arc<StaleWriteGuard<S, K, V>>, apply: F) -> Self {
        let token = guard.issue_ticket();
        Self {
            guard,
            token,
            apply,
            certified_failed: AtomicBool::new(false),
        }
    }

    /// The ticket this read writes with.
    pub fn token(&self) -> SequenceToken {
        self.token
    }
}

impl<T, S, K, V, F> ReadSink<T> for GuardSink<S, K, V, F>
where
    S: FieldOverride<K, V> + Clone + Default + Send,
    K: PartialEq + Clone + Debug + Send,
    V: Clone + Send,
    F: Fn(&mut S, T) + Send + Sync,
{
    fn on_load(&self, event: LoadEvent<T>) {
        if !event.certified && self.certified_failed.load(Ordering::SeqCst) {
            debug!(guard = %self.guard.name(), token = %self.token, "dropping unproven data after certified failure");
            return;
        }
        let LoadEvent {
            response,
            certified,
        } = event;
        self.guard
            .try_apply(self.token, certified, |state| (self.apply)(state, response));
    }

    fn on_error(&self, event: ErrorEvent<TransportError>) {
        if !event.certified {
            debug!(guard = %self.guard.name(), error = %event.error, "query failed, waiting for update");
            return;
        }
        self.certified_failed.store(true, Ordering::SeqCst);
        warn!(
            guard = %self.guard.name(),
            identity = %event.identity,
            error = %event.error,
            "certified read failed"
        );
        self.guard.revert_unproven(self.token);
    }
}
