//! Stale-write guarding for a shared entity.
//!
//! Responses to remote reads arrive in whatever order the network returns
//! them. A guard orders writes by the logical time they were *issued*: each
//! read or mutation takes a ticket before its first await, and a write is
//! applied only if its ticket is at least as new as the one already applied.
//!
//! Fine-grained overrides ("balance of account X is now V") carry their own
//! tickets. When a full-state write that is logically older than an override
//! lands, the override is reapplied on top, so a slow "list everything"
//! response cannot revert a narrow update that happened after it.

use crate::publish::{Publisher, SubscriptionId};
use certsync_types::{SequenceClock, SequenceToken};
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Applies a field-level override to a whole-entity value.
pub trait FieldOverride<K, V> {
    /// Overwrites `field` with `value`.
    fn apply_override(&mut self, field: &K, value: &V);
}

/// Field type for guards that never take overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoOverride {}

impl<S> FieldOverride<NoOverride, NoOverride> for S {
    fn apply_override(&mut self, field: &NoOverride, _value: &NoOverride) {
        match *field {}
    }
}

/// The published state of one guarded entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityState<S> {
    /// Current value.
    pub value: S,
    /// Ticket of the last full-state write, `None` before the first one.
    pub applied_sequence: Option<SequenceToken>,
    /// Whether `value` came from a certified response.
    pub certified: bool,
}

/// A field-level write waiting to be reapplied over older full-state writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOverride<K, V> {
    pub token: SequenceToken,
    pub field: K,
    pub value: V,
}

struct GuardState<S, K, V> {
    clock: SequenceClock,
    entity: EntityState<S>,
    overrides: Vec<PendingOverride<K, V>>,
    last_certified: Option<S>,
}

impl<S, K, V> GuardState<S, K, V>
where
    S: FieldOverride<K, V>,
{
    fn reapply_overrides(&mut self) {
        for o in &self.overrides {
            self.entity.value.apply_override(&o.field, &o.value);
        }
    }
}

/// Issue-order write protection for one entity.
///
/// Subscriber callbacks run after the state lock is released but while
/// publication is serialized; a callback must not write back into the guard
/// that notified it.
pub struct StaleWriteGuard<S, K = NoOverride, V = NoOverride> {
    name: String,
    state: Mutex<GuardState<S, K, V>>,
    publish_gate: Mutex<()>,
    publisher: Publisher<EntityState<S>>,
}

impl<S, K, V> StaleWriteGuard<S, K, V>
where
    S: FieldOverride<K, V> + Clone + Default,
    K: PartialEq + Clone + Debug,
    V: Clone,
{
    /// Creates a guard holding `S::default()`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(GuardState {
                clock: SequenceClock::new(),
                entity: EntityState::default(),
                overrides: Vec::new(),
                last_certified: None,
            }),
            publish_gate: Mutex::new(()),
            publisher: Publisher::new(),
        }
    }

    /// Name used in log lines.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, GuardState<S, K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes the latest state. Holding the gate while reading the state
    /// keeps subscribers from ever seeing an older state after a newer one.
    fn publish_latest(&self) {
        let _gate = self
            .publish_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.lock().entity.clone();
        self.publisher.publish(&snapshot);
    }

    /// Takes the next ticket. Call this when a write is issued, before
    /// awaiting anything.
    pub fn issue_ticket(&self) -> SequenceToken {
        self.lock().clock.next()
    }

    /// Applies `mutate` if `token` is not older than the last applied write.
    ///
    /// With an equal token an uncertified write never replaces certified
    /// data. Returns false, leaving the entity untouched, when the write is
    /// stale.
    pub fn try_apply<F>(&self, token: SequenceToken, certified: bool, mutate: F) -> bool
    where
        F: FnOnce(&mut S),
    {
        {
            let mut st = self.lock();
            if let Some(applied) = st.entity.applied_sequence {
                let downgrade = token == applied && st.entity.certified && !certified;
                if token < applied || downgrade {
                    debug!(
                        guard = %self.name,
                        %token,
                        %applied,
                        certified,
                        "store write rejected"
                    );
                    return false;
                }
            }

            st.clock.observe(token);
            mutate(&mut st.entity.value);
            st.entity.applied_sequence = Some(token);
            st.entity.certified = certified;
            if certified {
                st.last_certified = Some(st.entity.value.clone());
            }

            st.overrides.retain(|o| o.token > token);
            st.reapply_overrides();
        }
        self.publish_latest();
        true
    }

    /// Records a field-level write and applies it to the current value.
    ///
    /// Rejected if older than the last full-state write or than a pending
    /// override for the same field.
    pub fn apply_override(&self, token: SequenceToken, field: K, value: V) -> bool {
        {
            let mut st = self.lock();
            let older_than_state = st.entity.applied_sequence.is_some_and(|a| token < a);
            let older_than_override = st
                .overrides
                .iter()
                .any(|o| o.field == field && token < o.token);
            if older_than_state || older_than_override {
                debug!(guard = %self.name, %token, ?field, "override rejected");
                return false;
            }

            st.clock.observe(token);
            st.entity.value.apply_override(&field, &value);
            st.overrides.retain(|o| o.field != field);
            st.overrides.push(PendingOverride {
                token,
                field,
                value,
            });
        }
        self.publish_latest();
        true
    }

    /// Hides uncertified data written with `token` after its certified
    /// counterpart failed.
    ///
    /// Restores the last certified value (or the default if none) when the
    /// entity still holds the uncertified write for `token`; otherwise newer
    /// data has landed and nothing changes.
    pub fn revert_unproven(&self, token: SequenceToken) -> bool {
        {
            let mut st = self.lock();
            if st.entity.applied_sequence != Some(token) || st.entity.certified {
                return false;
            }
            let restored = st.last_certified.clone();
            st.entity.certified = restored.is_some();
            st.entity.value = restored.unwrap_or_default();
            st.reapply_overrides();
            debug!(guard = %self.name, %token, "reverted unproven data");
        }
        self.publish_latest();
        true
    }

    /// Empties the entity, e.g. on sign-out.
    ///
    /// Every ticket issued before the reset becomes stale, so responses
    /// still in flight for the previous session are dropped.
    pub fn reset(&self) {
        {
            let mut st = self.lock();
            let floor = st.clock.next();
            st.entity = EntityState {
                value: S::default(),
                applied_sequence: Some(floor),
                certified: false,
            };
            st.overrides.clear();
            st.last_certified = None;
        }
        self.publish_latest();
    }

    /// Current state.
    pub fn snapshot(&self) -> EntityState<S> {
        self.lock().entity.clone()
    }

    /// Current value.
    pub fn value(&self) -> S {
        self.lock().entity.value.clone()
    }

    /// Overrides still waiting for a newer full-state write.
    pub fn pending_overrides(&self) -> Vec<PendingOverride<K, V>> {
        self.lock().overrides.clone()
    }

    /// Registers a callback for every state change.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&EntityState<S>) + Send + Sync + 'static,
    {
        self.publisher.subscribe(callback)
    }

    /// Removes a callback registered with [`subscribe`](Self::subscribe).
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.publisher.unsubscribe(id)
    }

    /// Starts a single mutation with a fresh ticket.
    pub fn begin_mutation(self: &Arc<Self>) -> Mutation<S, K, V> {
        Mutation {
            token: self.issue_ticket(),
            guard: Arc::clone(self),
        }
    }
}

/// One logical mutation of a guarded entity.
///
/// Both the query and the update response of the mutation are written with
/// the same ticket; if the update fails, [`cancel`](Self::cancel) takes the
/// unproven query data back out.
pub struct Mutation<S, K = NoOverride, V = NoOverride> {
    guard: Arc<StaleWriteGuard<S, K, V>>,
    token: SequenceToken,
}

impl<S, K, V> Mutation<S, K, V>
where
    S: FieldOverride<K, V> + Clone + Default,
    K: PartialEq + Clone + Debug,
    V: Clone,
{
    /// The ticket this mutation writes with.
    pub fn token(&self) -> SequenceToken {
        self.token
    }

    /// Replaces the entity value.
    pub fn set(&self, value: S, certified: bool) -> bool {
        self.guard.try_apply(self.token, certified, |s| *s = value)
    }

    /// Edits the entity value in place.
    pub fn update<F>(&self, certified: bool, mutate: F) -> bool
    where
        F: FnOnce(&mut S),
    {
        self.guard.try_apply(self.token, certified, mutate)
    }

    /// Abandons the mutation, reverting its uncertified data if still shown.
    pub fn cancel(self) -> bool {
        self.guard.revert_unproven(self.token)
    }
}
