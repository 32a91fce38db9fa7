//! Batch mutations.
//!
//! Casting a vote with several neurons is one user action made of N
//! independent remote writes. The orchestrator fires them all at once,
//! lets each one succeed or fail on its own, reports live progress, and
//! hands back one aggregate outcome instead of N separate failures.

use crate::error::{CoreError, CoreResult, TransportError};
use crate::remote::RemoteWrite;
use crate::settle::settle_all;
use certsync_types::Identity;
use std::fmt;
use std::future::{self, Future};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Lifecycle of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchState {
    #[default]
    Idle,
    InProgress,
    CompletedAllSuccess,
    CompletedPartialFailure,
}

/// Lifecycle of one item in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    Succeeded,
    Failed,
}

/// One item of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem<Id> {
    pub id: Id,
    pub state: ItemState,
    pub error: Option<String>,
}

/// Running counts for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchProgress {
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
}

impl BatchProgress {
    /// Items that have settled either way.
    pub fn settled(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Returns true once every item has settled.
    pub fn is_complete(&self) -> bool {
        self.settled() == self.total
    }
}

impl fmt::Display for BatchProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} done", self.settled(), self.total)
    }
}

/// The failures of one batch, reported together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateBatchFailure<Id, E> {
    /// Failed items with their errors, in input order.
    pub failed: Vec<(Id, E)>,
    /// Size of the whole batch.
    pub total: usize,
}

impl<Id, E> AggregateBatchFailure<Id, E>
where
    Id: fmt::Display,
    E: fmt::Display,
{
    /// Ids of the failed items.
    pub fn failed_ids(&self) -> impl Iterator<Item = &Id> {
        self.failed.iter().map(|(id, _)| id)
    }

    /// One human-readable line describing the whole failure.
    pub fn summary(&self) -> String {
        let ids: Vec<String> = self.failed.iter().map(|(id, _)| id.to_string()).collect();
        let mut summary = format!(
            "{} of {} failed ({})",
            self.failed.len(),
            self.total,
            ids.join(", ")
        );
        if let Some((_, first)) = self.failed.first() {
            summary.push_str(&format!(": {first}"));
        }
        summary
    }
}

impl<Id, E> fmt::Display for AggregateBatchFailure<Id, E>
where
    Id: fmt::Display,
    E: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

impl<Id, E> std::error::Error for AggregateBatchFailure<Id, E>
where
    Id: fmt::Debug + fmt::Display,
    E: fmt::Debug + fmt::Display,
{
}

/// The result of a fully settled batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome<Id, E> {
    /// Succeeded ids, in input order.
    pub succeeded_ids: Vec<Id>,
    /// Failed ids, in input order.
    pub failed_ids: Vec<Id>,
    /// Every item with its final state, in input order.
    pub items: Vec<BatchItem<Id>>,
    /// Present when at least one item failed.
    pub failure: Option<AggregateBatchFailure<Id, E>>,
}

impl<Id, E> BatchOutcome<Id, E> {
    /// Returns true if every item succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.failed_ids.is_empty()
    }

    /// Final counts.
    pub fn progress(&self) -> BatchProgress {
        BatchProgress {
            succeeded: self.succeeded_ids.len(),
            failed: self.failed_ids.len(),
            total: self.items.len(),
        }
    }
}

/// Receives batch progress. Both methods run synchronously on the task
/// driving the batch.
pub trait BatchObserver<Id, E> {
    /// An item settled; `progress` already counts it.
    fn on_item_settled(&mut self, _item: &BatchItem<Id>, _progress: BatchProgress) {}

    /// Every item settled. Called exactly once per batch.
    fn on_batch_complete(&mut self, _outcome: &BatchOutcome<Id, E>) {}
}

impl<Id, E> BatchObserver<Id, E> for () {}

fn lock_state(state: &Mutex<BatchState>) -> MutexGuard<'_, BatchState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds the orchestrator for the running batch and frees it on drop, also
/// when the batch future is dropped before it finished.
struct BatchSlot<'a> {
    state: &'a Mutex<BatchState>,
    label: &'a str,
}

impl BatchSlot<'_> {
    fn set(&self, state: BatchState) {
        *lock_state(self.state) = state;
    }
}

impl Drop for BatchSlot<'_> {
    fn drop(&mut self) {
        let mut state = lock_state(self.state);
        if *state == BatchState::InProgress {
            warn!(label = %self.label, "batch dropped before every item settled");
        }
        *state = BatchState::Idle;
    }
}

/// Runs batches of independent writes, one batch at a time.
pub struct BatchOrchestrator {
    label: String,
    state: Mutex<BatchState>,
}

impl BatchOrchestrator {
    /// Creates an idle orchestrator.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(BatchState::Idle),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BatchState> {
        lock_state(&self.state)
    }

    /// Current batch state.
    pub fn state(&self) -> BatchState {
        *self.lock()
    }

    /// Claims the orchestrator for one batch. Only an idle orchestrator can
    /// be claimed; it stays claimed through completion and reconcile.
    fn begin(&self) -> CoreResult<BatchSlot<'_>> {
        let mut state = self.lock();
        if *state != BatchState::Idle {
            return Err(CoreError::BatchInProgress);
        }
        *state = BatchState::InProgress;
        Ok(BatchSlot {
            state: &self.state,
            label: &self.label,
        })
    }

    /// Runs `operation` for every item concurrently.
    pub async fn run<Id, E, F, Fut>(
        &self,
        items: Vec<Id>,
        operation: F,
        observer: &mut (dyn BatchObserver<Id, E> + Send),
    ) -> CoreResult<BatchOutcome<Id, E>>
    where
        Id: Clone + fmt::Display,
        E: fmt::Display,
        F: Fn(Id) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        self.run_then_reconcile(items, operation, observer, future::ready(()))
            .await
    }

    /// Runs `operation` for every item concurrently, then awaits
    /// `reconcile` whatever the outcome.
    ///
    /// Every operation is created before any of them is polled. An item's
    /// failure never cancels the others. The batch stays in a completed
    /// state while `reconcile` runs and is idle again once this returns.
    pub async fn run_then_reconcile<Id, E, F, Fut, R>(
        &self,
        items: Vec<Id>,
        operation: F,
        observer: &mut (dyn BatchObserver<Id, E> + Send),
        reconcile: R,
    ) -> CoreResult<BatchOutcome<Id, E>>
    where
        Id: Clone + fmt::Display,
        E: fmt::Display,
        F: Fn(Id) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        R: Future<Output = ()>,
    {
        let slot = self.begin()?;
        let total = items.len();
        info!(label = %self.label, total, "batch started");

        let mut tracked: Vec<BatchItem<Id>> = items
            .iter()
            .map(|id| BatchItem {
                id: id.clone(),
                state: ItemState::Pending,
                error: None,
            })
            .collect();
        let mut progress = BatchProgress {
            total,
            ..BatchProgress::default()
        };

        let launched: Vec<_> = items
            .into_iter()
            .map(|id| (id.clone(), operation(id)))
            .collect();

        let settled = settle_all(launched, |done| {
            let item = &mut tracked[done.index];
            match &done.outcome {
                Ok(()) => {
                    item.state = ItemState::Succeeded;
                    progress.succeeded += 1;
                }
                Err(error) => {
                    item.state = ItemState::Failed;
                    item.error = Some(error.to_string());
                    progress.failed += 1;
                    debug!(label = %self.label, id = %done.id, %error, "batch item failed");
                }
            }
            observer.on_item_settled(item, progress);
        })
        .await;

        let mut errors: Vec<Option<E>> = Vec::with_capacity(total);
        errors.resize_with(total, || None);
        for s in settled {
            if let Err(error) = s.outcome {
                errors[s.index] = Some(error);
            }
        }

        let mut succeeded_ids = Vec::new();
        let mut failed_ids = Vec::new();
        let mut failed = Vec::new();
        for (item, error) in tracked.iter().zip(errors) {
            match error {
                Some(error) => {
                    failed_ids.push(item.id.clone());
                    failed.push((item.id.clone(), error));
                }
                None => succeeded_ids.push(item.id.clone()),
            }
        }

        let failure = (!failed.is_empty()).then(|| AggregateBatchFailure { failed, total });
        let outcome = BatchOutcome {
            succeeded_ids,
            failed_ids,
            items: tracked,
            failure,
        };

        slot.set(if outcome.all_succeeded() {
            BatchState::CompletedAllSuccess
        } else {
            BatchState::CompletedPartialFailure
        });
        match &outcome.failure {
            Some(failure) => warn!(label = %self.label, summary = %failure, "batch completed with failures"),
            None => info!(label = %self.label, total, "batch completed"),
        }
        observer.on_batch_complete(&outcome);

        reconcile.await;
        drop(slot);
        Ok(outcome)
    }

    /// Applies `args` through `remote` for every item.
    pub async fn run_writes<A>(
        &self,
        items: Vec<A>,
        identity: Identity,
        remote: Arc<dyn RemoteWrite<A>>,
        observer: &mut (dyn BatchObserver<A, TransportError> + Send),
    ) -> CoreResult<BatchOutcome<A, TransportError>>
    where
        A: Clone + fmt::Display + Send + 'static,
    {
        self.run(
            items,
            |args| {
                let remote = Arc::clone(&remote);
                async move { remote.mutate(identity, args).await }
            },
            observer,
        )
        .await
    }
}

impl Default for BatchOrchestrator {
    fn default() -> Self {
        Self::new("batch")
    }
}
