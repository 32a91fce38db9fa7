//! Settle-all combinator.
//!
//! Drives a set of tagged futures to completion concurrently on the current
//! task and reports every outcome, successful or not. Nothing short-circuits
//! on the first error.

use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;

/// The outcome of one tagged future.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled<Id, T, E> {
    pub id: Id,
    /// Position of the future in the input list.
    pub index: usize,
    pub outcome: Result<T, E>,
}

impl<Id, T, E> Settled<Id, T, E> {
    /// Returns true if the future resolved successfully.
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Drops the tag.
    pub fn into_result(self) -> Result<T, E> {
        self.outcome
    }
}

/// Polls every future concurrently until all have settled.
///
/// `on_settled` runs synchronously as each future settles, in completion
/// order. The returned list is in completion order as well.
pub async fn settle_all<Id, T, E, Fut, F>(
    items: Vec<(Id, Fut)>,
    mut on_settled: F,
) -> Vec<Settled<Id, T, E>>
where
    Fut: Future<Output = Result<T, E>>,
    F: FnMut(&Settled<Id, T, E>),
{
    let mut pending: FuturesUnordered<_> = items
        .into_iter()
        .enumerate()
        .map(|(index, (id, fut))| async move {
            Settled {
                id,
                index,
                outcome: fut.await,
            }
        })
        .collect();

    let mut settled = Vec::with_capacity(pending.len());
    while let Some(done) = pending.next().await {
        on_settled(&done);
        settled.push(done);
    }
    settled
}

/// Splits settled outcomes into successes and failures, each in input order.
pub fn partition_settled<Id, T, E>(
    mut settled: Vec<Settled<Id, T, E>>,
) -> (Vec<(Id, T)>, Vec<(Id, E)>) {
    settled.sort_by_key(|s| s.index);
    let mut ok = Vec::new();
    let mut failed = Vec::new();
    for s in settled {
        match s.outcome {
            Ok(value) => ok.push((s.id, value)),
            Err(error) => failed.push((s.id, error)),
        }
    }
    (ok, failed)
}
