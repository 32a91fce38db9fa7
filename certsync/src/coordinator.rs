//! Dual-channel read coordination.
//!
//! A read can be answered by a fast, unverified query and by a slow,
//! certified update call. The coordinator dispatches the channels the
//! strategy asks for at the same time and merges their answers into one
//! stream that only ever gets better: once certified data has been
//! delivered, a late uncertified answer is dropped.

use crate::config::ClientConfig;
use crate::dedup::FetchDedupTracker;
use crate::error::{CoreError, CoreResult, TransportError};
use crate::remote::RemoteRead;
use crate::sink::ReadSink;
use certsync_types::{ErrorEvent, FetchRequest, FetchStrategy, Identity, LoadEvent};
use futures::future::join_all;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Configuration for the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Strategy for signed-in callers that don't ask for one.
    pub default_strategy: Option<FetchStrategy>,
    /// Prefix for log lines.
    pub label: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_strategy: None,
            label: "certsync".to_string(),
        }
    }
}

impl From<&ClientConfig> for CoordinatorConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            default_strategy: config.default_strategy,
            label: config.log_label.clone(),
        }
    }
}

/// Per-invocation delivery state.
#[derive(Default)]
struct Delivery {
    certified_delivered: Mutex<bool>,
}

impl Delivery {
    /// Hands a channel result to the sink unless it is stale. Returns true
    /// if a response was delivered.
    ///
    /// The flag stays locked while the sink runs, so an uncertified answer
    /// can never be delivered after a certified one.
    fn settle<T>(
        &self,
        certified: bool,
        result: Result<T, TransportError>,
        identity: Identity,
        sink: &dyn ReadSink<T>,
    ) -> bool {
        let mut certified_delivered = self
            .certified_delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if !certified && *certified_delivered {
            debug!(ok = result.is_ok(), "stale query response discarded");
            return false;
        }

        match result {
            Ok(response) => {
                sink.on_load(LoadEvent {
                    response,
                    certified,
                });
                if certified {
                    *certified_delivered = true;
                }
                true
            }
            Err(error) => {
                sink.on_error(ErrorEvent {
                    certified,
                    error,
                    identity,
                });
                false
            }
        }
    }
}

struct ChannelSettled {
    certified: bool,
    delivered: bool,
}

/// Runs reads on the query and update channels and merges the results.
pub struct QueryUpdateCoordinator {
    config: CoordinatorConfig,
    next_invocation: AtomicU64,
}

impl QueryUpdateCoordinator {
    /// Creates a coordinator.
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            next_invocation: AtomicU64::new(1),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Picks the strategy for a read and checks it against the identity.
    ///
    /// Fails with [`CoreError::IdentityRequired`] if a certified channel is
    /// requested for an anonymous caller.
    pub fn resolve_strategy(
        &self,
        requested: Option<FetchStrategy>,
        identity: &Identity,
    ) -> CoreResult<FetchStrategy> {
        let requested = match requested {
            Some(s) => Some(s),
            None if identity.is_anonymous() => None,
            None => self.config.default_strategy,
        };
        let strategy = FetchStrategy::resolve(requested, identity);
        if strategy.needs_certified() && identity.is_anonymous() {
            warn!(label = %self.config.label, %strategy, "certified read without identity");
            return Err(CoreError::IdentityRequired { strategy });
        }
        Ok(strategy)
    }

    /// Issues one logical read.
    ///
    /// All channels of the strategy are dispatched before anything is
    /// awaited and keep running after this returns. Returns once the first
    /// useful result has been delivered: the certified answer when a
    /// certified channel was requested, the query answer otherwise. If that
    /// channel fails, returns once every channel has settled.
    ///
    /// Channel failures go to `sink.on_error`; the only error returned here
    /// is [`CoreError::IdentityRequired`], raised before any remote call.
    pub async fn run<T>(
        &self,
        identity: Identity,
        strategy: Option<FetchStrategy>,
        remote: Arc<dyn RemoteRead<T>>,
        sink: Arc<dyn ReadSink<T>>,
    ) -> CoreResult<()>
    where
        T: Send + 'static,
    {
        let strategy = self.resolve_strategy(strategy, &identity)?;
        let invocation = self.next_invocation.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        info!(
            label = %self.config.label,
            invocation,
            %strategy,
            %identity,
            "read started"
        );

        let delivery = Arc::new(Delivery::default());
        let (settled_tx, mut settled_rx) = mpsc::unbounded_channel();
        let channels = strategy.channels();

        for &certified in channels {
            let remote = Arc::clone(&remote);
            let sink = Arc::clone(&sink);
            let delivery = Arc::clone(&delivery);
            let settled_tx = settled_tx.clone();
            let label = self.config.label.clone();

            tokio::spawn(async move {
                let result = remote.fetch(FetchRequest { certified, identity }).await;
                let ok = result.is_ok();
                let delivered = delivery.settle(certified, result, identity, sink.as_ref());
                debug!(
                    label = %label,
                    invocation,
                    certified,
                    ok,
                    delivered,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "channel settled"
                );
                // The caller may have stopped listening already.
                let _ = settled_tx.send(ChannelSettled {
                    certified,
                    delivered,
                });
            });
        }
        drop(settled_tx);

        let awaited = strategy.needs_certified();
        let mut remaining = channels.len();
        while let Some(settled) = settled_rx.recv().await {
            remaining -= 1;
            if (settled.delivered && settled.certified == awaited) || remaining == 0 {
                break;
            }
        }

        info!(
            label = %self.config.label,
            invocation,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "read resolved"
        );
        Ok(())
    }

    /// Reads every id not already fetched in this cycle.
    ///
    /// The ids are marked in `tracker` before anything is dispatched, so a
    /// second caller asking for the same ids while these reads are in flight
    /// gets nothing to do. All reads run concurrently. Returns the ids that
    /// were actually fetched.
    pub async fn load_missing<Id, T, F>(
        &self,
        tracker: &FetchDedupTracker<Id>,
        ids: &[Id],
        identity: Identity,
        strategy: Option<FetchStrategy>,
        mut make_read: F,
    ) -> CoreResult<Vec<Id>>
    where
        Id: Eq + Hash + Clone,
        T: Send + 'static,
        F: FnMut(&Id) -> (Arc<dyn RemoteRead<T>>, Arc<dyn ReadSink<T>>),
    {
        let strategy = self.resolve_strategy(strategy, &identity)?;
        let missing = tracker.get_not_loaded_ids(ids);
        if missing.is_empty() {
            debug!(label = %self.config.label, "all ids already loaded this cycle");
            return Ok(missing);
        }

        let reads: Vec<_> = missing
            .iter()
            .map(|id| {
                let (remote, sink) = make_read(id);
                self.run(identity, Some(strategy), remote, sink)
            })
            .collect();
        for result in join_all(reads).await {
            result?;
        }
        Ok(missing)
    }
}

impl Default for QueryUpdateCoordinator {
    fn default() -> Self {
        Self::new(CoordinatorConfig::default())
    }
}
