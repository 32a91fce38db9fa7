//! End-to-end client session against a [`SimLedger`].
//!
//! The session loads a balance, makes a transfer, votes with every neuron
//! as one batch and then keeps the data fresh with a poll loop, all
//! through the certsync core.

use crate::ledger::{LatencyProfile, SimLedger};
use crate::model::{Neuron, NeuronId, NeuronList, Vote};
use anyhow::{Context, Result};
use async_trait::async_trait;
use certsync::{
    sink_fn, BatchItem, BatchObserver, BatchOrchestrator, BatchOutcome, BatchProgress,
    ClientConfig, CoordinatorConfig, CycleReset, EntityState, ErrorEvent, FetchDedupTracker,
    GuardSink, Identity, LoadEvent, PollContext, PollJob, PollScheduler, PrincipalId,
    QueryUpdateCoordinator, ReadSink, RemoteRead, RemoteWrite, SchedulerConfig, StaleWriteGuard,
    TransportError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

type NeuronGuard = StaleWriteGuard<NeuronList, NeuronId, Option<Vote>>;

/// Parameters of one simulated session.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub client: ClientConfig,
    /// Neurons #1..=N are created.
    pub neurons: u64,
    /// Neurons whose votes the ledger rejects.
    pub ineligible: Vec<NeuronId>,
    /// Poll ticks to run after voting.
    pub ticks: u64,
    pub opening_balance: u64,
    pub transfer: u64,
    pub latency: LatencyProfile,
    pub seed: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            neurons: 5,
            ineligible: Vec::new(),
            ticks: 3,
            opening_balance: 1_000,
            transfer: 250,
            latency: LatencyProfile::default(),
            seed: 7,
        }
    }
}

/// What the client ended up showing.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub balance: EntityState<u64>,
    /// Every balance the UI rendered, in order.
    pub balance_history: Vec<(u64, bool)>,
    pub neurons: EntityState<NeuronList>,
    pub vote: BatchOutcome<NeuronId, TransportError>,
    /// Poll results that made it to the stores.
    pub polls_published: usize,
    /// Neuron detail reads issued by the poll loop.
    pub neuron_fetches: usize,
}

/// Logs batch progress as it happens.
struct VoteProgress;

impl BatchObserver<NeuronId, TransportError> for VoteProgress {
    fn on_item_settled(&mut self, item: &BatchItem<NeuronId>, progress: BatchProgress) {
        info!(neuron = %item.id, state = ?item.state, %progress, "vote settled");
    }

    fn on_batch_complete(&mut self, outcome: &BatchOutcome<NeuronId, TransportError>) {
        match &outcome.failure {
            Some(failure) => warn!(summary = %failure, "vote partially failed"),
            None => info!(voted = outcome.succeeded_ids.len(), "all neurons voted"),
        }
    }
}

fn replace<T>(state: &mut T, value: T) {
    *state = value;
}

/// Reads the balance and the neuron list on every tick.
struct RefreshJob {
    coordinator: Arc<QueryUpdateCoordinator>,
    ledger: Arc<SimLedger>,
    identity: Identity,
    principal: PrincipalId,
    balance: Arc<StaleWriteGuard<u64>>,
    neurons: Arc<NeuronGuard>,
    tracker: Arc<FetchDedupTracker<NeuronId>>,
    published: Arc<AtomicUsize>,
    fetches: Arc<AtomicUsize>,
}

impl RefreshJob {
    async fn refresh_balance(&self, ctx: &PollContext) {
        let mutation = self.balance.begin_mutation();
        let published = Arc::clone(&self.published);
        let ctx = ctx.clone();
        let sink = sink_fn(
            move |event: LoadEvent<u64>| {
                let kept = ctx.publish_if_current(|| {
                    mutation.set(event.response, event.certified);
                });
                if kept {
                    published.fetch_add(1, Ordering::SeqCst);
                }
            },
            |event: ErrorEvent<TransportError>| {
                warn!(certified = event.certified, error = %event.error, "balance refresh failed");
            },
        );
        let remote: Arc<dyn RemoteRead<u64>> = Arc::new(self.ledger.balance_read(self.principal));
        if let Err(error) = self
            .coordinator
            .run(self.identity, None, remote, Arc::new(sink))
            .await
        {
            warn!(%error, "balance refresh not started");
        }
    }

    async fn refresh_neurons(&self, ctx: &PollContext, ids: &[NeuronId]) -> usize {
        let result = self
            .coordinator
            .load_missing(&self.tracker, ids, self.identity, None, |id| {
                let id = *id;
                let token = self.neurons.issue_ticket();
                let neurons = Arc::clone(&self.neurons);
                let published = Arc::clone(&self.published);
                let ctx = ctx.clone();
                self.fetches.fetch_add(1, Ordering::SeqCst);

                let remote: Arc<dyn RemoteRead<Neuron>> = Arc::new(self.ledger.neuron_read(id));
                let sink: Arc<dyn ReadSink<Neuron>> = Arc::new(sink_fn(
                    move |event: LoadEvent<Neuron>| {
                        let kept = ctx.publish_if_current(|| {
                            neurons.apply_override(token, id, event.response.vote);
                        });
                        if kept {
                            published.fetch_add(1, Ordering::SeqCst);
                        }
                    },
                    move |event: ErrorEvent<TransportError>| {
                        debug!(neuron = %id, error = %event.error, "neuron refresh failed");
                    },
                ));
                (remote, sink)
            })
            .await;

        match result {
            Ok(fetched) => fetched.len(),
            Err(error) => {
                warn!(%error, "neuron refresh not started");
                0
            }
        }
    }
}

#[async_trait]
impl PollJob for RefreshJob {
    async fn run(&self, ctx: PollContext) {
        self.ledger.sync_replica();
        self.refresh_balance(&ctx).await;

        // The list view and the detail view both ask for every neuron; the
        // second request finds nothing left to fetch this cycle.
        let ids = self.neurons.value().ids();
        let list = self.refresh_neurons(&ctx, &ids).await;
        let detail = self.refresh_neurons(&ctx, &ids).await;
        debug!(tick = ctx.tick(), list, detail, "neurons refreshed");
    }
}

async fn load_neurons(
    coordinator: &QueryUpdateCoordinator,
    ledger: &Arc<SimLedger>,
    identity: Identity,
    neurons: &Arc<NeuronGuard>,
) {
    let sink = Arc::new(GuardSink::new(Arc::clone(neurons), replace::<NeuronList>));
    let remote: Arc<dyn RemoteRead<NeuronList>> = Arc::new(ledger.neurons_read());
    if let Err(error) = coordinator.run(identity, None, remote, sink).await {
        warn!(%error, "neuron load not started");
    }
}

/// Runs one session and reports what the client ended up showing.
pub async fn run_scenario(config: ScenarioConfig) -> Result<ScenarioReport> {
    config.client.validate().context("invalid client configuration")?;
    let interval = config.client.poll_interval();
    // The first tick fires immediately.
    let poll_window = u32::try_from(config.ticks.saturating_sub(1))
        .ok()
        .and_then(|ticks| interval.checked_mul(ticks))
        .and_then(|window| window.checked_add(interval / 2))
        .context("ticks exceed the poll window")?;

    let principal = PrincipalId::new();
    let treasury = PrincipalId::new();
    let identity = Identity::authenticated(principal);
    let ledger = SimLedger::new(config.latency, config.ineligible.clone(), config.seed);
    ledger.open_account(principal, config.opening_balance);
    ledger.open_account(treasury, 0);
    for n in 1..=config.neurons {
        ledger.add_neuron(NeuronId(n), n * 100);
    }
    info!(%principal, neurons = config.neurons, "ledger ready");

    let coordinator = Arc::new(QueryUpdateCoordinator::new(CoordinatorConfig::from(
        &config.client,
    )));

    // ── Balance ──
    let balance: Arc<StaleWriteGuard<u64>> = Arc::new(StaleWriteGuard::new("balance"));
    let history = Arc::new(Mutex::new(Vec::new()));
    {
        let history = Arc::clone(&history);
        balance.subscribe(move |state: &EntityState<u64>| {
            info!(value = state.value, certified = state.certified, "balance rendered");
            history
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((state.value, state.certified));
        });
    }

    let load_balance = || {
        let sink = Arc::new(GuardSink::new(Arc::clone(&balance), replace::<u64>));
        let remote: Arc<dyn RemoteRead<u64>> = Arc::new(ledger.balance_read(principal));
        coordinator.run(identity, None, remote, sink)
    };
    load_balance().await?;

    ledger
        .transfer(principal, treasury, config.transfer)
        .context("transfer failed")?;
    info!(amount = config.transfer, "transfer certified");
    load_balance().await?;

    // ── Vote ──
    let neurons: Arc<NeuronGuard> = Arc::new(StaleWriteGuard::new("neurons"));
    load_neurons(&coordinator, &ledger, identity, &neurons).await;

    let orchestrator = BatchOrchestrator::new("vote");
    let write: Arc<dyn RemoteWrite<NeuronId>> = Arc::new(ledger.vote_write(Vote::Yes));
    let vote = orchestrator
        .run_then_reconcile(
            neurons.value().ids(),
            |id| {
                let write = Arc::clone(&write);
                let neurons = Arc::clone(&neurons);
                let token = neurons.issue_ticket();
                async move {
                    write.mutate(identity, id).await?;
                    neurons.apply_override(token, id, Some(Vote::Yes));
                    Ok::<(), TransportError>(())
                }
            },
            &mut VoteProgress,
            load_neurons(&coordinator, &ledger, identity, &neurons),
        )
        .await?;

    // ── Poll ──
    let published = Arc::new(AtomicUsize::new(0));
    let fetches = Arc::new(AtomicUsize::new(0));
    if config.ticks > 0 {
        let tracker: Arc<FetchDedupTracker<NeuronId>> = Arc::new(FetchDedupTracker::new());
        let handle = PollScheduler::spawn(SchedulerConfig {
            cycle_reset: Some(Arc::clone(&tracker) as Arc<dyn CycleReset>),
            command_buffer: 8,
        });
        let job = Arc::new(RefreshJob {
            coordinator: Arc::clone(&coordinator),
            ledger: Arc::clone(&ledger),
            identity,
            principal,
            balance: Arc::clone(&balance),
            neurons: Arc::clone(&neurons),
            tracker,
            published: Arc::clone(&published),
            fetches: Arc::clone(&fetches),
        });

        handle.start(job, interval).await?;
        tokio::time::sleep(poll_window).await;
        handle.stop().await?;
        handle.shutdown().await?;
    }

    let balance_history = history
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    Ok(ScenarioReport {
        balance: balance.snapshot(),
        balance_history,
        neurons: neurons.snapshot(),
        vote,
        polls_published: published.load(Ordering::SeqCst),
        neuron_fetches: fetches.load(Ordering::SeqCst),
    })
}
