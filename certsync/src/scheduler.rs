//! Background polling.
//!
//! The scheduler is an actor driven by `Start`/`Stop` commands. Every start
//! and stop bumps a generation counter; each job run carries the generation
//! it was started under, so a result that comes back after `stop()` can be
//! recognised as stale and dropped instead of published. Stopping never
//! aborts a call that is already in flight.

use crate::dedup::FetchDedupTracker;
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info};

/// Work run on every tick.
#[async_trait]
pub trait PollJob: Send + Sync {
    async fn run(&self, ctx: PollContext);
}

/// Something cleared at each cycle boundary.
pub trait CycleReset: Send + Sync {
    fn reset_cycle(&self);
}

impl<Id> CycleReset for FetchDedupTracker<Id>
where
    Id: Eq + Hash + Clone + Send,
{
    fn reset_cycle(&self) {
        self.reset();
    }
}

/// Handed to each job run.
#[derive(Debug, Clone)]
pub struct PollContext {
    generation: u64,
    tick: u64,
    current: Arc<AtomicU64>,
}

impl PollContext {
    /// Generation this run was started under.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Tick number since the last start, from 1.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Returns false once the scheduler was stopped or restarted after this
    /// run began.
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    /// Runs `publish` only if this run is still current.
    pub fn publish_if_current<F>(&self, publish: F) -> bool
    where
        F: FnOnce(),
    {
        if self.is_current() {
            publish();
            true
        } else {
            debug!(
                generation = self.generation,
                tick = self.tick,
                "discarding result from stopped poll"
            );
            false
        }
    }
}

/// Configuration for the poll scheduler.
#[derive(Clone, Default)]
pub struct SchedulerConfig {
    /// Cleared before every tick's job run.
    pub cycle_reset: Option<Arc<dyn CycleReset>>,
    /// Command queue capacity.
    pub command_buffer: usize,
}

enum SchedulerCommand {
    Start {
        job: Arc<dyn PollJob>,
        interval: Duration,
        generation: u64,
    },
    Stop,
    Shutdown,
}

struct ActivePoll {
    job: Arc<dyn PollJob>,
    interval: Interval,
    generation: u64,
    tick: u64,
}

/// Handle to a running scheduler actor.
pub struct PollHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    generation: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

/// Spawns poll scheduler actors.
pub struct PollScheduler;

impl PollScheduler {
    /// Spawns the actor on the current tokio runtime.
    pub fn spawn(config: SchedulerConfig) -> PollHandle {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let generation = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(Self::run_loop(
            command_rx,
            Arc::clone(&generation),
            config.cycle_reset,
        ));
        PollHandle {
            command_tx,
            generation,
            task,
        }
    }

    async fn next_tick(active: &mut Option<ActivePoll>) {
        match active {
            Some(poll) => {
                poll.interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    async fn run_loop(
        mut command_rx: mpsc::Receiver<SchedulerCommand>,
        current: Arc<AtomicU64>,
        cycle_reset: Option<Arc<dyn CycleReset>>,
    ) {
        let mut active: Option<ActivePoll> = None;

        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(SchedulerCommand::Start { job, interval, generation }) => {
                        let mut interval = tokio::time::interval(interval);
                        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                        info!(generation, "polling started");
                        active = Some(ActivePoll { job, interval, generation, tick: 0 });
                    }
                    Some(SchedulerCommand::Stop) => {
                        if active.take().is_some() {
                            info!("polling stopped");
                        }
                    }
                    Some(SchedulerCommand::Shutdown) | None => break,
                },
                _ = Self::next_tick(&mut active) => {
                    let Some(poll) = active.as_mut() else { continue };
                    poll.tick += 1;
                    if let Some(reset) = &cycle_reset {
                        reset.reset_cycle();
                    }
                    let ctx = PollContext {
                        generation: poll.generation,
                        tick: poll.tick,
                        current: Arc::clone(&current),
                    };
                    let job = Arc::clone(&poll.job);
                    debug!(generation = poll.generation, tick = poll.tick, "poll tick");
                    tokio::spawn(async move { job.run(ctx).await });
                }
            }
        }
        debug!("poll scheduler exited");
    }
}

impl PollHandle {
    /// Starts polling `job` every `interval`, replacing any running job.
    /// The first run happens immediately.
    pub async fn start(&self, job: Arc<dyn PollJob>, interval: Duration) -> CoreResult<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.command_tx
            .send(SchedulerCommand::Start {
                job,
                interval,
                generation,
            })
            .await
            .map_err(|_| CoreError::SchedulerClosed)
    }

    /// Stops scheduling new runs. Runs already in flight finish, but their
    /// contexts stop being current immediately.
    pub async fn stop(&self) -> CoreResult<()> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.command_tx
            .send(SchedulerCommand::Stop)
            .await
            .map_err(|_| CoreError::SchedulerClosed)
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Stops polling and waits for the actor to exit.
    pub async fn shutdown(self) -> CoreResult<()> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.command_tx
            .send(SchedulerCommand::Shutdown)
            .await
            .map_err(|_| CoreError::SchedulerClosed)?;
        self.task.await.map_err(|_| CoreError::SchedulerClosed)
    }
}
