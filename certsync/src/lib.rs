//! Data-synchronization and batch-mutation core for certsync.
//!
//! Every piece of remote state can be read through two channels: a fast,
//! unverified *query* answered by a single node, and a slow *update* call
//! whose answer is certified by consensus. This crate keeps a reactive
//! client correct when both answers race each other and several writers
//! target the same state.
//!
//! ## Components
//!
//! - **Dedup** ([`FetchDedupTracker`]): remembers which ids were already
//!   requested in the current cycle
//! - **Guard** ([`StaleWriteGuard`]): orders writes to one entity by the
//!   time they were issued, not the time they completed
//! - **Coordinator** ([`QueryUpdateCoordinator`]): dispatches both channels
//!   and merges them into a stream that never downgrades certified data
//! - **Batch** ([`BatchOrchestrator`]): fires N independent writes at once
//!   and reports one aggregate outcome
//! - **Scheduler** ([`PollScheduler`]): start/stop polling with stale
//!   results discarded by generation
//!
//! ## Read flow
//!
//! 1. **Ticket**: the store's guard issues a ticket for the read
//! 2. **Dispatch**: query and update calls start together
//! 3. **Deliver**: each answer goes to the sink unless certified data
//!    already arrived
//! 4. **Apply**: the guard applies the answer if its ticket is not stale
//!
//! # Example
//!
//! ```
//! use certsync::{GuardSink, QueryUpdateCoordinator, StaleWriteGuard};
//! use std::sync::Arc;
//!
//! let coordinator = QueryUpdateCoordinator::default();
//! let balance: Arc<StaleWriteGuard<u64>> = Arc::new(StaleWriteGuard::new("balance"));
//! let sink = GuardSink::new(Arc::clone(&balance), |state: &mut u64, value: u64| *state = value);
//!
//! assert_eq!(coordinator.config().label, "certsync");
//! assert_eq!(sink.token().value(), 1);
//! ```

pub mod batch;
mod config;
pub mod coordinator;
pub mod dedup;
mod error;
pub mod guard;
pub mod publish;
pub mod remote;
pub mod scheduler;
pub mod settle;
pub mod sink;

pub use batch::{
    AggregateBatchFailure, BatchItem, BatchObserver, BatchOrchestrator, BatchOutcome,
    BatchProgress, BatchState, ItemState,
};
pub use config::ClientConfig;
pub use coordinator::{CoordinatorConfig, QueryUpdateCoordinator};
pub use dedup::FetchDedupTracker;
pub use error::{CoreError, CoreResult, TransportError};
pub use guard::{EntityState, FieldOverride, Mutation, NoOverride, PendingOverride, StaleWriteGuard};
pub use publish::{Publisher, SubscriptionId};
pub use remote::{read_fn, FnRead, RemoteRead, RemoteWrite};
pub use scheduler::{CycleReset, PollContext, PollHandle, PollJob, PollScheduler, SchedulerConfig};
pub use settle::{partition_settled, settle_all, Settled};
pub use sink::{sink_fn, FnSink, GuardSink, ReadSink};

pub use certsync_types::{
    ErrorEvent, FetchRequest, FetchStrategy, Identity, LoadEvent, PrincipalId, SequenceClock,
    SequenceToken,
};
