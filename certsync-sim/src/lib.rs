//! Simulated ledger and scripted client session for certsync.
//!
//! The ledger answers query calls from a replica that lags behind its
//! certified state and can be told to reject votes from chosen neurons, so
//! every path through the sync core (stale query answers, certified
//! corrections, partial batch failures, polling) can be exercised without
//! a network.

pub mod ledger;
pub mod model;
pub mod scenario;

pub use ledger::{BalanceRead, LatencyProfile, NeuronRead, NeuronsRead, SimLedger, VoteWrite};
pub use model::{Neuron, NeuronId, NeuronList, Vote};
pub use scenario::{run_scenario, ScenarioConfig, ScenarioReport};
