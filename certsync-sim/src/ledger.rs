//! In-memory ledger with a lagging query replica.
//!
//! Update calls read and write the certified state. Query calls read a
//! replica that only catches up when [`SimLedger::sync_replica`] runs, so
//! a query right after a write answers with the old value, the way a
//! single node that has not caught up would.

use crate::model::{Neuron, NeuronId, NeuronList, Vote};
use async_trait::async_trait;
use certsync::{FetchRequest, Identity, PrincipalId, RemoteRead, RemoteWrite, TransportError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Response times of the two channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyProfile {
    pub query: Duration,
    pub update: Duration,
    /// Up to this much is added to every call.
    pub jitter: Duration,
}

impl Default for LatencyProfile {
    fn default() -> Self {
        Self {
            query: Duration::from_millis(20),
            update: Duration::from_millis(150),
            jitter: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    balances: HashMap<PrincipalId, u64>,
    neurons: BTreeMap<NeuronId, Neuron>,
}

struct LedgerState {
    certified: Snapshot,
    replica: Snapshot,
    rng: StdRng,
}

/// A simulated ledger.
pub struct SimLedger {
    latency: LatencyProfile,
    ineligible: HashSet<NeuronId>,
    state: Mutex<LedgerState>,
}

impl SimLedger {
    /// Creates an empty ledger. Votes from `ineligible` neurons are always
    /// rejected.
    pub fn new(
        latency: LatencyProfile,
        ineligible: impl IntoIterator<Item = NeuronId>,
        seed: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ineligible: ineligible.into_iter().collect(),
            state: Mutex::new(LedgerState {
                certified: Snapshot::default(),
                replica: Snapshot::default(),
                rng: StdRng::seed_from_u64(seed),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens an account on both the certified state and the replica.
    pub fn open_account(&self, principal: PrincipalId, balance: u64) {
        let mut st = self.lock();
        st.certified.balances.insert(principal, balance);
        st.replica.balances.insert(principal, balance);
    }

    /// Registers a neuron on both the certified state and the replica.
    pub fn add_neuron(&self, id: NeuronId, stake: u64) {
        let neuron = Neuron {
            id,
            stake,
            vote: None,
        };
        let mut st = self.lock();
        st.certified.neurons.insert(id, neuron.clone());
        st.replica.neurons.insert(id, neuron);
    }

    /// Moves `amount` between accounts. Only the certified state changes.
    pub fn transfer(
        &self,
        from: PrincipalId,
        to: PrincipalId,
        amount: u64,
    ) -> Result<(), TransportError> {
        let mut st = self.lock();
        let balances = &mut st.certified.balances;
        let available = balances.get(&from).copied().unwrap_or(0);
        if available < amount {
            return Err(TransportError::new(format!(
                "insufficient funds: {available} < {amount}"
            )));
        }
        balances.insert(from, available - amount);
        *balances.entry(to).or_insert(0) += amount;
        Ok(())
    }

    /// Brings the query replica up to date.
    pub fn sync_replica(&self) {
        let mut st = self.lock();
        st.replica = st.certified.clone();
        debug!("replica synced");
    }

    /// Certified balance of `principal`.
    pub fn certified_balance(&self, principal: PrincipalId) -> u64 {
        self.lock()
            .certified
            .balances
            .get(&principal)
            .copied()
            .unwrap_or(0)
    }

    async fn respond(&self, certified: bool) {
        let delay = {
            let mut st = self.lock();
            let base = if certified {
                self.latency.update
            } else {
                self.latency.query
            };
            let jitter_ms = self.latency.jitter.as_millis() as u64;
            base + Duration::from_millis(st.rng.gen_range(0..=jitter_ms))
        };
        tokio::time::sleep(delay).await;
    }

    fn snapshot_for(&self, request: &FetchRequest) -> Result<Snapshot, TransportError> {
        if request.certified && request.identity.is_anonymous() {
            return Err(TransportError::new("update call requires a signed-in caller"));
        }
        let st = self.lock();
        Ok(if request.certified {
            st.certified.clone()
        } else {
            st.replica.clone()
        })
    }

    /// Read of one account balance.
    pub fn balance_read(self: &Arc<Self>, principal: PrincipalId) -> BalanceRead {
        BalanceRead {
            ledger: Arc::clone(self),
            principal,
        }
    }

    /// Read of every neuron.
    pub fn neurons_read(self: &Arc<Self>) -> NeuronsRead {
        NeuronsRead {
            ledger: Arc::clone(self),
        }
    }

    /// Read of one neuron.
    pub fn neuron_read(self: &Arc<Self>, id: NeuronId) -> NeuronRead {
        NeuronRead {
            ledger: Arc::clone(self),
            id,
        }
    }

    /// Write casting `vote` for the neuron passed to `mutate`.
    pub fn vote_write(self: &Arc<Self>, vote: Vote) -> VoteWrite {
        VoteWrite {
            ledger: Arc::clone(self),
            vote,
        }
    }
}

pub struct BalanceRead {
    ledger: Arc<SimLedger>,
    principal: PrincipalId,
}

#[async_trait]
impl RemoteRead<u64> for BalanceRead {
    async fn fetch(&self, request: FetchRequest) -> Result<u64, TransportError> {
        self.ledger.respond(request.certified).await;
        let snapshot = self.ledger.snapshot_for(&request)?;
        snapshot
            .balances
            .get(&self.principal)
            .copied()
            .ok_or_else(|| TransportError::new(format!("no account for {}", self.principal)))
    }
}

pub struct NeuronsRead {
    ledger: Arc<SimLedger>,
}

#[async_trait]
impl RemoteRead<NeuronList> for NeuronsRead {
    async fn fetch(&self, request: FetchRequest) -> Result<NeuronList, TransportError> {
        self.ledger.respond(request.certified).await;
        let snapshot = self.ledger.snapshot_for(&request)?;
        Ok(NeuronList(snapshot.neurons.into_values().collect()))
    }
}

pub struct NeuronRead {
    ledger: Arc<SimLedger>,
    id: NeuronId,
}

#[async_trait]
impl RemoteRead<Neuron> for NeuronRead {
    async fn fetch(&self, request: FetchRequest) -> Result<Neuron, TransportError> {
        self.ledger.respond(request.certified).await;
        let mut snapshot = self.ledger.snapshot_for(&request)?;
        snapshot
            .neurons
            .remove(&self.id)
            .ok_or_else(|| TransportError::new(format!("unknown neuron {}", self.id)))
    }
}

pub struct VoteWrite {
    ledger: Arc<SimLedger>,
    vote: Vote,
}

#[async_trait]
impl RemoteWrite<NeuronId> for VoteWrite {
    async fn mutate(&self, identity: Identity, id: NeuronId) -> Result<(), TransportError> {
        self.ledger.respond(true).await;
        if identity.is_anonymous() {
            return Err(TransportError::new("update call requires a signed-in caller"));
        }
        if self.ledger.ineligible.contains(&id) {
            return Err(TransportError::new(format!(
                "neuron {id} is not eligible to vote"
            )));
        }

        let mut st = self.ledger.lock();
        let neuron = st
            .certified
            .neurons
            .get_mut(&id)
            .ok_or_else(|| TransportError::new(format!("unknown neuron {id}")))?;
        if neuron.vote.is_some() {
            return Err(TransportError::new(format!("neuron {id} already voted")));
        }
        neuron.vote = Some(self.vote);
        Ok(())
    }
}
