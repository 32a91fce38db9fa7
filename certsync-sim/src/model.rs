//! Governance data served by the simulated ledger.

use certsync::FieldOverride;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a neuron.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NeuronId(pub u64);

impl fmt::Display for NeuronId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A ballot cast by a neuron.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Yes,
    No,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neuron {
    pub id: NeuronId,
    pub stake: u64,
    pub vote: Option<Vote>,
}

/// The signed-in user's neurons, ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeuronList(pub Vec<Neuron>);

impl NeuronList {
    pub fn get(&self, id: NeuronId) -> Option<&Neuron> {
        self.0.iter().find(|n| n.id == id)
    }

    /// Ids in list order.
    pub fn ids(&self) -> Vec<NeuronId> {
        self.0.iter().map(|n| n.id).collect()
    }

    /// Number of neurons that have voted.
    pub fn voted(&self) -> usize {
        self.0.iter().filter(|n| n.vote.is_some()).count()
    }
}

/// A vote recorded for one neuron overrides that neuron's ballot in a
/// list loaded earlier.
impl FieldOverride<NeuronId, Option<Vote>> for NeuronList {
    fn apply_override(&mut self, field: &NeuronId, value: &Option<Vote>) {
        if let Some(neuron) = self.0.iter_mut().find(|n| n.id == *field) {
            neuron.vote = *value;
        }
    }
}
