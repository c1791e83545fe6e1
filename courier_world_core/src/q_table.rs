use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{environment::Action, state_key::StateKey};

/// One value per action, indexed by [`Action::index`].
pub type ActionValues = [f64; Action::COUNT];

/// Sparse action-value table of one agent.
///
/// Only visited states are stored. Serializes as a JSON object mapping the
/// decimal state key to its six action values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QTable {
    entries: BTreeMap<StateKey, ActionValues>,
}

impl QTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: StateKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn get(&self, key: StateKey) -> Option<&ActionValues> {
        self.entries.get(&key)
    }

    pub fn value(&self, key: StateKey, action: Action) -> Option<f64> {
        self.entries.get(&key).map(|values| values[action.index()])
    }

    pub fn insert(&mut self, key: StateKey, values: ActionValues) {
        self.entries.insert(key, values);
    }

    /// The row for `key`, created with `baseline` in every slot if missing.
    pub fn row_or_insert(&mut self, key: StateKey, baseline: f64) -> &mut ActionValues {
        self.entries.entry(key).or_insert([baseline; Action::COUNT])
    }

    /// Greedy action for `key`, or `None` if the state was never visited.
    pub fn best_action(&self, key: StateKey) -> Option<Action> {
        self.entries.get(&key).map(argmax)
    }

    pub fn max_value(&self, key: StateKey) -> Option<f64> {
        self.entries.get(&key).map(max_value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, &ActionValues)> {
        self.entries.iter()
    }
}

/// Index of the largest value. Ties go to the lowest action index.
pub fn argmax(values: &ActionValues) -> Action {
    let mut best = 0;
    for (index, value) in values.iter().enumerate().skip(1) {
        if *value > values[best] {
            best = index;
        }
    }
    Action::ALL[best]
}

pub fn max_value(values: &ActionValues) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Per state-action visit counters, kept in lockstep with a [`QTable`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VisitCounts {
    entries: BTreeMap<StateKey, [u32; Action::COUNT]>,
}

impl VisitCounts {
    pub fn get(&self, key: StateKey, action: Action) -> u32 {
        self.entries
            .get(&key)
            .map_or(0, |counts| counts[action.index()])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything one agent learns: its Q-table and the matching visit counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMemory {
    pub q_table: QTable,
    pub visits: VisitCounts,
    /// Value given to every action of a newly seen state.
    pub baseline: f64,
}

impl AgentMemory {
    pub fn new(baseline: f64) -> Self {
        AgentMemory {
            q_table: QTable::new(),
            visits: VisitCounts::default(),
            baseline,
        }
    }

    /// Creates the table row and visit counters for `key` if this is its
    /// first visit. Must run before any read of `key`.
    pub fn ensure(&mut self, key: StateKey) -> &ActionValues {
        self.visits
            .entries
            .entry(key)
            .or_insert([0; Action::COUNT]);
        self.q_table.row_or_insert(key, self.baseline)
    }

    /// Overwrites `Q[key][action]` and counts the visit.
    pub fn record_update(&mut self, key: StateKey, action: Action, value: f64) {
        self.q_table.row_or_insert(key, self.baseline)[action.index()] = value;
        self.visits
            .entries
            .entry(key)
            .or_insert([0; Action::COUNT])[action.index()] += 1;
    }
}
