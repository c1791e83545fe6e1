use serde::{Deserialize, Serialize};

pub mod agent;
pub mod config;
pub mod diagnostics;
pub mod environment;
pub mod layout;
pub mod learner;
pub mod map;
pub mod persist;
pub mod playback;
pub mod q_table;
pub mod state_key;

/// Unique identifier for agents. Agents are numbered `0..num_agents`.
pub type EntityId = usize;

/// Represents a cell coordinate on the square grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub row: usize,
    pub col: usize,
}

impl Position {
    pub const fn new(row: usize, col: usize) -> Self {
        Position { row, col }
    }

    /// Returns the neighbouring position shifted by `(d_row, d_col)`, or `None`
    /// if the result would leave a `size × size` grid.
    pub fn offset(self, d_row: isize, d_col: isize, size: usize) -> Option<Position> {
        let row = self.row.checked_add_signed(d_row)?;
        let col = self.col.checked_add_signed(d_col)?;
        (row < size && col < size).then_some(Position { row, col })
    }

    /// Manhattan distance between two positions.
    pub fn manhattan(self, other: Position) -> usize {
        self.row.abs_diff(other.row) + self.col.abs_diff(other.col)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

pub use agent::{Agent, GreedyAgent, PlanningAgent, RandomWalker};
pub use config::{ConfigError, EnvConfig, LearnerConfig, PackageMode, RewardConfig, RunConfig};
pub use diagnostics::RewardHistory;
pub use environment::{Action, EnvError, Environment, Observation, Snapshot, StepOutcome, Terminal};
pub use learner::{EpisodeSummary, SharedQLearner, TrainError};
pub use persist::{PersistError, PolicyFile};
pub use playback::{EpisodeReport, Playback};
pub use q_table::{AgentMemory, QTable};
pub use state_key::StateKey;
