//! Configuration for the delivery environment and the shared learner.
//!
//! Every struct deserializes with defaults for missing fields, so a run can be
//! described by a partial JSON document and completed from [`Default`].

use serde::{Deserialize, Serialize};

use crate::{EntityId, layout::Layout};

/// Largest supported grid side. Keeps [`crate::StateKey`] inside `u64`.
pub const MAX_GRID_SIZE: usize = 1024;

/// Smallest supported grid side.
pub const MIN_GRID_SIZE: usize = 3;

/// Errors raised while validating a configuration. All of them are fatal at setup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one agent is required")]
    NoAgents,
    #[error("grid size {grid_size} is outside the supported range {min}..={max}")]
    GridSizeOutOfRange {
        grid_size: usize,
        min: usize,
        max: usize,
    },
    #[error("a {grid_size}x{grid_size} grid cannot hold {required} entities (needs {required} <= {available})")]
    GridTooSmall {
        grid_size: usize,
        required: usize,
        available: usize,
    },
    #[error("invalid {name} = {value}: expected {expected}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        expected: &'static str,
    },
    #[error("invalid layout: {0}")]
    InvalidLayout(String),
    #[error("malformed run configuration: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// How packages are assigned to agents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageMode {
    /// One package and pickup cell shared by every agent.
    #[default]
    Shared,
    /// Agent `i` owns package `i`.
    PerAgent,
}

impl PackageMode {
    /// Number of packages placed for `num_agents` agents.
    pub fn num_packages(self, num_agents: usize) -> usize {
        match self {
            PackageMode::Shared => 1,
            PackageMode::PerAgent => num_agents,
        }
    }

    /// Index of the package that `agent` observes and may pick up.
    pub fn package_for(self, agent: EntityId) -> usize {
        match self {
            PackageMode::Shared => 0,
            PackageMode::PerAgent => agent,
        }
    }
}

/// Reward table of the environment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardConfig {
    /// Applied to every movement action, including rejected moves.
    pub move_penalty: f64,
    pub pickup_reward: f64,
    pub drop_reward: f64,
    /// Added on the step that empties the fuel tank, and returned alone by
    /// any step attempted afterwards.
    pub out_of_fuel_penalty: f64,
}

impl RewardConfig {
    /// Default rewards scaled by grid area.
    pub fn for_grid(grid_size: usize) -> Self {
        let area = (grid_size * grid_size) as f64;
        RewardConfig {
            move_penalty: -1.0,
            pickup_reward: area * 2.0,
            drop_reward: area * 5.0,
            out_of_fuel_penalty: -10_000.0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.move_penalty <= 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "move_penalty",
                value: self.move_penalty,
                expected: "a non-positive value",
            });
        }
        if !(self.pickup_reward > 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "pickup_reward",
                value: self.pickup_reward,
                expected: "a positive value",
            });
        }
        if !(self.drop_reward > self.pickup_reward) {
            return Err(ConfigError::InvalidParameter {
                name: "drop_reward",
                value: self.drop_reward,
                expected: "a value greater than pickup_reward",
            });
        }
        // Running out of fuel must never be worth more than a full delivery.
        if !(self.out_of_fuel_penalty < -(self.pickup_reward + self.drop_reward)) {
            return Err(ConfigError::InvalidParameter {
                name: "out_of_fuel_penalty",
                value: self.out_of_fuel_penalty,
                expected: "a penalty larger than pickup_reward + drop_reward",
            });
        }
        Ok(())
    }
}

/// Configuration of the grid world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    pub num_agents: usize,
    pub grid_size: usize,
    pub num_obstacles: usize,
    pub package_mode: PackageMode,
    /// Fuel budget per agent is `grid_size² × fuel_per_cell`.
    pub fuel_per_cell: u32,
    /// Overrides [`RewardConfig::for_grid`].
    pub rewards: Option<RewardConfig>,
    /// Fixed layout restored on every reset. `None` samples a new one each time.
    pub layout: Option<Layout>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        EnvConfig {
            num_agents: 3,
            grid_size: 5,
            num_obstacles: 1,
            package_mode: PackageMode::Shared,
            fuel_per_cell: 30,
            rewards: None,
            layout: None,
        }
    }
}

impl EnvConfig {
    pub fn new(num_agents: usize, grid_size: usize, num_obstacles: usize) -> Self {
        EnvConfig {
            num_agents,
            grid_size,
            num_obstacles,
            ..EnvConfig::default()
        }
    }

    pub fn with_package_mode(mut self, mode: PackageMode) -> Self {
        self.package_mode = mode;
        self
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn with_rewards(mut self, rewards: RewardConfig) -> Self {
        self.rewards = Some(rewards);
        self
    }

    pub fn with_fuel_per_cell(mut self, fuel_per_cell: u32) -> Self {
        self.fuel_per_cell = fuel_per_cell;
        self
    }

    pub fn num_packages(&self) -> usize {
        self.package_mode.num_packages(self.num_agents)
    }

    pub fn area(&self) -> usize {
        self.grid_size * self.grid_size
    }

    /// Steps each agent may take per episode.
    pub fn fuel_budget(&self) -> u32 {
        (self.area() as u32).saturating_mul(self.fuel_per_cell)
    }

    /// The effective reward table.
    pub fn rewards(&self) -> RewardConfig {
        self.rewards
            .unwrap_or_else(|| RewardConfig::for_grid(self.grid_size))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_agents == 0 {
            return Err(ConfigError::NoAgents);
        }
        if !(MIN_GRID_SIZE..=MAX_GRID_SIZE).contains(&self.grid_size) {
            return Err(ConfigError::GridSizeOutOfRange {
                grid_size: self.grid_size,
                min: MIN_GRID_SIZE,
                max: MAX_GRID_SIZE,
            });
        }
        // Agents, obstacles, packages, plus the goal and one spare free cell.
        let required = self
            .num_agents
            .checked_add(self.num_obstacles)
            .and_then(|n| n.checked_add(self.num_packages()))
            .and_then(|n| n.checked_add(2))
            .unwrap_or(usize::MAX);
        if required > self.area() {
            return Err(ConfigError::GridTooSmall {
                grid_size: self.grid_size,
                required,
                available: self.area(),
            });
        }
        if self.fuel_per_cell == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "fuel_per_cell",
                value: 0.0,
                expected: "at least 1",
            });
        }
        self.rewards().validate()?;
        if let Some(layout) = &self.layout {
            layout.validate(self)?;
        }
        Ok(())
    }
}

/// Hyper-parameters of the shared Q-learning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    pub num_episodes: usize,
    /// Discount factor, `0 < gamma <= 1`.
    pub gamma: f64,
    /// Initial exploration probability.
    pub epsilon: f64,
    /// Multiplicative epsilon decay applied after each episode.
    pub decay_rate: f64,
    pub epsilon_floor: f64,
    /// Weight of the sibling estimate against the agent's own best continuation.
    pub alpha: f64,
    pub base_learning_rate: f64,
    /// `k` in `eta = base / (1 + k × visits)`.
    pub learning_rate_decay: f64,
    /// Value written into every slot of a newly seen state.
    pub initial_q: f64,
    /// Rewards are sampled for diagnostics every `sample_interval` episodes.
    pub sample_interval: usize,
    pub seed: u64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        LearnerConfig {
            num_episodes: 10_000,
            gamma: 0.99,
            epsilon: 1.0,
            decay_rate: 0.9995,
            epsilon_floor: 0.25,
            alpha: 0.5,
            base_learning_rate: 0.2,
            learning_rate_decay: 0.1,
            initial_q: 0.0,
            sample_interval: 10,
            seed: 0,
        }
    }
}

impl LearnerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn check(
            name: &'static str,
            value: f64,
            ok: bool,
            expected: &'static str,
        ) -> Result<(), ConfigError> {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::InvalidParameter {
                    name,
                    value,
                    expected,
                })
            }
        }

        check("gamma", self.gamma, self.gamma > 0.0 && self.gamma <= 1.0, "0 < gamma <= 1")?;
        check(
            "epsilon",
            self.epsilon,
            (0.0..=1.0).contains(&self.epsilon),
            "0 <= epsilon <= 1",
        )?;
        check(
            "decay_rate",
            self.decay_rate,
            self.decay_rate > 0.0 && self.decay_rate < 1.0,
            "0 < decay_rate < 1",
        )?;
        check(
            "epsilon_floor",
            self.epsilon_floor,
            self.epsilon_floor >= 0.0 && self.epsilon_floor <= self.epsilon,
            "0 <= epsilon_floor <= epsilon",
        )?;
        check("alpha", self.alpha, (0.0..=1.0).contains(&self.alpha), "0 <= alpha <= 1")?;
        check(
            "base_learning_rate",
            self.base_learning_rate,
            self.base_learning_rate > 0.0 && self.base_learning_rate <= 1.0,
            "0 < base_learning_rate <= 1",
        )?;
        check(
            "learning_rate_decay",
            self.learning_rate_decay,
            self.learning_rate_decay >= 0.0,
            "a non-negative value",
        )?;
        check(
            "initial_q",
            self.initial_q,
            self.initial_q.is_finite(),
            "a finite value",
        )?;
        check(
            "sample_interval",
            self.sample_interval as f64,
            self.sample_interval > 0,
            "at least 1",
        )?;
        Ok(())
    }
}

/// A complete training run: environment plus learner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub env: EnvConfig,
    pub learner: LearnerConfig,
}

impl RunConfig {
    /// Parses a run from JSON and validates it.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let run: RunConfig = serde_json::from_str(text)?;
        run.validate()?;
        Ok(run)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.env.validate()?;
        self.learner.validate()
    }
}
