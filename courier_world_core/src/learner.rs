//! Shared multi-agent Q-learning.
//!
//! Every agent owns a Q-table. In each episode all agents run one rollout in
//! parallel, each in a private [`Environment`], and update only their own
//! table. The bootstrap term blends the agent's best continuation value with
//! the mean value its siblings hold for the same state-action pair:
//!
//! ```text
//! target = r                                                   if terminal
//! target = r + γ · ((1 − α) · max Q_i[s'] + α · mean_j≠i Q_j[s][a])  otherwise
//! Q_i[s][a] += η · (target − Q_i[s][a]),   η = η₀ / (1 + k · visits_i[s][a])
//! ```
//!
//! Sibling tables are read as they stood at the start of the episode; the
//! rollouts' tables replace the canonical ones only after every rollout has
//! finished.

use rand::{Rng, SeedableRng, rngs::StdRng};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::{
    EntityId,
    config::{ConfigError, EnvConfig, LearnerConfig},
    diagnostics::RewardHistory,
    environment::{Action, EnvError, Environment, Terminal},
    q_table::{ActionValues, AgentMemory, QTable, argmax, max_value},
    state_key::StateKey,
};

/// 64-bit fractional golden-ratio constant for seed mixing.
const MIXING_CONSTANT: u64 = 0x9e37_79b9_7f4a_7c15;

#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Env(#[from] EnvError),
}

/// What one rollout hands back to the driver.
#[derive(Debug, Clone)]
pub struct RolloutOutcome {
    pub agent: EntityId,
    pub memory: AgentMemory,
    pub total_reward: f64,
    pub steps: usize,
    pub terminal: Option<Terminal>,
}

/// Per-episode summary returned by [`SharedQLearner::run_episode`].
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeSummary {
    pub episode: usize,
    /// Total reward per agent.
    pub rewards: Vec<f64>,
    /// Steps taken per agent.
    pub steps: Vec<usize>,
    pub delivered: usize,
    /// Exploration rate used during this episode.
    pub epsilon: f64,
}

/// `η₀ / (1 + k · visits)`.
pub fn learning_rate(config: &LearnerConfig, visits: u32) -> f64 {
    config.base_learning_rate / (1.0 + visits as f64 * config.learning_rate_decay)
}

/// Mean of `Q_j[key][action]` over every agent `j ≠ agent` whose table holds
/// `key`. Zero when no sibling has seen the state.
pub fn shared_q_value(
    memories: &[AgentMemory],
    agent: EntityId,
    key: StateKey,
    action: Action,
) -> f64 {
    let (sum, count) = memories
        .iter()
        .enumerate()
        .filter(|(sibling, _)| *sibling != agent)
        .filter_map(|(_, memory)| memory.q_table.value(key, action))
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

/// Bootstrapped target for one transition.
pub fn td_target(reward: f64, done: bool, own_best: f64, shared: f64, config: &LearnerConfig) -> f64 {
    if done {
        reward
    } else {
        reward + config.gamma * ((1.0 - config.alpha) * own_best + config.alpha * shared)
    }
}

/// Epsilon-greedy choice over one table row.
pub fn choose_action<R: Rng + ?Sized>(values: &ActionValues, epsilon: f64, rng: &mut R) -> Action {
    if rng.random::<f64>() < epsilon {
        Action::ALL[rng.random_range(0..Action::COUNT)]
    } else {
        argmax(values)
    }
}

/// Runs one full episode for `agent` in `env` and returns the updated memory.
///
/// `memory` is the agent's own working copy. `siblings` holds every agent's
/// canonical memory from the previous episode and is only read.
pub fn rollout<R: Rng + ?Sized>(
    agent: EntityId,
    env: &mut Environment,
    mut memory: AgentMemory,
    siblings: &[AgentMemory],
    epsilon: f64,
    config: &LearnerConfig,
    rng: &mut R,
) -> Result<RolloutOutcome, EnvError> {
    let grid_size = env.config().grid_size;
    env.reset();
    let mut prev = StateKey::encode(&env.observe(agent)?, grid_size);
    let mut total_reward = 0.0;
    let mut steps = 0;

    loop {
        let action = choose_action(memory.ensure(prev), epsilon, rng);
        let outcome = env.step(action, agent)?;
        steps += 1;
        total_reward += outcome.reward;

        let curr = StateKey::encode(&outcome.observation, grid_size);
        let own_best = max_value(memory.ensure(curr));
        let shared = shared_q_value(siblings, agent, prev, action);
        let eta = learning_rate(config, memory.visits.get(prev, action));
        let target = td_target(outcome.reward, outcome.done, own_best, shared, config);

        let current = memory.ensure(prev)[action.index()];
        memory.record_update(prev, action, current + eta * (target - current));
        prev = curr;

        if outcome.done {
            debug!(agent, steps, total_reward, terminal = ?outcome.terminal, "rollout finished");
            return Ok(RolloutOutcome {
                agent,
                memory,
                total_reward,
                steps,
                terminal: outcome.terminal,
            });
        }
    }
}

/// Seed of the rollout of `agent` in `episode`. Independent of thread scheduling.
fn rollout_seed(seed: u64, episode: usize, agent: EntityId) -> u64 {
    let stream = (episode as u64)
        .wrapping_mul(MIXING_CONSTANT)
        .rotate_left(17)
        ^ (agent as u64).wrapping_add(1).wrapping_mul(MIXING_CONSTANT);
    seed ^ stream
}

/// Drives shared Q-learning over repeated episodes.
#[derive(Debug, Clone)]
pub struct SharedQLearner {
    env_config: EnvConfig,
    config: LearnerConfig,
    memories: Vec<AgentMemory>,
    epsilon: f64,
    episode: usize,
    history: RewardHistory,
}

impl SharedQLearner {
    pub fn new(env_config: EnvConfig, config: LearnerConfig) -> Result<Self, ConfigError> {
        env_config.validate()?;
        config.validate()?;
        let num_agents = env_config.num_agents;
        Ok(SharedQLearner {
            memories: vec![AgentMemory::new(config.initial_q); num_agents],
            epsilon: config.epsilon,
            episode: 0,
            history: RewardHistory::new(num_agents, config.sample_interval),
            env_config,
            config,
        })
    }

    /// Runs one episode: a parallel rollout per agent, then the merge and the
    /// epsilon decay.
    pub fn run_episode(&mut self) -> Result<EpisodeSummary, TrainError> {
        let episode = self.episode;
        let epsilon = self.epsilon;
        let siblings = &self.memories;
        let env_config = &self.env_config;
        let config = &self.config;

        let outcomes: Vec<RolloutOutcome> = (0..siblings.len())
            .into_par_iter()
            .map(|agent| -> Result<RolloutOutcome, TrainError> {
                let mut rng = StdRng::seed_from_u64(rollout_seed(config.seed, episode, agent));
                let mut env = Environment::new(env_config.clone(), rng.random())?;
                let own = siblings[agent].clone();
                Ok(rollout(agent, &mut env, own, siblings, epsilon, config, &mut rng)?)
            })
            .collect::<Result<_, _>>()?;

        let mut summary = EpisodeSummary {
            episode,
            rewards: Vec::with_capacity(outcomes.len()),
            steps: Vec::with_capacity(outcomes.len()),
            delivered: 0,
            epsilon,
        };
        for outcome in outcomes {
            summary.rewards.push(outcome.total_reward);
            summary.steps.push(outcome.steps);
            if outcome.terminal == Some(Terminal::Delivered) {
                summary.delivered += 1;
            }
            self.memories[outcome.agent] = outcome.memory;
        }

        if self.history.record(episode, &summary.rewards) {
            info!(
                episode,
                mean_reward = self.history.latest_mean().unwrap_or_default(),
                delivered = summary.delivered,
                epsilon,
                "episode sampled"
            );
        }

        self.epsilon = (self.epsilon * self.config.decay_rate).max(self.config.epsilon_floor);
        self.episode += 1;
        Ok(summary)
    }

    /// Runs episodes until `num_episodes` have completed.
    pub fn train(&mut self) -> Result<&RewardHistory, TrainError> {
        info!(
            agents = self.memories.len(),
            episodes = self.config.num_episodes,
            grid_size = self.env_config.grid_size,
            "training started"
        );
        while self.episode < self.config.num_episodes {
            self.run_episode()?;
        }
        info!(
            states = ?self.memories.iter().map(|m| m.q_table.len()).collect::<Vec<_>>(),
            epsilon = self.epsilon,
            "training finished"
        );
        Ok(&self.history)
    }

    pub fn memories(&self) -> &[AgentMemory] {
        &self.memories
    }

    pub fn tables(&self) -> Vec<QTable> {
        self.memories.iter().map(|m| m.q_table.clone()).collect()
    }

    pub fn into_tables(self) -> Vec<QTable> {
        self.memories.into_iter().map(|m| m.q_table).collect()
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Number of completed episodes.
    pub fn episode(&self) -> usize {
        self.episode
    }

    pub fn history(&self) -> &RewardHistory {
        &self.history
    }

    pub fn env_config(&self) -> &EnvConfig {
        &self.env_config
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Position, config::PackageMode, layout::Layout};

    fn key(n: u64) -> StateKey {
        StateKey(n)
    }

    fn memory_with(entries: &[(u64, Action, f64)]) -> AgentMemory {
        let mut memory = AgentMemory::new(0.0);
        for &(k, action, value) in entries {
            memory.ensure(key(k));
            memory.q_table.row_or_insert(key(k), 0.0)[action.index()] = value;
        }
        memory
    }

    #[test]
    fn learning_rate_decays_with_visits() {
        let config = LearnerConfig::default();
        assert!((learning_rate(&config, 0) - 0.2).abs() < 1e-12);
        assert!((learning_rate(&config, 10) - 0.1).abs() < 1e-12);
        let rates: Vec<f64> = (0..50).map(|v| learning_rate(&config, v)).collect();
        assert!(rates.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn shared_value_averages_siblings_only() {
        let memories = vec![
            memory_with(&[(5, Action::Left, 100.0)]),
            memory_with(&[(5, Action::Left, 2.0)]),
            memory_with(&[(5, Action::Left, 4.0)]),
            memory_with(&[(9, Action::Left, 50.0)]),
        ];
        // Agent 0's own value and agent 3 (never saw key 5) are excluded.
        assert_eq!(shared_q_value(&memories, 0, key(5), Action::Left), 3.0);
        assert_eq!(shared_q_value(&memories, 1, key(5), Action::Left), 52.0);
    }

    #[test]
    fn shared_value_is_zero_without_overlap() {
        let memories = vec![
            memory_with(&[(1, Action::Up, 7.0)]),
            memory_with(&[(2, Action::Up, 9.0)]),
        ];
        assert_eq!(shared_q_value(&memories, 0, key(1), Action::Up), 0.0);
        assert_eq!(shared_q_value(&memories, 1, key(2), Action::Up), 0.0);
        assert_eq!(shared_q_value(&memories[..1], 0, key(1), Action::Up), 0.0);
    }

    #[test]
    fn terminal_target_drops_continuation() {
        let config = LearnerConfig {
            gamma: 0.9,
            alpha: 0.5,
            ..LearnerConfig::default()
        };
        assert_eq!(td_target(125.0, true, 1000.0, 1000.0, &config), 125.0);
        let target = td_target(-1.0, false, 10.0, 20.0, &config);
        assert!((target - (-1.0 + 0.9 * (5.0 + 10.0))).abs() < 1e-12);
    }

    #[test]
    fn greedy_choice_with_zero_epsilon() {
        let mut rng = StdRng::seed_from_u64(3);
        let values = [0.0, 1.0, 5.0, 5.0, -1.0, 0.0];
        for _ in 0..20 {
            assert_eq!(choose_action(&values, 0.0, &mut rng), Action::Left);
        }
    }

    #[test]
    fn full_exploration_covers_every_action() {
        let mut rng = StdRng::seed_from_u64(4);
        let values = [0.0; 6];
        let mut seen = [false; Action::COUNT];
        for _ in 0..500 {
            seen[choose_action(&values, 1.0, &mut rng).index()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    fn corner_config() -> EnvConfig {
        EnvConfig::new(1, 5, 0).with_layout(Layout {
            obstacles: vec![],
            agent_starts: vec![Position::new(0, 0)],
            packages: vec![Position::new(0, 0)],
            goal: Position::new(4, 4),
        })
    }

    #[test]
    fn rollout_initialises_every_visited_state_and_terminates() {
        let env_config = corner_config().with_fuel_per_cell(2);
        let mut env = Environment::new(env_config.clone(), 1).unwrap();
        let config = LearnerConfig::default();
        let mut rng = StdRng::seed_from_u64(9);

        let outcome = rollout(
            0,
            &mut env,
            AgentMemory::new(0.0),
            &[AgentMemory::new(0.0)],
            1.0,
            &config,
            &mut rng,
        )
        .unwrap();

        assert!(outcome.terminal.is_some());
        assert!(outcome.steps as u32 <= env_config.fuel_budget());
        let updates: u32 = outcome
            .memory
            .q_table
            .iter()
            .map(|(k, _)| Action::ALL.iter().map(|a| outcome.memory.visits.get(*k, *a)).sum::<u32>())
            .sum();
        assert_eq!(updates as usize, outcome.steps);
        assert_eq!(outcome.memory.q_table.len(), outcome.memory.visits.len());
    }

    #[test]
    fn single_update_matches_the_rule() {
        // One agent on its package: PICKUP succeeds on the first step, and the
        // uncarried start state is never seen again.
        let mut env = Environment::new(corner_config().with_fuel_per_cell(1), 0).unwrap();
        let config = LearnerConfig {
            gamma: 0.9,
            ..LearnerConfig::default()
        };
        let start = StateKey::encode(&env.observe(0).unwrap(), 5);

        let mut memory = AgentMemory::new(0.0);
        memory.record_update(start, Action::Pickup, 1.0);
        let mut memory = AgentMemory {
            visits: Default::default(),
            ..memory
        };
        memory.ensure(start);

        let mut rng = StdRng::seed_from_u64(0);
        let outcome = rollout(0, &mut env, memory, &[], 0.0, &config, &mut rng).unwrap();
        // Q = 1 + 0.2 · (50 + 0.9 · (0.5 · 0 + 0.5 · 0) − 1) = 10.8
        let learned = outcome.memory.q_table.value(start, Action::Pickup).unwrap();
        assert!((learned - 10.8).abs() < 1e-9, "learned {learned}");
        assert_eq!(outcome.memory.visits.get(start, Action::Pickup), 1);
    }

    #[test]
    fn episode_decays_epsilon_to_floor() {
        let config = LearnerConfig {
            num_episodes: 5,
            epsilon: 1.0,
            decay_rate: 0.5,
            epsilon_floor: 0.2,
            ..LearnerConfig::default()
        };
        let env_config = corner_config().with_fuel_per_cell(1);
        let mut learner = SharedQLearner::new(env_config, config).unwrap();
        let mut used = Vec::new();
        for _ in 0..5 {
            used.push(learner.run_episode().unwrap().epsilon);
        }
        assert_eq!(used, vec![1.0, 0.5, 0.25, 0.2, 0.2]);
        assert_eq!(learner.episode(), 5);
    }

    #[test]
    fn training_is_reproducible_for_a_seed() {
        let env_config = EnvConfig::new(3, 4, 1).with_package_mode(PackageMode::PerAgent);
        let config = LearnerConfig {
            num_episodes: 20,
            sample_interval: 5,
            seed: 77,
            ..LearnerConfig::default()
        };
        let mut first = SharedQLearner::new(env_config.clone(), config.clone()).unwrap();
        let mut second = SharedQLearner::new(env_config, config).unwrap();
        first.train().unwrap();
        second.train().unwrap();
        assert_eq!(first.tables(), second.tables());
        assert_eq!(first.history(), second.history());
        assert_eq!(first.history().episodes(), &[0, 5, 10, 15]);
    }

    #[test]
    fn disjoint_agents_never_share_values() {
        // Per-agent packages in opposite corners: the package cell is part of
        // the key, so the agents' key sets never intersect.
        let env_config = EnvConfig::new(2, 5, 0)
            .with_package_mode(PackageMode::PerAgent)
            .with_fuel_per_cell(2)
            .with_layout(Layout {
                obstacles: vec![],
                agent_starts: vec![Position::new(0, 0), Position::new(4, 4)],
                packages: vec![Position::new(0, 1), Position::new(4, 3)],
                goal: Position::new(2, 2),
            });
        let config = LearnerConfig {
            num_episodes: 10,
            ..LearnerConfig::default()
        };
        let mut learner = SharedQLearner::new(env_config, config).unwrap();
        learner.train().unwrap();

        let memories = learner.memories();
        for (agent, memory) in memories.iter().enumerate() {
            for (k, _) in memory.q_table.iter() {
                for action in Action::ALL {
                    assert_eq!(shared_q_value(memories, agent, *k, action), 0.0);
                }
            }
        }
    }

    #[test]
    fn rejects_invalid_configuration() {
        assert!(matches!(
            SharedQLearner::new(EnvConfig::new(0, 5, 0), LearnerConfig::default()),
            Err(ConfigError::NoAgents)
        ));
        assert!(matches!(
            SharedQLearner::new(EnvConfig::new(2, 3, 6), LearnerConfig::default()),
            Err(ConfigError::GridTooSmall { .. })
        ));
    }
}
