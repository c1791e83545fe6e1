use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::{
    EntityId, Position,
    config::{ConfigError, EnvConfig, PackageMode, RewardConfig},
    layout::Layout,
    map::{CellType, Grid},
};

/// Represents actions an agent can decide to take.
///
/// The discriminant is the action's index into a Q-table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Up = 0,
    Down = 1,
    Left = 2,
    Right = 3,
    Pickup = 4,
    Drop = 5,
}

impl Action {
    pub const COUNT: usize = 6;

    pub const ALL: [Action; Action::COUNT] = [
        Action::Up,
        Action::Down,
        Action::Left,
        Action::Right,
        Action::Pickup,
        Action::Drop,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Action> {
        Action::ALL.get(index).copied()
    }

    /// `(d_row, d_col)` for movement actions.
    pub fn delta(self) -> Option<(isize, isize)> {
        match self {
            Action::Up => Some((-1, 0)),
            Action::Down => Some((1, 0)),
            Action::Left => Some((0, -1)),
            Action::Right => Some((0, 1)),
            Action::Pickup | Action::Drop => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Action::Up => "UP",
            Action::Down => "DOWN",
            Action::Left => "LEFT",
            Action::Right => "RIGHT",
            Action::Pickup => "PICKUP",
            Action::Drop => "DROP",
        };
        f.write_str(name)
    }
}

/// Why an agent's episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Terminal {
    Delivered,
    OutOfFuel,
}

/// Holds the state of an agent within the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub id: EntityId,
    pub position: Position,
    /// Index of the package being carried.
    pub carrying: Option<usize>,
    pub fuel_remaining: u32,
    pub terminal: Option<Terminal>,
    /// Sum of every reward this agent received during the episode.
    pub total_reward: f64,
}

impl AgentState {
    pub fn is_done(&self) -> bool {
        self.terminal.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageState {
    /// Pickup cell. Stays fixed for the episode.
    pub position: Position,
    pub picked_up: bool,
    pub delivered: bool,
    pub carried_by: Option<EntityId>,
}

/// What a single agent observes. This is exactly the input of [`crate::StateKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Observation {
    pub position: Position,
    pub carrying: bool,
    /// Pickup cell of the package this agent is responsible for.
    pub package: Position,
    pub goal: Position,
}

/// A copy of the whole environment state, enough to render a frame or to pick
/// greedy actions from stored tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub grid_size: usize,
    pub package_mode: PackageMode,
    pub obstacles: Vec<Position>,
    pub agents: Vec<AgentState>,
    pub packages: Vec<PackageState>,
    pub goal: Position,
}

impl Snapshot {
    pub fn observation(&self, agent: EntityId) -> Option<Observation> {
        let state = self.agents.get(agent)?;
        let package = self.packages.get(self.package_mode.package_for(agent))?;
        Some(Observation {
            position: state.position,
            carrying: state.carrying.is_some(),
            package: package.position,
            goal: self.goal,
        })
    }
}

/// The result of one [`Environment::step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub observation: Observation,
    pub reward: f64,
    pub done: bool,
    pub terminal: Option<Terminal>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvError {
    #[error("agent {agent} does not exist (environment has {num_agents} agents)")]
    UnknownAgent { agent: EntityId, num_agents: usize },
    #[error("{got} behaviours supplied for {expected} agents")]
    BehaviourCount { expected: usize, got: usize },
}

/// Provides a read-only view of the environment relevant to an agent.
#[derive(Debug)]
pub struct AgentView<'a> {
    pub agent_state: &'a AgentState,
    pub observation: Observation,
    pub terrain: &'a Grid<CellType>,
}

/// Turn-based grid world in which agents carry packages to a goal.
///
/// Agents never block each other; each one only interacts with the terrain
/// and with the packages.
#[derive(Debug)]
pub struct Environment {
    config: EnvConfig,
    rewards: RewardConfig,
    terrain: Grid<CellType>,
    agents: Vec<AgentState>,
    packages: Vec<PackageState>,
    goal: Position,
    rng: StdRng,
}

impl Environment {
    /// Validates `config` and starts the first episode.
    pub fn new(config: EnvConfig, seed: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut environment = Environment {
            rewards: config.rewards(),
            terrain: Grid::new(config.grid_size),
            agents: Vec::with_capacity(config.num_agents),
            packages: Vec::with_capacity(config.num_packages()),
            goal: Position::new(0, 0),
            rng: StdRng::seed_from_u64(seed),
            config,
        };
        environment.reset();
        Ok(environment)
    }

    /// Starts a new episode: new (or restored) layout, full fuel, no rewards.
    pub fn reset(&mut self) -> Snapshot {
        let layout = match &self.config.layout {
            Some(fixed) => fixed.clone(),
            None => Layout::sample(&self.config, &mut self.rng),
        };

        let mut terrain = Grid::new(self.config.grid_size);
        for pos in &layout.obstacles {
            terrain[*pos] = CellType::Obstacle;
        }
        self.terrain = terrain;

        let fuel = self.config.fuel_budget();
        self.agents = layout
            .agent_starts
            .iter()
            .enumerate()
            .map(|(id, &position)| AgentState {
                id,
                position,
                carrying: None,
                fuel_remaining: fuel,
                terminal: None,
                total_reward: 0.0,
            })
            .collect();
        self.packages = layout
            .packages
            .iter()
            .map(|&position| PackageState {
                position,
                picked_up: false,
                delivered: false,
                carried_by: None,
            })
            .collect();
        self.goal = layout.goal;

        self.snapshot()
    }

    /// Applies `action` for `agent`.
    pub fn step(&mut self, action: Action, agent: EntityId) -> Result<StepOutcome, EnvError> {
        self.check_agent(agent)?;

        if let Some(terminal) = self.agents[agent].terminal {
            let reward = match terminal {
                Terminal::OutOfFuel => self.rewards.out_of_fuel_penalty,
                Terminal::Delivered => 0.0,
            };
            return Ok(StepOutcome {
                observation: self.observation_of(agent),
                reward,
                done: true,
                terminal: Some(terminal),
            });
        }

        let mut reward = match action {
            Action::Up | Action::Down | Action::Left | Action::Right => {
                self.move_agent(agent, action)
            }
            Action::Pickup => self.pickup_package(agent),
            Action::Drop => self.drop_package(agent),
        };

        let agent_state = &mut self.agents[agent];
        agent_state.fuel_remaining = agent_state.fuel_remaining.saturating_sub(1);
        if agent_state.terminal.is_none() && agent_state.fuel_remaining == 0 {
            reward += self.rewards.out_of_fuel_penalty;
            agent_state.terminal = Some(Terminal::OutOfFuel);
        }
        agent_state.total_reward += reward;
        let terminal = agent_state.terminal;

        Ok(StepOutcome {
            observation: self.observation_of(agent),
            reward,
            done: terminal.is_some(),
            terminal,
        })
    }

    /// Applies an integer-coded action. Codes outside `0..6` are ignored:
    /// zero reward, no state change, no fuel used.
    pub fn step_code(&mut self, code: usize, agent: EntityId) -> Result<StepOutcome, EnvError> {
        match Action::from_index(code) {
            Some(action) => self.step(action, agent),
            None => {
                self.check_agent(agent)?;
                let terminal = self.agents[agent].terminal;
                Ok(StepOutcome {
                    observation: self.observation_of(agent),
                    reward: 0.0,
                    done: terminal.is_some(),
                    terminal,
                })
            }
        }
    }

    // returns reward
    fn move_agent(&mut self, agent: EntityId, action: Action) -> f64 {
        let Some((d_row, d_col)) = action.delta() else {
            return 0.0;
        };
        let agent_state = &mut self.agents[agent];
        let target = agent_state
            .position
            .offset(d_row, d_col, self.config.grid_size)
            .filter(|pos| self.terrain.is_walkable(*pos));

        // Blocked moves still cost a turn.
        if let Some(target) = target {
            agent_state.position = target;
        }
        self.rewards.move_penalty
    }

    // returns reward
    fn pickup_package(&mut self, agent: EntityId) -> f64 {
        let index = self.config.package_mode.package_for(agent);
        let agent_state = &mut self.agents[agent];
        let package = &mut self.packages[index];

        let available = !package.picked_up && !package.delivered;
        if agent_state.carrying.is_none() && available && agent_state.position == package.position {
            package.picked_up = true;
            package.carried_by = Some(agent);
            agent_state.carrying = Some(index);
            return self.rewards.pickup_reward;
        }
        0.0
    }

    // returns reward
    fn drop_package(&mut self, agent: EntityId) -> f64 {
        let agent_state = &mut self.agents[agent];
        match agent_state.carrying {
            Some(index) if agent_state.position == self.goal => {
                let package = &mut self.packages[index];
                package.picked_up = false;
                package.delivered = true;
                package.carried_by = None;
                agent_state.carrying = None;
                agent_state.terminal = Some(Terminal::Delivered);
                self.rewards.drop_reward
            }
            _ => 0.0,
        }
    }

    fn check_agent(&self, agent: EntityId) -> Result<(), EnvError> {
        if agent < self.agents.len() {
            Ok(())
        } else {
            Err(EnvError::UnknownAgent {
                agent,
                num_agents: self.agents.len(),
            })
        }
    }

    fn observation_of(&self, agent: EntityId) -> Observation {
        let state = &self.agents[agent];
        Observation {
            position: state.position,
            carrying: state.carrying.is_some(),
            package: self.packages[self.config.package_mode.package_for(agent)].position,
            goal: self.goal,
        }
    }

    /// The agent-relative state used as the Q-table lookup input.
    pub fn observe(&self, agent: EntityId) -> Result<Observation, EnvError> {
        self.check_agent(agent)?;
        Ok(self.observation_of(agent))
    }

    pub fn view(&self, agent: EntityId) -> Result<AgentView<'_>, EnvError> {
        self.check_agent(agent)?;
        Ok(AgentView {
            agent_state: &self.agents[agent],
            observation: self.observation_of(agent),
            terrain: &self.terrain,
        })
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            grid_size: self.config.grid_size,
            package_mode: self.config.package_mode,
            obstacles: self.terrain.obstacles(),
            agents: self.agents.clone(),
            packages: self.packages.clone(),
            goal: self.goal,
        }
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }
    pub fn rewards(&self) -> &RewardConfig {
        &self.rewards
    }
    pub fn terrain(&self) -> &Grid<CellType> {
        &self.terrain
    }
    pub fn agents(&self) -> &[AgentState] {
        &self.agents
    }
    pub fn packages(&self) -> &[PackageState] {
        &self.packages
    }
    pub fn goal(&self) -> Position {
        self.goal
    }
    pub fn get_agent_state(&self, agent: EntityId) -> Option<&AgentState> {
        self.agents.get(agent)
    }

    /// True once every agent has delivered or run out of fuel.
    pub fn all_done(&self) -> bool {
        self.agents.iter().all(AgentState::is_done)
    }
}
