//! Turn-by-turn execution of fixed behaviours, used for evaluating learned
//! tables and for the terminal viewer.

use tracing::debug;

use crate::{
    EntityId,
    agent::Agent,
    environment::{Action, EnvError, Environment, Snapshot, Terminal},
    q_table::QTable,
    state_key::StateKey,
};

/// What happened during one call to [`Playback::process_turn`].
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRecord {
    pub turn: usize,
    /// Action taken by each agent; `None` for agents that were already done.
    pub actions: Vec<Option<Action>>,
    pub rewards: Vec<f64>,
    pub all_done: bool,
}

/// Result of [`solo_episode`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpisodeReport {
    pub steps: usize,
    pub terminal: Option<Terminal>,
    pub total_reward: f64,
}

impl EpisodeReport {
    pub fn delivered(&self) -> bool {
        self.terminal == Some(Terminal::Delivered)
    }
}

/// An environment paired with one behaviour per agent.
pub struct Playback {
    env: Environment,
    agents: Vec<Box<dyn Agent>>,
    turn: usize,
    last_actions: Vec<Option<Action>>,
}

impl Playback {
    pub fn new(env: Environment, agents: Vec<Box<dyn Agent>>) -> Result<Self, EnvError> {
        let expected = env.config().num_agents;
        if agents.len() != expected {
            return Err(EnvError::BehaviourCount {
                expected,
                got: agents.len(),
            });
        }
        Ok(Playback {
            env,
            last_actions: vec![None; agents.len()],
            agents,
            turn: 0,
        })
    }

    /// Lets every agent that is still active act once, in id order.
    pub fn process_turn(&mut self) -> Result<TurnRecord, EnvError> {
        let mut actions = vec![None; self.agents.len()];
        let mut rewards = vec![0.0; self.agents.len()];

        for (id, behaviour) in self.agents.iter_mut().enumerate() {
            let view = self.env.view(id)?;
            if view.agent_state.is_done() {
                continue;
            }
            let action = behaviour.get_action(&view);
            let outcome = self.env.step(action, id)?;
            actions[id] = Some(action);
            rewards[id] = outcome.reward;
            if let Some(terminal) = outcome.terminal {
                debug!(agent = id, turn = self.turn, ?terminal, "agent finished");
            }
        }

        self.turn += 1;
        self.last_actions = actions.clone();
        Ok(TurnRecord {
            turn: self.turn,
            actions,
            rewards,
            all_done: self.env.all_done(),
        })
    }

    /// Plays turns until every agent is done or `max_turns` turns have run.
    /// Returns the number of turns played by this call.
    pub fn run_to_end(&mut self, max_turns: usize) -> Result<usize, EnvError> {
        let mut played = 0;
        while played < max_turns && !self.env.all_done() {
            self.process_turn()?;
            played += 1;
        }
        Ok(played)
    }

    /// Starts a new episode with the same behaviours.
    pub fn reset(&mut self) -> Snapshot {
        self.turn = 0;
        self.last_actions = vec![None; self.agents.len()];
        self.env.reset()
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn turn(&self) -> usize {
        self.turn
    }

    pub fn last_actions(&self) -> &[Option<Action>] {
        &self.last_actions
    }

    pub fn is_finished(&self) -> bool {
        self.env.all_done()
    }
}

/// Greedy action for every agent in `snapshot`, read from `tables[agent]`.
/// Agents without a table or with an unseen state get [`Action::Up`].
pub fn greedy_actions(snapshot: &Snapshot, tables: &[QTable]) -> Vec<Action> {
    (0..snapshot.agents.len())
        .map(|agent: EntityId| {
            let Some(observation) = snapshot.observation(agent) else {
                return Action::Up;
            };
            let key = StateKey::encode(&observation, snapshot.grid_size);
            tables
                .get(agent)
                .and_then(|table| table.best_action(key))
                .unwrap_or(Action::Up)
        })
        .collect()
}

/// Resets `env` and lets `behaviour` control agent `agent` alone for at most
/// `max_steps` steps. Other agents stay idle.
pub fn solo_episode(
    env: &mut Environment,
    agent: EntityId,
    behaviour: &mut dyn Agent,
    max_steps: usize,
) -> Result<EpisodeReport, EnvError> {
    env.reset();
    let mut report = EpisodeReport {
        steps: 0,
        terminal: None,
        total_reward: 0.0,
    };
    while report.steps < max_steps {
        let action = behaviour.get_action(&env.view(agent)?);
        let outcome = env.step(action, agent)?;
        report.steps += 1;
        report.total_reward += outcome.reward;
        if outcome.done {
            report.terminal = outcome.terminal;
            break;
        }
    }
    Ok(report)
}
