use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap, VecDeque},
};

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    EntityId, Position,
    environment::{Action, AgentView},
    map::{CellType, Grid},
    q_table::QTable,
    state_key::StateKey,
};

/// Trait defining the behavior of an agent.
/// Agents decide which action to take based on their [`AgentView`].
pub trait Agent {
    /// Returns the unique ID of this agent.
    fn id(&self) -> EntityId;

    /// Determines the action the agent wants to perform based on its view of the environment.
    /// `&mut self` allows the agent to keep internal state between turns (e.g. a path).
    fn get_action(&mut self, view: &AgentView) -> Action;
}

/// Picks one of the six actions uniformly at random.
#[derive(Debug)]
pub struct RandomWalker {
    id: EntityId,
    rng: StdRng,
}

impl RandomWalker {
    pub fn new(id: EntityId, seed: u64) -> Self {
        Self {
            id,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Agent for RandomWalker {
    fn id(&self) -> EntityId {
        self.id
    }

    fn get_action(&mut self, _view: &AgentView) -> Action {
        Action::ALL[self.rng.random_range(0..Action::COUNT)]
    }
}

/// Follows a learned Q-table greedily.
///
/// States missing from the table fall back to [`Action::Up`], the action with
/// index 0.
#[derive(Debug, Clone)]
pub struct GreedyAgent {
    id: EntityId,
    table: QTable,
}

impl GreedyAgent {
    pub fn new(id: EntityId, table: QTable) -> Self {
        Self { id, table }
    }

    pub fn table(&self) -> &QTable {
        &self.table
    }
}

impl Agent for GreedyAgent {
    fn id(&self) -> EntityId {
        self.id
    }

    fn get_action(&mut self, view: &AgentView) -> Action {
        let key = StateKey::encode(&view.observation, view.terrain.size());
        self.table.best_action(key).unwrap_or(Action::Up)
    }
}

/// A planning agent that walks to its package, picks it up, then walks to the
/// goal and drops it. Paths are found with A* over the terrain.
#[derive(Debug, Default)]
pub struct PlanningAgent {
    id: EntityId,
    current_plan: VecDeque<Position>, // Queue of positions to visit
    plan_target: Option<Position>,
    /// Where the agent should stand if the last planned step succeeded.
    expected: Option<Position>,
}

impl PlanningAgent {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Converts a move between two adjacent positions into an Action
    fn position_to_action(src: Position, dst: Position) -> Option<Action> {
        let d_row = dst.row as isize - src.row as isize;
        let d_col = dst.col as isize - src.col as isize;
        Action::ALL
            .into_iter()
            .find(|action| action.delta() == Some((d_row, d_col)))
    }

    /// A* pathfinding implementation. The returned path starts at `start`.
    fn a_star_path(start: Position, goal: Position, terrain: &Grid<CellType>) -> Option<Vec<Position>> {
        // For priority queue
        #[derive(Clone, Eq, PartialEq)]
        struct PrioritizedItem {
            priority: usize,
            position: Position,
        }

        impl Ord for PrioritizedItem {
            fn cmp(&self, other: &Self) -> Ordering {
                // Reverse ordering for min-heap behavior
                other.priority.cmp(&self.priority)
            }
        }

        impl PartialOrd for PrioritizedItem {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        let mut frontier = BinaryHeap::new();
        let mut came_from: HashMap<Position, Position> = HashMap::new();
        let mut cost_so_far: HashMap<Position, usize> = HashMap::new();

        frontier.push(PrioritizedItem {
            priority: 0,
            position: start,
        });
        cost_so_far.insert(start, 0);

        let mut goal_reached = false;

        while let Some(PrioritizedItem {
            position: current, ..
        }) = frontier.pop()
        {
            if current == goal {
                goal_reached = true;
                break;
            }

            let current_cost = cost_so_far.get(&current).copied().unwrap_or(usize::MAX);
            for neighbor in Self::walkable_neighbors(current, terrain) {
                let new_cost = current_cost.saturating_add(1);
                let better = cost_so_far
                    .get(&neighbor)
                    .is_none_or(|&known| new_cost < known);
                if better {
                    cost_so_far.insert(neighbor, new_cost);
                    frontier.push(PrioritizedItem {
                        priority: new_cost + neighbor.manhattan(goal),
                        position: neighbor,
                    });
                    came_from.insert(neighbor, current);
                }
            }
        }

        if !goal_reached {
            return None;
        }

        // Reconstruct path
        let mut path = vec![goal];
        let mut current = goal;
        while current != start {
            current = *came_from.get(&current)?;
            path.push(current);
        }
        path.reverse();
        Some(path)
    }

    fn walkable_neighbors(position: Position, terrain: &Grid<CellType>) -> Vec<Position> {
        [Action::Up, Action::Down, Action::Left, Action::Right]
            .into_iter()
            .filter_map(|action| {
                let (d_row, d_col) = action.delta()?;
                position.offset(d_row, d_col, terrain.size())
            })
            .filter(|pos| terrain.is_walkable(*pos))
            .collect()
    }

    /// Replans towards `target` unless the cached plan already leads there
    /// from `current`.
    fn next_step(&mut self, current: Position, target: Position, terrain: &Grid<CellType>) -> Option<Action> {
        let plan_is_stale = self.plan_target != Some(target)
            || self.expected != Some(current)
            || self.current_plan.is_empty();
        if plan_is_stale {
            self.current_plan.clear();
            self.plan_target = Some(target);
            self.expected = None;
            let path = Self::a_star_path(current, target, terrain)?;
            // Skip the first position (current position)
            self.current_plan.extend(path.into_iter().skip(1));
        }
        let next = self.current_plan.pop_front()?;
        self.expected = Some(next);
        Self::position_to_action(current, next)
    }
}

impl Agent for PlanningAgent {
    fn id(&self) -> EntityId {
        self.id
    }

    fn get_action(&mut self, view: &AgentView) -> Action {
        let observation = view.observation;
        let current = observation.position;

        let (target, finish) = if observation.carrying {
            (observation.goal, Action::Drop)
        } else {
            (observation.package, Action::Pickup)
        };
        if current == target {
            self.current_plan.clear();
            return finish;
        }

        // Unreachable target: stay put with an attempt that cannot change anything.
        self.next_step(current, target, view.terrain)
            .unwrap_or(finish)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::EnvConfig,
        environment::{Environment, Terminal},
        layout::Layout,
    };

    fn env_with(obstacles: Vec<Position>, start: Position, package: Position, goal: Position) -> Environment {
        let config = EnvConfig::new(1, 5, obstacles.len()).with_layout(Layout {
            obstacles,
            agent_starts: vec![start],
            packages: vec![package],
            goal,
        });
        Environment::new(config, 0).unwrap()
    }

    fn run(agent: &mut dyn Agent, env: &mut Environment, limit: usize) -> (usize, Option<Terminal>) {
        for steps in 1..=limit {
            let action = agent.get_action(&env.view(0).unwrap());
            let outcome = env.step(action, 0).unwrap();
            if outcome.done {
                return (steps, outcome.terminal);
            }
        }
        (limit, None)
    }

    #[test]
    fn planner_takes_the_shortest_route() {
        let mut env = env_with(
            vec![],
            Position::new(0, 0),
            Position::new(0, 0),
            Position::new(4, 4),
        );
        let mut planner = PlanningAgent::new(0);
        // PICKUP, eight moves, DROP.
        assert_eq!(run(&mut planner, &mut env, 100), (10, Some(Terminal::Delivered)));
    }

    #[test]
    fn planner_walks_around_obstacles() {
        // A wall across column 2 with a single gap at the bottom.
        let wall = (0..4).map(|row| Position::new(row, 2)).collect();
        let mut env = env_with(wall, Position::new(0, 0), Position::new(0, 1), Position::new(0, 4));
        let mut planner = PlanningAgent::new(0);
        // 1 move, PICKUP, 4 down, 3 right, 4 up, DROP.
        assert_eq!(run(&mut planner, &mut env, 100), (14, Some(Terminal::Delivered)));
    }

    #[test]
    fn planner_recovers_after_reset() {
        let mut env = env_with(
            vec![],
            Position::new(0, 0),
            Position::new(2, 2),
            Position::new(4, 4),
        );
        let mut planner = PlanningAgent::new(0);
        for _ in 0..2 {
            planner.get_action(&env.view(0).unwrap());
            env.step(Action::Down, 0).unwrap();
        }
        env.reset();
        assert_eq!(run(&mut planner, &mut env, 100), (10, Some(Terminal::Delivered)));
    }

    #[test]
    fn greedy_agent_follows_its_table() {
        let env = env_with(
            vec![],
            Position::new(0, 0),
            Position::new(2, 2),
            Position::new(4, 4),
        );
        let view = env.view(0).unwrap();
        let key = StateKey::encode(&view.observation, 5);

        let mut table = QTable::new();
        table.insert(key, [0.0, 0.0, 0.0, 4.0, 1.0, 0.0]);
        let mut greedy = GreedyAgent::new(0, table);
        assert_eq!(greedy.get_action(&view), Action::Right);
        assert_eq!(greedy.table().best_action(key), Some(Action::Right));

        let mut blank = GreedyAgent::new(0, QTable::new());
        assert_eq!(blank.get_action(&view), Action::Up);
    }

    #[test]
    fn random_walker_is_reproducible() {
        let env = env_with(
            vec![],
            Position::new(0, 0),
            Position::new(2, 2),
            Position::new(4, 4),
        );
        let view = env.view(0).unwrap();
        let mut a = RandomWalker::new(0, 42);
        let mut b = RandomWalker::new(0, 42);
        let first: Vec<Action> = (0..20).map(|_| a.get_action(&view)).collect();
        let second: Vec<Action> = (0..20).map(|_| b.get_action(&view)).collect();
        assert_eq!(first, second);
    }
}
