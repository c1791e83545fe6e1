//! Placement of obstacles, agents, packages and the goal.

use rand::{Rng, seq::IndexedRandom};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    Position,
    config::{ConfigError, EnvConfig},
    map::{CellType, Grid},
};

/// Rejection-sampling draws allowed per grid cell before falling back to a
/// scan of the free cells.
const DRAWS_PER_CELL: usize = 64;

/// Where everything sits at the start of an episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub obstacles: Vec<Position>,
    /// Start cell of agent `i` at index `i`.
    pub agent_starts: Vec<Position>,
    /// Pickup cell of package `i` at index `i`.
    pub packages: Vec<Position>,
    /// Drop location shared by all packages.
    pub goal: Position,
}

impl Layout {
    /// Samples a layout in which every obstacle, agent start, package and the
    /// goal occupy distinct cells.
    ///
    /// # Panics
    ///
    /// Panics if `config` has not passed [`EnvConfig::validate`] and the grid
    /// runs out of free cells.
    pub fn sample<R: Rng + ?Sized>(config: &EnvConfig, rng: &mut R) -> Layout {
        let mut occupied: Grid<bool> = Grid::new(config.grid_size);
        let mut place = |rng: &mut R| {
            let pos = random_free_cell(&occupied, rng)
                .expect("validated configuration leaves a free cell for every entity");
            occupied[pos] = true;
            pos
        };

        let obstacles = (0..config.num_obstacles).map(|_| place(rng)).collect();
        let agent_starts = (0..config.num_agents).map(|_| place(rng)).collect();
        let packages = (0..config.num_packages()).map(|_| place(rng)).collect();
        let goal = place(rng);

        Layout {
            obstacles,
            agent_starts,
            packages,
            goal,
        }
    }

    /// Checks a hand-written layout against `config`.
    ///
    /// Agents, packages and the goal may share cells (an agent may start on
    /// its package), but none of them may sit on an obstacle.
    pub fn validate(&self, config: &EnvConfig) -> Result<(), ConfigError> {
        if self.agent_starts.len() != config.num_agents {
            return Err(ConfigError::InvalidLayout(format!(
                "{} agent starts for {} agents",
                self.agent_starts.len(),
                config.num_agents
            )));
        }
        if self.packages.len() != config.num_packages() {
            return Err(ConfigError::InvalidLayout(format!(
                "{} packages where {:?} mode needs {}",
                self.packages.len(),
                config.package_mode,
                config.num_packages()
            )));
        }
        if self.obstacles.len() != config.num_obstacles {
            return Err(ConfigError::InvalidLayout(format!(
                "{} obstacles where the configuration asks for {}",
                self.obstacles.len(),
                config.num_obstacles
            )));
        }

        let terrain = self.terrain(config.grid_size)?;
        if terrain.obstacles().len() != self.obstacles.len() {
            return Err(ConfigError::InvalidLayout(
                "the same cell is listed as an obstacle more than once".to_string(),
            ));
        }
        let entities = self
            .agent_starts
            .iter()
            .chain(&self.packages)
            .chain(std::iter::once(&self.goal));
        for pos in entities {
            if !terrain.is_valid(*pos) {
                return Err(ConfigError::InvalidLayout(format!(
                    "{} is outside the {}x{} grid",
                    pos, config.grid_size, config.grid_size
                )));
            }
            if !terrain.is_walkable(*pos) {
                return Err(ConfigError::InvalidLayout(format!(
                    "{} is placed on an obstacle",
                    pos
                )));
            }
        }
        Ok(())
    }

    /// Builds the terrain grid with this layout's obstacles.
    pub fn terrain(&self, grid_size: usize) -> Result<Grid<CellType>, ConfigError> {
        let mut terrain = Grid::new(grid_size);
        for pos in &self.obstacles {
            terrain
                .set(*pos, CellType::Obstacle)
                .map_err(|err| ConfigError::InvalidLayout(err.to_string()))?;
        }
        Ok(terrain)
    }
}

/// Draws cells uniformly until an unoccupied one turns up. After
/// `DRAWS_PER_CELL × area` misses it picks among the remaining free cells
/// directly, so the loop always terminates.
fn random_free_cell<R: Rng + ?Sized>(occupied: &Grid<bool>, rng: &mut R) -> Option<Position> {
    let size = occupied.size();
    for _ in 0..occupied.area() * DRAWS_PER_CELL {
        let pos = Position::new(rng.random_range(0..size), rng.random_range(0..size));
        if !occupied[pos] {
            return Some(pos);
        }
    }

    warn!(size, "rejection sampling exhausted its draws, scanning free cells");
    let free: Vec<Position> = occupied
        .enumerate()
        .filter_map(|(pos, taken)| (!*taken).then_some(pos))
        .collect();
    free.choose(rng).copied()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{config::PackageMode, environment::Environment};

    #[test]
    fn sampled_entities_are_disjoint_and_in_bounds() {
        let config = EnvConfig::new(3, 5, 4).with_package_mode(PackageMode::PerAgent);
        config.validate().unwrap();

        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            let layout = Layout::sample(&config, &mut rng);
            let all: Vec<Position> = layout
                .obstacles
                .iter()
                .chain(&layout.agent_starts)
                .chain(&layout.packages)
                .chain(std::iter::once(&layout.goal))
                .copied()
                .collect();
            assert_eq!(all.len(), 4 + 3 + 3 + 1);
            let unique: HashSet<Position> = all.iter().copied().collect();
            assert_eq!(unique.len(), all.len(), "seed {seed} produced overlapping cells");
            assert!(all.iter().all(|p| p.row < 5 && p.col < 5));
            layout.validate(&config).unwrap();
        }
    }

    #[test]
    fn tightly_packed_grid_still_places_everything() {
        // 7 of the 9 cells are taken once everything is placed.
        let config = EnvConfig::new(4, 3, 1);
        config.validate().unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let layout = Layout::sample(&config, &mut rng);
        let unique: HashSet<Position> = layout
            .obstacles
            .iter()
            .chain(&layout.agent_starts)
            .chain(&layout.packages)
            .chain(std::iter::once(&layout.goal))
            .copied()
            .collect();
        assert_eq!(unique.len(), 1 + 4 + 1 + 1);
    }

    #[test]
    fn free_cell_scan_finds_the_last_cell() {
        let mut occupied: Grid<bool> = Grid::new(3);
        for row in 0..3 {
            for col in 0..3 {
                occupied[Position::new(row, col)] = true;
            }
        }
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(random_free_cell(&occupied, &mut rng), None);

        occupied[Position::new(2, 1)] = false;
        assert_eq!(random_free_cell(&occupied, &mut rng), Some(Position::new(2, 1)));
    }

    #[test]
    fn layout_on_obstacle_is_rejected() {
        let config = EnvConfig::new(1, 5, 1);
        let layout = Layout {
            obstacles: vec![Position::new(2, 2)],
            agent_starts: vec![Position::new(2, 2)],
            packages: vec![Position::new(0, 0)],
            goal: Position::new(4, 4),
        };
        assert!(matches!(
            layout.validate(&config),
            Err(ConfigError::InvalidLayout(_))
        ));
    }

    #[test]
    fn repeated_obstacles_are_rejected() {
        let config = EnvConfig::new(1, 5, 2);
        let layout = Layout {
            obstacles: vec![Position::new(2, 2), Position::new(2, 2)],
            agent_starts: vec![Position::new(0, 0)],
            packages: vec![Position::new(0, 1)],
            goal: Position::new(4, 4),
        };
        assert!(matches!(
            layout.validate(&config),
            Err(ConfigError::InvalidLayout(_))
        ));
        assert!(Environment::new(config.with_layout(layout), 0).is_err());
    }

    #[test]
    fn layout_outside_grid_is_rejected() {
        let config = EnvConfig::new(1, 5, 0);
        let layout = Layout {
            obstacles: vec![],
            agent_starts: vec![Position::new(0, 0)],
            packages: vec![Position::new(0, 0)],
            goal: Position::new(5, 4),
        };
        assert!(layout.validate(&config).is_err());
    }
}
