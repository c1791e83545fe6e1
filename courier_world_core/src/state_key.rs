//! Integer keys for agent observations.
//!
//! An [`Observation`] is packed into a single `u64` with a mixed-radix
//! polynomial, most significant digit first:
//!
//! ```text
//! key = ((((((row·G + col)·2 + carrying)·G + package_row)·G + package_col)·G + goal_row)·G + goal_col)
//! ```
//!
//! where `G` is the grid side. Each digit is strictly below its radix, so two
//! in-range observations share a key only if they are equal. The key space is
//! `2·G⁶`, which fits in `u64` for every grid up to [`crate::config::MAX_GRID_SIZE`].

use serde::{Deserialize, Serialize};

use crate::{Position, environment::Observation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateKey(pub u64);

impl StateKey {
    pub fn encode(observation: &Observation, grid_size: usize) -> StateKey {
        let g = grid_size as u64;
        let digits = [
            (observation.position.row, g),
            (observation.position.col, g),
            (observation.carrying as usize, 2),
            (observation.package.row, g),
            (observation.package.col, g),
            (observation.goal.row, g),
            (observation.goal.col, g),
        ];
        let key = digits
            .iter()
            .fold(0u64, |acc, &(digit, radix)| acc * radix + digit as u64);
        StateKey(key)
    }

    /// Inverse of [`StateKey::encode`] for keys produced with the same `grid_size`.
    pub fn decode(self, grid_size: usize) -> Observation {
        let g = grid_size as u64;
        let mut rest = self.0;
        let mut take = |radix: u64| {
            let digit = rest % radix;
            rest /= radix;
            digit as usize
        };
        let goal_col = take(g);
        let goal_row = take(g);
        let package_col = take(g);
        let package_row = take(g);
        let carrying = take(2) == 1;
        let col = take(g);
        let row = take(g);
        Observation {
            position: Position::new(row, col),
            carrying,
            package: Position::new(package_row, package_col),
            goal: Position::new(goal_row, goal_col),
        }
    }

    /// Number of distinct keys for a grid of side `grid_size`.
    pub fn key_space(grid_size: usize) -> u64 {
        2 * (grid_size as u64).pow(6)
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn all_observations(g: usize) -> impl Iterator<Item = Observation> {
        let cells: Vec<Position> = (0..g)
            .flat_map(|row| (0..g).map(move |col| Position::new(row, col)))
            .collect();
        let mut out = Vec::new();
        for &position in &cells {
            for carrying in [false, true] {
                for &package in &cells {
                    for &goal in &cells {
                        out.push(Observation {
                            position,
                            carrying,
                            package,
                            goal,
                        });
                    }
                }
            }
        }
        out.into_iter()
    }

    #[test]
    fn every_observation_gets_a_distinct_key() {
        let g = 3;
        let mut seen = HashSet::new();
        for observation in all_observations(g) {
            let key = StateKey::encode(&observation, g);
            assert!(key.0 < StateKey::key_space(g));
            assert!(seen.insert(key), "collision for {observation:?}");
            assert_eq!(key.decode(g), observation);
        }
        assert_eq!(seen.len() as u64, StateKey::key_space(g));
    }

    #[test]
    fn identical_observations_share_a_key() {
        let observation = Observation {
            position: Position::new(2, 3),
            carrying: true,
            package: Position::new(0, 4),
            goal: Position::new(4, 4),
        };
        let copy = Observation { ..observation };
        assert_eq!(StateKey::encode(&observation, 5), StateKey::encode(&copy, 5));
    }

    #[test]
    fn carrying_flag_changes_the_key() {
        let mut observation = Observation {
            position: Position::new(1, 1),
            carrying: false,
            package: Position::new(0, 0),
            goal: Position::new(4, 4),
        };
        let empty = StateKey::encode(&observation, 5);
        observation.carrying = true;
        assert_ne!(empty, StateKey::encode(&observation, 5));
    }

    #[test]
    fn largest_grid_fits_in_u64() {
        let g = crate::config::MAX_GRID_SIZE;
        let corner = Position::new(g - 1, g - 1);
        let observation = Observation {
            position: corner,
            carrying: true,
            package: corner,
            goal: corner,
        };
        let key = StateKey::encode(&observation, g);
        assert_eq!(key.0, StateKey::key_space(g) - 1);
        assert_eq!(key.decode(g), observation);
    }
}
