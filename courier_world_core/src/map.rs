use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::Position;

/// Represents errors that can occur within the grid operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("Cell ({row}, {col}) is out of bounds for a {size}x{size} grid")]
    OutOfBounds { row: usize, col: usize, size: usize },
}

/// Represents the static type of a cell in the environment grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellType {
    #[default]
    Floor,
    Obstacle,
}

/// A square 2D grid.
///
/// Stores elements of type `T` in a flat vector using row-major order and is
/// addressed by [`Position`] (`row`, `col`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid<T> {
    size: usize,
    cells: Vec<T>,
}

impl<T> Grid<T> {
    /// Creates a new `size × size` grid filled with default values.
    ///
    /// # Panics
    ///
    /// Panics if `size * size` overflows `usize`.
    pub fn new(size: usize) -> Self
    where
        T: Default + Clone,
    {
        let area = size.checked_mul(size).expect("Grid size overflow");
        Grid {
            size,
            cells: vec![T::default(); area],
        }
    }

    /// Returns the side length of the grid.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the number of cells.
    #[inline]
    pub fn area(&self) -> usize {
        self.cells.len()
    }

    /// Converts a position to a flat vector index.
    ///
    /// Returns `None` if the position is out of bounds.
    #[inline]
    pub fn position_to_index(&self, pos: Position) -> Option<usize> {
        self.is_valid(pos).then(|| pos.row * self.size + pos.col)
    }

    /// Converts a flat vector index back to a position.
    #[inline]
    pub fn index_to_position(&self, index: usize) -> Option<Position> {
        (index < self.cells.len()).then(|| Position::new(index / self.size, index % self.size))
    }

    /// Checks if the given position is within the grid boundaries.
    #[inline]
    pub fn is_valid(&self, pos: Position) -> bool {
        pos.row < self.size && pos.col < self.size
    }

    pub fn get(&self, pos: Position) -> Option<&T> {
        self.position_to_index(pos).and_then(|i| self.cells.get(i))
    }

    /// Sets the value of the cell at `pos`.
    ///
    /// Returns `Err(GridError::OutOfBounds)` if the position is invalid.
    pub fn set(&mut self, pos: Position, value: T) -> Result<(), GridError> {
        let index = self.position_to_index(pos).ok_or(GridError::OutOfBounds {
            row: pos.row,
            col: pos.col,
            size: self.size,
        })?;
        self.cells[index] = value;
        Ok(())
    }

    /// Returns an iterator that yields `(Position, &T)` for each cell in row-major order.
    pub fn enumerate(&self) -> impl Iterator<Item = (Position, &T)> {
        let size = self.size;
        self.cells
            .iter()
            .enumerate()
            .map(move |(index, cell)| (Position::new(index / size, index % size), cell))
    }
}

impl Grid<CellType> {
    /// Whether an agent may stand on `pos`.
    pub fn is_walkable(&self, pos: Position) -> bool {
        matches!(self.get(pos), Some(CellType::Floor))
    }

    /// Positions of every obstacle, in row-major order.
    pub fn obstacles(&self) -> Vec<Position> {
        self.enumerate()
            .filter_map(|(pos, cell)| (*cell == CellType::Obstacle).then_some(pos))
            .collect()
    }
}

impl<T> Index<Position> for Grid<T> {
    type Output = T;

    #[inline]
    fn index(&self, pos: Position) -> &Self::Output {
        match self.position_to_index(pos) {
            Some(idx) => &self.cells[idx],
            None => panic!(
                "Grid index {} out of bounds for a {}x{} grid",
                pos, self.size, self.size
            ),
        }
    }
}

impl<T> IndexMut<Position> for Grid<T> {
    #[inline]
    fn index_mut(&mut self, pos: Position) -> &mut Self::Output {
        let size = self.size;
        match self.position_to_index(pos) {
            Some(idx) => &mut self.cells[idx],
            None => panic!("Grid index {} out of bounds for a {}x{} grid", pos, size, size),
        }
    }
}
