//! Core domain types and operations
//!
//! Positions on the road grid and the four directions of travel. These types
//! know nothing about threads or locks.

use std::fmt;

/// A (row, col) position on the road grid
///
/// Uses zero-based indexing starting from top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cell {
    pub row: usize,
    pub col: usize,
}

impl Cell {
    /// Creates a new cell position
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Returns the neighbouring cell one step in `dir`, or None when the step
    /// would go above row 0 or left of column 0
    ///
    /// The caller is responsible for checking the lower/right bounds against
    /// the grid dimensions.
    pub fn step(&self, dir: Direction) -> Option<Cell> {
        let (dr, dc) = dir.delta();
        let row = self.row.checked_add_signed(dr)?;
        let col = self.col.checked_add_signed(dc)?;
        Some(Cell::new(row, col))
    }

    /// Stable global id used to order lock acquisition
    pub fn id(&self, cols: usize) -> usize {
        self.row * cols + self.col
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Direction of travel on the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Right,
    Down,
    Left,
}

impl Direction {
    /// All directions in clockwise order starting from Up
    pub const ALL: [Direction; 4] = [Direction::Up, Direction::Right, Direction::Down, Direction::Left];

    /// Row/column delta for one step
    pub fn delta(&self) -> (isize, isize) {
        match self {
            Direction::Up => (-1, 0),
            Direction::Right => (0, 1),
            Direction::Down => (1, 0),
            Direction::Left => (0, -1),
        }
    }

    /// Returns the opposite direction (Up <-> Down, Left <-> Right)
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    pub fn is_vertical(&self) -> bool {
        matches!(self, Direction::Up | Direction::Down)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::Up => "up",
            Direction::Right => "right",
            Direction::Down => "down",
            Direction::Left => "left",
        };
        f.write_str(name)
    }
}
