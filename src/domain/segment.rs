//! Entry segments on the grid border
//!
//! Cars enter the grid on straight runs that start at a border cell and point
//! inward: down from the top edge, up from the bottom edge, right from the
//! left edge and left from the right edge.

use rand::Rng;
use rand::seq::IndexedRandom;

use crate::domain::core::{Cell, Direction};
use crate::domain::grid::RoadGrid;
use crate::domain::lane::LaneCode;

/// Straight run from a border cell inward, both ends inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySegment {
    pub start: Cell,
    pub end: Cell,
    pub direction: Direction,
}

impl EntrySegment {
    /// Number of cells covered by the segment
    pub fn cell_count(&self) -> usize {
        self.start.row.abs_diff(self.end.row) + self.start.col.abs_diff(self.end.col) + 1
    }
}

fn continues_run(lane: LaneCode, dir: Direction) -> bool {
    lane == LaneCode::road_for(dir) || lane.is_crossing()
}

/// Follows the run starting at `start` and returns its last cell
fn run_end(grid: &RoadGrid, start: Cell, dir: Direction) -> Cell {
    let mut end = start;
    while let Some(next) = grid.neighbor(end, dir) {
        match grid.lane(next) {
            Some(lane) if continues_run(lane, dir) => end = next,
            _ => break,
        }
    }
    end
}

/// Finds every entry segment of the grid
///
/// Border cells qualify when they hold the road lane for the inward direction
/// or any crossing. Candidates are listed top edge, bottom edge, left edge,
/// right edge.
pub fn find_edge_segments(grid: &RoadGrid) -> Vec<EntrySegment> {
    let (rows, cols) = grid.dimensions();
    let mut starts: Vec<(Cell, Direction)> = Vec::new();

    starts.extend((0..cols).map(|col| (Cell::new(0, col), Direction::Down)));
    starts.extend((0..cols).map(|col| (Cell::new(rows - 1, col), Direction::Up)));
    starts.extend((0..rows).map(|row| (Cell::new(row, 0), Direction::Right)));
    starts.extend((0..rows).map(|row| (Cell::new(row, cols - 1), Direction::Left)));

    starts
        .into_iter()
        .filter(|(cell, dir)| grid.lane(*cell).is_some_and(|lane| continues_run(lane, *dir)))
        .map(|(start, direction)| EntrySegment {
            start,
            end: run_end(grid, start, direction),
            direction,
        })
        .collect()
}

/// Picks one entry segment uniformly at random
///
/// # Returns
/// None when the grid has no entry segments at all
pub fn random_edge_segment<R: Rng + ?Sized>(grid: &RoadGrid, rng: &mut R) -> Option<EntrySegment> {
    find_edge_segments(grid).choose(rng).copied()
}
