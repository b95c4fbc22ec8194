//! Crossing planner
//!
//! Decides how a car crosses an intersection before it enters it. The result
//! lists every cell the car must reserve (the interior path plus the first
//! cell past the crossing, so a car never stops inside it) and the direction
//! it leaves in.
//!
//! Two strategies exist:
//! - **2x2 clusters** of the two-axis crossing codes {9, 10, 11, 12} use fixed
//!   path templates per entry side, filtered by a forbidden first-step rule.
//! - **Any other crossing cell** falls back to a one-cell plan: pick a
//!   feasible exit and reserve the crossing cell plus its neighbour.

use rand::Rng;
use rand::seq::{IndexedRandom, SliceRandom};

use crate::domain::core::{Cell, Direction};
use crate::domain::grid::RoadGrid;
use crate::domain::lane::LaneCode;

/// Cells to reserve for a crossing and the direction adopted afterwards
///
/// `cells` never includes the cell the car occupies before entering. They are
/// listed in traversal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossingPlan {
    pub cells: Vec<Cell>,
    pub exit: Direction,
}

/// Position inside a 2x2 crossing cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Corner {
    fn of(cell: Cell, top_left: Cell) -> Option<Corner> {
        let dr = cell.row.checked_sub(top_left.row)?;
        let dc = cell.col.checked_sub(top_left.col)?;
        match (dr, dc) {
            (0, 0) => Some(Corner::TopLeft),
            (0, 1) => Some(Corner::TopRight),
            (1, 0) => Some(Corner::BottomLeft),
            (1, 1) => Some(Corner::BottomRight),
            _ => None,
        }
    }

    fn cell(&self, top_left: Cell) -> Cell {
        match self {
            Corner::TopLeft => top_left,
            Corner::TopRight => Cell::new(top_left.row, top_left.col + 1),
            Corner::BottomLeft => Cell::new(top_left.row + 1, top_left.col),
            Corner::BottomRight => Cell::new(top_left.row + 1, top_left.col + 1),
        }
    }
}

/// Plans the crossing that starts at `entry`, approached while heading `entry_dir`
///
/// # Arguments
/// * `grid` - Road grid
/// * `entry` - First crossing cell the car wants to enter
/// * `entry_dir` - Direction the car is travelling when it reaches the crossing
/// * `rng` - Source of randomness for exit selection
///
/// # Returns
/// A plan ready for reservation, or None when no exit is feasible right now
pub fn plan<R: Rng + ?Sized>(
    grid: &RoadGrid,
    entry: Cell,
    entry_dir: Direction,
    rng: &mut R,
) -> Option<CrossingPlan> {
    match find_cluster_top_left(grid, entry) {
        Some(top_left) => plan_cluster(grid, entry, entry_dir, top_left, rng),
        None => plan_simple(grid, entry, entry_dir, rng),
    }
}

fn plan_cluster<R: Rng + ?Sized>(
    grid: &RoadGrid,
    entry: Cell,
    entry_dir: Direction,
    top_left: Cell,
    rng: &mut R,
) -> Option<CrossingPlan> {
    let entry_corner = Corner::of(entry, top_left)?;

    let mut exits: Vec<Direction> = Direction::ALL
        .into_iter()
        .filter(|dir| *dir != entry_dir.opposite())
        .collect();
    exits.shuffle(rng);

    for exit in exits {
        let internal: Vec<Cell> = path_template(entry_dir, entry_corner, exit)
            .iter()
            .map(|corner| corner.cell(top_left))
            .collect();
        let Some(last) = internal.last().copied() else {
            continue;
        };

        if let [first, second, ..] = internal.as_slice() {
            let first_lane = grid.lane(*first)?;
            let second_lane = grid.lane(*second)?;
            if is_forbidden_first_pair(entry_dir, first_lane, second_lane) {
                continue;
            }
        }

        let Some(outside) = grid.neighbor(last, exit) else {
            continue;
        };
        if !grid.lane(outside).is_some_and(|lane| lane.supports(exit)) {
            continue;
        }

        let mut cells = internal;
        cells.push(outside);
        return Some(CrossingPlan { cells, exit });
    }

    None
}

/// Interior paths of a 2x2 cluster
///
/// ```text
///   TL(12)  TR(10)
///   BL(11)  BR(9)
/// ```
///
/// An empty slice means the combination cannot be driven.
fn path_template(entry_dir: Direction, entry: Corner, exit: Direction) -> &'static [Corner] {
    use Corner::*;
    use Direction::*;

    match (entry_dir, entry, exit) {
        // entering from the right side
        (Left, TopRight, Left) => &[TopRight, TopLeft],
        (Left, TopRight, Up) => &[TopRight],
        (Left, TopRight, Down) => &[TopRight, TopLeft, BottomLeft],
        (Left, BottomRight, Left) => &[BottomRight, BottomLeft],
        (Left, BottomRight, Up) => &[BottomRight, TopRight],
        (Left, BottomRight, Down) => &[BottomRight],

        // entering from the left side
        (Right, TopLeft, Right) => &[TopLeft, TopRight],
        (Right, TopLeft, Up) => &[TopLeft, TopRight],
        (Right, TopLeft, Down) => &[TopLeft, BottomLeft],
        (Right, BottomLeft, Right) => &[BottomLeft, BottomRight],
        (Right, BottomLeft, Up) => &[BottomLeft, TopLeft],
        (Right, BottomLeft, Down) => &[BottomLeft],

        // entering from the top
        (Down, TopRight, Down) => &[TopRight, BottomRight],
        (Down, TopRight, Left) => &[TopRight, TopLeft],
        (Down, TopRight, Right) => &[TopRight],
        (Down, TopLeft, Down) => &[TopLeft, BottomLeft],
        (Down, TopLeft, Right) => &[TopLeft, TopRight],
        (Down, TopLeft, Left) => &[TopLeft],

        // entering from the bottom
        (Up, BottomLeft, Up) => &[BottomLeft, TopLeft],
        (Up, BottomLeft, Right) => &[BottomLeft, BottomRight],
        (Up, BottomLeft, Left) => &[BottomLeft],
        (Up, BottomRight, Up) => &[BottomRight, TopRight],
        (Up, BottomRight, Left) => &[BottomRight, BottomLeft],
        (Up, BottomRight, Right) => &[BottomRight],

        _ => &[],
    }
}

/// First interior step that would cut across oncoming traffic
///
/// entering heading down: 12 -> 10, heading right: 11 -> 12,
/// heading up: 9 -> 11, heading left: 10 -> 9
fn is_forbidden_first_pair(entry_dir: Direction, first: LaneCode, second: LaneCode) -> bool {
    use LaneCode::*;

    match entry_dir {
        Direction::Down => first == CrossLeftDown && second == CrossUpLeft,
        Direction::Right => first == CrossRightDown && second == CrossLeftDown,
        Direction::Up => first == CrossUpRight && second == CrossRightDown,
        Direction::Left => first == CrossUpLeft && second == CrossUpRight,
    }
}

fn plan_simple<R: Rng + ?Sized>(
    grid: &RoadGrid,
    entry: Cell,
    entry_dir: Direction,
    rng: &mut R,
) -> Option<CrossingPlan> {
    let lane = grid.lane(entry)?;

    let feasible: Vec<(Direction, Cell)> = lane
        .crossing_exits()
        .into_iter()
        .filter(|exit| *exit != entry_dir.opposite())
        .filter_map(|exit| {
            let next = grid.neighbor(entry, exit)?;
            let next_lane = grid.lane(next)?;
            let wrong_way = next_lane.road_direction() == Some(exit.opposite());
            (next_lane.supports(exit) && !wrong_way).then_some((exit, next))
        })
        .collect();

    let (exit, next) = feasible.choose(rng).copied()?;
    Some(CrossingPlan {
        cells: vec![entry, next],
        exit,
    })
}

/// Top-left corner of the {9,10,11,12} 2x2 block containing `cell`, if any
fn find_cluster_top_left(grid: &RoadGrid, cell: Cell) -> Option<Cell> {
    const OFFSETS: [(usize, usize); 4] = [(0, 0), (0, 1), (1, 0), (1, 1)];

    OFFSETS.iter().find_map(|(up, left)| {
        let top_left = Cell::new(cell.row.checked_sub(*up)?, cell.col.checked_sub(*left)?);
        let corners = [
            Corner::TopLeft,
            Corner::TopRight,
            Corner::BottomLeft,
            Corner::BottomRight,
        ];

        let mut seen = [false; 4];
        for corner in corners {
            let lane = grid.lane(corner.cell(top_left))?;
            if !lane.is_two_axis_crossing() {
                return None;
            }
            seen[(lane.code() - 9) as usize] = true;
        }
        seen.iter().all(|present| *present).then_some(top_left)
    })
}
