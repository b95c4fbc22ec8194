//! Lane codes for road grid cells
//!
//! Every cell of a road grid holds one integer code describing what a car may
//! do there. This module maps those codes to a typed enum and answers the
//! movement questions the vehicles and the crossing planner ask.
//!
//! | code  | meaning                                                   |
//! |-------|-----------------------------------------------------------|
//! | 0     | no road                                                   |
//! | 1..4  | road heading up / right / down / left                     |
//! | 5..8  | single-axis crossing up / right / down / left             |
//! | 9..12 | two-axis crossing up-right / up-left / right-down / left-down |

use crate::domain::core::Direction;

/// Typed lane code of a grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LaneCode {
    Empty = 0,
    RoadUp = 1,
    RoadRight = 2,
    RoadDown = 3,
    RoadLeft = 4,
    CrossUp = 5,
    CrossRight = 6,
    CrossDown = 7,
    CrossLeft = 8,
    CrossUpRight = 9,
    CrossUpLeft = 10,
    CrossRightDown = 11,
    CrossLeftDown = 12,
}

impl LaneCode {
    /// Converts a raw grid integer into a lane code
    ///
    /// # Returns
    /// The matching lane code, or None for values outside 0..=12
    pub fn from_code(code: i64) -> Option<Self> {
        let lane = match code {
            0 => LaneCode::Empty,
            1 => LaneCode::RoadUp,
            2 => LaneCode::RoadRight,
            3 => LaneCode::RoadDown,
            4 => LaneCode::RoadLeft,
            5 => LaneCode::CrossUp,
            6 => LaneCode::CrossRight,
            7 => LaneCode::CrossDown,
            8 => LaneCode::CrossLeft,
            9 => LaneCode::CrossUpRight,
            10 => LaneCode::CrossUpLeft,
            11 => LaneCode::CrossRightDown,
            12 => LaneCode::CrossLeftDown,
            _ => return None,
        };
        Some(lane)
    }

    /// Raw integer code as stored in grid files
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Road lane that carries traffic in `dir`
    pub fn road_for(dir: Direction) -> Self {
        match dir {
            Direction::Up => LaneCode::RoadUp,
            Direction::Right => LaneCode::RoadRight,
            Direction::Down => LaneCode::RoadDown,
            Direction::Left => LaneCode::RoadLeft,
        }
    }

    /// Direction of travel for plain road lanes (codes 1..4)
    pub fn road_direction(&self) -> Option<Direction> {
        match self {
            LaneCode::RoadUp => Some(Direction::Up),
            LaneCode::RoadRight => Some(Direction::Right),
            LaneCode::RoadDown => Some(Direction::Down),
            LaneCode::RoadLeft => Some(Direction::Left),
            _ => None,
        }
    }

    /// True for every crossing code (5..=12)
    pub fn is_crossing(&self) -> bool {
        self.code() >= 5
    }

    /// True for the two-axis crossings that form 2x2 clusters (9..=12)
    pub fn is_two_axis_crossing(&self) -> bool {
        self.code() >= 9
    }

    /// Whether a car may move through this cell in `dir`
    ///
    /// Vertical lanes accept up/down, horizontal lanes accept left/right,
    /// two-axis crossings accept any direction and empty cells accept none.
    pub fn supports(&self, dir: Direction) -> bool {
        match self {
            LaneCode::RoadUp | LaneCode::RoadDown | LaneCode::CrossUp | LaneCode::CrossDown => {
                dir.is_vertical()
            }
            LaneCode::RoadRight | LaneCode::RoadLeft | LaneCode::CrossRight | LaneCode::CrossLeft => {
                !dir.is_vertical()
            }
            LaneCode::CrossUpRight
            | LaneCode::CrossUpLeft
            | LaneCode::CrossRightDown
            | LaneCode::CrossLeftDown => true,
            LaneCode::Empty => false,
        }
    }

    /// Exit directions possible from a crossing cell, in clockwise order
    ///
    /// U-turns are not filtered here; the planner removes the opposite of the
    /// entry direction. Non-crossing cells return an empty list.
    pub fn crossing_exits(&self) -> Vec<Direction> {
        match self {
            LaneCode::CrossUp | LaneCode::CrossDown => vec![Direction::Up, Direction::Down],
            LaneCode::CrossRight | LaneCode::CrossLeft => vec![Direction::Right, Direction::Left],
            LaneCode::CrossUpRight
            | LaneCode::CrossUpLeft
            | LaneCode::CrossRightDown
            | LaneCode::CrossLeftDown => Direction::ALL.to_vec(),
            _ => Vec::new(),
        }
    }
}
