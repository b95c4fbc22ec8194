//! Domain logic and core data structures
//!
//! This module contains the pure road-grid logic: cell positions, lane codes,
//! grid parsing, entry segments and crossing planning. Nothing here spawns
//! threads or takes locks.

pub mod core;
pub mod grid;
pub mod lane;
pub mod planner;
pub mod segment;

pub use self::core::{Cell, Direction};
pub use grid::{GridError, RoadGrid};
pub use lane::LaneCode;
pub use planner::CrossingPlan;
pub use segment::EntrySegment;
