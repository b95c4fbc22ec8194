//! Simulation orchestration layer
//!
//! This module runs the simulation: the controller and its phase machine,
//! the inserter thread, one thread per car and the shared car registry.

pub mod controller;
pub mod inserter;
pub mod state;
pub mod traffic;
pub mod vehicle;

pub use controller::{AppError, SimulationController};
pub use state::{ControlEvent, SimulationPhase};
pub use traffic::{CarColor, CarId, CarInfo, SimulationState, SimulationStats};
