//! Simulation phase management
//!
//! Defines the controller's phase machine and its transitions. The phase only
//! records what the user asked for; the threads that carry it out live in the
//! controller.

use crate::sync::LockMode;

/// Current simulation phase - either idle or running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SimulationPhase {
    /// No inserter and no cars
    #[default]
    Idle,
    /// Cars are driving; `inserting` tells whether new ones are spawned
    Running { inserting: bool },
}

impl SimulationPhase {
    pub fn is_running(&self) -> bool {
        matches!(self, SimulationPhase::Running { .. })
    }

    pub fn is_inserting(&self) -> bool {
        matches!(self, SimulationPhase::Running { inserting: true })
    }
}

/// Commands that drive phase transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Start the simulation, or resume insertion if already running
    Start,
    /// Keep the cars on the grid driving but spawn no new ones
    StopInsertion,
    /// Spawn new cars again
    ResumeInsertion,
    /// Stop every car and the inserter, then empty the grid
    StopAll,
    /// Switch the cell lock mechanism
    LockModeChanged(LockMode),
}

/// State machine for simulation phase transitions
pub struct StateMachine;

impl StateMachine {
    /// Processes an event and returns the new phase
    ///
    /// Events that make no sense in the current phase leave it unchanged.
    pub fn process_event(current: SimulationPhase, event: ControlEvent) -> SimulationPhase {
        match (current, event) {
            (_, ControlEvent::Start) => SimulationPhase::Running { inserting: true },

            (SimulationPhase::Running { .. }, ControlEvent::StopInsertion) => {
                SimulationPhase::Running { inserting: false }
            }

            (SimulationPhase::Running { .. }, ControlEvent::ResumeInsertion) => {
                SimulationPhase::Running { inserting: true }
            }

            (_, ControlEvent::StopAll) => SimulationPhase::Idle,

            (phase, _) => phase,
        }
    }
}
