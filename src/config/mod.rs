//! Configuration module for the traffic simulator
//!
//! Holds the settings shared between the CLI and the simulation controller.
//! Settings come from an optional TOML file and are then overridden by
//! command line flags.

pub mod simulation;

pub use simulation::{ConfigError, SimulationConfig};
