//! Multi-threaded road traffic simulator
//!
//! Cars are threads driving over a grid of lane codes. Every cell is guarded
//! by its own lock, either a fair semaphore or a monitor, and crossings are
//! reserved as a whole before a car enters them.

pub mod app;
pub mod config;
pub mod domain;
pub mod logging;
pub mod render;
pub mod sync;
