//! Simulation controller
//!
//! The controller owns the road grid, the lock grid and the inserter. It
//! turns user commands into phase transitions and starts or stops the worker
//! threads that carry them out.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::app::inserter::{InserterHandle, LiveSettings};
use crate::app::state::{ControlEvent, SimulationPhase, StateMachine};
use crate::app::traffic::{CarInfo, SimulationState, SimulationStats};
use crate::app::vehicle::Road;
use crate::config::SimulationConfig;
use crate::domain::{GridError, RoadGrid};
use crate::sync::{CellLocks, LockMode, create_cell_locks};

/// Errors that can occur during controller operations
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The road grid could not be loaded
    #[error("Grid error: {0}")]
    Grid(#[from] GridError),
    /// A worker thread could not be started
    #[error("Failed to start worker thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

/// Main simulation controller
///
/// Not shared between threads itself; the car and inserter threads only see
/// the grid, the locks and the state it hands them.
pub struct SimulationController {
    grid: Arc<RoadGrid>,
    config: SimulationConfig,
    settings: Arc<LiveSettings>,
    state: Arc<SimulationState>,
    locks: Arc<dyn CellLocks>,
    lock_mode: LockMode,
    phase: SimulationPhase,
    inserter: Option<InserterHandle>,
}

impl SimulationController {
    /// Creates an idle controller for `grid`
    ///
    /// Out-of-range settings in `config` are clamped.
    pub fn new(grid: RoadGrid, config: SimulationConfig) -> Self {
        let config = config.sanitized();
        let lock_mode = config.lock_mode;
        let locks = create_cell_locks(lock_mode, grid.rows(), grid.cols());

        Self {
            grid: Arc::new(grid),
            settings: Arc::new(LiveSettings::from_config(&config)),
            state: Arc::new(SimulationState::new()),
            locks,
            lock_mode,
            phase: SimulationPhase::Idle,
            inserter: None,
            config,
        }
    }

    /// Loads the grid file and creates an idle controller
    pub fn from_path(
        path: impl AsRef<std::path::Path>,
        config: SimulationConfig,
    ) -> Result<Self, AppError> {
        let grid = RoadGrid::from_path(path)?;
        Ok(Self::new(grid, config))
    }

    pub fn grid(&self) -> &RoadGrid {
        &self.grid
    }

    pub fn phase(&self) -> SimulationPhase {
        self.phase
    }

    pub fn lock_mode(&self) -> LockMode {
        self.lock_mode
    }

    /// Cars currently on the grid, sorted by id
    pub fn snapshot(&self) -> Vec<CarInfo> {
        self.state.snapshot()
    }

    pub fn stats(&self) -> SimulationStats {
        self.state.stats()
    }

    pub fn active_count(&self) -> usize {
        self.state.active_count()
    }

    pub fn set_max_vehicles(&self, value: u32) {
        self.settings.set_max_vehicles(value);
    }

    pub fn set_insert_interval_ms(&self, value: u64) {
        self.settings.set_insert_interval_ms(value);
    }

    /// Dispatches a control event to the matching operation
    ///
    /// # Returns
    /// The phase after handling the event
    pub fn handle_event(&mut self, event: ControlEvent) -> Result<SimulationPhase, AppError> {
        match event {
            ControlEvent::Start => self.start()?,
            ControlEvent::StopInsertion => self.stop_insertion(),
            ControlEvent::ResumeInsertion => self.resume_insertion(),
            ControlEvent::StopAll => self.stop_all(),
            ControlEvent::LockModeChanged(mode) => self.set_lock_mode(mode)?,
        }
        Ok(self.phase)
    }

    /// Starts the simulation, or resumes insertion if it is already running
    pub fn start(&mut self) -> Result<(), AppError> {
        if self.locks.is_closed() {
            self.recreate_locks();
        }

        if !self.inserter.as_ref().is_some_and(InserterHandle::is_running) {
            let road = Road {
                grid: Arc::clone(&self.grid),
                locks: Arc::clone(&self.locks),
                state: Arc::clone(&self.state),
            };
            let inserter = InserterHandle::spawn(road, Arc::clone(&self.settings), &self.config)?;
            self.inserter = Some(inserter);
        }

        if let Some(inserter) = &self.inserter {
            inserter.resume_inserting();
        }
        self.transition(ControlEvent::Start);
        tracing::info!(
            lock_mode = %self.lock_mode,
            max_vehicles = self.settings.max_vehicles(),
            interval_ms = self.settings.insert_interval().as_millis() as u64,
            "simulation started"
        );
        Ok(())
    }

    /// Stops spawning; cars already on the grid keep driving
    pub fn stop_insertion(&mut self) {
        if let Some(inserter) = &self.inserter {
            inserter.stop_inserting();
        }
        self.transition(ControlEvent::StopInsertion);
        tracing::info!("insertion stopped");
    }

    /// Spawns cars again if the simulation is running
    pub fn resume_insertion(&mut self) {
        if !self.phase.is_running() {
            return;
        }
        if let Some(inserter) = &self.inserter {
            inserter.resume_inserting();
        }
        self.transition(ControlEvent::ResumeInsertion);
        tracing::info!("insertion resumed");
    }

    /// Stops the inserter and every car, then empties the grid
    ///
    /// Closing the locks wakes cars blocked on a cell so every thread can be
    /// joined. The closed grid is replaced on the next start.
    pub fn stop_all(&mut self) {
        if let Some(mut inserter) = self.inserter.take() {
            inserter.shutdown();
            inserter.request_vehicles_stop();
            self.locks.close();
            inserter.join_vehicles();
        } else {
            self.locks.close();
        }

        self.state.clear();
        self.transition(ControlEvent::StopAll);
        tracing::info!(stats = ?self.state.stats(), "simulation stopped");
    }

    /// Switches the lock mechanism
    ///
    /// A running simulation is stopped, the lock grid is rebuilt in the new
    /// mode and the run restarts with insertion as it was.
    pub fn set_lock_mode(&mut self, mode: LockMode) -> Result<(), AppError> {
        if mode == self.lock_mode {
            return Ok(());
        }

        let previous = self.phase;
        self.stop_all();
        self.lock_mode = mode;
        self.recreate_locks();
        tracing::info!(%mode, "lock mode changed");

        if previous.is_running() {
            self.start()?;
            if !previous.is_inserting() {
                self.stop_insertion();
            }
        }
        self.phase = StateMachine::process_event(previous, ControlEvent::LockModeChanged(mode));
        Ok(())
    }

    /// Waits until no car is left on the grid or queued for it
    ///
    /// # Returns
    /// true if the grid emptied before `timeout`
    pub fn wait_until_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.state.occupancy() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn recreate_locks(&mut self) {
        let (rows, cols) = self.grid.dimensions();
        self.locks = create_cell_locks(self.lock_mode, rows, cols);
    }

    fn transition(&mut self, event: ControlEvent) {
        let next = StateMachine::process_event(self.phase, event);
        if next != self.phase {
            tracing::debug!(from = ?self.phase, to = ?next, "phase changed");
        }
        self.phase = next;
    }
}

impl Drop for SimulationController {
    fn drop(&mut self) {
        if self.inserter.is_some() {
            self.stop_all();
        }
    }
}
