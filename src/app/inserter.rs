//! Inserter thread
//!
//! Puts new cars on random entry segments while insertion is on, keeping the
//! number of cars under the configured limit and the spawns apart by the
//! configured interval. Both limits can change while it runs.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;

use crate::app::vehicle::{Road, Vehicle, VehicleHandle};
use crate::config::SimulationConfig;
use crate::domain::segment::random_edge_segment;
use crate::sync::StopSignal;

/// Spawn limits that can be adjusted while the simulation runs
#[derive(Debug)]
pub struct LiveSettings {
    max_vehicles: AtomicU32,
    insert_interval_ms: AtomicU64,
}

impl LiveSettings {
    pub fn new(max_vehicles: u32, insert_interval_ms: u64) -> Self {
        Self {
            max_vehicles: AtomicU32::new(SimulationConfig::sanitize_vehicles(max_vehicles)),
            insert_interval_ms: AtomicU64::new(SimulationConfig::sanitize_interval(insert_interval_ms)),
        }
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(config.max_vehicles, config.insert_interval_ms)
    }

    pub fn max_vehicles(&self) -> u32 {
        self.max_vehicles.load(Ordering::Relaxed).max(1)
    }

    /// Clamped to the configured limits
    pub fn set_max_vehicles(&self, value: u32) {
        self.max_vehicles
            .store(SimulationConfig::sanitize_vehicles(value), Ordering::Relaxed);
    }

    pub fn insert_interval(&self) -> Duration {
        Duration::from_millis(self.insert_interval_ms.load(Ordering::Relaxed).max(1))
    }

    /// Clamped to the configured limits
    pub fn set_insert_interval_ms(&self, value: u64) {
        self.insert_interval_ms
            .store(SimulationConfig::sanitize_interval(value), Ordering::Relaxed);
    }
}

/// Car pacing handed to every spawned car
#[derive(Debug, Clone, Copy)]
struct Pacing {
    step_ms_min: u64,
    step_ms_jitter: u64,
    crossing_timeout: Duration,
    poll: Duration,
}

impl Pacing {
    fn from_config(config: &SimulationConfig) -> Self {
        Self {
            step_ms_min: config.step_ms_min,
            step_ms_jitter: config.step_ms_jitter,
            crossing_timeout: config.crossing_timeout(),
            poll: config.inserter_poll(),
        }
    }

    fn random_step<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let jitter = match self.step_ms_jitter {
            0 => 0,
            jitter => rng.random_range(0..jitter),
        };
        Duration::from_millis(self.step_ms_min.saturating_add(jitter))
    }
}

struct Inserter {
    road: Road,
    settings: Arc<LiveSettings>,
    pacing: Pacing,
    inserting: Arc<AtomicBool>,
    stop: Arc<StopSignal>,
    vehicles: Arc<Mutex<Vec<VehicleHandle>>>,
}

impl Inserter {
    fn run(self) {
        tracing::debug!("inserter started");
        let mut rng = rand::rng();
        let mut last_spawn: Option<Instant> = None;

        while !self.stop.is_stopped() {
            reap_finished(&self.vehicles);

            if self.should_spawn(last_spawn) && self.spawn_one(&mut rng) {
                last_spawn = Some(Instant::now());
            }

            self.stop.sleep(self.pacing.poll);
        }
        tracing::debug!("inserter stopped");
    }

    fn should_spawn(&self, last_spawn: Option<Instant>) -> bool {
        let interval = self.settings.insert_interval();
        self.inserting.load(Ordering::Acquire)
            && self.road.state.occupancy() < self.settings.max_vehicles() as usize
            && last_spawn.is_none_or(|at| at.elapsed() >= interval)
    }

    /// Returns true if a car was started
    fn spawn_one<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        let Some(segment) = random_edge_segment(&self.road.grid, rng) else {
            return false;
        };

        let id = self.road.state.next_car_id();
        let step = self.pacing.random_step(rng);
        let vehicle = Vehicle::new(id, self.road.clone(), segment, step, self.pacing.crossing_timeout);

        match vehicle.spawn() {
            Ok(handle) => {
                tracing::trace!(car = id, start = %segment.start, step_ms = step.as_millis() as u64, "inserted");
                self.vehicles.lock().push(handle);
                true
            }
            Err(err) => {
                tracing::warn!(car = id, %err, "failed to start vehicle thread");
                false
            }
        }
    }
}

fn reap_finished(vehicles: &Mutex<Vec<VehicleHandle>>) {
    let finished: Vec<VehicleHandle> = {
        let mut vehicles = vehicles.lock();
        let (done, running): (Vec<_>, Vec<_>) = std::mem::take(&mut *vehicles)
            .into_iter()
            .partition(|handle| handle.is_finished());
        *vehicles = running;
        done
    };
    for handle in finished {
        handle.join();
    }
}

/// Owner of the inserter thread and every car it started
#[derive(Debug)]
pub struct InserterHandle {
    inserting: Arc<AtomicBool>,
    stop: Arc<StopSignal>,
    vehicles: Arc<Mutex<Vec<VehicleHandle>>>,
    thread: Option<JoinHandle<()>>,
}

impl InserterHandle {
    /// Starts the inserter thread with insertion turned off
    pub fn spawn(road: Road, settings: Arc<LiveSettings>, config: &SimulationConfig) -> io::Result<Self> {
        let inserting = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(StopSignal::new());
        let vehicles = Arc::new(Mutex::new(Vec::new()));

        let inserter = Inserter {
            road,
            settings,
            pacing: Pacing::from_config(config),
            inserting: Arc::clone(&inserting),
            stop: Arc::clone(&stop),
            vehicles: Arc::clone(&vehicles),
        };

        let thread = thread::Builder::new()
            .name("inserter".to_string())
            .spawn(move || inserter.run())?;

        Ok(Self {
            inserting,
            stop,
            vehicles,
            thread: Some(thread),
        })
    }

    pub fn stop_inserting(&self) {
        self.inserting.store(false, Ordering::Release);
    }

    pub fn resume_inserting(&self) {
        self.inserting.store(true, Ordering::Release);
    }

    pub fn is_inserting(&self) -> bool {
        self.inserting.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }

    /// Car threads started and not yet reaped
    pub fn vehicle_count(&self) -> usize {
        self.vehicles.lock().len()
    }

    /// Stops the inserter thread and waits for it
    ///
    /// Cars already on the grid keep driving.
    pub fn shutdown(&mut self) {
        self.stop_inserting();
        self.stop.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("inserter thread panicked");
            }
        }
    }

    /// Asks every car to stop without waiting for them
    pub fn request_vehicles_stop(&self) {
        for handle in self.vehicles.lock().iter() {
            handle.request_stop();
        }
    }

    /// Waits for every car thread to finish
    pub fn join_vehicles(&self) {
        let handles = std::mem::take(&mut *self.vehicles.lock());
        for handle in handles {
            handle.join();
        }
    }
}

impl Drop for InserterHandle {
    fn drop(&mut self) {
        self.shutdown();
        self.request_vehicles_stop();
        self.join_vehicles();
    }
}
