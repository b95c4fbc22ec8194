//! Car threads
//!
//! Each car runs on its own thread. It holds the lock of the cell it stands
//! on, takes the next cell's lock before moving there, and releases the cell
//! it left. Crossings are reserved as a whole before the car enters them.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::Rng;

use crate::app::traffic::{CarId, SimulationState};
use crate::domain::{Cell, Direction, EntrySegment, LaneCode, RoadGrid, planner};
use crate::sync::{CellLocks, LockError, StopSignal};

/// Shared world a car drives in
#[derive(Debug, Clone)]
pub struct Road {
    pub grid: Arc<RoadGrid>,
    pub locks: Arc<dyn CellLocks>,
    pub state: Arc<SimulationState>,
}

/// A car ready to be put on the grid
#[derive(Debug)]
pub struct Vehicle {
    id: CarId,
    road: Road,
    stop: Arc<StopSignal>,
    position: Cell,
    direction: Direction,
    step: Duration,
    crossing_timeout: Duration,
}

/// Handle to a running car thread
#[derive(Debug)]
pub struct VehicleHandle {
    id: CarId,
    stop: Arc<StopSignal>,
    thread: JoinHandle<()>,
}

impl VehicleHandle {
    pub fn id(&self) -> CarId {
        self.id
    }

    /// Asks the car to leave at its next step
    pub fn request_stop(&self) {
        self.stop.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) {
        if self.thread.join().is_err() {
            tracing::error!(car = self.id, "vehicle thread panicked");
        }
    }
}

/// What lies ahead of a car
enum NextMove {
    Leave,
    Straight(Cell),
    Turn(Cell, Direction),
    Crossing(Cell),
    Blocked,
}

impl Vehicle {
    /// Creates a car entering at the start of `segment`
    pub fn new(
        id: CarId,
        road: Road,
        segment: EntrySegment,
        step: Duration,
        crossing_timeout: Duration,
    ) -> Self {
        Self {
            id,
            road,
            stop: Arc::new(StopSignal::new()),
            position: segment.start,
            direction: segment.direction,
            step,
            crossing_timeout,
        }
    }

    /// Registers the car as queued and starts its thread
    pub fn spawn(self) -> io::Result<VehicleHandle> {
        let id = self.id;
        let stop = Arc::clone(&self.stop);
        let state = Arc::clone(&self.road.state);

        state.on_queued();
        let thread = thread::Builder::new()
            .name(format!("vehicle-{id}"))
            .spawn(move || self.run())
            .inspect_err(|_| state.on_abandon())?;

        Ok(VehicleHandle { id, stop, thread })
    }

    fn run(mut self) {
        if let Err(err) = self.road.locks.acquire(self.position) {
            tracing::debug!(car = self.id, %err, "gave up waiting for spawn cell");
            self.road.state.on_abandon();
            return;
        }

        self.road.state.on_spawn(self.id, self.position);
        tracing::debug!(car = self.id, cell = %self.position, direction = %self.direction, "spawned");

        let mut rng = rand::rng();
        match self.drive(&mut rng) {
            Ok(()) => tracing::debug!(car = self.id, cell = %self.position, "left the grid"),
            Err(err) => tracing::debug!(car = self.id, %err, "interrupted"),
        }

        self.road.locks.release(self.position);
        self.road.state.on_exit(self.id);
    }

    fn drive<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), LockError> {
        while !self.stop.is_stopped() {
            match self.look_ahead() {
                NextMove::Leave | NextMove::Blocked => return Ok(()),
                NextMove::Straight(next) => {
                    self.advance(next)?;
                    self.stop.sleep(self.step);
                }
                NextMove::Turn(next, direction) => {
                    self.advance(next)?;
                    self.direction = direction;
                    self.stop.sleep(self.step);
                }
                NextMove::Crossing(entry) => self.cross(entry, rng)?,
            }
        }
        Ok(())
    }

    fn look_ahead(&self) -> NextMove {
        let grid = &self.road.grid;
        let Some(next) = grid.neighbor(self.position, self.direction) else {
            return NextMove::Leave;
        };
        let Some(lane) = grid.lane(next) else {
            return NextMove::Leave;
        };

        if lane == LaneCode::road_for(self.direction) {
            return NextMove::Straight(next);
        }
        if lane.is_crossing() {
            return NextMove::Crossing(next);
        }
        match lane.road_direction() {
            Some(turn) if turn != self.direction.opposite() => NextMove::Turn(next, turn),
            _ => NextMove::Blocked,
        }
    }

    /// Moves into `next`, which must be adjacent
    fn advance(&mut self, next: Cell) -> Result<(), LockError> {
        self.road.locks.acquire(next)?;
        let previous = std::mem::replace(&mut self.position, next);
        self.road.state.on_move(self.id, next);
        self.road.locks.release(previous);
        tracing::trace!(car = self.id, cell = %next, "moved");
        Ok(())
    }

    /// Reserves and drives through the crossing starting at `entry`
    ///
    /// Backs off for one step when no exit is feasible or the reservation
    /// times out.
    fn cross<R: Rng + ?Sized>(&mut self, entry: Cell, rng: &mut R) -> Result<(), LockError> {
        let Some(plan) = planner::plan(&self.road.grid, entry, self.direction, rng) else {
            tracing::trace!(car = self.id, cell = %entry, "no feasible exit");
            self.stop.sleep(self.step);
            return Ok(());
        };

        if !self.road.locks.acquire_all(&plan.cells, self.crossing_timeout)? {
            tracing::trace!(car = self.id, cell = %entry, "crossing busy");
            self.stop.sleep(self.step);
            return Ok(());
        }

        let mut entered = 0;
        for &cell in &plan.cells {
            let previous = std::mem::replace(&mut self.position, cell);
            self.road.state.on_move(self.id, cell);
            self.road.locks.release(previous);
            entered += 1;

            if !self.stop.sleep(self.step) {
                break;
            }
        }

        // reserved cells never entered
        self.road.locks.release_all(&plan.cells[entered..]);

        if entered == plan.cells.len() {
            self.direction = plan.exit;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::segment::find_edge_segments;
    use crate::sync::{LockMode, create_cell_locks};
    use std::time::Instant;

    const STEP: Duration = Duration::from_millis(2);
    const TIMEOUT: Duration = Duration::from_millis(20);

    // Two-axis 2x2 crossing in the middle of a 6x6 grid.
    const CLUSTER: &str = "6\n6\n\
        0 0 3 1 0 0\n\
        0 0 3 1 0 0\n\
        4 4 12 10 4 4\n\
        2 2 11 9 2 2\n\
        0 0 3 1 0 0\n\
        0 0 3 1 0 0\n";

    fn road(text: &str, mode: LockMode) -> Road {
        let grid: RoadGrid = text.parse().unwrap();
        let locks = create_cell_locks(mode, grid.rows(), grid.cols());
        Road {
            grid: Arc::new(grid),
            locks,
            state: Arc::new(SimulationState::new()),
        }
    }

    fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        done()
    }

    fn every_cell_free(road: &Road) -> bool {
        road.grid.iter().all(|(cell, _)| {
            let deadline = Instant::now();
            let taken = road.locks.try_acquire_until(cell, deadline) == Ok(true);
            if taken {
                road.locks.release(cell);
            }
            taken
        })
    }

    #[test]
    fn car_drives_straight_off_the_grid() {
        let road = road("1\n4\n2 2 2 2\n", LockMode::Semaphore);
        let segment = find_edge_segments(&road.grid)[0];

        let handle = Vehicle::new(1, road.clone(), segment, STEP, TIMEOUT).spawn().unwrap();
        handle.join();

        let stats = road.state.stats();
        assert_eq!(stats.spawned, 1);
        assert_eq!(stats.exited, 1);
        assert_eq!(stats.moves, 3);
        assert_eq!(road.state.occupancy(), 0);
        assert!(every_cell_free(&road));
    }

    #[test]
    fn car_follows_a_turn() {
        // down from (0,0), then right along row 1
        let road = road("2\n3\n3 0 0\n2 2 2\n", LockMode::Monitor);
        let segment = EntrySegment {
            start: Cell::new(0, 0),
            end: Cell::new(0, 0),
            direction: Direction::Down,
        };

        Vehicle::new(1, road.clone(), segment, STEP, TIMEOUT).spawn().unwrap().join();

        assert_eq!(road.state.stats().moves, 3);
        assert!(every_cell_free(&road));
    }

    #[test]
    fn car_stops_at_a_wrong_way_road() {
        let road = road("1\n3\n2 4 4\n", LockMode::Semaphore);
        let segment = EntrySegment {
            start: Cell::new(0, 0),
            end: Cell::new(0, 0),
            direction: Direction::Right,
        };

        Vehicle::new(1, road.clone(), segment, STEP, TIMEOUT).spawn().unwrap().join();

        assert_eq!(road.state.stats().moves, 0);
        assert_eq!(road.state.stats().exited, 1);
        assert!(every_cell_free(&road));
    }

    #[test]
    fn cars_cross_a_cluster_and_release_everything() {
        for mode in [LockMode::Semaphore, LockMode::Monitor] {
            let road = road(CLUSTER, mode);
            let handles: Vec<VehicleHandle> = find_edge_segments(&road.grid)
                .into_iter()
                .enumerate()
                .map(|(i, segment)| {
                    Vehicle::new(i as CarId + 1, road.clone(), segment, STEP, TIMEOUT)
                        .spawn()
                        .unwrap()
                })
                .collect();

            let count = handles.len() as u64;
            for handle in handles {
                handle.join();
            }

            let stats = road.state.stats();
            assert_eq!(stats.spawned, count);
            assert_eq!(stats.exited, count);
            assert_eq!(road.state.active_count(), 0);
            assert!(every_cell_free(&road));
        }
    }

    #[test]
    fn stop_request_ends_the_route_early() {
        let road = road("1\n6\n2 2 2 2 2 2\n", LockMode::Semaphore);
        let segment = find_edge_segments(&road.grid)[0];

        let handle = Vehicle::new(1, road.clone(), segment, Duration::from_secs(5), TIMEOUT)
            .spawn()
            .unwrap();
        assert!(wait_for(Duration::from_secs(2), || road.state.active_count() == 1));

        handle.request_stop();
        handle.join();

        assert!(road.state.stats().moves < 5);
        assert_eq!(road.state.active_count(), 0);
        assert!(every_cell_free(&road));
    }

    #[test]
    fn closing_locks_wakes_a_car_waiting_to_spawn() {
        let road = road("1\n2\n2 2\n", LockMode::Semaphore);
        let segment = find_edge_segments(&road.grid)[0];
        road.locks.acquire(segment.start).unwrap();

        let handle = Vehicle::new(1, road.clone(), segment, STEP, TIMEOUT).spawn().unwrap();
        assert_eq!(road.state.queued_count(), 1);

        thread::sleep(Duration::from_millis(20));
        road.locks.close();
        handle.join();

        assert_eq!(road.state.occupancy(), 0);
        assert_eq!(road.state.stats().spawned, 0);
    }

    #[test]
    fn closing_locks_interrupts_a_blocked_car() {
        let road = road("1\n3\n2 2 2\n", LockMode::Monitor);
        let segment = find_edge_segments(&road.grid)[0];
        road.locks.acquire(Cell::new(0, 1)).unwrap();

        let handle = Vehicle::new(1, road.clone(), segment, STEP, TIMEOUT).spawn().unwrap();
        assert!(wait_for(Duration::from_secs(2), || road.state.active_count() == 1));

        road.locks.close();
        handle.join();

        assert_eq!(road.state.active_count(), 0);
        assert_eq!(road.state.stats().exited, 1);
    }

    fn position_of(road: &Road, id: CarId) -> Option<Cell> {
        road.state.snapshot().into_iter().find(|car| car.id == id).map(|car| car.position)
    }

    #[test]
    fn stop_inside_a_crossing_releases_the_reservation() {
        for mode in [LockMode::Semaphore, LockMode::Monitor] {
            let road = road(CLUSTER, mode);
            let segment = EntrySegment {
                start: Cell::new(1, 2),
                end: Cell::new(1, 2),
                direction: Direction::Down,
            };

            let handle = Vehicle::new(1, road.clone(), segment, Duration::from_secs(5), TIMEOUT)
                .spawn()
                .unwrap();
            assert!(wait_for(Duration::from_secs(2), || {
                position_of(&road, 1).is_some_and(|cell| cell == Cell::new(2, 2))
            }));

            handle.request_stop();
            handle.join();

            let stats = road.state.stats();
            assert_eq!(stats.moves, 1);
            assert_eq!(stats.exited, 1);
            assert_eq!(road.state.active_count(), 0);
            assert!(every_cell_free(&road));
        }
    }

    #[test]
    fn busy_crossing_exit_keeps_the_car_in_place() {
        let road = road("1\n3\n2 6 2\n", LockMode::Semaphore);
        let segment = find_edge_segments(&road.grid)[0];
        let exit = Cell::new(0, 2);
        road.locks.acquire(exit).unwrap();

        let handle = Vehicle::new(1, road.clone(), segment, STEP, TIMEOUT).spawn().unwrap();
        assert!(wait_for(Duration::from_secs(2), || road.state.active_count() == 1));

        // several reservation attempts time out meanwhile
        thread::sleep(TIMEOUT * 5);
        assert_eq!(position_of(&road, 1), Some(Cell::new(0, 0)));
        assert_eq!(road.state.stats().moves, 0);

        // the crossing cell is rolled back after each failed attempt
        let entry = Cell::new(0, 1);
        let deadline = Instant::now() + Duration::from_secs(1);
        assert_eq!(road.locks.try_acquire_until(entry, deadline), Ok(true));
        road.locks.release(entry);

        road.locks.release(exit);
        handle.join();

        let stats = road.state.stats();
        assert_eq!(stats.moves, 2);
        assert_eq!(stats.exited, 1);
        assert!(every_cell_free(&road));
    }

    #[test]
    fn dead_end_crossing_waits_until_stopped() {
        let road = road("1\n2\n2 11\n", LockMode::Monitor);
        let segment = find_edge_segments(&road.grid)[0];

        let handle = Vehicle::new(1, road.clone(), segment, STEP, TIMEOUT).spawn().unwrap();
        assert!(wait_for(Duration::from_secs(2), || road.state.active_count() == 1));
        thread::sleep(STEP * 10);
        assert!(!handle.is_finished());

        handle.request_stop();
        handle.join();

        assert_eq!(road.state.stats().moves, 0);
        assert_eq!(road.state.stats().exited, 1);
        assert!(every_cell_free(&road));
    }
}
