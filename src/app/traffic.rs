//! Shared record of the cars currently on the grid
//!
//! Vehicle threads report spawn, movement and exit here; the controller and
//! the renderer read consistent snapshots from it. Reads never block the
//! vehicles for longer than a map lookup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::domain::Cell;

pub type CarId = u64;

const GOLDEN_RATIO_CONJUGATE: f64 = 0.618_033_988_75;

/// RGB colour assigned to a car
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl CarColor {
    /// Stable, well-spread colour for a car id
    ///
    /// Hue steps by the golden ratio conjugate so consecutive ids land far
    /// apart on the colour wheel; saturation 0.80, brightness 0.88.
    pub fn for_id(id: CarId) -> Self {
        let hue = (id as f64 * GOLDEN_RATIO_CONJUGATE).fract();
        Self::from_hsb(hue, 0.80, 0.88)
    }

    /// Converts hue/saturation/brightness, each in 0.0..=1.0, to RGB
    pub fn from_hsb(hue: f64, saturation: f64, brightness: f64) -> Self {
        let h = (hue.rem_euclid(1.0)) * 6.0;
        let sector = h.floor();
        let f = h - sector;
        let p = brightness * (1.0 - saturation);
        let q = brightness * (1.0 - saturation * f);
        let t = brightness * (1.0 - saturation * (1.0 - f));

        let (r, g, b) = match sector as u8 {
            0 => (brightness, t, p),
            1 => (q, brightness, p),
            2 => (p, brightness, t),
            3 => (p, q, brightness),
            4 => (t, p, brightness),
            _ => (brightness, p, q),
        };

        let to_byte = |channel: f64| (channel * 255.0).round().clamp(0.0, 255.0) as u8;
        Self {
            r: to_byte(r),
            g: to_byte(g),
            b: to_byte(b),
        }
    }
}

/// Read-only view of one car
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarInfo {
    pub id: CarId,
    pub position: Cell,
    pub color: CarColor,
}

/// Running totals since the state was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationStats {
    pub spawned: u64,
    pub exited: u64,
    pub moves: u64,
}

/// Thread-safe registry of the cars on the grid
#[derive(Debug)]
pub struct SimulationState {
    cars: RwLock<HashMap<CarId, CarInfo>>,
    queued: AtomicUsize,
    next_id: AtomicU64,
    spawned: AtomicU64,
    exited: AtomicU64,
    moves: AtomicU64,
}

impl Default for SimulationState {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationState {
    pub fn new() -> Self {
        Self {
            cars: RwLock::new(HashMap::new()),
            queued: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            spawned: AtomicU64::new(0),
            exited: AtomicU64::new(0),
            moves: AtomicU64::new(0),
        }
    }

    /// Hands out a fresh car id, starting at 1
    pub fn next_car_id(&self) -> CarId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// A car was created and is waiting for its spawn cell
    pub fn on_queued(&self) {
        self.queued.fetch_add(1, Ordering::AcqRel);
    }

    /// A queued car gave up before it ever reached the grid
    pub fn on_abandon(&self) {
        decrement(&self.queued);
    }

    /// Publishes a car that now holds its spawn cell
    pub fn on_spawn(&self, id: CarId, position: Cell) {
        let mut cars = self.cars.write();
        cars.insert(
            id,
            CarInfo {
                id,
                position,
                color: CarColor::for_id(id),
            },
        );
        decrement(&self.queued);
        drop(cars);
        self.spawned.fetch_add(1, Ordering::Relaxed);
    }

    /// Updates a car's position. Unknown ids are ignored.
    pub fn on_move(&self, id: CarId, position: Cell) {
        if let Some(info) = self.cars.write().get_mut(&id) {
            info.position = position;
            self.moves.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Removes a car from the grid
    pub fn on_exit(&self, id: CarId) {
        if self.cars.write().remove(&id).is_some() {
            self.exited.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drops every car and queued entry; totals are kept
    pub fn clear(&self) {
        self.cars.write().clear();
        self.queued.store(0, Ordering::Release);
    }

    /// Cars currently on the grid
    pub fn active_count(&self) -> usize {
        self.cars.read().len()
    }

    pub fn queued_count(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Cars on the grid plus cars waiting to spawn
    pub fn occupancy(&self) -> usize {
        let cars = self.cars.read();
        cars.len() + self.queued_count()
    }

    /// Positions of every car, sorted by id
    pub fn snapshot(&self) -> Vec<CarInfo> {
        let mut cars: Vec<CarInfo> = self.cars.read().values().copied().collect();
        cars.sort_by_key(|car| car.id);
        cars
    }

    pub fn stats(&self) -> SimulationStats {
        SimulationStats {
            spawned: self.spawned.load(Ordering::Relaxed),
            exited: self.exited.load(Ordering::Relaxed),
            moves: self.moves.load(Ordering::Relaxed),
        }
    }
}

fn decrement(counter: &AtomicUsize) {
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| value.checked_sub(1));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_move_exit_lifecycle() {
        let state = SimulationState::new();
        let id = state.next_car_id();

        state.on_queued();
        assert_eq!(state.occupancy(), 1);
        assert_eq!(state.active_count(), 0);

        state.on_spawn(id, Cell::new(0, 1));
        assert_eq!(state.queued_count(), 0);
        assert_eq!(state.active_count(), 1);

        state.on_move(id, Cell::new(1, 1));
        assert_eq!(state.snapshot()[0].position, Cell::new(1, 1));

        state.on_exit(id);
        assert_eq!(state.active_count(), 0);
        assert_eq!(
            state.stats(),
            SimulationStats {
                spawned: 1,
                exited: 1,
                moves: 1
            }
        );
    }

    #[test]
    fn move_after_exit_is_ignored() {
        let state = SimulationState::new();
        state.on_spawn(7, Cell::new(0, 0));
        state.on_exit(7);
        state.on_move(7, Cell::new(3, 3));
        state.on_exit(7);

        assert!(state.snapshot().is_empty());
        assert_eq!(state.stats().moves, 0);
        assert_eq!(state.stats().exited, 1);
    }

    #[test]
    fn abandon_never_underflows() {
        let state = SimulationState::new();
        state.on_abandon();
        assert_eq!(state.queued_count(), 0);

        state.on_queued();
        state.on_abandon();
        state.on_abandon();
        assert_eq!(state.queued_count(), 0);
    }

    #[test]
    fn snapshot_is_sorted_by_id() {
        let state = SimulationState::new();
        for id in [5, 2, 9, 1] {
            state.on_spawn(id, Cell::new(0, id as usize));
        }
        let ids: Vec<CarId> = state.snapshot().iter().map(|car| car.id).collect();
        assert_eq!(ids, vec![1, 2, 5, 9]);
    }

    #[test]
    fn clear_keeps_totals() {
        let state = SimulationState::new();
        state.on_queued();
        state.on_spawn(1, Cell::new(0, 0));
        state.on_queued();
        state.clear();

        assert_eq!(state.occupancy(), 0);
        assert_eq!(state.stats().spawned, 1);
    }

    #[test]
    fn car_ids_are_unique_and_start_at_one() {
        let state = SimulationState::new();
        assert_eq!(state.next_car_id(), 1);
        assert_eq!(state.next_car_id(), 2);
    }

    #[test]
    fn colors_are_stable_and_distinct() {
        assert_eq!(CarColor::for_id(3), CarColor::for_id(3));
        assert_ne!(CarColor::for_id(1), CarColor::for_id(2));
    }

    #[test]
    fn hsb_primary_colors() {
        assert_eq!(CarColor::from_hsb(0.0, 1.0, 1.0), CarColor { r: 255, g: 0, b: 0 });
        assert_eq!(CarColor::from_hsb(1.0 / 3.0, 1.0, 1.0), CarColor { r: 0, g: 255, b: 0 });
        assert_eq!(CarColor::from_hsb(2.0 / 3.0, 1.0, 1.0), CarColor { r: 0, g: 0, b: 255 });
        assert_eq!(CarColor::from_hsb(0.5, 0.0, 1.0), CarColor { r: 255, g: 255, b: 255 });
    }
}
