//! Per-cell mutual exclusion for the road grid
//!
//! Every grid cell has its own lock, and a car holds the lock of each cell it
//! occupies. Two interchangeable implementations exist: a fair semaphore
//! permit per cell and a monitor-style occupied flag per cell. Both sit behind
//! the [`CellLocks`] trait so the rest of the simulation never knows which one
//! is active.
//!
//! Multi-cell reservations ([`CellLocks::acquire_all`]) always lock in the
//! same global order (`row * cols + col`). That order is what keeps two cars
//! reserving overlapping crossings from deadlocking each other.

pub mod monitor;
pub mod semaphore;
pub mod signal;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Cell;

pub use monitor::MonitorCellLocks;
pub use semaphore::SemaphoreCellLocks;
pub use signal::StopSignal;

/// Lock acquisition errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("cell {cell} is outside the {rows}x{cols} lock grid")]
    OutOfBounds { cell: Cell, rows: usize, cols: usize },

    #[error("lock grid has been closed")]
    Closed,
}

/// Which mutual exclusion mechanism guards the cells
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    /// Fair binary semaphore per cell
    #[default]
    Semaphore,
    /// Occupied flag guarded by a mutex and condition variable per cell
    Monitor,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Semaphore => f.write_str("semaphore"),
            LockMode::Monitor => f.write_str("monitor"),
        }
    }
}

/// Grid of per-cell locks
pub trait CellLocks: Send + Sync + fmt::Debug {
    /// Mechanism backing this grid
    fn mode(&self) -> LockMode;

    /// Returns the grid dimensions as (rows, cols)
    fn dimensions(&self) -> (usize, usize);

    /// Blocks until `cell` is free and takes it
    ///
    /// # Returns
    /// `Err(LockError::Closed)` if the grid is closed before or while waiting
    fn acquire(&self, cell: Cell) -> Result<(), LockError>;

    /// Takes `cell` if it becomes free before `deadline`
    ///
    /// # Returns
    /// true if the cell was taken, false on timeout
    fn try_acquire_until(&self, cell: Cell, deadline: Instant) -> Result<bool, LockError>;

    /// Releases `cell`. Releasing a cell that is not held is ignored.
    fn release(&self, cell: Cell);

    /// Wakes every waiter and makes all further acquisitions fail
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Tries to take every cell in `cells` within a single total `timeout`
    ///
    /// Cells are locked in ascending global id order regardless of the order
    /// given, and duplicates are collapsed. If any cell cannot be taken in
    /// time, everything taken so far is released in reverse order.
    ///
    /// # Returns
    /// true if all cells are now held, false if nothing is held
    fn acquire_all(&self, cells: &[Cell], timeout: Duration) -> Result<bool, LockError> {
        let (_, cols) = self.dimensions();
        let mut ordered = cells.to_vec();
        ordered.sort_by_key(|cell| cell.id(cols));
        ordered.dedup();

        let deadline = Instant::now() + timeout;
        let mut taken = Vec::with_capacity(ordered.len());

        for cell in ordered {
            match self.try_acquire_until(cell, deadline) {
                Ok(true) => taken.push(cell),
                Ok(false) => {
                    self.release_all(&taken);
                    return Ok(false);
                }
                Err(err) => {
                    self.release_all(&taken);
                    return Err(err);
                }
            }
        }

        Ok(true)
    }

    /// Releases every cell in reverse order
    fn release_all(&self, cells: &[Cell]) {
        for cell in cells.iter().rev() {
            self.release(*cell);
        }
    }
}

/// Creates a lock grid of the requested mode
pub fn create_cell_locks(mode: LockMode, rows: usize, cols: usize) -> Arc<dyn CellLocks> {
    match mode {
        LockMode::Semaphore => Arc::new(SemaphoreCellLocks::new(rows, cols)),
        LockMode::Monitor => Arc::new(MonitorCellLocks::new(rows, cols)),
    }
}

/// Row-major index of `cell`, or `OutOfBounds`
pub(crate) fn cell_index(cell: Cell, rows: usize, cols: usize) -> Result<usize, LockError> {
    if cell.row < rows && cell.col < cols {
        Ok(cell.id(cols))
    } else {
        Err(LockError::OutOfBounds { cell, rows, cols })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn both_modes() -> [LockMode; 2] {
        [LockMode::Semaphore, LockMode::Monitor]
    }

    #[test]
    fn factory_builds_requested_mode() {
        for mode in both_modes() {
            let locks = create_cell_locks(mode, 3, 4);
            assert_eq!(locks.mode(), mode);
            assert_eq!(locks.dimensions(), (3, 4));
            assert!(!locks.is_closed());
        }
    }

    #[test]
    fn out_of_bounds_is_an_error() {
        for mode in both_modes() {
            let locks = create_cell_locks(mode, 2, 2);
            let result = locks.acquire(Cell::new(2, 0));
            assert_eq!(
                result,
                Err(LockError::OutOfBounds {
                    cell: Cell::new(2, 0),
                    rows: 2,
                    cols: 2
                })
            );
            // releasing out of bounds is ignored
            locks.release(Cell::new(5, 5));
        }
    }

    #[test]
    fn acquire_all_takes_every_cell() {
        for mode in both_modes() {
            let locks = create_cell_locks(mode, 3, 3);
            let cells = [Cell::new(2, 2), Cell::new(0, 1), Cell::new(1, 1)];
            assert_eq!(locks.acquire_all(&cells, Duration::from_millis(50)), Ok(true));

            for cell in cells {
                let deadline = Instant::now() + Duration::from_millis(5);
                assert_eq!(locks.try_acquire_until(cell, deadline), Ok(false));
            }

            locks.release_all(&cells);
            for cell in cells {
                let deadline = Instant::now() + Duration::from_millis(5);
                assert_eq!(locks.try_acquire_until(cell, deadline), Ok(true));
            }
        }
    }

    #[test]
    fn acquire_all_rolls_back_on_timeout() {
        for mode in both_modes() {
            let locks = create_cell_locks(mode, 2, 3);
            locks.acquire(Cell::new(1, 2)).unwrap();

            let cells = [Cell::new(0, 0), Cell::new(0, 1), Cell::new(1, 2)];
            assert_eq!(locks.acquire_all(&cells, Duration::from_millis(30)), Ok(false));

            // the cells taken before the blocked one were handed back
            let deadline = Instant::now() + Duration::from_millis(5);
            assert_eq!(locks.try_acquire_until(Cell::new(0, 0), deadline), Ok(true));
            assert_eq!(locks.try_acquire_until(Cell::new(0, 1), deadline), Ok(true));
        }
    }

    #[test]
    fn acquire_all_collapses_duplicates_and_accepts_empty() {
        for mode in both_modes() {
            let locks = create_cell_locks(mode, 2, 2);
            let cells = [Cell::new(0, 0), Cell::new(0, 0)];
            assert_eq!(locks.acquire_all(&cells, Duration::from_millis(20)), Ok(true));
            assert_eq!(locks.acquire_all(&[], Duration::from_millis(20)), Ok(true));
        }
    }

    #[test]
    fn overlapping_reservations_in_opposite_order_do_not_deadlock() {
        for mode in both_modes() {
            let locks = create_cell_locks(mode, 2, 2);
            let forward = vec![Cell::new(0, 0), Cell::new(0, 1), Cell::new(1, 1)];
            let backward: Vec<Cell> = forward.iter().rev().copied().collect();
            let barrier = Arc::new(Barrier::new(2));

            let handles: Vec<_> = [forward, backward]
                .into_iter()
                .map(|cells| {
                    let locks = Arc::clone(&locks);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        let mut successes = 0;
                        for _ in 0..50 {
                            if locks.acquire_all(&cells, Duration::from_secs(5)).unwrap() {
                                successes += 1;
                                locks.release_all(&cells);
                            }
                        }
                        successes
                    })
                })
                .collect();

            for handle in handles {
                assert_eq!(handle.join().unwrap(), 50);
            }
        }
    }

    #[test]
    fn cells_are_mutually_exclusive() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        for mode in both_modes() {
            let locks = create_cell_locks(mode, 1, 1);
            let inside = Arc::new(AtomicUsize::new(0));
            let max_seen = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let locks = Arc::clone(&locks);
                    let inside = Arc::clone(&inside);
                    let max_seen = Arc::clone(&max_seen);
                    thread::spawn(move || {
                        for _ in 0..25 {
                            locks.acquire(Cell::new(0, 0)).unwrap();
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                            locks.release(Cell::new(0, 0));
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }
            assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn close_wakes_blocked_waiters() {
        for mode in both_modes() {
            let locks = create_cell_locks(mode, 1, 1);
            locks.acquire(Cell::new(0, 0)).unwrap();

            let waiter = {
                let locks = Arc::clone(&locks);
                thread::spawn(move || locks.acquire(Cell::new(0, 0)))
            };

            thread::sleep(Duration::from_millis(30));
            locks.close();

            assert_eq!(waiter.join().unwrap(), Err(LockError::Closed));
            assert!(locks.is_closed());
            let deadline = Instant::now() + Duration::from_millis(5);
            assert_eq!(locks.try_acquire_until(Cell::new(0, 0), deadline), Err(LockError::Closed));
        }
    }

    #[test]
    fn lock_mode_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: LockMode,
        }

        let parsed: Wrapper = toml::from_str("mode = \"monitor\"").unwrap();
        assert_eq!(parsed.mode, LockMode::Monitor);
        assert_eq!(LockMode::default(), LockMode::Semaphore);
        assert_eq!(LockMode::Monitor.to_string(), "monitor");
    }
}
