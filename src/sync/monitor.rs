//! Cell locks implemented as monitors
//!
//! Each cell is an `occupied` flag protected by its own mutex, with a
//! condition variable to wait on. Release wakes every waiter and each waiter
//! re-checks the flag in a loop, which also covers spurious wake-ups. Unlike
//! the semaphore grid, no arrival order is enforced.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::domain::Cell;
use crate::sync::{CellLocks, LockError, LockMode, cell_index};

/// Monitor guarding a single cell
#[derive(Debug, Default)]
struct CellMonitor {
    occupied: Mutex<bool>,
    vacated: Condvar,
}

impl CellMonitor {
    /// Waits until the cell is free (or `deadline` passes) and marks it occupied
    fn acquire(&self, deadline: Option<Instant>, closed: &AtomicBool) -> Result<bool, LockError> {
        let mut occupied = self.occupied.lock();
        loop {
            if closed.load(Ordering::Acquire) {
                return Err(LockError::Closed);
            }
            if !*occupied {
                *occupied = true;
                return Ok(true);
            }
            match deadline {
                None => self.vacated.wait(&mut occupied),
                Some(deadline) => {
                    if self.vacated.wait_until(&mut occupied, deadline).timed_out() {
                        if !*occupied && !closed.load(Ordering::Acquire) {
                            *occupied = true;
                            return Ok(true);
                        }
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Returns false if the cell was already free
    fn release(&self) -> bool {
        let mut occupied = self.occupied.lock();
        if !*occupied {
            return false;
        }
        *occupied = false;
        self.vacated.notify_all();
        true
    }

    fn wake_all(&self) {
        let _occupied = self.occupied.lock();
        self.vacated.notify_all();
    }
}

/// Grid of monitors, one per cell
pub struct MonitorCellLocks {
    rows: usize,
    cols: usize,
    cells: Vec<CellMonitor>,
    closed: AtomicBool,
}

impl MonitorCellLocks {
    pub fn new(rows: usize, cols: usize) -> Self {
        let mut cells = Vec::with_capacity(rows * cols);
        cells.resize_with(rows * cols, CellMonitor::default);
        Self {
            rows,
            cols,
            cells,
            closed: AtomicBool::new(false),
        }
    }

    fn monitor(&self, cell: Cell) -> Result<&CellMonitor, LockError> {
        let index = cell_index(cell, self.rows, self.cols)?;
        Ok(&self.cells[index])
    }
}

impl fmt::Debug for MonitorCellLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorCellLocks")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl CellLocks for MonitorCellLocks {
    fn mode(&self) -> LockMode {
        LockMode::Monitor
    }

    fn dimensions(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn acquire(&self, cell: Cell) -> Result<(), LockError> {
        self.monitor(cell)?.acquire(None, &self.closed).map(|_| ())
    }

    fn try_acquire_until(&self, cell: Cell, deadline: Instant) -> Result<bool, LockError> {
        self.monitor(cell)?.acquire(Some(deadline), &self.closed)
    }

    fn release(&self, cell: Cell) {
        match self.monitor(cell) {
            Ok(monitor) => {
                if !monitor.release() {
                    tracing::debug!(%cell, "ignoring release of a free cell");
                }
            }
            Err(err) => tracing::warn!(%err, "ignoring release"),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for monitor in &self.cells {
            monitor.wake_all();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn over_release_is_ignored() {
        let locks = MonitorCellLocks::new(2, 2);
        let cell = Cell::new(1, 0);

        locks.release(cell);
        locks.acquire(cell).unwrap();
        locks.release(cell);
        locks.release(cell);

        locks.acquire(cell).unwrap();
        let deadline = Instant::now() + Duration::from_millis(10);
        assert_eq!(locks.try_acquire_until(cell, deadline), Ok(false));
    }

    #[test]
    fn release_wakes_a_blocked_waiter() {
        let locks = Arc::new(MonitorCellLocks::new(1, 2));
        let cell = Cell::new(0, 1);
        locks.acquire(cell).unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                let deadline = Instant::now() + Duration::from_secs(5);
                locks.try_acquire_until(cell, deadline)
            })
        };

        thread::sleep(Duration::from_millis(20));
        locks.release(cell);
        assert_eq!(waiter.join().unwrap(), Ok(true));
    }

    #[test]
    fn expired_deadline_still_takes_a_free_cell() {
        let locks = MonitorCellLocks::new(1, 1);
        let past = Instant::now();
        thread::sleep(Duration::from_millis(2));
        assert_eq!(locks.try_acquire_until(Cell::new(0, 0), past), Ok(true));
    }
}
