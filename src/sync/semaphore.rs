//! Cell locks backed by a fair binary semaphore per cell
//!
//! Waiters take a ticket and are served strictly in arrival order. A waiter
//! that times out or is woken by [`close`](CellLocks::close) gives its ticket
//! up so the next one in line can proceed.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::domain::Cell;
use crate::sync::{CellLocks, LockError, LockMode, cell_index};

#[derive(Debug, Default)]
struct PermitState {
    held: bool,
    next_ticket: u64,
    queue: VecDeque<u64>,
}

impl PermitState {
    fn is_turn_of(&self, ticket: u64) -> bool {
        !self.held && self.queue.front() == Some(&ticket)
    }

    fn leave_queue(&mut self, ticket: u64) {
        self.queue.retain(|waiting| *waiting != ticket);
    }
}

/// One fair permit guarding a single cell
#[derive(Debug, Default)]
struct FairPermit {
    state: Mutex<PermitState>,
    changed: Condvar,
}

impl FairPermit {
    fn acquire(&self, deadline: Option<Instant>, closed: &AtomicBool) -> Result<bool, LockError> {
        let mut state = self.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back(ticket);

        loop {
            if closed.load(Ordering::Acquire) {
                state.leave_queue(ticket);
                self.changed.notify_all();
                return Err(LockError::Closed);
            }

            if state.is_turn_of(ticket) {
                state.queue.pop_front();
                state.held = true;
                return Ok(true);
            }

            match deadline {
                None => self.changed.wait(&mut state),
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        if !closed.load(Ordering::Acquire) && state.is_turn_of(ticket) {
                            state.queue.pop_front();
                            state.held = true;
                            return Ok(true);
                        }
                        // someone behind us may now be first in line
                        state.leave_queue(ticket);
                        self.changed.notify_all();
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Returns false if the permit was not held
    fn release(&self) -> bool {
        let mut state = self.state.lock();
        if !state.held {
            return false;
        }
        state.held = false;
        self.changed.notify_all();
        true
    }

    fn wake_all(&self) {
        let _state = self.state.lock();
        self.changed.notify_all();
    }
}

/// Grid of fair semaphores, one per cell
pub struct SemaphoreCellLocks {
    rows: usize,
    cols: usize,
    permits: Vec<FairPermit>,
    closed: AtomicBool,
}

impl SemaphoreCellLocks {
    pub fn new(rows: usize, cols: usize) -> Self {
        let mut permits = Vec::with_capacity(rows * cols);
        permits.resize_with(rows * cols, FairPermit::default);
        Self {
            rows,
            cols,
            permits,
            closed: AtomicBool::new(false),
        }
    }

    fn permit(&self, cell: Cell) -> Result<&FairPermit, LockError> {
        let index = cell_index(cell, self.rows, self.cols)?;
        Ok(&self.permits[index])
    }
}

impl fmt::Debug for SemaphoreCellLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemaphoreCellLocks")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl CellLocks for SemaphoreCellLocks {
    fn mode(&self) -> LockMode {
        LockMode::Semaphore
    }

    fn dimensions(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn acquire(&self, cell: Cell) -> Result<(), LockError> {
        self.permit(cell)?.acquire(None, &self.closed).map(|_| ())
    }

    fn try_acquire_until(&self, cell: Cell, deadline: Instant) -> Result<bool, LockError> {
        self.permit(cell)?.acquire(Some(deadline), &self.closed)
    }

    fn release(&self, cell: Cell) {
        match self.permit(cell) {
            Ok(permit) => {
                if !permit.release() {
                    tracing::debug!(%cell, "ignoring release of a cell that is not held");
                }
            }
            Err(err) => tracing::warn!(%err, "ignoring release"),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for permit in &self.permits {
            permit.wake_all();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
