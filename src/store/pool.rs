use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{BenchError, Result};

struct PoolState<C> {
    idle: Vec<C>,
    open: usize,
}

/// Bounded set of reusable connections.
///
/// At most `capacity` connections exist at once; connections are opened lazily and
/// `acquire_with` blocks (up to `acquire_timeout`) while all of them are borrowed.
pub struct Pool<C> {
    state: Mutex<PoolState<C>>,
    available: Condvar,
    capacity: usize,
    acquire_timeout: Duration,
}

impl<C> Pool<C> {
    pub fn new(capacity: usize, acquire_timeout: Duration) -> Self {
        Pool {
            state: Mutex::new(PoolState {
                idle: Vec::with_capacity(capacity),
                open: 0,
            }),
            available: Condvar::new(),
            capacity,
            acquire_timeout,
        }
    }

    /// Pops an idle connection, or opens one with `connect` if the pool is not full.
    pub fn acquire_with<F>(&self, connect: F) -> Result<C>
    where
        F: FnOnce() -> Result<C>,
    {
        let deadline = Instant::now() + self.acquire_timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(conn);
            }
            if state.open < self.capacity {
                state.open += 1;
                drop(state);
                return connect().map_err(|e| {
                    self.state.lock().open -= 1;
                    self.available.notify_one();
                    match e {
                        BenchError::ConnectionAcquisition(_) => e,
                        other => BenchError::ConnectionAcquisition(other.to_string()),
                    }
                });
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return Err(BenchError::ConnectionAcquisition(format!(
                    "all {} connections busy for {:?}",
                    self.capacity, self.acquire_timeout
                )));
            }
        }
    }

    pub fn release(&self, conn: C) {
        self.state.lock().idle.push(conn);
        self.available.notify_one();
    }

    /// Number of connections currently opened, idle or borrowed.
    pub fn open(&self) -> usize {
        self.state.lock().open
    }
}
