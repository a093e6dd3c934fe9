use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// How a wait on a [`CompletionBarrier`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Every expected operation signalled.
    Done,
    /// A worker gave up before the count reached zero.
    Aborted,
}

/// Counts down once per completed operation of a phase.
///
/// Workers decrement with a single atomic op; only the signal that reaches zero (or an
/// abort) takes the lock to wake the driver.
pub struct CompletionBarrier {
    remaining: AtomicUsize,
    aborted: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl CompletionBarrier {
    pub fn new(count: usize) -> Self {
        CompletionBarrier {
            remaining: AtomicUsize::new(count),
            aborted: AtomicBool::new(false),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Records one completed operation.
    pub fn signal(&self) {
        let prev = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match prev {
            Ok(1) => self.wake(),
            Ok(_) => {}
            Err(_) => debug_assert!(false, "completion barrier signalled past zero"),
        }
    }

    /// Releases the waiter without the count reaching zero.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        self.wake();
    }

    /// Blocks until the count reaches zero or the barrier is aborted.
    pub fn wait(&self) -> Completion {
        let mut guard = self.lock.lock();
        loop {
            if let Some(completion) = self.state() {
                return completion;
            }
            self.cond.wait(&mut guard);
        }
    }

    /// Like [`wait`](Self::wait), but gives up after `timeout` and returns `None`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Completion> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        loop {
            if let Some(completion) = self.state() {
                return Some(completion);
            }
            if self.cond.wait_until(&mut guard, deadline).timed_out() {
                return self.state();
            }
        }
    }

    fn state(&self) -> Option<Completion> {
        if self.remaining() == 0 {
            Some(Completion::Done)
        } else if self.is_aborted() {
            Some(Completion::Aborted)
        } else {
            None
        }
    }

    fn wake(&self) {
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }
}

/// Start line for a phase's workers.
///
/// Workers `arrive` and block until the driver opens the gate. The driver can open it
/// before everyone has arrived, so a phase that failed to launch never strands a worker.
pub struct StartGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

#[derive(Default)]
struct GateState {
    arrived: usize,
    open: bool,
}

impl StartGate {
    pub fn new() -> Self {
        StartGate {
            state: Mutex::new(GateState::default()),
            cond: Condvar::new(),
        }
    }

    /// Registers the caller and blocks until the gate opens.
    pub fn arrive(&self) {
        let mut state = self.state.lock();
        state.arrived += 1;
        self.cond.notify_all();
        while !state.open {
            self.cond.wait(&mut state);
        }
    }

    /// Blocks until `count` callers have arrived or the gate is already open.
    pub fn wait_for(&self, count: usize) {
        let mut state = self.state.lock();
        while state.arrived < count && !state.open {
            self.cond.wait(&mut state);
        }
    }

    pub fn open(&self) {
        let mut state = self.state.lock();
        state.open = true;
        self.cond.notify_all();
    }

    pub fn arrived(&self) -> usize {
        self.state.lock().arrived
    }
}

impl Default for StartGate {
    fn default() -> Self {
        Self::new()
    }
}
