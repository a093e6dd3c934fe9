use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::barrier::CompletionBarrier;
use crate::config::bench::BenchmarkConfig;
use crate::error::Result;
use crate::payload::PayloadGenerator;
use crate::sink::LatencySink;
use crate::store::BatchStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Multi-key SET.
    Write,
    /// Multi-key GET.
    Read,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Write => write!(f, "mset"),
            OpKind::Read => write!(f, "mget"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Finished,
    Failed,
}

/// Issues `config.operations` batched calls of one kind against the store.
pub struct Worker<'a, S: BatchStore> {
    id: usize,
    kind: OpKind,
    config: &'a BenchmarkConfig,
    store: &'a S,
    sink: &'a LatencySink,
    barrier: &'a CompletionBarrier,
    payload: PayloadGenerator,
    state: WorkerState,
    completed: usize,
}

impl<'a, S: BatchStore> Worker<'a, S> {
    pub fn new(
        id: usize,
        kind: OpKind,
        config: &'a BenchmarkConfig,
        store: &'a S,
        sink: &'a LatencySink,
        barrier: &'a CompletionBarrier,
    ) -> Self {
        Worker {
            id,
            kind,
            config,
            store,
            sink,
            barrier,
            payload: PayloadGenerator::for_worker(config.seed, id),
            state: WorkerState::Idle,
            completed: 0,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Runs the whole loop. Stops early, without error, if another worker aborted the
    /// phase. On error the phase's barrier is aborted before returning.
    pub fn run(&mut self) -> Result<usize> {
        let barrier = self.barrier;
        scopeguard::defer_on_unwind! { barrier.abort(); }

        self.state = WorkerState::Running;
        let started = Instant::now();
        for _ in 0..self.config.operations {
            if barrier.is_aborted() {
                break;
            }
            if let Err(e) = self.step() {
                self.state = WorkerState::Failed;
                warn!(
                    worker = self.id,
                    phase = %self.kind,
                    completed = self.completed,
                    "worker failed: {}",
                    e
                );
                barrier.abort();
                return Err(e);
            }
            self.completed += 1;
            barrier.signal();
        }
        self.state = WorkerState::Finished;
        let elapsed = started.elapsed();
        debug!(
            worker = self.id,
            phase = %self.kind,
            completed = self.completed,
            elapsed_ms = elapsed.as_secs_f64() * 1e3,
            qps = self.completed as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
            "worker finished"
        );
        Ok(self.completed)
    }

    fn step(&mut self) -> Result<Duration> {
        let (batch_size, key_space) = (self.config.batch_size, self.config.key_space);
        match self.kind {
            OpKind::Write => {
                let pairs = self
                    .payload
                    .write_batch(batch_size, key_space, self.config.data_size);
                self.timed(|store, conn| store.execute_write(conn, &pairs))
            }
            OpKind::Read => {
                let keys = self.payload.read_batch(batch_size, key_space);
                self.timed(|store, conn| store.execute_read(conn, &keys).map(drop))
            }
        }
    }

    /// Times `call` alone: connection acquisition happens before the clock starts, and
    /// the connection goes back to the pool only after the sample is recorded.
    fn timed<F>(&self, call: F) -> Result<Duration>
    where
        F: FnOnce(&S, &mut S::Conn) -> Result<()>,
    {
        let store = self.store;
        let conn = store.acquire()?;
        let mut conn = scopeguard::guard(conn, |conn| store.release(conn));

        let start = Instant::now();
        let result = call(store, &mut *conn);
        let elapsed = start.elapsed();

        result?;
        self.sink.record(elapsed);
        Ok(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::{OpKind, Worker, WorkerState};
    use crate::barrier::{Completion, CompletionBarrier};
    use crate::config::bench::BenchmarkConfig;
    use crate::error::{BenchError, Result};
    use crate::sink::LatencySink;
    use crate::store::{BatchStore, MemoryStore};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn config(operations: usize, batch_size: usize) -> BenchmarkConfig {
        BenchmarkConfig {
            operations,
            workers: 1,
            batch_size,
            data_size: 16,
            key_space: 100,
            ..BenchmarkConfig::default()
        }
    }

    /// Tracks connections and sleeps inside acquire, so acquisition time is observable.
    #[derive(Default)]
    struct SlowAcquire {
        borrowed: AtomicUsize,
        batches: Mutex<Vec<usize>>,
    }

    impl BatchStore for SlowAcquire {
        type Conn = ();

        fn acquire(&self) -> Result<()> {
            std::thread::sleep(Duration::from_millis(20));
            self.borrowed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn release(&self, _conn: ()) {
            self.borrowed.fetch_sub(1, Ordering::SeqCst);
        }

        fn execute_write(&self, _conn: &mut (), pairs: &[(String, String)]) -> Result<()> {
            self.batches.lock().push(pairs.len());
            Ok(())
        }

        fn execute_read(&self, _conn: &mut (), keys: &[String]) -> Result<Vec<Option<String>>> {
            if keys.is_empty() {
                return Err(BenchError::StoreCall("empty MGET".into()));
            }
            Ok(vec![None; keys.len()])
        }
    }

    #[test]
    fn records_one_sample_and_signal_per_operation() {
        let config = config(25, 4);
        let store = MemoryStore::new();
        let sink = LatencySink::new();
        let barrier = CompletionBarrier::new(25);
        let mut worker = Worker::new(0, OpKind::Write, &config, &store, &sink, &barrier);
        assert_eq!(worker.state(), WorkerState::Idle);

        assert_eq!(worker.run().unwrap(), 25);
        assert_eq!(worker.state(), WorkerState::Finished);
        assert_eq!(sink.drain().len(), 25);
        assert_eq!(barrier.wait(), Completion::Done);
        assert!(!store.is_empty());
    }

    #[test]
    fn acquisition_is_outside_the_timed_window() {
        let config = config(3, 2);
        let store = SlowAcquire::default();
        let sink = LatencySink::new();
        let barrier = CompletionBarrier::new(3);
        Worker::new(0, OpKind::Write, &config, &store, &sink, &barrier)
            .run()
            .unwrap();

        let samples = sink.drain();
        assert_eq!(samples.len(), 3);
        assert!(samples.iter().all(|s| *s < Duration::from_millis(20)));
        assert_eq!(store.borrowed.load(Ordering::SeqCst), 0);
        assert_eq!(*store.batches.lock(), vec![2, 2, 2]);
    }

    #[test]
    fn failure_aborts_barrier_and_releases_connection() {
        let config = config(3, 0);
        let store = SlowAcquire::default();
        let sink = LatencySink::new();
        let barrier = CompletionBarrier::new(3);
        let mut worker = Worker::new(0, OpKind::Read, &config, &store, &sink, &barrier);

        let err = worker.run().unwrap_err();
        assert!(matches!(err, BenchError::StoreCall(_)));
        assert_eq!(worker.state(), WorkerState::Failed);
        assert_eq!(worker.completed(), 0);
        assert!(sink.drain().is_empty());
        assert_eq!(barrier.wait(), Completion::Aborted);
        assert_eq!(store.borrowed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stops_when_phase_already_aborted() {
        let config = config(10, 1);
        let store = MemoryStore::new();
        let sink = LatencySink::new();
        let barrier = CompletionBarrier::new(10);
        barrier.abort();
        let mut worker = Worker::new(0, OpKind::Read, &config, &store, &sink, &barrier);
        assert_eq!(worker.run().unwrap(), 0);
        assert_eq!(barrier.remaining(), 10);
    }
}
