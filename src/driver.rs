use std::any::Any;
use std::io;
use std::time::Instant;

use crossbeam_utils::thread::{scope, Scope, ScopedJoinHandle};
use tracing::{error, info};

use crate::barrier::{Completion, CompletionBarrier, StartGate};
use crate::config::bench::BenchmarkConfig;
use crate::error::{BenchError, Result};
use crate::sink::LatencySink;
use crate::stats::{PhaseResult, StatsReducer, StatsReport};
use crate::store::BatchStore;
use crate::worker::{OpKind, Worker};

/// Runs the configured phases against `store`, one scoped thread per worker.
pub struct Driver<'a, S: BatchStore> {
    config: &'a BenchmarkConfig,
    store: &'a S,
    reducer: StatsReducer,
    /// Spawns past this many workers fail as if the OS refused the thread.
    spawn_limit: Option<usize>,
}

/// Shared state of one running phase.
struct Phase<'p> {
    kind: OpKind,
    sink: &'p LatencySink,
    barrier: &'p CompletionBarrier,
    gate: &'p StartGate,
}

impl<'a, S: BatchStore> Driver<'a, S> {
    pub fn new(config: &'a BenchmarkConfig, store: &'a S) -> Self {
        Driver {
            config,
            store,
            reducer: StatsReducer::new(config.percentiles.clone()),
            spawn_limit: None,
        }
    }

    #[cfg(test)]
    fn with_spawn_limit(mut self, limit: usize) -> Self {
        self.spawn_limit = Some(limit);
        self
    }

    /// Every configured phase in order, stopping at the first one that fails.
    pub fn run(&self) -> Result<Vec<StatsReport>> {
        self.config
            .phases
            .kinds()
            .iter()
            .map(|&kind| self.measure(kind))
            .collect()
    }

    /// One phase, reduced to its report.
    pub fn measure(&self, kind: OpKind) -> Result<StatsReport> {
        let result = self.run_phase(kind)?;
        self.reducer.reduce(result)
    }

    /// Launches the workers of one phase and collects their samples.
    ///
    /// The phase clock starts once every worker is spawned and waiting at the start gate,
    /// and stops when the completion barrier reaches zero. If a worker cannot be spawned,
    /// fails, or panics, the whole phase fails with [`BenchError::PhaseAborted`], carrying
    /// how many operations did complete.
    pub fn run_phase(&self, kind: OpKind) -> Result<PhaseResult> {
        let config = self.config;
        let expected = config.expected_operations();
        let sink = &LatencySink::new();
        let barrier = &CompletionBarrier::new(expected);
        let gate = &StartGate::new();
        let phase = Phase {
            kind,
            sink,
            barrier,
            gate,
        };

        info!(
            phase = %kind,
            workers = config.workers,
            operations = config.operations,
            batch_size = config.batch_size,
            "starting phase"
        );

        let (elapsed, completion, outcomes) = scope(|s| {
            let mut handles = Vec::with_capacity(config.workers);
            let mut outcomes: Vec<Result<usize>> = Vec::new();
            for id in 0..config.workers {
                match self.spawn_worker(s, id, &phase) {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        barrier.abort();
                        outcomes.push(Err(BenchError::WorkerSpawn {
                            worker: id,
                            reason: e.to_string(),
                        }));
                        break;
                    }
                }
            }

            if !barrier.is_aborted() {
                gate.wait_for(handles.len());
            }
            gate.open();
            let start = Instant::now();
            let completion = barrier.wait();
            let elapsed = start.elapsed();

            outcomes.extend(handles.into_iter().enumerate().map(|(id, handle)| {
                handle.join().unwrap_or_else(|payload| {
                    Err(BenchError::WorkerPanicked {
                        worker: id,
                        message: panic_message(payload.as_ref()),
                    })
                })
            }));
            (elapsed, completion, outcomes)
        })
        .map_err(|payload| BenchError::WorkerPanicked {
            worker: config.workers,
            message: panic_message(payload.as_ref()),
        })?;

        let failure = outcomes.into_iter().find_map(|outcome| outcome.err());
        if completion == Completion::Aborted || failure.is_some() {
            let completed = expected - barrier.remaining();
            let source = failure.unwrap_or_else(|| BenchError::WorkerPanicked {
                worker: config.workers,
                message: "phase aborted without a reported error".into(),
            });
            error!(phase = %kind, completed, expected, "phase aborted: {}", source);
            return Err(BenchError::PhaseAborted {
                phase: kind,
                completed,
                expected,
                source: Box::new(source),
            });
        }

        let samples = sink.drain();
        debug_assert_eq!(samples.len(), expected);
        info!(
            phase = %kind,
            requests = samples.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "phase finished"
        );
        Ok(PhaseResult {
            phase: kind,
            workers: config.workers,
            data_size: config.data_size,
            elapsed,
            samples,
        })
    }

    fn spawn_worker<'scope, 'env>(
        &'env self,
        s: &'scope Scope<'env>,
        id: usize,
        phase: &'env Phase<'env>,
    ) -> io::Result<ScopedJoinHandle<'scope, Result<usize>>> {
        if self.spawn_limit.is_some_and(|limit| id >= limit) {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "thread limit reached",
            ));
        }
        let (config, store) = (self.config, self.store);
        s.builder()
            .name(format!("{}-{}", phase.kind, id))
            .spawn(move |_| {
                phase.gate.arrive();
                let barrier = phase.barrier;
                scopeguard::defer_on_unwind! { barrier.abort(); }
                let mut worker = Worker::new(id, phase.kind, config, store, phase.sink, barrier);
                worker.run()
            })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
