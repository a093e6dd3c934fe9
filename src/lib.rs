pub mod barrier;
pub mod config;
pub mod driver;
pub mod error;
pub mod payload;
pub mod sink;
pub mod stats;
pub mod store;
pub mod worker;

pub use barrier::{Completion, CompletionBarrier, StartGate};
pub use config::bench::{BenchWriter, BenchmarkConfig, Phases, StoreKind};
pub use driver::Driver;
pub use error::{BenchError, Result};
pub use payload::PayloadGenerator;
pub use sink::LatencySink;
pub use stats::{percentile, PhaseResult, StatsReducer, StatsReport};
pub use store::{BatchStore, MemoryStore, RedisStore};
pub use worker::{OpKind, Worker, WorkerState};
