use std::fmt;

use thiserror::Error;

use crate::worker::OpKind;

pub type Result<T> = std::result::Result<T, BenchError>;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("failed to acquire a store connection: {0}")]
    ConnectionAcquisition(String),

    #[error("store call failed: {0}")]
    StoreCall(String),

    #[error("no samples were recorded, statistics are undefined")]
    InsufficientSamples,

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("failed to spawn worker {worker}: {reason}")]
    WorkerSpawn { worker: usize, reason: String },

    #[error("worker {worker} panicked: {message}")]
    WorkerPanicked { worker: usize, message: String },

    #[error("{phase} phase aborted after {completed} of {expected} operations: {source}")]
    PhaseAborted {
        phase: OpKind,
        completed: usize,
        expected: usize,
        #[source]
        source: Box<BenchError>,
    },

    #[error("failed to write results: {0}")]
    Output(String),
}

impl BenchError {
    pub fn configuration(msg: impl fmt::Display) -> Self {
        BenchError::Configuration(msg.to_string())
    }

    /// The phase that failed, if this error aborted one.
    pub fn failed_phase(&self) -> Option<OpKind> {
        match self {
            BenchError::PhaseAborted { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

impl From<redis::RedisError> for BenchError {
    fn from(e: redis::RedisError) -> Self {
        BenchError::StoreCall(e.to_string())
    }
}

impl From<csv::Error> for BenchError {
    fn from(e: csv::Error) -> Self {
        BenchError::Output(e.to_string())
    }
}

impl From<std::io::Error> for BenchError {
    fn from(e: std::io::Error) -> Self {
        BenchError::Output(e.to_string())
    }
}
