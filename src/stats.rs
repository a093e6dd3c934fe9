//! Reduction of a phase's latency samples into throughput and tail-latency figures.
//!
//! Percentiles use the nearest-rank definition: the value at index `ceil(p/100 * n) - 1`
//! of the sorted samples, clamped to `[0, n - 1]`. There is no interpolation, so `p = 100`
//! is always the maximum and `p = 50` on an even count is the lower-middle sample.

use std::fmt;
use std::time::Duration;

use crate::error::{BenchError, Result};
use crate::worker::OpKind;

pub const DEFAULT_PERCENTILES: [f64; 7] = [50.0, 90.0, 95.0, 99.0, 99.5, 99.9, 100.0];

// Absorbs float error in `p * n / 100` so that e.g. p99.9 of 1000 samples is rank 999.
const RANK_TOLERANCE: f64 = 1e-9;

/// Everything the driver collected for one finished phase.
#[derive(Debug, Clone)]
pub struct PhaseResult {
    pub phase: OpKind,
    pub workers: usize,
    pub data_size: usize,
    pub elapsed: Duration,
    pub samples: Vec<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsReport {
    pub phase: OpKind,
    pub workers: usize,
    pub data_size: usize,
    pub requests: usize,
    pub elapsed: Duration,
    /// Completed operations per second of wall-clock phase time.
    pub throughput: f64,
    /// Arithmetic mean of the samples.
    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,
    pub percentiles: Vec<(f64, Duration)>,
}

impl StatsReport {
    /// Latency at percentile `p`, if `p` was one of the requested percentiles.
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        self.percentiles
            .iter()
            .find(|(q, _)| *q == p)
            .map(|(_, latency)| *latency)
    }
}

/// Nearest-rank percentile of ascending `sorted` samples. `None` when there are no samples.
pub fn percentile(sorted: &[Duration], p: f64) -> Option<Duration> {
    if sorted.is_empty() {
        return None;
    }
    Some(sorted[nearest_rank_index(sorted.len(), p)])
}

pub struct StatsReducer {
    percentiles: Vec<f64>,
}

impl StatsReducer {
    pub fn new(percentiles: Vec<f64>) -> Self {
        StatsReducer { percentiles }
    }

    pub fn reduce(&self, result: PhaseResult) -> Result<StatsReport> {
        let PhaseResult {
            phase,
            workers,
            data_size,
            elapsed,
            mut samples,
        } = result;
        if samples.is_empty() {
            return Err(BenchError::InsufficientSamples);
        }
        samples.sort_unstable();

        let n = samples.len();
        let total: u128 = samples.iter().map(Duration::as_nanos).sum();
        let mean = Duration::from_nanos((total / n as u128) as u64);
        // A phase always takes some time; clamp so the division stays finite.
        let secs = elapsed.max(Duration::from_nanos(1)).as_secs_f64();
        let percentiles = self
            .percentiles
            .iter()
            .map(|&p| (p, samples[nearest_rank_index(n, p)]))
            .collect();

        Ok(StatsReport {
            phase,
            workers,
            data_size,
            requests: n,
            elapsed,
            throughput: n as f64 / secs,
            mean,
            min: samples[0],
            max: samples[n - 1],
            percentiles,
        })
    }
}

impl Default for StatsReducer {
    fn default() -> Self {
        Self::new(DEFAULT_PERCENTILES.to_vec())
    }
}

fn nearest_rank_index(n: usize, p: f64) -> usize {
    let rank = (p * n as f64 / 100.0 - RANK_TOLERANCE).ceil();
    if rank <= 1.0 {
        0
    } else {
        (rank as usize - 1).min(n - 1)
    }
}

pub fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// `99.9` -> `"99.9"`, `50.0` -> `"50"`.
pub fn percentile_label(p: f64) -> String {
    if p.fract() == 0.0 {
        format!("{}", p as u64)
    } else {
        format!("{}", p)
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-------------- {} -----------------", self.phase)?;
        writeln!(f, "Data size: {}", self.data_size)?;
        writeln!(f, "Total Request: {}", self.requests)?;
        writeln!(f, "Total Time(ms): {:.3}", millis(self.elapsed))?;
        writeln!(f, "QPS(r/s): {:.1}", self.throughput)?;
        writeln!(f, "Total Thread: {}", self.workers)?;
        writeln!(
            f,
            "AVG ms: {:.3}, MIN ms: {:.3}, MAX ms: {:.3}",
            millis(self.mean),
            millis(self.min),
            millis(self.max)
        )?;
        for (p, latency) in &self.percentiles {
            writeln!(f, "P{} ms: {:.3}", percentile_label(*p), millis(*latency))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn micros(v: &[u64]) -> Vec<Duration> {
        v.iter().map(|&us| Duration::from_micros(us)).collect()
    }

    fn phase(samples: Vec<Duration>, elapsed: Duration) -> PhaseResult {
        PhaseResult {
            phase: OpKind::Write,
            workers: 1,
            data_size: 100,
            elapsed,
            samples,
        }
    }

    #[test]
    fn nearest_rank_tie_breaks() {
        let s = micros(&[10, 20, 30, 40]);
        assert_eq!(percentile(&s, 50.0), Some(Duration::from_micros(20)));
        assert_eq!(percentile(&s, 100.0), Some(Duration::from_micros(40)));
        assert_eq!(percentile(&s, 75.0), Some(Duration::from_micros(30)));
        assert_eq!(percentile(&s, 76.0), Some(Duration::from_micros(40)));
        assert_eq!(percentile(&s, 0.001), Some(Duration::from_micros(10)));
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn fractional_percentile_is_not_rounded_up_by_float_error() {
        let s: Vec<Duration> = (1..=1000).map(Duration::from_micros).collect();
        assert_eq!(percentile(&s, 99.9), Some(Duration::from_micros(999)));
        assert_eq!(percentile(&s, 99.5), Some(Duration::from_micros(995)));
    }

    #[test]
    fn reduce_computes_summary() {
        let report = StatsReducer::new(vec![50.0, 100.0])
            .reduce(phase(micros(&[40, 10, 30, 20]), Duration::from_secs(2)))
            .unwrap();
        assert_eq!(report.requests, 4);
        assert_eq!(report.throughput, 2.0);
        assert_eq!(report.mean, Duration::from_micros(25));
        assert_eq!(report.min, Duration::from_micros(10));
        assert_eq!(report.max, Duration::from_micros(40));
        assert_eq!(report.percentile(50.0), Some(Duration::from_micros(20)));
        assert_eq!(report.percentile(100.0), Some(Duration::from_micros(40)));
        assert_eq!(report.percentile(99.0), None);
    }

    #[test]
    fn empty_phase_is_insufficient() {
        let err = StatsReducer::default()
            .reduce(phase(Vec::new(), Duration::from_secs(1)))
            .unwrap_err();
        assert!(matches!(err, BenchError::InsufficientSamples));
    }

    #[test]
    fn zero_elapsed_keeps_throughput_finite() {
        let report = StatsReducer::default()
            .reduce(phase(micros(&[1]), Duration::ZERO))
            .unwrap();
        assert!(report.throughput.is_finite());
        assert!(report.throughput > 0.0);
    }

    #[test]
    fn display_lists_percentiles() {
        let report = StatsReducer::default()
            .reduce(phase(micros(&[1000, 2000]), Duration::from_secs(1)))
            .unwrap();
        let text = report.to_string();
        assert!(text.contains("mset"));
        assert!(text.contains("Total Request: 2"));
        assert!(text.contains("P99.9 ms: 2.000"));
        assert!(text.contains("P50 ms: 1.000"));
    }

    proptest! {
        #[test]
        fn extremes_are_min_and_max(mut v in prop::collection::vec(0u64..1_000_000, 1..500)) {
            let mut s = micros(&v);
            s.sort();
            v.sort();
            prop_assert_eq!(percentile(&s, 100.0), Some(Duration::from_micros(v[v.len() - 1])));
            prop_assert_eq!(percentile(&s, 1e-6), Some(Duration::from_micros(v[0])));
        }

        #[test]
        fn monotonic_in_p(
            v in prop::collection::vec(0u64..1_000_000, 1..500),
            a in 0.0001f64..100.0,
            b in 0.0001f64..100.0,
        ) {
            let mut s = micros(&v);
            s.sort();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(percentile(&s, lo) <= percentile(&s, hi));
        }

        #[test]
        fn throughput_positive_and_finite(
            v in prop::collection::vec(1u64..1_000_000, 1..200),
            elapsed_us in 1u64..10_000_000,
        ) {
            let report = StatsReducer::default()
                .reduce(phase(micros(&v), Duration::from_micros(elapsed_us)))
                .unwrap();
            prop_assert!(report.throughput.is_finite());
            prop_assert!(report.throughput > 0.0);
            prop_assert_eq!(report.requests, v.len());
        }
    }
}
