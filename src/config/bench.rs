use clap::{value_parser, Arg, ArgAction, ArgMatches, Command, ValueEnum};
use csv::{Reader, Writer};
use std::ffi::OsString;
use std::fmt;
use std::fs::{create_dir_all, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BenchError, Result};
use crate::stats::{millis, percentile_label, StatsReport, DEFAULT_PERCENTILES};
use crate::worker::OpKind;

/// Which phases a run executes. `SetGet` runs the write phase to completion first.
#[derive(PartialEq, Eq, Debug, ValueEnum, Clone, Copy)]
pub enum Phases {
    Set,
    Get,
    #[value(name = "setget")]
    SetGet,
}

impl Phases {
    pub fn kinds(self) -> &'static [OpKind] {
        match self {
            Phases::Set => &[OpKind::Write],
            Phases::Get => &[OpKind::Read],
            Phases::SetGet => &[OpKind::Write, OpKind::Read],
        }
    }
}

impl fmt::Display for Phases {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phases::Set => write!(f, "set"),
            Phases::Get => write!(f, "get"),
            Phases::SetGet => write!(f, "setget"),
        }
    }
}

#[derive(PartialEq, Eq, Debug, ValueEnum, Clone, Copy)]
pub enum StoreKind {
    Redis,
    Memory,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Redis => write!(f, "redis"),
            StoreKind::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkConfig {
    /// Batched operations issued by each worker per phase.
    pub operations: usize,
    /// Concurrent workers, and the connection cap of the store.
    pub workers: usize,
    /// Keys per MSET/MGET.
    pub batch_size: usize,
    /// Value length in bytes.
    pub data_size: usize,
    /// Keys are drawn from `[0, key_space)`.
    pub key_space: u64,
    pub host: String,
    pub port: u16,
    pub password: String,
    pub phases: Phases,
    pub percentiles: Vec<f64>,
    pub store: StoreKind,
    pub timeout: Duration,
    pub seed: Option<u64>,
    pub output: Option<PathBuf>,
    pub dry_run: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        BenchmarkConfig {
            operations: 100_000,
            workers: 1,
            batch_size: 100,
            data_size: 100,
            key_space: 1000,
            host: "localhost".to_string(),
            port: 6379,
            password: String::new(),
            phases: Phases::SetGet,
            percentiles: DEFAULT_PERCENTILES.to_vec(),
            store: StoreKind::Redis,
            timeout: Duration::from_millis(1000),
            seed: None,
            output: None,
            dry_run: false,
        }
    }
}

impl BenchmarkConfig {
    /// Operations one phase completes when nothing fails.
    pub fn expected_operations(&self) -> usize {
        self.workers * self.operations
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("operation count", self.operations),
            ("worker count", self.workers),
            ("batch size", self.batch_size),
        ] {
            if value == 0 {
                return Err(BenchError::configuration(format!("{name} must be positive")));
            }
        }
        if self.workers.checked_mul(self.operations).is_none() {
            return Err(BenchError::configuration(
                "workers * operations overflows the operation counter",
            ));
        }
        if self.key_space == 0 {
            return Err(BenchError::configuration("key space must be positive"));
        }
        if self.host.is_empty() {
            return Err(BenchError::configuration("host must not be empty"));
        }
        if self.timeout.is_zero() {
            return Err(BenchError::configuration("timeout must be positive"));
        }
        if self.percentiles.is_empty() {
            return Err(BenchError::configuration("at least one percentile is required"));
        }
        if let Some(p) = self
            .percentiles
            .iter()
            .find(|p| !(p.is_finite() && **p > 0.0 && **p <= 100.0))
        {
            return Err(BenchError::configuration(format!(
                "percentile {p} is outside (0, 100]"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for BenchmarkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{}: {} workers, {} ops/worker, batch {}, {} B values, key space {}, phases {}",
            self.store,
            self.host,
            self.port,
            self.workers,
            self.operations,
            self.batch_size,
            self.data_size,
            self.key_space,
            self.phases,
        )
    }
}

/// Appends one CSV row per measured phase, when an output file was requested.
pub struct BenchWriter {
    output: Option<Writer<File>>,
}

impl BenchWriter {
    pub fn disabled() -> Self {
        BenchWriter { output: None }
    }

    fn header(percentiles: &[f64]) -> Vec<String> {
        let mut header: Vec<String> = [
            "store",
            "phase",
            "workers",
            "operations",
            "batch_size",
            "data_size",
            "key_space",
            "requests",
            "elapsed_ms",
            "throughput",
            "mean_ms",
            "min_ms",
            "max_ms",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        header.extend(percentiles.iter().map(|p| format!("p{}", percentile_label(*p))));
        header
    }

    /// Opens `path` for appending, writing the header first if the file is new.
    ///
    /// An existing file must carry the same header as this run would write, otherwise
    /// rows with a different column set would land under it.
    pub fn open(path: &Path, percentiles: &[f64]) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            create_dir_all(dir)?;
        }
        let header = Self::header(percentiles);
        let existing = if path.exists() {
            Some(Reader::from_path(path)?.headers()?.clone())
        } else {
            None
        };
        let output = match existing.filter(|h| !h.is_empty()) {
            Some(existing) => {
                if existing.iter().ne(header.iter().map(String::as_str)) {
                    return Err(BenchError::Output(format!(
                        "{} has columns [{}], this run writes [{}]",
                        path.display(),
                        existing.iter().collect::<Vec<_>>().join(","),
                        header.join(",")
                    )));
                }
                Writer::from_writer(OpenOptions::new().append(true).open(path)?)
            }
            None => {
                let f = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)?;
                let mut output = Writer::from_writer(f);
                output.write_record(&header)?;
                output.flush()?;
                output
            }
        };
        Ok(BenchWriter {
            output: Some(output),
        })
    }

    pub fn from_config(config: &BenchmarkConfig) -> Result<Self> {
        match &config.output {
            Some(path) => Self::open(path, &config.percentiles),
            None => Ok(Self::disabled()),
        }
    }

    pub fn write_record(&mut self, config: &BenchmarkConfig, report: &StatsReport) -> Result<()> {
        if let Some(output) = self.output.as_mut() {
            let mut record = vec![
                config.store.to_string(),
                report.phase.to_string(),
                report.workers.to_string(),
                config.operations.to_string(),
                config.batch_size.to_string(),
                report.data_size.to_string(),
                config.key_space.to_string(),
                report.requests.to_string(),
                format!("{:.3}", millis(report.elapsed)),
                format!("{:.1}", report.throughput),
                format!("{:.3}", millis(report.mean)),
                format!("{:.3}", millis(report.min)),
                format!("{:.3}", millis(report.max)),
            ];
            record.extend(
                report
                    .percentiles
                    .iter()
                    .map(|(_, latency)| format!("{:.3}", millis(*latency))),
            );
            output.write_record(&record)?;
            output.flush()?;
        }
        Ok(())
    }
}

pub fn command() -> Command {
    Command::new("mkv-benchmark")
        .about("Measures MSET/MGET throughput and latency percentiles")
        // `-h` is the host, as in redis-benchmark.
        .disable_help_flag(true)
        .arg(
            Arg::new("help")
                .long("help")
                .action(ArgAction::Help)
                .help("Print help"),
        )
        .arg(
            Arg::new("operations")
                .short('n')
                .value_parser(value_parser!(usize))
                .help("Number of batched operations per connection")
                .default_value("100000"),
        )
        .arg(
            Arg::new("connections")
                .short('c')
                .value_parser(value_parser!(usize))
                .help("Number of connections, one worker thread each")
                .default_value("1"),
        )
        .arg(
            Arg::new("host")
                .short('h')
                .help("Server host")
                .default_value("localhost"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .value_parser(value_parser!(u16))
                .help("Server port")
                .default_value("6379"),
        )
        .arg(
            Arg::new("random")
                .short('r')
                .value_parser(value_parser!(u64))
                .help("Random key space: keys are drawn from [0..RANDOM)")
                .default_value("1000"),
        )
        .arg(
            Arg::new("password")
                .short('a')
                .help("Password of server"),
        )
        .arg(
            Arg::new("data size")
                .short('d')
                .value_parser(value_parser!(usize))
                .help("Value size in bytes")
                .default_value("100"),
        )
        .arg(
            Arg::new("batch size")
                .short('m')
                .value_parser(value_parser!(usize))
                .help("Number of keys per MSET or MGET")
                .default_value("100"),
        )
        .arg(
            Arg::new("type")
                .short('t')
                .value_parser(value_parser!(Phases))
                .ignore_case(true)
                .help("Phases to run; setget runs mset then mget")
                .default_value("setget"),
        )
        .arg(
            Arg::new("store")
                .long("store")
                .value_parser(value_parser!(StoreKind))
                .ignore_case(true)
                .help("Store to benchmark; memory runs against an in-process map")
                .default_value("redis"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_parser(value_parser!(u64))
                .help("Connect, read and write timeout in milliseconds")
                .default_value("1000"),
        )
        .arg(
            Arg::new("percentiles")
                .long("percentiles")
                .value_parser(value_parser!(f64))
                .value_delimiter(',')
                .help("Comma-separated latency percentiles to report [default: 50,90,95,99,99.5,99.9,100]"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_parser(value_parser!(u64))
                .help("Seed for reproducible keys and values; worker i uses SEED + i"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .value_parser(value_parser!(PathBuf))
                .help("Output CSV filename. Appends the data if the file already exists."),
        )
        .arg(
            Arg::new("dry run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Check whether the arguments are parsable, without running a benchmark"),
        )
}

pub fn from_matches(m: &ArgMatches) -> Result<BenchmarkConfig> {
    let percentiles = match m.get_many::<f64>("percentiles") {
        Some(values) => values.copied().collect(),
        None => DEFAULT_PERCENTILES.to_vec(),
    };
    let config = BenchmarkConfig {
        operations: required(m, "operations")?,
        workers: required(m, "connections")?,
        batch_size: required(m, "batch size")?,
        data_size: required(m, "data size")?,
        key_space: required(m, "random")?,
        host: required(m, "host")?,
        port: required(m, "port")?,
        password: m.get_one::<String>("password").cloned().unwrap_or_default(),
        phases: required(m, "type")?,
        percentiles,
        store: required(m, "store")?,
        timeout: Duration::from_millis(required(m, "timeout")?),
        seed: m.get_one::<u64>("seed").copied(),
        output: m.get_one::<PathBuf>("output").cloned(),
        dry_run: m.get_flag("dry run"),
    };
    config.validate()?;
    Ok(config)
}

/// Parses and validates `args` (including the program name).
pub fn setup_from<I, T>(args: I) -> Result<(BenchmarkConfig, BenchWriter)>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let m = command()
        .try_get_matches_from(args)
        .map_err(|e| match e.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                e.exit()
            }
            _ => BenchError::configuration(e),
        })?;
    let config = from_matches(&m)?;
    let output = if config.dry_run {
        BenchWriter::disabled()
    } else {
        BenchWriter::from_config(&config)?
    };
    Ok((config, output))
}

pub fn setup() -> Result<(BenchmarkConfig, BenchWriter)> {
    setup_from(std::env::args_os())
}

fn required<T: Clone + Send + Sync + 'static>(m: &ArgMatches, id: &str) -> Result<T> {
    m.get_one::<T>(id)
        .cloned()
        .ok_or_else(|| BenchError::configuration(format!("missing value for {id}")))
}
