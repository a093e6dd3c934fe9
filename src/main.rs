#[macro_use]
extern crate cfg_if;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use mkv_benchmark::config::bench::{setup, BenchWriter, BenchmarkConfig, StoreKind};
use mkv_benchmark::{BatchStore, Driver, MemoryStore, RedisStore};

cfg_if! {
    if #[cfg(target_os = "linux")] {
        #[global_allocator]
        static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (config, mut output) = setup().context("invalid arguments")?;
    println!("{}", config);
    if config.dry_run {
        return Ok(());
    }

    match config.store {
        StoreKind::Redis => {
            let store = RedisStore::from_config(&config)?;
            bench(&config, &store, &mut output)
        }
        StoreKind::Memory => bench(&config, &MemoryStore::new(), &mut output),
    }
}

fn bench<S: BatchStore>(
    config: &BenchmarkConfig,
    store: &S,
    output: &mut BenchWriter,
) -> anyhow::Result<()> {
    let driver = Driver::new(config, store);
    for &kind in config.phases.kinds() {
        let report = driver
            .measure(kind)
            .with_context(|| format!("{kind} phase did not complete"))?;
        print!("{}", report);
        output
            .write_record(config, &report)
            .context("failed to append results")?;
    }
    Ok(())
}
