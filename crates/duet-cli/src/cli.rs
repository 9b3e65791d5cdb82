use clap::{Parser, ValueEnum};

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Demo {
    /// Run the worker-pool demo only.
    Pool,
    /// Run the promise-combinator demo only.
    Promise,
    /// Run both demos (default).
    Both,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "duet", version, about = "duet concurrency library demo host")]
pub struct Cli {
    /// Worker count for the default pool.
    #[arg(
        short = 'w',
        long,
        env = "DUET_WORKERS",
        default_value_t = default_workers()
    )]
    pub workers: usize,

    /// Which demo(s) to run before idling for shutdown signals.
    #[arg(long, value_enum, env = "DUET_DEMO", default_value_t = Demo::Both)]
    pub demo: Demo,
}
