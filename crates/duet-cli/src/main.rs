mod cli;
mod logging;

use std::sync::Arc;

use clap::Parser;
use indexmap::IndexMap;

use duet_pool::{ShutdownController, TaskBatch};

use crate::cli::{Cli, Demo};

async fn run_pool_demo(workers: usize) -> anyhow::Result<()> {
    tracing::info!(workers, "starting worker pool demo");
    let pool = duet_pool::create_pool(workers);

    let mut batch: TaskBatch<usize, i32> = TaskBatch::new();
    batch.insert(0, || Ok(5 + 3));
    batch.insert(1, || Ok(10 * 2));
    batch.insert(2, || Err(duet_core::DuetError::Task(duet_core::ErrorRecord::new(
        "Demo",
        "deliberate failure to show last_errors()",
    ))));

    let results = pool.execute(batch).await?;
    for (key, result) in &results {
        match result {
            Ok(value) => tracing::info!(key, value, "task succeeded"),
            Err(err) => tracing::warn!(key, %err, "task failed"),
        }
    }
    for (slot_key, error) in pool.last_errors() {
        tracing::info!(slot_key, class = %error.class, message = %error.message, "recorded error");
    }

    pool.shutdown(true).await;
    Ok(())
}

async fn run_promise_demo() -> anyhow::Result<()> {
    tracing::info!("starting promise combinator demo");

    let mut promises: IndexMap<&'static str, duet_promise::Promise<i32>> = IndexMap::new();
    promises.insert("fast", duet_promise::resolve(1));
    promises.insert(
        "slow",
        duet_promise::delay(std::time::Duration::from_millis(20)).then(|_| Ok(2)),
    );
    promises.insert("flaky", duet_promise::reject(duet_core::DuetError::Timeout));

    let settled = duet_promise::all_settled(promises).await;
    for (key, outcome) in settled {
        match outcome {
            duet_promise::Outcome::Fulfilled(value) => tracing::info!(key, value, "fulfilled"),
            duet_promise::Outcome::Rejected(err) => tracing::warn!(key, %err, "rejected"),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();

    match cli.demo {
        Demo::Pool => run_pool_demo(cli.workers).await?,
        Demo::Promise => run_promise_demo().await?,
        Demo::Both => {
            run_pool_demo(cli.workers).await?;
            run_promise_demo().await?;
        }
    }

    let controller = Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel();
    duet_pool::spawn_shutdown_handler(controller, shutdown_tx);

    tracing::info!("demos complete, idling for shutdown signal (ctrl-c)");
    if let Some(event) = shutdown_rx.recv().await {
        duet_pool::lifecycle::handle_shutdown_event(event).await;
    }

    Ok(())
}
