// Elastic pool CLI
//
// Design Decision: Use clap derive with env fallbacks, matching PoolConfig::from_env names.
// Design Decision: Results are consumed concurrently so any result-channel capacity works.
// Design Decision: Exit non-zero only for structural pool errors; dead letters are a report.

mod output;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use elastic_pool::{
    process_request, AutoscalerConfig, DeadLetterSink, PoolConfig, Processed, RequestConfig, RetryPolicy,
    WorkerPool,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use output::{print_field, OutputFormat};

#[derive(Parser, Debug)]
#[command(name = "elastic-pool")]
#[command(about = "Process a synthetic batch of messages on an elastic worker pool")]
#[command(version)]
pub struct Cli {
    /// Initial number of workers
    #[arg(long, env = "ELASTIC_POOL_WORKERS", default_value = "3")]
    pub workers: usize,

    /// Queue capacity per worker
    #[arg(long, env = "ELASTIC_POOL_QUEUE_CAPACITY", default_value = "10")]
    pub capacity: usize,

    /// Number of messages in the batch
    #[arg(long, short, env = "ELASTIC_POOL_MESSAGES", default_value = "20")]
    pub messages: usize,

    /// Request deadline in milliseconds
    #[arg(long, env = "ELASTIC_POOL_DEADLINE_MS", default_value = "5000")]
    pub deadline_ms: u64,

    /// Maximum jobs in flight
    #[arg(long, env = "ELASTIC_POOL_MAX_PARALLELISM", default_value = "10")]
    pub max_parallelism: usize,

    /// Probability that a simulated attempt fails (0.0-1.0)
    #[arg(long, env = "ELASTIC_POOL_FAILURE_RATE", default_value = "0.2")]
    pub failure_rate: f64,

    /// Duration of the first simulated attempt in milliseconds
    #[arg(long, env = "ELASTIC_POOL_BASE_DELAY_MS", default_value = "200")]
    pub base_delay_ms: u64,

    /// Disable the autoscaler
    #[arg(long)]
    pub no_autoscale: bool,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    fn pool_config(&self) -> PoolConfig {
        let retry = RetryPolicy::default()
            .with_failure_probability(self.failure_rate)
            .with_initial_interval(Duration::from_millis(self.base_delay_ms));
        PoolConfig::new(self.workers, self.capacity).with_retry(retry)
    }

    fn request_config(&self) -> RequestConfig {
        let config = RequestConfig::default()
            .with_deadline(Duration::from_millis(self.deadline_ms))
            .with_max_parallelism(self.max_parallelism);

        if self.no_autoscale {
            config.without_autoscaler()
        } else {
            config.with_autoscaler(AutoscalerConfig::default().with_capacity(self.capacity))
        }
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    submitted: usize,
    succeeded: usize,
    dead_lettered: usize,
    timed_out: bool,
    elapsed_ms: u64,
    dead_letters: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG overrides; default keeps pool logs at info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("elastic_pool=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let format = OutputFormat::from_json_flag(cli.json);
    let pool = Arc::new(WorkerPool::<String>::new(cli.pool_config()));
    let dead_letters = Arc::new(DeadLetterSink::new());

    tracing::info!(
        workers = cli.workers,
        capacity = cli.capacity,
        messages = cli.messages,
        "Submitting batch"
    );

    let (tx, mut rx) = mpsc::channel::<Processed<String>>(cli.messages.max(1));
    let printer = tokio::spawn(async move {
        let mut count = 0usize;
        while let Some(processed) = rx.recv().await {
            if format.is_text() {
                println!(
                    "Processed message: {} (worker {}, attempts {})",
                    processed.message, processed.worker_id, processed.attempts
                );
            }
            count += 1;
        }
        count
    });

    let messages = (0..cli.messages).map(|i| format!("event-{i}")).collect();
    let result = process_request(messages, &pool, &cli.request_config(), tx, &dead_letters).await;
    let received = printer.await.context("result printer panicked")?;
    pool.cleanup();

    let report = result.context("request failed")?;
    tracing::debug!(received, "Result stream closed");

    let summary = Summary {
        submitted: report.submitted,
        succeeded: report.succeeded,
        dead_lettered: report.dead_lettered,
        timed_out: report.timed_out,
        elapsed_ms: report.elapsed.as_millis() as u64,
        dead_letters: dead_letters.snapshot(),
    };

    if format.is_text() {
        print_field("Submitted", &summary.submitted.to_string());
        print_field("Succeeded", &summary.succeeded.to_string());
        print_field("Dead letters", &summary.dead_lettered.to_string());
        print_field("Timed out", &summary.timed_out.to_string());
        print_field("Elapsed", &format!("{}ms", summary.elapsed_ms));
        if !summary.dead_letters.is_empty() {
            println!("{} messages failed to process", summary.dead_letters.len());
        }
    } else {
        format.print_value(&summary)?;
    }

    Ok(())
}
