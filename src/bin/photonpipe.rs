//! PhotonPipe Demo Binary
//!
//! Command-line interface for exercising the buffer pool and pipe:
//! - Pump: stream bytes through one pool-backed pipe and report throughput
//! - Info: print the effective configuration and limits
//!
//! # Examples
//!
//! ```bash
//! # Pump 256 MiB through a pipe with default watermarks
//! photonpipe pump --bytes 268435456
//!
//! # Inspect the effective configuration
//! photonpipe info --config photonpipe.toml
//! ```

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use photonpipe::pipe::{Pipe, PipeOptions};
use photonpipe::pool::{Pool, PoolConfig};
use serde::Deserialize;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// PhotonPipe - Segmented buffer pool and zero-copy pipe substrate
#[derive(Parser, Debug)]
#[command(name = "photonpipe")]
#[command(version = photonpipe::VERSION)]
#[command(about = "PhotonPipe - Segmented buffer pool and zero-copy pipe substrate", long_about = None)]
#[command(author = "Anton Feldmann <afeldman@lynqtech.com>")]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Optional TOML configuration file
    #[arg(long, global = true, env = "PHOTONPIPE_CONFIG")]
    config: Option<PathBuf>,

    /// Log directory path
    #[arg(long, global = true, default_value = "logs", env = "PHOTONPIPE_LOG_DIR")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pump bytes through a pool-backed pipe and report throughput
    Pump(PumpArgs),

    /// Show the effective configuration and derived limits
    Info,

    /// Show version
    Version,
}

/// Pump configuration arguments
#[derive(Args, Debug)]
struct PumpArgs {
    /// Total bytes to transfer
    #[arg(long, default_value = "67108864", env = "PHOTONPIPE_PUMP_BYTES")]
    bytes: u64,

    /// Producer chunk size in bytes
    #[arg(long, default_value = "16384", env = "PHOTONPIPE_PUMP_CHUNK")]
    chunk: usize,
}

/// Optional configuration file contents
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    pool: Option<PoolConfig>,
    #[serde(default)]
    pipe: Option<PipeOptions>,
}

fn load_config(path: Option<&PathBuf>) -> Result<(PoolConfig, PipeOptions)> {
    let file = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str::<FileConfig>(&raw)
                .with_context(|| format!("parsing config file {}", path.display()))?
        }
        None => FileConfig::default(),
    };
    Ok((
        file.pool.unwrap_or_else(PoolConfig::from_env),
        file.pipe.unwrap_or_else(PipeOptions::from_env),
    ))
}

fn init_logging(cli: &Cli) -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &cli.log_dir, "photonpipe.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_new(&cli.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_ansi(!cli.no_color)
                .with_writer(std::io::stdout),
        )
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    guard
}

async fn run_pump(args: &PumpArgs, pool_config: PoolConfig, pipe_options: PipeOptions) -> Result<()> {
    let pool = Pool::new(pool_config)?;
    let (mut writer, mut reader) = Pipe::new(pool.clone(), pipe_options)?;

    info!(
        bytes = args.bytes,
        chunk = args.chunk,
        block_len = pool.max_block_len(),
        "Starting pump"
    );

    let total = args.bytes;
    let chunk: Vec<u8> = (0..args.chunk).map(|i| (i % 256) as u8).collect();
    let start = Instant::now();

    let producer = tokio::spawn(async move {
        let mut sent = 0u64;
        while sent < total {
            let n = chunk.len().min((total - sent) as usize);
            writer.write(&chunk[..n])?;
            sent += n as u64;
            if writer.flush().await?.is_completed {
                break;
            }
        }
        writer.complete();
        Ok::<u64, photonpipe::error::Error>(sent)
    });

    let consumer = tokio::spawn(async move {
        let mut received = 0u64;
        loop {
            let result = reader.read().await?;
            let end = result.buffer.end_offset();
            let done = result.is_completed;
            drop(result);
            reader.consume(end);
            received = end;
            if done {
                break;
            }
        }
        Ok::<u64, photonpipe::error::Error>(received)
    });

    let sent = producer.await.context("producer task panicked")??;
    let received = consumer.await.context("consumer task panicked")??;
    let elapsed = start.elapsed();

    anyhow::ensure!(sent == received, "pump lost bytes: sent {sent}, received {received}");

    let mib = received as f64 / (1024.0 * 1024.0);
    info!(
        received,
        elapsed_ms = elapsed.as_millis(),
        throughput_mib_s = format!("{:.0}", mib / elapsed.as_secs_f64()),
        "Pump complete"
    );
    println!(
        "{:.0} MiB in {:.2?} ({:.0} MiB/s)",
        mib,
        elapsed,
        mib / elapsed.as_secs_f64()
    );
    println!("{}", serde_json::to_string_pretty(&pool.stats())?);

    Ok(())
}

fn run_info(pool_config: PoolConfig, pipe_options: PipeOptions) -> Result<()> {
    let summary = serde_json::json!({
        "version": photonpipe::VERSION,
        "pool": pool_config,
        "pipe": pipe_options,
        "max_block_len": pool_config.max_block_len(),
        "slab_len": pool_config.slab_len(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(&cli);

    let (pool_config, pipe_options) = load_config(cli.config.as_ref())?;

    let result = match &cli.command {
        Commands::Pump(args) => run_pump(args, pool_config, pipe_options).await,
        Commands::Info => run_info(pool_config, pipe_options),
        Commands::Version => {
            println!("photonpipe {}", photonpipe::VERSION);
            Ok(())
        }
    };

    if let Err(err) = &result {
        error!(error = %err, "Command failed");
    }
    result
}
