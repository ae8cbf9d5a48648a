use std::io::{self, Read};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fanout_outcome::{Cause, Outcome, require};
use fanout_parallel::{ParallelConfig, ParallelMap};

/// Fanout - run a transform over a JSON array concurrently
#[derive(Parser)]
#[command(name = "fanout")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to a parallel map config file (JSON)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Log filter, e.g. `info` or `fanout_parallel=debug` (default: RUST_LOG, then `warn`)
  #[arg(long, global = true)]
  log: Option<String>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Double every number of a JSON array read from stdin
  Map {
    /// Delay applied to every element, in milliseconds
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,

    /// Scale the delay so later elements finish first
    #[arg(long)]
    jitter: bool,

    /// Fail the element equal to this value
    #[arg(long)]
    fail_on: Option<f64>,

    /// Cap on concurrently running elements (overrides the config file)
    #[arg(long)]
    max_concurrency: Option<NonZeroUsize>,
  },
}

#[derive(Debug, thiserror::Error)]
enum MapError {
  #[error("element {index} is not a number: {cause}")]
  NotANumber { index: usize, cause: Cause<String> },

  #[error("element {index} rejected: {value}")]
  Rejected { index: usize, value: f64 },
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_logging(cli.log.as_deref())?;

  match cli.command {
    Some(Commands::Map {
      delay_ms,
      jitter,
      fail_on,
      max_concurrency,
    }) => {
      let mut config = load_config(cli.config.as_ref())?;
      if max_concurrency.is_some() {
        config.max_concurrency = max_concurrency;
      }
      run_map(
        config,
        Duration::from_millis(delay_ms),
        jitter,
        fail_on,
      )?;
    }
    None => {
      println!("fanout - use --help to see available commands");
    }
  }

  Ok(())
}

fn init_logging(filter: Option<&str>) -> Result<()> {
  let filter = match filter {
    Some(filter) => EnvFilter::try_new(filter).context("invalid --log filter")?,
    None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .init();

  Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<ParallelConfig> {
  let Some(path) = path else {
    return Ok(ParallelConfig::default());
  };

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read config file: {}", path.display()))?;

  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse config file: {}", path.display()))
}

fn run_map(
  config: ParallelConfig,
  delay: Duration,
  jitter: bool,
  fail_on: Option<f64>,
) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run_map_async(config, delay, jitter, fail_on).await })
}

async fn run_map_async(
  config: ParallelConfig,
  delay: Duration,
  jitter: bool,
  fail_on: Option<f64>,
) -> Result<()> {
  let values = read_array_from_stdin()?;
  let len = values.len();
  info!(elements = len, "read input");

  // Ctrl-C cancels every in-flight element
  let cancel = CancellationToken::new();
  let trigger = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupted, cancelling");
      trigger.cancel();
    }
  });

  let map = ParallelMap::with_config(config).cancel_on(cancel);
  let doubled = map
    .run_with_context(values, move |value, ctx| async move {
      let index = ctx.index();
      let number = Outcome::from_option(value.as_f64())
        .map_failure(|cause: Cause<String>| MapError::NotANumber { index, cause })
        .into_result()?;

      let wait = if jitter {
        jitter_delay(delay, len, index)
      } else {
        delay
      };
      if !wait.is_zero() {
        tokio::time::sleep(wait).await;
      }

      if fail_on == Some(number) {
        return Err(MapError::Rejected {
          index,
          value: number,
        });
      }

      let doubled = serde_json::Number::from_f64(number * 2.0);
      Ok(serde_json::Value::Number(require(doubled).map_err(|e| {
        MapError::NotANumber {
          index,
          cause: e.into(),
        }
      })?))
    })
    .await
    .context("parallel map failed")?;

  println!("{}", serde_json::to_string(&doubled)?);

  Ok(())
}

/// Scale `delay` so element `index` of `len` finishes before the ones ahead
/// of it. Saturates instead of overflowing.
fn jitter_delay(delay: Duration, len: usize, index: usize) -> Duration {
  let steps = u32::try_from(len.saturating_sub(index)).unwrap_or(u32::MAX);
  delay.saturating_mul(steps)
}

fn read_array_from_stdin() -> Result<Vec<serde_json::Value>> {
  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read input from stdin")?;

  if input.trim().is_empty() {
    return Ok(Vec::new());
  }

  serde_json::from_str(&input).context("failed to parse input from stdin as a JSON array")
}
