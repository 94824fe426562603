mod cache;
mod clipboard;
mod config;
mod request;
mod session;
mod share;
mod worker;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::time::Duration;

use session::MemorySessionRegistry;
use worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "shelfmark")]
#[command(about = "Offline asset cache and share-intake daemon for the Shelfmark bookmarking app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shelfmark/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Asset version tag to populate, overriding the config
  #[arg(short, long)]
  version_tag: Option<String>,

  /// Interval between clipboard checks in milliseconds
  #[arg(long, default_value_t = 2_000)]
  tick_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override the version tag if specified on the command line
  let config = if let Some(version) = args.version_tag {
    config::Config {
      assets: config::AssetsConfig {
        version,
        ..config.assets
      },
      ..config
    }
  } else {
    config
  };

  let _log_guard = init_logging(&config)?;

  let registry = MemorySessionRegistry::new();
  let (worker, handle) = Worker::from_config(&config, registry as _)?;

  // Drive the clipboard fallback; the detector's cooldown rate-limits the
  // actual checks on top of this interval.
  let ticker = handle.clone();
  let tick = Duration::from_millis(args.tick_ms);
  tokio::spawn(async move {
    let mut interval = tokio::time::interval(tick);
    loop {
      interval.tick().await;
      ticker.clipboard_check();
    }
  });

  // Drain queued events, then stop, on ctrl-c
  let stopper = handle.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      stopper.shutdown();
    }
  });

  worker.run().await
}

/// Route tracing output to a daily-rolled log file.
///
/// The returned guard must stay alive for the duration of the process or
/// buffered log lines are lost.
fn init_logging(config: &config::Config) -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = match &config.data_dir {
    Some(dir) => dir.join("logs"),
    None => dirs::data_dir()
      .ok_or_else(|| eyre!("Could not determine data directory"))?
      .join("shelfmark")
      .join("logs"),
  };
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let file_appender = tracing_appender::rolling::daily(log_dir, "shelfmark.log");
  let (writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
