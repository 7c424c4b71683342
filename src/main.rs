mod cache;
mod config;
mod host;
mod net;
#[cfg(test)]
mod testing;
mod worker;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cache::{CacheStorage, ResponseSource, Served, SqliteStorage};
use config::Config;
use host::HeadlessHost;
use net::{HttpFetcher, Request};
use worker::{OfflineWorker, Registration, ServiceWorker, WorkerState};

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Offline cache manager: shell precaching and cache/network-first serving")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shellcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Application origin (overrides the config file)
  #[arg(long)]
  origin: Option<String>,

  /// Keep caches in memory for this run only
  #[arg(long)]
  ephemeral: bool,

  /// Increase log verbosity (-v info, -vv debug)
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the current version and activate it on success
  Install,
  /// Activate the installed version: delete stale generations and record it
  /// as active. Refused unless the version installed successfully
  Activate,
  /// Send a request through the worker
  Fetch(RequestArgs),
  /// Show how a request would be routed
  Classify(RequestArgs),
  /// List cache generations
  Caches,
  /// Raise the "updates available" notification
  Push,
  /// Click a notification action (e.g. "view")
  NotificationClick { action: Option<String> },
  /// Fire a background-sync tag
  Sync { tag: String },
}

#[derive(clap::Args, Debug)]
struct RequestArgs {
  /// Path (resolved against the origin) or absolute URL
  target: String,

  /// Treat as a top-level navigation
  #[arg(long)]
  navigate: bool,

  #[arg(short = 'X', long, default_value = "GET")]
  method: String,
}

impl RequestArgs {
  fn to_request(&self, config: &Config) -> Result<Request> {
    let url = Request::resolve(&config.origin_url()?, &self.target)?;
    let method = Method::from_bytes(self.method.to_uppercase().as_bytes())
      .map_err(|e| eyre!("Invalid method '{}': {}", self.method, e))?;

    let request = if self.navigate {
      Request::navigate(url)
    } else {
      Request::get(url)
    };
    Ok(request.with_method(method))
  }
}

/// Initialize the tracing subscriber for logging.
///
/// RUST_LOG takes precedence over -v. With `log_dir` configured, logs also go
/// to a daily rolling file; the returned guard must live until exit.
fn init_tracing(config: &Config, verbose: u8) -> Result<Option<WorkerGuard>> {
  let default_level = match verbose {
    0 => "warn",
    1 => "info",
    _ => "debug",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  let stderr_layer = fmt::layer().with_writer(io::stderr);

  let Some(dir) = &config.log_dir else {
    tracing_subscriber::registry()
      .with(filter)
      .with(stderr_layer)
      .init();
    return Ok(None);
  };

  std::fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
  let appender = RollingFileAppender::builder()
    .rotation(Rotation::DAILY)
    .filename_prefix("shellcache")
    .filename_suffix("log")
    .build(dir)
    .map_err(|e| eyre!("Failed to open log file in {}: {}", dir.display(), e))?;
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(filter)
    .with(stderr_layer)
    .with(fmt::layer().with_ansi(false).with_writer(writer))
    .init();

  Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = if let Some(origin) = args.origin.clone() {
    let config = Config { origin, ..config };
    config.validate()?;
    config
  } else {
    config
  };

  let _guard = init_tracing(&config, args.verbose)?;

  let storage = if args.ephemeral {
    SqliteStorage::open_in_memory()?
  } else {
    SqliteStorage::open(&config.database_path()?)?
  };

  run(args.command, &config, Arc::new(storage)).await
}

async fn run(command: Command, config: &Config, storage: Arc<SqliteStorage>) -> Result<()> {
  let origin = config.origin_url()?;
  let fetcher = Arc::new(HttpFetcher::new(config)?);
  let host = Arc::new(HeadlessHost::new(origin));
  let worker = OfflineWorker::new(
    config,
    Arc::clone(&fetcher),
    Arc::clone(&storage),
    Arc::clone(&host),
  )?;
  let mut registration = Registration::new(worker, Arc::clone(&storage), config.scope()?)?;

  match command {
    Command::Install => {
      let state = registration.register().await?;
      println!("{} {}", config.version, state);
    }
    Command::Activate => {
      let deleted = registration.activate().await?;
      for name in &deleted {
        println!("deleted {}", name);
      }
      if host.is_claimed() {
        println!("claimed open clients");
      }
      println!("{} {}", config.version, registration.state());
    }
    Command::Fetch(request_args) => {
      let request = request_args.to_request(config)?;
      if registration.state() != WorkerState::Activated {
        info!("No active worker for this version, request goes straight to the network");
      }
      let served = registration.dispatch(request, fetcher.as_ref()).await?;
      if served.source == ResponseSource::Synthesized {
        info!("Neither the network nor a cache could answer");
      }
      print_served(&served);
      // Let background revalidation and cache writes land before exiting
      registration.worker().layer().wait_background().await;
    }
    Command::Classify(request_args) => {
      let request = request_args.to_request(config)?;
      println!("{}", registration.worker().router().classify(&request));
    }
    Command::Caches => {
      let names = registration.worker().layer().names();
      for name in storage.keys()? {
        let marker = if names.is_current(&name) { "*" } else { " " };
        println!("{} {} ({} entries)", marker, name, storage.entries(&name)?.len());
      }
    }
    Command::Push => {
      registration.worker().on_push().await;
      for notification in host.notifications() {
        let actions: Vec<_> = notification.actions.iter().map(|a| a.title.as_str()).collect();
        println!(
          "[{}] {}: {} ({})",
          notification.tag,
          notification.title,
          notification.body,
          actions.join(" / ")
        );
      }
    }
    Command::NotificationClick { action } => {
      registration.worker().on_notification_click(action.as_deref()).await;
      for url in host.opened_windows() {
        println!("opened {}", url);
      }
    }
    Command::Sync { tag } => {
      registration.worker().on_sync(&tag).await;
    }
  }

  Ok(())
}

fn print_served(served: &Served) {
  let response = &served.response;
  println!("{} {} ({})", response.status, response.status_text, served.source);
  if let Some(cached_at) = served.cached_at {
    println!("cached-at: {}", cached_at.to_rfc3339());
  }
  for (name, value) in &response.headers {
    println!("{}: {}", name, value);
  }
  println!();

  let textual = response.header("content-type").map_or(true, |ct| {
    ct.starts_with("text/") || ["json", "javascript", "xml", "svg"].iter().any(|t| ct.contains(t))
  });
  if textual {
    println!("{}", response.text());
  } else {
    println!("<{} bytes>", response.body.len());
  }
}
