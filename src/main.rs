use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use rentsync::app::App;
use rentsync::cache::{CacheResult, CacheSource};
use rentsync::config::Config;
use rentsync::facade::WriteOutcome;
use rentsync::network::NetworkEvent;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rentsync")]
#[command(about = "Offline-first client for the rental-property API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/rentsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List properties
  Properties,
  /// Show one property
  Property { id: String },
  /// List tenants
  Tenants,
  /// List payments for a contract
  Payments { contract_id: String },
  /// List maintenance requests
  Maintenance,
  /// Record a rent payment
  Pay { contract_id: String, amount: f64 },
  /// File a maintenance request
  Report {
    property_id: String,
    title: String,
    #[arg(short, long)]
    description: Option<String>,
  },
  /// Show writes waiting to be synced
  Queue,
  /// Show connectivity and queue size
  Status,
  /// Replay queued writes now
  Sync,
  /// Stay running, syncing whenever connectivity returns
  Watch,
  /// Clear all locally stored data
  Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging()?;

  let config = Config::load(args.config.as_deref())?;
  let (mut app, probe) = App::init(&config).await?;

  match args.command {
    Command::Properties => {
      let result = app.client().properties().await?;
      for p in &result.data {
        println!("{:<12} {:<30} {}", p.id, p.name, p.address);
      }
      print_source(&result);
    }
    Command::Property { id } => {
      let result = app.client().property(&id).await?;
      let p = &result.data;
      println!("{}\n  {}\n  units: {}", p.name, p.address, p.units);
      print_source(&result);
    }
    Command::Tenants => {
      let result = app.client().tenants().await?;
      for t in &result.data {
        println!(
          "{:<12} {:<30} {}",
          t.id,
          t.name,
          t.email.as_deref().unwrap_or("-")
        );
      }
      print_source(&result);
    }
    Command::Payments { contract_id } => {
      let result = app.client().payments(&contract_id).await?;
      for p in &result.data {
        println!("{:<12} {:>10.2} {}", p.id, p.amount, p.paid_at.format("%Y-%m-%d"));
      }
      print_source(&result);
    }
    Command::Maintenance => {
      let result = app.client().maintenance_requests().await?;
      for m in &result.data {
        println!("{:<12} {:<12} {:<14} {}", m.id, m.property_id, m.status.to_string(), m.title);
      }
      print_source(&result);
    }
    Command::Pay {
      contract_id,
      amount,
    } => {
      let outcome = app.client().record_payment(&contract_id, amount).await?;
      print_outcome(&outcome);
    }
    Command::Report {
      property_id,
      title,
      description,
    } => {
      let outcome = app
        .client()
        .report_maintenance(&property_id, &title, description.as_deref())
        .await?;
      print_outcome(&outcome);
    }
    Command::Queue => {
      let actions = app.outbox().list().await?;
      if actions.is_empty() {
        println!("Nothing queued.");
      }
      let now = chrono::Utc::now();
      for a in actions {
        println!(
          "{}  {:<26} {:<6} {}  retries={}/{}  age={}s",
          a.id,
          a.kind,
          a.method,
          a.target_url,
          a.retry_count,
          a.max_retries,
          a.age_at(now).num_seconds()
        );
      }
    }
    Command::Status => {
      let status = app.monitor().status();
      let queued = app.outbox().len().await?;
      println!(
        "{} ({} link), {} queued write(s)",
        if status.online { "online" } else { "offline" },
        status.quality,
        queued
      );
    }
    Command::Sync => {
      if !app.monitor().is_online() {
        return Err(eyre!("API is unreachable; queued writes stay queued"));
      }
      match app.coordinator().drain().await {
        Some(s) => println!(
          "synced {}, failed {}, expired {}, still queued {}",
          s.succeeded, s.failed, s.expired, s.remaining
        ),
        None => println!("A sync is already running."),
      }
    }
    Command::Watch => {
      let mut summaries = app.coordinator().subscribe();
      let mut events = app.monitor().subscribe();
      app.start(probe);
      println!("Watching connectivity. Press Ctrl-C to stop.");

      loop {
        tokio::select! {
          _ = tokio::signal::ctrl_c() => break,
          event = events.recv() => match event {
            Ok(NetworkEvent::BecameOnline) => println!("online"),
            Ok(NetworkEvent::BecameOffline) => println!("offline, writes will be queued"),
            Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
          },
          summary = summaries.recv() => match summary {
            Ok(s) => println!(
              "sync: {} succeeded, {} failed, {} expired, {} queued",
              s.succeeded, s.failed, s.expired, s.remaining
            ),
            Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
          },
        }
      }
    }
    Command::Logout => {
      app.logout().await?;
      println!("Local data cleared.");
    }
  }

  app.shutdown().await;
  Ok(())
}

fn print_source<T>(result: &CacheResult<T>) {
  match result.source {
    CacheSource::Network => {}
    CacheSource::Cache => {
      if let Some(at) = result.cached_at {
        eprintln!("(cached {})", at.format("%H:%M:%S"));
      }
    }
    CacheSource::Snapshot => eprintln!("(offline: showing last known data)"),
  }
}

fn print_outcome(outcome: &WriteOutcome) {
  match outcome {
    WriteOutcome::Completed(_) => println!("Done."),
    WriteOutcome::Queued(pending) => println!(
      "Offline: queued as {}, will sync when connectivity returns.",
      pending.action_id
    ),
  }
}

/// Log to a daily file in the data dir so the terminal stays clean.
fn init_logging() -> Result<WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("rentsync")
    .join("logs");
  std::fs::create_dir_all(&log_dir)?;

  let appender = tracing_appender::rolling::daily(&log_dir, "rentsync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  let filter = EnvFilter::try_from_env("RENTSYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
