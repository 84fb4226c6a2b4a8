//! `stockwatch`: re-check tracked product URLs and keep their status history.
//!
//! # Usage
//!
//! ```text
//! stockwatch import products.json
//! stockwatch check --source outOfStock --export results.csv
//! stockwatch track
//! stockwatch removed --days 7
//! stockwatch serve
//! ```

mod app_config;
mod client;

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::{Context as _, Result, bail};
use app_config::AppConfig;
use chrono::Local;
use clap::{Parser, Subcommand};
use client::HttpFetcher;
use serde_json::json;
use stockwatch_api::{AppState, api_router};
use stockwatch_core::{
  events::{Event, EventBus},
  product::{CatalogProduct, EntityStatus, ProductRecord},
  report,
  settings::{CheckerSettingsUpdate, SourceFilter, TrackingSettings},
};
use stockwatch_store_sqlite::SqliteStore;
use tokio::{
  net::TcpListener,
  sync::broadcast::error::{RecvError, TryRecvError},
};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

type State = AppState<SqliteStore, HttpFetcher>;

/// How often `serve` re-reads settings while auto-tracking is off.
const SCHEDULER_IDLE_POLL: Duration = Duration::from_secs(300);

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "stockwatch", version, about = "Track product availability on a retail site")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, global = true, default_value = "stockwatch.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Re-check every tracked URL once, with the persisted pacing settings.
  Check {
    /// all, products, outOfStock or history.
    #[arg(long)]
    source:     Option<SourceFilter>,
    /// Minimum pause between batches, in seconds.
    #[arg(long)]
    delay_min:  Option<u64>,
    /// Maximum pause between batches, in seconds.
    #[arg(long)]
    delay_max:  Option<u64>,
    /// Retries after a network error.
    #[arg(long)]
    retries:    Option<u32>,
    /// URLs checked concurrently per batch.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    batch_size: Option<u64>,
    /// Write the results as CSV.
    #[arg(long, value_name = "FILE")]
    export:     Option<PathBuf>,
  },

  /// Run one removed-product tracking cycle now.
  Track,

  /// List products last seen as removed.
  Removed {
    /// Only products removed within this many days.
    #[arg(long)]
    days:   Option<u32>,
    #[arg(long, value_name = "FILE")]
    export: Option<PathBuf>,
  },

  /// Show status-history records with recent activity.
  History {
    /// active, out_of_stock, removed or unknown; all when omitted.
    #[arg(long)]
    status:      Option<EntityStatus>,
    /// Defaults to the persisted period.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    period_days: Option<u32>,
    #[arg(long, value_name = "FILE")]
    export:      Option<PathBuf>,
  },

  /// Replace the product catalog with a JSON array of scraped products.
  Import {
    file: PathBuf,
  },

  /// Delete every status-history record.
  ClearHistory,

  /// Show the persisted settings, applying any flags given first.
  Settings {
    #[arg(long)]
    auto_tracking:  Option<bool>,
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    interval_hours: Option<u32>,
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    period_days:    Option<u32>,
  },

  /// Serve the JSON API under `/api` and run scheduled tracking.
  Serve,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = AppConfig::load(&cli.config)?;

  if let Some(parent) = cfg.store_path.parent() {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {}", parent.display()))?;
  }
  let store = SqliteStore::open(&cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", cfg.store_path))?;
  let fetcher = HttpFetcher::new(Duration::from_secs(cfg.request_timeout_secs))?;
  let state = AppState::new(Arc::new(store), fetcher, cfg.classifier(), EventBus::default());

  match cli.command {
    Command::Check { source, delay_min, delay_max, retries, batch_size, export } => {
      let update = CheckerSettingsUpdate {
        url_source: source,
        delay_min,
        delay_max,
        max_retries: retries,
        batch_size: batch_size.map(|n| n as usize),
      };
      check(&state, update, export.as_deref()).await
    }
    Command::Track => track(&state).await,
    Command::Removed { days, export } => removed(&state, days, export.as_deref()).await,
    Command::History { status, period_days, export } => {
      history(&state, status, period_days, export.as_deref()).await
    }
    Command::Import { file } => import(&state, &file).await,
    Command::ClearHistory => {
      let count = state.checker.history().clear().await?;
      println!("cleared {count} history record(s)");
      Ok(())
    }
    Command::Settings { auto_tracking, interval_hours, period_days } => {
      settings(&state, auto_tracking, interval_hours, period_days).await
    }
    Command::Serve => serve(state, &cfg).await,
  }
}

// ─── Commands ─────────────────────────────────────────────────────────────────

async fn check(state: &State, update: CheckerSettingsUpdate, export: Option<&Path>) -> Result<()> {
  let mut settings = state.catalog.checker_settings().await?;
  settings.apply(&update);
  state.catalog.save_checker_settings(&settings).await?;
  state.checker.update_settings(&settings.into());

  if state.checker.initialize(settings.url_source).await == 0 {
    println!("no URLs to check");
    return Ok(());
  }

  let mut events = state.checker.events().subscribe();
  if !state.checker.spawn() {
    bail!("a check run is already in progress");
  }

  loop {
    tokio::select! {
      event = events.recv() => match event {
        Ok(Event::UrlChecked(result)) => {
          println!("{}\t{}", report::status_kind_label(result.status), result.url);
        }
        Ok(Event::Progress(p)) => {
          info!(current = p.current, total = p.total, percentage = p.percentage, "progress");
        }
        Ok(Event::Completed(_)) | Err(RecvError::Closed) => break,
        Ok(_) => {}
        Err(RecvError::Lagged(skipped)) => warn!(skipped, "event listener lagged"),
      },
      _ = tokio::signal::ctrl_c() => {
        state.checker.stop();
        warn!("check run stopped");
        break;
      }
    }
  }

  let results = state.checker.results();
  let counts = results.counts();
  println!(
    "{} checked: {} in stock, {} out of stock, {} removed, {} errors",
    counts.total(),
    counts.in_stock,
    counts.out_of_stock,
    counts.removed,
    counts.error
  );

  if let Some(path) = export {
    write_csv(path, &report::check_report(&results, &Local))?;
  }
  Ok(())
}

async fn track(state: &State) -> Result<()> {
  state.scheduler.initialize().await?;
  let mut events = state.checker.events().subscribe();
  if !state.scheduler.run_cycle().await {
    bail!("tracking is already in progress");
  }

  loop {
    match events.try_recv() {
      Ok(Event::StatusChanged { key, transition }) => println!(
        "{}\t{} → {}",
        key,
        report::entity_status_label(transition.from.unwrap_or_default()),
        report::entity_status_label(transition.to)
      ),
      Ok(_) | Err(TryRecvError::Lagged(_)) => {}
      Err(_) => break,
    }
  }
  Ok(())
}

async fn removed(state: &State, days: Option<u32>, export: Option<&Path>) -> Result<()> {
  let history = state.checker.history();
  let records = match days {
    Some(days) => history.recently_removed(i64::from(days)).await?,
    None => history.removed_products().await?,
  };
  print_records(&records);
  if let Some(path) = export {
    write_csv(path, &report::removed_report(&records, &Local))?;
  }
  Ok(())
}

async fn history(
  state: &State,
  status: Option<EntityStatus>,
  period_days: Option<u32>,
  export: Option<&Path>,
) -> Result<()> {
  let period_days = match period_days {
    Some(days) => days,
    None => state.catalog.period_days().await?,
  };
  let records = state
    .checker
    .history()
    .history_view(status, i64::from(period_days))
    .await?;
  print_records(&records);
  if let Some(path) = export {
    write_csv(path, &report::history_report(&records, &Local))?;
  }
  Ok(())
}

async fn import(state: &State, file: &Path) -> Result<()> {
  let raw = std::fs::read_to_string(file)
    .with_context(|| format!("reading {}", file.display()))?;
  let products: Vec<CatalogProduct> =
    serde_json::from_str(&raw).context("parsing product list")?;

  let (keyed, skipped): (Vec<_>, Vec<_>) =
    products.into_iter().partition(|p| p.key().is_some());
  if !skipped.is_empty() {
    warn!(skipped = skipped.len(), "products without a url or model were skipped");
  }
  state.catalog.save_products(&keyed).await?;
  state.checker.history().ensure_initialized().await?;
  println!("imported {} product(s)", keyed.len());
  Ok(())
}

async fn settings(
  state: &State,
  auto_tracking: Option<bool>,
  interval_hours: Option<u32>,
  period_days: Option<u32>,
) -> Result<()> {
  let current = state.catalog.tracking_settings().await?;
  let tracking = TrackingSettings {
    auto_tracking:  auto_tracking.unwrap_or(current.auto_tracking),
    interval_hours: interval_hours.unwrap_or(current.interval_hours),
  };
  if tracking != current {
    state.catalog.save_tracking_settings(&tracking).await?;
  }
  if let Some(days) = period_days {
    state.catalog.save_period_days(days).await?;
  }

  let view = json!({
    "autoTracking": tracking.auto_tracking,
    "intervalHours": tracking.interval_hours,
    "periodDays": state.catalog.period_days().await?,
    "lastTracked": state.scheduler.last_tracked().await?,
    "urlCheckerSettings": state.catalog.checker_settings().await?,
  });
  println!("{}", serde_json::to_string_pretty(&view)?);
  Ok(())
}

async fn serve(state: State, cfg: &AppConfig) -> Result<()> {
  let scheduler = state.scheduler.clone();
  tokio::spawn(async move {
    loop {
      match scheduler.run_scheduled().await {
        Ok(()) => info!("auto-tracking is off"),
        Err(e) => warn!(error = %e, "scheduled tracking failed"),
      }
      tokio::time::sleep(SCHEDULER_IDLE_POLL).await;
    }
  });

  let app = axum::Router::new().nest("/api", api_router(state));
  let address = cfg.address();

  info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

// ─── Output ───────────────────────────────────────────────────────────────────

fn print_records(records: &[ProductRecord]) {
  for r in records {
    println!(
      "{}\t{}\t{}\t{}",
      report::entity_status_label(r.status),
      r.model.as_deref().unwrap_or("-"),
      r.product_name.as_deref().unwrap_or("-"),
      r.url.as_deref().unwrap_or("-"),
    );
  }
  println!("{} record(s)", records.len());
}

fn write_csv(path: &Path, body: &str) -> Result<()> {
  std::fs::write(path, body).with_context(|| format!("writing {}", path.display()))?;
  info!(path = %path.display(), "report written");
  Ok(())
}
