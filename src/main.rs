//! Incidence tracker: 7-day COVID-19 incidence per district of Germany.
//!
//! Single-binary Tokio application that:
//! 1. Loads the district reference table (population per district)
//! 2. Periodically fetches RKI case counts
//! 3. Normalizes them and computes 7-day incidence per 100k
//! 4. Publishes the complete snapshot set for the rendering layer

mod config;
mod journal;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use journal::{cycle_event, now_iso, CycleJournal};
use pipeline::{
    format_incidence, load_region_table, spawn_refresh_scheduler, spawn_region_refresher,
    CycleOutcome, Direction, Normalizer, Presenter, RefreshPipeline, RegionHandle,
    RegionRefresher, SnapshotStore, SortKey,
};
use rki_client::{FileRegionSource, RegionSource, RkiClient};
use serde_json::json;

/// Germany 7-day incidence tracker
#[derive(Parser)]
#[command(name = "incidence-tracker", about = "RKI 7-day incidence refresher")]
struct Cli {
    /// Config file, merged over defaults and under environment variables.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Run a single refresh cycle, print the view as JSON, and exit.
    #[arg(long)]
    once: bool,

    /// With --once, also print the district table sorted by this column.
    #[arg(long, value_enum)]
    sort: Option<SortArg>,

    /// Sort the table in descending order.
    #[arg(long)]
    desc: bool,

    /// With --once, also print the heatmap points as JSON lines.
    #[arg(long)]
    heatmap: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    District,
    State,
    DistrictIncidence,
    StateIncidence,
}

impl From<SortArg> for SortKey {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::District => SortKey::District,
            SortArg::State => SortKey::State,
            SortArg::DistrictIncidence => SortKey::DistrictIncidence,
            SortArg::StateIncidence => SortKey::StateIncidence,
        }
    }
}

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

type SharedJournal = Arc<Mutex<CycleJournal>>;

async fn write_event(journal: &SharedJournal, event: serde_json::Value) {
    let mut guard = journal.lock().await;
    guard.write_event(event);
}

#[tokio::main]
async fn main() {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "incidence_tracker=info,rki_client=info,pipeline=info".into()
            }),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    info!("Incidence tracker starting up...");

    // Load configuration.
    let cfg = match config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Timing: refresh={}s, regions_refresh={}s, timeout={}s, as_of_lag={}d",
        cfg.timing.refresh_interval_secs,
        cfg.timing.regions_refresh_interval_secs,
        cfg.timing.request_timeout_secs,
        cfg.as_of_lag_days,
    );
    info!(
        "Normalize: strict_regions={}, fill_missing_days={}, aliases={}",
        cfg.normalize.strict_regions,
        cfg.normalize.fill_missing_days,
        cfg.normalize.aliases.len()
    );

    let journal = match CycleJournal::open(cfg.journal_dir.clone()) {
        Ok(j) => j,
        Err(e) => {
            error!("Failed to initialize cycle journal: {}", e);
            std::process::exit(1);
        }
    };
    info!("Cycle journal path: {}", journal.dir().display());
    let journal: SharedJournal = Arc::new(Mutex::new(journal));
    write_event(
        &journal,
        json!({
            "ts": now_iso(),
            "kind": "tracker_start",
            "mode": if cli.once { "once" } else { "scheduled" },
            "refresh_interval_secs": cfg.timing.refresh_interval_secs,
            "listen_addr": &cfg.listen_addr
        }),
    )
    .await;

    let client = match RkiClient::new(&cfg) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("HTTP client initialization failed: {}", e);
            std::process::exit(1);
        }
    };

    let region_source: Arc<dyn RegionSource> = match &cfg.regions_path {
        Some(path) => Arc::new(FileRegionSource::new(path.clone())),
        None => client.clone(),
    };

    // Without a reference table nothing can be computed.
    let table = match load_region_table(region_source.as_ref(), &cfg.normalize.aliases).await {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to load region table: {}", e);
            std::process::exit(1);
        }
    };
    info!("Region table loaded: {} districts", table.len());

    // ── Shared state ─────────────────────────────────────────────────
    let regions = Arc::new(RegionHandle::new(table));
    let store = Arc::new(SnapshotStore::new());
    let presenter = Presenter::new(store.clone());
    let pipeline = Arc::new(RefreshPipeline::new(
        client.clone(),
        regions.clone(),
        store.clone(),
        Normalizer::new(cfg.normalize.strict_regions)
            .with_fill_missing_days(cfg.normalize.fill_missing_days),
        cfg.as_of_lag_days,
    ));

    // ── Once mode ────────────────────────────────────────────────────
    if cli.once {
        info!("Running single refresh cycle...");
        let outcome = pipeline.run_cycle().await;
        write_event(&journal, cycle_event(&outcome)).await;

        if let CycleOutcome::Failed { stage, error } = &outcome {
            error!("Refresh failed during {:?}: {}", stage, error);
            std::process::exit(1);
        }

        let Some(view) = presenter.view().await else {
            error!("No snapshot available after refresh");
            std::process::exit(1);
        };
        match serde_json::to_string_pretty(&view) {
            Ok(body) => println!("{}", body),
            Err(e) => {
                error!("Failed to serialize view: {}", e);
                std::process::exit(1);
            }
        }

        if let Some(sort) = cli.sort {
            let direction = if cli.desc { Direction::Desc } else { Direction::Asc };
            for row in presenter.table(sort.into(), direction).await {
                println!(
                    "{}\t{}\t{}\t{}",
                    row.district,
                    format_incidence(row.district_incidence),
                    row.state,
                    format_incidence(row.state_incidence),
                );
            }
        }

        if cli.heatmap {
            for point in presenter.heatmap().await {
                match serde_json::to_string(&point) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("Failed to serialize heat point {}: {}", point.name, e),
                }
            }
        }
        return;
    }

    // ── Spawn tasks ──────────────────────────────────────────────────
    info!("Spawning tasks...");

    // Task 1: Refresh scheduler
    let (outcome_tx, mut outcome_rx) = mpsc::channel::<CycleOutcome>(16);
    let refresh_handle = spawn_refresh_scheduler(
        pipeline.clone(),
        Duration::from_secs(cfg.timing.refresh_interval_secs),
        outcome_tx,
    );

    // Task 2: Cycle journal
    let cj_journal = journal.clone();
    let journal_handle = tokio::spawn(async move {
        while let Some(outcome) = outcome_rx.recv().await {
            write_event(&cj_journal, cycle_event(&outcome)).await;
        }
    });

    // Task 3: Region reference refresh
    let region_handle = if cfg.timing.regions_refresh_interval_secs > 0 {
        let refresher = RegionRefresher::new(
            region_source.clone(),
            regions.clone(),
            cfg.normalize.aliases.clone(),
        );
        Some(spawn_region_refresher(
            refresher,
            Duration::from_secs(cfg.timing.regions_refresh_interval_secs),
        ))
    } else {
        info!("Region refresh disabled");
        None
    };

    // Task 4: Heartbeat
    let hb_pipeline = pipeline.clone();
    let hb_store = store.clone();
    let hb_regions = regions.clone();
    let hb_journal = journal.clone();
    let heartbeat_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let status = hb_pipeline.status().await;
            let districts = hb_regions.current().await.len();
            let current = hb_store.current().await;
            let as_of = current.as_ref().map(|s| s.as_of.to_string());
            let age_secs = current
                .as_ref()
                .map(|s| (Utc::now() - s.computed_at).num_seconds());
            let available = current.as_ref().map(|s| s.available()).unwrap_or(0);

            if status.consecutive_failures > 0 {
                warn!(
                    "HEARTBEAT: state={:?} served_as_of={:?} age={:?}s failures_in_a_row={}",
                    status.state, as_of, age_secs, status.consecutive_failures
                );
            } else {
                info!(
                    "HEARTBEAT: state={:?} districts={} available={} as_of={:?} age={:?}s",
                    status.state, districts, available, as_of, age_secs
                );
            }
            write_event(
                &hb_journal,
                json!({
                    "ts": now_iso(),
                    "kind": "heartbeat",
                    "state": status.state,
                    "districts": districts,
                    "available": available,
                    "as_of": as_of,
                    "age_secs": age_secs,
                    "consecutive_failures": status.consecutive_failures
                }),
            )
            .await;
        }
    });

    // ── Wait for shutdown ────────────────────────────────────────────
    info!("Incidence tracker is running. Press Ctrl+C to stop.");

    let region_task = async move {
        match region_handle {
            Some(h) => h.await,
            None => std::future::pending().await,
        }
    };

    let shutdown_reason = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            "ctrl_c"
        }
        r = refresh_handle => {
            error!("Refresh task exited: {:?}", r);
            "refresh_task_exit"
        }
        r = journal_handle => {
            error!("Journal task exited: {:?}", r);
            "journal_task_exit"
        }
        r = region_task => {
            error!("Region refresh task exited: {:?}", r);
            "region_task_exit"
        }
        r = heartbeat_handle => {
            error!("Heartbeat task exited: {:?}", r);
            "heartbeat_task_exit"
        }
    };

    write_event(
        &journal,
        json!({
            "ts": now_iso(),
            "kind": "tracker_shutdown",
            "reason": shutdown_reason
        }),
    )
    .await;

    info!("Incidence tracker shut down.");
}
