use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

use indoor_tracker_rs::live_status::LiveStatus;
use indoor_tracker_rs::scan_log::{self, CalibrationLog, ScanLog, ScanTick};
use indoor_tracker_rs::scan_source;
use indoor_tracker_rs::tracker::TickOutcome;
use indoor_tracker_rs::{
    fit_path_loss, initialise, set_coefficients, CalibrationSample, InMemoryRegistry,
    InitialiserMethod, JsonCalibrationStore, PositionFix, RawScanSample, TrackerConfig,
    TrackerError, TrackerResult, TrackingSession,
};

#[derive(Parser, Debug)]
#[command(name = "indoor_tracker")]
#[command(about = "Wi-Fi RSS indoor tracker - path-loss calibration, WCLS fix, range EKF", long_about = None)]
struct Args {
    /// Path-loss coefficient store (JSON)
    #[arg(long, global = true, default_value = "coefficients.json")]
    store: PathBuf,

    /// Tracker config JSON (defaults when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit path-loss coefficients for one anchor
    Fit {
        /// Anchor id (required with --samples, overrides the log's id with --log)
        #[arg(long)]
        anchor_id: Option<u32>,

        /// JSON array of {rss, distance} samples
        #[arg(long, conflicts_with = "log", required_unless_present = "log")]
        samples: Option<PathBuf>,

        /// Recorded calibration log (.json or .json.gz)
        #[arg(long)]
        log: Option<PathBuf>,
    },

    /// Overwrite the coefficients of one anchor
    SetCoefficients {
        #[arg(long)]
        anchor_id: u32,

        /// a b c d, distance = a + b·rss + c·rss² + d·rss³
        #[arg(num_args = 4, allow_hyphen_values = true, value_name = "COEFF")]
        coefficients: Vec<f64>,
    },

    /// Single-shot position from one scan batch
    Locate {
        /// Anchor registry JSON
        #[arg(long)]
        anchors: PathBuf,

        #[arg(long)]
        session_anchor: u32,

        /// JSON array of {anchor_label, rss}
        #[arg(long)]
        scan: PathBuf,

        /// circular, weighted_circular, weighted_circular_gls, hyperbolic, weighted_hyperbolic
        #[arg(long)]
        initialiser: Option<InitialiserMethod>,
    },

    /// Live tracking loop over a recorded scan log
    Track {
        /// Anchor registry JSON
        #[arg(long)]
        anchors: PathBuf,

        #[arg(long)]
        session_anchor: u32,

        /// Scan log (.json or .json.gz)
        #[arg(long)]
        log: PathBuf,

        /// Milliseconds between scan batches
        #[arg(long, default_value = "2000")]
        interval_ms: u64,

        /// Seconds between live status refreshes
        #[arg(long, default_value = "2")]
        status_interval: u64,

        #[arg(long)]
        initialiser: Option<InitialiserMethod>,

        /// Override measurement noise (diagonal of R)
        #[arg(long)]
        measurement_noise: Option<f64>,

        /// Output directory
        #[arg(long, default_value = "indoor_tracker_sessions")]
        output_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::Fit {
            anchor_id,
            samples,
            log,
        } => run_fit(&args.store, anchor_id, samples.as_deref(), log.as_deref()),
        Command::SetCoefficients {
            anchor_id,
            coefficients,
        } => run_set_coefficients(&args.store, anchor_id, &coefficients),
        Command::Locate {
            anchors,
            session_anchor,
            scan,
            initialiser,
        } => {
            let config = load_config(args.config.as_deref(), initialiser, None)
                .unwrap_or_else(|err| exit_with(err));
            run_locate(&args.store, &anchors, session_anchor, &scan, &config)
        }
        Command::Track {
            anchors,
            session_anchor,
            log,
            interval_ms,
            status_interval,
            initialiser,
            measurement_noise,
            output_dir,
        } => {
            let config = load_config(args.config.as_deref(), initialiser, measurement_noise)
                .unwrap_or_else(|err| exit_with(err));
            run_track(
                &args.store,
                &anchors,
                session_anchor,
                &log,
                Duration::from_millis(interval_ms),
                Duration::from_secs(status_interval),
                &output_dir,
                config,
            )
            .await
        }
    }
}

/// Config file plus CLI overrides. Errors keep their tracker exit code.
fn load_config(
    path: Option<&Path>,
    initialiser: Option<InitialiserMethod>,
    measurement_noise: Option<f64>,
) -> TrackerResult<TrackerConfig> {
    let mut config = match path {
        Some(path) => TrackerConfig::from_json(path)?,
        None => TrackerConfig::default(),
    };
    if let Some(method) = initialiser {
        config.initialiser = method;
    }
    if let Some(r) = measurement_noise {
        config.measurement_noise = r;
    }
    config.validate()?;
    Ok(config)
}

fn open_store(path: &Path) -> Result<JsonCalibrationStore> {
    JsonCalibrationStore::open(path)
        .with_context(|| format!("opening calibration store {}", path.display()))
}

fn run_fit(
    store_path: &Path,
    anchor_id: Option<u32>,
    samples_path: Option<&Path>,
    log_path: Option<&Path>,
) -> Result<()> {
    let (anchor_id, samples): (u32, Vec<CalibrationSample>) = match (samples_path, log_path) {
        (Some(path), _) => {
            let anchor_id = anchor_id.context("--anchor-id is required with --samples")?;
            let samples = scan_log::load_json(path)
                .with_context(|| format!("reading samples {}", path.display()))?;
            (anchor_id, samples)
        }
        (None, Some(path)) => {
            let log = CalibrationLog::load(path)
                .with_context(|| format!("reading calibration log {}", path.display()))?;
            (anchor_id.unwrap_or(log.anchor_id), log.samples())
        }
        (None, None) => anyhow::bail!("Provide --samples or --log"),
    };

    println!(
        "[{}] Fitting anchor {} from {} samples",
        ts_now(),
        anchor_id,
        samples.len()
    );

    let mut store = open_store(store_path)?;
    match fit_path_loss(&mut store, anchor_id, &samples) {
        Ok(coefficients) => {
            println!(
                "[{}] Anchor {}: a={:.6} b={:.6} c={:.6e} d={:.6e} -> {}",
                ts_now(),
                anchor_id,
                coefficients[0],
                coefficients[1],
                coefficients[2],
                coefficients[3],
                store_path.display()
            );
            Ok(())
        }
        Err(err) => exit_with(err),
    }
}

fn run_set_coefficients(store_path: &Path, anchor_id: u32, coefficients: &[f64]) -> Result<()> {
    let coefficients: [f64; 4] = coefficients
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected exactly 4 coefficients"))?;

    let mut store = open_store(store_path)?;
    set_coefficients(&mut store, anchor_id, coefficients)?;
    println!(
        "[{}] Anchor {} coefficients set to {:?}",
        ts_now(),
        anchor_id,
        coefficients
    );
    Ok(())
}

fn run_locate(
    store_path: &Path,
    anchors_path: &Path,
    session_anchor: u32,
    scan_path: &Path,
    config: &TrackerConfig,
) -> Result<()> {
    let registry = InMemoryRegistry::from_json_file(anchors_path)
        .with_context(|| format!("loading anchors {}", anchors_path.display()))?;
    let store = open_store(store_path)?;
    let scan: Vec<RawScanSample> = scan_log::load_json(scan_path)
        .with_context(|| format!("reading scan {}", scan_path.display()))?;

    match initialise(&scan, session_anchor, &registry, &store, config) {
        Ok(state) => {
            let position = state.position();
            let output = json!({
                "x": position.x,
                "y": position.y,
                "initialiser": config.initialiser.name(),
                "covariance_trace": state.covariance_trace(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(err) => exit_with(err),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_track(
    store_path: &Path,
    anchors_path: &Path,
    session_anchor: u32,
    log_path: &Path,
    interval: Duration,
    status_interval: Duration,
    output_dir: &Path,
    config: TrackerConfig,
) -> Result<()> {
    let registry = InMemoryRegistry::from_json_file(anchors_path)
        .with_context(|| format!("loading anchors {}", anchors_path.display()))?;
    let store = open_store(store_path)?;
    let log = ScanLog::load(log_path)
        .with_context(|| format!("reading scan log {}", log_path.display()))?;

    let mut session = match TrackingSession::new(registry, store, session_anchor, config) {
        Ok(session) => session,
        Err(err) => exit_with(err),
    };

    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;
    let status_path = output_dir.join("live_status.json");

    println!(
        "[{}] Tracking with anchor {} over {} scan batches ({} ms cadence, {})",
        ts_now(),
        session_anchor,
        log.len(),
        interval.as_millis(),
        session.config().initialiser
    );

    // Capacity 1: at most one batch waits while a tick runs
    let (tx, mut rx) = mpsc::channel::<ScanTick>(1);
    let dropped = Arc::new(AtomicU64::new(0));
    let producer = tokio::spawn(scan_source::replay_loop(
        log.ticks,
        interval,
        tx,
        dropped.clone(),
    ));

    let started = Instant::now();
    let mut last_status = Instant::now();
    let mut status = LiveStatus::new(session_anchor);
    let mut fixes: Vec<PositionFix> = Vec::new();

    while let Some(batch) = rx.recv().await {
        let report = session.process_into(&batch.samples, &mut fixes);

        match &report.outcome {
            TickOutcome::Initialised | TickOutcome::Reinitialised | TickOutcome::Updated => {
                if let Some(position) = report.position {
                    let truth = batch
                        .truth
                        .map(|t| format!(" | err={:.2}m", t.distance_to(&position)))
                        .unwrap_or_default();
                    println!(
                        "[{}] #{:<4} ({:>6.2}, {:>6.2}) tr(P)={:.3} anchors={:?}{}",
                        ts_now(),
                        report.tick,
                        position.x,
                        position.y,
                        report.covariance_trace.unwrap_or(f64::NAN),
                        report.anchors,
                        truth
                    );
                }
            }
            TickOutcome::Skipped(err) | TickOutcome::Failed(err) | TickOutcome::Diverged(err) => {
                println!("[{}] #{:<4} no fix: {}", ts_now(), report.tick, err);
            }
        }

        status.record(&report, session.state(), session.stats());
        if last_status.elapsed() >= status_interval {
            status.scans_dropped = dropped.load(Ordering::Relaxed);
            status.uptime_seconds = started.elapsed().as_secs();
            if let Err(e) = status.save(&status_path) {
                log::warn!("Failed to write live status: {}", e);
            }
            last_status = Instant::now();
        }
    }

    let delivered = producer.await.context("scan producer task failed")?;

    status.scans_dropped = dropped.load(Ordering::Relaxed);
    status.uptime_seconds = started.elapsed().as_secs();
    status
        .save(&status_path)
        .with_context(|| format!("writing {}", status_path.display()))?;

    let fixes_path = output_dir.join(format!(
        "fixes_{}.json",
        Utc::now().format("%Y%m%d_%H%M%S")
    ));
    scan_log::save_json(&fixes_path, &fixes)
        .with_context(|| format!("writing {}", fixes_path.display()))?;

    let stats = session.stats();
    println!(
        "[{}] Done: {} delivered, {} dropped, {} fixes, {} skipped, {} failed, {} diverged, {} reinitialised",
        ts_now(),
        delivered,
        status.scans_dropped,
        fixes.len(),
        stats.skipped,
        stats.failures,
        stats.divergences,
        stats.reinitialisations
    );
    println!("[{}] Fixes written to {}", ts_now(), fixes_path.display());
    Ok(())
}

fn exit_with(err: TrackerError) -> ! {
    eprintln!("[{}] error: {}", ts_now(), err);
    std::process::exit(err.exit_code())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
