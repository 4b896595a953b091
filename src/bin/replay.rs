use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use serde_json::json;

use indoor_tracker_rs::scan_log::ScanLog;
use indoor_tracker_rs::{
    InMemoryRegistry, InitialiserMethod, JsonCalibrationStore, PositionFix, TrackerConfig,
    TrackingSession,
};

#[derive(Parser, Debug)]
struct Args {
    /// Path to a scan log (.json or .json.gz)
    #[arg(long, conflicts_with = "log_dir")]
    log: Option<PathBuf>,

    /// Directory of scan logs to batch replay (processes *.json[.gz])
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Anchor registry JSON
    #[arg(long)]
    anchors: PathBuf,

    /// Path-loss coefficient store
    #[arg(long, default_value = "coefficients.json")]
    store: PathBuf,

    #[arg(long)]
    session_anchor: u32,

    /// Tracker config JSON (defaults when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override measurement noise (diagonal of R)
    #[arg(long)]
    measurement_noise: Option<f64>,

    /// Replay each log once per closed-form initialiser (A/B testing)
    #[arg(long, default_value_t = false)]
    compare_initialisers: bool,
}

fn rmse(errors: &[f64]) -> f64 {
    if errors.is_empty() {
        return f64::INFINITY;
    }
    let sum_sq: f64 = errors.iter().map(|e| e.powi(2)).sum();
    (sum_sq / errors.len() as f64).sqrt()
}

fn load_config(args: &Args) -> anyhow::Result<TrackerConfig> {
    let mut config = match args.config.as_ref() {
        Some(path) => TrackerConfig::from_json(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TrackerConfig::default(),
    };
    if let Some(r) = args.measurement_noise {
        config.measurement_noise = r;
    }
    config.validate()?;
    Ok(config)
}

fn run_once(
    path: &Path,
    log: &ScanLog,
    registry: &InMemoryRegistry,
    args: &Args,
    config: TrackerConfig,
) -> anyhow::Result<serde_json::Value> {
    let store = JsonCalibrationStore::open(&args.store)
        .with_context(|| format!("opening calibration store {}", args.store.display()))?;
    let initialiser = config.initialiser;
    let mut session = TrackingSession::new(registry.clone(), store, args.session_anchor, config)?;

    let started = Instant::now();
    let mut fixes: Vec<PositionFix> = Vec::new();
    let mut errors = Vec::new();
    let mut first_fix_tick = None;

    for tick in &log.ticks {
        let report = session.process_into(&tick.samples, &mut fixes);
        if let Some(position) = report.position {
            first_fix_tick.get_or_insert(report.tick);
            if let Some(truth) = tick.truth {
                errors.push(truth.distance_to(&position));
            }
        }
    }
    let elapsed = started.elapsed();

    let stats = session.stats();
    let mean_error = if errors.is_empty() {
        f64::INFINITY
    } else {
        errors.iter().sum::<f64>() / errors.len() as f64
    };
    let max_error = errors.iter().cloned().fold(0.0_f64, f64::max);
    let final_position = session.state().map(|s| s.position());

    Ok(json!({
        "log": path.display().to_string(),
        "initialiser": initialiser.name(),
        "ticks": stats.ticks,
        "fixes": fixes.len(),
        "fix_rate": if stats.ticks > 0 { fixes.len() as f64 / stats.ticks as f64 } else { 0.0 },
        "first_fix_tick": first_fix_tick,
        "skipped": stats.skipped,
        "initialiser_failures": stats.failures,
        "divergences": stats.divergences,
        "reinitialisations": stats.reinitialisations,
        "truth_pairs": errors.len(),
        "rmse_m": rmse(&errors),
        "mean_error_m": mean_error,
        "max_error_m": max_error,
        "final_position": final_position,
        "final_covariance_trace": session.state().map(|s| s.covariance_trace()),
        "runtime_ms": elapsed.as_secs_f64() * 1000.0,
    }))
}

fn replay_log(
    path: &Path,
    registry: &InMemoryRegistry,
    args: &Args,
    config: &TrackerConfig,
) -> anyhow::Result<Vec<serde_json::Value>> {
    let log =
        ScanLog::load(path).with_context(|| format!("reading scan log {}", path.display()))?;

    let methods: Vec<InitialiserMethod> = if args.compare_initialisers {
        InitialiserMethod::ALL.to_vec()
    } else {
        vec![config.initialiser]
    };

    let mut results = Vec::new();
    for method in methods {
        let mut config = config.clone();
        config.initialiser = method;
        results.push(run_once(path, &log, registry, args, config)?);
    }
    Ok(results)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let registry = InMemoryRegistry::from_json_file(&args.anchors)
        .with_context(|| format!("loading anchors {}", args.anchors.display()))?;
    let config = load_config(&args)?;
    let mut results = Vec::new();

    if let Some(dir) = args.log_dir.as_ref() {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.ends_with(".json") || name.ends_with(".json.gz") {
                paths.push(path);
            }
        }
        paths.sort();
        for path in paths {
            match replay_log(&path, &registry, &args, &config) {
                Ok(res) => results.extend(res),
                Err(e) => eprintln!("Failed {}: {:#}", path.display(), e),
            }
        }
    } else if let Some(path) = args.log.as_ref() {
        results.extend(replay_log(path, &registry, &args, &config)?);
    } else {
        anyhow::bail!("Provide --log or --log-dir");
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
