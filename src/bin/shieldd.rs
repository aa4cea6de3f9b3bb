//! shieldd - camera analysis daemon
//!
//! This daemon:
//! 1. Captures frames from the configured video source on a dedicated thread
//! 2. Runs the analysis pipeline on the latest frame every tick
//! 3. Writes each analysis that has detections as one JSON line to stdout
//! 4. Logs critical detections and a periodic health line
//!
//! With `--snapshot` it instead waits for one frame, prints its detections and exits.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use shield_vision::config::{ShieldConfig, REMOTE_BACKEND, SCRIPTED_BACKEND};
use shield_vision::{
    open_source, Analysis, BackendRegistry, Capability, DetectorBackend, Engine, FrameBuffer,
    IouTracker, ModelClient, RemoteDetector, RemoteIdentityResolver, RemotePlateReader,
    ScriptedBackend, SystemClock, ThreatLevel,
};

const HEALTH_INTERVAL: Duration = Duration::from_secs(30);
const SNAPSHOT_WAIT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML when the extension is .toml).
    #[arg(long, env = "SHIELD_CONFIG")]
    config: Option<PathBuf>,
    /// Video source identifier; overrides the config file.
    #[arg(long)]
    source: Option<String>,
    /// Exit after this many analysis ticks.
    #[arg(long)]
    ticks: Option<u64>,
    /// Pretty-print JSON output.
    #[arg(long)]
    pretty: bool,
    /// Detect on a single frame, print the detections and exit.
    #[arg(long, conflicts_with = "ticks")]
    snapshot: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = ShieldConfig::load_from(args.config.as_deref())?;
    if let Some(source) = args.source {
        cfg.source.id = source;
    }

    let source = open_source(&cfg.source)?;
    let buffer = FrameBuffer::new(source, cfg.capture.clone());
    let detector = select_detector(&cfg)?;
    let mut engine = Engine::new(buffer, detector, cfg.analysis.clone(), Arc::new(SystemClock))?;

    if let Some(url) = &cfg.models.identity_url {
        log::info!("identity resolver: {}", url);
        engine = engine.with_identity_resolver(Box::new(RemoteIdentityResolver::new(
            model_client(&cfg, url),
        )));
    }
    if let Some(url) = &cfg.models.plate_url {
        log::info!("plate reader: {}", url);
        engine = engine.with_plate_reader(Box::new(RemotePlateReader::new(model_client(&cfg, url))));
    }

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");

    engine.start()?;
    if args.snapshot {
        let result = run_snapshot(&mut engine, &running, args.pretty);
        engine.stop();
        return result;
    }
    log::info!(
        "shieldd running: source={} tick={:?}",
        cfg.source.id,
        cfg.tick
    );

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut ticks = 0u64;
    let mut last_health = Instant::now();

    while running.load(Ordering::SeqCst) {
        let started = Instant::now();
        let analysis = engine.analyze();
        ticks += 1;

        if !analysis.detections.is_empty() {
            for detection in analysis
                .detections
                .iter()
                .filter(|d| d.threat_level == ThreatLevel::Critical)
            {
                log::warn!(
                    "critical detection {}: {} ({:.2})",
                    detection.id,
                    detection.label,
                    detection.confidence
                );
            }
            write_analysis(&mut out, &analysis, args.pretty)?;
        }

        if last_health.elapsed() >= HEALTH_INTERVAL {
            let stats = &analysis.stats;
            log::info!(
                "health: status={} fps={} res={} frames={} tracked={}",
                stats.status.as_str(),
                stats.fps,
                stats.res,
                stats.frames_captured,
                stats.tracked
            );
            last_health = Instant::now();
        }

        if args.ticks.is_some_and(|max| ticks >= max) {
            break;
        }
        let elapsed = started.elapsed();
        if elapsed < cfg.tick {
            std::thread::sleep(cfg.tick - elapsed);
        }
    }

    log::info!("shutting down after {} ticks", ticks);
    engine.stop();
    Ok(())
}

fn run_snapshot(engine: &mut Engine, running: &AtomicBool, pretty: bool) -> Result<()> {
    let deadline = Instant::now() + SNAPSHOT_WAIT;
    while engine.frame().is_none() {
        if !running.load(Ordering::SeqCst) || Instant::now() >= deadline {
            bail!(
                "no frame from the video source within {:?} (status {})",
                SNAPSHOT_WAIT,
                engine.status().state.as_str()
            );
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    let detections = engine.snapshot()?;
    let json = if pretty {
        serde_json::to_string_pretty(&detections)?
    } else {
        serde_json::to_string(&detections)?
    };
    println!("{}", json);
    Ok(())
}

fn model_client(cfg: &ShieldConfig, url: &str) -> ModelClient {
    ModelClient::new(url, cfg.models.request_timeout, cfg.models.jpeg_quality)
}

/// Register the available detectors and take the configured one.
///
/// Detectors that do not track on their own are wrapped in an IoU tracker so that
/// loitering and enrichment caching work with any backend.
fn select_detector(cfg: &ShieldConfig) -> Result<Box<dyn DetectorBackend>> {
    let mut registry = BackendRegistry::new();
    registry.register_as(
        SCRIPTED_BACKEND,
        Box::new(IouTracker::new(ScriptedBackend::demo())),
    );
    if let Some(url) = &cfg.models.detector_url {
        let remote = RemoteDetector::new(model_client(cfg, url), cfg.models.detector_tracking);
        let backend: Box<dyn DetectorBackend> = if cfg.models.detector_tracking {
            Box::new(remote)
        } else {
            Box::new(IouTracker::new(remote))
        };
        registry.register_as(REMOTE_BACKEND, backend);
    }
    registry
        .set_default(&cfg.detector_backend)
        .context("select detector backend")?;
    log::info!(
        "detector backends {:?}, using {}",
        registry.list(),
        cfg.detector_backend
    );
    registry.take_for_capability(Capability::ObjectDetection)
}

fn write_analysis(out: &mut impl Write, analysis: &Analysis, pretty: bool) -> Result<()> {
    let line = if pretty {
        serde_json::to_string_pretty(analysis)?
    } else {
        serde_json::to_string(analysis)?
    };
    writeln!(out, "{}", line).context("write analysis to stdout")?;
    out.flush().context("flush stdout")?;
    Ok(())
}
