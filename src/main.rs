use std::env;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate::recognizer::ProbeAnalyzer;
use facegate::{calibrate, config, matcher, store};
use facegate::{AccessController, AccessService, Embedding, EmbeddingStore, Output, Signal};
use log::info;

#[derive(Parser)]
#[command(name = "facegate")]
#[command(
    version,
    about = "Face-verified door lock controller"
)]
struct Cli {
    /// Config file (defaults to the system config path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calibrate the match threshold and evaluate accuracy on the enrolled set
    Calibrate {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Match one probe vector (JSON array) against the enrolled set
    Match {
        #[arg(short, long)]
        probe: PathBuf,
    },
    /// Run the access controller driven by a command script (stdin by default)
    Run {
        #[arg(short, long)]
        script: Option<PathBuf>,
        /// Pause after each submitted frame
        #[arg(long, default_value_t = 40)]
        frame_interval_ms: u64,
    },
    /// Open config file in editor, or print the effective configuration
    Config {
        #[arg(long)]
        print: bool,
    },
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Calibrate { json } => run_calibrate(&cfg, json),
        Commands::Match { probe } => run_match(&cfg, &probe),
        Commands::Run {
            script,
            frame_interval_ms,
        } => run_session(&cfg, script.as_deref(), Duration::from_millis(frame_interval_ms)),
        Commands::Config { print } => {
            if print {
                print!("{}", toml::to_string_pretty(&cfg)?);
                Ok(())
            } else {
                open_config(cli.config.as_deref())
            }
        }
    }
}

fn load_store(cfg: &config::Config) -> EmbeddingStore {
    let (store, source) = store::load(&cfg.store.primary, &cfg.store.fallback);
    info!("Embedding store: {:?} ({} identities)", source, store.len());
    store
}

/// Configured threshold, or one calibrated from the store.
fn session_threshold(cfg: &config::Config, store: &EmbeddingStore) -> f32 {
    match cfg.recognition.threshold {
        Some(threshold) => {
            info!("Using configured threshold {:.3}", threshold);
            threshold
        }
        None => {
            let calibration = calibrate::calibrate(store, &mut rand::thread_rng());
            info!("Using calibrated threshold {:.3}", calibration.threshold);
            calibration.threshold
        }
    }
}

fn run_calibrate(cfg: &config::Config, json: bool) -> Result<()> {
    let store = load_store(cfg);
    let calibration = calibrate::calibrate(&store, &mut rand::thread_rng());
    let accuracy = calibrate::evaluate(&store, calibration.threshold);

    if json {
        let report = serde_json::json!({
            "identities": store.len(),
            "calibration": calibration,
            "accuracy": accuracy,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("identities:  {}", store.len());
    println!("mean intra:  {:.4}", calibration.mean_intra);
    println!("mean inter:  {:.4}", calibration.mean_inter);
    if calibration.fell_back {
        println!(
            "threshold:   {:.4} (computed {:.4} out of band)",
            calibration.threshold, calibration.raw
        );
    } else {
        println!("threshold:   {:.4}", calibration.threshold);
    }
    match accuracy {
        Some(acc) => println!(
            "accuracy:    {:.2}% ({}/{})",
            acc.percent, acc.correct, acc.total
        ),
        None => println!("accuracy:    not enough embeddings to evaluate"),
    }
    Ok(())
}

fn run_match(cfg: &config::Config, probe_path: &Path) -> Result<()> {
    let raw = std::fs::read(probe_path)
        .with_context(|| format!("reading probe {}", probe_path.display()))?;
    let values: Vec<f32> = serde_json::from_slice(&raw)
        .with_context(|| format!("parsing probe {}", probe_path.display()))?;

    let store = load_store(cfg);
    let threshold = session_threshold(cfg, &store);
    let probe = Embedding::from_vec(values).normalized();
    let result = matcher::match_probe(&probe, &store, threshold);

    if result.distance == f32::MAX {
        println!("{}", result.label);
    } else {
        println!("{} (distance {:.4})", result.label, result.distance);
    }
    Ok(())
}

/// One line of a session script.
#[derive(Debug, PartialEq)]
enum ScriptStep {
    /// Frame whose probe is the enrolled vector of an identity.
    Face(String, usize),
    Probe(Vec<f32>, usize),
    NoFace(usize),
    Signal(Signal),
    Sleep(Duration),
}

fn parse_repeat(token: Option<&str>) -> Result<usize> {
    match token {
        None => Ok(1),
        Some(t) => t
            .strip_prefix('x')
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| anyhow::anyhow!("expected a repeat count like x20, got {}", t)),
    }
}

fn parse_step(line: &str) -> Result<Option<ScriptStep>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    if let Some(rest) = line.strip_prefix("probe ") {
        let (vector, repeat) = match rest.rfind(']') {
            Some(end) => (&rest[..=end], rest[end + 1..].split_whitespace().next()),
            None => anyhow::bail!("probe needs a JSON array: {}", line),
        };
        let values: Vec<f32> = serde_json::from_str(vector).context("parsing probe vector")?;
        return Ok(Some(ScriptStep::Probe(values, parse_repeat(repeat)?)));
    }

    let mut tokens = line.split_whitespace();
    let step = match tokens.next() {
        Some("face") => {
            let name = tokens
                .next()
                .ok_or_else(|| anyhow::anyhow!("face needs an identity"))?;
            ScriptStep::Face(name.to_string(), parse_repeat(tokens.next())?)
        }
        Some("noface") => ScriptStep::NoFace(parse_repeat(tokens.next())?),
        Some("confirm") | Some("yes") => ScriptStep::Signal(Signal::Confirm),
        Some("deny") | Some("no") => ScriptStep::Signal(Signal::Deny),
        Some("lock") => ScriptStep::Signal(Signal::RequestLock),
        Some("break") => ScriptStep::Signal(Signal::TakeBreak),
        Some("end") => ScriptStep::Signal(Signal::EndClass),
        Some("resume") => ScriptStep::Signal(Signal::Resume),
        Some("sleep") => {
            let ms: u64 = tokens
                .next()
                .and_then(|t| t.parse().ok())
                .ok_or_else(|| anyhow::anyhow!("sleep needs milliseconds"))?;
            ScriptStep::Sleep(Duration::from_millis(ms))
        }
        Some(other) => anyhow::bail!("unknown command: {}", other),
        None => return Ok(None),
    };
    Ok(Some(step))
}

fn print_output(output: Output) {
    match output {
        Output::Update(update) => {
            if let Some(status) = update.status {
                println!(
                    "[{:?}] {} | {}{}",
                    update.phase,
                    status.headline,
                    status.detail.replace('\n', " "),
                    if update.door_locked { "" } else { " (door unlocked)" }
                );
            }
        }
        Output::Overlays(overlays) => {
            for overlay in overlays {
                log::debug!("overlay {:?} distance {:.4}", overlay.bbox, overlay.distance);
            }
        }
        Output::Handoff(handoff) => println!("handoff: {:?}", handoff),
    }
}

fn run_session(
    cfg: &config::Config,
    script: Option<&Path>,
    frame_interval: Duration,
) -> Result<()> {
    let store = Arc::new(load_store(cfg));
    let threshold = session_threshold(cfg, &store);
    calibrate::evaluate(&store, threshold);

    let controller = AccessController::new(cfg.access_config());
    let analyzer = ProbeAnalyzer::new(Arc::clone(&store), threshold);
    let (service, outputs) = AccessService::spawn(controller, analyzer)?;

    let printer = std::thread::Builder::new()
        .name("facegate-output".into())
        .spawn(move || {
            for output in outputs {
                print_output(output);
            }
        })
        .context("spawning output thread")?;

    let reader: Box<dyn BufRead> = match script {
        Some(path) => Box::new(std::io::BufReader::new(
            std::fs::File::open(path)
                .with_context(|| format!("opening script {}", path.display()))?,
        )),
        None => Box::new(std::io::stdin().lock()),
    };

    for (lineno, line) in reader.lines().enumerate() {
        let line = line.context("reading script")?;
        let step = match parse_step(&line) {
            Ok(Some(step)) => step,
            Ok(None) => continue,
            Err(e) => {
                log::warn!("line {}: {:#}", lineno + 1, e);
                continue;
            }
        };

        match step {
            ScriptStep::Face(name, repeat) => match store.get(&name) {
                Some(emb) => submit_frames(&service, Some(emb.clone()), repeat, frame_interval),
                None => log::warn!("line {}: {} is not enrolled", lineno + 1, name),
            },
            ScriptStep::Probe(values, repeat) => submit_frames(
                &service,
                Some(Embedding::from_vec(values)),
                repeat,
                frame_interval,
            ),
            ScriptStep::NoFace(repeat) => submit_frames(&service, None, repeat, frame_interval),
            ScriptStep::Signal(signal) => {
                if let Err(e) = service.signal(signal) {
                    log::warn!("{:#}", e);
                    break;
                }
            }
            ScriptStep::Sleep(pause) => std::thread::sleep(pause),
        }
    }

    let superseded = service.superseded_frames();
    let controller = service.shutdown()?;
    if superseded > 0 {
        info!("{} frames superseded before analysis", superseded);
    }
    printer
        .join()
        .map_err(|_| anyhow::anyhow!("output thread panicked"))?;

    info!(
        "Session over: door {}",
        if controller.door_locked() { "locked" } else { "unlocked" }
    );
    Ok(())
}

fn submit_frames(
    service: &AccessService<Option<Embedding>>,
    probe: Option<Embedding>,
    repeat: usize,
    interval: Duration,
) {
    for _ in 0..repeat {
        service.submit_frame(probe.clone());
        std::thread::sleep(interval);
    }
}

fn open_config(path: Option<&Path>) -> Result<()> {
    let config_path = path.unwrap_or(&config::CONFIG_PATH).as_os_str();
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
