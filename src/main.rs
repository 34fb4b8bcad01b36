use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use tunnistin::hunt_detector::RecordedDetector;
use tunnistin::hunt_pipeline::Pipeline;
use tunnistin::hunt_replay::{replay, Recording, RecordingSource, ReplayReport};
use tunnistin::{load_config, logging, HuntConfig, HuntSnapshot};

#[derive(Parser)]
#[command(name = "tunnistin", version)]
#[command(about = "Scavenger hunt tracking core: replay recorded detections, inspect config")]
struct Cli {
    /// Log level used when RUST_LOG / TUNNISTIN_LOG_LEVEL are unset
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a recorded detection stream (JSON lines) through the hunt
    Replay {
        file: PathBuf,
        #[arg(short, long)] config: Option<PathBuf>,
        /// Go through the live pipeline with real timers instead of frame time
        #[arg(long)] realtime: bool,
        #[arg(long)] json: bool,
    },

    /// Print the effective configuration (file + environment)
    Config {
        #[arg(short, long)] config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level.as_deref());

    match cli.command {
        Command::Replay { file, config, realtime, json } => {
            let cfg = load(config.as_deref())?;
            let recording = Recording::load(&file)
                .with_context(|| format!("cannot read recording {}", file.display()))?;

            if realtime {
                let paced = cfg.pipeline.pace_replay;
                let handle = Pipeline::new(cfg).start(RecordingSource::new(recording, paced), RecordedDetector)?;
                let last = handle.join().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&last)?);
                } else {
                    print_progress(&last);
                }
            } else {
                let report = replay(&cfg, &recording)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    print_report(&report);
                }
            }
        }

        Command::Config { config } => {
            let cfg = load(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
    }
    Ok(())
}

fn load(path: Option<&Path>) -> Result<HuntConfig> {
    let cfg = load_config(path).context("configuration could not be loaded")?;
    tracing::debug!("Targets: {:?}", cfg.game.target_objects);
    Ok(cfg)
}

fn print_report(report: &ReplayReport) {
    let start = report.steps.first().map(|s| s.timestamp);
    let mut found_so_far = 0;

    for step in &report.steps {
        let offset = start
            .map(|t| (step.timestamp - t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or_default();
        if step.auto_reset {
            println!("  +{:>7.2}s  award over, new hunt", offset);
            found_so_far = 0;
        }
        let Some(snap) = &step.snapshot else { continue };
        for class in snap.progress.found_classes.iter().skip(found_so_far) {
            println!("  +{:>7.2}s  found {}", offset, class);
        }
        found_so_far = snap.progress.found_classes.len();
        if snap.mission_complete() {
            println!("  +{:>7.2}s  MISSION COMPLETE", offset);
        }
    }

    println!("{}", "─".repeat(48));
    println!("  Frames:      {}", report.steps.len());
    println!("  Completions: {}", report.completions);
    print_progress(&report.final_snapshot);
}

fn print_progress(snap: &HuntSnapshot) {
    for target in &snap.progress.targets {
        let filled = (target.progress * 20.0).round() as usize;
        println!(
            "  {:<12} [{:<20}] {:>3.0}%{}",
            target.class_id,
            "█".repeat(filled),
            target.progress * 100.0,
            if target.found { "  ✓" } else { "" }
        );
    }
    if snap.mission_complete() {
        println!("  Mission complete");
    }
}
