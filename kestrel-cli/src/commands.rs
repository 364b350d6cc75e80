use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use kestrel_config::KestrelConfig;
use kestrel_core::prelude::*;
use kestrel_telemetry::{EventLogger, MetricsRecorder};
use tracing::info;

use crate::error::CliResult;
use crate::rally::{self, Court, RallySettings, Tally};

#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the rally model, optionally writing a checkpoint on the way
    Run(RunArgs),
    /// Continue a run from a checkpoint image
    Restart(RestartArgs),
    /// Print the contents of a checkpoint image
    Inspect(InspectArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Configuration file; defaults to config/kestrel.yaml when present
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Number of partitions, one player each
    #[arg(long)]
    pub partitions: Option<u32>,
    /// Simulated duration of the run, e.g. 1us
    #[arg(long)]
    pub stop_at: Option<String>,
    /// Latency of every link in the ring, e.g. 10ns
    #[arg(long)]
    pub latency: Option<String>,
    /// Write a checkpoint at this simulated time
    #[arg(long)]
    pub checkpoint_at: Option<String>,
    /// Where to write the checkpoint
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RestartArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Checkpoint image to restart from; defaults to the configured path
    #[arg(short, long)]
    pub from: Option<PathBuf>,
    /// Simulated time at which the restarted run stops
    #[arg(long)]
    pub stop_at: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Checkpoint image to print; defaults to the configured path
    #[arg(short, long)]
    pub from: Option<PathBuf>,
}

pub fn run(args: RunArgs) -> CliResult<()> {
    let mut config = load_config(&args.config)?;
    if let Some(partitions) = args.partitions {
        config.simulation.partitions = partitions;
    }
    if let Some(stop_at) = args.stop_at {
        config.simulation.stop_at = stop_at;
    }
    if let Some(latency) = args.latency {
        config.simulation.link_latency = latency;
    }
    if let Some(at) = args.checkpoint_at {
        config.checkpoint.at = Some(at);
    }
    if let Some(path) = args.checkpoint {
        config.checkpoint.path = path.display().to_string();
    }

    let metrics = start_telemetry(&config)?;
    let mut court = Court::new(&settings(&config, metrics.clone()))?;
    let end = court.ticks(&config.simulation.stop_at)?;

    let summaries = match config.checkpoint.at.as_deref() {
        Some(at) => {
            let at = court.ticks(at)?.min(end);
            let registry = rally::registry();
            let tally = Arc::clone(&court.tally);
            let partition = court.single()?;

            let init_phases = partition.run_untimed_phases();
            partition.finalize_links();
            let before = partition.run_until(at);
            let bytes = Checkpoint::write_to_path(
                &config.checkpoint.path,
                partition,
                &mut *tally.lock(),
                &registry,
            )?;
            EventLogger::log_sim_event(
                "checkpoint",
                partition.now(),
                &format!("wrote {bytes} bytes to {}", config.checkpoint.path),
            );

            let rest = partition.resume(end);
            vec![RunSummary {
                init_phases,
                delivered: before + rest.delivered,
                ..rest
            }]
        }
        None if court.partitions.len() == 1 => vec![court.single()?.run(end)],
        None => run_parallel(&mut court.partitions, end)?,
    };

    let tally = court.tally.lock().clone();
    report(&summaries, &tally, metrics.as_ref())
}

pub fn restart(args: RestartArgs) -> CliResult<()> {
    let mut config = load_config(&args.config)?;
    if let Some(stop_at) = args.stop_at {
        config.simulation.stop_at = stop_at;
    }
    let from = args
        .from
        .unwrap_or_else(|| PathBuf::from(&config.checkpoint.path));

    let metrics = start_telemetry(&config)?;
    let mut court = Court::new(&settings(&config, metrics.clone()))?;
    let end = court.ticks(&config.simulation.stop_at)?;
    let tally = Arc::clone(&court.tally);

    let reader = CheckpointReader::open(&rally::registry(), &from)?;
    info!(path = %from.display(), now = reader.now(), end, "restarting from checkpoint");
    let partition = court.single()?;
    reader.restore(partition, &mut *tally.lock())?;
    let summary = partition.resume(end);

    let tally = tally.lock().clone();
    report(&[summary], &tally, metrics.as_ref())
}

pub fn inspect(args: InspectArgs) -> CliResult<()> {
    let config = load_config(&args.config)?;
    let from = args
        .from
        .unwrap_or_else(|| PathBuf::from(&config.checkpoint.path));
    start_telemetry(&config)?;

    let registry = rally::registry();
    let mut court = Court::new(&settings(&config, None))?;
    let tally = Arc::clone(&court.tally);
    let partition = court.single()?;
    CheckpointReader::open(&registry, &from)?.restore(partition, &mut *tally.lock())?;

    let map = Checkpoint::describe(partition, &mut *tally.lock(), &registry)?;
    println!("{map}");
    Ok(())
}

fn load_config(args: &ConfigArgs) -> CliResult<KestrelConfig> {
    Ok(match &args.config {
        Some(path) => KestrelConfig::load_from_path(path)?,
        None => KestrelConfig::load()?,
    })
}

fn start_telemetry(config: &KestrelConfig) -> CliResult<Option<MetricsRecorder>> {
    EventLogger::init(&config.telemetry.log_level);
    if config.telemetry.enable_metrics {
        Ok(Some(MetricsRecorder::new()?))
    } else {
        Ok(None)
    }
}

fn settings(config: &KestrelConfig, metrics: Option<MetricsRecorder>) -> RallySettings {
    RallySettings {
        core_time_base: config.simulation.core_time_base.clone(),
        enforce_link_order: config.simulation.enforce_link_order,
        players: config.simulation.partitions,
        latency: config.simulation.link_latency.clone(),
        metrics,
    }
}

fn report(
    summaries: &[RunSummary],
    tally: &Tally,
    metrics: Option<&MetricsRecorder>,
) -> CliResult<()> {
    for (id, summary) in summaries.iter().enumerate() {
        println!(
            "partition {id}: {} events delivered, {} init phases, {} complete phases, stopped at {}",
            summary.delivered, summary.init_phases, summary.complete_phases, summary.end_time
        );
    }
    println!(
        "volleys: {}, longest rally: {}, greetings: {}",
        tally.volleys, tally.longest_rally, tally.greetings
    );
    if let Some(metrics) = metrics {
        print!("{}", metrics.gather_metrics()?);
    }
    Ok(())
}
