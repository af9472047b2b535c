mod config;
mod discover;
mod manifest;
mod refs;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use genopipe_orchestration::stages::annotate::{annotate_pipeline, AnnotateLayout};
use genopipe_orchestration::stages::rnaseq::{rnaseq_pipeline, RnaseqLayout};
use genopipe_orchestration::{Orchestrator, PipelineSpec, ResourceBudget, RunContext, RunReport};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "genopipe",
    version,
    about = "Multi-stage per-unit pipelines for genome annotation and RNA-seq"
)]
struct Cli {
    /// JSON configuration file.
    #[arg(short, long, global = true, default_value = "genopipe.json")]
    config: PathBuf,

    /// Override the worker pool size.
    #[arg(long, global = true)]
    jobs: Option<usize>,

    /// Override the total core budget.
    #[arg(long, global = true)]
    cores: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Annotate every species assembly found in the data directory.
    Annotate,
    /// Quantify every sequencing run listed in the sample manifest.
    Rnaseq,
    /// Link per-species reference files for the RNA-seq pipeline.
    PrepareRefs,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            // Startup failures (bad config, missing manifest, no units).
            error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = Config::load(&cli.config)?;
    if let Some(jobs) = cli.jobs {
        config.jobs = jobs;
    }
    if let Some(cores) = cli.cores {
        config.total_cores = cores;
    }

    match cli.command {
        Command::Annotate => run_annotate(&config).await,
        Command::Rnaseq => run_rnaseq(&config).await,
        Command::PrepareRefs => {
            let annotate = config
                .annotate
                .as_ref()
                .context("config has no \"annotate\" section")?;
            let rnaseq = config
                .rnaseq
                .as_ref()
                .context("config has no \"rnaseq\" section")?;
            refs::prepare_references(annotate, rnaseq)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_annotate(config: &Config) -> Result<ExitCode> {
    let annotate = config
        .annotate
        .as_ref()
        .context("config has no \"annotate\" section")?;

    let units = discover::discover_species(&annotate.data_dir, &annotate.results_dir)?;
    let models = Arc::new(manifest::read_models(&annotate.models_file)?);
    let layout = Arc::new(AnnotateLayout::new(
        &annotate.data_dir,
        &annotate.results_dir,
    ));

    let spec = annotate_pipeline(
        Arc::clone(&layout),
        models,
        annotate.diamond_db.clone(),
        annotate.eggnog_data_dir.clone(),
    );
    let ctx = RunContext {
        budget: ResourceBudget::compute(config.jobs, config.total_cores),
        logs_dir: layout.logs_dir(),
        command_timeout: Duration::from_secs(config.command_timeout_secs),
    };
    execute(spec, ctx, units).await
}

async fn run_rnaseq(config: &Config) -> Result<ExitCode> {
    let rnaseq = config
        .rnaseq
        .as_ref()
        .context("config has no \"rnaseq\" section")?;

    let units = manifest::read_samples(&rnaseq.samples_file)?;
    let layout = Arc::new(RnaseqLayout::new(&rnaseq.output_dir, &rnaseq.ref_dir));

    let spec = rnaseq_pipeline(Arc::clone(&layout));
    let ctx = RunContext {
        budget: ResourceBudget::compute(config.jobs, config.total_cores),
        logs_dir: layout.logs_dir(),
        command_timeout: Duration::from_secs(config.command_timeout_secs),
    };
    execute(spec, ctx, units).await
}

async fn execute(
    spec: PipelineSpec,
    ctx: RunContext,
    units: Vec<genopipe_orchestration::Unit>,
) -> Result<ExitCode> {
    let stage_ids = spec.stage_ids();
    let orchestrator = Orchestrator::new(spec, ctx);
    let report = orchestrator.run_all(units).await?;

    print!("{}", report.render(&stage_ids));
    Ok(exit_code(&report))
}

/// Failures are reported per unit, never escalated mid-run; the process
/// exit code reflects the aggregate outcome instead.
fn exit_code(report: &RunReport) -> ExitCode {
    if report.has_non_success() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}
