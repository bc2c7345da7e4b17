//! CLI entry point for the pawprint pipeline.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pawprint_core::{
    CancelFlag, CleanConfig, FixedClassifier, HarvestConfig, ensure_writable_root, run_clean,
    run_harvest, run_reorganize,
};
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, CleanArgs, Command, HarvestArgs, ReorganizeArgs};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    // A destination we cannot write to fails every stage; check up front.
    ensure_writable_root(&args.output)
        .with_context(|| format!("output root {} is not writable", args.output.display()))?;

    match args.command {
        Command::Harvest(harvest) => {
            harvest_stage(&args.output, &harvest).await?;
        }
        Command::Clean(clean) => {
            clean_stage(&args.output, &clean)?;
        }
        Command::Reorganize(reorganize) => {
            reorganize_stage(&args.output, &reorganize)?;
        }
        Command::Run(run) => {
            harvest_stage(&args.output, &run.harvest).await?;
            clean_stage(&args.output, &run.clean)?;
            reorganize_stage(&args.output, &run.reorganize)?;
        }
    }

    Ok(())
}

async fn harvest_stage(output: &Path, args: &HarvestArgs) -> Result<()> {
    let config = HarvestConfig {
        max_pages: args.max_pages,
        target_records: args.target_records,
        target_images: args.target_images,
        max_attempts: u32::from(args.max_attempts),
        rate_limit_ms: args.rate_limit,
        concurrency: usize::from(args.concurrency),
        output_root: output.to_path_buf(),
        ..HarvestConfig::default()
    };

    // Ctrl-c requests a graceful stop; the checkpoint is flushed and the
    // next run resumes where this one left off.
    let cancel = CancelFlag::new();
    let ctrlc_flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight work");
            ctrlc_flag.cancel();
        }
    });

    info!("harvest starting");
    let stats = run_harvest(Arc::new(config), args.fresh, cancel).await?;

    if stats.records_failed() > 0 {
        warn!(
            failed = stats.records_failed(),
            "some records could not be harvested"
        );
    }
    Ok(())
}

fn clean_stage(output: &Path, args: &CleanArgs) -> Result<()> {
    let config = CleanConfig {
        min_bytes: args.min_bytes,
        confidence_threshold: args.confidence_threshold,
        strict_classifier: args.strict_classifier,
        ..CleanConfig::default()
    };

    info!("cleaning starting");
    let report = run_clean(output, &config, &FixedClassifier::accept_all())?;

    if let Some(path) = &args.report {
        let json = serde_json::to_vec_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("writing cleaning report to {}", path.display()))?;
        info!(path = %path.display(), "cleaning report written");
    }
    Ok(())
}

fn reorganize_stage(output: &Path, args: &ReorganizeArgs) -> Result<()> {
    info!("reorganization starting");
    let summary = run_reorganize(output, &args.dest)?;
    info!(
        records = summary.record_count,
        images = summary.image_count,
        "dataset ready"
    );
    Ok(())
}
