//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use pawprint_core::{DEFAULT_MAX_PAGES, DEFAULT_RATE_LIMIT_MS};

/// Harvest, clean, and reorganize an image dataset from an upstream
/// adoption catalog.
#[derive(Parser, Debug)]
#[command(name = "pawprint")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Root directory for harvested data and checkpoints
    #[arg(short = 'o', long, global = true, default_value = "harvested")]
    pub output: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl the catalog and download record images (resumable)
    Harvest(HarvestArgs),
    /// Filter the harvested images (size, dimensions, duplicates, subject)
    Clean(CleanArgs),
    /// Lay out the cleaned dataset as a deterministic final tree
    Reorganize(ReorganizeArgs),
    /// Harvest, clean, and reorganize in one pass
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
pub struct HarvestArgs {
    /// Discard the existing checkpoint and start over
    #[arg(long)]
    pub fresh: bool,

    /// Stop after discovering this many records
    #[arg(long)]
    pub target_records: Option<u64>,

    /// Stop once this many images are on disk
    #[arg(long)]
    pub target_images: Option<u64>,

    /// Maximum listing pages to walk this run (1-10000)
    #[arg(long, default_value_t = DEFAULT_MAX_PAGES, value_parser = clap::value_parser!(u32).range(1..=10_000))]
    pub max_pages: u32,

    /// Maximum concurrent record harvests (1-100)
    #[arg(short = 'c', long, default_value_t = 4, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: u8,

    /// Maximum attempts per request for transient failures (1-10)
    #[arg(short = 'r', long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_attempts: u8,

    /// Minimum delay between requests to the same domain in milliseconds (0 to disable, max 60000)
    #[arg(short = 'l', long, default_value_t = DEFAULT_RATE_LIMIT_MS, value_parser = clap::value_parser!(u64).range(0..=60_000))]
    pub rate_limit: u64,
}

#[derive(clap::Args, Debug)]
pub struct CleanArgs {
    /// Minimum file size in bytes
    #[arg(long, default_value_t = 5000)]
    pub min_bytes: u64,

    /// Minimum confidence for the subject classifier (0.0-1.0)
    #[arg(long, default_value_t = 0.3)]
    pub confidence_threshold: f32,

    /// Reject images the classifier cannot reach a verdict on
    #[arg(long)]
    pub strict_classifier: bool,

    /// Write the cleaning report as JSON to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct ReorganizeArgs {
    /// Destination directory for the final dataset tree
    #[arg(short = 'd', long, default_value = "dataset")]
    pub dest: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub harvest: HarvestArgs,

    #[command(flatten)]
    pub clean: CleanArgs,

    #[command(flatten)]
    pub reorganize: ReorganizeArgs,
}
