use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use epidiv::run::{self, MetricKind, NullJob, ScoreJob};

#[derive(Parser)]
#[command(
    name = "epidiv",
    version,
    about = "Per-interval divergence scoring of chromatin-state annotations \
             against a genome-wide background"
)]
struct Cli {
    /// Increase logging verbosity (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Score observed intervals, writing observation and per-state score records
    Score {
        /// Tab-delimited observations, one line per genomic interval
        /// (start, end, then the tallies or pair ids for each group)
        infile: PathBuf,
        /// 1 = states, 2 = state pairs, 3 = state pairs per epigenome pair
        #[arg(value_parser = parse_metric)]
        metric: MetricKind,
        /// Total number of sites observed genome-wide
        #[arg(value_parser = clap::value_parser!(u32).range(1..))]
        n_sites: u32,
        /// Genome-wide background tallies for group 1
        background: PathBuf,
        /// Output: per-interval observation records
        obs_out: PathBuf,
        /// Output: per-interval per-state score contributions
        scores_out: PathBuf,
        /// Chromosome label echoed into both outputs
        chrom: String,
        /// Background tallies for a second epigenome group; when present the
        /// metric quantifies the difference between the two groups
        background2: Option<PathBuf>,
    },
    /// Compute the scalar metric for pre-permuted input, building a null
    /// distribution for downstream significance estimates
    Null {
        /// Tab-delimited permuted observations, one line per interval
        /// (no coordinate columns)
        infile: PathBuf,
        /// 1 = states, 2 = state pairs, 3 = state pairs per epigenome pair
        #[arg(value_parser = parse_metric)]
        metric: MetricKind,
        /// Total number of sites observed genome-wide
        #[arg(value_parser = clap::value_parser!(u32).range(1..))]
        n_sites: u32,
        /// Genome-wide background tallies for group 1
        background1: PathBuf,
        /// Genome-wide background tallies for group 2
        background2: PathBuf,
        /// Output: one metric value per input line
        nulls_out: PathBuf,
    },
}

fn parse_metric(value: &str) -> Result<MetricKind, String> {
    value
        .parse::<u32>()
        .ok()
        .and_then(MetricKind::from_selector)
        .ok_or_else(|| {
            format!(
                "invalid metric \"{}\"; the valid options are 1 (states), \
                 2 (state pairs), and 3 (state pairs per epigenome pair)",
                value
            )
        })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Command::Score {
            infile,
            metric,
            n_sites,
            background,
            obs_out,
            scores_out,
            chrom,
            background2,
        } => run::run_score(&ScoreJob {
            infile,
            metric,
            n_sites,
            background1: background,
            background2,
            obs_out,
            scores_out,
            chrom,
        }),
        Command::Null {
            infile,
            metric,
            n_sites,
            background1,
            background2,
            nulls_out,
        } => run::run_null(&NullJob {
            infile,
            metric,
            n_sites,
            background1,
            background2,
            nulls_out,
        }),
    }
}
