#![allow(clippy::too_many_lines)]

use std::process;

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use kmtricks::cli::{Cli, Command, CountArgs, FormatArgs, MergeArgs, PipelineArgs, RepartArgs, SuperkArgs};
use kmtricks::config::RunConfig;
use kmtricks::error::KmtricksError;
use kmtricks::partition_map::PartitionPolicy;
use kmtricks::pipeline;

/// Default abundance ceiling for stages that don't expose their own
/// `--max-c` flag (only `repart` and `pipeline` need one up front; the
/// others load it back from the persisted run config or their own flag).
const DEFAULT_MAX_C: u32 = 255;
const DEFAULT_ABUNDANCE_MIN: u32 = 1;

fn init_tracing(verbose: u8) {
    let default_directive = match verbose {
        0 => "kmtricks=warn",
        1 => "kmtricks=info",
        2 => "kmtricks=debug",
        _ => "kmtricks=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)))
        .init();
}

fn resolved_threads(threads: Option<usize>) -> usize {
    threads.unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()))
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    rayon::ThreadPoolBuilder::new()
        .num_threads(resolved_threads(cli.threads))
        .build_global()
        .unwrap_or_else(|e| {
            eprintln!("{}: {e}", "warning".yellow().bold());
        });

    let result = match cli.command {
        Command::Repart(args) => run_repart(args, cli.threads, cli.ram_budget_mb),
        Command::Superk(args) => run_superk(args),
        Command::Count(args) => run_count(args),
        Command::Merge(args) => run_merge(args),
        Command::Format(args) => run_format(args),
        Command::Pipeline(args) => run_pipeline(args, cli.threads, cli.ram_budget_mb),
    };

    if let Err(e) = result {
        eprintln!("{}\n {}", "error:".red().bold(), e.to_string().red());
        process::exit(1);
    }
}

fn run_repart(args: RepartArgs, threads: Option<usize>, ram_budget_mb: u64) -> Result<(), KmtricksError> {
    let config = RunConfig::new(
        &args.run_dir,
        &args.fof,
        args.k,
        args.m,
        args.partitions,
        DEFAULT_MAX_C,
        resolved_threads(threads),
        ram_budget_mb,
        args.hash.into(),
        args.hash_seed,
        args.policy.into(),
        false,
        DEFAULT_ABUNDANCE_MIN,
    )?;
    pipeline::repart(&config)
}

fn run_superk(args: SuperkArgs) -> Result<(), KmtricksError> {
    let mut config = RunConfig::load(&args.run_dir)?;
    config.compress = args.compress;
    pipeline::superk(&config, &args.sample).map(|_| ())
}

fn run_count(args: CountArgs) -> Result<(), KmtricksError> {
    let config = RunConfig::load(&args.run_dir)?;
    pipeline::count(&config, &args.sample, args.partition, args.mode, args.abundance_min, args.max_c, args.histogram)
        .map(|_| ())
}

fn run_merge(args: MergeArgs) -> Result<(), KmtricksError> {
    let config = RunConfig::load(&args.run_dir)?;
    pipeline::merge(&config, args.partition, args.format, args.recurrence_min, args.share_min)
}

fn run_format(args: FormatArgs) -> Result<(), KmtricksError> {
    let config = RunConfig::load(&args.run_dir)?;
    pipeline::format_stage(&config, &args.sample)
}

fn run_pipeline(args: PipelineArgs, threads: Option<usize>, ram_budget_mb: u64) -> Result<(), KmtricksError> {
    let config = RunConfig::new(
        &args.run_dir,
        &args.fof,
        args.k,
        args.m,
        args.partitions,
        args.max_c,
        resolved_threads(threads),
        ram_budget_mb,
        kmtricks::hasher::HashKind::Fx,
        0,
        PartitionPolicy::Unordered,
        args.compress,
        args.abundance_min,
    )?;
    pipeline::run_all(&config, args.matrix_format, args.recurrence_min, 0.0)
}
