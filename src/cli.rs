//! Command-line interface definition.
//!
//! One subcommand per pipeline stage (`repart`, `superk`, `count`,
//! `merge`, `format`), plus `pipeline` to drive all of them in order.
//! Global flags control the worker pool, memory budget, and log verbosity
//! regardless of which subcommand runs.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::hasher::HashKind;
use crate::partition_map::PartitionPolicy;

/// A parallel k-mer count matrix pipeline.
#[derive(Debug, Parser)]
#[command(name = "kmtricks", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Number of worker threads. Defaults to the available parallelism.
    #[arg(long, global = true)]
    pub threads: Option<usize>,

    /// Total RAM budget in megabytes, divided across the worker pool.
    #[arg(long, default_value_t = 4096, global = true)]
    pub ram_budget_mb: u64,

    /// Increase log verbosity; repeat for more detail (`-v`, `-vv`, `-vvv`).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build the partition map from a sample of the input.
    Repart(RepartArgs),
    /// Split one sample's sequences into super-k-mer partition files.
    Superk(SuperkArgs),
    /// Count k-mers (or hashes) for one sample across all partitions.
    Count(CountArgs),
    /// Merge one partition's per-sample count files into a matrix row file.
    Merge(MergeArgs),
    /// Assemble per-sample Bloom filters from vector-mode partitions.
    Format(FormatArgs),
    /// Run `repart`, `superk`, `count`, `merge`, and `format` in order.
    Pipeline(PipelineArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PartitionPolicyArg {
    Unordered,
    Ordered,
}

impl From<PartitionPolicyArg> for PartitionPolicy {
    fn from(value: PartitionPolicyArg) -> Self {
        match value {
            PartitionPolicyArg::Unordered => Self::Unordered,
            PartitionPolicyArg::Ordered => Self::Ordered,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum HashKindArg {
    Fx,
    Splitmix64,
    Wyhash,
}

impl From<HashKindArg> for HashKind {
    fn from(value: HashKindArg) -> Self {
        match value {
            HashKindArg::Fx => Self::Fx,
            HashKindArg::Splitmix64 => Self::SplitMix64,
            HashKindArg::Wyhash => Self::Wyhash,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum CountMode {
    Kmer,
    Hash,
    Vector,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum MatrixFormat {
    Count,
    Pa,
    Bf,
    Bfc,
    Bft,
}

#[derive(Debug, Parser)]
pub struct RepartArgs {
    /// Run directory to create/populate.
    #[arg(long)]
    pub run_dir: PathBuf,
    /// File-of-files listing input samples.
    #[arg(long)]
    pub fof: PathBuf,
    /// K-mer length.
    #[arg(long)]
    pub k: usize,
    /// Minimizer length.
    #[arg(long)]
    pub m: usize,
    /// Number of partitions.
    #[arg(long)]
    pub partitions: u32,
    #[arg(long, value_enum, default_value_t = PartitionPolicyArg::Unordered)]
    pub policy: PartitionPolicyArg,
    #[arg(long, value_enum, default_value_t = HashKindArg::Fx)]
    pub hash: HashKindArg,
    #[arg(long, default_value_t = 0)]
    pub hash_seed: u64,
    /// Fraction of sequences to sample when estimating minimizer frequency.
    #[arg(long, default_value_t = 0.1)]
    pub sample_fraction: f64,
}

#[derive(Debug, Parser)]
pub struct SuperkArgs {
    #[arg(long)]
    pub run_dir: PathBuf,
    /// Sample id to split (must appear in the run's FoF).
    #[arg(long)]
    pub sample: String,
    /// Compress super-k-mer blocks with LZ4.
    #[arg(long, default_value_t = false)]
    pub compress: bool,
}

#[derive(Debug, Parser)]
pub struct CountArgs {
    #[arg(long)]
    pub run_dir: PathBuf,
    #[arg(long)]
    pub sample: String,
    #[arg(long)]
    pub partition: u32,
    #[arg(long, value_enum, default_value_t = CountMode::Kmer)]
    pub mode: CountMode,
    /// Per-sample abundance floor; k-mers below this are dropped.
    #[arg(long, default_value_t = 1)]
    pub abundance_min: u32,
    /// Saturating ceiling for stored counts.
    #[arg(long, default_value_t = 255)]
    pub max_c: u32,
    /// Write a per-sample histogram alongside the count file.
    #[arg(long, default_value_t = false)]
    pub histogram: bool,
}

#[derive(Debug, Parser)]
pub struct MergeArgs {
    #[arg(long)]
    pub run_dir: PathBuf,
    #[arg(long)]
    pub partition: u32,
    #[arg(long, value_enum, default_value_t = MatrixFormat::Count)]
    pub format: MatrixFormat,
    /// Minimum number of samples that must be non-zero after soft
    /// thresholding for a row to survive.
    #[arg(long, default_value_t = 1)]
    pub recurrence_min: u32,
    /// Minimum fraction of samples that must be non-zero after soft
    /// thresholding for a row to survive.
    #[arg(long, default_value_t = 0.0)]
    pub share_min: f64,
}

#[derive(Debug, Parser)]
pub struct FormatArgs {
    #[arg(long)]
    pub run_dir: PathBuf,
    #[arg(long)]
    pub sample: String,
}

#[derive(Debug, Parser)]
pub struct PipelineArgs {
    #[arg(long)]
    pub run_dir: PathBuf,
    #[arg(long)]
    pub fof: PathBuf,
    #[arg(long)]
    pub k: usize,
    #[arg(long)]
    pub m: usize,
    #[arg(long)]
    pub partitions: u32,
    #[arg(long, default_value_t = 1)]
    pub abundance_min: u32,
    #[arg(long, default_value_t = 255)]
    pub max_c: u32,
    #[arg(long, value_enum, default_value_t = MatrixFormat::Count)]
    pub matrix_format: MatrixFormat,
    #[arg(long, default_value_t = 1)]
    pub recurrence_min: u32,
    #[arg(long, default_value_t = false)]
    pub compress: bool,
}
