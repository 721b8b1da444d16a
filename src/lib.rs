//! # kmtricks
//!
//! A parallel k-mer count matrix pipeline: build a minimizer-based
//! partition map from a sample of the input, split every sample's reads
//! into super-k-mers routed by partition, count and saturate k-mer (or
//! hash, or presence) abundances per partition, then merge each
//! partition's per-sample counts into a shared matrix row file. Samples
//! that need a Bloom filter instead of a raw matrix column get one
//! assembled from their vector-mode partitions.
//!
//! The five stages line up with the five subcommands in [`cli`]:
//! `repart`, `superk`, `count`, `merge`, `format`, orchestrated together
//! by [`pipeline::run_all`].

pub mod bloom;
pub mod cli;
pub mod codec;
pub mod config;
pub mod count;
pub mod counter;
pub mod error;
pub mod format;
pub mod format_file;
pub mod hasher;
pub mod histogram;
pub mod kmer;
pub mod merger;
pub mod partition_map;
pub mod pipeline;
pub mod rundir;
pub mod sequences;
pub mod superk;
