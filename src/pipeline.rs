//! Stage orchestration: wires the partition map, super-k-mer splitting,
//! per-partition counting, cross-sample merging, and Bloom assembly into
//! one run, driven by [`crate::config::RunConfig`].
//!
//! Each stage is also independently callable (so the `repart`/`superk`/
//! `count`/`merge`/`format` subcommands can run a single stage), with
//! [`run_all`] chaining them in order the way the `pipeline` subcommand
//! does. Task fan-out (one task per `(sample, partition)` for counting,
//! one per partition for merging) uses `rayon`; a fatal error in any task
//! fails that stage, letting already-running sibling tasks finish rather
//! than aborting the process.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{info, info_span};

use crate::bloom;
use crate::cli::{CountMode, MatrixFormat};
use crate::config::RunConfig;
use crate::count::CountSlot;
use crate::counter::{
    self, build_vector, choose_strategy, count_kmers, count_kmers_to_hashes, filter_and_saturate_hashes,
    filter_and_saturate_kmers, BitVector,
};
use crate::error::KmtricksError;
use crate::format::SequenceFormat;
use crate::hasher::hash_kmer;
use crate::histogram::Histogram;
use crate::kmer::Kmer;
use crate::merger::{format_count_row, format_pa_row, merge_partition, merge_vectors_bf, merge_vectors_bfc, merge_vectors_bft, MergePolicy};
use crate::partition_map::{write_minimizers_file, PartitionMap, DEFAULT_MINIMIZER};
use crate::rundir::{FileOfFiles, HashInfo, RunMetadata, FOF_FILE_NAME};
use crate::sequences;
use crate::superk::{read_superk_file, split_sequence, SuperkBinInfo, SuperkWriter, SuperKmerBinInfoFile, DEFAULT_BLOCK_CAPACITY};

/// Bytes a dense hash-map counting entry costs, used to pick between
/// [`crate::counter::CountingStrategy`] variants from the RAM budget.
const DENSE_MAP_BYTES_PER_ENTRY: u64 = 64;

fn partition_map_path(config: &RunConfig) -> PathBuf {
    config.repartition_dir().join("map.bin")
}

fn superk_path(config: &RunConfig, sample_id: &str, partition: u32) -> PathBuf {
    config.superkmers_dir(sample_id).join(partition.to_string())
}

fn superk_manifest_path(config: &RunConfig, sample_id: &str) -> PathBuf {
    config.superkmers_dir(sample_id).join("manifest.json")
}

fn count_path(config: &RunConfig, sample_id: &str, partition: u32, mode: CountMode) -> PathBuf {
    let ext = match mode {
        CountMode::Kmer => "kmer",
        CountMode::Hash => "hash",
        CountMode::Vector => "vec",
    };
    config.counts_dir(partition).join(format!("{sample_id}.{ext}"))
}

fn histogram_path(config: &RunConfig, sample_id: &str) -> PathBuf {
    config.histograms_dir().join(format!("{sample_id}.hist"))
}

fn matrix_path(config: &RunConfig, partition: u32, format: MatrixFormat) -> PathBuf {
    let ext = match format {
        MatrixFormat::Count => "count",
        MatrixFormat::Pa => "pa",
        MatrixFormat::Bf => "bf",
        MatrixFormat::Bfc => "bfc",
        MatrixFormat::Bft => "bft",
    };
    config.matrices_dir().join(format!("matrix_{partition}.{ext}"))
}

fn filter_path(config: &RunConfig, sample_id: &str) -> PathBuf {
    config.filters_dir().join(format!("{sample_id}.bf"))
}

fn load_fof(config: &RunConfig) -> Result<FileOfFiles, KmtricksError> {
    FileOfFiles::load(&config.fof_path)
}

/// Every partition a run can produce files for: the `num_partitions`
/// content-addressed partitions plus the dedicated overflow partition
/// ([`DEFAULT_MINIMIZER`]) that k-mers with no allowed minimizer route to.
fn partition_universe(config: &RunConfig) -> Vec<u32> {
    (0..config.num_partitions).chain(std::iter::once(DEFAULT_MINIMIZER)).collect()
}

/// Builds the partition map from a frequency sample of the run's inputs
/// and persists it, along with `hash.info`, `config/options.txt`, a copy
/// of the input FoF, run metadata, and the per-partition minimizer lists,
/// under the run directory.
///
/// # Errors
///
/// Returns [`KmtricksError`] if the FoF can't be read, any sample file
/// can't be parsed, or any of the above can't be written.
pub fn repart(config: &RunConfig) -> Result<(), KmtricksError> {
    let _span = info_span!("repart", k = config.k, m = config.m, partitions = config.num_partitions).entered();
    config.persist()?;

    fs::create_dir_all(&config.run_dir).map_err(|e| KmtricksError::io(e, config.run_dir.clone()))?;
    let fof_copy_path = config.run_dir.join(FOF_FILE_NAME);
    fs::copy(&config.fof_path, &fof_copy_path).map_err(|e| KmtricksError::io(e, fof_copy_path))?;

    let started_at_unix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    let command_line = std::env::args().collect::<Vec<_>>().join(" ");
    RunMetadata::new(started_at_unix, command_line, config.threads).persist(&config.run_dir)?;

    let fof = load_fof(config)?;
    let mut frequencies: HashMap<u64, u64> = HashMap::new();
    for sample in &fof.samples {
        let seqs = sequences::read_sample(&sample.paths, SequenceFormat::Auto)?;
        for seq in &seqs {
            if seq.len() < config.k {
                continue;
            }
            for start in 0..=(seq.len() - config.k) {
                let window = &seq[start..start + config.k];
                let Ok(kmer) = Kmer::encode(window, config.k) else { continue };
                if let Some((mmer, _)) = kmer.minimizer(config.m) {
                    let addr = mmer.words()[mmer.words().len() - 1];
                    *frequencies.entry(addr).or_insert(0) += 1;
                }
            }
        }
    }

    let pmap = PartitionMap::build(config.m, config.num_partitions, &frequencies, config.partition_policy)?;
    let dir = config.repartition_dir();
    fs::create_dir_all(&dir).map_err(|e| KmtricksError::io(e, dir.clone()))?;
    let path = partition_map_path(config);
    let file = File::create(&path).map_err(|e| KmtricksError::io(e, path.clone()))?;
    pmap.serialize(BufWriter::new(file), &path)?;

    write_minimizer_lists(config, &pmap, &frequencies)?;

    HashInfo::compute(config.num_partitions).write(&config.run_dir)?;
    info!("repart complete, {} distinct minimizers sampled", frequencies.len());
    Ok(())
}

/// Groups the sampled minimizer addresses by routed partition and writes
/// one `minimizers/minimizers.<p>` file per non-empty partition.
fn write_minimizer_lists(config: &RunConfig, pmap: &PartitionMap, frequencies: &HashMap<u64, u64>) -> Result<(), KmtricksError> {
    let mut by_partition: HashMap<u32, Vec<u64>> = HashMap::new();
    for &addr in frequencies.keys() {
        by_partition.entry(pmap.partition_of_address(addr)).or_default().push(addr);
    }

    let dir = config.minimizers_dir();
    fs::create_dir_all(&dir).map_err(|e| KmtricksError::io(e, dir.clone()))?;
    for (partition, mut addresses) in by_partition {
        addresses.sort_unstable();
        let path = dir.join(format!("minimizers.{partition}"));
        let file = File::create(&path).map_err(|e| KmtricksError::io(e, path.clone()))?;
        write_minimizers_file(BufWriter::new(file), &addresses, &path)?;
    }
    Ok(())
}

fn load_partition_map(config: &RunConfig) -> Result<PartitionMap, KmtricksError> {
    let path = partition_map_path(config);
    let file = File::open(&path).map_err(|e| KmtricksError::io(e, path.clone()))?;
    PartitionMap::deserialize(file, &path)
}

/// Splits one sample's sequences into per-partition super-k-mer files.
///
/// # Errors
///
/// Returns [`KmtricksError`] if the sample is unknown, its input files
/// can't be read, or any partition file can't be written.
pub fn superk(config: &RunConfig, sample_id: &str) -> Result<SuperKmerBinInfoFile, KmtricksError> {
    let _span = info_span!("superk", sample = sample_id).entered();
    let fof = load_fof(config)?;
    let sample = fof
        .samples
        .iter()
        .find(|s| s.id == sample_id)
        .ok_or_else(|| KmtricksError::config(format!("unknown sample '{sample_id}'")))?;
    let pmap = load_partition_map(config)?;
    let seqs = sequences::read_sample(&sample.paths, SequenceFormat::Auto)?;

    let dir = config.superkmers_dir(sample_id);
    fs::create_dir_all(&dir).map_err(|e| KmtricksError::io(e, dir.clone()))?;

    let mut writers: HashMap<u32, SuperkWriter<BufWriter<File>>> = HashMap::new();
    let mut runs_by_partition: HashMap<u32, Vec<_>> = HashMap::new();
    for seq in &seqs {
        for (partition, superkmer) in split_sequence(seq, config.k, config.m, &pmap) {
            runs_by_partition.entry(partition).or_default().push(superkmer);
        }
    }

    let mut manifest = SuperKmerBinInfoFile::default();
    for (partition, runs) in runs_by_partition {
        let path = superk_path(config, sample_id, partition);
        let file = File::create(&path).map_err(|e| KmtricksError::io(e, path.clone()))?;
        let writer = writers
            .entry(partition)
            .or_insert_with(|| SuperkWriter::new(BufWriter::new(file), DEFAULT_BLOCK_CAPACITY, config.compress));
        for superkmer in &runs {
            writer.push(superkmer, &path)?;
        }
    }
    for (partition, writer) in writers {
        let path = superk_path(config, sample_id, partition);
        let (kmer_count, byte_size) = writer.finish(&path)?;
        manifest.entries.push(SuperkBinInfo {
            partition,
            kmer_count,
            byte_size,
        });
    }

    let manifest_path = superk_manifest_path(config, sample_id);
    let json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| KmtricksError::format(format!("serializing superk manifest: {e}"), manifest_path.clone()))?;
    fs::write(&manifest_path, json).map_err(|e| KmtricksError::io(e, manifest_path))?;

    info!("split {} sequences into {} partitions", seqs.len(), manifest.entries.len());
    Ok(manifest)
}

/// One count task's summary, surfaced for logging/progress.
#[derive(Debug, Clone, Copy)]
pub struct CountSummary {
    pub surviving: usize,
    pub distinct: usize,
}

/// Counts one sample's k-mers in one partition, filters and saturates
/// them, optionally accumulates a histogram, and writes the chosen output
/// mode.
///
/// # Errors
///
/// Returns [`KmtricksError`] if the super-k-mer file is missing/corrupt,
/// or the output file can't be written.
#[allow(clippy::too_many_arguments)]
pub fn count(
    config: &RunConfig,
    sample_id: &str,
    partition: u32,
    mode: CountMode,
    abundance_min: u32,
    max_c: u32,
    want_histogram: bool,
) -> Result<CountSummary, KmtricksError> {
    let _span = info_span!("count", sample = sample_id, partition).entered();
    let superk_file = superk_path(config, sample_id, partition);
    if !superk_file.exists() {
        // This sample routed no super-k-mer to this partition at all; merge
        // and format already treat a missing count file as all-zero.
        return Ok(CountSummary { surviving: 0, distinct: 0 });
    }
    let file = File::open(&superk_file).map_err(|e| KmtricksError::io(e, superk_file.clone()))?;
    let superkmers = read_superk_file(file, config.k, &superk_file)?;

    let manifest_path = superk_manifest_path(config, sample_id);
    let estimated = fs::read_to_string(&manifest_path)
        .ok()
        .and_then(|s| serde_json::from_str::<SuperKmerBinInfoFile>(&s).ok())
        .map_or(0, |m| m.kmer_count_for(partition));
    let strategy = choose_strategy(estimated, config.per_worker_ram_budget_mb() * 1024 * 1024, DENSE_MAP_BYTES_PER_ENTRY);

    let counts = count_kmers(&superkmers, config.k, strategy);
    let distinct = counts.len();

    let mut histogram = want_histogram.then(|| Histogram::new(crate::histogram::DEFAULT_LOWER, crate::histogram::DEFAULT_UPPER));

    let dir = config.counts_dir(partition);
    fs::create_dir_all(&dir).map_err(|e| KmtricksError::io(e, dir.clone()))?;
    let out_path = count_path(config, sample_id, partition, mode);
    let out_file = File::create(&out_path).map_err(|e| KmtricksError::io(e, out_path.clone()))?;

    let surviving = match mode {
        CountMode::Kmer => {
            let entries = filter_and_saturate_kmers(&counts, abundance_min, max_c, histogram.as_mut());
            let n = entries.len();
            counter::write_kmer_count_file(BufWriter::new(out_file), &entries, config.count_width(), config.compress, &out_path)?;
            n
        }
        CountMode::Hash => {
            let hash_counts = count_kmers_to_hashes(&counts, config.hash_seed, config.hash_kind, partition, config.num_partitions);
            let entries = filter_and_saturate_hashes(&hash_counts, abundance_min, max_c, histogram.as_mut());
            let n = entries.len();
            counter::write_hash_count_file(BufWriter::new(out_file), &entries, &out_path)?;
            n
        }
        CountMode::Vector => {
            let window = HashInfo::read(&config.run_dir)?.window;
            let hash_counts = count_kmers_to_hashes(&counts, config.hash_seed, config.hash_kind, partition, config.num_partitions);
            let entries = filter_and_saturate_hashes(&hash_counts, abundance_min, max_c, histogram.as_mut());
            let n = entries.len();
            let vector = build_vector(&entries, partition, config.num_partitions, window);
            counter::write_vector_file(BufWriter::new(out_file), &vector, &out_path)?;
            n
        }
    };

    if let Some(histogram) = histogram {
        let hist_dir = config.histograms_dir();
        fs::create_dir_all(&hist_dir).map_err(|e| KmtricksError::io(e, hist_dir.clone()))?;
        let hist_path = histogram_path(config, sample_id);
        let json = serde_json::to_string(&histogram)
            .map_err(|e| KmtricksError::format(format!("serializing histogram: {e}"), hist_path.clone()))?;
        fs::write(&hist_path, json).map_err(|e| KmtricksError::io(e, hist_path))?;
    }

    Ok(CountSummary { surviving, distinct })
}

fn kmer_for_hash_unsupported() -> KmtricksError {
    KmtricksError::config("count mode produced a key type incompatible with the requested matrix format")
}

/// Merges one partition's per-sample count files into a matrix row file.
///
/// # Errors
///
/// Returns [`KmtricksError`] if a sample's count file is missing/corrupt
/// or the matrix file can't be written.
pub fn merge(config: &RunConfig, partition: u32, format: MatrixFormat, recurrence_min: u32, share_min: f64) -> Result<(), KmtricksError> {
    let _span = info_span!("merge", partition, format = ?format).entered();
    let fof = load_fof(config)?;
    let num_samples = fof.len();
    let policy = MergePolicy::new(vec![config.abundance_min; num_samples], recurrence_min, share_min);

    fs::create_dir_all(config.matrices_dir()).map_err(|e| KmtricksError::io(e, config.matrices_dir()))?;
    let out_path = matrix_path(config, partition, format);
    let out_file = File::create(&out_path).map_err(|e| KmtricksError::io(e, out_path.clone()))?;
    let mut writer = BufWriter::new(out_file);

    match format {
        MatrixFormat::Count | MatrixFormat::Pa => {
            let mode = CountMode::Kmer;
            let mut per_sample = Vec::with_capacity(num_samples);
            for sample in &fof.samples {
                let path = count_path(config, &sample.id, partition, mode);
                let entries = if path.exists() {
                    let file = File::open(&path).map_err(|e| KmtricksError::io(e, path.clone()))?;
                    counter::read_kmer_count_file(file, config.count_width(), &path)?
                } else {
                    Vec::new()
                };
                per_sample.push(entries);
            }
            let rows = merge_partition(&per_sample, &policy);
            use std::io::Write as _;
            for (_, row) in &rows {
                let bytes = match format {
                    MatrixFormat::Count => format_count_row(row, config.count_width()),
                    MatrixFormat::Pa => format_pa_row(row),
                    _ => return Err(kmer_for_hash_unsupported()),
                };
                writer.write_all(&bytes).map_err(|e| KmtricksError::io(e, out_path.clone()))?;
            }
        }
        MatrixFormat::Bf | MatrixFormat::Bfc | MatrixFormat::Bft => {
            let mut vectors = Vec::with_capacity(num_samples);
            for sample in &fof.samples {
                let path = count_path(config, &sample.id, partition, CountMode::Vector);
                if path.exists() {
                    let file = File::open(&path).map_err(|e| KmtricksError::io(e, path.clone()))?;
                    vectors.push(counter::read_vector_file(file, &path)?);
                }
            }
            if vectors.is_empty() {
                return Ok(());
            }
            use std::io::Write as _;
            match format {
                MatrixFormat::Bf => {
                    let merged = merge_vectors_bf(&vectors);
                    writer.write_all(merged.as_bytes()).map_err(|e| KmtricksError::io(e, out_path.clone()))?;
                }
                MatrixFormat::Bfc => {
                    let counts = merge_vectors_bfc(&vectors);
                    writer.write_all(&counts).map_err(|e| KmtricksError::io(e, out_path.clone()))?;
                }
                MatrixFormat::Bft => {
                    let merged = merge_vectors_bft(&vectors, recurrence_min);
                    writer.write_all(merged.as_bytes()).map_err(|e| KmtricksError::io(e, out_path.clone()))?;
                }
                _ => unreachable!(),
            }
        }
    }
    Ok(())
}

/// Assembles one sample's Bloom filter from its vector-mode partition
/// files, in partition order.
///
/// # Errors
///
/// Returns [`KmtricksError`] if a partition's vector file is missing or
/// the filter can't be written.
pub fn format_stage(config: &RunConfig, sample_id: &str) -> Result<(), KmtricksError> {
    let _span = info_span!("format", sample = sample_id).entered();
    let window = HashInfo::read(&config.run_dir)?.window;
    let partitions = partition_universe(config);
    let mut vectors: Vec<BitVector> = Vec::with_capacity(partitions.len());
    for partition in partitions {
        let path = count_path(config, sample_id, partition, CountMode::Vector);
        if path.exists() {
            let file = File::open(&path).map_err(|e| KmtricksError::io(e, path.clone()))?;
            vectors.push(counter::read_vector_file(file, &path)?);
        } else {
            vectors.push(BitVector::zeros(window));
        }
    }
    let dir = config.filters_dir();
    fs::create_dir_all(&dir).map_err(|e| KmtricksError::io(e, dir.clone()))?;
    let path = filter_path(config, sample_id);
    let mut file = std::io::Cursor::new(Vec::new());
    bloom::assemble(&mut file, &vectors, &path)?;
    fs::write(&path, file.into_inner()).map_err(|e| KmtricksError::io(e, path))
}

/// Runs `repart`, then `superk`/`count` per sample and partition (in
/// parallel across samples), then `merge` per partition (in parallel
/// across partitions), and finally `format` per sample when the matrix
/// format needs a Bloom filter.
///
/// # Errors
///
/// Returns the first fatal [`KmtricksError`] any stage's tasks hit.
pub fn run_all(
    config: &RunConfig,
    matrix_format: MatrixFormat,
    recurrence_min: u32,
    share_min: f64,
) -> Result<(), KmtricksError> {
    let _span = info_span!("pipeline").entered();
    repart(config)?;

    let fof = load_fof(config)?;
    let mode = match matrix_format {
        MatrixFormat::Count | MatrixFormat::Pa => CountMode::Kmer,
        MatrixFormat::Bf | MatrixFormat::Bfc | MatrixFormat::Bft => CountMode::Vector,
    };

    let manifests: Vec<SuperKmerBinInfoFile> = fof
        .samples
        .par_iter()
        .map(|sample| superk(config, &sample.id))
        .collect::<Result<Vec<_>, _>>()?;
    let _ = manifests;

    let partitions = partition_universe(config);

    fof.samples.par_iter().try_for_each(|sample| -> Result<(), KmtricksError> {
        partitions.par_iter().try_for_each(|&partition| {
            count(config, &sample.id, partition, mode, config.abundance_min, config.max_c, true).map(|_| ())
        })
    })?;

    partitions
        .par_iter()
        .try_for_each(|&partition| merge(config, partition, matrix_format, recurrence_min, share_min))?;

    if matches!(matrix_format, MatrixFormat::Bf | MatrixFormat::Bfc | MatrixFormat::Bft) {
        fof.samples
            .par_iter()
            .try_for_each(|sample| format_stage(config, &sample.id))?;
    }

    info!("pipeline complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::HashKind;
    use crate::partition_map::PartitionPolicy;
    use tempfile::tempdir;

    fn write_fasta(path: &Path, records: &[(&str, &str)]) {
        use std::io::Write as _;
        let mut f = File::create(path).unwrap();
        for (name, seq) in records {
            writeln!(f, ">{name}\n{seq}").unwrap();
        }
    }

    fn test_config(dir: &Path) -> RunConfig {
        RunConfig::new(
            dir,
            dir.join("samples.fof"),
            8,
            4,
            2,
            255,
            1,
            64,
            HashKind::Fx,
            0,
            PartitionPolicy::Ordered,
            false,
            1,
        )
        .unwrap()
    }

    #[test]
    fn full_pipeline_produces_count_matrix() {
        let dir = tempdir().unwrap();
        let fasta_a = dir.path().join("a.fa");
        let fasta_b = dir.path().join("b.fa");
        write_fasta(&fasta_a, &[("r1", "ACGTACGTACGT")]);
        write_fasta(&fasta_b, &[("r1", "ACGTACGTACGT")]);

        let fof_path = dir.path().join("samples.fof");
        fs::write(&fof_path, format!("a : {}\nb : {}\n", fasta_a.display(), fasta_b.display())).unwrap();

        let config = test_config(dir.path());
        run_all(&config, MatrixFormat::Count, 1, 0.0).unwrap();

        let any_matrix_nonempty = (0..config.num_partitions).any(|p| {
            let path = matrix_path(&config, p, MatrixFormat::Count);
            path.exists() && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false)
        });
        assert!(any_matrix_nonempty);
    }

    #[test]
    fn repart_and_superk_partition_every_kmer() {
        let dir = tempdir().unwrap();
        let fasta = dir.path().join("a.fa");
        write_fasta(&fasta, &[("r1", "ACGTACGTACGTACGT")]);
        let fof_path = dir.path().join("samples.fof");
        fs::write(&fof_path, format!("a : {}\n", fasta.display())).unwrap();

        let config = test_config(dir.path());
        repart(&config).unwrap();
        let manifest = superk(&config, "a").unwrap();
        let total: u64 = manifest.entries.iter().map(|e| e.kmer_count).sum();
        assert_eq!(total, 16 - 8 + 1);
    }
}
