//! Run configuration: validated once at startup, persisted to the run
//! directory, and threaded through every stage as an explicit context
//! object (rather than a global registry/singleton).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::count::CountWidth;
use crate::error::KmtricksError;
use crate::hasher::HashKind;
use crate::kmer::validate_km;
use crate::partition_map::PartitionPolicy;

/// All run-wide parameters, validated eagerly so a bad `k`/`m`/`P` fails
/// before any stage starts rather than partway through.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub run_dir: PathBuf,
    pub fof_path: PathBuf,
    pub k: usize,
    pub m: usize,
    pub num_partitions: u32,
    pub max_c: u32,
    pub threads: usize,
    pub ram_budget_mb: u64,
    pub hash_kind: HashKind,
    pub hash_seed: u64,
    pub partition_policy: PartitionPolicy,
    pub compress: bool,
    pub abundance_min: u32,
}

impl RunConfig {
    /// Validates and builds a `RunConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`KmtricksError::Config`] if `k`/`m` are out of range, or if
    /// `num_partitions`, `threads`, or `max_c` is zero.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_dir: impl Into<PathBuf>,
        fof_path: impl Into<PathBuf>,
        k: usize,
        m: usize,
        num_partitions: u32,
        max_c: u32,
        threads: usize,
        ram_budget_mb: u64,
        hash_kind: HashKind,
        hash_seed: u64,
        partition_policy: PartitionPolicy,
        compress: bool,
        abundance_min: u32,
    ) -> Result<Self, KmtricksError> {
        validate_km(k, m)?;
        if num_partitions == 0 {
            return Err(KmtricksError::config("num_partitions must be > 0"));
        }
        if threads == 0 {
            return Err(KmtricksError::config("threads must be > 0"));
        }
        if max_c == 0 {
            return Err(KmtricksError::config("max_c must be > 0"));
        }
        Ok(Self {
            run_dir: run_dir.into(),
            fof_path: fof_path.into(),
            k,
            m,
            num_partitions,
            max_c,
            threads,
            ram_budget_mb,
            hash_kind,
            hash_seed,
            partition_policy,
            compress,
            abundance_min,
        })
    }

    #[must_use]
    pub const fn count_width(&self) -> CountWidth {
        CountWidth::for_max_c(self.max_c)
    }

    /// Per-worker RAM budget in megabytes: the global budget divided
    /// across the thread pool.
    #[must_use]
    pub fn per_worker_ram_budget_mb(&self) -> u64 {
        (self.ram_budget_mb / self.threads as u64).max(1)
    }

    /// Writes `config/options.txt` under the run directory: one
    /// `key=value` line per field, in the teacher's plain-text manifest
    /// style (matches the File-of-Files format rather than a serde
    /// format, since this file is meant to be human-readable and diffable
    /// across runs).
    ///
    /// # Errors
    ///
    /// Returns [`KmtricksError::Io`] if the directory or file cannot be
    /// written.
    pub fn persist(&self) -> Result<(), KmtricksError> {
        let config_dir = self.run_dir.join("config");
        fs::create_dir_all(&config_dir).map_err(|e| KmtricksError::io(e, config_dir.clone()))?;
        let path = config_dir.join("options.txt");
        let partition_policy = match self.partition_policy {
            PartitionPolicy::Unordered => "unordered",
            PartitionPolicy::Ordered => "ordered",
        };
        let body = format!(
            "fof={}\nk={}\nm={}\nnum_partitions={}\nmax_c={}\nthreads={}\nram_budget_mb={}\nhash_kind={}\nhash_seed={}\npartition_policy={}\ncompress={}\nabundance_min={}\n",
            self.fof_path.display(),
            self.k,
            self.m,
            self.num_partitions,
            self.max_c,
            self.threads,
            self.ram_budget_mb,
            self.hash_kind.as_str(),
            self.hash_seed,
            partition_policy,
            self.compress,
            self.abundance_min,
        );
        fs::write(&path, body).map_err(|e| KmtricksError::io(e, path))
    }

    /// Reads back a `config/options.txt` written by [`Self::persist`].
    ///
    /// # Errors
    ///
    /// Returns [`KmtricksError::Io`] if the file cannot be read, or
    /// [`KmtricksError::Format`] if a required field is missing or
    /// malformed.
    pub fn load(run_dir: impl Into<PathBuf>) -> Result<Self, KmtricksError> {
        let run_dir = run_dir.into();
        let path = run_dir.join("config").join("options.txt");
        let text = fs::read_to_string(&path).map_err(|e| KmtricksError::io(e, path.clone()))?;

        let mut fields: HashMap<&str, &str> = HashMap::new();
        for line in text.lines() {
            if let Some((key, value)) = line.split_once('=') {
                fields.insert(key, value);
            }
        }

        let field = |key: &str| -> Result<&str, KmtricksError> {
            fields
                .get(key)
                .copied()
                .ok_or_else(|| KmtricksError::format(format!("missing field '{key}'"), path.clone()))
        };
        let parse = |key: &str| -> Result<u64, KmtricksError> {
            field(key)?
                .parse()
                .map_err(|_| KmtricksError::format(format!("bad value for '{key}'"), path.clone()))
        };

        let partition_policy = match field("partition_policy")? {
            "unordered" => PartitionPolicy::Unordered,
            "ordered" => PartitionPolicy::Ordered,
            other => {
                return Err(KmtricksError::format(
                    format!("unknown partition_policy '{other}'"),
                    path,
                ))
            }
        };
        let hash_kind: HashKind = field("hash_kind")?.parse()?;

        Self::new(
            run_dir,
            field("fof")?,
            parse("k")? as usize,
            parse("m")? as usize,
            parse("num_partitions")? as u32,
            parse("max_c")? as u32,
            parse("threads")? as usize,
            parse("ram_budget_mb")?,
            hash_kind,
            parse("hash_seed")?,
            partition_policy,
            field("compress")? == "true",
            parse("abundance_min")? as u32,
        )
    }

    #[must_use]
    pub fn superkmers_dir(&self, sample_id: &str) -> PathBuf {
        self.run_dir.join("superkmers").join(sample_id)
    }

    #[must_use]
    pub fn counts_dir(&self, partition: u32) -> PathBuf {
        self.run_dir.join("counts").join(format!("partition_{partition}"))
    }

    #[must_use]
    pub fn matrices_dir(&self) -> PathBuf {
        self.run_dir.join("matrices")
    }

    #[must_use]
    pub fn filters_dir(&self) -> PathBuf {
        self.run_dir.join("filters")
    }

    #[must_use]
    pub fn histograms_dir(&self) -> PathBuf {
        self.run_dir.join("histograms")
    }

    #[must_use]
    pub fn repartition_dir(&self) -> PathBuf {
        self.run_dir.join("repartition")
    }

    #[must_use]
    pub fn minimizers_dir(&self) -> PathBuf {
        self.run_dir.join("minimizers")
    }
}
