//! Run directory layout, the File-of-Files sample manifest, and run
//! metadata persistence.
//!
//! A run directory is the sole piece of global state a pipeline run
//! touches; every path convention below is relative to it, threaded
//! through explicitly via [`crate::config::RunConfig`] rather than looked
//! up through a singleton.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::KmtricksError;

pub const FOF_FILE_NAME: &str = "kmtricks.fof";
pub const HASH_INFO_FILE_NAME: &str = "hash.info";

/// One sample's entry in a File-of-Files: a stable id and one or more
/// input paths (e.g. paired-end reads).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleEntry {
    pub id: String,
    pub paths: Vec<PathBuf>,
}

/// The parsed File-of-Files manifest. FoF order fixes the sample index
/// used everywhere downstream (matrix columns, cursor arrays, etc.).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileOfFiles {
    pub samples: Vec<SampleEntry>,
}

impl FileOfFiles {
    /// Parses `id : path1 [; path2 ...]` lines. Blank lines and lines
    /// starting with `#` are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`KmtricksError::Config`] if a non-blank, non-comment line
    /// has no `:` separator, or if `id` is blank or repeated.
    pub fn parse(text: &str) -> Result<Self, KmtricksError> {
        let mut samples = Vec::new();
        let mut seen_ids = std::collections::HashSet::new();
        for (line_no, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (id, rest) = line.split_once(':').ok_or_else(|| {
                KmtricksError::config(format!("FoF line {}: missing ':' separator", line_no + 1))
            })?;
            let id = id.trim().to_string();
            if id.is_empty() {
                return Err(KmtricksError::config(format!(
                    "FoF line {}: empty sample id",
                    line_no + 1
                )));
            }
            if !seen_ids.insert(id.clone()) {
                return Err(KmtricksError::config(format!("duplicate sample id '{id}' in FoF")));
            }
            let paths = rest
                .split(';')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect::<Vec<_>>();
            if paths.is_empty() {
                return Err(KmtricksError::config(format!(
                    "FoF line {}: sample '{id}' has no input paths",
                    line_no + 1
                )));
            }
            samples.push(SampleEntry { id, paths });
        }
        Ok(Self { samples })
    }

    /// Reads and parses a FoF file from disk.
    ///
    /// # Errors
    ///
    /// Returns [`KmtricksError::Io`] if the file cannot be read, or
    /// whatever [`Self::parse`] returns for a malformed manifest.
    pub fn load(path: &Path) -> Result<Self, KmtricksError> {
        let text = fs::read_to_string(path).map_err(|e| KmtricksError::io(e, path.to_path_buf()))?;
        Self::parse(&text)
    }

    #[must_use]
    pub fn sample_index(&self, id: &str) -> Option<usize> {
        self.samples.iter().position(|s| s.id == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Hash window `W`, sized to cover `num_partitions` content partitions
/// plus one reserved slot for the overflow partition
/// (`crate::partition_map::DEFAULT_MINIMIZER`). Every partition's windowed
/// keys then live in `[slot*W, (slot+1)*W)` for `slot` in `0..=num_partitions`,
/// so hash/vector-mode counting never has to treat the overflow bucket as
/// a `num_partitions`-sized array index.
///
/// Uses true ceiling division rather than an unconditional `+1`: when
/// `u64::MAX` happens to divide evenly by the slot count, bumping the
/// window up anyway would make `(num_partitions + 1) * W` itself overflow
/// `u64` for every caller that reconstructs it.
#[must_use]
pub fn content_window(num_partitions: u32) -> u64 {
    let slots = u64::from(num_partitions.max(1)) + 1;
    let floor = u64::MAX / slots;
    if u64::MAX % slots == 0 {
        floor
    } else {
        floor + 1
    }
}

/// Hash window `W` and partition count `P`, persisted by `repart` so later
/// stages agree on the hash-mode window without recomputing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashInfo {
    pub window: u64,
    pub num_partitions: u32,
}

impl HashInfo {
    #[must_use]
    pub fn compute(num_partitions: u32) -> Self {
        let num_partitions = num_partitions.max(1);
        Self {
            window: content_window(num_partitions),
            num_partitions,
        }
    }

    /// Writes `hash.info` as two `key=value` lines.
    ///
    /// # Errors
    ///
    /// Returns [`KmtricksError::Io`] on a write failure.
    pub fn write(&self, run_dir: &Path) -> Result<(), KmtricksError> {
        let path = run_dir.join(HASH_INFO_FILE_NAME);
        let body = format!("window={}\nnum_partitions={}\n", self.window, self.num_partitions);
        fs::write(&path, body).map_err(|e| KmtricksError::io(e, path))
    }

    /// Reads back a `hash.info` written by [`Self::write`].
    ///
    /// # Errors
    ///
    /// Returns [`KmtricksError::Io`] if the file cannot be read, or
    /// [`KmtricksError::Format`] if a field is missing or malformed.
    pub fn read(run_dir: &Path) -> Result<Self, KmtricksError> {
        let path = run_dir.join(HASH_INFO_FILE_NAME);
        let text = fs::read_to_string(&path).map_err(|e| KmtricksError::io(e, path.clone()))?;
        let mut window = None;
        let mut num_partitions = None;
        for line in text.lines() {
            if let Some((key, value)) = line.split_once('=') {
                match key {
                    "window" => window = value.parse().ok(),
                    "num_partitions" => num_partitions = value.parse().ok(),
                    _ => {}
                }
            }
        }
        Ok(Self {
            window: window.ok_or_else(|| KmtricksError::format("missing 'window'", path.clone()))?,
            num_partitions: num_partitions
                .ok_or_else(|| KmtricksError::format("missing 'num_partitions'", path))?,
        })
    }
}

/// `build_infos.txt` / `run_infos.txt` content: crate version, the
/// run-start timestamp (passed in, never read from the system clock
/// inside library code, so behavior stays testable), the command line,
/// and the thread count used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub kmtricks_version: String,
    pub started_at_unix: u64,
    pub command_line: String,
    pub threads: usize,
}

impl RunMetadata {
    #[must_use]
    pub fn new(started_at_unix: u64, command_line: String, threads: usize) -> Self {
        Self {
            kmtricks_version: env!("CARGO_PKG_VERSION").to_string(),
            started_at_unix,
            command_line,
            threads,
        }
    }

    /// Writes `run_infos.txt` (this struct, JSON-encoded) and
    /// `build_infos.txt` (just the crate version) under `run_dir/config/`.
    ///
    /// # Errors
    ///
    /// Returns [`KmtricksError::Io`] if either file cannot be written, or
    /// [`KmtricksError::Format`] if JSON serialization fails.
    pub fn persist(&self, run_dir: &Path) -> Result<(), KmtricksError> {
        let config_dir = run_dir.join("config");
        fs::create_dir_all(&config_dir).map_err(|e| KmtricksError::io(e, config_dir.clone()))?;

        let run_infos_path = config_dir.join("run_infos.txt");
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| KmtricksError::format(format!("serializing run_infos: {e}"), run_infos_path.clone()))?;
        fs::write(&run_infos_path, json).map_err(|e| KmtricksError::io(e, run_infos_path))?;

        let build_infos_path = config_dir.join("build_infos.txt");
        fs::write(&build_infos_path, format!("kmtricks {}\n", self.kmtricks_version))
            .map_err(|e| KmtricksError::io(e, build_infos_path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_single_path_entries() {
        let fof = FileOfFiles::parse("a : reads_a.fq\nb : reads_b.fq\n").unwrap();
        assert_eq!(fof.len(), 2);
        assert_eq!(fof.samples[0].id, "a");
        assert_eq!(fof.samples[0].paths, vec![PathBuf::from("reads_a.fq")]);
    }

    #[test]
    fn parses_multi_path_entries() {
        let fof = FileOfFiles::parse("a : r1.fq ; r2.fq\n").unwrap();
        assert_eq!(fof.samples[0].paths.len(), 2);
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        let fof = FileOfFiles::parse("# comment\n\na : x.fq\n").unwrap();
        assert_eq!(fof.len(), 1);
    }

    #[test]
    fn rejects_duplicate_ids() {
        assert!(FileOfFiles::parse("a : x.fq\na : y.fq\n").is_err());
    }

    #[test]
    fn rejects_missing_separator() {
        assert!(FileOfFiles::parse("a x.fq\n").is_err());
    }

    #[test]
    fn fof_order_fixes_sample_index() {
        let fof = FileOfFiles::parse("b : x.fq\na : y.fq\n").unwrap();
        assert_eq!(fof.sample_index("b"), Some(0));
        assert_eq!(fof.sample_index("a"), Some(1));
    }

    #[test]
    fn hash_info_round_trips() {
        let dir = tempdir().unwrap();
        let info = HashInfo::compute(16);
        info.write(dir.path()).unwrap();
        let restored = HashInfo::read(dir.path()).unwrap();
        assert_eq!(restored, info);
    }

    #[test]
    fn run_metadata_persists_both_files() {
        let dir = tempdir().unwrap();
        let meta = RunMetadata::new(1_700_000_000, "kmtricks pipeline ...".to_string(), 8);
        meta.persist(dir.path()).unwrap();
        assert!(dir.path().join("config/run_infos.txt").exists());
        assert!(dir.path().join("config/build_infos.txt").exists());
    }
}
