//! Error types for kmtricks.
//!
//! One exhaustive, strongly-typed error enum covers every failure mode in
//! the pipeline, grouped by the taxonomy the pipeline needs: I/O, on-disk
//! format, configuration, resource exhaustion, and internal invariant
//! violations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur anywhere in the kmtricks pipeline.
#[derive(Debug, Error)]
pub enum KmtricksError {
    /// Failed to open, read, or write a file.
    #[error("I/O error on '{path}': {source}")]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// A binary file's header did not match the expected magic/version/kind,
    /// or a block was truncated/corrupt.
    #[error("bad format in '{path}': {details}")]
    Format { details: String, path: PathBuf },

    /// Configuration was invalid (illegal k, m, P, abundance bounds, FoF).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A resource budget was exceeded (RAM, file descriptors, disk).
    #[error("resource exhausted: {0}")]
    Resource(String),

    /// An internal invariant was violated (e.g. non-ascending keys in a
    /// partition file). Treated as a fatal bug; diagnostics are included.
    #[error("invariant violated: {0}")]
    Logic(String),

    /// A task in a parallel stage failed; the stage aborts.
    #[error("task failed for {context}: {source}")]
    TaskFailed {
        context: String,
        #[source]
        source: Box<KmtricksError>,
    },
}

impl KmtricksError {
    #[must_use]
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: path.into(),
        }
    }

    #[must_use]
    pub fn format(details: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::Format {
            details: details.into(),
            path: path.into(),
        }
    }

    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    #[must_use]
    pub fn logic(msg: impl Into<String>) -> Self {
        Self::Logic(msg.into())
    }

    #[must_use]
    pub fn task_failed(context: impl Into<String>, source: KmtricksError) -> Self {
        Self::TaskFailed {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, KmtricksError>;
