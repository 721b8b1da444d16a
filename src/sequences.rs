//! Reads a sample's input files into an in-memory sequence list.
//!
//! A sample's File-of-Files entry can list more than one path (e.g.
//! paired-end reads); each is read independently and its records
//! concatenated into one flat list in file order. Format (FASTA vs
//! FASTQ) is auto-detected per path unless the caller forces one.

use std::path::Path;

use bio::io::{fasta, fastq};

use crate::error::KmtricksError;
use crate::format::SequenceFormat;

/// Reads every record's sequence bytes from one file, uppercased.
///
/// # Errors
///
/// Returns [`KmtricksError::Io`] if the file cannot be opened or a record
/// fails to parse.
pub fn read_one(path: &Path, format: SequenceFormat) -> Result<Vec<Vec<u8>>, KmtricksError> {
    let resolved = format.resolve(Some(path));
    let io = |e: std::io::Error| KmtricksError::io(e, path.to_path_buf());
    let parse_err = |e: std::io::Error| KmtricksError::format(format!("malformed record: {e}"), path.to_path_buf());

    match resolved {
        SequenceFormat::Fastq => {
            let reader = fastq::Reader::from_file(path).map_err(io)?;
            reader
                .records()
                .map(|r| r.map(|rec| rec.seq().to_ascii_uppercase()).map_err(parse_err))
                .collect()
        }
        // Auto already resolved above; Fasta is also the unknown-extension default.
        SequenceFormat::Fasta | SequenceFormat::Auto => {
            let reader = fasta::Reader::from_file(path).map_err(io)?;
            reader
                .records()
                .map(|r| r.map(|rec| rec.seq().to_ascii_uppercase()).map_err(parse_err))
                .collect()
        }
    }
}

/// Reads every path belonging to one sample, in order, concatenating
/// their record lists.
///
/// # Errors
///
/// Returns whatever [`read_one`] returns for the first path that fails.
pub fn read_sample(paths: &[std::path::PathBuf], format: SequenceFormat) -> Result<Vec<Vec<u8>>, KmtricksError> {
    let mut out = Vec::new();
    for path in paths {
        out.extend(read_one(path, format)?);
    }
    Ok(out)
}
