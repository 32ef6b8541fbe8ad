//src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Everything that can abort a placement batch.
///
/// All variants are configuration-class failures: they are raised while the
/// shared tables or a batch's hit table are being read, before any query is
/// placed. A query without consensus is never an error, it is a result.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed taxonomy table '{}' at line {line}: {detail}", path.display())]
    MalformedTaxonomy {
        path: PathBuf,
        line: usize,
        detail: String,
    },

    #[error("column '{column}' not found in '{}'", path.display())]
    MissingColumn { path: PathBuf, column: String },

    #[error(
        "delimiter mismatch in '{}' at line {line}: lineage has {found} parts but {expected} ranks are configured",
        path.display()
    )]
    DelimiterMismatch {
        path: PathBuf,
        line: usize,
        found: usize,
        expected: usize,
    },

    #[error("malformed cutoff file '{}': {detail}", path.display())]
    MalformedCutoffs { path: PathBuf, detail: String },

    #[error("cutoff rank '{0}' is not a rank of the taxonomy table")]
    UnknownRank(String),

    #[error("no cutoff threshold given for required rank '{0}'")]
    MissingMandatoryCutoff(String),

    #[error("cutoff for rank '{deeper}' ({deeper_value}) is looser than for shallower rank '{shallower}' ({shallower_value})")]
    NonMonotonicCutoffs {
        shallower: String,
        shallower_value: f64,
        deeper: String,
        deeper_value: f64,
    },

    #[error("consensus cutoff must be in (0, 1], got {0}")]
    InvalidConsensusCutoff(f64),

    #[error("malformed alignment hit in '{}' at line {line}: {detail}", path.display())]
    MalformedHit {
        path: PathBuf,
        line: usize,
        detail: String,
    },

    #[error("malformed abundance table '{}' at line {line}: {detail}", path.display())]
    MalformedAbundance {
        path: PathBuf,
        line: usize,
        detail: String,
    },

    #[error("malformed protein map '{}': {detail}", path.display())]
    MalformedProteinMap { path: PathBuf, detail: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PlacementError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PlacementError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PlacementError>;
