use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LdaError>;

/// Which count table a Gibbs consistency check failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountTable {
    NounTopic,
    VerbTopic,
    TopicTotals,
    VerbTotals,
}

impl std::fmt::Display for CountTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CountTable::NounTopic => "CWT",
            CountTable::VerbTopic => "CVT",
            CountTable::TopicTotals => "numNounsInTopic",
            CountTable::VerbTotals => "numNounsWithVerb",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum LdaError {
    #[error("malformed record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },
    #[error("count table {table} is inconsistent at row {row}, topic {topic}: {reason}")]
    ConsistencyViolation {
        table: CountTable,
        row: usize,
        topic: usize,
        reason: String,
    },
    #[error("document {document} did not converge after {iterations} iterations (distance {distance:.6})")]
    ConvergenceNotReached {
        document: usize,
        iterations: usize,
        distance: f64,
    },
    #[error("document {document} has a degenerate responsibility normalizer for noun {noun}")]
    DegenerateDocument { document: usize, noun: usize },
    #[error("invalid corpus: {0}")]
    InvalidCorpus(String),
    #[error("{kind} '{key}' is not part of the learned vocabulary")]
    NotFound { kind: &'static str, key: String },
    #[error("malformed matrix file {path} at line {line}: {reason}")]
    MalformedMatrix {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("shape mismatch for {what}: expected {expected}, found {found}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Cache(#[from] bincode::Error),
    #[error(transparent)]
    NpyRead(#[from] ndarray_npy::ReadNpyError),
    #[error(transparent)]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),
}

impl LdaError {
    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        LdaError::MalformedRecord {
            line,
            reason: reason.into(),
        }
    }
}
