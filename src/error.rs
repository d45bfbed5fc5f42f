//! Error types for the listen-matrix pipeline.
//!
//! Every fatal error names the path it failed on. Record-level problems
//! (malformed event lines, lookup misses) are never errors; they are counted
//! in the stage stats instead.

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("JSON error writing {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decompress {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("{path} has no '{column}' column")]
    MissingColumn { path: PathBuf, column: String },

    #[error("invalid configuration in {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("refusing to write {output}: it is also an input of this stage")]
    OutputIsInput { output: PathBuf },
}

impl PipelineError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn csv(path: impl AsRef<Path>, source: csv::Error) -> Self {
        PipelineError::Csv {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn missing_column(path: impl AsRef<Path>, column: &str) -> Self {
        PipelineError::MissingColumn {
            path: path.as_ref().to_path_buf(),
            column: column.to_string(),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
