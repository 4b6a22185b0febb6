//! Error types for run-set orchestration and result extraction.
//!
//! Per-chain process failures are recorded on the run set during launch and only
//! surface as errors once a caller tries to extract results from that run set.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the crate.
#[derive(Debug, Error)]
pub enum RunSetError {
    /// A chain's process could not be started (missing executable, permissions).
    #[error("chain {chain}: could not launch `{executable}`: {reason}")]
    Launch {
        chain: usize,
        executable: PathBuf,
        reason: String,
    },

    /// A chain's process ran and exited non-zero (or was killed by a signal).
    #[error("chain {chain}: process failed with return code {retcode:?}: {stderr}")]
    Process {
        chain: usize,
        retcode: Option<i32>,
        stderr: String,
    },

    /// A chain reported success but left no usable output behind.
    #[error("chain {chain}: output file {} is missing or empty", path.display())]
    MissingOutput { chain: usize, path: PathBuf },

    /// Malformed output table.
    #[error(
        "Invalid sample from Stan CSV files: {}line {line} of {}: {reason}",
        chain.map(|c| format!("chain {c}, ")).unwrap_or_default(),
        path.display()
    )]
    Parse {
        chain: Option<usize>,
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Chains disagree on columns or row split, or a variable's columns are malformed.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Unknown variable name, or a name that resolves to a reserved column.
    #[error("unknown variable: {0}")]
    Name(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    /// The wait deadline passed while some chains were still running or queued.
    #[error("timed out after {elapsed:?}: {completed} of {total} chains completed")]
    Timeout {
        elapsed: Duration,
        completed: usize,
        total: usize,
    },

    #[error("chain {0} was cancelled before it completed")]
    Cancelled(usize),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RunSetError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Attach a chain id to a parse error that was raised without one.
    pub(crate) fn in_chain(self, chain_id: usize) -> Self {
        match self {
            Self::Parse {
                chain: None,
                path,
                line,
                reason,
            } => Self::Parse {
                chain: Some(chain_id),
                path,
                line,
                reason,
            },
            other => other,
        }
    }

    /// True for failures that belong to a single chain's process rather than its output.
    pub fn is_process_failure(&self) -> bool {
        matches!(
            self,
            Self::Launch { .. } | Self::Process { .. } | Self::MissingOutput { .. }
        )
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, RunSetError>;
