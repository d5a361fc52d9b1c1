/// Error taxonomy for the analysis core.
///
/// Transient enumeration failures (permission denied, vanished entries) are
/// not errors: the walker logs and counts them and keeps going. Cancellation
/// is not an error either; it is reported through
/// [`AnalysisOutcome`](crate::scanner::AnalysisOutcome).
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Run-ending failures of an analysis.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("cannot open scan root {path}: {source}")]
    InvalidRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("scan root {0} is not a directory")]
    NotADirectory(PathBuf),

    /// A hard-link group member inside the scan root was missing from the
    /// frozen lookup cache: the file list and the tree disagree.
    #[error("{0} is inside the scan root but was not part of the lookup cache warmup")]
    StaleLookup(PathBuf),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{0} thread panicked")]
    WorkerPanicked(&'static str),
}

/// Returned by a frozen [`LookupCache`](crate::lookup::LookupCache) for a key
/// it was not warmed with.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("{0} was not part of the lookup cache warmup")]
    NotWarmed(PathBuf),
}

/// Rejected tree mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("cannot set the size of directory {0}: directory sizes are derived from their contents")]
    NotAFile(String),
}

impl From<LookupError> for AnalysisError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::NotWarmed(path) => AnalysisError::StaleLookup(path),
        }
    }
}
