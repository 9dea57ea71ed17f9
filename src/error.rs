//! Failure taxonomy for metric-group fetches.

use thiserror::Error;

/// Failure of a single metric-group fetch against its collaborator.
///
/// These never escape the aggregation pipeline: the owning group falls
/// back to its neutral default and the run continues.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage lock poisoned")]
    LockPoisoned,

    #[error("fetch timed out after {0}s")]
    Timeout(u64),

    #[error("malformed payload: {0}")]
    Malformed(String),
}
