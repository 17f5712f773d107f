//! Error taxonomy for the Circular Truth core.
//!
//! Four failure classes cross the crate boundary: a corrupt seed container,
//! a seed whose grid dimensions do not reconcile, a persistence failure, and
//! a malformed embedding vector. Everything else that "fails" (a cache miss,
//! an empty similarity result, no prediction at a position) is a normal
//! outcome modelled as `Option`/empty `Vec`, never as an error.

use thiserror::Error;

/// Result type alias for Circular Truth operations.
pub type Result<T> = std::result::Result<T, TruthError>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum TruthError {
    /// The seed container is corrupt: zstd decompression failed or the
    /// decompressed payload is not a decodable artifact record. Fatal for
    /// that seed only; the ingestion loop continues.
    #[error("seed container corrupt: {0}")]
    SeedFormat(String),

    /// The seed decoded but its contents are inconsistent (variable grid
    /// length does not equal time_steps × lats × lons, empty axes, bad
    /// timestamps). The seed is excluded from the cache.
    #[error("seed validation failed: {0}")]
    SeedValidation(String),

    /// Persistence failure from the storage engine. Surfaced to the caller;
    /// safety-relevant writes are never silently dropped.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Filesystem failure reading or deleting a backing artifact.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An embedding vector was rejected at the store boundary (non-finite
    /// components or dimension mismatch).
    #[error("invalid vector: {0}")]
    InvalidVector(String),

    /// A value read back from the database did not round-trip.
    #[error("invalid stored value: {0}")]
    InvalidStoredValue(String),
}

impl From<serde_json::Error> for TruthError {
    fn from(err: serde_json::Error) -> Self {
        TruthError::InvalidStoredValue(err.to_string())
    }
}
