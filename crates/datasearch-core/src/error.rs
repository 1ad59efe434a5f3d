//! Error taxonomy for the enrichment and embedding pipelines.
//!
//! These are *outcome* errors: the phase drivers match on them and turn
//! each variant into a counted result plus a log entry. Infrastructure
//! failures (database, configuration) are plain `anyhow::Error`.

use thiserror::Error;

/// Failure reported by a [`SourceConnector`](crate::connector::SourceConnector).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The external API is saturated. Stops the current run without
    /// touching the dataset that triggered it.
    #[error("rate limited by source: {0}")]
    RateLimited(String),

    /// The dataset does not exist upstream. Terminal.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network failure, timeout, or unexpected upstream status. Retried
    /// on later runs until the attempt ceiling is reached.
    #[error("transient source error: {0}")]
    Transient(String),

    /// The upstream payload could not be mapped onto dataset content.
    #[error("mapping error: {0}")]
    Mapping(String),
}

impl SourceError {
    /// Short tag used in log rows and structured tracing fields.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::RateLimited(_) => "rate_limited",
            SourceError::NotFound(_) => "not_found",
            SourceError::Transient(_) => "transient",
            SourceError::Mapping(_) => "mapping",
        }
    }
}

/// Failure of the embedding encoder. Always fatal for the current
/// embedding run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("encoder produces {actual}-dimensional vectors but the store holds {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("encoder returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },

    #[error("encoder failed: {0}")]
    Backend(String),
}
