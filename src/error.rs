//! Error types for transit-rss

use thiserror::Error;

/// Errors that can abort a scoring run.
///
/// Only conditions that make the fused dataset untrustworthy are errors.
/// Degraded joins, zero-exposure scopes, and statistically insufficient
/// groups are carried as data on the output records instead.
#[derive(Debug, Error)]
pub enum ScoreError {
    /// A source row named a route that is neither canonical nor ignorable.
    /// Fatal: joins keyed on a misread route are meaningless downstream.
    #[error("unknown route code: {0}")]
    UnknownRoute(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}
