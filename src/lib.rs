//! transit-rss - Batch compute engine for composite Rider Satisfaction Scores
//!
//! transit-rss fuses four independently-produced transit datasets (passenger
//! survey, travel-time telemetry, ridership counts, speed-restriction logs)
//! into per-station/line/period satisfaction scores through a deterministic
//! pipeline: fusion → indicator derivation → weight reconciliation →
//! exposure-weighted aggregation → statistical validation.
//!
//! ## Modules
//!
//! - **records**: typed schemas for the four input tables
//! - **join**: route canonicalization, station crosswalk, and fusion
//! - **indicators**: per-observation indicators and run normalization
//! - **weights**: ridge fit against survey ground truth, prior reconciliation
//! - **aggregate**: per-observation scoring and exposure-weighted roll-ups
//! - **validate**: ANOVA, bootstrap intervals, equity decomposition
//! - **pipeline**: orchestration and the run output types

pub mod aggregate;
pub mod config;
pub mod error;
pub mod indicators;
pub mod join;
pub mod pipeline;
pub mod records;
pub mod stats;
pub mod types;
pub mod validate;
pub mod weights;

pub use config::{NormalizationMethod, ScoreConfig};
pub use error::ScoreError;
pub use pipeline::{run, RssRun, RunMetadata, ScorePipeline};
pub use records::InputTables;
pub use types::{
    Indicator, IndicatorVector, Observation, RssRecord, Scope, StatisticalResult, WeightAudit,
    WeightVector,
};

/// Engine version embedded in run metadata
pub const RSS_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for run metadata and CLI output
pub const PRODUCER_NAME: &str = "transit-rss";
