//! Pipeline orchestration
//!
//! This module provides the public API for transit-rss. It orchestrates the
//! full pipeline over one immutable input snapshot: fusion, indicator
//! derivation, weight reconciliation, exposure-weighted aggregation, and
//! statistical validation. Every stage consumes the previous stage's output
//! read-only; a run is a pure function of its inputs and configuration.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::aggregate;
use crate::config::ScoreConfig;
use crate::error::ScoreError;
use crate::indicators::{self, NormalizationParams};
use crate::join::{self, JoinSummary};
use crate::records::InputTables;
use crate::types::{IndicatorVector, RssRecord, StatisticalResult, WeightAudit};
use crate::validate;
use crate::weights;

/// Provenance and reproducibility context for one run. Identifiers and
/// timestamps live here, never on the score records, which stay
/// byte-identical across re-runs of the same inputs and configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub computed_at: DateTime<Utc>,
    pub engine_version: String,
    /// Echo of the configuration the run used.
    pub config: ScoreConfig,
    pub join_summary: JoinSummary,
    /// Normalization parameters fit once over this run's observations.
    pub normalization: NormalizationParams,
    /// Service-date span the travel-time table covered.
    pub service_span: Option<(NaiveDate, NaiveDate)>,
}

/// Complete output of one scoring run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RssRun {
    pub metadata: RunMetadata,
    pub records: Vec<RssRecord>,
    pub weight_audit: WeightAudit,
    pub statistics: Vec<StatisticalResult>,
}

/// Run the full scoring pipeline.
///
/// Pipeline stages:
/// 1. Join engine - fuse the four tables into observations
/// 2. Indicator calculator - derive and normalize the five indicators
/// 3. Weight model - fit against survey ground truth, reconcile with prior
/// 4. RSS aggregator - score and roll up under exposure weighting
/// 5. Statistical validator - ANOVA, bootstrap CIs, equity decomposition
pub fn run(inputs: &InputTables, config: &ScoreConfig) -> Result<RssRun, ScoreError> {
    config.validate()?;
    inputs.validate()?;

    // Stage 1: fuse the sources into observations.
    let join_output = join::fuse(inputs, config)?;

    // Stage 2: derive indicators, fit normalization once, normalize.
    let raw = indicators::compute(
        &join_output.observations,
        inputs,
        join_output.restrictions_joined,
    );
    let normalization = NormalizationParams::fit(&raw, config.normalization);
    let normalized: Vec<IndicatorVector> = raw
        .iter()
        .map(|vector| normalization.normalize_vector(vector))
        .collect();

    // Stage 3: weight model and reconciliation.
    let weight_audit = weights::fit_and_reconcile(&normalized, &raw, config);

    // Stage 4: per-observation scores and roll-ups.
    let scored = aggregate::score_all(&join_output.observations, &normalized, &weight_audit.weights);
    let records = aggregate::standard_records(&scored);

    // Stage 5: statistical validation.
    let statistics = validate::run_statistics(&scored, inputs, config);

    info!(
        observations = join_output.observations.len(),
        records = records.len(),
        selection = ?weight_audit.selection,
        "run complete"
    );

    Ok(RssRun {
        metadata: RunMetadata {
            run_id: Uuid::new_v4(),
            computed_at: Utc::now(),
            engine_version: crate::RSS_VERSION.to_string(),
            config: config.clone(),
            join_summary: join_output.summary,
            normalization,
            service_span: join_output.service_span,
        },
        records,
        weight_audit,
        statistics,
    })
}

/// Configured pipeline handle for callers that score several snapshots
/// under one configuration.
pub struct ScorePipeline {
    config: ScoreConfig,
}

impl Default for ScorePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ScorePipeline {
    /// Create a pipeline with the default configuration.
    pub fn new() -> ScorePipeline {
        ScorePipeline {
            config: ScoreConfig::default(),
        }
    }

    pub fn with_config(config: ScoreConfig) -> ScorePipeline {
        ScorePipeline { config }
    }

    pub fn config(&self) -> &ScoreConfig {
        &self.config
    }

    pub fn run(&self, inputs: &InputTables) -> Result<RssRun, ScoreError> {
        run(inputs, &self.config)
    }
}
