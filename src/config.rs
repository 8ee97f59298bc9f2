//! Run configuration
//!
//! Every knob a run depends on lives here and is threaded explicitly through
//! the stages. A run is reproducible from its recorded configuration alone;
//! nothing is read from ambient state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ScoreError;
use crate::types::{Indicator, WeightVector};

/// How indicators are scaled to [0, 1] before orientation and weighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMethod {
    /// Min-max over the full observation set.
    MinMax,
    /// Z-score clipped to +/- 3 sigma and affinely mapped onto [0, 1].
    ZScore,
}

/// Immutable configuration for one scoring run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreConfig {
    pub normalization: NormalizationMethod,
    /// Ridge regularization strengths tried during cross-validation.
    pub ridge_grid: Vec<f64>,
    pub cv_folds: usize,
    /// Minimum cross-validated R-squared for fitted weights to be accepted.
    pub min_cv_r2: f64,
    pub bootstrap_resamples: usize,
    /// Base seed for bootstrap resampling; per-scope sub-seeds derive from
    /// it deterministically.
    pub bootstrap_seed: u64,
    /// Minimum station-name similarity for a fuzzy crosswalk match.
    pub fuzzy_match_threshold: f64,
    /// Survey measure groups decomposed into equity slices.
    pub equity_dimensions: Vec<String>,
    /// Route codes silently skipped instead of aborting the run (e.g. bus
    /// codes a caller chose not to filter upstream).
    pub ignorable_routes: Vec<String>,
    /// Ordered station keys per route, used for restriction segment
    /// containment. Routes without a sequence degrade restriction joins to
    /// route level (tagged PARTIAL).
    pub route_sequences: BTreeMap<String, Vec<String>>,
    pub prior_weights: WeightVector,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        ScoreConfig {
            normalization: NormalizationMethod::MinMax,
            ridge_grid: vec![0.01, 0.1, 1.0, 10.0, 100.0],
            cv_folds: 5,
            min_cv_r2: 0.3,
            bootstrap_resamples: 1000,
            bootstrap_seed: 20_241_104,
            fuzzy_match_threshold: 0.85,
            equity_dimensions: vec!["Income".to_string(), "Race/Ethnicity".to_string()],
            ignorable_routes: Vec::new(),
            route_sequences: BTreeMap::new(),
            prior_weights: default_prior_weights(),
        }
    }
}

impl ScoreConfig {
    pub fn validate(&self) -> Result<(), ScoreError> {
        if self.ridge_grid.is_empty() || self.ridge_grid.iter().any(|a| *a < 0.0) {
            return Err(ScoreError::InvalidConfig(
                "ridge grid must be non-empty and non-negative".to_string(),
            ));
        }
        if self.cv_folds < 2 {
            return Err(ScoreError::InvalidConfig(
                "cross-validation needs at least 2 folds".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_cv_r2) {
            return Err(ScoreError::InvalidConfig(format!(
                "min_cv_r2 {} outside [0, 1]",
                self.min_cv_r2
            )));
        }
        if self.bootstrap_resamples == 0 {
            return Err(ScoreError::InvalidConfig(
                "bootstrap_resamples must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.fuzzy_match_threshold) {
            return Err(ScoreError::InvalidConfig(format!(
                "fuzzy_match_threshold {} outside [0, 1]",
                self.fuzzy_match_threshold
            )));
        }
        if !self.prior_weights.is_normalized() {
            return Err(ScoreError::InvalidConfig(
                "prior weights must be non-negative and sum to 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Literature-derived prior weighting. Reliability and volatility dominate
/// (riders penalize unpredictability hardest), the direct survey voice
/// carries a quarter, crowding and restrictions the remainder.
pub fn default_prior_weights() -> WeightVector {
    WeightVector::from_pairs(&[
        (Indicator::ReliabilityRatio, 0.25),
        (Indicator::Volatility, 0.25),
        (Indicator::SurveySatisfaction, 0.25),
        (Indicator::CrowdingRatio, 0.15),
        (Indicator::RestrictionCoverage, 0.10),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ScoreConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_prior_is_normalized() {
        assert!(default_prior_weights().is_normalized());
    }

    #[test]
    fn test_rejects_empty_grid() {
        let config = ScoreConfig {
            ridge_grid: vec![],
            ..ScoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_single_fold() {
        let config = ScoreConfig {
            cv_folds: 1,
            ..ScoreConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
