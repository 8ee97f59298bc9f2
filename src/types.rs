//! Core types for the transit-rss pipeline
//!
//! This module defines the data structures that flow through each stage of
//! the pipeline: fused observations, indicator vectors, weight vectors, and
//! the scored and statistical output records.

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canonical service time periods (MBTA Service Delivery Policy segmentation,
/// collapsed to the grain the scoring pipeline operates on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimePeriod {
    AmPeak,
    Midday,
    PmPeak,
    Evening,
    OffPeak,
    Weekend,
}

impl TimePeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimePeriod::AmPeak => "AM_PEAK",
            TimePeriod::Midday => "MIDDAY",
            TimePeriod::PmPeak => "PM_PEAK",
            TimePeriod::Evening => "EVENING",
            TimePeriod::OffPeak => "OFF_PEAK",
            TimePeriod::Weekend => "WEEKEND",
        }
    }

    /// Map an SDP period name from the ridership data onto the canonical
    /// enum. Returns `None` for names outside the known vocabulary.
    pub fn parse_sdp(name: &str) -> Option<TimePeriod> {
        let key = name.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        match key.as_str() {
            "AM_PEAK" => Some(TimePeriod::AmPeak),
            "MIDDAY" | "MIDDAY_BASE" | "MIDDAY_SCHOOL" => Some(TimePeriod::Midday),
            "PM_PEAK" => Some(TimePeriod::PmPeak),
            "EVENING" | "LATE_EVENING" => Some(TimePeriod::Evening),
            "OFF_PEAK" | "EARLY_AM" | "VERY_EARLY_MORNING" | "NIGHT" => Some(TimePeriod::OffPeak),
            "WEEKEND" | "SATURDAY" | "SUNDAY" => Some(TimePeriod::Weekend),
            _ => None,
        }
    }

    /// Classify a service time onto a period. Weekend days collapse to
    /// `Weekend` regardless of clock time; weekday boundaries follow the
    /// SDP peak definitions.
    pub fn classify(day_type: DayType, time: NaiveTime) -> TimePeriod {
        if day_type != DayType::Weekday {
            return TimePeriod::Weekend;
        }

        match time.hour() * 60 + time.minute() {
            m if (390..540).contains(&m) => TimePeriod::AmPeak, // 06:30-09:00
            m if (540..930).contains(&m) => TimePeriod::Midday, // 09:00-15:30
            m if (930..1110).contains(&m) => TimePeriod::PmPeak, // 15:30-18:30
            m if (1110..1320).contains(&m) => TimePeriod::Evening, // 18:30-22:00
            _ => TimePeriod::OffPeak,
        }
    }
}

/// Service day classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DayType {
    Weekday,
    Saturday,
    Sunday,
}

impl DayType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayType::Weekday => "WEEKDAY",
            DayType::Saturday => "SATURDAY",
            DayType::Sunday => "SUNDAY",
        }
    }

    pub fn parse(name: &str) -> Option<DayType> {
        match name.trim().to_ascii_lowercase().as_str() {
            "weekday" => Some(DayType::Weekday),
            "saturday" => Some(DayType::Saturday),
            "sunday" => Some(DayType::Sunday),
            _ => None,
        }
    }

    pub fn from_date(date: NaiveDate) -> DayType {
        match date.weekday() {
            Weekday::Sat => DayType::Saturday,
            Weekday::Sun => DayType::Sunday,
            _ => DayType::Weekday,
        }
    }
}

/// Quality tag for the joins behind an observation.
///
/// Ordered from best to worst; an observation carries the worst tag among
/// its contributing joins, and a tag is never upgraded downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JoinQuality {
    /// All keys agreed exactly.
    Exact,
    /// Station equivalence established only by name similarity.
    Fuzzy,
    /// A coarser-grain source was broadcast onto this observation, or a
    /// join degraded to route level.
    Partial,
}

impl JoinQuality {
    pub fn worst(self, other: JoinQuality) -> JoinQuality {
        self.max(other)
    }
}

/// Indices into the four input tables for the rows that contributed to an
/// observation. References, not copies: the input tables stay immutable and
/// the observation stays cheap.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceRows {
    pub ridership: Vec<usize>,
    pub travel_time: Vec<usize>,
    pub restriction: Vec<usize>,
    pub survey: Vec<usize>,
}

/// The atomic unit after fusion.
///
/// Granularity is explicit through which optional fields are populated:
/// coarser rows carry more `None`s. Every observation has a canonical
/// `route_id` and a `time_period`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub route_id: String,
    /// Canonical parent-station key; `None` for rows above station grain.
    pub station_id: Option<String>,
    pub time_period: TimePeriod,
    pub day_type: DayType,
    /// Populated only for date-grained rows (travel-time / restriction
    /// driven); the standard ridership-spine fusion leaves it `None`.
    pub date: Option<NaiveDate>,
    /// Ridership weight used for every exposure-weighted aggregate:
    /// `average_ons`, falling back to `total_ons / number_service_days`.
    pub exposure_weight: f64,
    pub join_quality: JoinQuality,
    pub sources: SourceRows,
}

/// The five indicators derived per observation. An indicator whose source
/// fields are absent is `None`, never imputed to zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorVector {
    /// P90 / median travel time, >= 1.0.
    pub reliability_ratio: Option<f64>,
    /// Coefficient of variation of travel time, >= 0.
    pub volatility: Option<f64>,
    /// Fraction of route-miles under active speed restriction, in [0, 1].
    pub restriction_coverage: Option<f64>,
    /// Ridership / capacity; may exceed 1 under crowding.
    pub crowding_ratio: Option<f64>,
    /// Weighted percent positive survey response, in [0, 100].
    pub survey_satisfaction: Option<f64>,
}

impl IndicatorVector {
    pub fn get(&self, indicator: Indicator) -> Option<f64> {
        match indicator {
            Indicator::ReliabilityRatio => self.reliability_ratio,
            Indicator::Volatility => self.volatility,
            Indicator::RestrictionCoverage => self.restriction_coverage,
            Indicator::CrowdingRatio => self.crowding_ratio,
            Indicator::SurveySatisfaction => self.survey_satisfaction,
        }
    }

    pub fn set(&mut self, indicator: Indicator, value: Option<f64>) {
        match indicator {
            Indicator::ReliabilityRatio => self.reliability_ratio = value,
            Indicator::Volatility => self.volatility = value,
            Indicator::RestrictionCoverage => self.restriction_coverage = value,
            Indicator::CrowdingRatio => self.crowding_ratio = value,
            Indicator::SurveySatisfaction => self.survey_satisfaction = value,
        }
    }
}

/// Indicator names, used as weight-vector keys and diagnostic labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    ReliabilityRatio,
    Volatility,
    RestrictionCoverage,
    CrowdingRatio,
    SurveySatisfaction,
}

impl Indicator {
    /// All indicators in canonical order.
    pub const ALL: [Indicator; 5] = [
        Indicator::ReliabilityRatio,
        Indicator::Volatility,
        Indicator::RestrictionCoverage,
        Indicator::CrowdingRatio,
        Indicator::SurveySatisfaction,
    ];

    /// The operational indicators: everything the survey does not report
    /// directly. These are the regression predictors in the weight model.
    pub const OPERATIONAL: [Indicator; 4] = [
        Indicator::ReliabilityRatio,
        Indicator::Volatility,
        Indicator::RestrictionCoverage,
        Indicator::CrowdingRatio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Indicator::ReliabilityRatio => "reliability_ratio",
            Indicator::Volatility => "volatility",
            Indicator::RestrictionCoverage => "restriction_coverage",
            Indicator::CrowdingRatio => "crowding_ratio",
            Indicator::SurveySatisfaction => "survey_satisfaction",
        }
    }
}

/// A non-negative weighting over indicators summing to 1.
///
/// Backed by a `BTreeMap` so iteration order (and therefore every weighted
/// sum computed from it) is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightVector {
    weights: BTreeMap<Indicator, f64>,
}

impl WeightVector {
    /// Build a weight vector from (indicator, weight) pairs, normalizing the
    /// weights to sum to 1. Missing indicators default to weight 0.
    pub fn from_pairs(pairs: &[(Indicator, f64)]) -> WeightVector {
        let mut weights: BTreeMap<Indicator, f64> =
            Indicator::ALL.iter().map(|i| (*i, 0.0)).collect();
        for (indicator, weight) in pairs {
            weights.insert(*indicator, weight.max(0.0));
        }
        let total: f64 = weights.values().sum();
        if total > 0.0 {
            for w in weights.values_mut() {
                *w /= total;
            }
        }
        WeightVector { weights }
    }

    pub fn get(&self, indicator: Indicator) -> f64 {
        self.weights.get(&indicator).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Indicator, f64)> + '_ {
        self.weights.iter().map(|(i, w)| (*i, *w))
    }

    pub fn sum(&self) -> f64 {
        self.weights.values().sum()
    }

    /// True when every weight is non-negative and the total is 1 (within
    /// float tolerance) — the invariant both prior and fitted vectors hold.
    pub fn is_normalized(&self) -> bool {
        self.weights.values().all(|w| *w >= 0.0) && (self.sum() - 1.0).abs() < 1e-9
    }
}

/// Aggregation scope of an [`RssRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    Station,
    Line,
    System,
}

/// A scored aggregate at some scope.
///
/// `score` is always a ridership-exposure-weighted mean of per-observation
/// scores. When no exposure weight reaches the scope, `score` is `None` and
/// `zero_exposure` is set; the record is flagged, never defaulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RssRecord {
    pub scope: Scope,
    pub scope_id: String,
    /// `None` when the record aggregates across periods.
    pub time_period: Option<TimePeriod>,
    /// Composite score on the 0-100 scale; `None` iff `zero_exposure`.
    pub score: Option<f64>,
    pub exposure_weight_sum: f64,
    pub n_observations: usize,
    pub zero_exposure: bool,
}

/// A (demographic dimension, category) pair from the survey's equity
/// fields, e.g. Income x "Less than $25,000".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EquitySlice {
    pub dimension: String,
    pub category: String,
}

/// Which weight vector a run scored with, and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WeightSelection {
    AcceptedFitted,
    FellBackToPrior,
}

/// Fit diagnostics recorded alongside the weight decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitDiagnostics {
    /// Observations with a non-null survey target that entered the fit.
    pub n_samples: usize,
    /// Regularization strength selected by cross-validation.
    pub best_alpha: Option<f64>,
    /// Cross-validated R-squared at the selected strength.
    pub cv_r2: Option<f64>,
    /// Raw ridge coefficients per operational indicator, pre-clipping.
    pub raw_coefficients: BTreeMap<String, f64>,
    /// Coefficients after clipping negatives to zero and renormalizing.
    pub clipped_coefficients: BTreeMap<String, f64>,
    pub residual_mean: Option<f64>,
    pub residual_std: Option<f64>,
}

impl FitDiagnostics {
    pub fn empty(n_samples: usize) -> FitDiagnostics {
        FitDiagnostics {
            n_samples,
            best_alpha: None,
            cv_r2: None,
            raw_coefficients: BTreeMap::new(),
            clipped_coefficients: BTreeMap::new(),
            residual_mean: None,
            residual_std: None,
        }
    }
}

/// Audit record for the weight decision: the selected vector, the prior it
/// was reconciled against, and the diagnostics behind the choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightAudit {
    pub selection: WeightSelection,
    pub weights: WeightVector,
    pub prior: WeightVector,
    pub diagnostics: FitDiagnostics,
    pub reason: String,
}

/// Outcome of a one-way ANOVA. Preconditions unmet yields an explicit
/// insufficient-data result, not a degenerate statistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnovaOutcome {
    Computed {
        f_statistic: f64,
        p_value: f64,
        df_between: usize,
        df_within: usize,
        n_groups: usize,
    },
    InsufficientData {
        reason: String,
    },
}

/// A bootstrap percentile confidence interval for a scope's score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapCi {
    pub scope: Scope,
    pub scope_id: String,
    pub time_period: Option<TimePeriod>,
    /// Exposure-weighted point estimate; `None` when the scope has no
    /// exposure weight to resample.
    pub mean: Option<f64>,
    pub ci_lower: Option<f64>,
    pub ci_upper: Option<f64>,
    pub n_resamples: usize,
    pub n_observations: usize,
}

/// Numeric position of an equity slice's interval against the systemwide
/// interval. Derived by comparison of bounds only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EquityComparison {
    BelowSystemCi,
    WithinSystemCi,
    AboveSystemCi,
}

/// Score decomposition for one equity slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityFinding {
    pub slice: EquitySlice,
    pub mean: Option<f64>,
    pub ci_lower: Option<f64>,
    pub ci_upper: Option<f64>,
    pub exposure_weight_sum: f64,
    pub n_observations: usize,
    pub comparison: Option<EquityComparison>,
}

/// One statistical validation result, tagged by test type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "test", rename_all = "snake_case")]
pub enum StatisticalResult {
    Anova {
        grouping: String,
        outcome: AnovaOutcome,
    },
    BootstrapCi(BootstrapCi),
    Equity(EquityFinding),
}
