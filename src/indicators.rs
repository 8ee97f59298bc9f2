//! Indicator derivation and normalization
//!
//! Derives the five per-observation indicators from the joined source rows,
//! then fits the run's normalization parameters once over the full
//! observation set. The fitted parameters are persisted with the run and
//! reused for both weight fitting and final scoring, so the model never
//! trains on one scale and scores on another.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::NormalizationMethod;
use crate::join::capacity_per_train;
use crate::records::InputTables;
use crate::stats::{mean, percentile, population_stddev};
use crate::types::{Indicator, IndicatorVector, Observation};

/// Survey measure group carrying satisfaction responses.
pub const SATISFACTION_MEASURE_GROUP: &str = "Satisfaction";

/// Response categories counted as positive when computing the weighted
/// percent-positive satisfaction indicator.
const POSITIVE_CATEGORIES: [&str; 3] = ["very satisfied", "satisfied", "somewhat satisfied"];

/// Compute raw indicators for every observation, in observation order.
///
/// An indicator whose source rows are absent stays `None`; nothing is
/// imputed to zero.
pub fn compute(
    observations: &[Observation],
    inputs: &InputTables,
    restrictions_joined: bool,
) -> Vec<IndicatorVector> {
    let restrictions_measurable = restrictions_joined && !inputs.restrictions.is_empty();

    observations
        .iter()
        .map(|obs| compute_one(obs, inputs, restrictions_measurable))
        .collect()
}

fn compute_one(
    obs: &Observation,
    inputs: &InputTables,
    restrictions_measurable: bool,
) -> IndicatorVector {
    let mut v = IndicatorVector::default();

    // Travel-time indicators need at least one joined sample.
    let samples: Vec<f64> = obs
        .sources
        .travel_time
        .iter()
        .map(|&idx| inputs.travel_times[idx].travel_time_sec)
        .collect();
    if let (Some(med), Some(p90)) = (percentile(&samples, 0.5), percentile(&samples, 0.9)) {
        if med > 0.0 {
            v.reliability_ratio = Some((p90 / med).max(1.0));
            v.volatility = Some(population_stddev(&samples) / med);
        }
    }

    // Restriction coverage: additive lengths capped at the route total.
    // None when there was nothing to measure against (empty table or no
    // date window to test activity).
    if restrictions_measurable {
        let joined: Vec<&crate::records::RestrictionRecord> = obs
            .sources
            .restriction
            .iter()
            .map(|&idx| &inputs.restrictions[idx])
            .collect();
        if joined.is_empty() {
            v.restriction_coverage = Some(0.0);
        } else {
            let total_miles = joined
                .iter()
                .map(|r| r.total_route_miles)
                .fold(f64::NEG_INFINITY, f64::max);
            let restricted: f64 = joined.iter().map(|r| r.restriction_length_miles).sum();
            if total_miles > 0.0 {
                v.restriction_coverage = Some((restricted.min(total_miles)) / total_miles);
            }
        }
    }

    // Crowding: average boardings per service day against per-train
    // capacity for the route.
    if let Some(capacity) = capacity_per_train(&obs.route_id) {
        v.crowding_ratio = Some(obs.exposure_weight / capacity);
    }

    // Survey satisfaction: weighted percent positive over the attached
    // satisfaction rows.
    let mut positive = 0.0;
    let mut total = 0.0;
    for &idx in &obs.sources.survey {
        let row = &inputs.survey[idx];
        if row.measure_group != SATISFACTION_MEASURE_GROUP {
            continue;
        }
        total += row.weighted_percent;
        let category = row.category.to_ascii_lowercase();
        if POSITIVE_CATEGORIES.contains(&category.as_str()) {
            positive += row.weighted_percent;
        }
    }
    if total > 0.0 {
        v.survey_satisfaction = Some(100.0 * positive / total);
    }

    v
}

/// Per-indicator scale statistics captured at fit time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub n: usize,
}

/// Normalization parameters for one run: fit once over the full observation
/// set, serialized into run metadata, reused for weight fitting and scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationParams {
    pub method: NormalizationMethod,
    scales: BTreeMap<Indicator, ScaleStats>,
}

impl NormalizationParams {
    /// Fit scale statistics per indicator over the non-null values of the
    /// whole run.
    pub fn fit(vectors: &[IndicatorVector], method: NormalizationMethod) -> NormalizationParams {
        let mut scales = BTreeMap::new();
        for indicator in Indicator::ALL {
            let values: Vec<f64> = vectors.iter().filter_map(|v| v.get(indicator)).collect();
            if values.is_empty() {
                continue;
            }
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            scales.insert(
                indicator,
                ScaleStats {
                    min,
                    max,
                    mean: mean(&values),
                    stddev: population_stddev(&values),
                    n: values.len(),
                },
            );
        }
        debug!(indicators = scales.len(), "normalization parameters fit");
        NormalizationParams { method, scales }
    }

    /// Scale a raw indicator value onto [0, 1] using the fitted parameters.
    /// A constant indicator (no spread) maps to the midpoint 0.5 so it
    /// carries no signal instead of a false extreme.
    pub fn scale(&self, indicator: Indicator, value: f64) -> Option<f64> {
        let stats = self.scales.get(&indicator)?;
        let scaled = match self.method {
            NormalizationMethod::MinMax => {
                let range = stats.max - stats.min;
                if range == 0.0 {
                    0.5
                } else {
                    (value - stats.min) / range
                }
            }
            NormalizationMethod::ZScore => {
                if stats.stddev == 0.0 {
                    0.5
                } else {
                    let z = ((value - stats.mean) / stats.stddev).clamp(-3.0, 3.0);
                    (z + 3.0) / 6.0
                }
            }
        };
        Some(scaled.clamp(0.0, 1.0))
    }

    /// Scale and orient: after this every indicator points higher-is-better,
    /// which is the convention both the weight model and the scorer assume.
    pub fn normalize(&self, indicator: Indicator, value: f64) -> Option<f64> {
        let scaled = self.scale(indicator, value)?;
        Some(match indicator {
            Indicator::SurveySatisfaction => scaled,
            _ => 1.0 - scaled,
        })
    }

    /// Normalize a full vector; indicators that were null stay null, and
    /// indicators the fit never saw stay null too.
    pub fn normalize_vector(&self, raw: &IndicatorVector) -> IndicatorVector {
        let mut out = IndicatorVector::default();
        for indicator in Indicator::ALL {
            let value = raw.get(indicator).and_then(|v| self.normalize(indicator, v));
            out.set(indicator, value);
        }
        out
    }

    pub fn stats(&self, indicator: Indicator) -> Option<&ScaleStats> {
        self.scales.get(&indicator)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<NormalizationParams, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DayType, JoinQuality, SourceRows, TimePeriod};
    use crate::records::{
        AggregationLevel, RestrictionRecord, SurveyRecord, TravelTimeRecord,
    };
    use chrono::{NaiveDate, NaiveTime};

    fn make_obs(route: &str, travel: Vec<usize>, restriction: Vec<usize>, survey: Vec<usize>) -> Observation {
        Observation {
            route_id: route.to_string(),
            station_id: Some("place-dwnxg".to_string()),
            time_period: TimePeriod::AmPeak,
            day_type: DayType::Weekday,
            date: None,
            exposure_weight: 650.0,
            join_quality: JoinQuality::Exact,
            sources: SourceRows {
                ridership: vec![0],
                travel_time: travel,
                restriction,
                survey,
            },
        }
    }

    fn make_travel(sec: f64) -> TravelTimeRecord {
        TravelTimeRecord {
            service_date: NaiveDate::from_ymd_opt(2024, 11, 4).unwrap(),
            dep_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            route_id: "Red".to_string(),
            direction_id: 0,
            from_stop_id: "70061".to_string(),
            to_stop_id: "70063".to_string(),
            from_parent_station: Some("place-dwnxg".to_string()),
            to_parent_station: Some("place-pktrm".to_string()),
            from_stop_name: None,
            to_stop_name: None,
            travel_time_sec: sec,
            benchmark_travel_time_sec: None,
            threshold_flag: None,
        }
    }

    fn make_restriction(length: f64, total: f64) -> RestrictionRecord {
        RestrictionRecord {
            route_id: "Red".to_string(),
            direction: None,
            from_station: "Downtown Crossing".to_string(),
            to_station: "Park Street".to_string(),
            speed_mph: Some(10.0),
            effective_date: NaiveDate::from_ymd_opt(2024, 10, 1).unwrap(),
            cleared_date: None,
            restriction_length_miles: length,
            total_route_miles: total,
        }
    }

    fn make_survey(category: &str, pct: f64) -> SurveyRecord {
        SurveyRecord {
            aggregation_level: AggregationLevel::Line,
            route_or_line: "Red".to_string(),
            reporting_group: None,
            measure_group: "Satisfaction".to_string(),
            measure: "Overall satisfaction".to_string(),
            category: category.to_string(),
            weighted_percent: pct,
        }
    }

    #[test]
    fn test_travel_indicators_null_iff_no_samples() {
        let inputs = InputTables {
            travel_times: vec![make_travel(300.0), make_travel(330.0), make_travel(420.0)],
            ..InputTables::default()
        };

        let with_samples = compute_one(&make_obs("Red", vec![0, 1, 2], vec![], vec![]), &inputs, false);
        assert!(with_samples.reliability_ratio.is_some());
        assert!(with_samples.volatility.is_some());
        assert!(with_samples.reliability_ratio.unwrap() >= 1.0);

        let without = compute_one(&make_obs("Red", vec![], vec![], vec![]), &inputs, false);
        assert!(without.reliability_ratio.is_none());
        assert!(without.volatility.is_none());
    }

    #[test]
    fn test_single_sample_volatility_is_zero() {
        let inputs = InputTables {
            travel_times: vec![make_travel(300.0)],
            ..InputTables::default()
        };

        let v = compute_one(&make_obs("Red", vec![0], vec![], vec![]), &inputs, false);
        assert_eq!(v.volatility, Some(0.0));
        assert_eq!(v.reliability_ratio, Some(1.0));
    }

    #[test]
    fn test_restriction_coverage_caps_at_one() {
        let inputs = InputTables {
            restrictions: vec![make_restriction(7.0, 11.0), make_restriction(6.0, 11.0)],
            ..InputTables::default()
        };

        let v = compute_one(&make_obs("Red", vec![], vec![0, 1], vec![]), &inputs, true);
        // 7 + 6 = 13 miles capped at the 11-mile route.
        assert_eq!(v.restriction_coverage, Some(1.0));
    }

    #[test]
    fn test_restriction_coverage_zero_vs_null() {
        let inputs = InputTables {
            restrictions: vec![make_restriction(1.0, 11.0)],
            ..InputTables::default()
        };

        // Table measurable, nothing joined: a real zero.
        let zero = compute_one(&make_obs("Red", vec![], vec![], vec![]), &inputs, true);
        assert_eq!(zero.restriction_coverage, Some(0.0));

        // No date window to test activity against: nothing to measure.
        let null = compute_one(&make_obs("Red", vec![], vec![], vec![]), &inputs, false);
        assert_eq!(null.restriction_coverage, None);
    }

    #[test]
    fn test_crowding_uses_route_capacity() {
        let inputs = InputTables::default();
        let v = compute_one(&make_obs("Red", vec![], vec![], vec![]), &inputs, false);
        assert!((v.crowding_ratio.unwrap() - 650.0 / 1300.0).abs() < 1e-12);
    }

    #[test]
    fn test_survey_percent_positive() {
        let inputs = InputTables {
            survey: vec![
                make_survey("Very satisfied", 0.3),
                make_survey("Satisfied", 0.3),
                make_survey("Dissatisfied", 0.4),
            ],
            ..InputTables::default()
        };

        let v = compute_one(&make_obs("Red", vec![], vec![], vec![0, 1, 2]), &inputs, false);
        assert!((v.survey_satisfaction.unwrap() - 60.0).abs() < 1e-9);

        let none = compute_one(&make_obs("Red", vec![], vec![], vec![]), &inputs, false);
        assert_eq!(none.survey_satisfaction, None);
    }

    #[test]
    fn test_minmax_normalization_and_orientation() {
        let vectors = vec![
            IndicatorVector {
                reliability_ratio: Some(1.0),
                volatility: Some(0.1),
                ..IndicatorVector::default()
            },
            IndicatorVector {
                reliability_ratio: Some(2.0),
                volatility: Some(0.3),
                ..IndicatorVector::default()
            },
        ];

        let params = NormalizationParams::fit(&vectors, NormalizationMethod::MinMax);

        // Worst reliability scales to 1.0 then flips to 0.0.
        assert_eq!(params.normalize(Indicator::ReliabilityRatio, 2.0), Some(0.0));
        assert_eq!(params.normalize(Indicator::ReliabilityRatio, 1.0), Some(1.0));
        // Midpoint stays midpoint under the flip.
        assert_eq!(params.normalize(Indicator::ReliabilityRatio, 1.5), Some(0.5));
        // Unseen indicator stays null.
        assert_eq!(params.normalize(Indicator::CrowdingRatio, 0.4), None);
    }

    #[test]
    fn test_survey_is_not_flipped() {
        let vectors = vec![
            IndicatorVector {
                survey_satisfaction: Some(40.0),
                ..IndicatorVector::default()
            },
            IndicatorVector {
                survey_satisfaction: Some(90.0),
                ..IndicatorVector::default()
            },
        ];

        let params = NormalizationParams::fit(&vectors, NormalizationMethod::MinMax);
        assert_eq!(params.normalize(Indicator::SurveySatisfaction, 90.0), Some(1.0));
        assert_eq!(params.normalize(Indicator::SurveySatisfaction, 40.0), Some(0.0));
    }

    #[test]
    fn test_constant_indicator_maps_to_midpoint() {
        let vectors = vec![
            IndicatorVector {
                volatility: Some(0.2),
                ..IndicatorVector::default()
            };
            3
        ];

        let params = NormalizationParams::fit(&vectors, NormalizationMethod::MinMax);
        assert_eq!(params.scale(Indicator::Volatility, 0.2), Some(0.5));

        let z = NormalizationParams::fit(&vectors, NormalizationMethod::ZScore);
        assert_eq!(z.scale(Indicator::Volatility, 0.2), Some(0.5));
    }

    #[test]
    fn test_params_roundtrip_json() {
        let vectors = vec![IndicatorVector {
            volatility: Some(0.2),
            crowding_ratio: Some(0.8),
            ..IndicatorVector::default()
        }];

        let params = NormalizationParams::fit(&vectors, NormalizationMethod::ZScore);
        let json = params.to_json().unwrap();
        let restored = NormalizationParams::from_json(&json).unwrap();
        assert_eq!(params, restored);
    }
}
