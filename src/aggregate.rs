//! RSS aggregation
//!
//! Applies the selected weight vector to each observation's normalized
//! indicators, then rolls per-observation scores up to station, line, and
//! system scope under ridership-exposure weighting. A scope with no
//! exposure weight is emitted with a null score and a zero-exposure flag,
//! never divided and never defaulted.

use std::collections::BTreeMap;

use tracing::debug;

use crate::types::{
    Indicator, IndicatorVector, Observation, RssRecord, Scope, TimePeriod, WeightVector,
};

/// An observation paired with its composite score.
#[derive(Debug, Clone)]
pub struct ScoredObservation<'a> {
    pub observation: &'a Observation,
    /// 0-100 composite; `None` when every weighted indicator was null.
    pub score: Option<f64>,
}

/// Score one observation: weighted sum of its non-null oriented indicators,
/// re-normalized over the non-null subset so a missing indicator does not
/// drag the score toward zero, scaled to 0-100.
pub fn score_observation(normalized: &IndicatorVector, weights: &WeightVector) -> Option<f64> {
    let mut weighted_total = 0.0;
    let mut weight_sum = 0.0;
    for indicator in Indicator::ALL {
        let (Some(value), weight) = (normalized.get(indicator), weights.get(indicator)) else {
            continue;
        };
        weighted_total += value * weight;
        weight_sum += weight;
    }
    if weight_sum == 0.0 {
        return None;
    }
    Some((weighted_total / weight_sum * 100.0).clamp(0.0, 100.0))
}

/// Score every observation against the selected weights.
pub fn score_all<'a>(
    observations: &'a [Observation],
    normalized: &[IndicatorVector],
    weights: &WeightVector,
) -> Vec<ScoredObservation<'a>> {
    observations
        .iter()
        .zip(normalized)
        .map(|(observation, vector)| ScoredObservation {
            observation,
            score: score_observation(vector, weights),
        })
        .collect()
}

/// Exposure-weighted roll-up of the given scored observations into one
/// record. Observations without a score are excluded; a scope whose scored
/// exposure sums to zero is flagged, not defaulted.
pub fn roll_up<'a>(
    scored: impl IntoIterator<Item = &'a ScoredObservation<'a>>,
    scope: Scope,
    scope_id: &str,
    time_period: Option<TimePeriod>,
) -> RssRecord {
    let mut weighted_total = 0.0;
    let mut weight_sum = 0.0;
    let mut n_observations = 0;
    for s in scored {
        let Some(score) = s.score else {
            continue;
        };
        weighted_total += score * s.observation.exposure_weight;
        weight_sum += s.observation.exposure_weight;
        n_observations += 1;
    }

    let zero_exposure = weight_sum == 0.0;
    RssRecord {
        scope,
        scope_id: scope_id.to_string(),
        time_period,
        score: if zero_exposure {
            None
        } else {
            Some(weighted_total / weight_sum)
        },
        exposure_weight_sum: weight_sum,
        n_observations,
        zero_exposure,
    }
}

/// The standard emission set: every station x period, line x period, line
/// overall, system x period, and system overall, in deterministic order.
pub fn standard_records(scored: &[ScoredObservation<'_>]) -> Vec<RssRecord> {
    let mut records = Vec::new();

    // Station x period.
    let mut by_station: BTreeMap<(String, TimePeriod), Vec<&ScoredObservation>> = BTreeMap::new();
    for s in scored {
        if let Some(station) = &s.observation.station_id {
            by_station
                .entry((station.clone(), s.observation.time_period))
                .or_default()
                .push(s);
        }
    }
    for ((station, period), group) in &by_station {
        records.push(roll_up(
            group.iter().copied(),
            Scope::Station,
            station,
            Some(*period),
        ));
    }

    // Line x period and line overall.
    let mut by_line: BTreeMap<(String, TimePeriod), Vec<&ScoredObservation>> = BTreeMap::new();
    let mut lines: BTreeMap<String, Vec<&ScoredObservation>> = BTreeMap::new();
    for s in scored {
        by_line
            .entry((s.observation.route_id.clone(), s.observation.time_period))
            .or_default()
            .push(s);
        lines
            .entry(s.observation.route_id.clone())
            .or_default()
            .push(s);
    }
    for ((line, period), group) in &by_line {
        records.push(roll_up(group.iter().copied(), Scope::Line, line, Some(*period)));
    }
    for (line, group) in &lines {
        records.push(roll_up(group.iter().copied(), Scope::Line, line, None));
    }

    // System x period and system overall.
    let mut by_period: BTreeMap<TimePeriod, Vec<&ScoredObservation>> = BTreeMap::new();
    for s in scored {
        by_period.entry(s.observation.time_period).or_default().push(s);
    }
    for (period, group) in &by_period {
        records.push(roll_up(group.iter().copied(), Scope::System, "system", Some(*period)));
    }
    records.push(roll_up(scored.iter(), Scope::System, "system", None));

    records.sort_by(|a, b| {
        (a.scope, &a.scope_id, a.time_period).cmp(&(b.scope, &b.scope_id, b.time_period))
    });
    debug!(records = records.len(), "aggregation complete");
    records
}
