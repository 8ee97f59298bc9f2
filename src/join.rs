//! Join engine
//!
//! Reconciles the four source tables into a unified set of observations
//! keyed by (route, station, time period, day type). Ridership is the spine:
//! travel-time samples, active speed restrictions, and survey rows attach to
//! it, each join tagged with the quality it achieved. Observations carry row
//! indices back into the source tables, never copies.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ScoreConfig;
use crate::error::ScoreError;
use crate::records::{AggregationLevel, InputTables};
use crate::types::{DayType, JoinQuality, Observation, SourceRows, TimePeriod};

/// Canonical route vocabulary. Anything else must be explicitly ignorable
/// or the run aborts.
pub const CANONICAL_ROUTES: [&str; 9] = [
    "Red", "Orange", "Blue", "Green", "Green-B", "Green-C", "Green-D", "Green-E", "Mattapan",
];

/// Approximate passenger capacity per train, by route.
pub fn capacity_per_train(route_id: &str) -> Option<f64> {
    match route_id {
        "Red" => Some(1300.0),
        "Orange" => Some(1000.0),
        "Blue" => Some(900.0),
        "Green" | "Green-B" | "Green-C" | "Green-D" | "Green-E" => Some(300.0),
        "Mattapan" => Some(100.0),
        _ => None,
    }
}

/// Normalize a raw route value onto the canonical vocabulary.
/// Handles case, surrounding whitespace, a trailing "line", and space vs
/// hyphen in branch codes. Returns `None` for values outside the vocabulary.
pub fn normalize_route(raw: &str) -> Option<String> {
    let mut cleaned = raw.trim().to_ascii_lowercase();
    if let Some(stripped) = cleaned.strip_suffix("line") {
        cleaned = stripped.trim_end().to_string();
    }
    let cleaned = cleaned.replace(' ', "-");

    CANONICAL_ROUTES
        .iter()
        .find(|route| route.to_ascii_lowercase() == cleaned)
        .map(|route| route.to_string())
}

/// Normalize a station name for comparison: lowercase alphanumeric tokens,
/// with generic suffix words dropped.
fn name_tokens(name: &str) -> Vec<String> {
    name.to_ascii_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty() && *t != "station" && *t != "stop")
        .map(|t| t.to_string())
        .collect()
}

/// Dice coefficient over name tokens, in [0, 1]. Identical normalized
/// names score 1.0.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let ta = name_tokens(a);
    let tb = name_tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    if ta == tb {
        return 1.0;
    }
    let sa: HashSet<&String> = ta.iter().collect();
    let sb: HashSet<&String> = tb.iter().collect();
    let overlap = sa.intersection(&sb).count();
    2.0 * overlap as f64 / (sa.len() + sb.len()) as f64
}

/// Station-name / GTFS-id crosswalk assembled from the source rows, plus
/// the configured per-route station sequences used for restriction segment
/// containment.
#[derive(Debug, Clone, Default)]
pub struct StationCrosswalk {
    /// GTFS stop id -> canonical parent-station key.
    stop_to_station: HashMap<String, String>,
    /// Parent-station key -> display name.
    station_names: BTreeMap<String, String>,
    /// Route -> ordered station keys.
    route_sequences: BTreeMap<String, Vec<String>>,
}

impl StationCrosswalk {
    /// Build the crosswalk the way the dashboards did: from the stop id /
    /// parent-station / stop-name triples present on travel-time rows, plus
    /// the ridership table's parent stations.
    pub fn from_inputs(inputs: &InputTables, config: &ScoreConfig) -> StationCrosswalk {
        let mut crosswalk = StationCrosswalk {
            route_sequences: config.route_sequences.clone(),
            ..StationCrosswalk::default()
        };

        for row in &inputs.ridership {
            let name = row
                .stop_name
                .clone()
                .unwrap_or_else(|| row.parent_station.clone());
            crosswalk
                .station_names
                .entry(row.parent_station.clone())
                .or_insert(name);
        }

        for row in &inputs.travel_times {
            if let Some(parent) = &row.from_parent_station {
                crosswalk
                    .stop_to_station
                    .insert(row.from_stop_id.clone(), parent.clone());
                if let Some(name) = &row.from_stop_name {
                    crosswalk
                        .station_names
                        .entry(parent.clone())
                        .or_insert_with(|| name.clone());
                }
            }
            if let Some(parent) = &row.to_parent_station {
                crosswalk
                    .stop_to_station
                    .insert(row.to_stop_id.clone(), parent.clone());
                if let Some(name) = &row.to_stop_name {
                    crosswalk
                        .station_names
                        .entry(parent.clone())
                        .or_insert_with(|| name.clone());
                }
            }
        }

        crosswalk
    }

    pub fn station_for_stop(&self, stop_id: &str) -> Option<&str> {
        self.stop_to_station.get(stop_id).map(String::as_str)
    }

    pub fn display_name(&self, station_key: &str) -> Option<&str> {
        self.station_names.get(station_key).map(String::as_str)
    }

    /// Resolve a station reference onto the station-key vocabulary.
    /// Preference order: explicit parent station (EXACT), stop-id crosswalk
    /// (EXACT), best name similarity above the threshold (FUZZY).
    pub fn resolve(
        &self,
        parent: Option<&str>,
        stop_id: &str,
        name: Option<&str>,
        fuzzy_threshold: f64,
    ) -> Option<(String, JoinQuality)> {
        if let Some(parent) = parent {
            if self.station_names.contains_key(parent) {
                return Some((parent.to_string(), JoinQuality::Exact));
            }
        }
        if let Some(station) = self.station_for_stop(stop_id) {
            if self.station_names.contains_key(station) {
                return Some((station.to_string(), JoinQuality::Exact));
            }
        }
        if let Some(name) = name {
            if let Some((key, score)) = self.best_name_match(name) {
                if score >= fuzzy_threshold {
                    let quality = if score >= 1.0 {
                        JoinQuality::Exact
                    } else {
                        JoinQuality::Fuzzy
                    };
                    return Some((key, quality));
                }
            }
        }
        None
    }

    /// Best station-key match for a free-form name, with its similarity.
    /// Ties resolve to the lexically smallest key for determinism.
    pub fn best_name_match(&self, name: &str) -> Option<(String, f64)> {
        let mut best: Option<(String, f64)> = None;
        for (key, display) in &self.station_names {
            let score = name_similarity(name, display).max(name_similarity(name, key));
            match &best {
                Some((_, current)) if *current >= score => {}
                _ => best = Some((key.clone(), score)),
            }
        }
        best
    }

    /// Position of a station (referenced by name) along a route's sequence.
    fn sequence_position(&self, route_id: &str, station_name: &str) -> Option<usize> {
        let sequence = self.route_sequences.get(route_id)?;
        sequence.iter().position(|key| {
            key == station_name
                || self
                    .display_name(key)
                    .is_some_and(|display| name_similarity(display, station_name) >= 1.0)
        })
    }
}

/// Per-run counters surfaced in run metadata. Degraded joins are recorded
/// here and on the observations; they never abort the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSummary {
    pub n_observations: usize,
    pub n_exact: usize,
    pub n_fuzzy: usize,
    pub n_partial: usize,
    /// Ridership rows skipped for unparseable period or day-type names.
    pub ridership_rows_skipped: usize,
    /// Travel-time rows that matched no spine observation.
    pub travel_time_rows_unmatched: usize,
    /// Observations that received a broadcast (line or systemwide) survey.
    pub survey_broadcasts: usize,
    /// Source rows skipped because their route was configured ignorable.
    pub ignored_route_rows: usize,
}

/// Result of the fusion stage.
#[derive(Debug, Clone)]
pub struct JoinOutput {
    pub observations: Vec<Observation>,
    pub summary: JoinSummary,
    /// Min/max service date seen in the travel-time table; the window
    /// restrictions are tested against.
    pub service_span: Option<(NaiveDate, NaiveDate)>,
    /// False when no travel-time dates were available to window
    /// restrictions, in which case no restriction rows were attached.
    pub restrictions_joined: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SpineKey {
    route_id: String,
    station_id: String,
    time_period: TimePeriod,
    day_type: DayType,
}

#[derive(Debug, Default)]
struct SpineEntry {
    exposure_weight: f64,
    quality: Option<JoinQuality>,
    sources: SourceRows,
}

/// Fuse the four input tables into observations.
///
/// Fatal only on an unmappable, non-ignorable route code; every other
/// irregularity degrades the affected join and is counted in the summary.
pub fn fuse(inputs: &InputTables, config: &ScoreConfig) -> Result<JoinOutput, ScoreError> {
    let mut summary = JoinSummary::default();
    let crosswalk = StationCrosswalk::from_inputs(inputs, config);

    // 1. Ridership spine.
    let mut spine: BTreeMap<SpineKey, SpineEntry> = BTreeMap::new();
    for (idx, row) in inputs.ridership.iter().enumerate() {
        let Some(route_id) = canonical_route(&row.route_id, config, &mut summary)? else {
            continue;
        };
        let (Some(time_period), Some(day_type)) = (
            TimePeriod::parse_sdp(&row.time_period_name),
            DayType::parse(&row.day_type_name),
        ) else {
            warn!(
                route = %row.route_id,
                period = %row.time_period_name,
                day = %row.day_type_name,
                "skipping ridership row with unparseable period or day type"
            );
            summary.ridership_rows_skipped += 1;
            continue;
        };

        let key = SpineKey {
            route_id,
            station_id: row.parent_station.clone(),
            time_period,
            day_type,
        };
        let entry = spine.entry(key).or_default();
        entry.exposure_weight += row.exposure_weight();
        entry.quality = Some(
            entry
                .quality
                .unwrap_or(JoinQuality::Exact)
                .worst(JoinQuality::Exact),
        );
        entry.sources.ridership.push(idx);
    }

    // 2. Travel-time samples onto the spine.
    let mut service_span: Option<(NaiveDate, NaiveDate)> = None;
    for (idx, row) in inputs.travel_times.iter().enumerate() {
        let Some(route_id) = canonical_route(&row.route_id, config, &mut summary)? else {
            continue;
        };

        service_span = Some(match service_span {
            None => (row.service_date, row.service_date),
            Some((lo, hi)) => (lo.min(row.service_date), hi.max(row.service_date)),
        });

        let day_type = DayType::from_date(row.service_date);
        let time_period = TimePeriod::classify(day_type, row.dep_time);

        let resolved = crosswalk.resolve(
            row.from_parent_station.as_deref(),
            &row.from_stop_id,
            row.from_stop_name.as_deref(),
            config.fuzzy_match_threshold,
        );
        let Some((station_id, match_quality)) = resolved else {
            summary.travel_time_rows_unmatched += 1;
            continue;
        };

        let key = SpineKey {
            route_id,
            station_id,
            time_period,
            day_type,
        };
        match spine.get_mut(&key) {
            Some(entry) => {
                entry.sources.travel_time.push(idx);
                entry.quality =
                    Some(entry.quality.unwrap_or(JoinQuality::Exact).worst(match_quality));
            }
            None => summary.travel_time_rows_unmatched += 1,
        }
    }

    // 3. Active restrictions onto the spine, by route + window + segment
    // containment against the observation's joined OD pairs.
    let restrictions_joined = service_span.is_some();
    if let Some((span_start, span_end)) = service_span {
        let mut by_route: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (idx, row) in inputs.restrictions.iter().enumerate() {
            let Some(route_id) = canonical_route(&row.route_id, config, &mut summary)? else {
                continue;
            };
            if row.active_within(span_start, span_end) {
                by_route.entry(route_id).or_default().push(idx);
            }
        }

        for (key, entry) in spine.iter_mut() {
            let Some(candidates) = by_route.get(&key.route_id) else {
                continue;
            };
            for &ridx in candidates {
                let restriction = &inputs.restrictions[ridx];
                match restriction_containment(
                    restriction,
                    &key.route_id,
                    &entry.sources.travel_time,
                    inputs,
                    &crosswalk,
                ) {
                    Containment::Contained => {
                        entry.sources.restriction.push(ridx);
                    }
                    Containment::Unplaceable => {
                        // Without a usable station sequence the join holds
                        // only at route level.
                        entry.sources.restriction.push(ridx);
                        entry.quality = Some(
                            entry
                                .quality
                                .unwrap_or(JoinQuality::Exact)
                                .worst(JoinQuality::Partial),
                        );
                    }
                    Containment::Outside => {}
                }
            }
        }
    }

    // 4. Survey rows at their reported granularity; the finest available
    // scope wins, coarser scopes broadcast and tag PARTIAL.
    let survey_index = SurveyIndex::build(inputs, config, &mut summary)?;
    for (key, entry) in spine.iter_mut() {
        let station_name = crosswalk
            .display_name(&key.station_id)
            .unwrap_or(&key.station_id);
        let attachment = survey_index.attach(&key.route_id, station_name, config);
        match attachment {
            Some((rows, quality, broadcast)) => {
                entry.sources.survey = rows;
                entry.quality = Some(entry.quality.unwrap_or(JoinQuality::Exact).worst(quality));
                if broadcast {
                    summary.survey_broadcasts += 1;
                }
            }
            None => {
                // No survey at any granularity: the observation proceeds
                // with survey_satisfaction unset.
            }
        }
    }

    // Materialize observations in spine (key) order.
    let mut observations = Vec::with_capacity(spine.len());
    for (key, entry) in spine {
        let quality = entry.quality.unwrap_or(JoinQuality::Exact);
        match quality {
            JoinQuality::Exact => summary.n_exact += 1,
            JoinQuality::Fuzzy => summary.n_fuzzy += 1,
            JoinQuality::Partial => summary.n_partial += 1,
        }
        observations.push(Observation {
            route_id: key.route_id,
            station_id: Some(key.station_id),
            time_period: key.time_period,
            day_type: key.day_type,
            date: None,
            exposure_weight: entry.exposure_weight,
            join_quality: quality,
            sources: entry.sources,
        });
    }
    summary.n_observations = observations.len();

    debug!(
        observations = summary.n_observations,
        exact = summary.n_exact,
        fuzzy = summary.n_fuzzy,
        partial = summary.n_partial,
        "fusion complete"
    );

    Ok(JoinOutput {
        observations,
        summary,
        service_span,
        restrictions_joined,
    })
}

/// Map a raw route value to the canonical vocabulary, honoring the
/// configured ignorable set. `Ok(None)` means "skip this row".
fn canonical_route(
    raw: &str,
    config: &ScoreConfig,
    summary: &mut JoinSummary,
) -> Result<Option<String>, ScoreError> {
    if let Some(route) = normalize_route(raw) {
        return Ok(Some(route));
    }
    let ignorable = config
        .ignorable_routes
        .iter()
        .any(|r| r.eq_ignore_ascii_case(raw.trim()));
    if ignorable {
        warn!(route = %raw, "skipping row for ignorable route");
        summary.ignored_route_rows += 1;
        return Ok(None);
    }
    Err(ScoreError::UnknownRoute(raw.to_string()))
}

enum Containment {
    /// The restricted segment lies within at least one joined OD pair.
    Contained,
    /// No sequence (or unplaced endpoint): only the route-level join holds.
    Unplaceable,
    /// Placeable and strictly outside every joined OD pair.
    Outside,
}

fn restriction_containment(
    restriction: &crate::records::RestrictionRecord,
    route_id: &str,
    travel_time_rows: &[usize],
    inputs: &InputTables,
    crosswalk: &StationCrosswalk,
) -> Containment {
    let (Some(r_from), Some(r_to)) = (
        crosswalk.sequence_position(route_id, &restriction.from_station),
        crosswalk.sequence_position(route_id, &restriction.to_station),
    ) else {
        return Containment::Unplaceable;
    };
    let (r_lo, r_hi) = (r_from.min(r_to), r_from.max(r_to));

    if travel_time_rows.is_empty() {
        return Containment::Unplaceable;
    }

    let mut any_placeable = false;
    for &idx in travel_time_rows {
        let row = &inputs.travel_times[idx];
        let from_name = row
            .from_stop_name
            .as_deref()
            .or(row.from_parent_station.as_deref());
        let to_name = row
            .to_stop_name
            .as_deref()
            .or(row.to_parent_station.as_deref());
        let (Some(from_name), Some(to_name)) = (from_name, to_name) else {
            continue;
        };
        let (Some(t_from), Some(t_to)) = (
            crosswalk.sequence_position(route_id, from_name),
            crosswalk.sequence_position(route_id, to_name),
        ) else {
            continue;
        };
        any_placeable = true;
        let (t_lo, t_hi) = (t_from.min(t_to), t_from.max(t_to));
        if r_lo >= t_lo && r_hi <= t_hi {
            return Containment::Contained;
        }
    }

    if any_placeable {
        Containment::Outside
    } else {
        Containment::Unplaceable
    }
}

/// Survey rows grouped by scope, ready to attach to observations.
struct SurveyIndex {
    /// (route, normalized reporting-group name) -> row indices.
    station_groups: BTreeMap<(String, String), Vec<usize>>,
    /// route -> line-level row indices.
    lines: BTreeMap<String, Vec<usize>>,
    systemwide: Vec<usize>,
    /// Display names for station groups, for similarity matching.
    group_names: BTreeMap<(String, String), String>,
}

impl SurveyIndex {
    fn build(
        inputs: &InputTables,
        config: &ScoreConfig,
        summary: &mut JoinSummary,
    ) -> Result<SurveyIndex, ScoreError> {
        let mut index = SurveyIndex {
            station_groups: BTreeMap::new(),
            lines: BTreeMap::new(),
            systemwide: Vec::new(),
            group_names: BTreeMap::new(),
        };

        for (idx, row) in inputs.survey.iter().enumerate() {
            match row.aggregation_level {
                AggregationLevel::Systemwide => index.systemwide.push(idx),
                AggregationLevel::Line => {
                    let Some(route) = canonical_route(&row.route_or_line, config, summary)? else {
                        continue;
                    };
                    index.lines.entry(route).or_default().push(idx);
                }
                AggregationLevel::StationGroup => {
                    let Some(route) = canonical_route(&row.route_or_line, config, summary)? else {
                        continue;
                    };
                    let group = row.reporting_group.clone().unwrap_or_default();
                    let norm = name_tokens(&group).join(" ");
                    index
                        .station_groups
                        .entry((route.clone(), norm.clone()))
                        .or_default()
                        .push(idx);
                    index.group_names.entry((route, norm)).or_insert(group);
                }
            }
        }

        Ok(index)
    }

    /// Pick the finest survey scope available for an observation. Returns
    /// the attached rows, the join quality of the attachment, and whether
    /// it was a coarse-grain broadcast.
    fn attach(
        &self,
        route_id: &str,
        station_name: &str,
        config: &ScoreConfig,
    ) -> Option<(Vec<usize>, JoinQuality, bool)> {
        let norm = name_tokens(station_name).join(" ");

        if let Some(rows) = self
            .station_groups
            .get(&(route_id.to_string(), norm.clone()))
        {
            return Some((rows.clone(), JoinQuality::Exact, false));
        }

        // Fuzzy station-group match within the route.
        let mut best: Option<(&Vec<usize>, f64)> = None;
        for (key, rows) in &self.station_groups {
            if key.0 != route_id {
                continue;
            }
            let display = self
                .group_names
                .get(key)
                .map(String::as_str)
                .unwrap_or(key.1.as_str());
            let score = name_similarity(station_name, display);
            if score >= config.fuzzy_match_threshold {
                match &best {
                    Some((_, current)) if *current >= score => {}
                    _ => best = Some((rows, score)),
                }
            }
        }
        if let Some((rows, _)) = best {
            return Some((rows.clone(), JoinQuality::Fuzzy, false));
        }

        if let Some(rows) = self.lines.get(route_id) {
            return Some((rows.clone(), JoinQuality::Partial, true));
        }
        if !self.systemwide.is_empty() {
            return Some((self.systemwide.clone(), JoinQuality::Partial, true));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{
        RestrictionRecord, RidershipRecord, SurveyRecord, TravelTimeRecord,
    };
    use chrono::{NaiveDate, NaiveTime};

    fn make_ridership(route: &str, station: &str, name: &str, period: &str) -> RidershipRecord {
        RidershipRecord {
            route_id: route.to_string(),
            time_period_name: period.to_string(),
            day_type_name: "weekday".to_string(),
            parent_station: station.to_string(),
            stop_name: Some(name.to_string()),
            total_ons: 500.0,
            average_ons: Some(100.0),
            number_service_days: 5,
        }
    }

    fn make_travel_time(route: &str, from_station: &str, from_name: &str) -> TravelTimeRecord {
        TravelTimeRecord {
            // 2024-11-04 was a Monday; 07:45 is inside the AM peak.
            service_date: NaiveDate::from_ymd_opt(2024, 11, 4).unwrap(),
            dep_time: NaiveTime::from_hms_opt(7, 45, 0).unwrap(),
            route_id: route.to_string(),
            direction_id: 0,
            from_stop_id: "70061".to_string(),
            to_stop_id: "70063".to_string(),
            from_parent_station: Some(from_station.to_string()),
            to_parent_station: Some("place-pktrm".to_string()),
            from_stop_name: Some(from_name.to_string()),
            to_stop_name: Some("Park Street".to_string()),
            travel_time_sec: 300.0,
            benchmark_travel_time_sec: Some(280.0),
            threshold_flag: None,
        }
    }

    fn make_survey_line(route: &str) -> SurveyRecord {
        SurveyRecord {
            aggregation_level: AggregationLevel::Line,
            route_or_line: route.to_string(),
            reporting_group: None,
            measure_group: "Satisfaction".to_string(),
            measure: "Overall satisfaction".to_string(),
            category: "Satisfied".to_string(),
            weighted_percent: 0.6,
        }
    }

    fn make_restriction(route: &str) -> RestrictionRecord {
        RestrictionRecord {
            route_id: route.to_string(),
            direction: None,
            from_station: "Downtown Crossing".to_string(),
            to_station: "Park Street".to_string(),
            speed_mph: Some(10.0),
            effective_date: NaiveDate::from_ymd_opt(2024, 10, 1).unwrap(),
            cleared_date: None,
            restriction_length_miles: 0.5,
            total_route_miles: 11.0,
        }
    }

    fn make_inputs() -> InputTables {
        InputTables {
            survey: vec![make_survey_line("Red")],
            travel_times: vec![make_travel_time("Red", "place-dwnxg", "Downtown Crossing")],
            ridership: vec![
                make_ridership("Red", "place-dwnxg", "Downtown Crossing", "AM_PEAK"),
                make_ridership("Red", "place-pktrm", "Park Street", "AM_PEAK"),
            ],
            restrictions: vec![make_restriction("Red")],
        }
    }

    #[test]
    fn test_normalize_route_aliases() {
        assert_eq!(normalize_route("Red"), Some("Red".to_string()));
        assert_eq!(normalize_route("red line"), Some("Red".to_string()));
        assert_eq!(normalize_route(" ORANGE "), Some("Orange".to_string()));
        assert_eq!(normalize_route("Green B"), Some("Green-B".to_string()));
        assert_eq!(normalize_route("green-e line"), Some("Green-E".to_string()));
        assert_eq!(normalize_route("CR-Fitchburg"), None);
    }

    #[test]
    fn test_capacity_map() {
        assert_eq!(capacity_per_train("Red"), Some(1300.0));
        assert_eq!(capacity_per_train("Green-C"), Some(300.0));
        assert_eq!(capacity_per_train("Ferry"), None);
    }

    #[test]
    fn test_name_similarity() {
        assert_eq!(
            name_similarity("Downtown Crossing", "Downtown Crossing Station"),
            1.0
        );
        assert!(name_similarity("Downtown Crossing", "South Station") < 0.5);
        assert_eq!(name_similarity("", "Park Street"), 0.0);
    }

    #[test]
    fn test_fuse_builds_spine_from_ridership() {
        let inputs = make_inputs();
        let config = ScoreConfig::default();

        let output = fuse(&inputs, &config).unwrap();
        assert_eq!(output.observations.len(), 2);

        let dtx = output
            .observations
            .iter()
            .find(|o| o.station_id.as_deref() == Some("place-dwnxg"))
            .unwrap();
        assert_eq!(dtx.route_id, "Red");
        assert_eq!(dtx.time_period, TimePeriod::AmPeak);
        assert_eq!(dtx.exposure_weight, 100.0);
        assert_eq!(dtx.sources.travel_time, vec![0]);
        assert_eq!(dtx.sources.ridership, vec![0]);
        // Line-level survey was broadcast: quality degrades to PARTIAL.
        assert_eq!(dtx.join_quality, JoinQuality::Partial);
        assert!(output.summary.survey_broadcasts >= 1);
    }

    #[test]
    fn test_unknown_route_is_fatal() {
        let mut inputs = make_inputs();
        inputs.ridership.push(make_ridership("Teal", "place-x", "X", "AM_PEAK"));
        let config = ScoreConfig::default();

        let err = fuse(&inputs, &config).unwrap_err();
        assert!(matches!(err, ScoreError::UnknownRoute(ref code) if code == "Teal"));
    }

    #[test]
    fn test_ignorable_route_is_skipped() {
        let mut inputs = make_inputs();
        inputs.ridership.push(make_ridership("741", "place-sl1", "SL1", "AM_PEAK"));
        let config = ScoreConfig {
            ignorable_routes: vec!["741".to_string()],
            ..ScoreConfig::default()
        };

        let output = fuse(&inputs, &config).unwrap();
        assert_eq!(output.observations.len(), 2);
        assert_eq!(output.summary.ignored_route_rows, 1);
    }

    #[test]
    fn test_unparseable_period_skips_row() {
        let mut inputs = make_inputs();
        inputs
            .ridership
            .push(make_ridership("Red", "place-other", "Other", "TEA_TIME"));
        let config = ScoreConfig::default();

        let output = fuse(&inputs, &config).unwrap();
        assert_eq!(output.observations.len(), 2);
        assert_eq!(output.summary.ridership_rows_skipped, 1);
    }

    #[test]
    fn test_fuzzy_station_match_tags_fuzzy() {
        let mut inputs = make_inputs();
        // Drop survey and restrictions so only the station match can degrade.
        inputs.survey.clear();
        inputs.restrictions.clear();
        // Travel time row with no parent station and a near-miss name:
        // "Downtown Crossing Sta" scores 0.8 against "Downtown Crossing".
        inputs.travel_times = vec![TravelTimeRecord {
            from_parent_station: None,
            from_stop_name: Some("Downtown Crossing Sta".to_string()),
            ..make_travel_time("Red", "ignored", "ignored")
        }];
        let config = ScoreConfig {
            fuzzy_match_threshold: 0.75,
            ..ScoreConfig::default()
        };

        let output = fuse(&inputs, &config).unwrap();
        let dtx = output
            .observations
            .iter()
            .find(|o| o.station_id.as_deref() == Some("place-dwnxg"))
            .unwrap();
        assert_eq!(dtx.sources.travel_time, vec![0]);
        assert_eq!(dtx.join_quality, JoinQuality::Fuzzy);

        // Under the default threshold the same row fails to match at all.
        let strict = fuse(&inputs, &ScoreConfig::default()).unwrap();
        assert_eq!(strict.summary.travel_time_rows_unmatched, 1);
    }

    #[test]
    fn test_restriction_attaches_route_level_without_sequence() {
        let inputs = make_inputs();
        let config = ScoreConfig::default();

        let output = fuse(&inputs, &config).unwrap();
        assert!(output.restrictions_joined);
        let dtx = output
            .observations
            .iter()
            .find(|o| o.station_id.as_deref() == Some("place-dwnxg"))
            .unwrap();
        // No sequence configured: restriction joins at route level.
        assert_eq!(dtx.sources.restriction, vec![0]);
        assert_eq!(dtx.join_quality, JoinQuality::Partial);
    }

    #[test]
    fn test_restriction_containment_with_sequence() {
        let mut inputs = make_inputs();
        inputs.survey.clear();
        let mut config = ScoreConfig::default();
        config.route_sequences.insert(
            "Red".to_string(),
            vec![
                "place-alfcl".to_string(),
                "place-dwnxg".to_string(),
                "place-pktrm".to_string(),
                "place-sstat".to_string(),
            ],
        );
        // Restriction between Downtown Crossing and Park Street is contained
        // in the joined OD pair (Downtown Crossing -> Park Street).
        let output = fuse(&inputs, &config).unwrap();
        let dtx = output
            .observations
            .iter()
            .find(|o| o.station_id.as_deref() == Some("place-dwnxg"))
            .unwrap();
        assert_eq!(dtx.sources.restriction, vec![0]);
        assert_eq!(dtx.join_quality, JoinQuality::Exact);

        // A restriction outside the OD pair does not attach.
        inputs.restrictions = vec![RestrictionRecord {
            from_station: "place-alfcl".to_string(),
            to_station: "place-dwnxg".to_string(),
            ..make_restriction("Red")
        }];
        let output = fuse(&inputs, &config).unwrap();
        let dtx = output
            .observations
            .iter()
            .find(|o| o.station_id.as_deref() == Some("place-dwnxg"))
            .unwrap();
        assert!(dtx.sources.restriction.is_empty());
    }

    #[test]
    fn test_no_survey_leaves_sources_empty() {
        let mut inputs = make_inputs();
        inputs.survey.clear();
        let config = ScoreConfig::default();

        let output = fuse(&inputs, &config).unwrap();
        assert!(output.observations.iter().all(|o| o.sources.survey.is_empty()));
    }

    #[test]
    fn test_station_group_survey_attaches_exact() {
        let mut inputs = make_inputs();
        inputs.restrictions.clear();
        inputs.survey = vec![SurveyRecord {
            aggregation_level: AggregationLevel::StationGroup,
            route_or_line: "Red".to_string(),
            reporting_group: Some("Downtown Crossing".to_string()),
            measure_group: "Satisfaction".to_string(),
            measure: "Overall satisfaction".to_string(),
            category: "Satisfied".to_string(),
            weighted_percent: 0.7,
        }];
        let config = ScoreConfig::default();

        let output = fuse(&inputs, &config).unwrap();
        let dtx = output
            .observations
            .iter()
            .find(|o| o.station_id.as_deref() == Some("place-dwnxg"))
            .unwrap();
        assert_eq!(dtx.sources.survey, vec![0]);
        assert_eq!(dtx.join_quality, JoinQuality::Exact);

        let pktrm = output
            .observations
            .iter()
            .find(|o| o.station_id.as_deref() == Some("place-pktrm"))
            .unwrap();
        assert!(pktrm.sources.survey.is_empty());
    }
}
