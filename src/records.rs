//! Input table schemas
//!
//! Typed records for the four pre-materialized source datasets the pipeline
//! fuses. Ingestion and file parsing live outside the core; these types are
//! the contract with that layer, with per-record validation and NDJSON
//! helpers for the CLI edge.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::ScoreError;

/// Granularity at which a survey row reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationLevel {
    Systemwide,
    Line,
    StationGroup,
}

/// One row of the passenger survey table.
///
/// `weighted_percent` is the survey-weighted share of respondents in
/// `category`, as a fraction in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyRecord {
    pub aggregation_level: AggregationLevel,
    pub route_or_line: String,
    /// Station-group or line name the row reports for; matches station
    /// names for `StationGroup` rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reporting_group: Option<String>,
    /// Dimension family, e.g. "Satisfaction", "Income", "Race/Ethnicity".
    pub measure_group: String,
    /// Specific measure within the group, e.g. "Overall satisfaction".
    pub measure: String,
    /// Response category, e.g. "Very satisfied", "Less than $25,000".
    pub category: String,
    pub weighted_percent: f64,
}

impl SurveyRecord {
    pub fn validate(&self) -> Result<(), ScoreError> {
        if !(0.0..=1.0).contains(&self.weighted_percent) {
            return Err(ScoreError::InvalidRecord(format!(
                "survey weighted_percent {} outside [0, 1] for {} / {}",
                self.weighted_percent, self.measure_group, self.category
            )));
        }
        if self.aggregation_level == AggregationLevel::StationGroup
            && self.reporting_group.is_none()
        {
            return Err(ScoreError::InvalidRecord(
                "station_group survey row without reporting_group".to_string(),
            ));
        }
        Ok(())
    }
}

/// One origin-destination travel-time sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TravelTimeRecord {
    pub service_date: NaiveDate,
    /// Departure time at the origin stop; classifies the sample onto a
    /// service period.
    pub dep_time: NaiveTime,
    pub route_id: String,
    pub direction_id: u8,
    pub from_stop_id: String,
    pub to_stop_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_parent_station: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_parent_station: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_stop_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_stop_name: Option<String>,
    pub travel_time_sec: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benchmark_travel_time_sec: Option<f64>,
    /// True when the sample exceeded the agency's delay threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_flag: Option<bool>,
}

impl TravelTimeRecord {
    pub fn validate(&self) -> Result<(), ScoreError> {
        if self.travel_time_sec <= 0.0 {
            return Err(ScoreError::InvalidRecord(format!(
                "non-positive travel_time_sec {} on {} {}",
                self.travel_time_sec, self.route_id, self.service_date
            )));
        }
        Ok(())
    }
}

/// One ridership row at SDP period grain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidershipRecord {
    pub route_id: String,
    /// SDP period name, e.g. "AM_PEAK", "MIDDAY_BASE".
    pub time_period_name: String,
    /// "weekday" | "saturday" | "sunday".
    pub day_type_name: String,
    pub parent_station: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_name: Option<String>,
    pub total_ons: f64,
    /// Average boardings per service day; when absent the exposure weight
    /// falls back to `total_ons / number_service_days`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_ons: Option<f64>,
    pub number_service_days: u32,
}

impl RidershipRecord {
    pub fn validate(&self) -> Result<(), ScoreError> {
        if self.total_ons < 0.0 || self.average_ons.is_some_and(|v| v < 0.0) {
            return Err(ScoreError::InvalidRecord(format!(
                "negative ridership on {} / {}",
                self.route_id, self.parent_station
            )));
        }
        if self.number_service_days == 0 && self.average_ons.is_none() {
            return Err(ScoreError::InvalidRecord(format!(
                "ridership row for {} / {} has neither average_ons nor service days",
                self.route_id, self.parent_station
            )));
        }
        Ok(())
    }

    /// Exposure weight for aggregation: `average_ons`, falling back to
    /// total boardings normalized by service days.
    pub fn exposure_weight(&self) -> f64 {
        match self.average_ons {
            Some(avg) => avg,
            None => self.total_ons / self.number_service_days as f64,
        }
    }
}

/// One speed-restriction log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestrictionRecord {
    pub route_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    /// Station name bounding the restricted segment.
    pub from_station: String,
    pub to_station: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_mph: Option<f64>,
    pub effective_date: NaiveDate,
    /// `None` while the restriction is still ongoing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleared_date: Option<NaiveDate>,
    pub restriction_length_miles: f64,
    pub total_route_miles: f64,
}

impl RestrictionRecord {
    pub fn validate(&self) -> Result<(), ScoreError> {
        if self.restriction_length_miles < 0.0 || self.total_route_miles <= 0.0 {
            return Err(ScoreError::InvalidRecord(format!(
                "restriction on {} has invalid mileage ({} of {})",
                self.route_id, self.restriction_length_miles, self.total_route_miles
            )));
        }
        if let Some(cleared) = self.cleared_date {
            if cleared < self.effective_date {
                return Err(ScoreError::InvalidRecord(format!(
                    "restriction on {} cleared before it was effective",
                    self.route_id
                )));
            }
        }
        Ok(())
    }

    /// True when the restriction was active at any point within the given
    /// date span (inclusive).
    pub fn active_within(&self, span_start: NaiveDate, span_end: NaiveDate) -> bool {
        let ends = self.cleared_date.unwrap_or(span_end);
        self.effective_date <= span_end && ends >= span_start
    }
}

/// The four source tables a run consumes, pre-materialized and immutable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputTables {
    pub survey: Vec<SurveyRecord>,
    pub travel_times: Vec<TravelTimeRecord>,
    pub ridership: Vec<RidershipRecord>,
    pub restrictions: Vec<RestrictionRecord>,
}

impl InputTables {
    /// Validate every record; the first invalid record aborts.
    pub fn validate(&self) -> Result<(), ScoreError> {
        for r in &self.survey {
            r.validate()?;
        }
        for r in &self.travel_times {
            r.validate()?;
        }
        for r in &self.ridership {
            r.validate()?;
        }
        for r in &self.restrictions {
            r.validate()?;
        }
        Ok(())
    }
}

/// Parse newline-delimited JSON into records of one table.
pub fn parse_ndjson<T: serde::de::DeserializeOwned>(ndjson: &str) -> Result<Vec<T>, ScoreError> {
    let mut records = Vec::new();
    for (line_num, line) in ndjson.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record: T = serde_json::from_str(trimmed).map_err(|e| {
            ScoreError::InvalidRecord(format!("failed to parse line {}: {}", line_num + 1, e))
        })?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ridership() -> RidershipRecord {
        RidershipRecord {
            route_id: "Red".to_string(),
            time_period_name: "AM_PEAK".to_string(),
            day_type_name: "weekday".to_string(),
            parent_station: "place-dwnxg".to_string(),
            stop_name: Some("Downtown Crossing".to_string()),
            total_ons: 6400.0,
            average_ons: Some(100.0),
            number_service_days: 64,
        }
    }

    #[test]
    fn test_exposure_weight_prefers_average_ons() {
        let r = make_ridership();
        assert_eq!(r.exposure_weight(), 100.0);
    }

    #[test]
    fn test_exposure_weight_falls_back_to_total() {
        let mut r = make_ridership();
        r.average_ons = None;
        assert_eq!(r.exposure_weight(), 100.0);
    }

    #[test]
    fn test_survey_percent_bounds() {
        let r = SurveyRecord {
            aggregation_level: AggregationLevel::Line,
            route_or_line: "Red".to_string(),
            reporting_group: None,
            measure_group: "Satisfaction".to_string(),
            measure: "Overall satisfaction".to_string(),
            category: "Satisfied".to_string(),
            weighted_percent: 1.4,
        };

        assert!(r.validate().is_err());
    }

    #[test]
    fn test_restriction_active_window() {
        let r = RestrictionRecord {
            route_id: "Red".to_string(),
            direction: None,
            from_station: "Alewife".to_string(),
            to_station: "Davis".to_string(),
            speed_mph: Some(10.0),
            effective_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            cleared_date: Some(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()),
            restriction_length_miles: 0.4,
            total_route_miles: 11.0,
        };

        let d = |y, m, dd| NaiveDate::from_ymd_opt(y, m, dd).unwrap();
        assert!(r.active_within(d(2024, 3, 15), d(2024, 3, 20)));
        assert!(r.active_within(d(2024, 2, 1), d(2024, 3, 1)));
        assert!(!r.active_within(d(2024, 4, 2), d(2024, 5, 1)));

        let mut ongoing = r.clone();
        ongoing.cleared_date = None;
        assert!(ongoing.active_within(d(2024, 4, 2), d(2024, 5, 1)));
    }

    #[test]
    fn test_parse_ndjson_reports_line() {
        let input = "{\"route_id\":\"Red\",\"time_period_name\":\"AM_PEAK\",\"day_type_name\":\"weekday\",\"parent_station\":\"place-a\",\"total_ons\":10.0,\"number_service_days\":5}\nnot json\n";
        let result: Result<Vec<RidershipRecord>, _> = parse_ndjson(input);

        let err = result.unwrap_err().to_string();
        assert!(err.contains("line 2"), "unexpected error: {}", err);
    }
}
