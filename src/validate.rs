//! Statistical validation
//!
//! Hypothesis testing, bootstrap confidence intervals, and equity
//! decomposition over the scored observations. Every result is explicit
//! data: preconditions that fail produce an insufficient-data outcome, and
//! equity findings compare interval bounds numerically, never qualitatively.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::aggregate::ScoredObservation;
use crate::config::ScoreConfig;
use crate::records::InputTables;
use crate::stats::{f_survival, percentile_sorted, weighted_mean};
use crate::types::{
    AnovaOutcome, BootstrapCi, EquityComparison, EquityFinding, EquitySlice, Scope,
    StatisticalResult, TimePeriod,
};

/// Minimum group size for a group to enter the ANOVA.
const MIN_GROUP_SIZE: usize = 2;

/// Run the full validation suite: ANOVA across lines, bootstrap CIs per
/// line and systemwide, and the configured equity decompositions.
pub fn run_statistics(
    scored: &[ScoredObservation<'_>],
    inputs: &InputTables,
    config: &ScoreConfig,
) -> Vec<StatisticalResult> {
    let mut results = Vec::new();

    results.push(StatisticalResult::Anova {
        grouping: "line".to_string(),
        outcome: anova_by_line(scored),
    });

    let system_ci = bootstrap_ci(scored, Scope::System, "system", None, config);

    let mut lines: BTreeMap<&str, Vec<&ScoredObservation>> = BTreeMap::new();
    for s in scored {
        lines.entry(s.observation.route_id.as_str()).or_default().push(s);
    }
    for (line, group) in &lines {
        let group: Vec<ScoredObservation> = group.iter().map(|s| (*s).clone()).collect();
        results.push(StatisticalResult::BootstrapCi(bootstrap_ci(
            &group,
            Scope::Line,
            line,
            None,
            config,
        )));
    }

    results.extend(equity_decomposition(scored, inputs, config, &system_ci));
    results.push(StatisticalResult::BootstrapCi(system_ci));

    debug!(results = results.len(), "statistical validation complete");
    results
}

/// One-way ANOVA of per-observation scores grouped by line.
///
/// Requires at least two groups with at least two scored observations
/// each; anything less is an explicit insufficient-data outcome.
pub fn anova_by_line(scored: &[ScoredObservation<'_>]) -> AnovaOutcome {
    let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for s in scored {
        if let Some(score) = s.score {
            groups.entry(s.observation.route_id.as_str()).or_default().push(score);
        }
    }
    groups.retain(|_, values| values.len() >= MIN_GROUP_SIZE);

    if groups.len() < 2 {
        return AnovaOutcome::InsufficientData {
            reason: format!(
                "{} group(s) with >= {} scored observations; need at least 2",
                groups.len(),
                MIN_GROUP_SIZE
            ),
        };
    }

    let n_total: usize = groups.values().map(Vec::len).sum();
    let grand_mean: f64 =
        groups.values().flatten().sum::<f64>() / n_total as f64;

    let mut ss_between = 0.0;
    let mut ss_within = 0.0;
    for values in groups.values() {
        let group_mean = values.iter().sum::<f64>() / values.len() as f64;
        ss_between += values.len() as f64 * (group_mean - grand_mean).powi(2);
        ss_within += values.iter().map(|v| (v - group_mean).powi(2)).sum::<f64>();
    }

    let df_between = groups.len() - 1;
    let df_within = n_total - groups.len();
    if ss_within == 0.0 {
        return AnovaOutcome::InsufficientData {
            reason: "no within-group variance".to_string(),
        };
    }

    let f_statistic = (ss_between / df_between as f64) / (ss_within / df_within as f64);
    AnovaOutcome::Computed {
        f_statistic,
        p_value: f_survival(f_statistic, df_between, df_within),
        df_between,
        df_within,
        n_groups: groups.len(),
    }
}

/// Non-parametric bootstrap CI for a scope's exposure-weighted mean score.
///
/// Resampling is with replacement at the observation level with selection
/// probability proportional to exposure weight, so the resampled plain mean
/// estimates the weighted mean. Seeded deterministically per scope.
pub fn bootstrap_ci(
    scored: &[ScoredObservation<'_>],
    scope: Scope,
    scope_id: &str,
    time_period: Option<TimePeriod>,
    config: &ScoreConfig,
) -> BootstrapCi {
    let usable: Vec<(f64, f64)> = scored
        .iter()
        .filter(|s| time_period.is_none() || Some(s.observation.time_period) == time_period)
        .filter_map(|s| {
            s.score
                .filter(|_| s.observation.exposure_weight > 0.0)
                .map(|score| (score, s.observation.exposure_weight))
        })
        .collect();

    let mut ci = BootstrapCi {
        scope,
        scope_id: scope_id.to_string(),
        time_period,
        mean: None,
        ci_lower: None,
        ci_upper: None,
        n_resamples: config.bootstrap_resamples,
        n_observations: usable.len(),
    };
    if usable.is_empty() {
        return ci;
    }

    let scores: Vec<f64> = usable.iter().map(|(s, _)| *s).collect();
    let weights: Vec<f64> = usable.iter().map(|(_, w)| *w).collect();
    ci.mean = weighted_mean(&scores, &weights);

    // Cumulative weights for inverse-transform sampling.
    let mut cumulative = Vec::with_capacity(weights.len());
    let mut acc = 0.0;
    for w in &weights {
        acc += w;
        cumulative.push(acc);
    }
    let total = acc;

    let mut rng = StdRng::seed_from_u64(scope_seed(
        config.bootstrap_seed,
        scope,
        scope_id,
        time_period,
    ));
    let mut resample_means = Vec::with_capacity(config.bootstrap_resamples);
    for _ in 0..config.bootstrap_resamples {
        let mut sum = 0.0;
        for _ in 0..scores.len() {
            let u: f64 = rng.gen::<f64>() * total;
            let idx = cumulative.partition_point(|c| *c <= u).min(scores.len() - 1);
            sum += scores[idx];
        }
        resample_means.push(sum / scores.len() as f64);
    }
    resample_means.sort_by(f64::total_cmp);

    ci.ci_lower = percentile_sorted(&resample_means, 0.025);
    ci.ci_upper = percentile_sorted(&resample_means, 0.975);
    ci
}

/// Decompose scores by the configured equity dimensions.
///
/// An observation carries slice (dimension, category) when that category
/// holds the largest weighted share of the dimension within the
/// observation's survey reporting group. Each slice's interval is compared
/// against the systemwide interval by bounds alone.
pub fn equity_decomposition(
    scored: &[ScoredObservation<'_>],
    inputs: &InputTables,
    config: &ScoreConfig,
    system_ci: &BootstrapCi,
) -> Vec<StatisticalResult> {
    let mut results = Vec::new();

    for dimension in &config.equity_dimensions {
        let mut by_slice: BTreeMap<String, Vec<ScoredObservation>> = BTreeMap::new();
        for s in scored {
            if let Some(category) = dominant_category(s, inputs, dimension) {
                by_slice.entry(category).or_default().push(s.clone());
            }
        }

        for (category, group) in by_slice {
            let slice = EquitySlice {
                dimension: dimension.clone(),
                category: category.clone(),
            };
            let slice_ci = bootstrap_ci(
                &group,
                Scope::System,
                &format!("{}:{}", dimension, category),
                None,
                config,
            );
            let comparison = compare_intervals(&slice_ci, system_ci);
            results.push(StatisticalResult::Equity(EquityFinding {
                slice,
                mean: slice_ci.mean,
                ci_lower: slice_ci.ci_lower,
                ci_upper: slice_ci.ci_upper,
                exposure_weight_sum: group
                    .iter()
                    .filter(|s| s.score.is_some())
                    .map(|s| s.observation.exposure_weight)
                    .sum(),
                n_observations: slice_ci.n_observations,
                comparison,
            }));
        }
    }

    results
}

/// The category carrying the largest weighted share of `dimension` among
/// the observation's attached survey rows. Ties break to the lexically
/// smallest category.
fn dominant_category(
    s: &ScoredObservation<'_>,
    inputs: &InputTables,
    dimension: &str,
) -> Option<String> {
    let mut shares: BTreeMap<&str, f64> = BTreeMap::new();
    for &idx in &s.observation.sources.survey {
        let row = &inputs.survey[idx];
        if row.measure_group == dimension {
            *shares.entry(row.category.as_str()).or_insert(0.0) += row.weighted_percent;
        }
    }
    shares
        .into_iter()
        .max_by(|(ca, wa), (cb, wb)| wa.total_cmp(wb).then(cb.cmp(ca)))
        .map(|(category, _)| category.to_string())
}

/// Position of `slice` against `system`, by bounds alone. `None` when
/// either interval is unavailable.
fn compare_intervals(slice: &BootstrapCi, system: &BootstrapCi) -> Option<EquityComparison> {
    let (s_lo, s_hi) = (slice.ci_lower?, slice.ci_upper?);
    let (sys_lo, sys_hi) = (system.ci_lower?, system.ci_upper?);
    if s_hi < sys_lo {
        Some(EquityComparison::BelowSystemCi)
    } else if s_lo > sys_hi {
        Some(EquityComparison::AboveSystemCi)
    } else {
        Some(EquityComparison::WithinSystemCi)
    }
}

/// Deterministic per-scope sub-seed: FNV-1a over the scope identity folded
/// into the run's base seed. Never the std hasher, which randomizes per
/// process.
fn scope_seed(base: u64, scope: Scope, scope_id: &str, period: Option<TimePeriod>) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    let mut mix = |bytes: &[u8]| {
        for b in bytes {
            hash ^= *b as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    };
    mix(format!("{:?}", scope).as_bytes());
    mix(scope_id.as_bytes());
    if let Some(p) = period {
        mix(p.as_str().as_bytes());
    }
    base ^ hash
}
