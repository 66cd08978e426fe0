//! The stage pipeline: validate, normalize, select the population, bucket
//! each row's delta, aggregate, and assemble the report.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{info, warn};

use crate::columns::{describe_missing, missing_columns, LifecycleColumn};
use crate::report::{
    ratio_of, round_to, BucketShare, DerivedMetrics, FunnelReport, UpgradeSources, DAYS_DECIMALS,
};
use crate::stage::{DerivedScalar, Stage, StageDescriptor, UndefinedDelta};
use crate::table::Table;
use crate::timestamps::{delta_days, normalize_timestamps, TimestampFrame};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("{}", describe_missing(.0))]
    MissingColumns(Vec<LifecycleColumn>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageAnalysis {
    pub report: FunnelReport,
    pub warnings: Vec<String>,
}

impl StageAnalysis {
    /// An empty population yields a report but no charts.
    pub fn has_charts(&self) -> bool {
        self.report.denominator > 0
    }
}

/// Per-population tallies before they are ordered and turned into ratios.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BucketedPopulation {
    pub denominator: u64,
    pub successor_present: u64,
    pub counts: HashMap<&'static str, u64>,
    pub non_negative_deltas: Vec<f64>,
}

pub fn analyze_stage(table: &Table, stage: Stage) -> Result<StageAnalysis, AnalysisError> {
    let desc = stage.descriptor();

    let missing = missing_columns(table, desc.required);
    if !missing.is_empty() {
        let missing_names: Vec<&str> = missing.iter().map(|column| column.header()).collect();
        warn!(
            component = "analysis",
            event = "analysis.schema_error",
            stage = stage.id(),
            missing = ?missing_names
        );
        return Err(AnalysisError::MissingColumns(missing));
    }

    let frame = normalize_timestamps(table, desc.normalized);
    // Counted before the population filter, over every row.
    let sources = desc
        .tracks_upgrade_sources
        .then(|| count_upgrade_sources(&frame, desc));

    let population = select_population(&frame, desc.anchor);
    let bucketed = bucket_population(&frame, desc, &population);
    let report = assemble_report(desc, &bucketed, sources, &frame);

    let mut warnings = Vec::new();
    if population.is_empty() {
        info!(
            component = "analysis",
            event = "analysis.population.empty",
            stage = stage.id(),
            rows = frame.row_count()
        );
        warnings.push(desc.empty_population_warning.to_string());
    }

    info!(
        component = "analysis",
        event = "analysis.stage.complete",
        stage = stage.id(),
        rows = frame.row_count(),
        denominator = report.denominator,
        sum_check = report.sum_check
    );

    Ok(StageAnalysis { report, warnings })
}

/// Row indices whose anchor timestamp is present.
pub fn select_population(frame: &TimestampFrame, anchor: LifecycleColumn) -> Vec<usize> {
    (0..frame.row_count())
        .filter(|row| frame.get(anchor, *row).is_present())
        .collect()
}

pub fn bucket_population(
    frame: &TimestampFrame,
    desc: &StageDescriptor,
    population: &[usize],
) -> BucketedPopulation {
    let mut out = BucketedPopulation {
        denominator: population.len() as u64,
        ..BucketedPopulation::default()
    };

    for &row in population {
        let predecessor = frame.get(desc.predecessor, row).value();
        let successor = frame.get(desc.successor, row).value();
        if successor.is_some() {
            out.successor_present += 1;
        }

        match (predecessor, successor) {
            (Some(earlier), Some(later)) => {
                let delta = delta_days(earlier, later);
                if delta >= 0.0 {
                    out.non_negative_deltas.push(delta);
                }
                *out.counts.entry(desc.classify(delta)).or_default() += 1;
            }
            _ => {
                if let UndefinedDelta::PerRow(bucket) = desc.undefined {
                    *out.counts.entry(bucket).or_default() += 1;
                }
            }
        }
    }

    if let UndefinedDelta::Remainder(bucket) = desc.undefined {
        out.counts
            .insert(bucket, out.denominator.saturating_sub(out.successor_present));
    }

    out
}

/// Zero-filled counts in the stage's fixed order, with ratios over the denominator.
pub fn aggregate(
    order: &[&'static str],
    counts: &HashMap<&'static str, u64>,
    denominator: u64,
) -> Vec<BucketShare> {
    order
        .iter()
        .map(|bucket| {
            let count = counts.get(bucket).copied().unwrap_or(0);
            BucketShare {
                bucket: (*bucket).to_string(),
                count,
                ratio: ratio_of(count, denominator),
            }
        })
        .collect()
}

fn assemble_report(
    desc: &StageDescriptor,
    bucketed: &BucketedPopulation,
    upgrade_sources: Option<UpgradeSources>,
    frame: &TimestampFrame,
) -> FunnelReport {
    let distribution = aggregate(desc.order, &bucketed.counts, bucketed.denominator);
    let sum_check = distribution.iter().map(|share| share.count).sum();

    let derived = match desc.derived {
        DerivedScalar::MeanNonNegativeDelta => DerivedMetrics::MeanLatency {
            mean_delta_days: mean(&bucketed.non_negative_deltas)
                .map(|value| round_to(value, DAYS_DECIMALS)),
        },
        DerivedScalar::ConversionRate => DerivedMetrics::Conversion {
            converted: bucketed.successor_present,
            conversion_rate: (bucketed.denominator > 0)
                .then(|| ratio_of(bucketed.successor_present, bucketed.denominator)),
        },
    };

    FunnelReport {
        stage: desc.stage,
        denominator: bucketed.denominator,
        distribution,
        sum_check,
        derived,
        upgrade_sources,
        column_quality: frame.quality(),
    }
}

fn count_upgrade_sources(frame: &TimestampFrame, desc: &StageDescriptor) -> UpgradeSources {
    let mut sources = UpgradeSources {
        total_upgrades: 0,
        after_second_deposit: 0,
        without_second_deposit: 0,
    };

    for row in 0..frame.row_count() {
        if !frame.get(desc.successor, row).is_present() {
            continue;
        }
        sources.total_upgrades += 1;
        if frame.get(desc.anchor, row).is_present() {
            sources.after_second_deposit += 1;
        } else {
            sources.without_second_deposit += 1;
        }
    }

    sources
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{
        ALL_STAGES, CLAIMED_SAME_DAY, DEPOSITED_BEFORE_CLAIM, SECOND_DEPOSIT_PENDING,
        TRIAL_NOT_CLAIMED, UPGRADE_PENDING,
    };
    use crate::table::CellValue;

    fn text(raw: &str) -> CellValue {
        if raw.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(raw.to_string())
        }
    }

    fn table(headers: &[&str], rows: &[&[&str]]) -> Table {
        Table::new(
            headers.iter().map(|h| (*h).to_string()).collect(),
            rows.iter()
                .map(|row| row.iter().map(|cell| text(cell)).collect())
                .collect(),
        )
    }

    #[test]
    fn remainder_stages_anchor_on_their_predecessor() {
        for stage in ALL_STAGES {
            let d = stage.descriptor();
            if matches!(d.undefined, UndefinedDelta::Remainder(_)) {
                assert_eq!(d.predecessor, d.anchor);
            }
        }
    }

    #[test]
    fn stage_one_buckets_every_population_row() {
        let t = table(
            &["trial-credit-claim time", "first-deposit time"],
            &[
                &["2024-01-02 00:00:00", "2024-01-01 00:00:00"],
                &["2024-01-01 00:00:00", "2024-01-01 12:00:00"],
                &["", "2024-01-05 00:00:00"],
                &["garbage", "2024-01-05 00:00:00"],
                &["2024-01-01 00:00:00", ""],
            ],
        );

        let analysis = analyze_stage(&t, Stage::TrialToFirstDeposit).expect("columns present");
        let report = analysis.report;

        assert_eq!(report.denominator, 4);
        assert_eq!(report.sum_check, 4);
        assert_eq!(report.count(TRIAL_NOT_CLAIMED), Some(2));
        assert_eq!(report.count(DEPOSITED_BEFORE_CLAIM), Some(1));
        assert_eq!(report.count(CLAIMED_SAME_DAY), Some(1));
        assert_eq!(report.count("over 10 days"), Some(0));
        assert_eq!(report.ratio(TRIAL_NOT_CLAIMED), Some(0.5));
        assert_eq!(report.mean_delta_days(), Some(0.5));
        assert!(analysis.warnings.is_empty());
    }

    #[test]
    fn stage_one_mean_is_null_without_non_negative_deltas() {
        let t = table(
            &["体验金领取时间", "首充时间"],
            &[&["2024-01-03", "2024-01-01"], &["", "2024-01-01"]],
        );
        let report = analyze_stage(&t, Stage::TrialToFirstDeposit)
            .expect("columns present")
            .report;
        assert_eq!(report.mean_delta_days(), None);
        assert_eq!(report.sum_check, 2);
    }

    #[test]
    fn stage_two_pending_bucket_is_computed_by_subtraction() {
        let t = table(
            &["first-deposit time", "second-deposit time"],
            &[
                &["2024-01-01", "2024-01-01"],
                &["2024-01-01", "2024-01-09"],
                &["2024-01-10", "2024-01-01"],
                &["2024-01-01", ""],
                &["2024-01-01", "not a date"],
                &["", "2024-01-03"],
            ],
        );

        let report = analyze_stage(&t, Stage::FirstToSecondDeposit)
            .expect("columns present")
            .report;

        assert_eq!(report.denominator, 5);
        assert_eq!(report.count(SECOND_DEPOSIT_PENDING), Some(2));
        assert_eq!(report.count("1-7 days"), Some(1));
        assert_eq!(report.count("8-14 days"), Some(1));
        assert_eq!(report.count("time reversed (second before first)"), Some(1));
        assert_eq!(report.sum_check, 5);
        assert_eq!(report.conversion_rate(), Some(0.6));
        assert_eq!(
            report.distribution.last().map(|share| share.bucket.as_str()),
            Some(SECOND_DEPOSIT_PENDING)
        );
    }

    #[test]
    fn stage_three_counts_upgrade_sources_over_the_full_table() {
        let t = table(
            &["second-deposit time", "plan-upgrade time"],
            &[
                &["", "2024-02-01"],
                &["2024-01-01", "2024-01-30"],
                &["2024-01-01", ""],
            ],
        );
        let report = analyze_stage(&t, Stage::SecondDepositToUpgrade)
            .expect("columns present")
            .report;

        assert_eq!(
            report.upgrade_sources,
            Some(UpgradeSources {
                total_upgrades: 2,
                after_second_deposit: 1,
                without_second_deposit: 1,
            })
        );
        assert_eq!(report.denominator, 2);
        assert_eq!(report.count("over 28 days"), Some(1));
        assert_eq!(report.count(UPGRADE_PENDING), Some(1));
        assert_eq!(report.conversion_rate(), Some(0.5));
    }

    #[test]
    fn missing_columns_short_circuit() {
        let t = table(&["first-deposit time"], &[&["2024-01-01"]]);
        let err = analyze_stage(&t, Stage::FirstToSecondDeposit).expect_err("schema error");
        assert_eq!(
            err,
            AnalysisError::MissingColumns(vec![LifecycleColumn::SecondDeposit])
        );
        assert_eq!(err.to_string(), "missing columns: second-deposit time");
    }

    #[test]
    fn empty_population_is_a_warning_with_zero_filled_distribution() {
        let t = table(
            &["first-deposit time", "second-deposit time"],
            &[&["", "2024-01-01"], &["bad", ""]],
        );
        let analysis = analyze_stage(&t, Stage::FirstToSecondDeposit).expect("columns present");

        assert_eq!(analysis.report.denominator, 0);
        assert_eq!(analysis.report.sum_check, 0);
        assert_eq!(analysis.report.conversion_rate(), None);
        assert!(analysis.report.distribution.iter().all(|s| s.count == 0 && s.ratio == 0.0));
        assert_eq!(analysis.warnings.len(), 1);
        assert!(!analysis.has_charts());
    }

    #[test]
    fn aggregate_zero_fills_in_order() {
        let mut counts = HashMap::new();
        counts.insert("b", 3);
        let shares = aggregate(&["a", "b", "c"], &counts, 4);
        let labels: Vec<&str> = shares.iter().map(|s| s.bucket.as_str()).collect();
        assert_eq!(labels, vec!["a", "b", "c"]);
        assert_eq!(shares[0].count, 0);
        assert_eq!(shares[1].ratio, 0.75);
    }
}
