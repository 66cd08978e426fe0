//! Report values returned to callers, plus presentation rounding.

use serde::Serialize;

use crate::stage::Stage;
use crate::timestamps::ColumnQuality;

pub const RATIO_DECIMALS: i32 = 4;
pub const DAYS_DECIMALS: i32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketShare {
    pub bucket: String,
    pub count: u64,
    pub ratio: f64,
}

/// Where upgrades came from, counted over the whole table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpgradeSources {
    pub total_upgrades: u64,
    pub after_second_deposit: u64,
    pub without_second_deposit: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DerivedMetrics {
    MeanLatency {
        mean_delta_days: Option<f64>,
    },
    Conversion {
        converted: u64,
        conversion_rate: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunnelReport {
    pub stage: Stage,
    pub denominator: u64,
    pub distribution: Vec<BucketShare>,
    pub sum_check: u64,
    #[serde(flatten)]
    pub derived: DerivedMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_sources: Option<UpgradeSources>,
    pub column_quality: Vec<ColumnQuality>,
}

impl FunnelReport {
    pub fn count(&self, bucket: &str) -> Option<u64> {
        self.share(bucket).map(|share| share.count)
    }

    pub fn ratio(&self, bucket: &str) -> Option<f64> {
        self.share(bucket).map(|share| share.ratio)
    }

    pub fn mean_delta_days(&self) -> Option<f64> {
        match self.derived {
            DerivedMetrics::MeanLatency { mean_delta_days } => mean_delta_days,
            DerivedMetrics::Conversion { .. } => None,
        }
    }

    pub fn conversion_rate(&self) -> Option<f64> {
        match self.derived {
            DerivedMetrics::Conversion {
                conversion_rate, ..
            } => conversion_rate,
            DerivedMetrics::MeanLatency { .. } => None,
        }
    }

    fn share(&self, bucket: &str) -> Option<&BucketShare> {
        self.distribution.iter().find(|share| share.bucket == bucket)
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// `numerator / denominator` at ratio precision, or 0 for an empty denominator.
pub fn ratio_of(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        round_to(numerator as f64 / denominator as f64, RATIO_DECIMALS)
    }
}
