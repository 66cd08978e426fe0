//! Funnel stage descriptors.
//!
//! The three reports share one pipeline; everything that differs between
//! them (columns, bucket edges, bucket order, derived scalars, wording)
//! lives in a static [`StageDescriptor`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::columns::LifecycleColumn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "1")]
    TrialToFirstDeposit,
    #[serde(rename = "2")]
    FirstToSecondDeposit,
    #[serde(rename = "3")]
    SecondDepositToUpgrade,
}

pub const ALL_STAGES: [Stage; 3] = [
    Stage::TrialToFirstDeposit,
    Stage::FirstToSecondDeposit,
    Stage::SecondDepositToUpgrade,
];

#[derive(Debug, Error, PartialEq, Eq)]
#[error("module must be one of 1/2/3, got '{0}'")]
pub struct StageParseError(pub String);

impl Stage {
    pub fn id(self) -> &'static str {
        match self {
            Stage::TrialToFirstDeposit => "1",
            Stage::FirstToSecondDeposit => "2",
            Stage::SecondDepositToUpgrade => "3",
        }
    }

    pub fn descriptor(self) -> &'static StageDescriptor {
        match self {
            Stage::TrialToFirstDeposit => &TRIAL_TO_FIRST_DEPOSIT,
            Stage::FirstToSecondDeposit => &FIRST_TO_SECOND_DEPOSIT,
            Stage::SecondDepositToUpgrade => &SECOND_DEPOSIT_TO_UPGRADE,
        }
    }
}

impl FromStr for Stage {
    type Err = StageParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "1" => Ok(Stage::TrialToFirstDeposit),
            "2" => Ok(Stage::FirstToSecondDeposit),
            "3" => Ok(Stage::SecondDepositToUpgrade),
            other => Err(StageParseError(other.to_string())),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpperBound {
    /// `delta < x`
    Below(f64),
    /// `delta <= x`
    AtMost(f64),
}

impl UpperBound {
    fn admits(self, delta: f64) -> bool {
        match self {
            UpperBound::Below(x) => delta < x,
            UpperBound::AtMost(x) => delta <= x,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaRange {
    pub bound: UpperBound,
    pub bucket: &'static str,
}

/// How population rows without a computable delta are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndefinedDelta {
    /// Each such row is classified into this bucket.
    PerRow(&'static str),
    /// This bucket holds `denominator - rows with the successor present`.
    Remainder(&'static str),
}

impl UndefinedDelta {
    pub fn bucket(self) -> &'static str {
        match self {
            UndefinedDelta::PerRow(bucket) | UndefinedDelta::Remainder(bucket) => bucket,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedScalar {
    /// Mean delta over rows whose delta is defined and non-negative.
    MeanNonNegativeDelta,
    /// Rows with the successor present, over the denominator.
    ConversionRate,
}

#[derive(Debug)]
pub struct StageDescriptor {
    pub stage: Stage,
    pub required: &'static [LifecycleColumn],
    pub normalized: &'static [LifecycleColumn],
    pub anchor: LifecycleColumn,
    pub predecessor: LifecycleColumn,
    pub successor: LifecycleColumn,
    pub undefined: UndefinedDelta,
    pub reversed: &'static str,
    pub ranges: &'static [DeltaRange],
    pub overflow: &'static str,
    pub order: &'static [&'static str],
    pub derived: DerivedScalar,
    pub tracks_upgrade_sources: bool,
    pub empty_population_warning: &'static str,
    pub bar_title: &'static str,
    pub pie_title: &'static str,
}

impl StageDescriptor {
    /// Bucket for a defined delta; first match wins.
    pub fn classify(&self, delta_days: f64) -> &'static str {
        if delta_days < 0.0 {
            return self.reversed;
        }
        self.ranges
            .iter()
            .find(|range| range.bound.admits(delta_days))
            .map(|range| range.bucket)
            .unwrap_or(self.overflow)
    }
}

pub const TRIAL_NOT_CLAIMED: &str = "trial credit not claimed (delta unavailable)";
pub const DEPOSITED_BEFORE_CLAIM: &str = "deposited before claiming credit";
pub const CLAIMED_SAME_DAY: &str = "claimed and deposited same day";
pub const SECOND_DEPOSIT_PENDING: &str = "second deposit not yet completed";
pub const SECOND_BEFORE_FIRST: &str = "time reversed (second before first)";
pub const UPGRADE_PENDING: &str = "not yet upgraded";
pub const UPGRADE_BEFORE_SECOND: &str = "time reversed (upgrade before second deposit)";

pub static TRIAL_TO_FIRST_DEPOSIT: StageDescriptor = StageDescriptor {
    stage: Stage::TrialToFirstDeposit,
    required: &[LifecycleColumn::FirstDeposit, LifecycleColumn::TrialCreditClaim],
    normalized: &[
        LifecycleColumn::Registration,
        LifecycleColumn::TrialCreditClaim,
        LifecycleColumn::FirstDeposit,
    ],
    anchor: LifecycleColumn::FirstDeposit,
    predecessor: LifecycleColumn::TrialCreditClaim,
    successor: LifecycleColumn::FirstDeposit,
    undefined: UndefinedDelta::PerRow(TRIAL_NOT_CLAIMED),
    reversed: DEPOSITED_BEFORE_CLAIM,
    ranges: &[
        DeltaRange { bound: UpperBound::Below(1.0), bucket: CLAIMED_SAME_DAY },
        DeltaRange { bound: UpperBound::AtMost(3.0), bucket: "1-3 days" },
        DeltaRange { bound: UpperBound::AtMost(6.0), bucket: "4-6 days" },
        DeltaRange { bound: UpperBound::AtMost(10.0), bucket: "7-10 days" },
    ],
    overflow: "over 10 days",
    order: &[
        TRIAL_NOT_CLAIMED,
        DEPOSITED_BEFORE_CLAIM,
        CLAIMED_SAME_DAY,
        "1-3 days",
        "4-6 days",
        "7-10 days",
        "over 10 days",
    ],
    derived: DerivedScalar::MeanNonNegativeDelta,
    tracks_upgrade_sources: false,
    empty_population_warning: "first-deposit time is empty for every row; no distribution chart can be produced.",
    bar_title: "Stage 1: time from trial credit to first deposit",
    pie_title: "Stage 1: first deposit timing share",
};

pub static FIRST_TO_SECOND_DEPOSIT: StageDescriptor = StageDescriptor {
    stage: Stage::FirstToSecondDeposit,
    required: &[LifecycleColumn::FirstDeposit, LifecycleColumn::SecondDeposit],
    normalized: &[LifecycleColumn::FirstDeposit, LifecycleColumn::SecondDeposit],
    anchor: LifecycleColumn::FirstDeposit,
    predecessor: LifecycleColumn::FirstDeposit,
    successor: LifecycleColumn::SecondDeposit,
    undefined: UndefinedDelta::Remainder(SECOND_DEPOSIT_PENDING),
    reversed: SECOND_BEFORE_FIRST,
    ranges: &[
        DeltaRange { bound: UpperBound::AtMost(7.0), bucket: "1-7 days" },
        DeltaRange { bound: UpperBound::AtMost(14.0), bucket: "8-14 days" },
        DeltaRange { bound: UpperBound::AtMost(20.0), bucket: "15-20 days" },
    ],
    overflow: "over 20 days",
    order: &[
        "1-7 days",
        "8-14 days",
        "15-20 days",
        "over 20 days",
        SECOND_BEFORE_FIRST,
        SECOND_DEPOSIT_PENDING,
    ],
    derived: DerivedScalar::ConversionRate,
    tracks_upgrade_sources: false,
    empty_population_warning: "first-deposit time is empty for every row; second deposits cannot be analyzed.",
    bar_title: "Stage 2: time from first to second deposit",
    pie_title: "Stage 2: second deposit timing share",
};

pub static SECOND_DEPOSIT_TO_UPGRADE: StageDescriptor = StageDescriptor {
    stage: Stage::SecondDepositToUpgrade,
    required: &[LifecycleColumn::SecondDeposit, LifecycleColumn::PlanUpgrade],
    normalized: &[LifecycleColumn::SecondDeposit, LifecycleColumn::PlanUpgrade],
    anchor: LifecycleColumn::SecondDeposit,
    predecessor: LifecycleColumn::SecondDeposit,
    successor: LifecycleColumn::PlanUpgrade,
    undefined: UndefinedDelta::Remainder(UPGRADE_PENDING),
    reversed: UPGRADE_BEFORE_SECOND,
    ranges: &[
        DeltaRange { bound: UpperBound::AtMost(7.0), bucket: "1-7 days" },
        DeltaRange { bound: UpperBound::AtMost(14.0), bucket: "8-14 days" },
        DeltaRange { bound: UpperBound::AtMost(21.0), bucket: "15-21 days" },
        DeltaRange { bound: UpperBound::AtMost(28.0), bucket: "22-28 days" },
    ],
    overflow: "over 28 days",
    order: &[
        "1-7 days",
        "8-14 days",
        "15-21 days",
        "22-28 days",
        "over 28 days",
        UPGRADE_BEFORE_SECOND,
        UPGRADE_PENDING,
    ],
    derived: DerivedScalar::ConversionRate,
    tracks_upgrade_sources: true,
    empty_population_warning: "second-deposit time is empty for every row; the second-deposit-to-upgrade distribution is unavailable, upgrade sources are still reported.",
    bar_title: "Stage 3: time from second deposit to upgrade",
    pie_title: "Stage 3: upgrade sources",
};
