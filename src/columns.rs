//! Lifecycle column names and required-column validation.
//!
//! Every column has one canonical header plus the aliases operators
//! actually export: the Chinese headers and snake_case keys.

use serde::{Deserialize, Serialize};

use crate::table::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleColumn {
    Registration,
    TrialCreditClaim,
    FirstDeposit,
    SecondDeposit,
    PlanUpgrade,
}

pub const ALL_LIFECYCLE_COLUMNS: [LifecycleColumn; 5] = [
    LifecycleColumn::Registration,
    LifecycleColumn::TrialCreditClaim,
    LifecycleColumn::FirstDeposit,
    LifecycleColumn::SecondDeposit,
    LifecycleColumn::PlanUpgrade,
];

impl LifecycleColumn {
    pub fn header(self) -> &'static str {
        match self {
            LifecycleColumn::Registration => "registration time",
            LifecycleColumn::TrialCreditClaim => "trial-credit-claim time",
            LifecycleColumn::FirstDeposit => "first-deposit time",
            LifecycleColumn::SecondDeposit => "second-deposit time",
            LifecycleColumn::PlanUpgrade => "plan-upgrade time",
        }
    }

    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            LifecycleColumn::Registration => &["注册时间", "registered_at"],
            LifecycleColumn::TrialCreditClaim => &["体验金领取时间", "trial_credit_claimed_at"],
            LifecycleColumn::FirstDeposit => &["首充时间", "first_deposit_at"],
            LifecycleColumn::SecondDeposit => &["二充时间", "second_deposit_at"],
            LifecycleColumn::PlanUpgrade => &["升级PLUS时间", "plan_upgraded_at"],
        }
    }

    pub fn matches_header(self, header: &str) -> bool {
        let header = header.trim();
        header == self.header() || self.aliases().iter().any(|alias| *alias == header)
    }

    /// Index of the first table header naming this column.
    pub fn resolve(self, table: &Table) -> Option<usize> {
        table
            .headers()
            .iter()
            .position(|header| self.matches_header(header))
    }
}

pub fn missing_columns(table: &Table, required: &[LifecycleColumn]) -> Vec<LifecycleColumn> {
    required
        .iter()
        .copied()
        .filter(|column| column.resolve(table).is_none())
        .collect()
}

pub fn describe_missing(missing: &[LifecycleColumn]) -> String {
    let names: Vec<&str> = missing.iter().map(|column| column.header()).collect();
    format!("missing columns: {}", names.join(", "))
}
