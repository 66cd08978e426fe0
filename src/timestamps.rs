//! Per-cell timestamp coercion.
//!
//! Bad cells never fail a column: an empty cell is `Absent`, anything that
//! does not parse is `Unparseable`, and both read as missing downstream.
//!
//! Text carrying a UTC offset keeps its wall-clock time, so it lines up with
//! the offset-free cells it is compared against.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::columns::LifecycleColumn;
use crate::table::{CellValue, Table};

const DATETIME_FORMATS: [&str; 10] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%Y.%m.%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%Y年%m月%d日 %H:%M:%S",
    "%Y年%m月%d日 %H:%M",
];

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%m/%d/%Y", "%Y年%m月%d日"];

// 9999-12-31 is serial 2958465.
const EXCEL_SERIAL_MIN: f64 = 1.0;
const EXCEL_SERIAL_MAX_EXCLUSIVE: f64 = 2_958_466.0;
const MILLIS_PER_DAY: f64 = 86_400_000.0;
const NANOS_PER_DAY: f64 = 86_400_000_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    Present(NaiveDateTime),
    Absent,
    Unparseable,
}

impl Timestamp {
    pub fn value(self) -> Option<NaiveDateTime> {
        match self {
            Timestamp::Present(ts) => Some(ts),
            Timestamp::Absent | Timestamp::Unparseable => None,
        }
    }

    pub fn is_present(self) -> bool {
        matches!(self, Timestamp::Present(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnQuality {
    pub column: String,
    pub present: u64,
    pub absent: u64,
    pub unparseable: u64,
}

/// Normalized timestamp columns of one table, keyed by lifecycle column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimestampFrame {
    row_count: usize,
    columns: BTreeMap<LifecycleColumn, Vec<Timestamp>>,
}

impl TimestampFrame {
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column(&self, column: LifecycleColumn) -> Option<&[Timestamp]> {
        self.columns.get(&column).map(Vec::as_slice)
    }

    /// Timestamp at `row`; columns that were never normalized read as absent.
    pub fn get(&self, column: LifecycleColumn, row: usize) -> Timestamp {
        self.columns
            .get(&column)
            .and_then(|values| values.get(row).copied())
            .unwrap_or(Timestamp::Absent)
    }

    pub fn quality(&self) -> Vec<ColumnQuality> {
        self.columns
            .iter()
            .map(|(column, values)| {
                let mut quality = ColumnQuality {
                    column: column.header().to_string(),
                    present: 0,
                    absent: 0,
                    unparseable: 0,
                };
                for value in values {
                    match value {
                        Timestamp::Present(_) => quality.present += 1,
                        Timestamp::Absent => quality.absent += 1,
                        Timestamp::Unparseable => quality.unparseable += 1,
                    }
                }
                quality
            })
            .collect()
    }
}

pub fn normalize_timestamps(table: &Table, columns: &[LifecycleColumn]) -> TimestampFrame {
    let mut frame = TimestampFrame {
        row_count: table.row_count(),
        columns: BTreeMap::new(),
    };

    for column in columns {
        let Some(idx) = column.resolve(table) else {
            continue;
        };
        let values = table.column_cells(idx).map(coerce_cell).collect();
        frame.columns.insert(*column, values);
    }

    for quality in frame.quality() {
        debug!(
            component = "timestamps",
            event = "timestamps.normalized",
            column = %quality.column,
            present = quality.present,
            absent = quality.absent,
            unparseable = quality.unparseable
        );
    }

    frame
}

pub fn coerce_cell(cell: &CellValue) -> Timestamp {
    match cell {
        CellValue::Empty => Timestamp::Absent,
        CellValue::DateTime(ts) => Timestamp::Present(*ts),
        CellValue::Number(serial) => excel_serial_to_datetime(*serial)
            .map(Timestamp::Present)
            .unwrap_or(Timestamp::Unparseable),
        CellValue::Text(raw) if raw.trim().is_empty() => Timestamp::Absent,
        CellValue::Text(raw) => parse_timestamp_str(raw)
            .map(Timestamp::Present)
            .unwrap_or(Timestamp::Unparseable),
        CellValue::Bool(_) | CellValue::Error(_) => Timestamp::Unparseable,
    }
}

pub fn parse_timestamp_str(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    parse_compact_date(s)
}

/// `YYYYMMDD` with no separators.
fn parse_compact_date(s: &str) -> Option<NaiveDateTime> {
    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year = s[..4].parse().ok()?;
    let month = s[4..6].parse().ok()?;
    let day = s[6..].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)
}

/// Excel 1900-system serial day number; the fraction is the time of day.
pub fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || !(EXCEL_SERIAL_MIN..EXCEL_SERIAL_MAX_EXCLUSIVE).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let offset = TimeDelta::try_milliseconds((serial * MILLIS_PER_DAY).round() as i64)?;
    epoch.checked_add_signed(offset)
}

/// Signed fractional days from `earlier` to `later`.
pub fn delta_days(earlier: NaiveDateTime, later: NaiveDateTime) -> f64 {
    let delta = later - earlier;
    match delta.num_nanoseconds() {
        Some(nanos) => nanos as f64 / NANOS_PER_DAY,
        None => delta.num_milliseconds() as f64 / MILLIS_PER_DAY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").expect("valid test timestamp")
    }

    #[test]
    fn parses_common_spreadsheet_text_formats() {
        assert_eq!(parse_timestamp_str("2024-03-01 08:30:00"), Some(ts("2024-03-01 08:30:00")));
        assert_eq!(
            parse_timestamp_str("2024-03-01T08:30:00.250").map(|d| d.and_utc().timestamp_subsec_millis()),
            Some(250)
        );
        assert_eq!(parse_timestamp_str("2024/03/01 08:30"), Some(ts("2024-03-01 08:30:00")));
        assert_eq!(parse_timestamp_str(" 2024-03-01 "), Some(ts("2024-03-01 00:00:00")));
        assert_eq!(parse_timestamp_str("2024年3月1日"), Some(ts("2024-03-01 00:00:00")));
    }

    #[test]
    fn offset_timestamps_keep_wall_clock_time() {
        assert_eq!(parse_timestamp_str("2024-03-01T08:30:00+02:00"), Some(ts("2024-03-01 08:30:00")));
        let with_offset = parse_timestamp_str("2024-01-01T10:00:00+08:00").expect("rfc3339");
        let naive = parse_timestamp_str("2024-01-01 10:00:00").expect("naive");
        assert_eq!(delta_days(naive, with_offset), 0.0);
    }

    #[test]
    fn dotted_compact_and_month_first_dates_parse() {
        assert_eq!(parse_timestamp_str("2024.01.01"), Some(ts("2024-01-01 00:00:00")));
        assert_eq!(parse_timestamp_str("20240101"), Some(ts("2024-01-01 00:00:00")));
        assert_eq!(parse_timestamp_str("01/02/2024"), Some(ts("2024-01-02 00:00:00")));
        assert_eq!(parse_timestamp_str("01/02/2024 09:15"), Some(ts("2024-01-02 09:15:00")));
        assert_eq!(parse_timestamp_str("20241301"), None);
        assert_eq!(parse_timestamp_str("2024010"), None);
    }

    #[test]
    fn unparseable_and_absent_are_distinct() {
        let native = ts("2024-01-01 08:00:00");
        assert_eq!(coerce_cell(&CellValue::DateTime(native)), Timestamp::Present(native));
        assert_eq!(
            coerce_cell(&CellValue::Number(45_292.5)),
            Timestamp::Present(ts("2024-01-01 12:00:00"))
        );
        assert_eq!(coerce_cell(&CellValue::Empty), Timestamp::Absent);
        assert_eq!(coerce_cell(&CellValue::Text("   ".to_string())), Timestamp::Absent);
        assert_eq!(coerce_cell(&CellValue::Text("soon".to_string())), Timestamp::Unparseable);
        assert_eq!(coerce_cell(&CellValue::Bool(true)), Timestamp::Unparseable);
        assert_eq!(coerce_cell(&CellValue::Error("#N/A".to_string())), Timestamp::Unparseable);
        assert_eq!(coerce_cell(&CellValue::Number(-5.0)), Timestamp::Unparseable);
        assert_eq!(coerce_cell(&CellValue::Number(f64::NAN)), Timestamp::Unparseable);
    }

    #[test]
    fn excel_serial_numbers_convert_with_time_of_day() {
        // 45292.5 is 2024-01-01 12:00.
        assert_eq!(excel_serial_to_datetime(45_292.5), Some(ts("2024-01-01 12:00:00")));
        assert_eq!(excel_serial_to_datetime(0.5), None);
    }

    #[test]
    fn delta_keeps_sub_day_precision_and_sign() {
        let a = ts("2024-01-01 00:00:00");
        let b = ts("2024-01-01 12:00:00");
        assert!((delta_days(a, b) - 0.5).abs() < 1e-12);
        assert!((delta_days(b, a) + 0.5).abs() < 1e-12);
    }

    #[test]
    fn frame_tracks_quality_and_skips_absent_columns() {
        let table = Table::new(
            vec!["首充时间".to_string()],
            vec![
                vec![CellValue::Text("2024-01-01".to_string())],
                vec![CellValue::Empty],
                vec![CellValue::Text("n/a".to_string())],
            ],
        );
        let frame = normalize_timestamps(
            &table,
            &[LifecycleColumn::FirstDeposit, LifecycleColumn::SecondDeposit],
        );

        assert_eq!(frame.row_count(), 3);
        assert!(frame.column(LifecycleColumn::SecondDeposit).is_none());
        assert_eq!(frame.get(LifecycleColumn::SecondDeposit, 0), Timestamp::Absent);
        assert_eq!(
            frame.quality(),
            vec![ColumnQuality {
                column: "first-deposit time".to_string(),
                present: 1,
                absent: 1,
                unparseable: 1,
            }]
        );
    }
}
