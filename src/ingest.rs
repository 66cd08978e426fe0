//! Upload parsing: first worksheet of an Excel workbook, or a CSV file.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use thiserror::Error;
use tracing::info;

use crate::table::{CellValue, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFormat {
    Excel,
    Csv,
}

impl UploadFormat {
    /// Format implied by the file name extension, case-insensitive.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let (_, ext) = file_name.trim().rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "xlsx" | "xls" => Some(UploadFormat::Excel),
            "csv" => Some(UploadFormat::Csv),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            UploadFormat::Excel => "excel",
            UploadFormat::Csv => "csv",
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),
    #[error("workbook has no worksheets")]
    NoWorksheet,
    #[error("excel error: {0}")]
    Excel(#[from] calamine::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

pub fn read_table(file_name: &str, bytes: &[u8]) -> Result<Table, IngestError> {
    let format = UploadFormat::from_file_name(file_name)
        .ok_or_else(|| IngestError::UnsupportedFormat(file_name.to_string()))?;

    let table = match format {
        UploadFormat::Excel => read_excel(bytes)?,
        UploadFormat::Csv => read_csv(bytes)?,
    };

    info!(
        component = "ingest",
        event = "ingest.table.loaded",
        format = format.as_str(),
        bytes = bytes.len(),
        columns = table.headers().len(),
        rows = table.row_count()
    );

    Ok(table)
}

pub fn read_excel(bytes: &[u8]) -> Result<Table, IngestError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(IngestError::NoWorksheet)??;

    let mut rows = range.rows();
    let headers = match rows.next() {
        Some(header_row) => header_row
            .iter()
            .map(|cell| cell.to_string().trim().to_string())
            .collect(),
        None => return Ok(Table::default()),
    };
    let body = rows
        .map(|row| row.iter().map(excel_cell).collect())
        .collect();

    Ok(Table::new(headers, body))
}

pub fn read_csv(bytes: &[u8]) -> Result<Table, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(Cursor::new(bytes));

    let headers = reader
        .headers()?
        .iter()
        .map(|header| header.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(csv_cell).collect());
    }

    Ok(Table::new(headers, rows))
}

fn excel_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => csv_cell(s),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(CellValue::DateTime)
            .unwrap_or_else(|| CellValue::Number(dt.as_f64())),
        Data::Error(e) => CellValue::Error(e.to_string()),
    }
}

fn csv_cell(raw: &str) -> CellValue {
    if raw.trim().is_empty() {
        CellValue::Empty
    } else {
        CellValue::Text(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::{CellErrorType, ExcelDateTime, ExcelDateTimeType};
    use chrono::NaiveDateTime;

    use crate::timestamps::{coerce_cell, Timestamp};

    fn ts(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").expect("valid test timestamp")
    }

    #[test]
    fn excel_cells_map_to_timestamps() {
        let native = Data::DateTime(ExcelDateTime::new(
            45_292.25,
            ExcelDateTimeType::DateTime,
            false,
        ));
        assert_eq!(excel_cell(&native), CellValue::DateTime(ts("2024-01-01 06:00:00")));
        assert_eq!(
            coerce_cell(&excel_cell(&native)),
            Timestamp::Present(ts("2024-01-01 06:00:00"))
        );

        assert_eq!(excel_cell(&Data::Float(45_292.5)), CellValue::Number(45_292.5));
        assert_eq!(
            coerce_cell(&excel_cell(&Data::Float(45_292.5))),
            Timestamp::Present(ts("2024-01-01 12:00:00"))
        );
        assert_eq!(
            coerce_cell(&excel_cell(&Data::Int(45_293))),
            Timestamp::Present(ts("2024-01-02 00:00:00"))
        );

        let iso = excel_cell(&Data::DateTimeIso("2024-01-03T08:30:00".to_string()));
        assert_eq!(iso, CellValue::Text("2024-01-03T08:30:00".to_string()));
        assert_eq!(coerce_cell(&iso), Timestamp::Present(ts("2024-01-03 08:30:00")));

        let error = excel_cell(&Data::Error(CellErrorType::NA));
        assert!(matches!(error, CellValue::Error(_)));
        assert_eq!(coerce_cell(&error), Timestamp::Unparseable);

        assert_eq!(excel_cell(&Data::Empty), CellValue::Empty);
        assert_eq!(coerce_cell(&excel_cell(&Data::String("  ".to_string()))), Timestamp::Absent);
    }

    #[test]
    fn format_detection_is_case_insensitive_and_rejects_others() {
        assert_eq!(UploadFormat::from_file_name("users.XLSX"), Some(UploadFormat::Excel));
        assert_eq!(UploadFormat::from_file_name("users.xls"), Some(UploadFormat::Excel));
        assert_eq!(UploadFormat::from_file_name("users.csv"), Some(UploadFormat::Csv));
        assert_eq!(UploadFormat::from_file_name("users.json"), None);
        assert_eq!(UploadFormat::from_file_name("xlsx"), None);
    }

    #[test]
    fn csv_reads_headers_rows_and_blank_cells() {
        let raw = "\u{feff}首充时间,二充时间\n2024-01-01 10:00:00,\n,2024-01-09\n";
        let table = read_csv(raw.as_bytes()).expect("csv parses");

        assert_eq!(table.headers(), &["首充时间".to_string(), "二充时间".to_string()]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(
            table.cell(0, 0),
            &CellValue::Text("2024-01-01 10:00:00".to_string())
        );
        assert_eq!(table.cell(0, 1), &CellValue::Empty);
        assert_eq!(table.cell(1, 0), &CellValue::Empty);
    }

    #[test]
    fn garbage_excel_bytes_are_an_error() {
        let err = read_table("users.xlsx", b"definitely not a workbook").expect_err("must fail");
        assert!(matches!(err, IngestError::Excel(_)));
    }

    #[test]
    fn unsupported_extension_is_an_error() {
        let err = read_table("users.txt", b"a,b").expect_err("must fail");
        assert!(matches!(err, IngestError::UnsupportedFormat(_)));
    }
}
