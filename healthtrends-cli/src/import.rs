//! CSV health export reader
//!
//! One sample per row with a `metric,timestamp,value` header. Timestamps are
//! RFC 3339, or a bare `YYYY-MM-DD` date taken as midnight UTC.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use healthtrends::{HealthRecord, HealthTrendsError};
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct ExportRow {
    metric: String,
    timestamp: String,
    value: f64,
}

/// Read every record from the export at `path`
pub fn read_export(path: &Path) -> Result<Vec<HealthRecord>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open health export {}", path.display()))?;
    let records = read_records(file)
        .with_context(|| format!("Failed to import {}", path.display()))?;
    tracing::info!("Imported {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Parse records from any CSV reader
pub fn read_records<R: Read>(reader: R) -> Result<Vec<HealthRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut records = Vec::new();
    for (index, row) in reader.deserialize::<ExportRow>().enumerate() {
        // header is line 1
        let line = index + 2;
        let row = row.map_err(|e| invalid_row(line, e.to_string()))?;

        if row.metric.is_empty() {
            return Err(invalid_row(line, "empty metric name".to_string()));
        }
        if !row.value.is_finite() {
            return Err(invalid_row(line, format!("value {} is not finite", row.value)));
        }
        let timestamp = parse_timestamp(&row.timestamp)
            .ok_or_else(|| invalid_row(line, format!("unrecognised timestamp '{}'", row.timestamp)))?;

        records.push(HealthRecord::new(row.metric, timestamp, row.value));
    }

    Ok(records)
}

/// RFC 3339 or `YYYY-MM-DD`
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
}

fn invalid_row(line: usize, reason: String) -> anyhow::Error {
    HealthTrendsError::invalid_input("data", format!("line {line}: {reason}")).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use healthtrends::MetricId;

    #[test]
    fn test_reads_both_timestamp_forms() {
        let csv = "metric,timestamp,value\n\
                   steps,2024-03-01,8200\n\
                   heart_rate, 2024-03-01T07:30:00+02:00 ,61.5\n";

        let records = read_records(csv.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].metric, MetricId::new("steps"));
        assert_eq!(
            records[0].timestamp,
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            records[1].timestamp,
            Utc.with_ymd_and_hms(2024, 3, 1, 5, 30, 0).unwrap()
        );
        assert_eq!(records[1].value, 61.5);
    }

    #[test]
    fn test_bad_rows_are_invalid_input_with_line_numbers() {
        let csv = "metric,timestamp,value\nsteps,2024-03-01,100\nsteps,yesterday,100\n";
        let error = read_records(csv.as_bytes()).unwrap_err();

        let inner = error.downcast_ref::<HealthTrendsError>().unwrap();
        assert!(inner.is_invalid_input());
        assert!(error.to_string().contains("line 3"));

        let csv = "metric,timestamp,value\nsteps,2024-03-01,lots\n";
        assert!(read_records(csv.as_bytes()).is_err());
    }

    #[test]
    fn test_header_only_export_is_empty() {
        let records = read_records("metric,timestamp,value\n".as_bytes()).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_missing_file_has_context() {
        let error = read_export(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(error.to_string().contains("Failed to open health export"));
    }
}
