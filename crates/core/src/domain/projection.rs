use crate::domain::forecast::{Cell, ForecastBatch, AIRPORT_COLUMN};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

pub const LOCAL_TIME_COLUMN: &str = "validTimeLocal";
pub const UTC_TIME_COLUMN: &str = "validTimeUtc";

/// Output format for both timestamp columns.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Columns written to the sheet, in sheet order. Anything else the provider sends is dropped.
pub const DESIRED_COLUMNS: [&str; 16] = [
    AIRPORT_COLUMN,
    LOCAL_TIME_COLUMN,
    UTC_TIME_COLUMN,
    "pressureMeanSeaLevel",
    "relativeHumidity",
    "qpf",
    "temperature",
    "temperatureDewPoint",
    "temperatureFeelsLike",
    "visibility",
    "windDirection",
    "windGust",
    "windSpeed",
    "uvIndex",
    "iconCode",
    "iconCodeExtended",
];

const LOCAL_NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectedTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    /// Non-empty timestamp values that could not be parsed, per column.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub degraded: BTreeMap<String, usize>,
}

impl ProjectedTable {
    /// Header row followed by the data rows, ready for a sheet.
    pub fn into_sheet_rows(self) -> Vec<Vec<Cell>> {
        let mut out = Vec::with_capacity(self.rows.len() + 1);
        out.push(self.header.into_iter().map(Cell::Text).collect());
        out.extend(self.rows);
        out
    }
}

/// Desired columns that are present, in desired order.
pub fn select_columns(present: &BTreeSet<String>) -> Vec<&'static str> {
    DESIRED_COLUMNS
        .iter()
        .copied()
        .filter(|c| present.contains(*c))
        .collect()
}

pub fn project(batch: &ForecastBatch) -> ProjectedTable {
    let columns = select_columns(batch.columns());
    let mut degraded: BTreeMap<String, usize> = BTreeMap::new();

    let rows = batch
        .rows()
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|&col| {
                    let raw = row.get(col).unwrap_or(&Cell::Null);
                    let cell = match col {
                        UTC_TIME_COLUMN => format_utc_epoch(raw),
                        LOCAL_TIME_COLUMN => format_local_iso(raw),
                        _ => raw.clone(),
                    };
                    if cell.is_null() && !raw.is_null() {
                        *degraded.entry(col.to_string()).or_default() += 1;
                    }
                    cell
                })
                .collect()
        })
        .collect();

    ProjectedTable {
        header: columns.into_iter().map(str::to_string).collect(),
        rows,
        degraded,
    }
}

/// Epoch seconds (number or numeric text) to a UTC wall-clock string.
pub fn format_utc_epoch(cell: &Cell) -> Cell {
    let secs = match cell {
        Cell::Number(n) => Some(*n),
        Cell::Text(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    secs.and_then(epoch_to_utc)
        .map(|dt| Cell::Text(dt.format(TIMESTAMP_FORMAT).to_string()))
        .unwrap_or(Cell::Null)
}

/// ISO-like local time to a wall-clock string. Any offset in the value is ignored.
pub fn format_local_iso(cell: &Cell) -> Cell {
    match cell {
        Cell::Text(s) => parse_local(s)
            .map(|dt| Cell::Text(dt.format(TIMESTAMP_FORMAT).to_string()))
            .unwrap_or(Cell::Null),
        _ => Cell::Null,
    }
}

fn epoch_to_utc(secs: f64) -> Option<NaiveDateTime> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    if whole < i64::MIN as f64 || whole > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp(whole as i64, nanos).map(|dt| dt.naive_utc())
}

fn parse_local(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.naive_local());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    for fmt in LOCAL_NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::forecast::{ForecastTable, Row};

    fn row(pairs: &[(&str, Cell)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn table(columns: &[&str], rows: Vec<Row>) -> ForecastTable {
        ForecastTable {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    #[test]
    fn header_is_desired_intersect_present_in_fixed_order() {
        let mut batch = ForecastBatch::new();
        batch.push(
            "LHR",
            table(
                &["windSpeed", "dayOfWeek", "temperature", "validTimeUtc"],
                vec![row(&[
                    ("windSpeed", Cell::Number(7.0)),
                    ("dayOfWeek", Cell::text("Monday")),
                    ("temperature", Cell::Number(61.0)),
                    ("validTimeUtc", Cell::Number(0.0)),
                ])],
            ),
        );

        let projected = project(&batch);
        assert_eq!(
            projected.header,
            vec!["airport", "validTimeUtc", "temperature", "windSpeed"]
        );
        assert_eq!(
            projected.rows[0],
            vec![
                Cell::text("LHR"),
                Cell::text("1970-01-01 00:00"),
                Cell::Number(61.0),
                Cell::Number(7.0),
            ]
        );
    }

    #[test]
    fn columns_missing_from_one_airport_become_blank() {
        let mut batch = ForecastBatch::new();
        batch.push(
            "LHR",
            table(&["qpf"], vec![row(&[("qpf", Cell::Number(0.1))])]),
        );
        batch.push(
            "SYD",
            table(&["uvIndex"], vec![row(&[("uvIndex", Cell::Number(3.0))])]),
        );

        let projected = project(&batch);
        assert_eq!(projected.header, vec!["airport", "qpf", "uvIndex"]);
        assert_eq!(
            projected.rows[0],
            vec![Cell::text("LHR"), Cell::Number(0.1), Cell::Null]
        );
        assert_eq!(
            projected.rows[1],
            vec![Cell::text("SYD"), Cell::Null, Cell::Number(3.0)]
        );
        assert!(projected.degraded.is_empty());
    }

    #[test]
    fn epoch_zero_renders_as_unix_origin() {
        assert_eq!(
            format_utc_epoch(&Cell::Number(0.0)),
            Cell::text("1970-01-01 00:00")
        );
        assert_eq!(
            format_utc_epoch(&Cell::text("1755493200")),
            Cell::text("2025-08-18 05:00")
        );
    }

    #[test]
    fn local_time_keeps_provider_wall_clock() {
        assert_eq!(
            format_local_iso(&Cell::text("2025-08-18T10:30:00+0530")),
            Cell::text("2025-08-18 10:30")
        );
        assert_eq!(
            format_local_iso(&Cell::text("2025-08-18T06:00:00+01:00")),
            Cell::text("2025-08-18 06:00")
        );
        assert_eq!(
            format_local_iso(&Cell::text("2025-08-18 23:15:00")),
            Cell::text("2025-08-18 23:15")
        );
    }

    #[test]
    fn unparseable_timestamps_degrade_to_blank() {
        let mut batch = ForecastBatch::new();
        batch.push(
            "HKG",
            table(
                &["validTimeLocal", "validTimeUtc"],
                vec![
                    row(&[
                        ("validTimeLocal", Cell::text("not a time")),
                        ("validTimeUtc", Cell::text("soon")),
                    ]),
                    row(&[
                        ("validTimeLocal", Cell::Null),
                        ("validTimeUtc", Cell::Number(60.0)),
                    ]),
                ],
            ),
        );

        let projected = project(&batch);
        assert_eq!(projected.rows[0][1], Cell::Null);
        assert_eq!(projected.rows[0][2], Cell::Null);
        assert_eq!(projected.rows[1][1], Cell::Null);
        assert_eq!(projected.rows[1][2], Cell::text("1970-01-01 00:01"));
        assert_eq!(projected.degraded.get("validTimeLocal"), Some(&1));
        assert_eq!(projected.degraded.get("validTimeUtc"), Some(&1));
    }

    #[test]
    fn sheet_rows_start_with_header() {
        let projected = ProjectedTable {
            header: vec!["airport".into()],
            rows: vec![vec![Cell::text("BOM")]],
            degraded: BTreeMap::new(),
        };
        let rows = projected.into_sheet_rows();
        assert_eq!(rows, vec![vec![Cell::text("airport")], vec![Cell::text("BOM")]]);
    }
}
