use crate::config::Settings;
use crate::domain::forecast::{ForecastBatch, RowGroup};
use crate::domain::projection::project;
use crate::forecast::ForecastProvider;
use crate::time::sheet_name::sheet_name_for;
use crate::workbook::package::Package;
use crate::workbook::Sheet;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct CaptureJob {
    /// Fetched in this order; the sheet keeps the same airport order.
    pub airports: Vec<String>,
    pub workbook_path: PathBuf,
    /// Fetch and shape rows but leave the workbook alone.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureReport {
    pub run_date: NaiveDate,
    pub sheet_name: String,
    pub workbook_path: PathBuf,
    pub rows: usize,
    pub columns: Vec<String>,
    pub groups: Vec<RowGroup>,
    pub replaced_existing: bool,
    pub written: bool,
}

impl CaptureJob {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            airports: settings.airports.clone(),
            workbook_path: settings.workbook_path.clone(),
            dry_run: false,
        }
    }

    /// Fetches every airport in order. The first failure aborts with nothing kept.
    pub async fn fetch_batch(&self, provider: &dyn ForecastProvider) -> Result<ForecastBatch> {
        let mut batch = ForecastBatch::new();
        for airport in &self.airports {
            let table = provider
                .fetch_hourly(airport)
                .await
                .with_context(|| format!("fetch hourly forecast failed (airport={airport})"))?;

            tracing::info!(
                airport = %airport,
                provider = provider.provider_name(),
                rows = table.len(),
                columns = table.columns.len(),
                "fetched hourly forecast"
            );
            batch.push(airport, table);
        }
        Ok(batch)
    }

    pub async fn run(
        &self,
        provider: &dyn ForecastProvider,
        run_date: NaiveDate,
    ) -> Result<CaptureReport> {
        anyhow::ensure!(!self.airports.is_empty(), "no airports configured");

        let batch = self.fetch_batch(provider).await?;
        let groups = batch.groups().to_vec();

        let projected = project(&batch);
        for (column, count) in &projected.degraded {
            tracing::warn!(%column, count, "unparseable timestamps written as blank cells");
        }

        let sheet_name = sheet_name_for(run_date);
        let rows = projected.rows.len();
        let columns = projected.header.clone();

        let mut report = CaptureReport {
            run_date,
            sheet_name: sheet_name.clone(),
            workbook_path: self.workbook_path.clone(),
            rows,
            columns,
            groups,
            replaced_existing: false,
            written: false,
        };

        if self.dry_run {
            tracing::info!(%sheet_name, rows, dry_run = true, "skipping workbook write");
            return Ok(report);
        }

        let sheet = Sheet::new(sheet_name, projected.into_sheet_rows())?;
        let path = self.workbook_path.clone();
        report.replaced_existing = tokio::task::spawn_blocking(move || commit_sheet(&path, sheet))
            .await
            .context("join workbook task failed")??;
        report.written = true;

        tracing::info!(
            sheet_name = %report.sheet_name,
            rows,
            replaced_existing = report.replaced_existing,
            path = %self.workbook_path.display(),
            "saved forecast sheet"
        );
        Ok(report)
    }
}

/// Opens (or creates) the workbook, replaces the sheet of the same name and saves the file.
/// Other sheets are carried over as stored. Returns whether a sheet was replaced.
pub fn commit_sheet(path: &Path, sheet: Sheet) -> Result<bool> {
    let mut package = Package::open_or_new(path)?;
    let replaced = package.upsert_sheet(&sheet)?;
    package.save(path)?;
    Ok(replaced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::forecast::{Cell, ForecastTable};
    use crate::forecast::error::ForecastHttpError;
    use crate::forecast::types::decode_columnar;
    use crate::forecast::HourlyForecastClient;
    use crate::workbook::xlsx;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeProvider {
        tables: HashMap<String, ForecastTable>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        fn new() -> Self {
            Self {
                tables: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with(mut self, airport: &str, temps: &[f64]) -> Self {
            let hours: Vec<_> = (0..temps.len()).map(|h| h as i64 * 3600).collect();
            let local: Vec<_> = (0..temps.len())
                .map(|h| format!("1970-01-01T{:02}:00:00+0100", h + 1))
                .collect();
            let v = json!({
                "validTimeUtc": hours,
                "validTimeLocal": local,
                "temperature": temps,
                "dayOfWeek": vec!["Thursday"; temps.len()],
            });
            self.tables
                .insert(airport.to_string(), decode_columnar(&v).unwrap());
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ForecastProvider for FakeProvider {
        fn provider_name(&self) -> &'static str {
            "fake"
        }

        async fn fetch_hourly(&self, airport: &str) -> Result<ForecastTable> {
            self.calls.lock().unwrap().push(airport.to_string());
            match self.tables.get(airport) {
                Some(t) => Ok(t.clone()),
                None => Err(ForecastHttpError::new(airport, 500, "boom").into()),
            }
        }
    }

    fn job(path: &Path, airports: &[&str]) -> CaptureJob {
        CaptureJob {
            airports: airports.iter().map(|a| a.to_string()).collect(),
            workbook_path: path.to_path_buf(),
            dry_run: false,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn writes_airport_major_sheet_with_projected_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.xlsx");
        let provider = FakeProvider::new()
            .with("LHR", &[50.0, 51.0])
            .with("SYD", &[70.0]);

        let report = job(&path, &["LHR", "SYD"])
            .run(&provider, date(2025, 3, 4))
            .await
            .unwrap();

        assert_eq!(report.sheet_name, "4-3-25");
        assert_eq!(report.rows, 3);
        assert!(report.written);
        assert!(!report.replaced_existing);
        assert_eq!(
            report.groups.iter().map(|g| g.airport.as_str()).collect::<Vec<_>>(),
            vec!["LHR", "SYD"]
        );

        let wb = xlsx::load(&path).unwrap();
        let rows = &wb.sheet("4-3-25").unwrap().rows;
        assert_eq!(
            rows[0],
            vec![
                Cell::text("airport"),
                Cell::text("validTimeLocal"),
                Cell::text("validTimeUtc"),
                Cell::text("temperature"),
            ]
        );
        assert_eq!(
            rows[1],
            vec![
                Cell::text("LHR"),
                Cell::text("1970-01-01 01:00"),
                Cell::text("1970-01-01 00:00"),
                Cell::Number(50.0),
            ]
        );
        assert_eq!(rows[3][0], Cell::text("SYD"));
        assert_eq!(rows.len(), 4);
    }

    #[tokio::test]
    async fn same_day_rerun_replaces_sheet_and_keeps_prior_days() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.xlsx");

        let first = FakeProvider::new().with("BOM", &[80.0, 81.0, 82.0]);
        job(&path, &["BOM"]).run(&first, date(2025, 8, 17)).await.unwrap();
        job(&path, &["BOM"]).run(&first, date(2025, 8, 18)).await.unwrap();

        let second = FakeProvider::new().with("BOM", &[90.0]);
        let report = job(&path, &["BOM"])
            .run(&second, date(2025, 8, 18))
            .await
            .unwrap();
        assert!(report.replaced_existing);

        let wb = xlsx::load(&path).unwrap();
        assert_eq!(wb.sheet_names(), vec!["17-8-25", "18-8-25"]);
        assert_eq!(wb.sheet("17-8-25").unwrap().rows.len(), 4);
        let today = &wb.sheet("18-8-25").unwrap().rows;
        assert_eq!(today.len(), 2);
        assert_eq!(today[1][3], Cell::Number(90.0));
    }

    #[tokio::test]
    async fn failed_airport_leaves_workbook_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.xlsx");

        let ok = FakeProvider::new().with("DEL", &[95.0]);
        job(&path, &["DEL"]).run(&ok, date(2025, 8, 17)).await.unwrap();
        let before = std::fs::read(&path).unwrap();

        let failing = FakeProvider::new()
            .with("DEL", &[96.0])
            .with("FRA", &[60.0]);
        let err = job(&path, &["DEL", "CCU", "FRA"])
            .run(&failing, date(2025, 8, 18))
            .await
            .unwrap_err();

        let http = err
            .downcast_ref::<ForecastHttpError>()
            .expect("expected ForecastHttpError");
        assert_eq!(http.airport, "CCU");
        assert_eq!(failing.calls(), vec!["DEL", "CCU"]);
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn dry_run_does_not_create_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.xlsx");
        let provider = FakeProvider::new().with("HKG", &[88.0]);

        let mut j = job(&path, &["HKG"]);
        j.dry_run = true;
        let report = j.run(&provider, date(2025, 8, 18)).await.unwrap();

        assert!(!report.written);
        assert_eq!(report.rows, 1);
        assert!(!path.exists());
    }

    #[test]
    fn missing_credential_stops_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            workbook_path: dir.path().join("capture.xlsx"),
            ..Settings::default()
        };

        assert!(HourlyForecastClient::from_settings(&settings).is_err());
        assert!(!settings.workbook_path.exists());
    }
}
