use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wxcap_core::capture::CaptureJob;
use wxcap_core::config::{parse_airports, Settings};
use wxcap_core::forecast::HourlyForecastClient;

#[derive(Debug, Parser)]
#[command(name = "wxcap_worker")]
struct Args {
    /// Run date (YYYY-MM-DD) that names the sheet. Defaults to today's local date.
    #[arg(long)]
    date: Option<String>,

    /// Workbook to update. Overrides FORECAST_WORKBOOK_PATH.
    #[arg(long)]
    workbook: Option<PathBuf>,

    /// Comma-separated airport codes. Overrides FORECAST_AIRPORTS.
    #[arg(long)]
    airports: Option<String>,

    /// Fetch and shape everything except writing the workbook.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let result = run(settings, args).await;
    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %format!("{err:#}"), "forecast capture failed");
    }
    result
}

async fn run(mut settings: Settings, args: Args) -> anyhow::Result<()> {
    if let Some(path) = args.workbook {
        settings.workbook_path = path;
    }
    if let Some(list) = args.airports.as_deref() {
        settings.airports = parse_airports(list).context("invalid --airports")?;
    }

    let run_date = wxcap_core::time::sheet_name::local_run_date(args.date.as_deref())
        .context("invalid --date")?;

    // Credential check happens here, before any request goes out.
    let provider = HourlyForecastClient::from_settings(&settings)?;

    let mut job = CaptureJob::from_settings(&settings);
    job.dry_run = args.dry_run;

    tracing::info!(
        %run_date,
        airports = job.airports.len(),
        path = %job.workbook_path.display(),
        dry_run = job.dry_run,
        "starting forecast capture"
    );

    let report = job.run(&provider, run_date).await?;

    if report.written {
        println!(
            "Saved {} rows to {} [{}]",
            report.rows,
            report.workbook_path.display(),
            report.sheet_name
        );
    } else {
        let summary = serde_json::to_string(&report).context("serialize capture report failed")?;
        println!("{summary}");
    }
    Ok(())
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
