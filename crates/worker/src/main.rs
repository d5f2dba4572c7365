use anyhow::Context;
use clap::Parser;
use dailyreview_core::error::ReviewError;
use dailyreview_core::pipeline::{Clients, PipelineOptions, ReviewPipeline};
use std::path::PathBuf;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "dailyreview_worker")]
struct Args {
    /// Report date (YYYY-MM-DD). Defaults to today at REPORT_UTC_OFFSET_HOURS.
    #[arg(long)]
    as_of_date: Option<String>,

    /// Read the portfolio from this local file instead of the configured source.
    #[arg(long)]
    portfolio: Option<PathBuf>,

    /// Do everything except sending the email; the text report goes to stdout.
    #[arg(long)]
    dry_run: bool,

    /// Also write the rendered HTML report to this path.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = dailyreview_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let invocation_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("invocation", %invocation_id, trigger = "cli");
    let result = run(&settings, args).instrument(span).await;

    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(
            %invocation_id,
            kind = ?ReviewError::kind_of(err),
            error = %format!("{err:#}"),
            "daily review failed"
        );
    }
    result
}

async fn run(settings: &dailyreview_core::config::Settings, args: Args) -> anyhow::Result<()> {
    let as_of_date = dailyreview_core::time::resolve_as_of_date(
        args.as_of_date.as_deref(),
        chrono::Utc::now(),
        settings.report_utc_offset_hours,
    )?;

    let clients = Clients::from_settings(settings, args.portfolio, args.dry_run)?;
    let options = PipelineOptions::from_settings(settings, args.dry_run)?;

    tracing::info!(
        %as_of_date,
        dry_run = args.dry_run,
        run_mode = %options.run_mode,
        source = %clients.source.describe(),
        "daily review started"
    );

    let summary = ReviewPipeline::from_clients(&clients, &options)
        .run(as_of_date)
        .await?;

    if let Some(path) = &args.output {
        tokio::fs::write(path, &summary.rendered.html)
            .await
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        tracing::info!(path = %path.display(), "report written");
    }

    if args.dry_run {
        print!("{}", summary.rendered.text);
    }

    tracing::info!(
        %as_of_date,
        holdings = summary.holdings,
        email_sent = summary.email_sent,
        total_cost = summary.cost.map(|c| c.total_usd),
        "daily review finished"
    );
    Ok(())
}

fn init_sentry(settings: &dailyreview_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(settings.run_mode.as_str().into()),
            ..Default::default()
        },
    )))
}
