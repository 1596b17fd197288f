use anyhow::Context;
use clap::{Parser, Subcommand};
use folio_core::domain::quarter::FiscalQuarter;
use folio_core::llm::TranscriptAnalyzer;
use folio_core::storage::analyses::AnalysisRun;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod report;

#[derive(Debug, Parser)]
#[command(name = "folio_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze an earnings call transcript and store the result.
    Analyze {
        #[arg(long)]
        ticker: String,

        /// Fiscal quarter label, e.g. "Q3 2024".
        #[arg(long, value_parser = parse_quarter_arg)]
        quarter: FiscalQuarter,

        /// Path to the plain-text transcript.
        #[arg(long)]
        transcript: std::path::PathBuf,

        /// Date of the call (YYYY-MM-DD). Defaults to now.
        #[arg(long)]
        analysis_date: Option<String>,

        /// Do everything except writing to the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the assembled transcript summary for a stored analysis.
    Inspect {
        #[arg(long)]
        ticker: String,

        /// Defaults to the newest analyzed quarter.
        #[arg(long, value_parser = parse_quarter_arg)]
        quarter: Option<FiscalQuarter>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = folio_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let res = match args.command {
        Command::Analyze {
            ticker,
            quarter,
            transcript,
            analysis_date,
            dry_run,
        } => {
            run_analyze(
                &settings,
                &ticker,
                quarter,
                &transcript,
                analysis_date.as_deref(),
                dry_run,
            )
            .await
        }
        Command::Inspect { ticker, quarter } => run_inspect(&settings, &ticker, quarter).await,
    };

    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
    }
    res
}

async fn run_analyze(
    settings: &folio_core::config::Settings,
    ticker: &str,
    quarter: FiscalQuarter,
    transcript_path: &std::path::Path,
    analysis_date_arg: Option<&str>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let analysis_date = resolve_analysis_date(analysis_date_arg, chrono::Utc::now())?;
    let transcript = tokio::fs::read_to_string(transcript_path)
        .await
        .with_context(|| format!("failed to read transcript {}", transcript_path.display()))?;

    let input = folio_core::llm::AnalyzeInput::try_new(ticker, quarter, transcript)?;
    let ticker = input.ticker.clone();
    let llm = folio_core::llm::anthropic::AnthropicAnalyzer::from_settings(settings)?;

    if dry_run {
        let items = llm.analyze(input).await?;
        let report = report::TranscriptReport::build(&ticker, quarter, analysis_date.date_naive(), &items)?;
        tracing::info!(%ticker, %quarter, dry_run = true, "{report}");
        return Ok(());
    }

    let db_url = settings.require_database_url()?;
    let pool = folio_core::storage::connect(db_url, settings.db_max_connections()).await?;
    folio_core::storage::migrate(&pool).await?;

    let mut lock_conn = pool.acquire().await.context("acquire lock connection failed")?;
    let acquired =
        folio_core::storage::lock::try_acquire_analysis_lock(&mut lock_conn, &ticker, quarter).await?;
    if !acquired {
        tracing::warn!(%ticker, %quarter, "analysis lock not acquired; another run in progress");
        return Ok(());
    }

    let res = analyze_and_persist(&pool, &llm, input, analysis_date).await;

    if let Err(err) =
        folio_core::storage::lock::release_analysis_lock(&mut lock_conn, &ticker, quarter).await
    {
        tracing::warn!(%ticker, %quarter, error = %err, "failed to release analysis lock");
    }
    res
}

async fn analyze_and_persist(
    pool: &sqlx::PgPool,
    llm: &folio_core::llm::anthropic::AnthropicAnalyzer,
    input: folio_core::llm::AnalyzeInput,
    analysis_date: chrono::DateTime<chrono::Utc>,
) -> anyhow::Result<()> {
    let ticker = input.ticker.clone();
    let quarter = input.quarter;
    let provider = llm.provider().as_str();
    let model = llm.model().to_string();

    match llm.analyze_with_raw(input).await {
        Ok((items, raw)) => {
            let analysis_id = folio_core::storage::analyses::upsert_analysis(
                pool,
                &ticker,
                quarter,
                &model,
                analysis_date,
                &items,
            )
            .await?;

            // Evict before anything else can fail; the new analysis is already committed.
            let evicted = evict_cached_views(pool, &ticker).await;

            folio_core::storage::analyses::record_analysis_run(
                pool,
                AnalysisRun {
                    symbol: &ticker,
                    quarter,
                    provider,
                    llm_model: &model,
                    status: "success",
                    error: None,
                    analysis_id: Some(analysis_id),
                    raw_response: Some(raw),
                },
            )
            .await?;

            let report =
                report::TranscriptReport::build(&ticker, quarter, analysis_date.date_naive(), &items)?;
            tracing::info!(%ticker, %quarter, %analysis_id, evicted, "persisted analysis: {report}");
        }
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            let raw_response = err
                .downcast_ref::<folio_core::llm::error::LlmDiagnosticsError>()
                .and_then(|diag| diag.raw_for_audit());

            let run_id = folio_core::storage::analyses::record_analysis_run(
                pool,
                AnalysisRun {
                    symbol: &ticker,
                    quarter,
                    provider,
                    llm_model: &model,
                    status: "error",
                    error: Some(&format!("{err:#}")),
                    analysis_id: None,
                    raw_response,
                },
            )
            .await?;

            tracing::error!(%ticker, %quarter, %run_id, error = %err, "analysis run failed");
        }
    }

    Ok(())
}

/// Drops the ticker's cached transcript and earnings views. Failures are
/// logged; entries that survive still expire on their TTL.
async fn evict_cached_views(pool: &sqlx::PgPool, ticker: &str) -> u64 {
    match invalidate_cache(pool, ticker).await {
        Ok(evicted) => evicted,
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            tracing::warn!(%ticker, error = %format!("{err:#}"), "cache eviction failed");
            0
        }
    }
}

async fn invalidate_cache(pool: &sqlx::PgPool, ticker: &str) -> anyhow::Result<u64> {
    let prefix = folio_core::transcript::transcript_cache_prefix(ticker);
    let mut evicted = folio_core::storage::cache::delete_prefix(pool, &prefix).await?;
    evicted += folio_core::storage::cache::delete(
        pool,
        &folio_core::transcript::earnings_cache_key(ticker),
    )
    .await?;
    Ok(evicted)
}

async fn run_inspect(
    settings: &folio_core::config::Settings,
    ticker: &str,
    quarter: Option<FiscalQuarter>,
) -> anyhow::Result<()> {
    let ticker = folio_core::transcript::normalize_ticker(ticker)?;
    let db_url = settings.require_database_url()?;
    let pool = folio_core::storage::connect(db_url, settings.db_max_connections()).await?;
    let model = settings.analysis_llm_model.as_deref();

    let stored = match quarter {
        Some(q) => folio_core::storage::analyses::fetch_analysis(&pool, &ticker, q, model).await?,
        None => folio_core::storage::analyses::fetch_latest_analysis(&pool, &ticker, model).await?,
    };
    let Some(stored) = stored else {
        anyhow::bail!(folio_core::transcript::TranscriptError::NotFound { ticker, quarter });
    };

    let report = report::TranscriptReport::build(
        &ticker,
        stored.quarter,
        stored.analysis_day(),
        &stored.items(),
    )?;
    println!("{report}");
    Ok(())
}

fn parse_quarter_arg(s: &str) -> Result<FiscalQuarter, String> {
    folio_core::transcript::parse_quarter(s).map_err(|e| e.to_string())
}

fn resolve_analysis_date(
    arg: Option<&str>,
    now: chrono::DateTime<chrono::Utc>,
) -> anyhow::Result<chrono::DateTime<chrono::Utc>> {
    let Some(s) = arg else {
        return Ok(now);
    };
    let date = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid --analysis-date {s:?}; expected YYYY-MM-DD"))?;
    let midnight = date.and_hms_opt(0, 0, 0).context("invalid midnight")?;
    Ok(chrono::TimeZone::from_utc_datetime(&chrono::Utc, &midnight))
}

fn init_sentry(settings: &folio_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn analysis_date_defaults_to_now() {
        let now = chrono::Utc.with_ymd_and_hms(2024, 10, 30, 21, 5, 0).unwrap();
        assert_eq!(resolve_analysis_date(None, now).unwrap(), now);
    }

    #[test]
    fn analysis_date_arg_is_midnight_utc() {
        let now = chrono::Utc::now();
        let d = resolve_analysis_date(Some("2024-10-30"), now).unwrap();
        assert_eq!(d, chrono::Utc.with_ymd_and_hms(2024, 10, 30, 0, 0, 0).unwrap());
        assert!(resolve_analysis_date(Some("30/10/2024"), now).is_err());
    }

    #[test]
    fn cli_parses_analyze_subcommand() {
        let args = Args::try_parse_from([
            "folio_worker",
            "analyze",
            "--ticker",
            "aapl",
            "--quarter",
            "Q3 2024",
            "--transcript",
            "call.txt",
            "--dry-run",
        ])
        .unwrap();
        match args.command {
            Command::Analyze { quarter, dry_run, .. } => {
                assert_eq!(quarter, FiscalQuarter::new(2024, 3).unwrap());
                assert!(dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cache_eviction_failure_does_not_abort() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(std::time::Duration::from_millis(200))
            .connect_lazy("postgres://folio@127.0.0.1:1/folio")
            .unwrap();

        assert!(invalidate_cache(&pool, "AAPL").await.is_err());
        assert_eq!(evict_cached_views(&pool, "AAPL").await, 0);
    }

    #[test]
    fn cli_rejects_bad_quarter() {
        let res = Args::try_parse_from(["folio_worker", "inspect", "--ticker", "AAPL", "--quarter", "Q9"]);
        assert!(res.is_err());
    }
}
