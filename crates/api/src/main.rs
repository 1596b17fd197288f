use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use folio_core::domain::quarter::FiscalQuarter;
use folio_core::domain::transcript::{EarningsSummary, TranscriptData};
use folio_core::storage::{analyses, cache};
use folio_core::transcript::{self, TranscriptError};

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

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match folio_core::storage::connect(db_url, settings.db_max_connections()).await {
            Ok(pool) => match folio_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %e, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let state = AppState {
        pool,
        llm_model: settings.analysis_llm_model.clone(),
        cache_ttl: settings.cache_ttl(),
    };

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/transcripts/:ticker", get(get_transcript))
        .route("/transcripts/:ticker/quarters", get(get_available_quarters))
        .route("/earnings/:ticker", get(get_earnings))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Clone)]
struct AppState {
    pool: Option<PgPool>,
    llm_model: Option<String>,
    cache_ttl: std::time::Duration,
}

impl AppState {
    fn pool(&self) -> Result<&PgPool, ApiError> {
        self.pool.as_ref().ok_or_else(|| ApiError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "database unavailable".to_string(),
        })
    }

    fn llm_model(&self) -> Option<&str> {
        self.llm_model.as_deref()
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl From<TranscriptError> for ApiError {
    fn from(err: TranscriptError) -> Self {
        let status = match &err {
            TranscriptError::InvalidTicker | TranscriptError::InvalidQuarter(_) => {
                StatusCode::BAD_REQUEST
            }
            TranscriptError::NotFound { .. } => StatusCode::NOT_FOUND,
            TranscriptError::NoHighlights { .. } | TranscriptError::EmptyAnalysis { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(te) = err.downcast_ref::<TranscriptError>() {
            return te.clone().into();
        }
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %format!("{err:#}"), "request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal error".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptQuery {
    quarter: Option<String>,
}

async fn get_transcript(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(query): Query<TranscriptQuery>,
) -> Result<Json<TranscriptData>, ApiError> {
    let pool = state.pool()?;
    let ticker = transcript::normalize_ticker(&ticker)?;

    let requested = query.quarter.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let quarter = match requested {
        Some(raw) => transcript::parse_quarter(raw)?,
        None => latest_quarter(pool, &ticker, state.llm_model()).await?,
    };

    let key = transcript::transcript_cache_key(&ticker, quarter);
    if let Some(cached) = cache_lookup::<TranscriptData>(pool, &key).await {
        tracing::debug!(%key, "transcript cache hit");
        return Ok(Json(cached));
    }

    let stored = analyses::fetch_analysis(pool, &ticker, quarter, state.llm_model())
        .await?
        .ok_or_else(|| TranscriptError::NotFound {
            ticker: ticker.clone(),
            quarter: Some(quarter),
        })?;

    let data =
        transcript::assemble_transcript(&ticker, quarter, stored.analysis_day(), &stored.items())?;
    cache_store(pool, &key, &data, state.cache_ttl).await;

    Ok(Json(data))
}

async fn get_available_quarters(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<Vec<FiscalQuarter>>, ApiError> {
    let pool = state.pool()?;
    let ticker = transcript::normalize_ticker(&ticker)?;

    let quarters = analyses::fetch_available_quarters(pool, &ticker, state.llm_model()).await?;
    Ok(Json(quarters))
}

async fn get_earnings(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<EarningsSummary>, ApiError> {
    let pool = state.pool()?;
    let ticker = transcript::normalize_ticker(&ticker)?;

    let key = transcript::earnings_cache_key(&ticker);
    if let Some(cached) = cache_lookup::<EarningsSummary>(pool, &key).await {
        return Ok(Json(cached));
    }

    let stored = analyses::fetch_latest_analysis(pool, &ticker, state.llm_model())
        .await?
        .ok_or_else(|| TranscriptError::NotFound {
            ticker: ticker.clone(),
            quarter: None,
        })?;

    let summary = transcript::summarize_earnings(
        &ticker,
        stored.quarter,
        stored.analysis_day(),
        &stored.items(),
    )?;
    cache_store(pool, &key, &summary, state.cache_ttl).await;

    Ok(Json(summary))
}

async fn latest_quarter(
    pool: &PgPool,
    ticker: &str,
    llm_model: Option<&str>,
) -> Result<FiscalQuarter, ApiError> {
    let quarters = analyses::fetch_available_quarters(pool, ticker, llm_model).await?;
    quarters.first().copied().ok_or_else(|| {
        TranscriptError::NotFound {
            ticker: ticker.to_string(),
            quarter: None,
        }
        .into()
    })
}

// Cache failures degrade to a miss; the database stays the source of truth.
async fn cache_lookup<T: serde::de::DeserializeOwned>(pool: &PgPool, key: &str) -> Option<T> {
    match cache::get_json::<T>(pool, key).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(%key, error = %e, "cache read failed");
            None
        }
    }
}

async fn cache_store<T: Serialize>(pool: &PgPool, key: &str, value: &T, ttl: std::time::Duration) {
    if let Err(e) = cache::set_json(pool, key, value, ttl).await {
        tracing::warn!(%key, error = %e, "cache write failed");
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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
