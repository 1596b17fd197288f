use crate::domain::analysis::AnalysisItem;
use crate::domain::contract::{items_to_stored_json, sanitize_stored_items};
use crate::domain::quarter::FiscalQuarter;
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

type AnalysisRow = (Uuid, String, i32, i16, String, DateTime<Utc>, Value);

const SELECT_ANALYSIS: &str =
    "SELECT id, symbol, year, quarter, llm_model, analysis_date, analysis FROM ai_analyses";

/// One row of `ai_analyses`; `analysis` is kept raw until [`StoredAnalysis::items`].
#[derive(Debug, Clone)]
pub struct StoredAnalysis {
    pub id: Uuid,
    pub symbol: String,
    pub quarter: FiscalQuarter,
    pub llm_model: String,
    pub analysis_date: DateTime<Utc>,
    pub analysis: Value,
}

impl StoredAnalysis {
    fn from_row(row: AnalysisRow) -> anyhow::Result<Self> {
        let (id, symbol, year, quarter, llm_model, analysis_date, analysis) = row;
        Ok(Self {
            id,
            symbol,
            quarter: quarter_from_columns(year, quarter)
                .with_context(|| format!("invalid period on ai_analyses row {id}"))?,
            llm_model,
            analysis_date,
            analysis,
        })
    }

    pub fn items(&self) -> Vec<AnalysisItem> {
        let items = sanitize_stored_items(&self.analysis);
        tracing::debug!(
            id = %self.id,
            symbol = %self.symbol,
            quarter = %self.quarter,
            items = items.len(),
            "loaded analysis items"
        );
        items
    }

    pub fn analysis_day(&self) -> NaiveDate {
        self.analysis_date.date_naive()
    }
}

fn quarter_from_columns(year: i32, quarter: i16) -> anyhow::Result<FiscalQuarter> {
    let quarter = u8::try_from(quarter).with_context(|| format!("quarter out of range: {quarter}"))?;
    FiscalQuarter::new(year, quarter)
}

pub async fn fetch_analysis(
    pool: &sqlx::PgPool,
    symbol: &str,
    quarter: FiscalQuarter,
    llm_model: Option<&str>,
) -> anyhow::Result<Option<StoredAnalysis>> {
    let row = sqlx::query_as::<_, AnalysisRow>(&format!(
        "{SELECT_ANALYSIS} \
         WHERE symbol = $1 AND year = $2 AND quarter = $3 \
           AND ($4::text IS NULL OR llm_model = $4) \
         ORDER BY updated_at DESC \
         LIMIT 1"
    ))
    .bind(symbol)
    .bind(quarter.year)
    .bind(i16::from(quarter.quarter))
    .bind(llm_model)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("select ai_analyses failed ({symbol} {quarter})"))?;

    row.map(StoredAnalysis::from_row).transpose()
}

pub async fn fetch_latest_analysis(
    pool: &sqlx::PgPool,
    symbol: &str,
    llm_model: Option<&str>,
) -> anyhow::Result<Option<StoredAnalysis>> {
    let row = sqlx::query_as::<_, AnalysisRow>(&format!(
        "{SELECT_ANALYSIS} \
         WHERE symbol = $1 AND ($2::text IS NULL OR llm_model = $2) \
         ORDER BY year DESC, quarter DESC, updated_at DESC \
         LIMIT 1"
    ))
    .bind(symbol)
    .bind(llm_model)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("select latest ai_analyses failed ({symbol})"))?;

    row.map(StoredAnalysis::from_row).transpose()
}

/// Quarters with at least one analysis, newest first.
pub async fn fetch_available_quarters(
    pool: &sqlx::PgPool,
    symbol: &str,
    llm_model: Option<&str>,
) -> anyhow::Result<Vec<FiscalQuarter>> {
    let rows = sqlx::query_as::<_, (i32, i16)>(
        "SELECT DISTINCT year, quarter \
         FROM ai_analyses \
         WHERE symbol = $1 AND ($2::text IS NULL OR llm_model = $2) \
         ORDER BY year DESC, quarter DESC",
    )
    .bind(symbol)
    .bind(llm_model)
    .fetch_all(pool)
    .await
    .with_context(|| format!("select available quarters failed ({symbol})"))?;

    quarters_from_rows(rows)
}

fn quarters_from_rows(rows: Vec<(i32, i16)>) -> anyhow::Result<Vec<FiscalQuarter>> {
    rows.into_iter()
        .map(|(year, quarter)| quarter_from_columns(year, quarter))
        .collect()
}

pub async fn upsert_analysis(
    pool: &sqlx::PgPool,
    symbol: &str,
    quarter: FiscalQuarter,
    llm_model: &str,
    analysis_date: DateTime<Utc>,
    items: &[AnalysisItem],
) -> anyhow::Result<Uuid> {
    anyhow::ensure!(!items.is_empty(), "items must be non-empty");

    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO ai_analyses (id, symbol, year, quarter, llm_model, analysis_date, analysis) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         ON CONFLICT (symbol, year, quarter, llm_model) DO UPDATE \
           SET analysis_date = EXCLUDED.analysis_date, analysis = EXCLUDED.analysis, updated_at = now() \
         RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(symbol)
    .bind(quarter.year)
    .bind(i16::from(quarter.quarter))
    .bind(llm_model)
    .bind(analysis_date)
    .bind(items_to_stored_json(items))
    .fetch_one(pool)
    .await
    .with_context(|| format!("upsert ai_analyses failed ({symbol} {quarter})"))?;

    Ok(id)
}

#[derive(Debug, Clone)]
pub struct AnalysisRun<'a> {
    pub symbol: &'a str,
    pub quarter: FiscalQuarter,
    pub provider: &'a str,
    pub llm_model: &'a str,
    pub status: &'a str,
    pub error: Option<&'a str>,
    pub analysis_id: Option<Uuid>,
    pub raw_response: Option<Value>,
}

pub async fn record_analysis_run(pool: &sqlx::PgPool, run: AnalysisRun<'_>) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO analysis_runs \
         (id, symbol, year, quarter, provider, llm_model, status, error, analysis_id, raw_response, generated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .persistent(false)
    .bind(id)
    .bind(run.symbol)
    .bind(run.quarter.year)
    .bind(i16::from(run.quarter.quarter))
    .bind(run.provider)
    .bind(run.llm_model)
    .bind(run.status)
    .bind(run.error)
    .bind(run.analysis_id)
    .bind(run.raw_response)
    .bind(Utc::now())
    .execute(pool)
    .await
    .context("insert analysis_runs failed")?;

    Ok(id)
}
