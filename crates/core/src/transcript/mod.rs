pub mod error;
pub mod sections;
pub mod sentiment;

use crate::domain::analysis::{AnalysisItem, TranscriptHighlight};
use crate::domain::quarter::FiscalQuarter;
use crate::domain::transcript::{EarningsSummary, TranscriptData};
use chrono::NaiveDate;

pub use error::TranscriptError;
pub use sections::{align_original_text, build_sections};
pub use sentiment::{aggregate_sentiment, weighted_score};

pub const NO_HIGHLIGHTS_PLACEHOLDER: &str = "No highlights available for this quarter.";

pub fn normalize_ticker(raw: &str) -> Result<String, TranscriptError> {
    let ticker = raw.trim().to_uppercase();
    if ticker.is_empty() {
        return Err(TranscriptError::InvalidTicker);
    }
    Ok(ticker)
}

pub fn parse_quarter(raw: &str) -> Result<FiscalQuarter, TranscriptError> {
    FiscalQuarter::parse(raw).ok_or_else(|| TranscriptError::InvalidQuarter(raw.to_string()))
}

/// Shared by every cached transcript of `ticker`; used for invalidation.
pub fn transcript_cache_prefix(ticker: &str) -> String {
    format!("transcript:{ticker}:")
}

pub fn transcript_cache_key(ticker: &str, quarter: FiscalQuarter) -> String {
    format!("{}{quarter}", transcript_cache_prefix(ticker))
}

pub fn earnings_cache_key(ticker: &str) -> String {
    format!("earnings:{ticker}")
}

/// Builds the transcript view from a stored analysis.
///
/// Items without highlight text are dropped before sections are built; their
/// original texts stay in positional order (see [`align_original_text`]).
/// Document sentiment is computed over every supplied item.
pub fn assemble_transcript(
    ticker: &str,
    quarter: FiscalQuarter,
    analysis_date: NaiveDate,
    items: &[AnalysisItem],
) -> Result<TranscriptData, TranscriptError> {
    let retained: Vec<AnalysisItem> = items.iter().filter(|i| i.has_highlight()).cloned().collect();
    if retained.is_empty() {
        tracing::warn!(%ticker, %quarter, items = items.len(), "no valid highlights in analysis");
        return Err(TranscriptError::NoHighlights {
            ticker: ticker.to_string(),
            quarter,
        });
    }

    let aligned = align_original_text(retained, items);
    let sections = build_sections(&aligned);
    let highlights = aligned.iter().map(TranscriptHighlight::from).collect();
    let sentiment = aggregate_sentiment(items);

    tracing::debug!(
        %ticker,
        %quarter,
        sections = sections.len(),
        %sentiment,
        "assembled transcript"
    );

    Ok(TranscriptData {
        ticker: ticker.to_string(),
        quarter,
        date: analysis_date,
        sentiment,
        sections,
        highlights,
    })
}

pub fn summarize_earnings(
    ticker: &str,
    quarter: FiscalQuarter,
    analysis_date: NaiveDate,
    items: &[AnalysisItem],
) -> Result<EarningsSummary, TranscriptError> {
    if items.is_empty() {
        return Err(TranscriptError::EmptyAnalysis {
            ticker: ticker.to_string(),
        });
    }

    let mut highlights: Vec<String> = items
        .iter()
        .filter(|i| i.has_highlight())
        .map(|i| i.highlight.clone())
        .collect();
    if highlights.is_empty() {
        tracing::warn!(%ticker, %quarter, "no highlights in earnings analysis");
        highlights.push(NO_HIGHLIGHTS_PLACEHOLDER.to_string());
    }

    Ok(EarningsSummary {
        ticker: ticker.to_string(),
        quarter,
        date: analysis_date,
        highlights,
        sentiment: aggregate_sentiment(items),
    })
}
