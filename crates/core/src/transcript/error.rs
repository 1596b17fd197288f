use crate::domain::quarter::FiscalQuarter;
use std::fmt;

/// Reasons a transcript or earnings summary cannot be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptError {
    InvalidTicker,
    InvalidQuarter(String),
    NotFound {
        ticker: String,
        quarter: Option<FiscalQuarter>,
    },
    NoHighlights {
        ticker: String,
        quarter: FiscalQuarter,
    },
    EmptyAnalysis {
        ticker: String,
    },
}

impl fmt::Display for TranscriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptError::InvalidTicker => write!(f, "Invalid ticker symbol"),
            TranscriptError::InvalidQuarter(raw) => write!(
                f,
                "Invalid quarter format: {raw:?}. Expected format: \"Q1 2024\", \"Q2 2024\", etc."
            ),
            TranscriptError::NotFound {
                ticker,
                quarter: Some(quarter),
            } => write!(
                f,
                "No transcript data available for {ticker} {quarter}. This quarter may not have been analyzed yet."
            ),
            TranscriptError::NotFound {
                ticker,
                quarter: None,
            } => write!(f, "No earnings data available for {ticker}."),
            TranscriptError::NoHighlights { ticker, quarter } => write!(
                f,
                "No valid transcript highlights found for {ticker} {quarter}. The data may be incomplete."
            ),
            TranscriptError::EmptyAnalysis { ticker } => {
                write!(f, "Earnings data for {ticker} is incomplete.")
            }
        }
    }
}

impl std::error::Error for TranscriptError {}
