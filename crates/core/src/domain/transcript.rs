use crate::domain::analysis::{Sentiment, TranscriptHighlight, TranscriptSection};
use crate::domain::quarter::FiscalQuarter;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Render-ready transcript for one ticker and quarter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptData {
    pub ticker: String,
    pub quarter: FiscalQuarter,
    pub date: NaiveDate,
    pub sentiment: Sentiment,
    pub sections: Vec<TranscriptSection>,
    pub highlights: Vec<TranscriptHighlight>,
}

/// Compact earnings card shown next to a holding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsSummary {
    pub ticker: String,
    pub quarter: FiscalQuarter,
    pub date: NaiveDate,
    pub highlights: Vec<String>,
    pub sentiment: Sentiment,
}
