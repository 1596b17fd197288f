pub mod anthropic;
pub mod error;
pub mod json;

use crate::domain::analysis::AnalysisItem;
use crate::domain::quarter::FiscalQuarter;
use anyhow::ensure;

#[derive(Debug, Clone)]
pub struct AnalyzeInput {
    pub ticker: String,
    pub quarter: FiscalQuarter,
    pub transcript: String,
}

impl AnalyzeInput {
    pub fn try_new(ticker: &str, quarter: FiscalQuarter, transcript: String) -> anyhow::Result<Self> {
        let ticker = crate::transcript::normalize_ticker(ticker)?;
        ensure!(!transcript.trim().is_empty(), "transcript text must be non-empty");
        Ok(Self {
            ticker,
            quarter,
            transcript,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
        }
    }
}

#[async_trait::async_trait]
pub trait TranscriptAnalyzer: Send + Sync {
    fn provider(&self) -> Provider;

    /// Model identifier stored alongside the analysis.
    fn model(&self) -> &str;

    async fn analyze(&self, input: AnalyzeInput) -> anyhow::Result<Vec<AnalysisItem>>;
}
