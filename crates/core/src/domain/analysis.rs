use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    /// Signed unit score used as the numerator term of the weighted average.
    pub fn signed_score(self) -> i32 {
        match self {
            Sentiment::Positive => 1,
            Sentiment::Neutral => 0,
            Sentiment::Negative => -1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sentiment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(Sentiment::Positive),
            "neutral" => Ok(Sentiment::Neutral),
            "negative" => Ok(Sentiment::Negative),
            other => anyhow::bail!("unknown sentiment: {other:?}"),
        }
    }
}

/// One AI-derived assessment of a single transcript statement.
///
/// Values of this type are expected to be validated already (see
/// `domain::contract`): `impact` is within 1..=5 and `sentiment` is canonical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisItem {
    pub id: String,
    pub sentiment: Sentiment,
    pub impact: u8,
    pub highlight: String,
    pub explanation: String,
    pub ai_insight: String,
    pub original_text: Option<String>,
}

impl AnalysisItem {
    pub fn has_highlight(&self) -> bool {
        !self.highlight.trim().is_empty()
    }

    /// The source statement, if one is present and non-empty.
    pub fn original_text(&self) -> Option<&str> {
        self.original_text.as_deref().filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptHighlight {
    pub id: String,
    pub text: String,
    pub sentiment: Sentiment,
    pub impact: u8,
    pub explanation: String,
    pub ai_insight: String,
}

impl From<&AnalysisItem> for TranscriptHighlight {
    fn from(item: &AnalysisItem) -> Self {
        Self {
            id: item.id.clone(),
            text: item.highlight.clone(),
            sentiment: item.sentiment,
            impact: item.impact,
            explanation: item.explanation.clone(),
            ai_insight: item.ai_insight.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Regular,
    Highlight,
}

/// One displayable unit of a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TranscriptSection {
    /// Verbatim statement text (collapsible in the UI).
    Regular { content: String },
    /// Summary card with the analysis attached.
    Highlight {
        content: String,
        highlight: TranscriptHighlight,
    },
}

impl TranscriptSection {
    pub fn kind(&self) -> SectionKind {
        match self {
            TranscriptSection::Regular { .. } => SectionKind::Regular,
            TranscriptSection::Highlight { .. } => SectionKind::Highlight,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            TranscriptSection::Regular { content } => content,
            TranscriptSection::Highlight { content, .. } => content,
        }
    }

    pub fn highlight(&self) -> Option<&TranscriptHighlight> {
        match self {
            TranscriptSection::Regular { .. } => None,
            TranscriptSection::Highlight { highlight, .. } => Some(highlight),
        }
    }
}
