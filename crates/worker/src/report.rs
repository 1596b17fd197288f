use chrono::NaiveDate;
use folio_core::domain::analysis::{AnalysisItem, SectionKind, Sentiment};
use folio_core::domain::quarter::FiscalQuarter;
use folio_core::transcript;
use std::fmt;

/// One-line operator summary of an assembled transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptReport {
    pub ticker: String,
    pub quarter: FiscalQuarter,
    pub date: NaiveDate,
    pub sentiment: Sentiment,
    pub score: Option<f64>,
    pub items: usize,
    pub highlights: usize,
    pub regular_sections: usize,
}

impl TranscriptReport {
    pub fn build(
        ticker: &str,
        quarter: FiscalQuarter,
        date: NaiveDate,
        items: &[AnalysisItem],
    ) -> anyhow::Result<Self> {
        let data = transcript::assemble_transcript(ticker, quarter, date, items)?;
        let regular_sections = data
            .sections
            .iter()
            .filter(|s| s.kind() == SectionKind::Regular)
            .count();

        Ok(Self {
            ticker: data.ticker,
            quarter: data.quarter,
            date: data.date,
            sentiment: data.sentiment,
            score: transcript::weighted_score(items),
            items: items.len(),
            highlights: data.highlights.len(),
            regular_sections,
        })
    }
}

impl fmt::Display for TranscriptReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}): sentiment={}",
            self.ticker, self.quarter, self.date, self.sentiment
        )?;
        if let Some(score) = self.score {
            write!(f, " score={score:.2}")?;
        }
        write!(
            f,
            " items={} highlights={} regular_sections={}",
            self.items, self.highlights, self.regular_sections
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, sentiment: Sentiment, impact: u8, text: Option<&str>) -> AnalysisItem {
        AnalysisItem {
            id: id.to_string(),
            sentiment,
            impact,
            highlight: format!("highlight {id}"),
            explanation: String::new(),
            ai_insight: String::new(),
            original_text: text.map(str::to_string),
        }
    }

    #[test]
    fn summarizes_scenario() {
        let items = [
            item("h1", Sentiment::Positive, 5, Some("Good afternoon...")),
            item("h2", Sentiment::Negative, 2, None),
        ];
        let report = TranscriptReport::build(
            "AAPL",
            FiscalQuarter::new(2024, 3).unwrap(),
            NaiveDate::from_ymd_opt(2024, 10, 30).unwrap(),
            &items,
        )
        .unwrap();

        assert_eq!(report.sentiment, Sentiment::Positive);
        assert_eq!(report.regular_sections, 1);
        assert_eq!(
            report.to_string(),
            "AAPL Q3 2024 (2024-10-30): sentiment=positive score=0.43 items=2 highlights=2 regular_sections=1"
        );
    }

    #[test]
    fn fails_without_highlights() {
        let mut only = item("h1", Sentiment::Neutral, 3, None);
        only.highlight.clear();
        let res = TranscriptReport::build(
            "AAPL",
            FiscalQuarter::new(2024, 3).unwrap(),
            NaiveDate::from_ymd_opt(2024, 10, 30).unwrap(),
            &[only],
        );
        assert!(res.is_err());
    }
}
