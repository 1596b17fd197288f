use crate::domain::analysis::{AnalysisItem, Sentiment};

/// Scores strictly above this are positive, strictly below its negation negative.
pub const SENTIMENT_THRESHOLD: f64 = 0.2;

/// Impact-weighted mean of the signed sentiment scores, in `[-1, 1]`.
///
/// Returns `None` for an empty list or when the total weight is zero.
pub fn weighted_score(items: &[AnalysisItem]) -> Option<f64> {
    let (total_score, total_weight) = items.iter().fold((0i64, 0i64), |(score, weight), item| {
        let impact = i64::from(item.impact);
        (
            score + i64::from(item.sentiment.signed_score()) * impact,
            weight + impact,
        )
    });

    if total_weight == 0 {
        return None;
    }
    Some(total_score as f64 / total_weight as f64)
}

/// Classifies a whole document from its per-statement analyses.
pub fn aggregate_sentiment(items: &[AnalysisItem]) -> Sentiment {
    match weighted_score(items) {
        Some(score) if score > SENTIMENT_THRESHOLD => Sentiment::Positive,
        Some(score) if score < -SENTIMENT_THRESHOLD => Sentiment::Negative,
        _ => Sentiment::Neutral,
    }
}
