use crate::domain::analysis::{AnalysisItem, Sentiment};
use anyhow::ensure;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

const MIN_IMPACT: u8 = 1;
const MAX_IMPACT: u8 = 5;

/// Element shape of the `ai_analyses.analysis` JSONB array.
#[derive(Debug, Clone, Deserialize)]
struct StoredAnalysisItem {
    id: String,
    impact: f64,
    highlight: String,
    sentiment: Sentiment,
    ai_insight: String,
    explanation: String,
    #[serde(default)]
    original_text: Option<String>,
}

/// Turns a stored analysis array into validated items.
///
/// Elements that do not match the stored shape are dropped (and logged) rather
/// than failing the whole record. Impact is rounded and clamped into 1..=5.
pub fn sanitize_stored_items(analysis: &Value) -> Vec<AnalysisItem> {
    let Some(elements) = analysis.as_array() else {
        tracing::error!(kind = json_kind(analysis), "stored analysis is not an array");
        return Vec::new();
    };

    let mut out = Vec::with_capacity(elements.len());
    for (index, element) in elements.iter().enumerate() {
        let stored = match serde_json::from_value::<StoredAnalysisItem>(element.clone()) {
            Ok(stored) => stored,
            Err(err) => {
                tracing::warn!(index, error = %err, "dropping invalid stored analysis item");
                continue;
            }
        };

        let Some(impact) = normalize_impact(stored.impact) else {
            tracing::warn!(index, impact = stored.impact, "dropping analysis item with non-finite impact");
            continue;
        };
        if f64::from(impact) != stored.impact {
            tracing::debug!(index, raw = stored.impact, impact, "normalized analysis item impact");
        }

        out.push(AnalysisItem {
            id: stored.id,
            sentiment: stored.sentiment,
            impact,
            highlight: stored.highlight,
            explanation: stored.explanation,
            ai_insight: stored.ai_insight,
            original_text: stored.original_text.filter(|s| !s.is_empty()),
        });
    }
    out
}

/// Items in the shape they are written back to `ai_analyses.analysis`.
pub fn items_to_stored_json(items: &[AnalysisItem]) -> Value {
    Value::Array(
        items
            .iter()
            .map(|item| {
                serde_json::json!({
                    "id": item.id,
                    "impact": item.impact,
                    "highlight": item.highlight,
                    "sentiment": item.sentiment,
                    "ai_insight": item.ai_insight,
                    "explanation": item.explanation,
                    "original_text": item.original_text.as_deref().unwrap_or(""),
                })
            })
            .collect(),
    )
}

fn normalize_impact(raw: f64) -> Option<u8> {
    if !raw.is_finite() {
        return None;
    }
    Some(raw.round().clamp(f64::from(MIN_IMPACT), f64::from(MAX_IMPACT)) as u8)
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Analysis as emitted by the LLM tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmAnalysis {
    pub items: Vec<LlmAnalysisItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmAnalysisItem {
    pub id: String,
    pub sentiment: Sentiment,
    pub impact: i64,
    pub highlight: String,
    pub explanation: String,
    pub ai_insight: String,
    #[serde(default)]
    pub original_text: Option<String>,
}

impl LlmAnalysis {
    pub fn validate_and_into_items(self) -> anyhow::Result<Vec<AnalysisItem>> {
        ensure!(!self.items.is_empty(), "LLM output must contain at least one item");

        let mut seen_ids = BTreeSet::<String>::new();
        let mut items = Vec::with_capacity(self.items.len());
        for item in self.items {
            items.push(item.validate_and_into_item(&mut seen_ids)?);
        }
        Ok(items)
    }
}

impl LlmAnalysisItem {
    fn validate_and_into_item(self, seen_ids: &mut BTreeSet<String>) -> anyhow::Result<AnalysisItem> {
        let id = self.id.trim().to_string();
        ensure!(!id.is_empty(), "id must be non-empty");
        ensure!(seen_ids.insert(id.clone()), "duplicate id: {id}");

        ensure!(
            (i64::from(MIN_IMPACT)..=i64::from(MAX_IMPACT)).contains(&self.impact),
            "impact out of range for {id}: {}",
            self.impact
        );

        let highlight = self.highlight.trim().to_string();
        ensure!(!highlight.is_empty(), "highlight must be non-empty ({id})");

        let original_text = self
            .original_text
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(AnalysisItem {
            id,
            sentiment: self.sentiment,
            impact: self.impact as u8,
            highlight,
            explanation: self.explanation.trim().to_string(),
            ai_insight: self.ai_insight.trim().to_string(),
            original_text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stored(id: &str, impact: Value, sentiment: &str) -> Value {
        json!({
            "id": id,
            "impact": impact,
            "highlight": format!("highlight {id}"),
            "sentiment": sentiment,
            "ai_insight": "insight",
            "explanation": "because",
            "original_text": format!("statement {id}"),
        })
    }

    #[test]
    fn non_array_yields_no_items() {
        assert!(sanitize_stored_items(&json!({"items": []})).is_empty());
        assert!(sanitize_stored_items(&Value::Null).is_empty());
    }

    #[test]
    fn drops_invalid_elements_and_keeps_order() {
        let mut missing_highlight = stored("h3", json!(2), "neutral");
        missing_highlight.as_object_mut().unwrap().remove("highlight");

        let v = json!([
            stored("h1", json!(4), "positive"),
            stored("h2", json!(3), "bullish"),
            missing_highlight,
            "not an object",
            stored("h4", json!(1), "negative"),
        ]);

        let items = sanitize_stored_items(&v);
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["h1", "h4"]);
        assert_eq!(items[1].sentiment, Sentiment::Negative);
    }

    #[test]
    fn clamps_and_rounds_impact() {
        let v = json!([
            stored("a", json!(0), "positive"),
            stored("b", json!(9), "positive"),
            stored("c", json!(2.6), "positive"),
        ]);
        let impacts: Vec<_> = sanitize_stored_items(&v).iter().map(|i| i.impact).collect();
        assert_eq!(impacts, [1, 5, 3]);
    }

    #[test]
    fn empty_original_text_becomes_none() {
        let mut e = stored("h1", json!(3), "neutral");
        e["original_text"] = json!("");
        let items = sanitize_stored_items(&json!([e]));
        assert_eq!(items[0].original_text, None);
    }

    #[test]
    fn null_or_missing_original_text_keeps_item() {
        let mut null_text = stored("h1", json!(5), "negative");
        null_text["original_text"] = Value::Null;
        let mut missing_text = stored("h2", json!(2), "positive");
        missing_text.as_object_mut().unwrap().remove("original_text");

        let items = sanitize_stored_items(&json!([null_text, missing_text]));
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.original_text.is_none()));
        assert_eq!(items[0].highlight, "highlight h1");
        assert_eq!(items[0].impact, 5);
    }

    #[test]
    fn stored_json_round_trips_through_sanitizer() {
        let v = json!([stored("h1", json!(4), "positive")]);
        let items = sanitize_stored_items(&v);
        assert_eq!(sanitize_stored_items(&items_to_stored_json(&items)), items);
    }

    fn llm_item(id: &str, impact: i64) -> LlmAnalysisItem {
        LlmAnalysisItem {
            id: id.to_string(),
            sentiment: Sentiment::Positive,
            impact,
            highlight: " Margins expanded ".to_string(),
            explanation: "Gross margin up 120bp".to_string(),
            ai_insight: "Pricing power".to_string(),
            original_text: Some("  ".to_string()),
        }
    }

    #[test]
    fn llm_items_are_trimmed() {
        let items = LlmAnalysis { items: vec![llm_item("h1", 4)] }
            .validate_and_into_items()
            .unwrap();
        assert_eq!(items[0].highlight, "Margins expanded");
        assert_eq!(items[0].original_text, None);
        assert_eq!(items[0].impact, 4);
    }

    #[test]
    fn llm_rejects_out_of_range_impact() {
        let res = LlmAnalysis { items: vec![llm_item("h1", 6)] }.validate_and_into_items();
        assert!(res.is_err());
        let res = LlmAnalysis { items: vec![llm_item("h1", 0)] }.validate_and_into_items();
        assert!(res.is_err());
    }

    #[test]
    fn llm_rejects_duplicate_ids_and_empty_output() {
        let res = LlmAnalysis {
            items: vec![llm_item("h1", 2), llm_item(" h1", 3)],
        }
        .validate_and_into_items();
        assert!(res.is_err());
        assert!(LlmAnalysis { items: vec![] }.validate_and_into_items().is_err());
    }

    #[test]
    fn llm_rejects_unknown_sentiment_via_deserialize() {
        let v = json!({"items": [{
            "id": "h1",
            "sentiment": "mixed",
            "impact": 3,
            "highlight": "x",
            "explanation": "y",
            "ai_insight": "z",
        }]});
        assert!(serde_json::from_value::<LlmAnalysis>(v).is_err());
    }
}
