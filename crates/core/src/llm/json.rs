use crate::domain::analysis::AnalysisItem;
use crate::domain::contract::{LlmAnalysis, LlmAnalysisItem};
use anyhow::Context;

pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        // ```json ... ``` or ``` ... ```
        let mut inner = trimmed;
        if let Some(after_first) = inner.split_once('\n').map(|(_, rest)| rest) {
            inner = after_first;
        }
        if let Some(end) = inner.rfind("```") {
            inner = &inner[..end];
        }
        return Some(inner.trim().to_string());
    }

    json_spans(trimmed).into_iter().next().map(str::to_string)
}

/// Outermost object and array spans, ordered by which opens first.
fn json_spans(text: &str) -> Vec<&str> {
    let mut spans: Vec<(usize, &str)> = [('{', '}'), ('[', ']')]
        .into_iter()
        .filter_map(|(open, close)| {
            let start = text.find(open)?;
            let end = text.rfind(close)?;
            (end > start).then(|| (start, text[start..=end].trim()))
        })
        .collect();
    spans.sort_by_key(|(start, _)| *start);
    spans.into_iter().map(|(_, span)| span).collect()
}

fn parse_envelope(json_str: &str) -> anyhow::Result<LlmAnalysis> {
    if json_str.starts_with('[') {
        let items = serde_json::from_str::<Vec<LlmAnalysisItem>>(json_str)
            .with_context(|| format!("LLM output is not a valid analysis item array: {json_str}"))?;
        Ok(LlmAnalysis { items })
    } else {
        serde_json::from_str::<LlmAnalysis>(json_str)
            .with_context(|| format!("LLM output is not valid JSON for analysis schema: {json_str}"))
    }
}

/// Parses model text into validated items. A bare item array is accepted in
/// place of the `{"items": [...]}` envelope.
pub fn parse_analysis(text: &str) -> anyhow::Result<Vec<AnalysisItem>> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        let json_str = extract_json(trimmed).unwrap_or_default();
        return parse_envelope(&json_str)?.validate_and_into_items();
    }

    // Prose may contain stray braces before the payload; try each span in turn.
    let mut first_err = None;
    for span in json_spans(trimmed) {
        match parse_envelope(span) {
            Ok(parsed) => return parsed.validate_and_into_items(),
            Err(err) => {
                first_err.get_or_insert(err);
            }
        }
    }
    match first_err {
        Some(err) => Err(err),
        None => parse_envelope(trimmed)?.validate_and_into_items(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::analysis::Sentiment;
    use serde_json::json;

    fn items_json() -> serde_json::Value {
        json!([
            {
                "id": "h1",
                "sentiment": "positive",
                "impact": 5,
                "highlight": "Revenue beat guidance",
                "explanation": "Revenue grew 12% vs 9% guided",
                "ai_insight": "Enterprise demand re-accelerating",
                "original_text": "Good afternoon, and thank you for joining us.",
            },
            {
                "id": "h2",
                "sentiment": "negative",
                "impact": 2,
                "highlight": "CAC rose",
                "explanation": "Acquisition cost up 8%",
                "ai_insight": "Marketing efficiency slipping",
            }
        ])
    }

    #[test]
    fn extract_json_handles_fenced_blocks() {
        let body = "{\"a\":1}";
        let fenced = format!("```json\n{body}\n```\n");
        assert_eq!(extract_json(&fenced), Some(body.to_string()));
    }

    #[test]
    fn extract_json_falls_back_to_outer_delimiters() {
        assert_eq!(
            extract_json("prefix {\"a\":[1]} suffix"),
            Some("{\"a\":[1]}".to_string())
        );
        assert_eq!(extract_json("here: [1, 2] done"), Some("[1, 2]".to_string()));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn parses_envelope() {
        let text = json!({ "items": items_json() }).to_string();
        let items = parse_analysis(&text).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].sentiment, Sentiment::Positive);
        assert_eq!(items[1].original_text, None);
    }

    #[test]
    fn parses_bare_array_in_prose() {
        let text = format!("Here is the analysis:\n{}\nLet me know.", items_json());
        let items = parse_analysis(&text).unwrap();
        assert_eq!(items[1].id, "h2");
    }

    #[test]
    fn skips_stray_braces_before_bare_array() {
        let text = format!("Note {{draft}}: {}", items_json());
        let items = parse_analysis(&text).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "h1");
    }

    #[test]
    fn rejects_invalid_items() {
        let mut bad = items_json();
        bad[0]["impact"] = json!(7);
        assert!(parse_analysis(&json!({ "items": bad }).to_string()).is_err());
        assert!(parse_analysis("{\"items\": []}").is_err());
        assert!(parse_analysis("not json").is_err());
    }
}
