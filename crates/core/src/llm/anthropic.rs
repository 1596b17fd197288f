use crate::config::Settings;
use crate::domain::analysis::AnalysisItem;
use crate::domain::contract::LlmAnalysis;
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::json;
use crate::llm::{AnalyzeInput, Provider, TranscriptAnalyzer};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const REPAIR_ATTEMPTS: u32 = 2;

const TOOL_NAME_EMIT_ANALYSIS: &str = "emit_analysis";

#[derive(Debug, Clone)]
pub struct AnthropicAnalyzer {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicAnalyzer {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_anthropic_api_key()?.to_string();
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = std::env::var("ANTHROPIC_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let timeout_secs = std::env::var("ANTHROPIC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }

    async fn create_message(
        &self,
        req: CreateMessageRequest,
    ) -> anyhow::Result<(serde_json::Value, CreateMessageResponse)> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(&req)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Anthropic response body")?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str::<serde_json::Value>(&text).ok();
            return Err(LlmDiagnosticsError {
                provider: Provider::Anthropic,
                stage: "http",
                detail: format!("status={status}"),
                raw_output: Some(text),
                raw_response_json,
            }
            .into());
        }

        let raw_json = serde_json::from_str::<serde_json::Value>(&text)
            .with_context(|| format!("failed to parse Anthropic response JSON: {text}"))?;
        let parsed = serde_json::from_value::<CreateMessageResponse>(raw_json.clone())
            .context("failed to decode Anthropic response into CreateMessageResponse")?;
        Ok((raw_json, parsed))
    }

    fn request(&self, max_tokens: u32, content: String) -> CreateMessageRequest {
        CreateMessageRequest {
            model: self.model.clone(),
            max_tokens,
            system: Some(Self::system_prompt()),
            messages: vec![Message {
                role: "user",
                content,
            }],
            tools: Some(Self::tools()),
            tool_choice: Some(ToolChoice::Tool {
                name: TOOL_NAME_EMIT_ANALYSIS,
            }),
        }
    }

    fn tools() -> Vec<Tool> {
        let schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["items"],
            "properties": {
                "items": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "required": ["id", "sentiment", "impact", "highlight", "explanation", "ai_insight", "original_text"],
                        "properties": {
                            "id": {"type": "string"},
                            "sentiment": {"type": "string", "enum": ["positive", "neutral", "negative"]},
                            "impact": {"type": "integer", "minimum": 1, "maximum": 5},
                            "highlight": {"type": "string"},
                            "explanation": {"type": "string"},
                            "ai_insight": {"type": "string"},
                            "original_text": {"type": ["string", "null"]}
                        }
                    }
                }
            }
        });

        vec![Tool {
            name: TOOL_NAME_EMIT_ANALYSIS,
            description: "Emit the per-statement earnings call analysis as structured JSON",
            input_schema: schema,
        }]
    }

    fn system_prompt() -> String {
        [
            "You are an equity research analyst reviewing earnings call transcripts.",
            "Split the transcript into the statements that matter to investors, in reading order.",
            "For each statement emit one item:",
            "- id: short unique identifier (h1, h2, ...)",
            "- sentiment: positive, neutral or negative for the stock",
            "- impact: integer 1-5, market significance (5 = thesis-changing)",
            "- highlight: one-line summary, under 12 words",
            "- explanation: why you chose this sentiment and impact",
            "- ai_insight: extended commentary on what it means going forward",
            "- original_text: the verbatim statement from the transcript",
            "Return ONLY valid JSON matching {\"items\": [...]}. No markdown, no prose.",
        ]
        .join("\n")
    }

    fn user_prompt(input: &AnalyzeInput) -> String {
        format!(
            "Analyze the {} earnings call for {}.\n\nTranscript:\n{}",
            input.quarter, input.ticker, input.transcript
        )
    }

    fn repair_prompt(previous_output: &str) -> String {
        format!(
            "Your previous message was NOT valid JSON for the analysis schema.\n\n\
TASK: Output ONLY a single JSON object of the form {{\"items\": [...]}}.\n\
- Do NOT include any markdown, prose, or code fences.\n\
- Every item MUST include keys: id, sentiment, impact, highlight, explanation, ai_insight, original_text.\n\
- sentiment MUST be one of positive, neutral, negative.\n\
- impact MUST be an integer between 1 and 5.\n\
- ids MUST be unique and highlight MUST be non-empty.\n\n\
INVALID OUTPUT (for reference only; DO NOT copy verbatim):\n{previous_output}"
        )
    }

    fn response_text(res: &CreateMessageResponse) -> String {
        let mut out = String::new();
        for block in &res.content {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    fn response_tool_analysis(res: &CreateMessageResponse) -> anyhow::Result<Option<LlmAnalysis>> {
        for block in &res.content {
            if let ContentBlock::ToolUse { name, input, .. } = block {
                if name == TOOL_NAME_EMIT_ANALYSIS {
                    let parsed = serde_json::from_value::<LlmAnalysis>(input.clone())
                        .context("failed to decode tool_use.input into LlmAnalysis")?;
                    return Ok(Some(parsed));
                }
            }
        }
        Ok(None)
    }

    /// Items from either the tool call or the text fallback.
    fn parse_response(res: &CreateMessageResponse) -> anyhow::Result<Vec<AnalysisItem>> {
        match Self::response_tool_analysis(res)? {
            Some(analysis) => analysis.validate_and_into_items(),
            None => json::parse_analysis(&Self::response_text(res)),
        }
    }

    async fn try_parse_with_repairs(
        &self,
        input: &AnalyzeInput,
        initial: CreateMessageResponse,
        initial_raw_json: serde_json::Value,
    ) -> anyhow::Result<(Vec<AnalysisItem>, serde_json::Value)> {
        let mut last_err = match Self::parse_response(&initial) {
            Ok(items) => return Ok((items, initial_raw_json)),
            Err(err) => err,
        };
        let mut last_text = output_for_repair(&initial, &initial_raw_json);
        let mut last_raw_json = initial_raw_json;

        for attempt in 1..=REPAIR_ATTEMPTS {
            let repair_req = self.request(self.max_tokens, Self::repair_prompt(&last_text));
            let (repair_raw_json, repair_res) = self.create_message(repair_req).await?;
            match Self::parse_response(&repair_res) {
                Ok(items) => return Ok((items, repair_raw_json)),
                Err(err) => {
                    tracing::warn!(
                        attempt,
                        ticker = %input.ticker,
                        quarter = %input.quarter,
                        error = %err,
                        "LLM output still invalid after repair attempt"
                    );
                    last_err = err;
                    last_text = output_for_repair(&repair_res, &repair_raw_json);
                    last_raw_json = repair_raw_json;
                }
            }
        }

        Err(LlmDiagnosticsError {
            provider: Provider::Anthropic,
            stage: "parse_after_repair",
            detail: format!("final_error={last_err:#}"),
            raw_output: Some(last_text),
            raw_response_json: Some(last_raw_json),
        }
        .into())
    }

    pub async fn analyze_with_raw(
        &self,
        input: AnalyzeInput,
    ) -> anyhow::Result<(Vec<AnalysisItem>, serde_json::Value)> {
        let (mut raw_json, mut res) = self
            .create_message(self.request(self.max_tokens, Self::user_prompt(&input)))
            .await?;

        // Long transcripts can exhaust the ceiling mid-tool-call.
        if matches!(res.stop_reason.as_deref(), Some("max_tokens")) {
            let bumped = self.max_tokens.saturating_mul(2).max(8192);
            tracing::warn!(
                ticker = %input.ticker,
                quarter = %input.quarter,
                from = self.max_tokens,
                to = bumped,
                "Anthropic stop_reason=max_tokens; retrying once with higher max_tokens"
            );
            let (rj, r) = self
                .create_message(self.request(bumped, Self::user_prompt(&input)))
                .await?;
            raw_json = rj;
            res = r;
        }

        self.try_parse_with_repairs(&input, res, raw_json).await
    }
}

/// What the model said, for feeding back in a repair prompt.
fn output_for_repair(res: &CreateMessageResponse, raw_json: &serde_json::Value) -> String {
    let text = AnthropicAnalyzer::response_text(res);
    if !text.trim().is_empty() {
        return text;
    }
    res.content
        .iter()
        .find_map(|block| match block {
            ContentBlock::ToolUse { input, .. } => Some(input.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| raw_json.to_string())
}

#[async_trait::async_trait]
impl TranscriptAnalyzer for AnthropicAnalyzer {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn analyze(&self, input: AnalyzeInput) -> anyhow::Result<Vec<AnalysisItem>> {
        let (items, _raw) = self.analyze_with_raw(input).await?;
        Ok(items)
    }
}

#[derive(Debug, Clone, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,

    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ToolChoice {
    #[serde(rename = "tool")]
    Tool { name: &'static str },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::analysis::Sentiment;
    use crate::domain::quarter::FiscalQuarter;
    use serde_json::json;

    fn tool_input() -> serde_json::Value {
        json!({
            "items": [
                {
                    "id": "h1",
                    "sentiment": "positive",
                    "impact": 4,
                    "highlight": "Cloud revenue +30%",
                    "explanation": "Fastest growth in six quarters",
                    "ai_insight": "Share gains vs peers",
                    "original_text": "Cloud revenue grew 30% year over year."
                }
            ]
        })
    }

    #[test]
    fn parses_tool_use_analysis() {
        let res: CreateMessageResponse = serde_json::from_value(json!({
            "content": [
                {"type": "thinking", "thinking": "...", "signature": "x"},
                {"type": "tool_use", "id": "toolu_1", "name": TOOL_NAME_EMIT_ANALYSIS, "input": tool_input()}
            ],
            "stop_reason": "tool_use"
        }))
        .unwrap();

        let items = AnthropicAnalyzer::parse_response(&res).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].sentiment, Sentiment::Positive);
        assert_eq!(items[0].impact, 4);
    }

    #[test]
    fn falls_back_to_text_blocks() {
        let res = CreateMessageResponse {
            content: vec![ContentBlock::Text {
                text: format!("```json\n{}\n```", tool_input()),
            }],
            stop_reason: Some("end_turn".to_string()),
        };
        let items = AnthropicAnalyzer::parse_response(&res).unwrap();
        assert_eq!(items[0].id, "h1");
    }

    #[test]
    fn repair_output_prefers_text_then_tool_input() {
        let raw = json!({"content": []});
        let res = CreateMessageResponse {
            content: vec![ContentBlock::ToolUse {
                name: TOOL_NAME_EMIT_ANALYSIS.to_string(),
                input: json!({"items": "oops"}),
            }],
            stop_reason: None,
        };
        assert_eq!(output_for_repair(&res, &raw), "{\"items\":\"oops\"}");

        let empty = CreateMessageResponse {
            content: vec![],
            stop_reason: None,
        };
        assert_eq!(output_for_repair(&empty, &raw), raw.to_string());
    }

    #[test]
    fn user_prompt_names_ticker_and_quarter() {
        let input = AnalyzeInput::try_new(
            "msft",
            FiscalQuarter::new(2024, 2).unwrap(),
            "Thank you, operator.".to_string(),
        )
        .unwrap();
        let prompt = AnthropicAnalyzer::user_prompt(&input);
        assert!(prompt.starts_with("Analyze the Q2 2024 earnings call for MSFT."));
        assert!(prompt.ends_with("Thank you, operator."));
    }

    #[test]
    fn request_forces_the_analysis_tool() {
        let v = serde_json::to_value(ToolChoice::Tool {
            name: TOOL_NAME_EMIT_ANALYSIS,
        })
        .unwrap();
        assert_eq!(v, json!({"type": "tool", "name": "emit_analysis"}));
    }
}
