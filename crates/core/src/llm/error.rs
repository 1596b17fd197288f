use crate::llm::Provider;
use serde_json::Value;
use std::fmt;

/// LLM failure with the raw material needed to audit it later.
#[derive(Debug, Clone)]
pub struct LlmDiagnosticsError {
    pub provider: Provider,
    pub stage: &'static str,
    pub detail: String,
    pub raw_output: Option<String>,
    pub raw_response_json: Option<Value>,
}

impl LlmDiagnosticsError {
    /// Raw output as JSON for the run audit row; plain text is wrapped.
    pub fn raw_for_audit(&self) -> Option<Value> {
        if let Some(v) = &self.raw_response_json {
            return Some(v.clone());
        }
        let raw = self.raw_output.as_deref()?;
        Some(serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({ "raw_text": raw })))
    }
}

impl fmt::Display for LlmDiagnosticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LLM error (provider={}, stage={}): {}",
            self.provider.as_str(),
            self.stage,
            self.detail
        )
    }
}

impl std::error::Error for LlmDiagnosticsError {}
