//! Bill analysis, comparison and free-form assistant chat over the hosted model.

pub mod json;
pub mod prompts;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::doc_processor::has_sufficient_text;
use crate::llm::{LlmError, ModelClient, StreamChunk};

pub const INSUFFICIENT_TEXT_MESSAGE: &str = "Il testo estratto dalla bolletta è insufficiente per l'analisi. Assicurati che il documento sia leggibile.";
pub const UNPARSABLE_RESPONSE_MESSAGE: &str = "Impossibile analizzare la risposta come JSON";
pub const NO_PREVIOUS_BILL_MESSAGE: &str = "Nessuna bolletta precedente disponibile per il confronto";

/// Structured bill analysis as returned by the model. Field contents are
/// whatever the model produced; unknown keys are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillAnalysis {
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub summary: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub cost_breakdown: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub saving_tips: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub anomalies: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub raw_data: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BillAnalysis {
    /// Summary rendered as plain text, if the model gave one.
    pub fn summary_text(&self) -> Option<String> {
        match &self.summary {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub consumption_diff: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub cost_diff: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub anomalies: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub explanation: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub complaint_tips: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisErrorKind {
    /// Input too short or missing; the model was not called.
    InsufficientInput,
    /// The model answered but not with the expected JSON object.
    UpstreamParse,
    /// The model could not be reached or returned an error status.
    UpstreamTransport,
}

#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct AnalysisError {
    pub kind: AnalysisErrorKind,
    #[serde(rename = "error")]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

impl AnalysisError {
    pub fn insufficient_input(message: impl Into<String>) -> Self {
        Self {
            kind: AnalysisErrorKind::InsufficientInput,
            message: message.into(),
            raw_response: None,
        }
    }

    fn unparsable(raw: String) -> Self {
        Self {
            kind: AnalysisErrorKind::UpstreamParse,
            message: UNPARSABLE_RESPONSE_MESSAGE.to_string(),
            raw_response: Some(raw),
        }
    }
}

impl From<LlmError> for AnalysisError {
    fn from(e: LlmError) -> Self {
        Self {
            kind: AnalysisErrorKind::UpstreamTransport,
            message: e.to_string(),
            raw_response: None,
        }
    }
}

/// True for the values a caller may send to mean "no previous bill".
pub fn is_absent(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Object(m)) => m.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// Parse a model reply into `T`, keeping the raw text on failure.
pub fn parse_reply<T: DeserializeOwned>(reply: String) -> Result<T, AnalysisError> {
    let parsed = json::extract_json(&reply)
        .ok()
        .filter(Value::is_object)
        .and_then(|value| serde_json::from_value(value).ok());
    match parsed {
        Some(value) => Ok(value),
        None => {
            error!("could not parse model reply as a JSON object");
            Err(AnalysisError::unparsable(reply))
        }
    }
}

#[derive(Debug, Clone)]
pub struct BillAnalyst {
    model: Arc<ModelClient>,
    min_chars: usize,
}

impl BillAnalyst {
    pub fn new(model: Arc<ModelClient>, min_chars: usize) -> Self {
        Self { model, min_chars }
    }

    pub fn model(&self) -> &Arc<ModelClient> {
        &self.model
    }

    pub async fn analyze(&self, bill_text: &str) -> Result<BillAnalysis, AnalysisError> {
        if !has_sufficient_text(bill_text, self.min_chars) {
            warn!(chars = bill_text.trim().len(), "bill text too short to analyze");
            return Err(AnalysisError::insufficient_input(INSUFFICIENT_TEXT_MESSAGE));
        }

        info!(model = self.model.model(), "requesting bill analysis");
        let reply = self
            .model
            .complete(&prompts::analysis_prompt(bill_text), prompts::ANALYSIS_MAX_TOKENS)
            .await
            .map_err(|e| {
                error!(error = %e, "bill analysis request failed");
                AnalysisError::from(e)
            })?;
        info!("analysis reply received");
        parse_reply(reply)
    }

    /// `Ok(None)` when there is no previous bill to compare against; the
    /// model is not called in that case.
    pub async fn compare(
        &self,
        current: &Value,
        previous: Option<&Value>,
    ) -> Result<Option<ComparisonResult>, AnalysisError> {
        let previous = match previous {
            Some(p) if !is_absent(Some(p)) => p,
            _ => {
                warn!("no previous bill supplied for comparison");
                return Ok(None);
            }
        };

        info!(model = self.model.model(), "requesting bill comparison");
        let reply = self
            .model
            .complete(
                &prompts::comparison_prompt(current, previous),
                prompts::COMPARISON_MAX_TOKENS,
            )
            .await
            .map_err(|e| {
                error!(error = %e, "bill comparison request failed");
                AnalysisError::from(e)
            })?;
        parse_reply(reply).map(Some)
    }

    /// Free-form answer. Transport failures become an apology text.
    pub async fn chat(&self, user_input: &str, analysis: Option<&BillAnalysis>) -> String {
        let context = analysis.map(BillAnalysis::to_value);
        let prompt = prompts::chat_prompt(user_input, context.as_ref());
        match self.model.complete(&prompt, prompts::CHAT_MAX_TOKENS).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, "assistant chat failed");
                chat_apology(&e)
            }
        }
    }

    /// Streamed chat. A failure is streamed as the apology text, so the
    /// listener always sees something before the closing `done` chunk.
    pub async fn chat_stream(
        &self,
        user_input: &str,
        analysis: Option<&BillAnalysis>,
        on_chunk: impl Fn(StreamChunk) + Send + Sync,
    ) -> String {
        let context = analysis.map(BillAnalysis::to_value);
        let prompt = prompts::chat_prompt(user_input, context.as_ref());
        let forward = |chunk: StreamChunk| {
            if !chunk.done {
                on_chunk(chunk);
            }
        };
        let reply = match self
            .model
            .complete_stream(&prompt, prompts::CHAT_MAX_TOKENS, forward)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, "assistant chat stream failed");
                let apology = chat_apology(&e);
                on_chunk(StreamChunk::delta(apology.clone()));
                apology
            }
        };
        on_chunk(StreamChunk::finished());
        reply
    }
}

fn chat_apology(e: &LlmError) -> String {
    format!("Mi dispiace, si è verificato un errore: {}", e)
}
