pub mod claude;
pub mod openai;
pub mod retry;
pub mod sse;

use std::time::Duration;

use backon::Retryable;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{LlmSettings, ProviderKind};
use retry::RetryPolicy;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub stream: bool,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub delta: String,
    pub done: bool,
}

impl StreamChunk {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: text.into(),
            done: false,
        }
    }

    pub fn finished() -> Self {
        Self {
            delta: String::new(),
            done: true,
        }
    }
}

/// Backend selected by `LLM_PROVIDER`; Ollama speaks the OpenAI wire format.
#[derive(Debug, Clone)]
pub enum Provider {
    OpenAi(openai::OpenAiConfig),
    Claude(claude::ClaudeConfig),
    Ollama(openai::OpenAiConfig),
}

impl Provider {
    pub fn from_settings(settings: &LlmSettings) -> Self {
        match settings.provider {
            ProviderKind::Claude => Provider::Claude(claude::ClaudeConfig {
                api_key: settings.api_key.clone(),
                base_url: settings.base_url.clone(),
            }),
            ProviderKind::OpenAi => Provider::OpenAi(openai::OpenAiConfig {
                api_key: settings.api_key.clone(),
                base_url: settings.base_url.clone(),
            }),
            ProviderKind::Ollama => Provider::Ollama(openai::OpenAiConfig {
                api_key: String::new(),
                base_url: format!("{}/v1", settings.base_url.trim_end_matches('/')),
            }),
        }
    }

    pub async fn chat(&self, client: &Client, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        match self {
            Provider::OpenAi(config) | Provider::Ollama(config) => {
                openai::chat(client, config, request).await
            }
            Provider::Claude(config) => claude::chat(client, config, request).await,
        }
    }

    pub async fn chat_stream(
        &self,
        client: &Client,
        request: &ChatRequest,
        on_chunk: impl Fn(StreamChunk) + Send,
    ) -> Result<String, LlmError> {
        match self {
            Provider::OpenAi(config) | Provider::Ollama(config) => {
                openai::chat_stream(client, config, request, on_chunk).await
            }
            Provider::Claude(config) => claude::chat_stream(client, config, request, on_chunk).await,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
}

impl LlmError {
    /// Timeouts, connection failures, throttling and server errors are worth
    /// another attempt; auth and request errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http(e) => e.is_timeout() || e.is_connect(),
            LlmError::Api { status, .. } => *status == 429 || (500..600).contains(status),
            LlmError::Parse(_) => false,
        }
    }
}

impl Serialize for LlmError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Single-prompt client for the configured generation model.
#[derive(Debug, Clone)]
pub struct ModelClient {
    http: Client,
    provider: Provider,
    model: String,
    temperature: Option<f32>,
    retry: RetryPolicy,
}

impl ModelClient {
    pub fn new(settings: &LlmSettings) -> Result<Self, LlmError> {
        let http = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.read_timeout)
            .build()?;
        Ok(Self {
            http,
            provider: Provider::from_settings(settings),
            model: settings.model.clone(),
            temperature: settings.temperature,
            retry: RetryPolicy {
                max_attempts: settings.max_attempts,
                ..RetryPolicy::default()
            },
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request(&self, prompt: &str, max_tokens: u32, stream: bool) -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage::user(prompt)],
            model: self.model.clone(),
            stream,
            max_tokens,
            temperature: self.temperature,
        }
    }

    /// Send one user prompt and return the reply text, retrying transient
    /// failures according to the retry policy.
    pub async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, LlmError> {
        let request = self.request(prompt, max_tokens, false);
        let (http, provider, request) = (&self.http, &self.provider, &request);

        let call = || async move { provider.chat(http, request).await };
        let response = call
            .retry(self.retry.backoff())
            .sleep(tokio::time::sleep)
            .when(LlmError::is_retryable)
            .notify(|err: &LlmError, delay: Duration| {
                warn!(error = %err, ?delay, "model call failed, retrying");
            })
            .await?;

        Ok(response.content)
    }

    /// Streaming variant; not retried since chunks may already be delivered.
    /// Exactly one closing `done` chunk is sent on every path, including
    /// error statuses and broken streams.
    pub async fn complete_stream(
        &self,
        prompt: &str,
        max_tokens: u32,
        on_chunk: impl Fn(StreamChunk) + Send + Sync,
    ) -> Result<String, LlmError> {
        let request = self.request(prompt, max_tokens, true);
        let result = self
            .provider
            .chat_stream(&self.http, &request, &on_chunk)
            .await;
        on_chunk(StreamChunk::finished());
        result
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_errors_retry_classification() {
        let throttled = LlmError::Api {
            status: 429,
            message: "ThrottlingException".into(),
        };
        let unavailable = LlmError::Api {
            status: 503,
            message: "overloaded".into(),
        };
        let unauthorized = LlmError::Api {
            status: 401,
            message: "invalid x-api-key".into(),
        };
        assert!(throttled.is_retryable());
        assert!(unavailable.is_retryable());
        assert!(!unauthorized.is_retryable());
        assert!(!LlmError::Parse("no content".into()).is_retryable());
    }

    #[test]
    fn test_error_serializes_as_message() {
        let err = LlmError::Api {
            status: 500,
            message: "boom".into(),
        };
        assert_eq!(serde_json::to_string(&err).unwrap(), "\"API error: 500 - boom\"");
    }

    fn settings_for(base_url: String) -> LlmSettings {
        LlmSettings {
            provider: ProviderKind::Claude,
            api_key: "test".into(),
            base_url,
            model: "claude-test".into(),
            temperature: None,
            connect_timeout: Duration::from_millis(200),
            read_timeout: Duration::from_millis(500),
            max_attempts: 1,
        }
    }

    #[tokio::test]
    async fn test_stream_error_status_still_finishes() {
        let url = test_server::respond_with(
            "HTTP/1.1 529 Overloaded\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let client = ModelClient::new(&settings_for(url)).unwrap();
        let chunks = std::sync::Mutex::new(Vec::new());

        let result = client
            .complete_stream("ciao", 16, |c| chunks.lock().unwrap().push(c))
            .await;

        assert!(matches!(result, Err(LlmError::Api { status: 529, .. })));
        assert_eq!(chunks.into_inner().unwrap(), vec![StreamChunk::finished()]);
    }

    #[tokio::test]
    async fn test_stream_relays_deltas_then_finishes_once() {
        let url = test_server::respond_with(concat!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"Ciao\"}}\n\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        ))
        .await;
        let client = ModelClient::new(&settings_for(url)).unwrap();
        let chunks = std::sync::Mutex::new(Vec::new());

        let text = client
            .complete_stream("ciao", 16, |c| chunks.lock().unwrap().push(c))
            .await
            .unwrap();

        assert_eq!(text, "Ciao");
        assert_eq!(
            chunks.into_inner().unwrap(),
            vec![StreamChunk::delta("Ciao"), StreamChunk::finished()]
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_gives_up_after_attempts() {
        let settings = LlmSettings {
            provider: ProviderKind::Claude,
            api_key: "test".into(),
            base_url: "http://127.0.0.1:9".into(),
            model: "claude-test".into(),
            temperature: None,
            connect_timeout: Duration::from_millis(200),
            read_timeout: Duration::from_millis(500),
            max_attempts: 2,
        };
        let mut client = ModelClient::new(&settings).unwrap();
        client.retry.min_delay = Duration::from_millis(1);
        client.retry.max_delay = Duration::from_millis(2);

        let err = client.complete("ciao", 16).await.unwrap_err();
        assert!(matches!(err, LlmError::Http(_)));
    }
}
