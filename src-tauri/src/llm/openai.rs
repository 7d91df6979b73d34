use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use super::sse::{self, SseEvent};
use super::{ChatMessage, ChatRequest, ChatResponse, LlmError, StreamChunk};

/// Any OpenAI-compatible chat completions endpoint, including Ollama.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
}

impl OpenAiConfig {
    fn completions(&self, client: &Client) -> RequestBuilder {
        let req = client.post(format!(
            "{}/chat/completions",
            self.base_url.trim_end_matches('/')
        ));
        if self.api_key.is_empty() {
            req
        } else {
            req.bearer_auth(&self.api_key)
        }
    }
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct Completion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct CompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

fn body(request: &ChatRequest, stream: bool) -> CompletionBody<'_> {
    CompletionBody {
        model: &request.model,
        messages: &request.messages,
        stream,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
    }
}

/// Some servers send the last delta and `finish_reason` in one chunk; the
/// text wins and the stream ends at `[DONE]` or when the body closes.
fn parse_event(data: &str) -> SseEvent {
    if data == "[DONE]" {
        return SseEvent::Stop;
    }
    let Ok(chunk) = serde_json::from_str::<CompletionChunk>(data) else {
        return SseEvent::Ignore;
    };
    match chunk.choices.into_iter().next() {
        Some(ChunkChoice {
            delta: ChunkDelta { content: Some(text) },
            ..
        }) if !text.is_empty() => SseEvent::Delta(text),
        Some(ChunkChoice {
            finish_reason: Some(_),
            ..
        }) => SseEvent::Stop,
        _ => SseEvent::Ignore,
    }
}

pub async fn chat(
    client: &Client,
    config: &OpenAiConfig,
    request: &ChatRequest,
) -> Result<ChatResponse, LlmError> {
    let resp = config
        .completions(client)
        .json(&body(request, false))
        .send()
        .await?;
    let data: Completion = sse::error_for_status(resp).await?.json().await?;
    let content = data
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| LlmError::Parse("response has no choices".into()))?;

    Ok(ChatResponse {
        content,
        model: request.model.clone(),
    })
}

pub async fn chat_stream(
    client: &Client,
    config: &OpenAiConfig,
    request: &ChatRequest,
    on_chunk: impl Fn(StreamChunk) + Send,
) -> Result<String, LlmError> {
    let resp = config
        .completions(client)
        .json(&body(request, true))
        .send()
        .await?;
    sse::relay(sse::error_for_status(resp).await?, parse_event, on_chunk).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_omits_missing_temperature() {
        let request = ChatRequest {
            messages: vec![ChatMessage::user("ciao")],
            model: "gpt-4o".into(),
            stream: false,
            max_tokens: 4096,
            temperature: None,
        };
        let json = serde_json::to_value(body(&request, true)).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["max_tokens"], 4096);
        assert_eq!(json["messages"][0]["content"], "ciao");
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_stream_events() {
        assert_eq!(
            parse_event(r#"{"choices":[{"delta":{"content":"Ciao"},"finish_reason":null}]}"#),
            SseEvent::Delta("Ciao".into())
        );
        assert_eq!(
            parse_event(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#),
            SseEvent::Stop
        );
        assert_eq!(parse_event("[DONE]"), SseEvent::Stop);
        assert_eq!(parse_event(": keep-alive"), SseEvent::Ignore);
    }
}
