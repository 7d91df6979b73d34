use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use super::sse::{self, SseEvent};
use super::{ChatRequest, ChatResponse, LlmError, StreamChunk};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    pub api_key: String,
    pub base_url: String,
}

impl ClaudeConfig {
    fn messages(&self, client: &Client) -> RequestBuilder {
        client
            .post(format!("{}/v1/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
    }
}

#[derive(Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Turn<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct Turn<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesReply {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: TextDelta },
    MessageStop,
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct TextDelta {
    text: Option<String>,
}

/// The Messages API takes the system prompt as a top-level field.
fn body(request: &ChatRequest, stream: bool) -> MessagesBody<'_> {
    MessagesBody {
        model: &request.model,
        max_tokens: request.max_tokens,
        messages: request
            .messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| Turn {
                role: &m.role,
                content: &m.content,
            })
            .collect(),
        stream,
        system: request
            .messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.as_str()),
        temperature: request.temperature,
    }
}

fn first_text(reply: MessagesReply) -> Option<String> {
    reply.content.into_iter().find_map(|block| block.text)
}

fn parse_event(data: &str) -> SseEvent {
    match serde_json::from_str::<StreamEvent>(data) {
        Ok(StreamEvent::ContentBlockDelta {
            delta: TextDelta { text: Some(text) },
        }) => SseEvent::Delta(text),
        Ok(StreamEvent::MessageStop) => SseEvent::Stop,
        _ => SseEvent::Ignore,
    }
}

pub async fn chat(
    client: &Client,
    config: &ClaudeConfig,
    request: &ChatRequest,
) -> Result<ChatResponse, LlmError> {
    let resp = config
        .messages(client)
        .json(&body(request, false))
        .send()
        .await?;
    let reply: MessagesReply = sse::error_for_status(resp).await?.json().await?;
    let content =
        first_text(reply).ok_or_else(|| LlmError::Parse("response has no text content".into()))?;

    Ok(ChatResponse {
        content,
        model: request.model.clone(),
    })
}

pub async fn chat_stream(
    client: &Client,
    config: &ClaudeConfig,
    request: &ChatRequest,
    on_chunk: impl Fn(StreamChunk) + Send,
) -> Result<String, LlmError> {
    let resp = config
        .messages(client)
        .json(&body(request, true))
        .send()
        .await?;
    sse::relay(sse::error_for_status(resp).await?, parse_event, on_chunk).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;

    #[test]
    fn test_body_lifts_system_message() {
        let request = ChatRequest {
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: "Sei EnergyBot".into(),
                },
                ChatMessage::user("Quanto costa Eco Plus?"),
            ],
            model: "claude-3-5-sonnet-20240620".into(),
            stream: false,
            max_tokens: 2048,
            temperature: Some(0.3),
        };

        let json = serde_json::to_value(body(&request, false)).unwrap();
        assert_eq!(json["system"], "Sei EnergyBot");
        assert_eq!(json["max_tokens"], 2048);
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_reply_skips_non_text_blocks() {
        let reply: MessagesReply = serde_json::from_str(
            r#"{"content":[{"type":"tool_use"},{"type":"text","text":"{\"summary\":\"ok\"}"}]}"#,
        )
        .unwrap();
        assert_eq!(first_text(reply).as_deref(), Some("{\"summary\":\"ok\"}"));
    }

    #[test]
    fn test_stream_events() {
        assert_eq!(
            parse_event(r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Ciao"}}"#),
            SseEvent::Delta("Ciao".into())
        );
        assert_eq!(parse_event(r#"{"type":"message_stop"}"#), SseEvent::Stop);
        assert_eq!(parse_event(r#"{"type":"ping"}"#), SseEvent::Ignore);
    }
}
