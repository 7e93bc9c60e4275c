//! OpenAI-compatible chat completions adapter.
//!
//! Talks to any `/chat/completions` endpoint (OpenAI, DeepSeek, Qwen,
//! SiliconFlow, ...) over the pooled transport, with SSE streaming.

use crate::classify::{body_error, check_status, transport_error};
use crate::prompt::{system_prompt, user_text};
use crate::stream::{lines, parse_sse_line, SseLine};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use weave_core::adapter::{Adapter, ChunkStream};
use weave_core::error::WeaveError;
use weave_core::pool::Transport;
use weave_core::types::*;

const COMPLETIONS_PATH: &str = "/chat/completions";

/// Full completions URL for a candidate endpoint.
///
/// The path suffix is appended unless the endpoint already carries it.
pub fn completions_url(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.ends_with(COMPLETIONS_PATH) {
        trimmed.to_string()
    } else {
        format!("{}{}", trimmed, COMPLETIONS_PATH)
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    delta: Option<WireMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
}

fn build_messages(spec: &RequestSpec) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);

    let system = system_prompt(spec);
    if !system.is_empty() {
        messages.push(ChatMessage {
            role: "system",
            content: MessageContent::Text(system),
        });
    }

    let text = user_text(spec);
    let images = spec.payload.images();
    let content = if images.is_empty() {
        MessageContent::Text(text)
    } else {
        let mut parts = Vec::with_capacity(images.len() + 1);
        parts.push(ContentPart::Text { text });
        parts.extend(images.iter().map(|image| ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: image.data_url(),
            },
        }));
        MessageContent::Parts(parts)
    };
    messages.push(ChatMessage {
        role: "user",
        content,
    });

    messages
}

/// Decode one SSE `data:` payload.
fn parse_stream_event(data: &str) -> Result<Option<StreamChunk>, WeaveError> {
    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| WeaveError::stream(format!("malformed stream event: {}", e)))?;

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(WeaveError::stream(message));
    }

    let event: ChatResponse = serde_json::from_value(value)?;
    let choice = event.choices.into_iter().next();
    let finish_reason = choice
        .as_ref()
        .and_then(|c| c.finish_reason.as_deref())
        .map(FinishReason::parse);
    if finish_reason == Some(FinishReason::ContentFilter) {
        return Err(WeaveError::content_policy("stream stopped by content filter"));
    }

    let delta = choice
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .unwrap_or_default();
    if delta.is_empty() && finish_reason.is_none() && event.usage.is_none() {
        return Ok(None);
    }

    Ok(Some(StreamChunk {
        delta,
        finish_reason,
        usage: event.usage,
    }))
}

// ============================================================================
// Shared client
// ============================================================================

/// `/chat/completions` client shared by the chat and vision adapters.
#[derive(Debug, Clone)]
pub(crate) struct Completions {
    transport: Transport,
}

impl Completions {
    pub(crate) fn new(transport: Transport) -> Self {
        Self { transport }
    }

    async fn send(
        &self,
        provider: &str,
        candidate: &ModelCandidate,
        spec: &RequestSpec,
        stream: bool,
    ) -> Result<reqwest::Response, WeaveError> {
        let client = self.transport.client_for(candidate)?;
        let body = ChatRequest {
            model: &candidate.model,
            messages: build_messages(spec),
            max_tokens: candidate.max_tokens,
            temperature: spec.params.temperature,
            stream,
        };

        let url = completions_url(&candidate.endpoint);
        debug!(
            "[{}] POST {} model={} stream={} key={}",
            provider,
            url,
            candidate.model,
            stream,
            candidate.credential.masked()
        );

        let mut request = client.post(url).json(&body);
        if !candidate.credential.is_empty() {
            request = request.bearer_auth(candidate.credential.expose());
        }

        let response = request.send().await.map_err(transport_error)?;
        check_status(response, provider, &candidate.credential).await
    }

    pub(crate) async fn complete(
        &self,
        provider: &str,
        candidate: &ModelCandidate,
        spec: &RequestSpec,
    ) -> Result<AdapterResponse, WeaveError> {
        let response = self.send(provider, candidate, spec, false).await?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| body_error(provider, e))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| WeaveError::provider(format!("{}: no choices in response", provider)))?;
        let finish_reason = choice
            .finish_reason
            .as_deref()
            .map(FinishReason::parse)
            .unwrap_or(FinishReason::Stop);
        if finish_reason == FinishReason::ContentFilter {
            return Err(WeaveError::content_policy(format!(
                "{}: response withheld by content filter",
                provider
            )));
        }

        Ok(AdapterResponse {
            text: choice
                .message
                .and_then(|m| m.content)
                .unwrap_or_default(),
            model: body.model.unwrap_or_else(|| candidate.model.clone()),
            finish_reason,
            usage: body.usage,
        })
    }

    pub(crate) async fn stream(
        &self,
        provider: &str,
        candidate: &ModelCandidate,
        spec: &RequestSpec,
    ) -> Result<Box<ChunkStream>, WeaveError> {
        let response = self.send(provider, candidate, spec, true).await?;
        let body = lines(response.bytes_stream());

        let chunks = async_stream::stream! {
            let mut body = Box::pin(body);
            while let Some(line) = body.next().await {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                let data = match parse_sse_line(&line) {
                    SseLine::Done => return,
                    SseLine::Other => continue,
                    SseLine::Data(data) => data,
                };
                match parse_stream_event(data) {
                    Ok(Some(chunk)) => yield Ok(chunk),
                    Ok(None) => {}
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        };

        Ok(Box::new(Box::pin(chunks)))
    }
}

// ============================================================================
// Adapter
// ============================================================================

/// Text-only chat completions adapter ([`ProviderFamily::Chat`]).
#[derive(Debug, Clone)]
pub struct ChatAdapter {
    completions: Completions,
    info: Arc<AdapterInfo>,
}

impl ChatAdapter {
    pub fn new(transport: Transport) -> Self {
        Self {
            completions: Completions::new(transport),
            info: Arc::new(AdapterInfo {
                family: ProviderFamily::Chat,
                name: "chat".to_string(),
            }),
        }
    }

    /// Set the name used in diagnostics
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.info = Arc::new(AdapterInfo {
            family: ProviderFamily::Chat,
            name: name.into(),
        });
        self
    }
}

#[async_trait]
impl Adapter for ChatAdapter {
    fn info(&self) -> Arc<AdapterInfo> {
        self.info.clone()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::chat().with_streaming()
    }

    async fn call(
        &self,
        candidate: &ModelCandidate,
        spec: &RequestSpec,
    ) -> Result<AdapterResponse, WeaveError> {
        self.completions
            .complete(&self.info.name, candidate, spec)
            .await
    }

    async fn stream_call(
        &self,
        candidate: &ModelCandidate,
        spec: &RequestSpec,
    ) -> Result<Box<ChunkStream>, WeaveError> {
        self.completions.stream(&self.info.name, candidate, spec).await
    }
}
