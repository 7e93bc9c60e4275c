//! Ollama local model server adapter (`/api/chat`, NDJSON streaming).

use crate::classify::{body_error, check_status, transport_error};
use crate::prompt::{system_prompt, user_text};
use crate::stream::lines;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use weave_core::adapter::{Adapter, ChunkStream};
use weave_core::error::WeaveError;
use weave_core::pool::{ClientPool, Transport};
use weave_core::types::*;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

const CHAT_PATH: &str = "/api/chat";

pub fn chat_url(endpoint: &str) -> String {
    let trimmed = match endpoint.trim().trim_end_matches('/') {
        "" => DEFAULT_ENDPOINT,
        endpoint => endpoint,
    };
    if trimmed.ends_with(CHAT_PATH) {
        trimmed.to_string()
    } else {
        format!("{}{}", trimmed, CHAT_PATH)
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "OllamaOptions::is_empty")]
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

impl OllamaOptions {
    fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.num_predict.is_none()
    }
}

/// One response object; the one-shot body and every NDJSON line share it.
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<OllamaReply>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaReply {
    #[serde(default)]
    content: String,
}

impl OllamaResponse {
    fn usage(&self) -> Option<Usage> {
        if self.prompt_eval_count.is_none() && self.eval_count.is_none() {
            return None;
        }
        let prompt = self.prompt_eval_count.unwrap_or(0);
        let completion = self.eval_count.unwrap_or(0);
        Some(Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        })
    }

    fn finish_reason(&self) -> FinishReason {
        self.done_reason
            .as_deref()
            .map(FinishReason::parse)
            .unwrap_or(FinishReason::Stop)
    }
}

fn build_messages(spec: &RequestSpec) -> Vec<OllamaMessage> {
    vec![
        OllamaMessage {
            role: "system",
            content: system_prompt(spec),
            images: Vec::new(),
        },
        OllamaMessage {
            role: "user",
            content: user_text(spec),
            images: spec.payload.images().iter().map(ImageData::to_base64).collect(),
        },
    ]
}

/// Local server adapter ([`ProviderFamily::LocalServer`]).
///
/// Always uses a direct client from the pool: local servers are never
/// routed through the configured proxy.
#[derive(Debug, Clone)]
pub struct OllamaAdapter {
    transport: Transport,
    info: Arc<AdapterInfo>,
}

impl OllamaAdapter {
    pub fn new(pool: Arc<ClientPool>) -> Self {
        Self {
            transport: Transport::direct(pool),
            info: Arc::new(AdapterInfo {
                family: ProviderFamily::LocalServer,
                name: "ollama".to_string(),
            }),
        }
    }

    async fn send(
        &self,
        candidate: &ModelCandidate,
        spec: &RequestSpec,
        stream: bool,
    ) -> Result<reqwest::Response, WeaveError> {
        let client = self.transport.client_for(candidate)?;
        let body = OllamaRequest {
            model: &candidate.model,
            messages: build_messages(spec),
            stream,
            options: OllamaOptions {
                temperature: spec.params.temperature,
                num_predict: candidate.max_tokens,
            },
        };

        let url = chat_url(&candidate.endpoint);
        debug!("[{}] POST {} model={} stream={}", self.info.name, url, candidate.model, stream);

        let response = client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response, &self.info.name, &candidate.credential).await
    }
}

#[async_trait]
impl Adapter for OllamaAdapter {
    fn info(&self) -> Arc<AdapterInfo> {
        self.info.clone()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::chat().with_streaming().with_vision()
    }

    async fn call(
        &self,
        candidate: &ModelCandidate,
        spec: &RequestSpec,
    ) -> Result<AdapterResponse, WeaveError> {
        let response = self.send(candidate, spec, false).await?;
        let body: OllamaResponse = response
            .json()
            .await
            .map_err(|e| body_error("ollama", e))?;
        if let Some(error) = body.error.as_deref() {
            return Err(WeaveError::provider(format!("ollama: {}", error)));
        }

        let usage = body.usage();
        let finish_reason = body.finish_reason();
        Ok(AdapterResponse {
            text: body.message.map(|m| m.content).unwrap_or_default(),
            model: body.model.unwrap_or_else(|| candidate.model.clone()),
            finish_reason,
            usage,
        })
    }

    async fn stream_call(
        &self,
        candidate: &ModelCandidate,
        spec: &RequestSpec,
    ) -> Result<Box<ChunkStream>, WeaveError> {
        let response = self.send(candidate, spec, true).await?;
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
                let event: OllamaResponse = match serde_json::from_str(&line) {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(WeaveError::stream(format!("ollama: malformed stream line: {}", e)));
                        return;
                    }
                };
                if let Some(error) = event.error.as_deref() {
                    yield Err(WeaveError::stream(format!("ollama: {}", error)));
                    return;
                }

                let done = event.done;
                let chunk = StreamChunk {
                    delta: event.message.as_ref().map(|m| m.content.clone()).unwrap_or_default(),
                    finish_reason: done.then(|| event.finish_reason()),
                    usage: if done { event.usage() } else { None },
                };
                if !chunk.delta.is_empty() || done {
                    yield Ok(chunk);
                }
                if done {
                    return;
                }
            }
            yield Err(WeaveError::stream("ollama: stream ended without done"));
        };

        Ok(Box::new(Box::pin(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_core::adapter::collect_chunk_stream;
    use weave_core::error::FailureKind;
    use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter() -> OllamaAdapter {
        OllamaAdapter::new(Arc::new(ClientPool::new()))
    }

    fn candidate(server: &MockServer) -> ModelCandidate {
        ModelCandidate::new(ProviderFamily::LocalServer, server.uri(), "llava")
    }

    #[test]
    fn test_chat_url() {
        assert_eq!(chat_url(""), "http://localhost:11434/api/chat");
        assert_eq!(chat_url("http://gpu-box:11434/"), "http://gpu-box:11434/api/chat");
        assert_eq!(chat_url("http://h/api/chat"), "http://h/api/chat");
    }

    #[test]
    fn test_always_direct() {
        let adapter = adapter();
        assert!(adapter.transport.proxy().is_direct());
    }

    #[tokio::test]
    async fn test_one_shot_with_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({"model": "llava", "stream": false})))
            .and(body_string_contains("\"images\":[\"AQID\"]"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "llava",
                "message": {"role": "assistant", "content": "a red square"},
                "done": true,
                "done_reason": "stop",
                "prompt_eval_count": 12,
                "eval_count": 4
            })))
            .expect(1)
            .mount(&server)
            .await;

        let spec = RequestSpec::caption_image(ImageData::new(vec![1u8, 2, 3], "image/png"));
        let response = adapter().call(&candidate(&server), &spec).await.unwrap();
        assert_eq!(response.text, "a red square");
        assert_eq!(response.usage.map(|u| u.total_tokens), Some(16));
    }

    #[tokio::test]
    async fn test_ndjson_stream() {
        let server = MockServer::start().await;
        let body = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"done_reason\":\"stop\",\"eval_count\":2}\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let spec = RequestSpec::translate("你好", "English").with_stream(true);
        let stream = adapter().stream_call(&candidate(&server), &spec).await.unwrap();
        let response = collect_chunk_stream("llava", stream).await.unwrap();
        assert_eq!(response.text, "Hello");
    }

    #[tokio::test]
    async fn test_truncated_stream_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "{\"message\":{\"content\":\"Hel\"},\"done\":false}\n",
                "application/x-ndjson",
            ))
            .mount(&server)
            .await;

        let spec = RequestSpec::expand("cat").with_stream(true);
        let stream = adapter().stream_call(&candidate(&server), &spec).await.unwrap();
        let err = collect_chunk_stream("llava", stream).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Transient);
    }

    #[tokio::test]
    async fn test_missing_model_is_configuration() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"error": "model 'llava' not found"})),
            )
            .mount(&server)
            .await;

        let spec = RequestSpec::expand("cat");
        let err = adapter().call(&candidate(&server), &spec).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Configuration);
        assert!(err.to_string().contains("model 'llava' not found"));
    }

    #[tokio::test]
    async fn test_truncated_body_is_transient() {
        let uri = crate::classify::tests::truncated_body_server(r#"{"model":"llava","message":{"#).await;
        let candidate = ModelCandidate::new(ProviderFamily::LocalServer, uri, "llava");
        let err = adapter()
            .call(&candidate, &RequestSpec::expand("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Transient);
    }
}
