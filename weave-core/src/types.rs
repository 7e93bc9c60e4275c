//! Core types for Weave operations.

use crate::error::FailureKind;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Operations and payloads
// ============================================================================

/// Logical operation requested by the host tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Translate,
    Expand,
    CaptionImage,
    CaptionVideo,
}

impl OperationKind {
    /// Whether the operation needs an image-capable backend.
    pub fn needs_vision(self) -> bool {
        matches!(self, OperationKind::CaptionImage | OperationKind::CaptionVideo)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Translate => "translate",
            OperationKind::Expand => "expand",
            OperationKind::CaptionImage => "caption_image",
            OperationKind::CaptionVideo => "caption_video",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoded image with its mime type.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageData {
    pub bytes: Arc<[u8]>,
    pub mime: String,
}

impl ImageData {
    pub fn new(bytes: impl Into<Arc<[u8]>>, mime: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime: mime.into(),
        }
    }

    /// Standard base64 of the raw bytes
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    /// `data:` URL suitable for OpenAI-style `image_url` parts
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.to_base64())
    }
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageData")
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Input payload of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Image(ImageData),
    /// Ordered video frames
    Frames(Vec<ImageData>),
}

impl Payload {
    pub fn text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Images carried by the payload, in order
    pub fn images(&self) -> &[ImageData] {
        match self {
            Payload::Text(_) => &[],
            Payload::Image(image) => std::slice::from_ref(image),
            Payload::Frames(frames) => frames,
        }
    }
}

/// Language and rule parameters of an operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationParams {
    /// Source language, `None` means auto-detect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_lang: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_lang: Option<String>,

    /// Identifier of the prompt rule chosen by the caller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,

    /// Rule text, sent as the system prompt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Marks an `expand` rule as safe to memoize
    #[serde(default)]
    pub deterministic: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

// ============================================================================
// Candidates
// ============================================================================

/// Provider family of a backend candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    /// OpenAI-compatible chat completions
    Chat,
    /// Chat completions with image input
    Vision,
    /// Classical machine translation API
    NativeTranslate,
    /// Locally hosted model server
    LocalServer,
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderFamily::Chat => "chat",
            ProviderFamily::Vision => "vision",
            ProviderFamily::NativeTranslate => "native_translate",
            ProviderFamily::LocalServer => "local_server",
        };
        f.write_str(s)
    }
}

/// What an adapter can do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Free-form text generation from a prompt
    pub chat: bool,
    pub streaming: bool,
    pub vision: bool,
    pub native_translate: bool,
}

impl Capabilities {
    pub fn chat() -> Self {
        Self {
            chat: true,
            ..Default::default()
        }
    }

    pub fn with_streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub fn with_vision(mut self) -> Self {
        self.vision = true;
        self
    }

    pub fn native_translate() -> Self {
        Self {
            native_translate: true,
            ..Default::default()
        }
    }

    /// Whether an adapter with these capabilities can serve `op` at all.
    pub fn can_serve(&self, op: OperationKind) -> bool {
        match op {
            OperationKind::Translate => self.native_translate || self.chat,
            OperationKind::Expand => self.chat,
            OperationKind::CaptionImage | OperationKind::CaptionVideo => {
                self.chat && self.vision
            }
        }
    }
}

/// Opaque API credential. Never printed in full.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Raw secret, for the wire only
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn masked(&self) -> String {
        mask_secret(&self.0)
    }

    /// Replace every occurrence of the secret in `text` with its masked form.
    pub fn redact(&self, text: &str) -> String {
        if self.0.is_empty() {
            return text.to_string();
        }
        text.replace(&self.0, &self.masked())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.masked())
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

impl From<&str> for Credential {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Credential {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Mask a secret, keeping only the first and last four characters visible.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.is_empty() {
        return String::new();
    }
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}****{}", head, tail)
}

/// One configured backend endpoint + model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCandidate {
    pub family: ProviderFamily,
    pub endpoint: String,
    pub model: String,
    #[serde(default)]
    pub credential: Credential,
    /// Per-call output token limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Per-call timeout, overrides the orchestrator default
    #[serde(default, with = "duration_secs", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl ModelCandidate {
    pub fn new(
        family: ProviderFamily,
        endpoint: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            family,
            endpoint: endpoint.into(),
            model: model.into(),
            credential: Credential::default(),
            max_tokens: None,
            timeout: None,
        }
    }

    pub fn with_credential(mut self, credential: impl Into<Credential>) -> Self {
        self.credential = credential.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(d)?;
        Ok(secs
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64))
    }
}

// ============================================================================
// Request spec
// ============================================================================

/// One immutable operation submitted by the caller.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub request_id: String,
    pub operation: OperationKind,
    pub payload: Payload,
    pub params: OperationParams,
    pub streaming: bool,
    /// Array position is fallback priority
    pub candidates: Vec<ModelCandidate>,
}

impl RequestSpec {
    /// Create a request with a fresh id and no candidates
    pub fn new(operation: OperationKind, payload: Payload) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            operation,
            payload,
            params: OperationParams::default(),
            streaming: false,
            candidates: Vec::new(),
        }
    }

    /// Translation of `text` into `target_lang`
    pub fn translate(text: impl Into<String>, target_lang: impl Into<String>) -> Self {
        let mut spec = Self::new(OperationKind::Translate, Payload::Text(text.into()));
        spec.params.target_lang = Some(target_lang.into());
        spec
    }

    /// Prompt expansion of `text`
    pub fn expand(text: impl Into<String>) -> Self {
        Self::new(OperationKind::Expand, Payload::Text(text.into()))
    }

    pub fn caption_image(image: ImageData) -> Self {
        Self::new(OperationKind::CaptionImage, Payload::Image(image))
    }

    pub fn caption_video(frames: Vec<ImageData>) -> Self {
        Self::new(OperationKind::CaptionVideo, Payload::Frames(frames))
    }

    /// Set the request id
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_params(mut self, params: OperationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_source_lang(mut self, lang: impl Into<String>) -> Self {
        self.params.source_lang = Some(lang.into());
        self
    }

    pub fn with_rule(mut self, rule_id: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        self.params.rule_id = Some(rule_id.into());
        self.params.system_prompt = Some(system_prompt.into());
        self
    }

    /// Enable streaming
    pub fn with_stream(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_candidates(mut self, candidates: Vec<ModelCandidate>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn push_candidate(mut self, candidate: ModelCandidate) -> Self {
        self.candidates.push(candidate);
        self
    }
}

// ============================================================================
// Adapter results
// ============================================================================

/// Usage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Finish reason
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    /// Parse the OpenAI-style `finish_reason` string
    pub fn parse(reason: &str) -> Self {
        match reason {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// Normalized one-shot adapter result
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterResponse {
    pub text: String,
    pub model: String,
    pub finish_reason: FinishReason,
    pub usage: Option<Usage>,
}

impl AdapterResponse {
    pub fn text(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
            finish_reason: FinishReason::Stop,
            usage: None,
        }
    }
}

/// Streaming chunk
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    pub delta: String,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
}

impl StreamChunk {
    pub fn delta(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
            finish_reason: None,
            usage: None,
        }
    }
}

/// Adapter information
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub family: ProviderFamily,
    pub name: String,
}

// ============================================================================
// Progress
// ============================================================================

/// Phase of a progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Queued,
    Retrying,
    Partial,
    Done,
    Cancelled,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Cancelled | Phase::Failed)
    }
}

/// Event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Empty,
    /// Partial output delta, or the final text on `done`
    Text { text: String },
    /// Emitted with `retrying`: the attempt that just failed and what happens next
    Attempt {
        candidate: usize,
        model: String,
        attempt: u32,
        kind: FailureKind,
        message: String,
        /// `true` when moving on to the next candidate
        fallback: bool,
    },
    /// Emitted with `failed`
    Failure { causes: usize },
}

/// Incremental status of one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub request_id: String,
    pub phase: Phase,
    pub payload: EventPayload,
    pub is_final: bool,
}

impl ProgressEvent {
    pub fn new(request_id: impl Into<String>, phase: Phase, payload: EventPayload) -> Self {
        Self {
            request_id: request_id.into(),
            phase,
            payload,
            is_final: phase.is_terminal(),
        }
    }

    pub fn partial(request_id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::new(
            request_id,
            Phase::Partial,
            EventPayload::Text { text: delta.into() },
        )
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Who produced a successful result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServedBy {
    Cache,
    Candidate {
        index: usize,
        family: ProviderFamily,
        model: String,
    },
}

/// Successful terminal result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub request_id: String,
    pub text: String,
    pub served_by: ServedBy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Candidates that were tried and given up on before the serving one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<CandidateFailure>,
}

/// Why one candidate stopped being tried
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFailure {
    pub index: usize,
    pub family: ProviderFamily,
    pub model: String,
    pub kind: FailureKind,
    /// Calls actually issued against this candidate
    pub attempts: u32,
    pub message: String,
}

/// Every candidate was tried and none succeeded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exhausted {
    pub request_id: String,
    /// One entry per candidate, in priority order
    pub causes: Vec<CandidateFailure>,
}

impl fmt::Display for Exhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all {} candidate(s) failed", self.causes.len())?;
        for cause in &self.causes {
            write!(
                f,
                "; #{} {}/{} [{}] after {} attempt(s): {}",
                cause.index, cause.family, cause.model, cause.kind, cause.attempts, cause.message
            )?;
        }
        Ok(())
    }
}

/// Terminal result of an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success(Completion),
    Failed(Exhausted),
    Cancelled { request_id: String },
}

impl Outcome {
    pub fn request_id(&self) -> &str {
        match self {
            Outcome::Success(c) => &c.request_id,
            Outcome::Failed(e) => &e.request_id,
            Outcome::Cancelled { request_id } => request_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled { .. })
    }

    pub fn completion(&self) -> Option<&Completion> {
        match self {
            Outcome::Success(c) => Some(c),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.completion().map(|c| c.text.as_str())
    }

    /// The terminal progress phase matching this outcome
    pub fn phase(&self) -> Phase {
        match self {
            Outcome::Success(_) => Phase::Done,
            Outcome::Failed(_) => Phase::Failed,
            Outcome::Cancelled { .. } => Phase::Cancelled,
        }
    }
}
