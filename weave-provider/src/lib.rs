//! # Weave Providers
//!
//! Backend adapters, one per provider family:
//!
//! - [`ChatAdapter`]: OpenAI-compatible `/chat/completions` (DeepSeek, Qwen, SiliconFlow, ...)
//! - [`VisionAdapter`]: the same wire format with image input
//! - [`BaiduAdapter`]: Baidu Fanyi native translation
//! - [`OllamaAdapter`]: local Ollama server, never proxied

pub mod baidu;
pub mod chat;
pub mod classify;
pub mod ollama;
pub mod prompt;
pub mod stream;
pub mod vision;

// Re-exports
pub use baidu::BaiduAdapter;
pub use chat::ChatAdapter;
pub use ollama::OllamaAdapter;
pub use vision::VisionAdapter;

use weave_core::pool::Transport;
use weave_core::runtime::OrchestratorBuilder;
use weave_core::types::{Credential, ModelCandidate, ProviderFamily};

/// Register one adapter per provider family on `builder`.
///
/// Remote adapters share `transport` (and so its proxy); the Ollama adapter
/// takes a direct client from the same pool. Build the transport with
/// [`Transport::from_source`] to route through the configured proxy.
pub fn install(builder: OrchestratorBuilder, transport: &Transport) -> OrchestratorBuilder {
    builder
        .adapter(ChatAdapter::new(transport.clone()))
        .adapter(VisionAdapter::new(transport.clone()))
        .adapter(BaiduAdapter::new(transport.clone()))
        .adapter(OllamaAdapter::new(transport.pool().clone()))
}

/// DeepSeek chat candidate (OpenAI-compatible)
///
/// # Example
///
/// ```ignore
/// use weave_provider::deepseek;
///
/// let candidate = deepseek("your-api-key");
/// ```
pub fn deepseek(api_key: impl Into<Credential>) -> ModelCandidate {
    ModelCandidate::new(ProviderFamily::Chat, "https://api.deepseek.com/v1", "deepseek-chat")
        .with_credential(api_key)
}

/// Baidu Fanyi candidate from an app id and its secret key
pub fn baidu(appid: &str, secret: &str) -> ModelCandidate {
    ModelCandidate::new(ProviderFamily::NativeTranslate, baidu::DEFAULT_ENDPOINT, "baidu-fanyi")
        .with_credential(format!("{}:{}", appid, secret))
}

/// Candidate for a model served by a local Ollama on the default port
pub fn ollama(model: impl Into<String>) -> ModelCandidate {
    ModelCandidate::new(ProviderFamily::LocalServer, ollama::DEFAULT_ENDPOINT, model)
}
