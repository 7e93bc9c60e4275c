//! Streaming translation with fallback and Ctrl-C cancellation.
//!
//! Candidates, in priority order:
//! 1. DeepSeek (`DEEPSEEK_API_KEY`)
//! 2. Baidu Fanyi (`BAIDU_APPID` + `BAIDU_SECRET`)
//! 3. a local Ollama serving `qwen2.5`
//!
//! The proxy comes from `PROXY_ENABLED` / `SOCKS5_PROXY_URL` / `PROXY_TIMEOUT`
//! (a `.env` file is honoured). Run with `RUST_LOG=debug` to see retries.

use std::sync::Arc;
use weave::prelude::*;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let text = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "山重水复疑无路，柳暗花明又一村。".to_string());

    let config = WeaveConfig::default().with_env_proxy();
    let pool = Arc::new(ClientPool::new());
    let transport = Transport::from_source(pool.clone(), &config)
        .with_default_timeout(ProxySettings::from_env().timeout);

    let logging = LoggingLayer::new();
    let orchestrator = Arc::new(
        Orchestrator::builder()
            .adapter(logging.layer(ChatAdapter::new(transport.clone()).with_name("deepseek")))
            .adapter(logging.layer(BaiduAdapter::new(transport.clone())))
            .adapter(logging.layer(OllamaAdapter::new(pool.clone())))
            .retry(RetryPolicy::default().with_max_retries(2))
            .finish(),
    );

    let mut spec = RequestSpec::translate(text, "English").with_stream(true);
    if let Ok(key) = std::env::var("DEEPSEEK_API_KEY") {
        spec = spec.push_candidate(weave::provider::deepseek(key));
    }
    if let (Ok(appid), Ok(secret)) = (std::env::var("BAIDU_APPID"), std::env::var("BAIDU_SECRET")) {
        spec = spec.push_candidate(weave::provider::baidu(&appid, &secret));
    }
    spec = spec.push_candidate(weave::provider::ollama("qwen2.5"));

    let mut submission = orchestrator.submit(spec)?;
    println!("request {}", submission.request_id());

    let scope = submission.scope().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            scope.cancel();
        }
    });

    while let Some(event) = submission.events().next().await {
        match event.phase {
            Phase::Partial => {
                if let weave::EventPayload::Text { text } = &event.payload {
                    print!("{}", text);
                }
            }
            phase => println!("\n[{:?}] {:?}", phase, event.payload),
        }
    }

    match submission.outcome().await? {
        Outcome::Success(completion) => {
            println!("\nserved by {:?}", completion.served_by);
            for failure in &completion.failures {
                println!("  skipped: {:?}", failure);
            }
        }
        Outcome::Failed(exhausted) => println!("\nall candidates failed: {}", exhausted),
        Outcome::Cancelled { request_id } => println!("\n{} cancelled", request_id),
    }

    println!(
        "pool: {} client(s), cache: {:?}",
        pool.len(),
        orchestrator.cache().stats()
    );
    Ok(())
}
