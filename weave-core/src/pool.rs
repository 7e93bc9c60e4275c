//! Connection pool.
//!
//! Pooled `reqwest::Client`s keyed by `(proxy, timeout)`. Clients are created
//! lazily, shared by every request with the same signature, and live until
//! [`ClientPool::close_all`] or the pool is dropped.

use crate::config::CandidateSource;
use crate::error::WeaveError;
use crate::types::ModelCandidate;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default per-call timeout when neither the candidate nor the transport sets one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Proxy part of a client signature.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub enum ProxySpec {
    #[default]
    Direct,
    /// `http://`, `https://`, `socks5://`, `socks5h://`, `socks4://` or `socks4a://`
    Url(String),
}

impl ProxySpec {
    pub fn url(url: impl Into<String>) -> Self {
        let url = url.into();
        if url.trim().is_empty() {
            ProxySpec::Direct
        } else {
            ProxySpec::Url(url.trim().to_string())
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, ProxySpec::Direct)
    }

    fn scheme(&self) -> Option<(ProxyScheme, &str)> {
        let ProxySpec::Url(url) = self else {
            return None;
        };
        let scheme = url.split("://").next().unwrap_or_default().to_ascii_lowercase();
        let kind = match scheme.as_str() {
            "http" | "https" => ProxyScheme::Http,
            "socks5" | "socks5h" | "socks4" | "socks4a" => ProxyScheme::Socks,
            _ => ProxyScheme::Unsupported(scheme),
        };
        Some((kind, url.as_str()))
    }

    /// The proxy URL with any password hidden, for diagnostics
    pub fn display_url(&self) -> String {
        match self {
            ProxySpec::Direct => "direct".to_string(),
            ProxySpec::Url(url) => match reqwest::Url::parse(url) {
                Ok(mut parsed) if parsed.password().is_some() => {
                    let _ = parsed.set_password(Some("****"));
                    parsed.to_string()
                }
                Ok(parsed) => parsed.to_string(),
                Err(_) => "<unparseable proxy url>".to_string(),
            },
        }
    }
}

impl fmt::Debug for ProxySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProxySpec({})", self.display_url())
    }
}

enum ProxyScheme {
    Http,
    Socks,
    Unsupported(String),
}

/// Transport tuning shared by every pooled client.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_idle_per_host: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            max_idle_per_host: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    proxy: ProxySpec,
    timeout: Duration,
}

/// Process-wide pool of reusable HTTP clients.
///
/// Pass it around by `Arc`; it is never ambient global state.
#[derive(Debug, Default)]
pub struct ClientPool {
    clients: DashMap<PoolKey, reqwest::Client>,
    settings: PoolSettings,
    created: AtomicUsize,
}

impl ClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: PoolSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    /// Get the client for `(proxy, timeout)`, creating it on first use.
    ///
    /// Concurrent callers racing on a new signature all receive the single
    /// client built by whoever took the entry first.
    pub fn client(&self, proxy: &ProxySpec, timeout: Duration) -> Result<reqwest::Client, WeaveError> {
        let key = PoolKey {
            proxy: proxy.clone(),
            timeout,
        };

        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let entry = self
            .clients
            .entry(key)
            .or_try_insert_with(|| self.build(proxy, timeout))?;
        Ok(entry.value().clone())
    }

    /// Number of pooled clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Total clients constructed over the pool's lifetime
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Drop every pooled client. In-flight requests keep their own handle.
    pub fn close_all(&self) {
        let count = self.clients.len();
        self.clients.clear();
        tracing::debug!("[ClientPool] closed {} client(s)", count);
    }

    fn build(&self, proxy: &ProxySpec, timeout: Duration) -> Result<reqwest::Client, WeaveError> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(self.settings.connect_timeout.min(timeout))
            .pool_idle_timeout(self.settings.idle_timeout)
            .pool_max_idle_per_host(self.settings.max_idle_per_host)
            // ignore HTTP_PROXY & co: local servers must never be routed through them
            .no_proxy();

        match proxy.scheme() {
            None => {}
            Some((ProxyScheme::Http, url)) => {
                let http_proxy = reqwest::Proxy::all(url).map_err(|e| {
                    WeaveError::configuration(format!(
                        "invalid proxy {}: {}",
                        proxy.display_url(),
                        e
                    ))
                })?;
                builder = builder.proxy(http_proxy);
            }
            Some((ProxyScheme::Socks, url)) => {
                if let Some(socks) = socks_proxy(proxy, url) {
                    builder = builder.proxy(socks);
                }
            }
            Some((ProxyScheme::Unsupported(scheme), _)) => {
                return Err(WeaveError::configuration(format!(
                    "unsupported proxy scheme '{}' in {}",
                    scheme,
                    proxy.display_url()
                )));
            }
        }

        let client = builder
            .build()
            .map_err(|e| WeaveError::configuration(format!("failed to build HTTP client: {}", e)))?;
        self.created.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            "[ClientPool] created client: proxy={}, timeout={:?}",
            proxy.display_url(),
            timeout
        );
        Ok(client)
    }
}

/// SOCKS proxy for the client builder, or `None` to degrade to a direct connection.
fn socks_proxy(proxy: &ProxySpec, url: &str) -> Option<reqwest::Proxy> {
    if !cfg!(feature = "socks") {
        tracing::warn!(
            "[ClientPool] SOCKS proxy {} configured but SOCKS support is not compiled in, using a direct connection",
            proxy.display_url()
        );
        return None;
    }

    match reqwest::Proxy::all(url) {
        Ok(p) => Some(p),
        Err(e) => {
            tracing::warn!(
                "[ClientPool] SOCKS proxy {} unusable ({}), using a direct connection",
                proxy.display_url(),
                e
            );
            None
        }
    }
}

/// Pool handle plus the active proxy, as held by an adapter.
#[derive(Debug, Clone)]
pub struct Transport {
    pool: Arc<ClientPool>,
    proxy: ProxySpec,
    default_timeout: Duration,
}

impl Transport {
    pub fn new(pool: Arc<ClientPool>, proxy: ProxySpec) -> Self {
        Self {
            pool,
            proxy,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Transport routed through the proxy `source` currently supplies
    pub fn from_source(pool: Arc<ClientPool>, source: &dyn CandidateSource) -> Self {
        Self::new(pool, source.proxy())
    }

    /// Transport that never goes through a proxy
    pub fn direct(pool: Arc<ClientPool>) -> Self {
        Self::new(pool, ProxySpec::Direct)
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn proxy(&self) -> &ProxySpec {
        &self.proxy
    }

    pub fn pool(&self) -> &Arc<ClientPool> {
        &self.pool
    }

    /// Timeout applying to one call against `candidate`
    pub fn timeout_for(&self, candidate: &ModelCandidate) -> Duration {
        candidate.timeout.unwrap_or(self.default_timeout)
    }

    /// Pooled client for a call against `candidate`
    pub fn client_for(&self, candidate: &ModelCandidate) -> Result<reqwest::Client, WeaveError> {
        self.pool.client(&self.proxy, self.timeout_for(candidate))
    }
}
