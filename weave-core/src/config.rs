//! Configuration.
//!
//! The core never reads configuration files on its own initiative; callers
//! load a [`WeaveConfig`] (or implement [`CandidateSource`]) and hand the
//! result to the orchestrator builder.

use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::error::WeaveError;
use crate::pool::{ProxySpec, DEFAULT_TIMEOUT};
use crate::progress::DEFAULT_PROGRESS_INTERVAL;
use crate::retry::RetryPolicy;
use crate::types::{ModelCandidate, OperationKind, RequestSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// What happens when a request id is submitted while it is still executing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// The second submission fails with [`WeaveError::DuplicateRequest`]
    #[default]
    Reject,
    /// The running execution is cancelled and the new one takes its place
    Supersede,
}

/// Supplies backend candidates and the active proxy.
pub trait CandidateSource: Send + Sync {
    /// Candidates for `operation`, in fallback order
    fn candidates(&self, operation: OperationKind) -> Vec<ModelCandidate>;

    /// Proxy every non-local adapter should use
    fn proxy(&self) -> ProxySpec;

    /// Fill in the candidate list of `spec` when the caller left it empty
    fn prepare(&self, spec: RequestSpec) -> RequestSpec {
        if spec.candidates.is_empty() {
            let candidates = self.candidates(spec.operation);
            spec.with_candidates(candidates)
        } else {
            spec
        }
    }
}

/// Proxy settings resolved from the environment (and `.env`).
///
/// - `PROXY_ENABLED=false` disables the proxy regardless of the URL
/// - `PROXY_ENABLED=true` with an empty `SOCKS5_PROXY_URL` counts as unconfigured
/// - `PROXY_ENABLED` unset: the proxy is used whenever a URL is present
#[derive(Debug, Clone, PartialEq)]
pub struct ProxySettings {
    pub enabled: Option<bool>,
    pub url: Option<String>,
    pub timeout: Duration,
}

impl ProxySettings {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Read `PROXY_ENABLED`, `SOCKS5_PROXY_URL` and `PROXY_TIMEOUT`, loading `.env` first
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            tracing::trace!("no .env loaded: {}", e);
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("PROXY_ENABLED").and_then(|v| match v.trim().to_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        });
        let url = lookup("SOCKS5_PROXY_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let timeout = lookup("PROXY_TIMEOUT")
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(Self::DEFAULT_TIMEOUT);

        Self {
            enabled,
            url,
            timeout,
        }
    }

    /// The proxy URL in effect, if any
    pub fn proxy_url(&self) -> Option<&str> {
        if self.enabled == Some(false) {
            return None;
        }
        self.url.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.proxy_url().is_some()
    }

    pub fn proxy_spec(&self) -> ProxySpec {
        self.proxy_url().map(ProxySpec::url).unwrap_or_default()
    }
}

/// Orchestrator and candidate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaveConfig {
    pub retry: RetryPolicy,
    /// Per-call timeout for candidates that do not set their own
    #[serde(with = "secs")]
    pub default_timeout: Duration,
    pub cache_capacity: usize,
    /// Minimum spacing between partial progress events
    #[serde(with = "millis")]
    pub progress_interval: Duration,
    /// Upper bound on concurrently executing requests
    pub max_concurrent: Option<usize>,
    pub duplicate_policy: DuplicatePolicy,
    /// Explicit proxy URL; `None` means direct unless resolved from the environment
    pub proxy: Option<String>,
    pub candidates: HashMap<OperationKind, Vec<ModelCandidate>>,
}

impl Default for WeaveConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            default_timeout: DEFAULT_TIMEOUT,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            max_concurrent: None,
            duplicate_policy: DuplicatePolicy::default(),
            proxy: None,
            candidates: HashMap::new(),
        }
    }
}

impl WeaveConfig {
    pub fn from_json_str(json: &str) -> Result<Self, WeaveError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, WeaveError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            WeaveError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    /// Fill `proxy` from the environment when the config does not set one
    pub fn with_env_proxy(mut self) -> Self {
        if self.proxy.is_none() {
            self.proxy = ProxySettings::from_env().proxy_url().map(str::to_string);
        }
        self
    }

    pub fn with_candidates(
        mut self,
        operation: OperationKind,
        candidates: Vec<ModelCandidate>,
    ) -> Self {
        self.candidates.insert(operation, candidates);
        self
    }
}

impl CandidateSource for WeaveConfig {
    fn candidates(&self, operation: OperationKind) -> Vec<ModelCandidate> {
        self.candidates.get(&operation).cloned().unwrap_or_default()
    }

    fn proxy(&self) -> ProxySpec {
        self.proxy.as_deref().map(ProxySpec::url).unwrap_or_default()
    }
}

/// `Duration` as integer milliseconds
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// `Duration` as (fractional) seconds
pub(crate) mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
