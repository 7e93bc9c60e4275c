//! Content-addressed result cache.
//!
//! Entries never expire: the key is derived from the normalized input, so an
//! edited source text simply produces a different key.

use crate::types::{OperationKind, Payload, RequestSpec};
use blake3::Hasher;
use lru::LruCache;
use parking_lot::Mutex;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of cached results
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Cache key derived from normalized content, target language, rule id and operation.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn compute(
        operation: OperationKind,
        text: &str,
        target_lang: Option<&str>,
        rule_id: Option<&str>,
    ) -> Self {
        let normalized = normalize_text(text);
        let fields: [&str; 4] = [
            operation.as_str(),
            normalized.as_str(),
            target_lang.unwrap_or_default(),
            rule_id.unwrap_or_default(),
        ];

        let mut hasher = Hasher::new();
        // length-prefixed so adjacent fields never bleed into each other
        for field in fields {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Fingerprint of `spec`, or `None` when the operation must not be cached.
    pub fn for_request(spec: &RequestSpec) -> Option<Self> {
        let cacheable = match spec.operation {
            OperationKind::Translate => true,
            OperationKind::Expand => spec.params.deterministic,
            OperationKind::CaptionImage | OperationKind::CaptionVideo => false,
        };
        if !cacheable {
            return None;
        }

        let Payload::Text(text) = &spec.payload else {
            return None;
        };

        Some(Self::compute(
            spec.operation,
            text,
            spec.params.target_lang.as_deref(),
            spec.params.rule_id.as_deref(),
        ))
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

/// Trim and collapse every whitespace run to a single space.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub evictions: u64,
}

/// Bounded LRU memo of successful results.
pub struct ResultCache {
    entries: Mutex<LruCache<Fingerprint, String>>,
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    evictions: AtomicU64,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or(NonZeroUsize::MIN.saturating_add(DEFAULT_CACHE_CAPACITY - 1));
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stores: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a result, marking it most recently used
    pub fn lookup(&self, key: &Fingerprint) -> Option<String> {
        let found = self.entries.lock().get(key).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Store a result, evicting the least recently used entry when full
    pub fn store(&self, key: Fingerprint, result: impl Into<String>) {
        let evicted = {
            let mut entries = self.entries.lock();
            matches!(entries.push(key.clone(), result.into()), Some((old, _)) if old != key)
        };
        self.stores.fetch_add(1, Ordering::Relaxed);
        if evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCache")
            .field("len", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}
