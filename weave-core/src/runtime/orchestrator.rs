//! Orchestrator implementation.
//!
//! The orchestrator turns a [`RequestSpec`] into a terminal [`Outcome`] by
//! consulting the cache, then driving adapter calls over the candidate list
//! with per-candidate retry and in-order fallback. Every wait (permit,
//! network call, stream chunk, backoff) is raced against the request's
//! [`CancellationScope`].

use crate::adapter::Adapter;
use crate::cache::{Fingerprint, ResultCache, DEFAULT_CACHE_CAPACITY};
use crate::cancel::CancellationScope;
use crate::config::{CandidateSource, DuplicatePolicy, WeaveConfig};
use crate::error::{FailureKind, WeaveError};
use crate::pool::DEFAULT_TIMEOUT;
use crate::progress::{progress_channel, ProgressChannel, ProgressSink, DEFAULT_PROGRESS_INTERVAL};
use crate::retry::RetryPolicy;
use crate::runtime::submission::Submission;
use crate::types::*;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Type-erased adapter that can be shared across executions
type BoxedAdapter = Arc<dyn Adapter>;

/// Builder for an [`Orchestrator`].
///
/// # Example
///
/// ```ignore
/// let orchestrator = Orchestrator::builder()
///     .adapter(LoggingLayer::new().layer(ChatAdapter::new(transport.clone())))
///     .adapter(BaiduAdapter::new(transport))
///     .retry(RetryPolicy::new().with_max_retries(2))
///     .finish();
/// ```
pub struct OrchestratorBuilder {
    adapters: HashMap<ProviderFamily, BoxedAdapter>,
    retry: RetryPolicy,
    default_timeout: Duration,
    cache: Option<Arc<ResultCache>>,
    cache_capacity: usize,
    progress_interval: Duration,
    max_concurrent: Option<usize>,
    duplicate_policy: DuplicatePolicy,
    source: Option<Arc<dyn CandidateSource>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            retry: RetryPolicy::default(),
            default_timeout: DEFAULT_TIMEOUT,
            cache: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            max_concurrent: None,
            duplicate_policy: DuplicatePolicy::default(),
            source: None,
        }
    }

    /// Register the adapter serving its provider family.
    ///
    /// Registering a second adapter for the same family replaces the first.
    pub fn adapter<A: Adapter>(mut self, adapter: A) -> Self {
        let family = adapter.info().family;
        if self.adapters.insert(family, Arc::new(adapter)).is_some() {
            tracing::debug!("[Orchestrator] replaced adapter for {}", family);
        }
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Per-call timeout for candidates that do not set their own
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Share an existing cache instead of creating one
    pub fn cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Bound the number of executions holding the network at once
    pub fn max_concurrent(mut self, limit: usize) -> Self {
        self.max_concurrent = Some(limit);
        self
    }

    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Fill empty candidate lists from `source`
    pub fn candidates<S: CandidateSource + 'static>(mut self, source: S) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Apply the orchestrator settings of `config`
    pub fn config(mut self, config: &WeaveConfig) -> Self {
        self.retry = config.retry.clone();
        self.default_timeout = config.default_timeout;
        self.cache_capacity = config.cache_capacity;
        self.progress_interval = config.progress_interval;
        self.max_concurrent = config.max_concurrent;
        self.duplicate_policy = config.duplicate_policy;
        self
    }

    pub fn finish(self) -> Orchestrator {
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(ResultCache::new(self.cache_capacity)));
        let permits = self
            .max_concurrent
            .filter(|limit| *limit > 0)
            .map(|limit| Arc::new(Semaphore::new(limit)));

        Orchestrator {
            adapters: self.adapters,
            retry: self.retry,
            default_timeout: self.default_timeout,
            cache,
            progress_interval: self.progress_interval,
            permits,
            duplicate_policy: self.duplicate_policy,
            source: self.source,
            in_flight: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        }
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight {
    generation: u64,
    scope: CancellationScope,
}

/// Keeps a request id registered while its execution runs.
pub(crate) struct Registration {
    registry: Arc<DashMap<String, InFlight>>,
    request_id: String,
    generation: u64,
    scope: CancellationScope,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let generation = self.generation;
        self.registry
            .remove_if(&self.request_id, |_, entry| entry.generation == generation);
    }
}

/// Top-level entry point: executes requests against registered adapters.
pub struct Orchestrator {
    adapters: HashMap<ProviderFamily, BoxedAdapter>,
    retry: RetryPolicy,
    default_timeout: Duration,
    cache: Arc<ResultCache>,
    progress_interval: Duration,
    permits: Option<Arc<Semaphore>>,
    duplicate_policy: DuplicatePolicy,
    source: Option<Arc<dyn CandidateSource>>,
    in_flight: Arc<DashMap<String, InFlight>>,
    generation: AtomicU64,
}

enum AttemptResult {
    Done(AdapterResponse),
    Failed(WeaveError),
    Cancelled,
}

enum CandidateRun {
    Served(Completion),
    Failed(CandidateFailure),
    Cancelled,
}

impl Orchestrator {
    /// Create a new builder
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Number of executions currently registered
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Execute `spec` to completion on the current task.
    ///
    /// Progress events go to `sink`; `scope` is the caller's cancellation
    /// handle. The only error is a rejected duplicate request id: exhaustion
    /// and cancellation are reported through the returned [`Outcome`].
    pub async fn execute(
        &self,
        spec: RequestSpec,
        sink: Arc<dyn ProgressSink>,
        scope: CancellationScope,
    ) -> Result<Outcome, WeaveError> {
        let registration = self.register(&spec.request_id, &scope)?;
        Ok(self.drive(spec, sink, registration).await)
    }

    /// Spawn `spec` on the runtime with a fresh cancellation scope.
    pub fn submit(self: &Arc<Self>, spec: RequestSpec) -> Result<Submission, WeaveError> {
        self.submit_scoped(spec, CancellationScope::new())
    }

    /// Spawn `spec` on the runtime, bound to the caller's `scope`.
    pub fn submit_scoped(
        self: &Arc<Self>,
        spec: RequestSpec,
        scope: CancellationScope,
    ) -> Result<Submission, WeaveError> {
        let registration = self.register(&spec.request_id, &scope)?;
        let (sink, events) = progress_channel();
        let request_id = spec.request_id.clone();

        let this = Arc::clone(self);
        let handle =
            tokio::spawn(async move { this.drive(spec, Arc::new(sink), registration).await });

        Ok(Submission::new(request_id, events, scope, handle))
    }

    /// Cancel the execution registered under `request_id`
    pub fn cancel(&self, request_id: &str) -> bool {
        match self.in_flight.get(request_id) {
            Some(entry) => {
                entry.scope.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight execution, returning how many were signalled
    pub fn interrupt_all(&self) -> usize {
        let mut count = 0;
        for entry in self.in_flight.iter() {
            entry.scope.cancel();
            count += 1;
        }
        tracing::info!("[Orchestrator] interrupt_all cancelled {} request(s)", count);
        count
    }

    fn register(
        &self,
        request_id: &str,
        caller: &CancellationScope,
    ) -> Result<Registration, WeaveError> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let scope = caller.child();
        let entry = InFlight {
            generation,
            scope: scope.clone(),
        };

        match self.in_flight.entry(request_id.to_string()) {
            Entry::Occupied(mut occupied) => match self.duplicate_policy {
                DuplicatePolicy::Reject => {
                    return Err(WeaveError::DuplicateRequest(request_id.to_string()));
                }
                DuplicatePolicy::Supersede => {
                    let previous = occupied.insert(entry);
                    previous.scope.cancel();
                    tracing::debug!("[Orchestrator] {} superseded", request_id);
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }

        Ok(Registration {
            registry: Arc::clone(&self.in_flight),
            request_id: request_id.to_string(),
            generation,
            scope,
        })
    }

    async fn drive(
        &self,
        spec: RequestSpec,
        sink: Arc<dyn ProgressSink>,
        registration: Registration,
    ) -> Outcome {
        let spec = match &self.source {
            Some(source) => source.prepare(spec),
            None => spec,
        };
        let scope = registration.scope.clone();
        let mut progress =
            ProgressChannel::new(spec.request_id.clone(), sink, self.progress_interval);

        tracing::debug!(
            "[Orchestrator] {} start: op={}, candidates={}, stream={}",
            spec.request_id,
            spec.operation,
            spec.candidates.len(),
            spec.streaming
        );

        let outcome = self.run(&spec, &scope, &mut progress).await;

        let payload = match &outcome {
            Outcome::Success(completion) => EventPayload::Text {
                text: completion.text.clone(),
            },
            Outcome::Failed(exhausted) => EventPayload::Failure {
                causes: exhausted.causes.len(),
            },
            Outcome::Cancelled { .. } => EventPayload::Empty,
        };
        progress.phase(outcome.phase(), payload);

        match &outcome {
            Outcome::Success(completion) => tracing::debug!(
                "[Orchestrator] {} done: served_by={:?}",
                spec.request_id,
                completion.served_by
            ),
            Outcome::Failed(exhausted) => {
                tracing::error!("[Orchestrator] {} failed: {}", spec.request_id, exhausted)
            }
            Outcome::Cancelled { .. } => {
                tracing::debug!("[Orchestrator] {} cancelled", spec.request_id)
            }
        }

        drop(registration);
        outcome
    }

    async fn run(
        &self,
        spec: &RequestSpec,
        scope: &CancellationScope,
        progress: &mut ProgressChannel,
    ) -> Outcome {
        let cancelled = || Outcome::Cancelled {
            request_id: spec.request_id.clone(),
        };

        if scope.is_cancelled() {
            return cancelled();
        }

        let fingerprint = Fingerprint::for_request(spec);
        if let Some(key) = &fingerprint {
            if let Some(text) = self.cache.lookup(key) {
                tracing::debug!("[Orchestrator] {} cache hit {:?}", spec.request_id, key);
                return Outcome::Success(Completion {
                    request_id: spec.request_id.clone(),
                    text,
                    served_by: ServedBy::Cache,
                    usage: None,
                    failures: Vec::new(),
                });
            }
        }

        let _permit = match self.acquire(scope, progress).await {
            Ok(permit) => permit,
            Err(()) => return cancelled(),
        };

        let mut causes = Vec::with_capacity(spec.candidates.len());
        for (index, candidate) in spec.candidates.iter().enumerate() {
            if scope.is_cancelled() {
                return cancelled();
            }

            let failure = match self.run_candidate(spec, index, candidate, scope, progress).await {
                CandidateRun::Served(mut completion) => {
                    completion.failures = causes;
                    if let Some(key) = fingerprint {
                        self.cache.store(key, completion.text.clone());
                    }
                    return Outcome::Success(completion);
                }
                CandidateRun::Cancelled => return cancelled(),
                CandidateRun::Failed(failure) => failure,
            };

            if index + 1 < spec.candidates.len() {
                progress.phase(
                    Phase::Retrying,
                    EventPayload::Attempt {
                        candidate: index,
                        model: failure.model.clone(),
                        attempt: failure.attempts,
                        kind: failure.kind,
                        message: failure.message.clone(),
                        fallback: true,
                    },
                );
            }
            causes.push(failure);
        }

        Outcome::Failed(Exhausted {
            request_id: spec.request_id.clone(),
            causes,
        })
    }

    /// Take a concurrency permit, emitting `queued` when one is not free.
    ///
    /// `Err` means the scope was cancelled while waiting.
    async fn acquire(
        &self,
        scope: &CancellationScope,
        progress: &mut ProgressChannel,
    ) -> Result<Option<OwnedSemaphorePermit>, ()> {
        let Some(semaphore) = &self.permits else {
            return Ok(None);
        };

        if let Ok(permit) = Arc::clone(semaphore).try_acquire_owned() {
            return Ok(Some(permit));
        }

        progress.phase(Phase::Queued, EventPayload::Empty);
        match scope.guard(Arc::clone(semaphore).acquire_owned()).await {
            Some(Ok(permit)) => Ok(Some(permit)),
            // the semaphore is never closed
            Some(Err(_)) => Ok(None),
            None => Err(()),
        }
    }

    async fn run_candidate(
        &self,
        spec: &RequestSpec,
        index: usize,
        candidate: &ModelCandidate,
        scope: &CancellationScope,
        progress: &mut ProgressChannel,
    ) -> CandidateRun {
        let failure = |kind: FailureKind, attempts: u32, message: String| {
            CandidateRun::Failed(CandidateFailure {
                index,
                family: candidate.family,
                model: candidate.model.clone(),
                kind,
                attempts,
                message,
            })
        };

        let Some(adapter) = self.adapters.get(&candidate.family) else {
            tracing::error!(
                "[Orchestrator] {} candidate #{} skipped: no adapter for {}",
                spec.request_id,
                index,
                candidate.family
            );
            return failure(
                FailureKind::Configuration,
                0,
                format!("no adapter registered for {}", candidate.family),
            );
        };

        let caps = adapter.capabilities();
        if !caps.can_serve(spec.operation) {
            tracing::error!(
                "[Orchestrator] {} candidate #{} skipped: {} cannot serve {}",
                spec.request_id,
                index,
                adapter.info().name,
                spec.operation
            );
            return failure(
                FailureKind::Configuration,
                0,
                format!("{} cannot serve {}", adapter.info().name, spec.operation),
            );
        }

        let stream = spec.streaming && caps.streaming;
        let limit = candidate.timeout.unwrap_or(self.default_timeout);
        let budget = self.retry.attempts_per_candidate();
        let mut attempt = 0;

        loop {
            if scope.is_cancelled() {
                return CandidateRun::Cancelled;
            }
            attempt += 1;

            tracing::debug!(
                "[Orchestrator] {} candidate #{} ({}) attempt {}/{}",
                spec.request_id,
                index,
                candidate.model,
                attempt,
                budget
            );

            let result = if stream {
                self.attempt_stream(adapter, candidate, spec, limit, scope, progress)
                    .await
            } else {
                self.attempt_call(adapter, candidate, spec, limit, scope).await
            };

            let err = match result {
                AttemptResult::Done(response) => {
                    return CandidateRun::Served(Completion {
                        request_id: spec.request_id.clone(),
                        text: response.text,
                        served_by: ServedBy::Candidate {
                            index,
                            family: candidate.family,
                            model: candidate.model.clone(),
                        },
                        usage: response.usage,
                        failures: Vec::new(),
                    });
                }
                AttemptResult::Cancelled => return CandidateRun::Cancelled,
                AttemptResult::Failed(err) => err,
            };

            let kind = err.kind();
            let message = candidate.credential.redact(&err.to_string());

            if !kind.is_transient() {
                tracing::error!(
                    "[Orchestrator] {} candidate #{} ({}) failed [{}]: {}",
                    spec.request_id,
                    index,
                    candidate.model,
                    kind,
                    message
                );
                return failure(kind, attempt, message);
            }
            if attempt >= budget {
                tracing::warn!(
                    "[Orchestrator] {} candidate #{} ({}) exhausted after {} attempt(s): {}",
                    spec.request_id,
                    index,
                    candidate.model,
                    attempt,
                    message
                );
                return failure(kind, attempt, message);
            }

            let delay = self.retry.delay_for(attempt - 1, err.retry_after());
            tracing::warn!(
                "[Orchestrator] {} candidate #{} ({}) attempt {} failed, retrying in {:?}: {}",
                spec.request_id,
                index,
                candidate.model,
                attempt,
                delay,
                message
            );
            progress.phase(
                Phase::Retrying,
                EventPayload::Attempt {
                    candidate: index,
                    model: candidate.model.clone(),
                    attempt,
                    kind,
                    message,
                    fallback: false,
                },
            );

            if scope.guard(tokio::time::sleep(delay)).await.is_none() {
                return CandidateRun::Cancelled;
            }
        }
    }

    async fn attempt_call(
        &self,
        adapter: &BoxedAdapter,
        candidate: &ModelCandidate,
        spec: &RequestSpec,
        limit: Duration,
        scope: &CancellationScope,
    ) -> AttemptResult {
        let call = tokio::time::timeout(limit, adapter.call(candidate, spec));
        match scope.guard(call).await {
            None => AttemptResult::Cancelled,
            Some(Err(_)) => AttemptResult::Failed(timed_out(candidate, limit)),
            Some(Ok(Err(err))) => AttemptResult::Failed(err),
            Some(Ok(Ok(response))) if response.finish_reason == FinishReason::ContentFilter => {
                AttemptResult::Failed(filtered(candidate))
            }
            Some(Ok(Ok(response))) => AttemptResult::Done(response),
        }
    }

    /// Streaming attempt. `limit` bounds opening the stream and the gap
    /// between two chunks.
    async fn attempt_stream(
        &self,
        adapter: &BoxedAdapter,
        candidate: &ModelCandidate,
        spec: &RequestSpec,
        limit: Duration,
        scope: &CancellationScope,
        progress: &mut ProgressChannel,
    ) -> AttemptResult {
        let open = tokio::time::timeout(limit, adapter.stream_call(candidate, spec));
        let mut stream = match scope.guard(open).await {
            None => return AttemptResult::Cancelled,
            Some(Err(_)) => return AttemptResult::Failed(timed_out(candidate, limit)),
            Some(Ok(Err(err))) => return AttemptResult::Failed(err),
            Some(Ok(Ok(stream))) => stream,
        };

        let mut text = String::new();
        let mut finish_reason = None;
        let mut usage = None;

        loop {
            let chunk = match scope.guard(tokio::time::timeout(limit, stream.next())).await {
                None => return AttemptResult::Cancelled,
                Some(Err(_)) => return AttemptResult::Failed(timed_out(candidate, limit)),
                Some(Ok(None)) => break,
                Some(Ok(Some(Err(err)))) => return AttemptResult::Failed(err),
                Some(Ok(Some(Ok(chunk)))) => chunk,
            };

            if !chunk.delta.is_empty() {
                text.push_str(&chunk.delta);
                progress.partial(chunk.delta);
            }
            if chunk.finish_reason.is_some() {
                finish_reason = chunk.finish_reason;
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
        }

        if finish_reason == Some(FinishReason::ContentFilter) {
            return AttemptResult::Failed(filtered(candidate));
        }

        AttemptResult::Done(AdapterResponse {
            text,
            model: candidate.model.clone(),
            finish_reason: finish_reason.unwrap_or(FinishReason::Stop),
            usage,
        })
    }
}

fn timed_out(candidate: &ModelCandidate, limit: Duration) -> WeaveError {
    WeaveError::timeout(format!("{} did not answer within {:?}", candidate.model, limit))
}

fn filtered(candidate: &ModelCandidate) -> WeaveError {
    WeaveError::content_policy(format!("{} stopped with content_filter", candidate.model))
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut families: Vec<String> = self.adapters.keys().map(|f| f.to_string()).collect();
        families.sort();
        f.debug_struct("Orchestrator")
            .field("adapters", &families)
            .field("retry", &self.retry)
            .field("default_timeout", &self.default_timeout)
            .field("cache", &self.cache)
            .field("duplicate_policy", &self.duplicate_policy)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}
