use super::*;
use crate::adapter::{Adapter, ChunkStream};
use crate::cancel::CancellationScope;
use crate::config::{DuplicatePolicy, WeaveConfig};
use crate::error::{FailureKind, WeaveError};
use crate::progress::ProgressSink;
use crate::retry::RetryPolicy;
use crate::types::*;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Step {
    Reply(&'static str),
    Transient,
    RateLimited(Duration),
    Auth,
    Refused,
    /// Never answers
    Hang,
    Chunks(Vec<&'static str>, Duration),
    ChunksThenReset(Vec<&'static str>),
}

/// Adapter playing back a per-model script; the last step repeats forever.
#[derive(Debug)]
struct Scripted {
    info: Arc<AdapterInfo>,
    caps: Capabilities,
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl Scripted {
    fn new(family: ProviderFamily, caps: Capabilities) -> Arc<Self> {
        Arc::new(Self {
            info: Arc::new(AdapterInfo {
                family,
                name: format!("scripted-{}", family),
            }),
            caps,
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        })
    }

    fn chat() -> Arc<Self> {
        Self::new(ProviderFamily::Chat, Capabilities::chat().with_streaming())
    }

    fn script(self: &Arc<Self>, model: &str, steps: Vec<Step>) -> Arc<Self> {
        self.scripts.lock().insert(model.to_string(), steps.into());
        Arc::clone(self)
    }

    fn calls(&self, model: &str) -> u32 {
        self.calls.lock().get(model).copied().unwrap_or(0)
    }

    fn next_step(&self, model: &str) -> Step {
        *self.calls.lock().entry(model.to_string()).or_insert(0) += 1;
        let mut scripts = self.scripts.lock();
        let steps = scripts.entry(model.to_string()).or_default();
        match steps.len() {
            0 => Step::Reply("ok"),
            1 => steps[0].clone(),
            _ => steps.pop_front().unwrap_or(Step::Reply("ok")),
        }
    }
}

fn failure(step: &Step) -> Option<WeaveError> {
    match step {
        Step::Transient => Some(WeaveError::server(503, "upstream overloaded")),
        Step::RateLimited(wait) => Some(WeaveError::rate_limit("slow down", Some(*wait))),
        Step::Auth => Some(WeaveError::authentication(
            "invalid api key sk-test-0123456789abcdef",
        )),
        Step::Refused => Some(WeaveError::content_policy("refused")),
        _ => None,
    }
}

#[async_trait]
impl Adapter for Scripted {
    fn info(&self) -> Arc<AdapterInfo> {
        self.info.clone()
    }

    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    async fn call(
        &self,
        candidate: &ModelCandidate,
        _spec: &RequestSpec,
    ) -> Result<AdapterResponse, WeaveError> {
        let step = self.next_step(&candidate.model);
        if let Some(err) = failure(&step) {
            return Err(err);
        }
        match step {
            Step::Reply(text) => Ok(AdapterResponse::text(&candidate.model, text)),
            Step::Chunks(chunks, _) => Ok(AdapterResponse::text(&candidate.model, chunks.concat())),
            Step::ChunksThenReset(_) => Err(WeaveError::stream("connection reset")),
            _ => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(WeaveError::other("hang ended"))
            }
        }
    }

    async fn stream_call(
        &self,
        candidate: &ModelCandidate,
        _spec: &RequestSpec,
    ) -> Result<Box<ChunkStream>, WeaveError> {
        let step = self.next_step(&candidate.model);
        if let Some(err) = failure(&step) {
            return Err(err);
        }
        let stream: Box<ChunkStream> = match step {
            Step::Reply(text) => Box::new(futures::stream::iter(vec![Ok::<_, WeaveError>(
                StreamChunk::delta(text),
            )])),
            Step::Chunks(chunks, gap) => Box::new(Box::pin(futures::stream::iter(chunks).then(
                move |chunk| async move {
                    tokio::time::sleep(gap).await;
                    Ok::<_, WeaveError>(StreamChunk::delta(chunk))
                },
            ))),
            Step::ChunksThenReset(chunks) => {
                let mut items: Vec<Result<StreamChunk, WeaveError>> =
                    chunks.into_iter().map(|c| Ok(StreamChunk::delta(c))).collect();
                items.push(Err(WeaveError::stream("connection reset")));
                Box::new(futures::stream::iter(items))
            }
            _ => Box::new(futures::stream::pending::<Result<StreamChunk, WeaveError>>()),
        };
        Ok(stream)
    }
}

fn candidate(family: ProviderFamily, model: &str) -> ModelCandidate {
    ModelCandidate::new(family, format!("https://{}.test/v1", model), model)
        .with_credential("sk-test-0123456789abcdef")
}

fn chat(model: &str) -> ModelCandidate {
    candidate(ProviderFamily::Chat, model)
}

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new()
        .with_max_retries(max_retries)
        .with_initial_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
}

fn orchestrator(adapter: Arc<Scripted>, max_retries: u32) -> Arc<Orchestrator> {
    Arc::new(
        Orchestrator::builder()
            .adapter(adapter)
            .retry(fast_retry(max_retries))
            .progress_interval(Duration::ZERO)
            .finish(),
    )
}

fn phases(events: &[ProgressEvent]) -> Vec<Phase> {
    events.iter().map(|e| e.phase).collect()
}

fn partial_texts(events: &[ProgressEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match (&e.phase, &e.payload) {
            (Phase::Partial, EventPayload::Text { text }) => Some(text.clone()),
            _ => None,
        })
        .collect()
}

fn recording() -> (Arc<Mutex<Vec<ProgressEvent>>>, Arc<dyn ProgressSink>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = events.clone();
    let sink = move |event: ProgressEvent| sink_events.lock().push(event);
    (events, Arc::new(sink))
}

#[tokio::test]
async fn test_translate_retries_twice_then_serves_and_caches() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let adapter = Scripted::chat()
        .script("a", vec![Step::Transient, Step::Transient, Step::Reply("Hello")]);
    let orchestrator = orchestrator(adapter.clone(), 3);

    let spec = RequestSpec::translate("你好", "English").with_candidates(vec![chat("a"), chat("b")]);
    let (events, outcome) = orchestrator.submit(spec).unwrap().wait().await.unwrap();

    assert_eq!(phases(&events), vec![Phase::Retrying, Phase::Retrying, Phase::Done]);
    assert!(events.last().unwrap().is_final);
    let completion = outcome.completion().unwrap();
    assert_eq!(completion.text, "Hello");
    assert_eq!(
        completion.served_by,
        ServedBy::Candidate {
            index: 0,
            family: ProviderFamily::Chat,
            model: "a".into()
        }
    );
    assert_eq!(adapter.calls("a"), 3);
    assert_eq!(adapter.calls("b"), 0);
    assert_eq!(orchestrator.cache().len(), 1);
}

#[tokio::test]
async fn test_cache_hit_makes_no_calls() {
    let adapter = Scripted::chat().script("a", vec![Step::Reply("Hello")]);
    let orchestrator = orchestrator(adapter.clone(), 0);

    let first = RequestSpec::translate("你好", "English").push_candidate(chat("a"));
    orchestrator.submit(first).unwrap().outcome().await.unwrap();
    assert_eq!(adapter.calls("a"), 1);

    // whitespace differences hit the same entry
    let second = RequestSpec::translate("  你好\n", "English").push_candidate(chat("a"));
    let (events, outcome) = orchestrator.submit(second).unwrap().wait().await.unwrap();

    assert_eq!(adapter.calls("a"), 1);
    assert_eq!(outcome.completion().unwrap().served_by, ServedBy::Cache);
    assert_eq!(outcome.text(), Some("Hello"));
    assert_eq!(phases(&events), vec![Phase::Done]);
}

#[tokio::test]
async fn test_cache_is_keyed_by_target_language() {
    let adapter = Scripted::chat().script("a", vec![Step::Reply("x")]);
    let orchestrator = orchestrator(adapter.clone(), 0);

    for target in ["English", "French"] {
        let spec = RequestSpec::translate("你好", target).push_candidate(chat("a"));
        orchestrator.submit(spec).unwrap().outcome().await.unwrap();
    }
    assert_eq!(adapter.calls("a"), 2);
}

#[tokio::test]
async fn test_fallback_after_transient_exhaustion() {
    let adapter = Scripted::chat()
        .script("a", vec![Step::Transient])
        .script("b", vec![Step::Reply("from b")]);
    let orchestrator = orchestrator(adapter.clone(), 2);

    let spec = RequestSpec::expand("a cat").with_candidates(vec![chat("a"), chat("b")]);
    let (events, outcome) = orchestrator.submit(spec).unwrap().wait().await.unwrap();

    let completion = outcome.completion().unwrap();
    assert_eq!(completion.text, "from b");
    assert!(matches!(completion.served_by, ServedBy::Candidate { index: 1, .. }));
    assert_eq!(completion.failures.len(), 1);
    assert_eq!(completion.failures[0].kind, FailureKind::Transient);
    assert_eq!(completion.failures[0].attempts, 3);
    assert_eq!(adapter.calls("a"), 3);
    assert_eq!(adapter.calls("b"), 1);

    // two in-place retries, one fallback, then done
    assert_eq!(
        phases(&events),
        vec![Phase::Retrying, Phase::Retrying, Phase::Retrying, Phase::Done]
    );
    assert!(matches!(
        events[2].payload,
        EventPayload::Attempt { fallback: true, candidate: 0, .. }
    ));

    // expand without a deterministic rule is never cached
    assert!(orchestrator.cache().is_empty());
}

#[tokio::test]
async fn test_auth_failure_on_streaming_caption_falls_back_immediately() {
    let adapter = Scripted::new(
        ProviderFamily::Vision,
        Capabilities::chat().with_vision().with_streaming(),
    )
    .script("a", vec![Step::Auth])
    .script("b", vec![Step::Chunks(vec!["a ", "red ", "fox"], Duration::ZERO)]);
    let orchestrator = orchestrator(adapter.clone(), 3);

    let spec = RequestSpec::caption_image(ImageData::new(vec![0u8; 8], "image/png"))
        .with_stream(true)
        .with_candidates(vec![
            candidate(ProviderFamily::Vision, "a"),
            candidate(ProviderFamily::Vision, "b"),
        ]);
    let (events, outcome) = orchestrator.submit(spec).unwrap().wait().await.unwrap();

    assert_eq!(adapter.calls("a"), 1);
    assert_eq!(outcome.text(), Some("a red fox"));
    assert_eq!(events[0].phase, Phase::Retrying);
    match &events[0].payload {
        EventPayload::Attempt {
            kind,
            fallback,
            message,
            ..
        } => {
            assert_eq!(*kind, FailureKind::Authentication);
            assert!(*fallback);
            assert!(!message.contains("sk-test-0123456789abcdef"));
        }
        other => panic!("unexpected payload {:?}", other),
    }
    assert_eq!(partial_texts(&events).concat(), "a red fox");
    assert_eq!(events.last().unwrap().phase, Phase::Done);
}

#[tokio::test]
async fn test_all_content_policy_failures() {
    let adapter = Scripted::chat()
        .script("a", vec![Step::Refused])
        .script("b", vec![Step::Refused]);
    let orchestrator = orchestrator(adapter.clone(), 3);

    let spec = RequestSpec::expand("something").with_candidates(vec![chat("a"), chat("b")]);
    let (events, outcome) = orchestrator.submit(spec).unwrap().wait().await.unwrap();

    let Outcome::Failed(exhausted) = &outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert_eq!(exhausted.causes.len(), 2);
    for (i, cause) in exhausted.causes.iter().enumerate() {
        assert_eq!(cause.index, i);
        assert_eq!(cause.kind, FailureKind::ContentPolicy);
        assert_eq!(cause.attempts, 1);
    }
    let last = events.last().unwrap();
    assert_eq!(last.phase, Phase::Failed);
    assert_eq!(last.payload, EventPayload::Failure { causes: 2 });
}

#[tokio::test]
async fn test_cancel_mid_stream() {
    let adapter = Scripted::chat().script(
        "a",
        vec![Step::Chunks(
            vec!["one ", "two ", "three ", "four ", "five"],
            Duration::from_millis(40),
        )],
    );
    let orchestrator = orchestrator(adapter.clone(), 3);

    let spec = RequestSpec::translate("一二三四五", "English")
        .with_stream(true)
        .push_candidate(chat("a"));
    let mut submission = orchestrator.submit(spec).unwrap();

    let mut seen = Vec::new();
    while let Some(event) = submission.events().next().await {
        seen.push(event);
        if seen.len() == 2 {
            break;
        }
    }
    submission.cancel();
    let (rest, outcome) = submission.wait().await.unwrap();

    assert!(outcome.is_cancelled());
    assert_eq!(phases(&rest), vec![Phase::Cancelled]);
    assert_eq!(partial_texts(&seen), vec!["one ", "two "]);
    assert!(orchestrator.cache().is_empty());
    assert_eq!(orchestrator.in_flight(), 0);
}

#[tokio::test]
async fn test_cancel_drops_merged_partial_output() {
    let adapter = Scripted::chat().script(
        "a",
        vec![Step::Chunks(
            vec!["one ", "two ", "three ", "four "],
            Duration::from_millis(40),
        )],
    );
    let orchestrator = Arc::new(
        Orchestrator::builder()
            .adapter(adapter.clone())
            .retry(fast_retry(0))
            .progress_interval(Duration::from_secs(3600))
            .finish(),
    );

    let spec = RequestSpec::translate("一二三四", "English")
        .with_stream(true)
        .push_candidate(chat("a"));
    let mut submission = orchestrator.submit(spec).unwrap();

    let first = submission.events().next().await.unwrap();
    assert_eq!(first.phase, Phase::Partial);
    // later chunks are merged into a pending event that is never flushed
    tokio::time::sleep(Duration::from_millis(50)).await;
    submission.cancel();
    let (rest, outcome) = submission.wait().await.unwrap();

    assert!(outcome.is_cancelled());
    assert_eq!(phases(&rest), vec![Phase::Cancelled]);
}

#[tokio::test]
async fn test_mid_stream_reset_restarts_stream() {
    let adapter = Scripted::chat().script(
        "a",
        vec![
            Step::ChunksThenReset(vec!["Hel"]),
            Step::Chunks(vec!["Hel", "lo"], Duration::ZERO),
        ],
    );
    let orchestrator = orchestrator(adapter.clone(), 1);

    let spec = RequestSpec::expand("hi").with_stream(true).push_candidate(chat("a"));
    let (events, outcome) = orchestrator.submit(spec).unwrap().wait().await.unwrap();

    assert_eq!(outcome.text(), Some("Hello"));
    assert_eq!(
        phases(&events),
        vec![
            Phase::Partial,
            Phase::Retrying,
            Phase::Partial,
            Phase::Partial,
            Phase::Done
        ]
    );
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let adapter = Scripted::chat();
    let orchestrator = orchestrator(adapter.clone(), 3);
    let scope = CancellationScope::new();
    scope.cancel();

    let (events, sink) = recording();
    let spec = RequestSpec::expand("x").push_candidate(chat("a"));
    let outcome = orchestrator.execute(spec, sink, scope).await.unwrap();

    assert!(outcome.is_cancelled());
    assert_eq!(adapter.calls("a"), 0);
    assert_eq!(phases(&events.lock()), vec![Phase::Cancelled]);
}

#[tokio::test]
async fn test_caller_scope_cancels_backoff() {
    let adapter = Scripted::chat().script("a", vec![Step::Transient]);
    let orchestrator = Arc::new(
        Orchestrator::builder()
            .adapter(adapter.clone())
            .retry(
                RetryPolicy::new()
                    .with_max_retries(5)
                    .with_initial_delay(Duration::from_secs(3600))
                    .with_max_delay(Duration::from_secs(3600)),
            )
            .finish(),
    );
    let host = CancellationScope::new();
    let spec = RequestSpec::expand("x").push_candidate(chat("a"));
    let submission = orchestrator.submit_scoped(spec, host.child()).unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    host.cancel();
    let (events, outcome) = submission.wait().await.unwrap();

    assert!(outcome.is_cancelled());
    assert_eq!(adapter.calls("a"), 1);
    assert_eq!(phases(&events), vec![Phase::Retrying, Phase::Cancelled]);
}

#[tokio::test]
async fn test_concurrent_executions_are_isolated() {
    let adapter = Scripted::chat()
        .script("slow", vec![Step::Transient, Step::Transient, Step::Reply("slow")])
        .script("fast", vec![Step::Reply("fast")]);
    let orchestrator = orchestrator(adapter.clone(), 3);

    let slow = orchestrator
        .submit(RequestSpec::expand("a").with_request_id("slow").push_candidate(chat("slow")))
        .unwrap();
    let fast = orchestrator
        .submit(RequestSpec::expand("b").with_request_id("fast").push_candidate(chat("fast")))
        .unwrap();

    let (fast_events, fast_outcome) = fast.wait().await.unwrap();
    let (slow_events, slow_outcome) = slow.wait().await.unwrap();

    assert_eq!(fast_outcome.text(), Some("fast"));
    assert_eq!(slow_outcome.text(), Some("slow"));
    assert!(fast_events.iter().all(|e| e.request_id == "fast"));
    assert!(slow_events.iter().all(|e| e.request_id == "slow"));
    assert_eq!(phases(&fast_events), vec![Phase::Done]);
    assert_eq!(
        slow_events.iter().filter(|e| e.is_final).count(),
        1,
        "exactly one terminal event"
    );
}

#[tokio::test]
async fn test_duplicate_request_rejected() {
    let adapter = Scripted::chat().script("a", vec![Step::Hang]);
    let orchestrator = orchestrator(adapter.clone(), 0);

    let spec = RequestSpec::expand("x").with_request_id("dup").push_candidate(chat("a"));
    let first = orchestrator.submit(spec.clone()).unwrap();

    let err = orchestrator.submit(spec).unwrap_err();
    assert!(matches!(err, WeaveError::DuplicateRequest(ref id) if id == "dup"));

    assert!(orchestrator.cancel("dup"));
    assert!(first.outcome().await.unwrap().is_cancelled());
    assert!(!orchestrator.cancel("dup"));
}

#[tokio::test]
async fn test_duplicate_request_supersedes() {
    let adapter = Scripted::chat()
        .script("hang", vec![Step::Hang])
        .script("quick", vec![Step::Reply("second")]);
    let orchestrator = Arc::new(
        Orchestrator::builder()
            .adapter(adapter.clone())
            .duplicate_policy(DuplicatePolicy::Supersede)
            .finish(),
    );

    let first = orchestrator
        .submit(RequestSpec::expand("x").with_request_id("same").push_candidate(chat("hang")))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = orchestrator
        .submit(RequestSpec::expand("x").with_request_id("same").push_candidate(chat("quick")))
        .unwrap();

    let (first_events, first_outcome) = first.wait().await.unwrap();
    let second_outcome = second.outcome().await.unwrap();

    assert!(first_outcome.is_cancelled());
    assert_eq!(phases(&first_events), vec![Phase::Cancelled]);
    assert_eq!(second_outcome.text(), Some("second"));
    assert_eq!(orchestrator.in_flight(), 0);
}

#[tokio::test]
async fn test_interrupt_all() {
    let adapter = Scripted::chat().script("a", vec![Step::Hang]);
    let orchestrator = orchestrator(adapter.clone(), 0);

    let submissions: Vec<_> = (0..3)
        .map(|i| {
            orchestrator
                .submit(RequestSpec::expand(format!("x{}", i)).push_candidate(chat("a")))
                .unwrap()
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(orchestrator.interrupt_all(), 3);
    for submission in submissions {
        assert!(submission.outcome().await.unwrap().is_cancelled());
    }
    assert_eq!(orchestrator.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_attempts_are_bounded_with_timeouts() {
    let adapter = Scripted::chat()
        .script("a", vec![Step::Hang])
        .script("b", vec![Step::Hang]);
    let orchestrator = orchestrator(adapter.clone(), 2);

    let spec = RequestSpec::expand("x").with_candidates(vec![
        chat("a").with_timeout(Duration::from_millis(50)),
        chat("b").with_timeout(Duration::from_millis(50)),
    ]);
    let outcome = orchestrator.submit(spec).unwrap().outcome().await.unwrap();

    let Outcome::Failed(exhausted) = outcome else {
        panic!("expected exhaustion");
    };
    assert_eq!(adapter.calls("a"), 3);
    assert_eq!(adapter.calls("b"), 3);
    assert!(exhausted
        .causes
        .iter()
        .all(|c| c.kind == FailureKind::Transient && c.attempts == 3));
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_is_respected() {
    let adapter = Scripted::chat().script(
        "a",
        vec![Step::RateLimited(Duration::from_secs(2)), Step::Reply("ok")],
    );
    let orchestrator = Arc::new(
        Orchestrator::builder()
            .adapter(adapter.clone())
            .retry(
                RetryPolicy::new()
                    .with_initial_delay(Duration::from_millis(1))
                    .with_max_delay(Duration::from_secs(10)),
            )
            .finish(),
    );

    let started = tokio::time::Instant::now();
    let spec = RequestSpec::expand("x").push_candidate(chat("a"));
    let outcome = orchestrator.submit(spec).unwrap().outcome().await.unwrap();

    assert!(outcome.is_success());
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test]
async fn test_capability_mismatch_skips_without_calls() {
    let native = Scripted::new(ProviderFamily::NativeTranslate, Capabilities::native_translate());
    let vision = Scripted::new(ProviderFamily::Vision, Capabilities::chat().with_vision())
        .script("v", vec![Step::Reply("a dog")]);
    let orchestrator = Arc::new(
        Orchestrator::builder()
            .adapter(native.clone())
            .adapter(vision.clone())
            .finish(),
    );

    let spec = RequestSpec::caption_video(vec![ImageData::new(vec![1u8], "image/jpeg")])
        .with_stream(true)
        .with_candidates(vec![
            candidate(ProviderFamily::LocalServer, "missing"),
            candidate(ProviderFamily::NativeTranslate, "baidu"),
            candidate(ProviderFamily::Vision, "v"),
        ]);
    let outcome = orchestrator.submit(spec).unwrap().outcome().await.unwrap();

    // streaming was requested but the vision adapter only answers one-shot
    let completion = outcome.completion().unwrap();
    assert_eq!(completion.text, "a dog");
    assert_eq!(completion.failures.len(), 2);
    assert!(completion
        .failures
        .iter()
        .all(|f| f.kind == FailureKind::Configuration && f.attempts == 0));
    assert_eq!(native.calls("baidu"), 0);
}

#[tokio::test]
async fn test_empty_candidate_list_fails() {
    let orchestrator = orchestrator(Scripted::chat(), 0);
    let outcome = orchestrator
        .submit(RequestSpec::expand("x"))
        .unwrap()
        .outcome()
        .await
        .unwrap();
    match outcome {
        Outcome::Failed(exhausted) => assert!(exhausted.causes.is_empty()),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_queued_when_concurrency_is_bounded() {
    let adapter = Scripted::chat()
        .script("hang", vec![Step::Hang])
        .script("b", vec![Step::Reply("b")]);
    let orchestrator = Arc::new(
        Orchestrator::builder()
            .adapter(adapter.clone())
            .max_concurrent(1)
            .finish(),
    );

    let blocker = orchestrator
        .submit(RequestSpec::expand("x").push_candidate(chat("hang")))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let waiting = orchestrator
        .submit(RequestSpec::expand("y").push_candidate(chat("b")))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(adapter.calls("b"), 0);

    blocker.cancel();
    let (events, outcome) = waiting.wait().await.unwrap();
    assert_eq!(phases(&events), vec![Phase::Queued, Phase::Done]);
    assert_eq!(outcome.text(), Some("b"));
}

#[tokio::test]
async fn test_candidates_from_config() {
    let adapter = Scripted::chat().script("configured", vec![Step::Reply("done")]);
    let config = WeaveConfig::default()
        .with_candidates(OperationKind::Expand, vec![chat("configured")]);
    let orchestrator = Arc::new(
        Orchestrator::builder()
            .config(&config)
            .candidates(config.clone())
            .adapter(adapter.clone())
            .finish(),
    );

    let outcome = orchestrator
        .submit(RequestSpec::expand("x"))
        .unwrap()
        .outcome()
        .await
        .unwrap();
    assert_eq!(outcome.text(), Some("done"));
    assert_eq!(adapter.calls("configured"), 1);
}
