// ABOUTME: Integration tests for the send orchestrator lifecycle.
// ABOUTME: Drives the state machine end to end over in-memory fakes.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

use ticker_client::{
    JobStore, SendError, SendOrchestrator, SendPhase, StoreError, StreamChannel, StreamError,
    SubmissionOutcome, Transport, TIMEOUT_MESSAGE,
};
use ticker_types::{Job, JobResult, JobStatus, StreamEvent};

// ============================================================================
// Fakes
// ============================================================================

struct ScriptedTransport {
    outcomes: Mutex<VecDeque<SubmissionOutcome>>,
}

impl ScriptedTransport {
    fn new(outcomes: Vec<SubmissionOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn submit(
        &self,
        _chat_id: &str,
        _content: &str,
        _model_hint: Option<&str>,
    ) -> SubmissionOutcome {
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected submit call")
    }
}

#[derive(Default)]
struct FakeStore {
    jobs: Mutex<HashMap<String, Job>>,
    recovery: Mutex<VecDeque<Option<Job>>>,
    recovery_calls: AtomicU32,
    fetch_calls: AtomicU32,
    fetch_gate: Mutex<Option<Arc<Notify>>>,
    watches: Mutex<HashMap<String, mpsc::Receiver<Job>>>,
}

impl FakeStore {
    fn put(&self, job: Job) {
        self.jobs.lock().unwrap().insert(job.id.clone(), job);
    }

    fn script_recovery(&self, responses: Vec<Option<Job>>) {
        *self.recovery.lock().unwrap() = responses.into();
    }

    /// Register a change-feed for a job; push snapshots on the returned sender.
    fn register_watch(&self, job_id: &str) -> mpsc::Sender<Job> {
        let (tx, rx) = mpsc::channel(8);
        self.watches.lock().unwrap().insert(job_id.to_string(), rx);
        tx
    }

    /// Make subsequent fetches park until the returned gate is notified.
    fn gate_fetches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.fetch_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    async fn wait_for_fetches(&self, count: u32) {
        while self.fetch_calls.load(Ordering::SeqCst) < count {
            tokio::task::yield_now().await;
        }
    }
}

/// Local newtype so the foreign `JobStore` trait can be implemented for a
/// shared `Arc<FakeStore>` handle without tripping the orphan rule.
struct StoreHandle(Arc<FakeStore>);

#[async_trait]
impl JobStore for StoreHandle {
    async fn fetch(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        self.0.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.0.fetch_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(self.0.jobs.lock().unwrap().get(job_id).cloned())
    }

    async fn latest_for_chat(
        &self,
        _chat_id: &str,
        _window: Duration,
    ) -> Result<Option<Job>, StoreError> {
        self.0.recovery_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .0
            .recovery
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected recovery query"))
    }

    async fn watch(&self, job_id: &str) -> Result<mpsc::Receiver<Job>, StoreError> {
        self.0
            .watches
            .lock()
            .unwrap()
            .remove(job_id)
            .ok_or_else(|| StoreError::SubscriptionUnavailable("no feed registered".to_string()))
    }
}

#[derive(Default)]
struct FakeChannel {
    streams: Mutex<HashMap<String, mpsc::Receiver<StreamEvent>>>,
}

impl FakeChannel {
    fn register_stream(&self, job_id: &str) -> mpsc::Sender<StreamEvent> {
        let (tx, rx) = mpsc::channel(16);
        self.streams.lock().unwrap().insert(job_id.to_string(), rx);
        tx
    }
}

/// Local newtype counterpart of [`StoreHandle`] for the stream channel.
struct ChannelHandle(Arc<FakeChannel>);

#[async_trait]
impl StreamChannel for ChannelHandle {
    async fn subscribe(&self, job_id: &str) -> Result<mpsc::Receiver<StreamEvent>, StreamError> {
        self.0
            .streams
            .lock()
            .unwrap()
            .remove(job_id)
            .ok_or_else(|| StreamError::Subscribe("no stream registered".to_string()))
    }
}

fn job(id: &str, status: JobStatus) -> Job {
    Job {
        id: id.to_string(),
        chat_id: "C1".to_string(),
        user_message: "Hello".to_string(),
        status,
        result: None,
        tool_calls: Vec::new(),
        error_message: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        completed_at: None,
    }
}

fn completed_job(id: &str, message_id: &str) -> Job {
    let mut j = job(id, JobStatus::Completed);
    j.result = Some(JobResult {
        message_id: Some(message_id.to_string()),
        extra: serde_json::Map::new(),
    });
    j.completed_at = Some(Utc::now());
    j
}

fn failed_job(id: &str, error: &str) -> Job {
    let mut j = job(id, JobStatus::Failed);
    j.error_message = Some(error.to_string());
    j
}

fn orchestrator(
    outcomes: Vec<SubmissionOutcome>,
) -> (
    SendOrchestrator<ScriptedTransport, StoreHandle, ChannelHandle>,
    Arc<FakeStore>,
    Arc<FakeChannel>,
) {
    let store = Arc::new(FakeStore::default());
    let channel = Arc::new(FakeChannel::default());
    let orch = SendOrchestrator::new(
        ScriptedTransport::new(outcomes),
        StoreHandle(store.clone()),
        ChannelHandle(channel.clone()),
    );
    (orch, store, channel)
}

fn accepted(job_id: &str) -> SubmissionOutcome {
    SubmissionOutcome::Accepted {
        job_id: job_id.to_string(),
    }
}

fn unreachable_abort() -> SubmissionOutcome {
    SubmissionOutcome::Unreachable {
        reason: "operation timed out".to_string(),
        elapsed: Duration::from_secs(125),
        aborted: true,
    }
}

// ============================================================================
// Happy path (scenario A)
// ============================================================================

#[tokio::test]
async fn test_accepted_job_tracked_to_completion() {
    let (orch, store, channel) = orchestrator(vec![accepted("J1")]);
    store.put(job("J1", JobStatus::Pending));
    let feed = store.register_watch("J1");
    let _stream = channel.register_stream("J1");

    let tracked = orch.send_message("C1", "Hello", None).await.unwrap();
    assert_eq!(tracked.as_deref(), Some("J1"));
    assert!(orch.snapshot().is_processing());
    assert_eq!(orch.snapshot().job_id.as_deref(), Some("J1"));

    feed.send(job("J1", JobStatus::Processing)).await.unwrap();
    feed.send(completed_job("J1", "M1")).await.unwrap();

    let mut updates = orch.subscribe();
    let snap = updates.wait_for(|s| s.is_terminal()).await.unwrap().clone();

    assert!(snap.is_complete());
    assert_eq!(
        snap.result.as_ref().unwrap().message_id.as_deref(),
        Some("M1")
    );
    assert!(snap.error.is_none());
    assert!(snap.streaming_text.is_empty());
}

#[tokio::test]
async fn test_sync_result_completes_without_tracking() {
    let (orch, _store, _channel) = orchestrator(vec![SubmissionOutcome::SyncResult]);

    let tracked = orch.send_message("C1", "Hello", None).await.unwrap();
    assert!(tracked.is_none());

    let snap = orch.snapshot();
    assert!(snap.is_complete());
    assert!(snap.job_id.is_none());
}

// ============================================================================
// Definitive failures (no recovery)
// ============================================================================

#[tokio::test]
async fn test_rejection_surfaces_verbatim_without_recovery() {
    let (orch, store, _channel) = orchestrator(vec![SubmissionOutcome::Rejected {
        message: "content too long".to_string(),
    }]);

    let tracked = orch.send_message("C1", "Hello", None).await.unwrap();
    assert!(tracked.is_none());

    let snap = orch.snapshot();
    assert_eq!(snap.phase, SendPhase::Failed);
    assert_eq!(snap.error.as_deref(), Some("content too long"));
    assert_eq!(store.recovery_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_fast_unmatched_failure_skips_recovery() {
    let (orch, store, _channel) = orchestrator(vec![SubmissionOutcome::Unreachable {
        reason: "invalid request body".to_string(),
        elapsed: Duration::from_secs(3),
        aborted: false,
    }]);

    orch.send_message("C1", "Hello", None).await.unwrap();

    let snap = orch.snapshot();
    assert_eq!(snap.phase, SendPhase::Failed);
    assert_eq!(snap.error.as_deref(), Some("invalid request body"));
    assert_eq!(store.recovery_calls.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Recovery (scenarios B and C)
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_recovery_finds_job_and_tracks_it() {
    let (orch, store, channel) = orchestrator(vec![unreachable_abort()]);
    store.script_recovery(vec![None, Some(job("J2", JobStatus::Processing))]);
    store.put(job("J2", JobStatus::Processing));
    let feed = store.register_watch("J2");
    let _stream = channel.register_stream("J2");

    let mut updates = orch.subscribe();
    let tracked = orch.send_message("C1", "Analyze AAPL", None).await.unwrap();
    assert_eq!(tracked.as_deref(), Some("J2"));
    assert_eq!(store.recovery_calls.load(Ordering::SeqCst), 2);
    assert!(orch.snapshot().is_processing());

    feed.send(completed_job("J2", "M2")).await.unwrap();
    let snap = updates.wait_for(|s| s.is_terminal()).await.unwrap().clone();
    assert!(snap.is_complete());
    assert!(snap.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_recovering_phase_visible_during_recovery() {
    let (orch, store, _channel) = orchestrator(vec![unreachable_abort()]);
    store.script_recovery(vec![None, None, None, None, None]);

    let mut updates = orch.subscribe();
    let observer = tokio::spawn(async move {
        updates
            .wait_for(|s| s.is_recovering())
            .await
            .expect("recovering phase never observed");
    });

    orch.send_message("C1", "Analyze AAPL", None).await.unwrap();
    observer.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_recovery_exhaustion_surfaces_fixed_message() {
    let (orch, store, _channel) = orchestrator(vec![unreachable_abort()]);
    store.script_recovery(vec![None, None, None, None, None]);

    let tracked = orch.send_message("C1", "Analyze AAPL", None).await.unwrap();
    assert!(tracked.is_none());
    assert_eq!(store.recovery_calls.load(Ordering::SeqCst), 5);

    let snap = orch.snapshot();
    assert_eq!(snap.phase, SendPhase::Failed);
    assert_eq!(snap.error.as_deref(), Some(TIMEOUT_MESSAGE));
    assert!(!snap.is_sending());
    assert!(!snap.is_recovering());
}

// ============================================================================
// Generation failure (scenario D)
// ============================================================================

#[tokio::test]
async fn test_failed_job_surfaces_error_message() {
    let (orch, store, channel) = orchestrator(vec![accepted("J1")]);
    store.put(job("J1", JobStatus::Processing));
    let feed = store.register_watch("J1");
    let _stream = channel.register_stream("J1");

    orch.send_message("C1", "Hello", None).await.unwrap();
    feed.send(failed_job("J1", "rate limited")).await.unwrap();

    let mut updates = orch.subscribe();
    let snap = updates.wait_for(|s| s.is_terminal()).await.unwrap().clone();

    assert_eq!(snap.phase, SendPhase::Failed);
    assert!(snap.is_terminal());
    assert_eq!(snap.error.as_deref(), Some("rate limited"));
}

// ============================================================================
// Streaming hints
// ============================================================================

#[tokio::test]
async fn test_chunks_accumulate_in_order_and_tools_tracked() {
    let (orch, store, channel) = orchestrator(vec![accepted("J1")]);
    store.put(job("J1", JobStatus::Processing));
    let _feed = store.register_watch("J1");
    let stream = channel.register_stream("J1");

    orch.send_message("C1", "Analyze AAPL", None).await.unwrap();

    stream
        .send(StreamEvent::ToolStarted {
            tools: vec!["quote_lookup".to_string()],
        })
        .await
        .unwrap();
    stream
        .send(StreamEvent::TextChunk {
            text: "AAPL is ".to_string(),
        })
        .await
        .unwrap();
    stream
        .send(StreamEvent::TextChunk {
            text: "up 2%.".to_string(),
        })
        .await
        .unwrap();

    let mut updates = orch.subscribe();
    let snap = updates
        .wait_for(|s| s.streaming_text == "AAPL is up 2%.")
        .await
        .unwrap()
        .clone();
    assert_eq!(snap.active_tools, vec!["quote_lookup".to_string()]);
    assert!(snap.is_processing());

    stream.send(StreamEvent::ToolFinished).await.unwrap();
    let snap = updates
        .wait_for(|s| s.active_tools.is_empty())
        .await
        .unwrap()
        .clone();
    assert_eq!(snap.streaming_text, "AAPL is up 2%.");
}

#[tokio::test]
async fn test_stream_done_alone_does_not_complete() {
    let (orch, store, channel) = orchestrator(vec![accepted("J1")]);
    store.put(job("J1", JobStatus::Processing));
    let _feed = store.register_watch("J1");
    let stream = channel.register_stream("J1");

    orch.send_message("C1", "Hello", None).await.unwrap();
    // One fetch so far: the watcher's initial read.
    store.wait_for_fetches(1).await;

    stream.send(StreamEvent::Done).await.unwrap();
    // Done triggers an authoritative re-fetch; the record is still
    // processing, so the lifecycle must keep waiting.
    store.wait_for_fetches(2).await;

    let snap = orch.snapshot();
    assert!(snap.is_processing());
    assert!(!snap.is_complete());
}

#[tokio::test]
async fn test_stream_done_confirmed_by_refetch_completes() {
    let (orch, store, channel) = orchestrator(vec![accepted("J1")]);
    store.put(job("J1", JobStatus::Processing));
    let _feed = store.register_watch("J1");
    let stream = channel.register_stream("J1");

    orch.send_message("C1", "Hello", None).await.unwrap();
    store.wait_for_fetches(1).await;

    // The job record turned terminal before any change-feed delivery.
    store.put(completed_job("J1", "M1"));
    stream.send(StreamEvent::Done).await.unwrap();

    let mut updates = orch.subscribe();
    let snap = updates.wait_for(|s| s.is_terminal()).await.unwrap().clone();
    assert!(snap.is_complete());
    assert_eq!(
        snap.result.as_ref().unwrap().message_id.as_deref(),
        Some("M1")
    );
}

#[tokio::test]
async fn test_stream_error_signal_is_not_authoritative() {
    let (orch, store, channel) = orchestrator(vec![accepted("J1")]);
    store.put(job("J1", JobStatus::Processing));
    let feed = store.register_watch("J1");
    let stream = channel.register_stream("J1");

    orch.send_message("C1", "Hello", None).await.unwrap();
    store.wait_for_fetches(1).await;

    stream
        .send(StreamEvent::ErrorSignal {
            message: "model overloaded".to_string(),
        })
        .await
        .unwrap();
    store.wait_for_fetches(2).await;

    // Hint alone changes nothing.
    let snap = orch.snapshot();
    assert!(snap.is_processing());
    assert!(snap.error.is_none());

    // The authoritative record says it actually completed.
    feed.send(completed_job("J1", "M1")).await.unwrap();
    let mut updates = orch.subscribe();
    let snap = updates.wait_for(|s| s.is_terminal()).await.unwrap().clone();
    assert!(snap.is_complete());
    assert!(snap.error.is_none());
}

#[tokio::test]
async fn test_missing_stream_channel_is_not_fatal() {
    // No stream registered: subscribe fails, lifecycle proceeds on the
    // change-feed alone.
    let (orch, store, _channel) = orchestrator(vec![accepted("J1")]);
    store.put(job("J1", JobStatus::Processing));
    let feed = store.register_watch("J1");

    orch.send_message("C1", "Hello", None).await.unwrap();
    feed.send(completed_job("J1", "M1")).await.unwrap();

    let mut updates = orch.subscribe();
    let snap = updates.wait_for(|s| s.is_terminal()).await.unwrap().clone();
    assert!(snap.is_complete());
}

// ============================================================================
// Lifecycle discipline
// ============================================================================

#[tokio::test]
async fn test_concurrent_send_rejected_while_active() {
    let (orch, store, channel) = orchestrator(vec![accepted("J1")]);
    store.put(job("J1", JobStatus::Processing));
    let feed = store.register_watch("J1");
    let _stream = channel.register_stream("J1");

    orch.send_message("C1", "first", None).await.unwrap();

    let second = orch.send_message("C1", "second", None).await;
    assert!(matches!(second, Err(SendError::SendInProgress)));
    // The active lifecycle is untouched.
    assert_eq!(orch.snapshot().job_id.as_deref(), Some("J1"));

    feed.send(completed_job("J1", "M1")).await.unwrap();
    let mut updates = orch.subscribe();
    updates.wait_for(|s| s.is_terminal()).await.unwrap();
}

#[tokio::test]
async fn test_new_send_allowed_after_terminal_and_buffer_cleared() {
    let (orch, store, channel) = orchestrator(vec![accepted("J1"), SubmissionOutcome::SyncResult]);
    store.put(job("J1", JobStatus::Processing));
    let feed = store.register_watch("J1");
    let stream = channel.register_stream("J1");

    orch.send_message("C1", "first", None).await.unwrap();
    stream
        .send(StreamEvent::TextChunk {
            text: "partial".to_string(),
        })
        .await
        .unwrap();
    feed.send(completed_job("J1", "M1")).await.unwrap();

    let mut updates = orch.subscribe();
    updates.wait_for(|s| s.is_terminal()).await.unwrap();

    let tracked = orch.send_message("C1", "second", None).await.unwrap();
    assert!(tracked.is_none());

    let snap = orch.snapshot();
    assert!(snap.is_complete());
    assert!(snap.streaming_text.is_empty());
    assert!(snap.result.is_none());
    assert!(snap.job_id.is_none());
}

#[tokio::test]
async fn test_reset_returns_to_idle_and_detaches() {
    let (orch, store, channel) = orchestrator(vec![accepted("J1")]);
    store.put(job("J1", JobStatus::Processing));
    let feed = store.register_watch("J1");
    let stream = channel.register_stream("J1");

    orch.send_message("C1", "Hello", None).await.unwrap();
    stream
        .send(StreamEvent::TextChunk {
            text: "partial".to_string(),
        })
        .await
        .unwrap();

    orch.reset();

    let snap = orch.snapshot();
    assert_eq!(snap.phase, SendPhase::Idle);
    assert!(snap.streaming_text.is_empty());
    assert!(snap.job_id.is_none());

    // Late snapshots from the detached lifecycle change nothing.
    let _ = feed.send(completed_job("J1", "M1")).await;
    tokio::task::yield_now().await;
    assert_eq!(orch.snapshot().phase, SendPhase::Idle);
}

#[tokio::test]
async fn test_reset_during_refetch_does_not_clobber_idle_state() {
    let (orch, store, channel) = orchestrator(vec![accepted("J1")]);
    store.put(job("J1", JobStatus::Processing));
    let _feed = store.register_watch("J1");
    let stream = channel.register_stream("J1");

    orch.send_message("C1", "Hello", None).await.unwrap();
    store.wait_for_fetches(1).await;

    // Park the driver inside the authoritative re-fetch triggered by Done,
    // with the record already terminal.
    let gate = store.gate_fetches();
    store.put(completed_job("J1", "M1"));
    stream.send(StreamEvent::Done).await.unwrap();
    store.wait_for_fetches(2).await;

    // Detach while that re-fetch is in flight, then let it return.
    orch.reset();
    gate.notify_one();
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    // The detached lifecycle's terminal snapshot must not overwrite the
    // reclaimed state.
    let snap = orch.snapshot();
    assert_eq!(snap.phase, SendPhase::Idle);
    assert!(snap.result.is_none());
    assert!(snap.job_id.is_none());
}
