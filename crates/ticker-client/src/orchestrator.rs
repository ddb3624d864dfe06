// ABOUTME: Send orchestrator: one state machine per message-send lifecycle.
// ABOUTME: Composes transport, job watcher, stream listener, and recovery.

use crate::error::SendError;
use crate::recovery::{recover_job, RECOVERY_WINDOW};
use crate::store::JobStore;
use crate::stream::StreamChannel;
use crate::transport::{is_timeout_like, SubmissionOutcome, Transport};
use crate::watcher::{spawn_job_watcher, POLL_FALLBACK_INTERVAL};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ticker_types::{Job, JobResult, JobStatus, StreamEvent, ToolCall};

/// Fixed user-facing message when recovery exhausts without finding a job.
/// Distinct from server-surfaced errors by design.
pub const TIMEOUT_MESSAGE: &str = "Request timed out. Please try again.";

/// Where one send lifecycle currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendPhase {
    #[default]
    Idle,
    Sending,
    Recovering,
    Processing,
    Completed,
    Failed,
}

impl SendPhase {
    /// A lifecycle is in flight; `send_message` would be rejected.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SendPhase::Sending | SendPhase::Recovering | SendPhase::Processing
        )
    }

    /// Completed or Failed; the lifecycle is over.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SendPhase::Completed | SendPhase::Failed)
    }
}

/// Observable state of the orchestrator, published on every change.
///
/// `streaming_text` and `active_tools` are advisory hints from the
/// ephemeral channel; `tool_calls` and `result` come only from job record
/// snapshots, which are authoritative. The two views are never merged.
#[derive(Debug, Clone, Default)]
pub struct SendSnapshot {
    pub phase: SendPhase,
    pub job_id: Option<String>,
    pub streaming_text: String,
    pub active_tools: Vec<String>,
    pub tool_calls: Vec<ToolCall>,
    pub result: Option<JobResult>,
    pub error: Option<String>,
}

impl SendSnapshot {
    pub fn is_sending(&self) -> bool {
        self.phase == SendPhase::Sending
    }

    pub fn is_recovering(&self) -> bool {
        self.phase == SendPhase::Recovering
    }

    pub fn is_processing(&self) -> bool {
        self.phase == SendPhase::Processing
    }

    pub fn is_complete(&self) -> bool {
        self.phase == SendPhase::Completed
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

struct Lifecycle {
    cancel: CancellationToken,
}

/// Orchestrates one "send message" lifecycle at a time.
///
/// Collaborators are injected so the same machine serves every chat
/// surface: a transport for submission, a job store for authoritative
/// state, and a stream channel for partial-output hints.
pub struct SendOrchestrator<T, S, C> {
    transport: Arc<T>,
    store: Arc<S>,
    channel: Arc<C>,
    state: watch::Sender<SendSnapshot>,
    lifecycle: Mutex<Option<Lifecycle>>,
}

impl<T, S, C> SendOrchestrator<T, S, C>
where
    T: Transport,
    S: JobStore,
    C: StreamChannel,
{
    pub fn new(transport: T, store: S, channel: C) -> Self {
        let (state, _) = watch::channel(SendSnapshot::default());
        Self {
            transport: Arc::new(transport),
            store: Arc::new(store),
            channel: Arc::new(channel),
            state,
            lifecycle: Mutex::new(None),
        }
    }

    /// Current observable state.
    pub fn snapshot(&self) -> SendSnapshot {
        self.state.borrow().clone()
    }

    /// Subscribe to observable state changes.
    pub fn subscribe(&self) -> watch::Receiver<SendSnapshot> {
        self.state.subscribe()
    }

    /// Submit one chat message and track it to completion.
    ///
    /// Resolves with the tracked job id once the lifecycle is wired, or
    /// `None` on the synchronous and immediately-failed paths. Protocol
    /// failures surface through the observable `error` field rather than
    /// this return value; only misuse (a lifecycle already active) is an
    /// `Err`.
    pub async fn send_message(
        &self,
        chat_id: &str,
        content: &str,
        model_hint: Option<&str>,
    ) -> Result<Option<String>, SendError> {
        let cancel = {
            let mut lifecycle = self.lifecycle.lock().unwrap();
            if self.state.borrow().phase.is_active() {
                return Err(SendError::SendInProgress);
            }
            if let Some(prev) = lifecycle.take() {
                prev.cancel.cancel();
            }

            let cancel = CancellationToken::new();
            *lifecycle = Some(Lifecycle {
                cancel: cancel.clone(),
            });
            // Fresh lifecycle: clears the prior streaming buffer and result.
            self.state.send_replace(SendSnapshot {
                phase: SendPhase::Sending,
                ..SendSnapshot::default()
            });
            cancel
        };

        info!(chat_id = %chat_id, "Submitting message");
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            outcome = self.transport.submit(chat_id, content, model_hint) => outcome,
        };

        match outcome {
            SubmissionOutcome::Accepted { job_id } => {
                self.attach(job_id.clone(), cancel).await;
                Ok(Some(job_id))
            }
            SubmissionOutcome::SyncResult => {
                debug!(chat_id = %chat_id, "Synchronous result, no job tracking needed");
                self.state.send_modify(|s| s.phase = SendPhase::Completed);
                Ok(None)
            }
            SubmissionOutcome::Rejected { message } => {
                // Definitive server answer; no recovery.
                self.fail(message);
                Ok(None)
            }
            SubmissionOutcome::Unreachable {
                reason,
                elapsed,
                aborted,
            } => {
                if !is_timeout_like(&reason, elapsed, aborted) {
                    self.fail(reason);
                    return Ok(None);
                }

                info!(
                    chat_id = %chat_id,
                    reason = %reason,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Submission lost, attempting job recovery"
                );
                self.state.send_modify(|s| s.phase = SendPhase::Recovering);

                let recovered = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(None),
                    found = recover_job(self.store.as_ref(), chat_id, RECOVERY_WINDOW) => found,
                };

                match recovered {
                    Some(job_id) => {
                        self.attach(job_id.clone(), cancel).await;
                        Ok(Some(job_id))
                    }
                    None => {
                        self.fail(TIMEOUT_MESSAGE.to_string());
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Detach watchers and listeners and return to `Idle`.
    ///
    /// Client-side only: the server job, once created, runs to completion
    /// regardless.
    pub fn reset(&self) {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        if let Some(prev) = lifecycle.take() {
            prev.cancel.cancel();
        }
        self.state.send_replace(SendSnapshot::default());
    }

    /// Wire the job watcher and stream listener and hand off to the driver.
    async fn attach(&self, job_id: String, cancel: CancellationToken) {
        info!(job_id = %job_id, "Tracking job");
        self.state.send_modify(|s| {
            s.phase = SendPhase::Processing;
            s.job_id = Some(job_id.clone());
        });

        let job_rx = spawn_job_watcher(self.store.clone(), job_id.clone(), cancel.child_token());

        let stream_rx = match self.channel.subscribe(&job_id).await {
            Ok(rx) => Some(rx),
            Err(e) => {
                // A missing stream only costs partial-output hints; the
                // watcher still delivers the terminal state.
                warn!(job_id = %job_id, error = %e, "Stream channel unavailable");
                None
            }
        };

        let driver = Driver {
            state: self.state.clone(),
            store: self.store.clone(),
            job_id,
            job_rx,
            stream_rx,
            cancel,
        };
        tokio::spawn(driver.run());
    }

    fn fail(&self, message: String) {
        debug!(error = %message, "Send lifecycle failed");
        self.state.send_modify(|s| {
            s.phase = SendPhase::Failed;
            s.error = Some(message.clone());
            s.streaming_text.clear();
            s.active_tools.clear();
        });
    }
}

/// Event loop merging job snapshots and stream hints into one state.
struct Driver<S> {
    state: watch::Sender<SendSnapshot>,
    store: Arc<S>,
    job_id: String,
    job_rx: mpsc::Receiver<Job>,
    stream_rx: Option<mpsc::Receiver<StreamEvent>>,
    cancel: CancellationToken,
}

impl<S: JobStore> Driver<S> {
    async fn run(mut self) {
        self.drive().await;
        // Lifecycle over: stop the watcher and stream forwarder tasks.
        self.cancel.cancel();
    }

    async fn drive(&mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                snapshot = self.job_rx.recv() => match snapshot {
                    Some(job) => {
                        if self.apply_job(job) {
                            return;
                        }
                    }
                    None => {
                        warn!(job_id = %self.job_id, "Job watcher ended early, re-fetching directly");
                        self.refetch_until_terminal().await;
                        return;
                    }
                },
                event = next_stream_event(&mut self.stream_rx) => match event {
                    Some(event) => {
                        if self.apply_stream_event(event).await {
                            return;
                        }
                    }
                    None => {
                        debug!(job_id = %self.job_id, "Stream channel closed");
                        self.stream_rx = None;
                    }
                },
            }
        }
    }

    /// Apply an authoritative job snapshot. Returns true once terminal.
    fn apply_job(&self, job: Job) -> bool {
        let terminal = job.status.is_terminal();
        self.state.send_if_modified(|s| {
            // Late duplicates after a terminal snapshot carry no news, and
            // a detached lifecycle must not touch state `reset` has already
            // reclaimed. The check runs inside the closure so it is
            // serialized with `reset`'s own write.
            if s.phase.is_terminal() || self.cancel.is_cancelled() {
                return false;
            }

            // The ledger is replaced wholesale; each snapshot carries the
            // full array.
            s.tool_calls = job.tool_calls.clone();

            match job.status {
                JobStatus::Completed => {
                    s.phase = SendPhase::Completed;
                    s.result = job.result.clone();
                    s.streaming_text.clear();
                    s.active_tools.clear();
                }
                JobStatus::Failed => {
                    s.phase = SendPhase::Failed;
                    s.error = Some(
                        job.error_message
                            .clone()
                            .unwrap_or_else(|| "generation failed".to_string()),
                    );
                    s.streaming_text.clear();
                    s.active_tools.clear();
                }
                JobStatus::Pending | JobStatus::Processing => {}
            }
            true
        });

        if terminal {
            info!(job_id = %self.job_id, status = ?job.status, "Job reached terminal status");
        }
        terminal
    }

    /// Apply an ephemeral stream event. Returns true once terminal.
    async fn apply_stream_event(&self, event: StreamEvent) -> bool {
        match event {
            StreamEvent::ToolStarted { tools } => {
                debug!(job_id = %self.job_id, tools = ?tools, "Tools started");
                self.state.send_modify(|s| s.active_tools = tools);
                false
            }
            StreamEvent::ToolFinished => {
                self.state.send_modify(|s| s.active_tools.clear());
                false
            }
            StreamEvent::TextChunk { text } => {
                self.state.send_modify(|s| s.streaming_text.push_str(&text));
                false
            }
            StreamEvent::Done => self.confirm_against_store("done").await,
            StreamEvent::ErrorSignal { message } => {
                debug!(job_id = %self.job_id, message = %message, "Stream reported failure");
                self.confirm_against_store("error").await
            }
        }
    }

    /// A stream hint is never authoritative: re-fetch the job record and
    /// only finish if its status is actually terminal.
    async fn confirm_against_store(&self, hint: &str) -> bool {
        match self.store.fetch(&self.job_id).await {
            Ok(Some(job)) if job.status.is_terminal() => self.apply_job(job),
            Ok(_) => {
                debug!(job_id = %self.job_id, hint = hint, "Job not terminal yet, waiting for watcher");
                false
            }
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "Re-fetch after stream hint failed");
                false
            }
        }
    }

    /// Last-resort authority path if the watcher dies before terminal.
    async fn refetch_until_terminal(&self) {
        let mut ticker = tokio::time::interval(POLL_FALLBACK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            match self.store.fetch(&self.job_id).await {
                Ok(Some(job)) => {
                    if self.apply_job(job) {
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(job_id = %self.job_id, error = %e, "Direct re-fetch failed");
                }
            }
        }
    }
}

async fn next_stream_event(
    rx: &mut Option<mpsc::Receiver<StreamEvent>>,
) -> Option<StreamEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
