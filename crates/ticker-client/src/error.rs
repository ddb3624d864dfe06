// ABOUTME: Error types for ticker-client operations.
// ABOUTME: Transport, store, stream, credential, and orchestrator errors.

use thiserror::Error;

/// Errors from the submission transport.
///
/// Failures of a submission attempt itself are not errors at this level;
/// they are classified into `SubmissionOutcome` so the orchestrator can
/// decide between surfacing and recovery.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}

/// Errors from the job record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A point read or recency query failed at the HTTP level.
    #[error("store request failed: {0}")]
    Request(String),

    /// The server returned a row the client could not decode.
    #[error("invalid job row: {0}")]
    InvalidRow(String),

    /// The change-feed subscription could not be established.
    /// Not user-fatal; consumers degrade to periodic re-fetch.
    #[error("change-feed subscription unavailable: {0}")]
    SubscriptionUnavailable(String),
}

/// Errors from the ephemeral stream channel.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The broadcast subscription could not be established.
    /// Not user-fatal; the job watcher remains authoritative.
    #[error("stream subscription failed: {0}")]
    Subscribe(String),
}

/// Errors from credential lookup.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential lookup failed: {0}")]
    Lookup(String),
}

/// Errors surfaced by `SendOrchestrator::send_message` itself.
///
/// Protocol-level failures (rejections, timeouts, generation errors) do
/// not land here; they surface through the observable snapshot's `error`
/// field because the lifecycle is long-running by nature.
#[derive(Debug, Error)]
pub enum SendError {
    /// A lifecycle is already active for this orchestrator.
    #[error("a send is already in progress; reset or wait for it to finish")]
    SendInProgress,
}
