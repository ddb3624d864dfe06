// ABOUTME: Async job-correlation client for the ticker research dashboard.
// ABOUTME: Send, track, and recover long-running AI generation requests.

//! # ticker-client
//!
//! Client protocol for submitting a chat message whose AI generation may
//! outlive the originating HTTP connection, then tracking it to an
//! authoritative terminal state.
//!
//! Two event sources feed one lifecycle:
//!
//! - the **job record change-feed** (durable, authoritative) delivers job
//!   row snapshots until the status turns `completed` or `failed`;
//! - the **stream channel** (ephemeral, at-most-once) delivers partial
//!   text and tool-call hints for responsive UI.
//!
//! A terminal state is only ever declared from a job snapshot. If the
//! submission response itself is lost to a timeout, a bounded recovery
//! poll looks for the job the server may have created anyway.
//!
//! ```ignore
//! use std::sync::Arc;
//! use ticker_client::{
//!     HttpJobStore, HttpTransport, SendOrchestrator, SseStreamChannel, StaticToken,
//! };
//!
//! let creds: Arc<dyn ticker_client::CredentialProvider> =
//!     Arc::new(StaticToken::new("tk-..."));
//! let orchestrator = SendOrchestrator::new(
//!     HttpTransport::new("https://api.example.com", creds.clone())?,
//!     HttpJobStore::new("https://api.example.com", creds.clone())?,
//!     SseStreamChannel::new("https://api.example.com", creds)?,
//! );
//!
//! let job_id = orchestrator.send_message("chat-1", "Analyze AAPL", None).await?;
//! let mut updates = orchestrator.subscribe();
//! ```

mod credentials;
mod error;
mod orchestrator;
mod recovery;
mod sse;
mod store;
mod stream;
mod transport;
mod watcher;

pub use credentials::{CredentialProvider, EnvToken, StaticToken};
pub use error::{CredentialError, SendError, StoreError, StreamError, TransportError};
pub use orchestrator::{SendOrchestrator, SendPhase, SendSnapshot, TIMEOUT_MESSAGE};
pub use recovery::{recover_job, RECOVERY_ATTEMPTS, RECOVERY_STEP, RECOVERY_WINDOW};
pub use store::{HttpJobStore, JobStore};
pub use stream::{SseStreamChannel, StreamChannel};
pub use transport::{
    is_timeout_like, HttpTransport, SubmissionOutcome, Transport, SLOW_FAILURE_THRESHOLD,
    SUBMIT_TIMEOUT,
};
pub use watcher::{spawn_job_watcher, POLL_FALLBACK_INTERVAL};
