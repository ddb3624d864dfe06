// ABOUTME: Submission transport for chat messages with bounded client timeout.
// ABOUTME: Classifies every failure into a definitive or ambiguous outcome.

use crate::credentials::CredentialProvider;
use crate::error::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Client-side abort deadline for one submission request.
pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(120);

/// An `Unreachable` slower than this is treated as circumstantial evidence
/// that server-side processing started even though no answer arrived.
pub const SLOW_FAILURE_THRESHOLD: Duration = Duration::from_secs(10);

/// Error-text fragments that mark a transport failure as timeout-like.
const TIMEOUT_SIGNATURES: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "gateway",
    "502",
    "503",
    "504",
    "connection reset",
    "connection closed",
    "broken pipe",
];

/// The classified result of one submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Server accepted the request and started a tracked job (202).
    Accepted { job_id: String },
    /// Server answered synchronously; the message is already persisted (200).
    SyncResult,
    /// Definitive server-side rejection; never retried or recovered.
    Rejected { message: String },
    /// No definitive answer arrived: abort, network failure, or gateway
    /// error. The server may or may not have created a job.
    Unreachable {
        reason: String,
        elapsed: Duration,
        aborted: bool,
    },
}

/// Whether an `Unreachable` failure should be treated as timeout-like and
/// trigger job recovery, rather than surfacing immediately.
pub fn is_timeout_like(reason: &str, elapsed: Duration, aborted: bool) -> bool {
    if aborted || elapsed > SLOW_FAILURE_THRESHOLD {
        return true;
    }
    let lowered = reason.to_lowercase();
    TIMEOUT_SIGNATURES.iter().any(|sig| lowered.contains(sig))
}

/// Issues the initial submission request for one chat message.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn submit(
        &self,
        chat_id: &str,
        content: &str,
        model_hint: Option<&str>,
    ) -> SubmissionOutcome;
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Deserialize)]
struct AcceptedBody {
    job_id: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// HTTP transport against the dashboard backend.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpTransport {
    /// Build a transport with the standard 120s client-side deadline.
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(SUBMIT_TIMEOUT)
            .build()
            .map_err(|e| TransportError::ClientBuild(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            credentials,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn submit(
        &self,
        chat_id: &str,
        content: &str,
        model_hint: Option<&str>,
    ) -> SubmissionOutcome {
        let started = Instant::now();

        // A failed token lookup is definitive: no request went out, so no
        // job can exist and recovery would be pointless.
        let token = match self.credentials.bearer_token().await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "Credential lookup failed before submission");
                return SubmissionOutcome::Rejected {
                    message: e.to_string(),
                };
            }
        };

        let url = format!("{}/chats/{}/messages", self.base_url, chat_id);
        let body = SubmitBody {
            content,
            model: model_hint,
        };

        let response = match self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                let elapsed = started.elapsed();
                warn!(
                    error = %e,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Submission request failed before a definitive answer"
                );
                return SubmissionOutcome::Unreachable {
                    reason: e.to_string(),
                    elapsed,
                    aborted: e.is_timeout(),
                };
            }
        };

        let status = response.status();
        match status.as_u16() {
            202 => match response.json::<AcceptedBody>().await {
                Ok(accepted) => {
                    debug!(job_id = %accepted.job_id, "Submission accepted");
                    SubmissionOutcome::Accepted {
                        job_id: accepted.job_id,
                    }
                }
                Err(e) => SubmissionOutcome::Rejected {
                    message: format!("malformed 202 body: {}", e),
                },
            },
            200 => {
                debug!("Submission answered synchronously");
                SubmissionOutcome::SyncResult
            }
            _ => {
                let text = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ErrorBody>(&text)
                    .map(|b| b.error)
                    .unwrap_or_else(|_| {
                        if text.is_empty() {
                            format!("server returned {}", status)
                        } else {
                            text
                        }
                    });
                debug!(status = %status, message = %message, "Submission rejected");
                SubmissionOutcome::Rejected { message }
            }
        }
    }
}
