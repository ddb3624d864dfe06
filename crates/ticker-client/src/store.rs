// ABOUTME: Job record store: point reads, recency queries, and change-feed watch.
// ABOUTME: Trait seam plus the HTTP/SSE implementation against the backend.

use crate::credentials::CredentialProvider;
use crate::error::StoreError;
use crate::sse;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use ticker_types::Job;

/// Buffer size for change-feed snapshot channels.
const WATCH_CHANNEL_BUFFER: usize = 16;

/// Read access to job records plus row-level change notifications.
///
/// The watch half may legitimately be unavailable; consumers fall back to
/// periodic re-fetch (see `spawn_job_watcher`) rather than failing the
/// lifecycle.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Point read of one job record.
    async fn fetch(&self, job_id: &str) -> Result<Option<Job>, StoreError>;

    /// The most recently created job for a chat, if one was created within
    /// `window` of now. Newest-first, limit one.
    async fn latest_for_chat(
        &self,
        chat_id: &str,
        window: Duration,
    ) -> Result<Option<Job>, StoreError>;

    /// Subscribe to update notifications for one job record.
    ///
    /// Each received `Job` is a full row snapshot, not a diff.
    async fn watch(&self, job_id: &str) -> Result<mpsc::Receiver<Job>, StoreError>;
}

/// HTTP-backed job store with an SSE change-feed.
pub struct HttpJobStore {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpJobStore {
    /// Build a store client. The HTTP client carries a connect timeout but
    /// no total deadline, since the change-feed is long-lived.
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| StoreError::Request(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            credentials,
        })
    }

    async fn token(&self) -> Result<String, StoreError> {
        self.credentials
            .bearer_token()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))
    }
}

#[async_trait]
impl JobStore for HttpJobStore {
    async fn fetch(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let token = self.token().await?;
        let url = format!("{}/jobs/{}", self.base_url, job_id);

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(StoreError::Request(format!(
                "job read returned {}",
                response.status()
            )));
        }

        let job = response
            .json::<Job>()
            .await
            .map_err(|e| StoreError::InvalidRow(e.to_string()))?;
        Ok(Some(job))
    }

    async fn latest_for_chat(
        &self,
        chat_id: &str,
        window: Duration,
    ) -> Result<Option<Job>, StoreError> {
        let token = self.token().await?;
        let url = format!(
            "{}/chats/{}/jobs?within_ms={}&limit=1",
            self.base_url,
            chat_id,
            window.as_millis()
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::Request(format!(
                "job query returned {}",
                response.status()
            )));
        }

        let mut jobs = response
            .json::<Vec<Job>>()
            .await
            .map_err(|e| StoreError::InvalidRow(e.to_string()))?;

        if jobs.is_empty() {
            Ok(None)
        } else {
            Ok(Some(jobs.remove(0)))
        }
    }

    async fn watch(&self, job_id: &str) -> Result<mpsc::Receiver<Job>, StoreError> {
        let token = self.token().await?;
        let url = format!("{}/jobs/{}/watch", self.base_url, job_id);

        let stream = sse::connect(&self.http, &url, &token)
            .await
            .map_err(StoreError::SubscriptionUnavailable)?;

        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_BUFFER);
        let job_id = job_id.to_string();

        tokio::spawn(async move {
            futures::pin_mut!(stream);
            while let Some(item) = stream.next().await {
                let event = match item {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "Change-feed stream error");
                        break;
                    }
                };

                match serde_json::from_str::<Job>(&event.data) {
                    Ok(job) => {
                        if tx.send(job).await.is_err() {
                            debug!(job_id = %job_id, "Change-feed consumer dropped");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "Skipping undecodable change-feed row");
                    }
                }
            }
            debug!(job_id = %job_id, "Change-feed subscription closed");
        });

        Ok(rx)
    }
}
