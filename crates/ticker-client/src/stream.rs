// ABOUTME: Ephemeral per-job broadcast channel carrying partial output hints.
// ABOUTME: Trait seam plus the SSE implementation; at-most-once, no replay.

use crate::credentials::CredentialProvider;
use crate::error::StreamError;
use crate::sse;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use ticker_types::StreamEvent;

/// Buffer size for stream event channels.
const STREAM_CHANNEL_BUFFER: usize = 64;

/// Subscription to a job's ephemeral broadcast channel.
///
/// Events published before the subscriber attaches are lost; that is
/// acceptable because the job store delivers the authoritative terminal
/// state regardless of stream loss.
#[async_trait]
pub trait StreamChannel: Send + Sync + 'static {
    async fn subscribe(&self, job_id: &str) -> Result<mpsc::Receiver<StreamEvent>, StreamError>;
}

/// SSE-backed stream channel, named deterministically from the job id.
pub struct SseStreamChannel {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl SseStreamChannel {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, StreamError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| StreamError::Subscribe(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            credentials,
        })
    }
}

#[async_trait]
impl StreamChannel for SseStreamChannel {
    async fn subscribe(&self, job_id: &str) -> Result<mpsc::Receiver<StreamEvent>, StreamError> {
        let token = self
            .credentials
            .bearer_token()
            .await
            .map_err(|e| StreamError::Subscribe(e.to_string()))?;
        let url = format!("{}/jobs/{}/stream", self.base_url, job_id);

        let stream = sse::connect(&self.http, &url, &token)
            .await
            .map_err(StreamError::Subscribe)?;

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_BUFFER);
        let job_id = job_id.to_string();

        tokio::spawn(async move {
            futures::pin_mut!(stream);
            while let Some(item) = stream.next().await {
                let event = match item {
                    Ok(event) => event,
                    Err(e) => {
                        // The channel is advisory; a broken stream is not a
                        // lifecycle failure.
                        warn!(job_id = %job_id, error = %e, "Stream channel error");
                        break;
                    }
                };

                match StreamEvent::from_sse(&event.event, &event.data) {
                    Ok(Some(parsed)) => {
                        if tx.send(parsed).await.is_err() {
                            debug!(job_id = %job_id, "Stream consumer dropped");
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!(job_id = %job_id, event = %event.event, "Skipping unknown stream event");
                    }
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "Skipping undecodable stream payload");
                    }
                }
            }
            debug!(job_id = %job_id, "Stream subscription closed");
        });

        Ok(rx)
    }
}
