// ABOUTME: Shared SSE connection helper for the job change-feed and stream channel.
// ABOUTME: Opens an event-stream GET request and returns the decoded event stream.

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::Stream;

/// Open an SSE subscription at `url` and return the decoded event stream.
///
/// Fails with a human-readable reason if the request cannot be issued or
/// the server answers with a non-success status.
pub(crate) async fn connect(
    http: &reqwest::Client,
    url: &str,
    token: &str,
) -> Result<impl Stream<Item = Result<Event, EventStreamError<reqwest::Error>>>, String> {
    let response = http
        .get(url)
        .bearer_auth(token)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|e| e.to_string())?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("server returned {}", status));
    }

    Ok(response.bytes_stream().eventsource())
}
