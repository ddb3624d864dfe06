// ABOUTME: Ephemeral broadcast events carrying partial generation output.
// ABOUTME: Parsed from named SSE events on a per-job stream channel.

use serde::Deserialize;

/// An event on a job's ephemeral stream channel.
///
/// These are low-latency hints only: delivery is at-most-once with no
/// replay, and `Done`/`ErrorSignal` must never be treated as authoritative
/// for job completion. Only the job record's status is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// One or more tools began running.
    ToolStarted { tools: Vec<String> },
    /// The running tools finished; clears the active set.
    ToolFinished,
    /// A chunk of output text, appended in receipt order.
    TextChunk { text: String },
    /// The producer considers output complete (advisory).
    Done,
    /// The producer reports a failure (advisory).
    ErrorSignal { message: String },
}

#[derive(Deserialize)]
struct ToolStartedPayload {
    #[serde(default)]
    tools: Vec<String>,
}

#[derive(Deserialize)]
struct ChunkPayload {
    text: String,
}

#[derive(Deserialize)]
struct ErrorPayload {
    message: String,
}

impl StreamEvent {
    /// Parse a named SSE event into a stream event.
    ///
    /// Returns `Ok(None)` for event names this client does not recognize;
    /// unknown events are skipped rather than treated as errors.
    pub fn from_sse(event: &str, data: &str) -> Result<Option<Self>, serde_json::Error> {
        let parsed = match event {
            "tool_started" => {
                let payload: ToolStartedPayload = serde_json::from_str(data)?;
                Some(StreamEvent::ToolStarted {
                    tools: payload.tools,
                })
            }
            "tool_finished" => Some(StreamEvent::ToolFinished),
            "chunk" => {
                let payload: ChunkPayload = serde_json::from_str(data)?;
                Some(StreamEvent::TextChunk { text: payload.text })
            }
            "done" => Some(StreamEvent::Done),
            "error" => {
                let payload: ErrorPayload = serde_json::from_str(data)?;
                Some(StreamEvent::ErrorSignal {
                    message: payload.message,
                })
            }
            _ => None,
        };

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tool_started() {
        let ev = StreamEvent::from_sse("tool_started", r#"{"tools": ["quote_lookup", "news"]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            ev,
            StreamEvent::ToolStarted {
                tools: vec!["quote_lookup".to_string(), "news".to_string()]
            }
        );
    }

    #[test]
    fn test_parse_tool_finished_ignores_payload() {
        let ev = StreamEvent::from_sse("tool_finished", "{}").unwrap().unwrap();
        assert_eq!(ev, StreamEvent::ToolFinished);
    }

    #[test]
    fn test_parse_chunk() {
        let ev = StreamEvent::from_sse("chunk", r#"{"text": "AAPL is "}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            ev,
            StreamEvent::TextChunk {
                text: "AAPL is ".to_string()
            }
        );
    }

    #[test]
    fn test_parse_done_and_error() {
        assert_eq!(
            StreamEvent::from_sse("done", "{}").unwrap(),
            Some(StreamEvent::Done)
        );
        assert_eq!(
            StreamEvent::from_sse("error", r#"{"message": "model overloaded"}"#).unwrap(),
            Some(StreamEvent::ErrorSignal {
                message: "model overloaded".to_string()
            })
        );
    }

    #[test]
    fn test_unknown_event_skipped() {
        assert_eq!(StreamEvent::from_sse("heartbeat", "{}").unwrap(), None);
    }

    #[test]
    fn test_malformed_payload_is_error() {
        assert!(StreamEvent::from_sse("chunk", "not json").is_err());
    }
}
