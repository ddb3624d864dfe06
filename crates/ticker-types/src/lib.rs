// ABOUTME: Shared domain types for the ticker research dashboard client.
// ABOUTME: Chats, messages, job records, and broadcast stream events.

mod chat;
mod job;
mod stream;

pub use chat::{Attachment, Conversation, Message, Role};
pub use job::{Job, JobResult, JobStatus, ToolCall};
pub use stream::StreamEvent;
