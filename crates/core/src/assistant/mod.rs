pub mod client;
pub mod runner;
pub mod session;
pub mod types;

pub use client::{AssistantApi, HttpAssistantClient};
pub use runner::{RunDriver, RunEvent, RunEventKind, RunOutcome};
pub use session::{ConversationSession, ASSISTANT_NAME, DEFAULT_INSTRUCTIONS};
pub use types::{Message, MessageRole, Run, RunStatus, ToolCall, ToolOutput};
