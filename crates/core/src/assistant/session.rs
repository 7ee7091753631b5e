//! # Conversation Session
//!
//! One remote assistant definition plus one thread, created together and
//! reused for every turn of a user session. The thread is owned by the
//! remote service; this type only carries the opaque ids.

use crate::catalog::ToolCatalog;
use crate::error::ApiError;

use super::client::AssistantApi;
use super::types::{Message, MessageRole, Run};

/// Display name attached to created assistants.
pub const ASSISTANT_NAME: &str = "Jewel";

/// System instructions attached to created assistants.
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant running within enterprise \
software. Answer to the best of your knowledge, be truthful if you don't know. Concise answers, \
no harmful language or unethical replies.";

/// Per-run steering instructions.
const RUN_INSTRUCTIONS: &str = "Please address the user appropriately.";

#[derive(Debug, Clone)]
pub struct ConversationSession {
    pub assistant_id: String,
    pub thread_id: String,
}

impl ConversationSession {
    /// Create the assistant (with the catalog attached) and its thread.
    pub async fn create(
        api: &dyn AssistantApi,
        catalog: &ToolCatalog,
        instructions: &str,
        model: &str,
    ) -> Result<Self, ApiError> {
        let assistant = api
            .create_assistant(ASSISTANT_NAME, instructions, catalog.to_wire(), model)
            .await?;
        let thread = api.create_thread().await?;

        tracing::info!(
            assistant = %assistant.id,
            thread = %thread.id,
            tools = catalog.len(),
            "conversation session created"
        );

        Ok(Self {
            assistant_id: assistant.id,
            thread_id: thread.id,
        })
    }

    /// Append a user turn to the thread.
    pub async fn post_user_message(
        &self,
        api: &dyn AssistantApi,
        text: &str,
    ) -> Result<Message, ApiError> {
        api.create_message(&self.thread_id, MessageRole::User, text)
            .await
    }

    /// Kick off one processing run over the thread.
    pub async fn start_run(&self, api: &dyn AssistantApi) -> Result<Run, ApiError> {
        api.create_run(&self.thread_id, &self.assistant_id, Some(RUN_INSTRUCTIONS))
            .await
    }

    /// Thread messages, oldest first (the wire returns newest first).
    pub async fn messages(&self, api: &dyn AssistantApi) -> Result<Vec<Message>, ApiError> {
        let mut messages = api.list_messages(&self.thread_id).await?;
        messages.reverse();
        Ok(messages)
    }
}
