//! # Assistants Wire Types
//!
//! The subset of the remote assistants protocol this service consumes:
//! assistants, threads, messages, runs and tool calls.

use serde::{Deserialize, Serialize};

/// Run lifecycle as reported by the remote service.
///
/// `queued → in_progress → {completed, requires_action, failed, cancelled,
/// expired}`; after a tool-output submission a run returns to
/// `queued`/`in_progress`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
    Expired,
    /// Forward compatibility: an unrecognized status keeps the poller
    /// waiting instead of crashing; the deadline bounds it.
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Expired
        )
    }
}

/// A single processing pass over a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_action: Option<RequiredAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<RunError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub submit_tool_outputs: SubmitToolOutputs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitToolOutputs {
    pub tool_calls: Vec<ToolCall>,
}

/// A request to invoke one skill with JSON-encoded arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON text, decoded and validated by the dispatcher.
    pub arguments: String,
}

/// One resolved output, success or structured error, keyed by call id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assistant {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A thread message. Content arrives as a list of typed parts; only text
/// parts are rendered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: Vec<MessageContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<MessageText>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageText {
    pub value: String,
}

impl Message {
    /// Concatenated text parts of this message.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| part.text.as_ref())
            .map(|t| t.value.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// List envelope used by the messages endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageList {
    pub data: Vec<Message>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_terminality() {
        for status in [
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
            RunStatus::Expired,
        ] {
            assert!(status.is_terminal(), "{status:?}");
        }
        for status in [
            RunStatus::Queued,
            RunStatus::InProgress,
            RunStatus::RequiresAction,
            RunStatus::Cancelling,
            RunStatus::Unknown,
        ] {
            assert!(!status.is_terminal(), "{status:?}");
        }
    }

    #[test]
    fn test_run_deserializes_required_action() {
        let raw = r#"{
            "id": "run_1",
            "status": "requires_action",
            "required_action": {
                "type": "submit_tool_outputs",
                "submit_tool_outputs": {
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "get_current_weather", "arguments": "{\"location\": \"Tokyo\"}" }
                    }]
                }
            }
        }"#;

        let run: Run = serde_json::from_str(raw).unwrap();
        assert_eq!(run.status, RunStatus::RequiresAction);
        let calls = &run.required_action.unwrap().submit_tool_outputs.tool_calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "get_current_weather");
    }

    #[test]
    fn test_unknown_status_is_tolerated() {
        let run: Run =
            serde_json::from_str(r#"{ "id": "run_2", "status": "incomplete" }"#).unwrap();
        assert_eq!(run.status, RunStatus::Unknown);
        assert!(!run.status.is_terminal());
    }

    #[test]
    fn test_message_text_joins_text_parts() {
        let message = Message {
            id: "msg_1".to_string(),
            role: MessageRole::Assistant,
            content: vec![
                MessageContent {
                    kind: "text".to_string(),
                    text: Some(MessageText {
                        value: "first".to_string(),
                    }),
                },
                MessageContent {
                    kind: "image_file".to_string(),
                    text: None,
                },
                MessageContent {
                    kind: "text".to_string(),
                    text: Some(MessageText {
                        value: "second".to_string(),
                    }),
                },
            ],
        };
        assert_eq!(message.text(), "first\nsecond");
    }
}
