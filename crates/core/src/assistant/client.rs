//! # Assistants API Client
//!
//! HTTP client for the remote assistants service behind the [`AssistantApi`]
//! seam, so the session and run driver can be exercised against fakes.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::AssistantConfig;
use crate::error::ApiError;

use super::types::{Assistant, Message, MessageList, MessageRole, Run, Thread, ToolOutput};

/// The assistants protocol as consumed by this service.
#[async_trait]
pub trait AssistantApi: Send + Sync {
    async fn create_assistant(
        &self,
        name: &str,
        instructions: &str,
        tools: Vec<Value>,
        model: &str,
    ) -> Result<Assistant, ApiError>;

    async fn create_thread(&self) -> Result<Thread, ApiError>;

    async fn create_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<Message, ApiError>;

    /// Messages as the wire returns them: newest first.
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, ApiError>;

    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        instructions: Option<&str>,
    ) -> Result<Run, ApiError>;

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, ApiError>;

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, ApiError>;
}

/// reqwest-backed implementation targeting the v2 assistants endpoints.
pub struct HttpAssistantClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpAssistantClient {
    pub fn new(config: &AssistantConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(reqwest::Method::GET, path, None).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, ApiError> {
        self.request(reqwest::Method::POST, path, Some(body)).await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .http
            .request(method, &url)
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2");
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Remote {
                status: status.as_u16(),
                message: remote_error_message(&body),
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Pull `error.message` out of an error body, falling back to the raw text.
fn remote_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            let mut message = body.trim().to_string();
            message.truncate(500);
            message
        })
}

#[async_trait]
impl AssistantApi for HttpAssistantClient {
    async fn create_assistant(
        &self,
        name: &str,
        instructions: &str,
        tools: Vec<Value>,
        model: &str,
    ) -> Result<Assistant, ApiError> {
        self.post(
            "/assistants",
            json!({
                "name": name,
                "instructions": instructions,
                "tools": tools,
                "model": model,
            }),
        )
        .await
    }

    async fn create_thread(&self) -> Result<Thread, ApiError> {
        self.post("/threads", json!({})).await
    }

    async fn create_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<Message, ApiError> {
        self.post(
            &format!("/threads/{thread_id}/messages"),
            json!({ "role": role, "content": content }),
        )
        .await
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, ApiError> {
        let list: MessageList = self.get(&format!("/threads/{thread_id}/messages")).await?;
        Ok(list.data)
    }

    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        instructions: Option<&str>,
    ) -> Result<Run, ApiError> {
        let mut body = json!({ "assistant_id": assistant_id });
        if let Some(instructions) = instructions {
            body["instructions"] = json!(instructions);
        }
        self.post(&format!("/threads/{thread_id}/runs"), body).await
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, ApiError> {
        self.get(&format!("/threads/{thread_id}/runs/{run_id}")).await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, ApiError> {
        self.post(
            &format!("/threads/{thread_id}/runs/{run_id}/submit_tool_outputs"),
            json!({ "tool_outputs": outputs }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_message_prefers_structured_error() {
        let body = r#"{"error": {"message": "Invalid model", "type": "invalid_request_error"}}"#;
        assert_eq!(remote_error_message(body), "Invalid model");
    }

    #[test]
    fn test_remote_error_message_falls_back_to_raw_body() {
        assert_eq!(remote_error_message("upstream exploded"), "upstream exploded");
    }
}
