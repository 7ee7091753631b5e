//! # Run Poller / Dispatcher
//!
//! Drives one run to a terminal state: polls with exponential backoff under a
//! hard deadline, and on `requires_action` resolves every pending tool call
//! against the callable table, submits the whole batch in one request, then
//! resumes polling.
//!
//! Dispatch failures - unknown tool, bad arguments, missing context fields,
//! a failing handler - become structured error payloads in the submitted
//! outputs. They are consumed by the remote model, not the end user, and one
//! bad call never sinks the batch.

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::catalog::ToolCatalog;
use crate::config::{PollConfig, SkillContext};
use crate::error::ApiError;
use crate::loader::CallableTable;

use super::client::AssistantApi;
use super::types::{Run, RunStatus, ToolCall, ToolOutput};

/// Kind of run event
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunEventKind {
    /// The remote reported a new status
    StatusChanged,
    /// One tool call was resolved (successfully or into an error payload)
    ToolDispatched,
    /// A batch of tool outputs was submitted
    OutputsSubmitted,
    /// The local deadline elapsed before a terminal state
    TimedOut,
}

/// Progress event emitted while a run is driven
#[derive(Debug, Clone, Serialize)]
pub struct RunEvent {
    pub kind: RunEventKind,
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RunEvent {
    fn new(kind: RunEventKind, run_id: &str) -> Self {
        Self {
            kind,
            run_id: run_id.to_string(),
            data: None,
        }
    }

    fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Local view of how a driven run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed { message: Option<String> },
    Cancelled,
    Expired,
    /// The poll deadline elapsed; the remote run may still be going, but the
    /// local view has moved on.
    TimedOut,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Drives runs against the remote service using a fixed callable table and
/// catalog, both read-only for the driver's lifetime.
pub struct RunDriver {
    api: Arc<dyn AssistantApi>,
    table: Arc<CallableTable>,
    catalog: Arc<ToolCatalog>,
    context: SkillContext,
    poll: PollConfig,
    event_tx: Option<broadcast::Sender<RunEvent>>,
}

impl RunDriver {
    pub fn new(
        api: Arc<dyn AssistantApi>,
        table: Arc<CallableTable>,
        catalog: Arc<ToolCatalog>,
        context: SkillContext,
        poll: PollConfig,
    ) -> Self {
        Self {
            api,
            table,
            catalog,
            context,
            poll,
            event_tx: None,
        }
    }

    /// Stream progress events while driving.
    pub fn with_event_channel(mut self, tx: broadcast::Sender<RunEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    /// Poll `run` until a terminal state or the deadline.
    pub async fn drive(&self, thread_id: &str, mut run: Run) -> Result<RunOutcome, ApiError> {
        let started = tokio::time::Instant::now();
        let mut interval = self.poll.initial_interval;
        let mut last_status = None;

        loop {
            if last_status != Some(run.status) {
                self.emit(
                    RunEvent::new(RunEventKind::StatusChanged, &run.id)
                        .with_data(json!({ "status": run.status })),
                );
                last_status = Some(run.status);
            }

            match run.status {
                RunStatus::Completed => {
                    tracing::info!(run = %run.id, "run completed");
                    return Ok(RunOutcome::Completed);
                }
                RunStatus::Failed => {
                    let message = run.last_error.map(|e| e.message);
                    tracing::warn!(run = %run.id, error = ?message, "run failed");
                    return Ok(RunOutcome::Failed { message });
                }
                RunStatus::Cancelled => return Ok(RunOutcome::Cancelled),
                RunStatus::Expired => return Ok(RunOutcome::Expired),
                RunStatus::RequiresAction => {
                    let outputs = self.resolve_batch(&run).await;
                    run = self
                        .api
                        .submit_tool_outputs(thread_id, &run.id, &outputs)
                        .await?;
                    self.emit(
                        RunEvent::new(RunEventKind::OutputsSubmitted, &run.id)
                            .with_data(json!({ "count": outputs.len() })),
                    );
                    // Submission refreshed the run; re-enter without sleeping
                    // and restart the backoff for the new processing phase.
                    interval = self.poll.initial_interval;
                    continue;
                }
                RunStatus::Queued
                | RunStatus::InProgress
                | RunStatus::Cancelling
                | RunStatus::Unknown => {}
            }

            if started.elapsed() >= self.poll.max_duration {
                tracing::warn!(run = %run.id, deadline = ?self.poll.max_duration, "run exceeded poll deadline");
                self.emit(RunEvent::new(RunEventKind::TimedOut, &run.id));
                return Ok(RunOutcome::TimedOut);
            }

            tokio::time::sleep(interval).await;
            interval = self.poll.next_interval(interval);
            run = self.api.retrieve_run(thread_id, &run.id).await?;
        }
    }

    /// Resolve every pending call of a `requires_action` run. Infallible by
    /// construction: each call yields exactly one output.
    async fn resolve_batch(&self, run: &Run) -> Vec<ToolOutput> {
        let calls: &[ToolCall] = run
            .required_action
            .as_ref()
            .map(|ra| ra.submit_tool_outputs.tool_calls.as_slice())
            .unwrap_or(&[]);

        let mut outputs = Vec::with_capacity(calls.len());
        for call in calls {
            outputs.push(self.resolve_call(&run.id, call).await);
        }
        outputs
    }

    async fn resolve_call(&self, run_id: &str, call: &ToolCall) -> ToolOutput {
        let tool = call.function.name.clone();
        let (ok, output) = match self.try_resolve(call).await {
            Ok(value) => (true, stringify(value)),
            Err(payload) => {
                tracing::warn!(run = run_id, %tool, call = %call.id, %payload, "tool call resolved to an error payload");
                (false, payload.to_string())
            }
        };

        self.emit(
            RunEvent::new(RunEventKind::ToolDispatched, run_id)
                .with_data(json!({ "call_id": call.id.clone(), "tool": tool, "ok": ok })),
        );

        ToolOutput {
            tool_call_id: call.id.clone(),
            output,
        }
    }

    async fn try_resolve(&self, call: &ToolCall) -> Result<Value, Value> {
        let name = &call.function.name;

        let entry = self.table.get(name).ok_or_else(|| {
            error_payload("unknown_tool", name, &format!("no skill registered under {name:?}"))
        })?;

        let raw = call.function.arguments.trim();
        let args: Value = if raw.is_empty() {
            json!({})
        } else {
            serde_json::from_str(raw)
                .map_err(|e| error_payload("invalid_arguments", name, &e.to_string()))?
        };

        if let Some(schema) = self.catalog.function(name) {
            schema
                .validate_args(&args)
                .map_err(|m| error_payload("invalid_arguments", name, &m))?;
        }

        let ctx = self.context.select(&entry.context_keys).map_err(|key| {
            error_payload(
                "missing_context",
                name,
                &format!("context field {key:?} is not configured"),
            )
        })?;

        entry
            .handler
            .invoke(args, Value::Object(ctx))
            .await
            .map_err(|e| error_payload("skill_failed", name, &e.to_string()))
    }
}

/// Structured error payload returned to the remote model in place of a tool
/// result.
fn error_payload(kind: &str, tool: &str, message: &str) -> Value {
    json!({ "error": { "type": kind, "tool": tool, "message": message } })
}

/// Tool outputs go over the wire as text; strings pass through unquoted.
fn stringify(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::session::{ConversationSession, DEFAULT_INSTRUCTIONS};
    use crate::assistant::types::{
        Assistant, FunctionCall, Message, MessageRole, RequiredAction, SubmitToolOutputs, Thread,
    };
    use crate::loader::SkillLoader;
    use crate::sandbox::SkillEngine;
    use crate::state::{seeds, Skill};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted stand-in for the remote service. `retrieve_run` and
    /// `submit_tool_outputs` serve the next run in the script; the last entry
    /// repeats so a "stuck" remote is easy to model.
    struct FakeApi {
        script: Mutex<VecDeque<Run>>,
        submissions: Mutex<Vec<Vec<ToolOutput>>>,
    }

    impl FakeApi {
        fn new(script: Vec<Run>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                submissions: Mutex::new(Vec::new()),
            })
        }

        fn next_run(&self) -> Run {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().expect("script must not be empty")
            }
        }

        fn submissions(&self) -> Vec<Vec<ToolOutput>> {
            self.submissions.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AssistantApi for FakeApi {
        async fn create_assistant(
            &self,
            _name: &str,
            _instructions: &str,
            tools: Vec<Value>,
            _model: &str,
        ) -> Result<Assistant, ApiError> {
            Ok(Assistant {
                id: format!("asst_fake_{}", tools.len()),
            })
        }

        async fn create_thread(&self) -> Result<Thread, ApiError> {
            Ok(Thread {
                id: "thread_fake".to_string(),
            })
        }

        async fn create_message(
            &self,
            _thread_id: &str,
            role: MessageRole,
            content: &str,
        ) -> Result<Message, ApiError> {
            Ok(Message {
                id: "msg_fake".to_string(),
                role,
                content: vec![],
            })
        }

        async fn list_messages(&self, _thread_id: &str) -> Result<Vec<Message>, ApiError> {
            Ok(vec![])
        }

        async fn create_run(
            &self,
            _thread_id: &str,
            _assistant_id: &str,
            _instructions: Option<&str>,
        ) -> Result<Run, ApiError> {
            Ok(self.next_run())
        }

        async fn retrieve_run(&self, _thread_id: &str, _run_id: &str) -> Result<Run, ApiError> {
            Ok(self.next_run())
        }

        async fn submit_tool_outputs(
            &self,
            _thread_id: &str,
            _run_id: &str,
            outputs: &[ToolOutput],
        ) -> Result<Run, ApiError> {
            self.submissions.lock().unwrap().push(outputs.to_vec());
            Ok(self.next_run())
        }
    }

    fn run(status: RunStatus) -> Run {
        Run {
            id: "run_1".to_string(),
            status,
            required_action: None,
            last_error: None,
        }
    }

    fn run_requiring(calls: Vec<ToolCall>) -> Run {
        Run {
            id: "run_1".to_string(),
            status: RunStatus::RequiresAction,
            required_action: Some(RequiredAction {
                kind: "submit_tool_outputs".to_string(),
                submit_tool_outputs: SubmitToolOutputs { tool_calls: calls },
            }),
            last_error: None,
        }
    }

    fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    fn skill_row(name: &str, parameters: &str, implementation: &str, keys: &[&str]) -> Skill {
        Skill {
            id: 0,
            name: name.to_string(),
            description: format!("{name} description"),
            parameters: parameters.to_string(),
            implementation: implementation.to_string(),
            context_keys: keys.iter().map(|k| k.to_string()).collect(),
            created_at: Utc::now(),
        }
    }

    fn seeded_rows() -> Vec<Skill> {
        seeds::default_skills()
            .iter()
            .map(|seed| {
                skill_row(
                    seed.name,
                    seed.parameters,
                    seed.implementation,
                    &serde_json::from_str::<Vec<String>>(seed.context_keys)
                        .unwrap()
                        .iter()
                        .map(String::as_str)
                        .collect::<Vec<_>>(),
                )
            })
            .collect()
    }

    fn fast_poll() -> PollConfig {
        PollConfig {
            initial_interval: Duration::from_millis(1),
            backoff_multiplier: 2.0,
            max_interval: Duration::from_millis(2),
            max_duration: Duration::from_secs(5),
        }
    }

    fn driver_for(api: Arc<FakeApi>, rows: &[Skill], poll: PollConfig) -> RunDriver {
        let report = SkillLoader::new(Arc::new(SkillEngine::new())).load_all(rows);
        RunDriver::new(
            api,
            Arc::new(report.table),
            Arc::new(ToolCatalog::build(rows)),
            SkillContext::default(),
            poll,
        )
    }

    #[tokio::test]
    async fn test_weather_scenario_produces_expected_output() {
        let api = FakeApi::new(vec![
            run_requiring(vec![tool_call(
                "call_1",
                "get_current_weather",
                r#"{"location": "Tokyo"}"#,
            )]),
            run(RunStatus::InProgress),
            run(RunStatus::Completed),
        ]);
        let driver = driver_for(Arc::clone(&api), &seeded_rows(), fast_poll());

        // Initial retrieve pops the requires_action entry.
        let first = api.retrieve_run("t", "run_1").await.unwrap();
        let outcome = driver.drive("t", first).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        let submissions = api.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].len(), 1);
        assert_eq!(submissions[0][0].tool_call_id, "call_1");

        let payload: Value = serde_json::from_str(&submissions[0][0].output).unwrap();
        assert_eq!(
            payload,
            json!({ "location": "Tokyo", "temperature": "10", "unit": "celsius" })
        );
    }

    #[tokio::test]
    async fn test_status_sequence_drives_exactly_one_submission() {
        let api = FakeApi::new(vec![
            run(RunStatus::InProgress),
            run_requiring(vec![tool_call(
                "call_1",
                "get_current_weather",
                r#"{"location": "Paris"}"#,
            )]),
            run(RunStatus::InProgress),
            run(RunStatus::Completed),
        ]);
        let driver = driver_for(Arc::clone(&api), &seeded_rows(), fast_poll());

        let outcome = driver.drive("t", run(RunStatus::Queued)).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(api.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_partial_failure_not_abort() {
        let api = FakeApi::new(vec![run(RunStatus::Completed)]);
        let driver = driver_for(Arc::clone(&api), &seeded_rows(), fast_poll());

        let first = run_requiring(vec![
            tool_call("call_1", "not_registered", "{}"),
            tool_call("call_2", "get_current_weather", r#"{"location": "Paris"}"#),
        ]);
        let outcome = driver.drive("t", first).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        let submissions = api.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].len(), 2, "every call yields an output");

        let error: Value = serde_json::from_str(&submissions[0][0].output).unwrap();
        assert_eq!(error["error"]["type"], "unknown_tool");

        let weather: Value = serde_json::from_str(&submissions[0][1].output).unwrap();
        assert_eq!(weather["temperature"], "22");
    }

    #[tokio::test]
    async fn test_malformed_and_invalid_arguments_become_error_payloads() {
        let api = FakeApi::new(vec![run(RunStatus::Completed)]);
        let driver = driver_for(Arc::clone(&api), &seeded_rows(), fast_poll());

        let first = run_requiring(vec![
            tool_call("call_1", "get_current_weather", "not json at all"),
            tool_call("call_2", "get_current_weather", r#"{"location": 7}"#),
            tool_call("call_3", "get_current_weather", "{}"),
        ]);
        driver.drive("t", first).await.unwrap();

        let submission = &api.submissions()[0];
        for output in submission {
            let payload: Value = serde_json::from_str(&output.output).unwrap();
            assert_eq!(payload["error"]["type"], "invalid_arguments");
        }
    }

    #[tokio::test]
    async fn test_failing_handler_becomes_error_payload() {
        let rows = vec![skill_row(
            "always_fails",
            "{}",
            r#"fn main(args, ctx) { throw "boom" }"#,
            &[],
        )];
        let api = FakeApi::new(vec![run(RunStatus::Completed)]);
        let driver = driver_for(Arc::clone(&api), &rows, fast_poll());

        let first = run_requiring(vec![tool_call("call_1", "always_fails", "{}")]);
        let outcome = driver.drive("t", first).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        let payload: Value =
            serde_json::from_str(&api.submissions()[0][0].output).unwrap();
        assert_eq!(payload["error"]["type"], "skill_failed");
        assert!(payload["error"]["message"].as_str().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_undeclared_context_field_is_per_call_error() {
        let rows = vec![skill_row(
            "needs_secret",
            "{}",
            r#"fn main(args, ctx) { ctx["api_key"] }"#,
            &["api_key"],
        )];
        let api = FakeApi::new(vec![run(RunStatus::Completed)]);
        let driver = driver_for(Arc::clone(&api), &rows, fast_poll());

        let first = run_requiring(vec![tool_call("call_1", "needs_secret", "{}")]);
        driver.drive("t", first).await.unwrap();

        let payload: Value =
            serde_json::from_str(&api.submissions()[0][0].output).unwrap();
        assert_eq!(payload["error"]["type"], "missing_context");
    }

    #[tokio::test]
    async fn test_declared_context_field_reaches_handler() {
        let rows = vec![skill_row(
            "needs_secret",
            "{}",
            r#"fn main(args, ctx) { "key=" + ctx["api_key"] }"#,
            &["api_key"],
        )];
        let api = FakeApi::new(vec![run(RunStatus::Completed)]);
        let report = SkillLoader::new(Arc::new(SkillEngine::new())).load_all(&rows);
        let driver = RunDriver::new(
            Arc::clone(&api) as Arc<dyn AssistantApi>,
            Arc::new(report.table),
            Arc::new(ToolCatalog::build(&rows)),
            SkillContext::default().with_field("api_key", "k-123"),
            fast_poll(),
        );

        let first = run_requiring(vec![tool_call("call_1", "needs_secret", "{}")]);
        driver.drive("t", first).await.unwrap();

        assert_eq!(api.submissions()[0][0].output, "key=k-123");
    }

    #[tokio::test]
    async fn test_deadline_yields_timeout_exactly_once() {
        let api = FakeApi::new(vec![run(RunStatus::InProgress)]);
        let poll = PollConfig {
            initial_interval: Duration::from_millis(2),
            backoff_multiplier: 1.0,
            max_interval: Duration::from_millis(2),
            max_duration: Duration::from_millis(20),
        };
        let (tx, mut rx) = broadcast::channel(64);
        let driver =
            driver_for(Arc::clone(&api), &seeded_rows(), poll).with_event_channel(tx);

        let outcome = driver.drive("t", run(RunStatus::InProgress)).await.unwrap();
        assert_eq!(outcome, RunOutcome::TimedOut);
        assert!(api.submissions().is_empty());

        let mut timeouts = 0;
        while let Ok(event) = rx.try_recv() {
            if event.kind == RunEventKind::TimedOut {
                timeouts += 1;
            }
        }
        assert_eq!(timeouts, 1, "timeout is signaled exactly once");
    }

    #[tokio::test]
    async fn test_failed_run_carries_remote_message() {
        let mut failed = run(RunStatus::Failed);
        failed.last_error = Some(crate::assistant::types::RunError {
            code: Some("rate_limit_exceeded".to_string()),
            message: "try later".to_string(),
        });
        let api = FakeApi::new(vec![failed.clone()]);
        let driver = driver_for(Arc::clone(&api), &seeded_rows(), fast_poll());

        let outcome = driver.drive("t", failed).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Failed {
                message: Some("try later".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_session_creation_attaches_catalog_and_thread() {
        let api = FakeApi::new(vec![run(RunStatus::Completed)]);
        let rows = seeded_rows();
        let catalog = ToolCatalog::build(&rows);

        let session = ConversationSession::create(
            api.as_ref(),
            &catalog,
            DEFAULT_INSTRUCTIONS,
            "gpt-4-1106-preview",
        )
        .await
        .unwrap();

        // The fake encodes the advertised tool count into the assistant id:
        // code_interpreter + one seeded skill.
        assert_eq!(session.assistant_id, "asst_fake_2");
        assert_eq!(session.thread_id, "thread_fake");
    }
}
