//! Jewel Server
//!
//! Axum server that embeds and serves the browser UI with API routes for the
//! chat window and the skill studio, plus a small CLI for headless turns.

mod api;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, Response, StatusCode, Uri},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use futures::stream::{self, Stream};
use jewel_core::assistant::{
    AssistantApi, ConversationSession, HttpAssistantClient, Message, MessageRole, RunDriver,
    RunEvent, RunOutcome, DEFAULT_INSTRUCTIONS,
};
use jewel_core::catalog::ToolCatalog;
use jewel_core::config::{AssistantConfig, PollConfig, SkillContext};
use jewel_core::error::{ApiError, SkillLoadError};
use jewel_core::loader::{CallableTable, SkillLoader};
use jewel_core::sandbox::SkillEngine;
use jewel_core::state::{JewelDb, SkillManager};
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{collections::HashMap, convert::Infallible, net::SocketAddr, sync::Arc};
use tokio::{
    net::TcpListener,
    sync::{broadcast, Mutex, RwLock},
};
use utoipa::{OpenApi, ToSchema};

/// Embedded UI assets
#[derive(RustEmbed)]
#[folder = "assets"]
struct Assets;

/// One browser session: the remote assistant/thread pair plus a guard that
/// serializes runs on the thread.
pub struct SessionSlot {
    pub session: ConversationSession,
    pub busy: Mutex<()>,
}

/// Application state
pub struct AppState {
    pub db: Arc<JewelDb>,
    pub api: Arc<dyn AssistantApi>,
    pub engine: Arc<SkillEngine>,
    /// Callable table; swapped wholesale by the explicit reload step
    pub table: RwLock<Arc<CallableTable>>,
    /// Tool catalog derived from the same load pass
    pub catalog: RwLock<Arc<ToolCatalog>>,
    /// Skills omitted by the last load pass
    pub load_errors: RwLock<Vec<SkillLoadError>>,
    pub sessions: RwLock<HashMap<String, Arc<SessionSlot>>>,
    pub event_tx: broadcast::Sender<RunEvent>,
    pub assistant_config: AssistantConfig,
    pub poll: PollConfig,
    pub context: SkillContext,
    pub persisted: RwLock<PersistedConfig>,
}

pub type SharedState = Arc<AppState>;

// === API Types ===

#[derive(Serialize, ToSchema)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Deserialize, ToSchema)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Serialize, ToSchema)]
pub struct ChatMessage {
    pub role: String,
    pub text: String,
}

#[derive(Serialize, ToSchema)]
pub struct ChatResponse {
    pub success: bool,
    /// Local view of how the run ended
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub messages: Vec<ChatMessage>,
}

#[derive(Serialize, ToSchema)]
pub struct MessagesResponse {
    pub messages: Vec<ChatMessage>,
}

// === Config API Types ===

/// Persisted configuration (subset exposed to the UI)
#[derive(Debug, Clone, Serialize, Deserialize, Default, ToSchema)]
pub struct PersistedConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_deadline_secs: Option<u64>,
}

impl PersistedConfig {
    async fn load() -> Self {
        let path = std::path::PathBuf::from(".jewel/config.json");
        if path.exists() {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
                Err(_) => Self::default(),
            }
        } else {
            Self::default()
        }
    }

    async fn save(&self) -> Result<(), std::io::Error> {
        let path = std::path::PathBuf::from(".jewel/config.json");
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(&path, content).await
    }

    fn merge(&mut self, other: PersistedConfig) {
        if other.model.is_some() {
            self.model = other.model;
        }
        if other.instructions.is_some() {
            self.instructions = other.instructions;
        }
        if other.poll_deadline_secs.is_some() {
            self.poll_deadline_secs = other.poll_deadline_secs;
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ConfigResponse {
    pub config: PersistedConfig,
    pub defaults: ConfigDefaults,
}

#[derive(Serialize, ToSchema)]
pub struct ConfigDefaults {
    pub model: String,
    pub instructions: String,
    pub poll_deadline_secs: u64,
}

// === CLI ===

#[derive(Parser, Clone)]
#[command(
    author,
    version,
    about = "Jewel - enterprise assistant with a pluggable skill registry"
)]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the Jewel server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Send one prompt through a fresh session and print the reply
    Ask {
        /// The prompt to send
        prompt: String,
    },
}

// === OpenAPI Definition ===

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Jewel API",
        version = "1.0.0",
        description = "API for the Jewel enterprise assistant and its skill registry"
    ),
    paths(
        get_messages,
        send_message,
        reset_session,
        get_config,
        update_config,
        api::skills::list_skills,
        api::skills::create_skill,
        api::skills::delete_skill,
        api::skills::reload_skills
    ),
    components(
        schemas(
            ApiResponse,
            SendMessageRequest,
            ChatMessage,
            ChatResponse,
            MessagesResponse,
            ConfigResponse,
            ConfigDefaults,
            PersistedConfig,
            api::skills::SkillResponse,
            api::skills::SkillListResponse,
            api::skills::LoadErrorResponse,
            api::skills::CreateSkillRequest,
            api::skills::ReloadResponse
        )
    ),
    tags(
        (name = "chat", description = "Conversation endpoints"),
        (name = "skills", description = "Skill registry management"),
        (name = "config", description = "Configuration management")
    )
)]
struct ApiDoc;

// === Chat Handlers ===

fn to_chat_message(message: &Message) -> ChatMessage {
    ChatMessage {
        role: match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
        .to_string(),
        text: message.text(),
    }
}

/// Get thread messages for a session, oldest first
#[utoipa::path(
    get,
    path = "/api/v1/chat/{session_id}/messages",
    tag = "chat",
    params(("session_id" = String, Path, description = "Browser session id")),
    responses(
        (status = 200, description = "Thread messages", body = MessagesResponse)
    )
)]
async fn get_messages(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Json<MessagesResponse> {
    let slot = state.sessions.read().await.get(&session_id).cloned();
    let Some(slot) = slot else {
        return Json(MessagesResponse { messages: vec![] });
    };

    match slot.session.messages(state.api.as_ref()).await {
        Ok(messages) => Json(MessagesResponse {
            messages: messages.iter().map(to_chat_message).collect(),
        }),
        Err(e) => {
            tracing::warn!(session = session_id, error = %e, "failed to list messages");
            Json(MessagesResponse { messages: vec![] })
        }
    }
}

/// Send a prompt and drive the resulting run to a terminal state
#[utoipa::path(
    post,
    path = "/api/v1/chat/{session_id}/send",
    tag = "chat",
    params(("session_id" = String, Path, description = "Browser session id")),
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Run finished; messages refreshed", body = ChatResponse),
        (status = 409, description = "A run is already outstanding", body = ChatResponse),
        (status = 502, description = "Remote service failure", body = ChatResponse)
    )
)]
async fn send_message(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> (StatusCode, Json<ChatResponse>) {
    if req.text.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ChatResponse {
                success: false,
                status: "rejected".to_string(),
                error: Some("prompt must not be empty".to_string()),
                messages: vec![],
            }),
        );
    }

    let slot = match get_or_create_session(&state, &session_id).await {
        Ok(slot) => slot,
        Err(e) => {
            tracing::error!(session = session_id, error = %e, "failed to create session");
            return (
                StatusCode::BAD_GATEWAY,
                Json(ChatResponse {
                    success: false,
                    status: "failed".to_string(),
                    error: Some(e.to_string()),
                    messages: vec![],
                }),
            );
        }
    };

    // One run at a time per thread: reject, never queue.
    let Ok(_guard) = slot.busy.try_lock() else {
        return (
            StatusCode::CONFLICT,
            Json(ChatResponse {
                success: false,
                status: "busy".to_string(),
                error: Some("a run is already outstanding for this session".to_string()),
                messages: vec![],
            }),
        );
    };

    match run_turn(&state, &slot.session, &req.text).await {
        Ok(outcome) => {
            let messages = slot
                .session
                .messages(state.api.as_ref())
                .await
                .unwrap_or_default();
            (
                StatusCode::OK,
                Json(ChatResponse {
                    success: outcome.is_success(),
                    status: outcome.label().to_string(),
                    error: outcome_error(&outcome),
                    messages: messages.iter().map(to_chat_message).collect(),
                }),
            )
        }
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(ChatResponse {
                success: false,
                status: "failed".to_string(),
                error: Some(e.to_string()),
                messages: vec![],
            }),
        ),
    }
}

/// Discard a session so the next prompt starts a fresh assistant and thread
#[utoipa::path(
    post,
    path = "/api/v1/chat/{session_id}/reset",
    tag = "chat",
    params(("session_id" = String, Path, description = "Browser session id")),
    responses(
        (status = 200, description = "Session discarded", body = ApiResponse)
    )
)]
async fn reset_session(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Json<ApiResponse> {
    let removed = state.sessions.write().await.remove(&session_id).is_some();
    Json(ApiResponse {
        success: true,
        message: if removed {
            "Session discarded".to_string()
        } else {
            "No session to discard".to_string()
        },
    })
}

fn outcome_error(outcome: &RunOutcome) -> Option<String> {
    match outcome {
        RunOutcome::Completed => None,
        RunOutcome::Failed { message } => {
            Some(message.clone().unwrap_or_else(|| "run failed".to_string()))
        }
        RunOutcome::Cancelled => Some("run was cancelled".to_string()),
        RunOutcome::Expired => Some("run expired on the remote service".to_string()),
        RunOutcome::TimedOut => {
            Some("run did not reach a terminal state before the deadline".to_string())
        }
    }
}

async fn run_turn(
    state: &AppState,
    session: &ConversationSession,
    text: &str,
) -> Result<RunOutcome, ApiError> {
    session.post_user_message(state.api.as_ref(), text).await?;
    let run = session.start_run(state.api.as_ref()).await?;

    let table = Arc::clone(&*state.table.read().await);
    let catalog = Arc::clone(&*state.catalog.read().await);
    let driver = RunDriver::new(
        Arc::clone(&state.api),
        table,
        catalog,
        state.context.clone(),
        effective_poll(state).await,
    )
    .with_event_channel(state.event_tx.clone());

    driver.drive(&session.thread_id, run).await
}

async fn effective_poll(state: &AppState) -> PollConfig {
    match state.persisted.read().await.poll_deadline_secs {
        Some(secs) => state.poll.clone().with_deadline(Duration::from_secs(secs)),
        None => state.poll.clone(),
    }
}

async fn get_or_create_session(
    state: &SharedState,
    session_id: &str,
) -> Result<Arc<SessionSlot>, ApiError> {
    if let Some(slot) = state.sessions.read().await.get(session_id) {
        return Ok(Arc::clone(slot));
    }

    let catalog = Arc::clone(&*state.catalog.read().await);
    let persisted = state.persisted.read().await.clone();
    let model = persisted
        .model
        .unwrap_or_else(|| state.assistant_config.model.clone());
    let instructions = persisted
        .instructions
        .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string());

    let session =
        ConversationSession::create(state.api.as_ref(), &catalog, &instructions, &model).await?;
    let slot = Arc::new(SessionSlot {
        session,
        busy: Mutex::new(()),
    });

    let mut sessions = state.sessions.write().await;
    // Another request may have won the race while we were creating.
    let entry = sessions
        .entry(session_id.to_string())
        .or_insert_with(|| Arc::clone(&slot));
    Ok(Arc::clone(entry))
}

/// SSE endpoint for run progress events with heartbeat
async fn events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();

    // Timeout-based stream with a heartbeat comment every 15 seconds
    let stream = stream::unfold(rx, |mut rx| async move {
        let timeout = tokio::time::timeout(Duration::from_secs(15), rx.recv()).await;

        match timeout {
            Ok(Ok(event)) => {
                let json = serde_json::to_string(&event).unwrap_or_default();
                Some((Ok(Event::default().data(json)), rx))
            }
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => {
                Some((Ok(Event::default().comment("lagged")), rx))
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => None,
            Err(_) => Some((Ok(Event::default().comment("heartbeat")), rx)),
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// === Config Handlers ===

fn config_defaults(state: &AppState) -> ConfigDefaults {
    ConfigDefaults {
        model: state.assistant_config.model.clone(),
        instructions: DEFAULT_INSTRUCTIONS.to_string(),
        poll_deadline_secs: state.poll.max_duration.as_secs(),
    }
}

/// Get current configuration
#[utoipa::path(
    get,
    path = "/api/v1/config",
    tag = "config",
    responses(
        (status = 200, description = "Current configuration and defaults", body = ConfigResponse)
    )
)]
async fn get_config(State(state): State<SharedState>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        config: state.persisted.read().await.clone(),
        defaults: config_defaults(&state),
    })
}

/// Update configuration (partial merge)
#[utoipa::path(
    patch,
    path = "/api/v1/config",
    tag = "config",
    request_body = PersistedConfig,
    responses(
        (status = 200, description = "Updated configuration", body = ConfigResponse)
    )
)]
async fn update_config(
    State(state): State<SharedState>,
    Json(updates): Json<PersistedConfig>,
) -> Json<ConfigResponse> {
    let mut persisted = state.persisted.write().await;
    persisted.merge(updates);

    if let Err(e) = persisted.save().await {
        tracing::error!(error = %e, "failed to save config");
    }

    Json(ConfigResponse {
        config: persisted.clone(),
        defaults: config_defaults(&state),
    })
}

// === OpenAPI Handler ===

async fn serve_openapi() -> impl IntoResponse {
    let spec = ApiDoc::openapi().to_json().unwrap_or_default();
    Response::builder()
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(spec))
        .unwrap()
}

// === Static File Serving ===

async fn serve_static(uri: Uri) -> impl IntoResponse {
    let path = uri.path().trim_start_matches('/');
    let path = if path.is_empty() { "index.html" } else { path };

    if let Some(file) = Assets::get(path) {
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, mime.as_ref())
            .body(Body::from(file.data.to_vec()))
            .unwrap();
    }

    // Fallback to the chat page
    if let Some(file) = Assets::get("index.html") {
        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/html")
            .body(Body::from(file.data.to_vec()))
            .unwrap();
    }

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::from("Not Found"))
        .unwrap()
}

// === Startup ===

/// Everything the server and the one-shot CLI share: config, database,
/// remote client and the skill stack loaded from the registry.
struct Bootstrap {
    config: AssistantConfig,
    poll: PollConfig,
    context: SkillContext,
    db: Arc<JewelDb>,
    api: Arc<dyn AssistantApi>,
    engine: Arc<SkillEngine>,
    table: CallableTable,
    catalog: ToolCatalog,
    load_errors: Vec<SkillLoadError>,
}

fn bootstrap() -> anyhow::Result<Bootstrap> {
    use anyhow::Context;

    let config = AssistantConfig::from_env().context("assistants API configuration")?;
    let poll = PollConfig::from_env();
    let context = SkillContext::from_env();

    let api: Arc<dyn AssistantApi> = Arc::new(
        HttpAssistantClient::new(&config).context("building the assistants API client")?,
    );

    let db = Arc::new(JewelDb::open().context("opening the jewel database")?);
    match db.seed_skills() {
        Ok(count) if count > 0 => println!("📝 Seeded {} default skills", count),
        Ok(_) => {}
        Err(e) => eprintln!("⚠️ Failed to seed skills: {}", e),
    }

    let manager = SkillManager::new(&db);
    let skills = manager.list().context("listing skills")?;

    let engine = Arc::new(SkillEngine::new());
    let report = SkillLoader::new(Arc::clone(&engine)).load_all(&skills);
    for error in &report.errors {
        eprintln!("⚠️ {}", error);
    }
    let catalog = ToolCatalog::build(&skills);

    println!(
        "🧩 Loaded {} skill(s), advertising {} tool(s)",
        report.table.len(),
        catalog.len()
    );

    Ok(Bootstrap {
        config,
        poll,
        context,
        db,
        api,
        engine,
        table: report.table,
        catalog,
        load_errors: report.errors,
    })
}

pub async fn run_server(port: u16) -> anyhow::Result<()> {
    let boot = bootstrap()?;
    let (event_tx, _) = broadcast::channel::<RunEvent>(100);
    let persisted = PersistedConfig::load().await;

    let state: SharedState = Arc::new(AppState {
        db: boot.db,
        api: boot.api,
        engine: boot.engine,
        table: RwLock::new(Arc::new(boot.table)),
        catalog: RwLock::new(Arc::new(boot.catalog)),
        load_errors: RwLock::new(boot.load_errors),
        sessions: RwLock::new(HashMap::new()),
        event_tx,
        assistant_config: boot.config,
        poll: boot.poll,
        context: boot.context,
        persisted: RwLock::new(persisted),
    });

    let chat_routes = Router::new()
        .route("/events", get(events))
        .route("/:session_id/messages", get(get_messages))
        .route("/:session_id/send", post(send_message))
        .route("/:session_id/reset", post(reset_session));

    let app = Router::new()
        .nest("/api/v1/chat", chat_routes)
        .nest("/api/v1/skills", api::skills::skills_routes())
        .route("/api/v1/config", get(get_config).patch(update_config))
        .route("/api/v1/openapi.json", get(serve_openapi))
        .fallback(get(serve_static))
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    println!("🚀 Jewel Server running at http://{}", addr);
    println!("   Chat:   /            (UI)  /api/v1/chat/:session/send");
    println!("   Skills: /skills.html (UI)  /api/v1/skills");
    println!("   Config: /api/v1/config (GET, PATCH)");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Headless one-shot turn: create a session, send the prompt, drive the run,
/// print the assistant's reply.
async fn run_ask(prompt: String) -> anyhow::Result<()> {
    let boot = bootstrap()?;

    let catalog = Arc::new(boot.catalog);
    let session = ConversationSession::create(
        boot.api.as_ref(),
        &catalog,
        DEFAULT_INSTRUCTIONS,
        &boot.config.model,
    )
    .await?;

    session.post_user_message(boot.api.as_ref(), &prompt).await?;
    let run = session.start_run(boot.api.as_ref()).await?;

    let driver = RunDriver::new(
        Arc::clone(&boot.api),
        Arc::new(boot.table),
        catalog,
        boot.context,
        boot.poll,
    );
    let outcome = driver.drive(&session.thread_id, run).await?;

    if !outcome.is_success() {
        anyhow::bail!(
            "run ended in state '{}'{}",
            outcome.label(),
            outcome_error(&outcome)
                .map(|m| format!(": {m}"))
                .unwrap_or_default()
        );
    }

    let messages = session.messages(boot.api.as_ref()).await?;
    match messages
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::Assistant)
    {
        Some(reply) => println!("{}", reply.text()),
        None => println!("(no assistant reply)"),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Some(CliCommand::Ask { prompt }) => run_ask(prompt).await,
        Some(CliCommand::Serve { port }) => run_server(port).await,
        None => run_server(8080).await,
    }
}
