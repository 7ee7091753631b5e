//! # Skills API
//!
//! Endpoints for the skill studio: list, add, remove, and the explicit
//! reload step that rebuilds the callable table and catalog.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use jewel_core::catalog::ToolCatalog;
use jewel_core::error::RegistryError;
use jewel_core::loader::SkillLoader;
use jewel_core::state::{SkillDraft, SkillManager};

use crate::{ApiResponse, SharedState};

#[derive(Serialize, ToSchema)]
pub struct SkillResponse {
    pub name: String,
    pub description: String,
    pub parameters: String,
    pub context_keys: Vec<String>,
    pub created_at: String,
}

#[derive(Serialize, ToSchema)]
pub struct LoadErrorResponse {
    pub name: String,
    pub message: String,
}

#[derive(Serialize, ToSchema)]
pub struct SkillListResponse {
    pub skills: Vec<SkillResponse>,
    /// Skills omitted by the last load pass
    pub load_errors: Vec<LoadErrorResponse>,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateSkillRequest {
    pub name: String,
    pub description: String,
    /// Parameter schema as JSON text; omitted means no arguments
    #[serde(default)]
    pub parameters: Option<String>,
    pub implementation: String,
    #[serde(default)]
    pub context_keys: Vec<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ReloadResponse {
    pub success: bool,
    pub loaded: usize,
    pub skipped: Vec<LoadErrorResponse>,
}

pub fn skills_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_skills).post(create_skill))
        .route("/reload", post(reload_skills))
        .route("/:name", delete(delete_skill))
}

fn registry_status(error: &RegistryError) -> StatusCode {
    match error {
        RegistryError::Duplicate(_) => StatusCode::CONFLICT,
        RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
        RegistryError::InvalidName(_) => StatusCode::UNPROCESSABLE_ENTITY,
        RegistryError::Lock | RegistryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// List all registered skills
#[utoipa::path(
    get,
    path = "/api/v1/skills",
    tag = "skills",
    responses(
        (status = 200, description = "Registered skills and load errors", body = SkillListResponse)
    )
)]
pub async fn list_skills(State(state): State<SharedState>) -> Json<SkillListResponse> {
    let manager = SkillManager::new(&state.db);
    let skills = match manager.list() {
        Ok(skills) => skills
            .into_iter()
            .map(|s| SkillResponse {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
                context_keys: s.context_keys,
                created_at: s.created_at.to_rfc3339(),
            })
            .collect(),
        Err(e) => {
            tracing::error!(error = %e, "failed to list skills");
            vec![]
        }
    };

    let load_errors = state
        .load_errors
        .read()
        .await
        .iter()
        .map(|e| LoadErrorResponse {
            name: e.name.clone(),
            message: e.message.clone(),
        })
        .collect();

    Json(SkillListResponse {
        skills,
        load_errors,
    })
}

/// Register a new skill
#[utoipa::path(
    post,
    path = "/api/v1/skills",
    tag = "skills",
    request_body = CreateSkillRequest,
    responses(
        (status = 201, description = "Skill added", body = ApiResponse),
        (status = 409, description = "Name already taken", body = ApiResponse),
        (status = 422, description = "Invalid name", body = ApiResponse)
    )
)]
pub async fn create_skill(
    State(state): State<SharedState>,
    Json(req): Json<CreateSkillRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let draft = SkillDraft {
        name: req.name,
        description: req.description,
        parameters: req.parameters.unwrap_or_else(|| "{}".to_string()),
        implementation: req.implementation,
        context_keys: req.context_keys,
    };

    let manager = SkillManager::new(&state.db);
    match manager.add(&draft) {
        Ok(skill) => (
            StatusCode::CREATED,
            Json(ApiResponse {
                success: true,
                message: format!(
                    "Skill '{}' added. Reload to make it callable.",
                    skill.name
                ),
            }),
        ),
        Err(e) => (
            registry_status(&e),
            Json(ApiResponse {
                success: false,
                message: e.to_string(),
            }),
        ),
    }
}

/// Remove a skill by name
#[utoipa::path(
    delete,
    path = "/api/v1/skills/{name}",
    tag = "skills",
    params(("name" = String, Path, description = "Skill name")),
    responses(
        (status = 200, description = "Skill removed", body = ApiResponse),
        (status = 404, description = "No such skill", body = ApiResponse)
    )
)]
pub async fn delete_skill(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let manager = SkillManager::new(&state.db);
    match manager.remove(&name) {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse {
                success: true,
                message: format!("Skill '{}' removed. Reload to drop it from the table.", name),
            }),
        ),
        Err(e) => (
            registry_status(&e),
            Json(ApiResponse {
                success: false,
                message: e.to_string(),
            }),
        ),
    }
}

/// Rebuild the callable table and catalog from the registry.
///
/// New sessions pick up the rebuilt catalog; existing assistants keep the
/// catalog they were created with.
#[utoipa::path(
    post,
    path = "/api/v1/skills/reload",
    tag = "skills",
    responses(
        (status = 200, description = "Table and catalog rebuilt", body = ReloadResponse)
    )
)]
pub async fn reload_skills(State(state): State<SharedState>) -> (StatusCode, Json<ReloadResponse>) {
    let manager = SkillManager::new(&state.db);
    let skills = match manager.list() {
        Ok(skills) => skills,
        Err(e) => {
            tracing::error!(error = %e, "reload failed to list skills");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ReloadResponse {
                    success: false,
                    loaded: 0,
                    skipped: vec![],
                }),
            );
        }
    };

    let report = SkillLoader::new(Arc::clone(&state.engine)).load_all(&skills);
    let catalog = ToolCatalog::build(&skills);
    let loaded = report.table.len();
    let skipped: Vec<LoadErrorResponse> = report
        .errors
        .iter()
        .map(|e| LoadErrorResponse {
            name: e.name.clone(),
            message: e.message.clone(),
        })
        .collect();

    *state.table.write().await = Arc::new(report.table);
    *state.catalog.write().await = Arc::new(catalog);
    *state.load_errors.write().await = report.errors;

    tracing::info!(loaded, skipped = skipped.len(), "skill reload complete");

    (
        StatusCode::OK,
        Json(ReloadResponse {
            success: true,
            loaded,
            skipped,
        }),
    )
}
