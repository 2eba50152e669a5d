use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use anyhow::Context;
use serde::Deserialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::auth::{AuthUser, hash_password, verify_password};
use super::db::{DbHandle, TaskDb};
use super::ws::{Broadcast, RealtimeMessage, broadcast_message};
use crate::errors::ServiceError;
use crate::models::{AuthResponse, TaskId, TaskPatch, TaskStatus, present_or_null};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub ws_tx: broadcast::Sender<Broadcast>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(db: TaskDb, broadcast_capacity: usize) -> SharedState {
        let (ws_tx, _) = broadcast::channel(broadcast_capacity.max(1));
        Arc::new(AppState {
            db: DbHandle::new(db),
            ws_tx,
        })
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SignupRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
}

/// Unknown fields (e.g. `id`, `owner_id` when a client echoes a whole task
/// back) are ignored.
#[derive(Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    /// `null` clears the description; omitting it keeps the stored one.
    #[serde(default, deserialize_with = "present_or_null")]
    pub description: Option<Option<String>>,
    pub status: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::Unauthorized | ServiceError::InvalidCredentials => {
                ApiError::Unauthorized(message)
            }
            ServiceError::TaskNotFound { .. } => ApiError::NotFound(message),
            ServiceError::Validation(_) => ApiError::BadRequest(message),
            ServiceError::EmailTaken { .. } => ApiError::Conflict(message),
            ServiceError::Database(_) | ServiceError::LockPoisoned | ServiceError::Other(_) => {
                ApiError::Internal(message)
            }
        }
    }
}

/// Store errors travel as `anyhow::Error`; typed service failures inside
/// them keep their HTTP meaning.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ServiceError>() {
            Ok(service_err) => service_err.into(),
            Err(other) => ApiError::Internal(format!("{:#}", other)),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/auth/signup", post(signup))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/tasks/{id}",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

/// Malformed ids are reported exactly like missing ones.
fn parse_task_id(raw: &str) -> Result<TaskId, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound(format!("Task {} not found", raw)))
}

fn not_found(id: TaskId) -> ApiError {
    ServiceError::TaskNotFound { id }.into()
}

fn parse_status(raw: Option<&str>) -> Result<Option<TaskStatus>, ApiError> {
    raw.map(TaskStatus::from_str)
        .transpose()
        .map_err(|e| ServiceError::Validation(e).into())
}

fn validate_title(title: &str) -> Result<String, ApiError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ServiceError::Validation("title is required".into()).into());
    }
    Ok(title.to_string())
}

fn require(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ServiceError::Validation(format!("{} is required", field)).into());
    }
    Ok(())
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn signup(
    State(state): State<SharedState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require("name", &req.name)?;
    require("email", &req.email)?;
    require("password", &req.password)?;
    if !req.email.contains('@') {
        return Err(ServiceError::Validation("email is not valid".into()).into());
    }

    // Argon2 blocks for a while; run it off the async workers.
    let password = req.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context("Password hashing task failed")??;
    let (user, token) = state
        .db
        .call(move |db| {
            let user = db.create_user(&req.name, &req.email, &password_hash)?;
            let token = db.create_session(user.id)?;
            Ok((user, token))
        })
        .await?;
    tracing::info!(user_id = %user.id, "user signed up");
    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

async fn login(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require("email", &req.email)?;
    require("password", &req.password)?;

    let email = req.email;
    let credentials = state
        .db
        .call(move |db| db.find_credentials(&email))
        .await?;
    let Some((user, hash)) = credentials else {
        return Err(ServiceError::InvalidCredentials.into());
    };
    let password = req.password;
    let verified = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .context("Password verification task failed")?;
    if !verified {
        return Err(ServiceError::InvalidCredentials.into());
    }

    let user_id = user.id;
    let token = state
        .db
        .call(move |db| db.create_session(user_id))
        .await?;
    tracing::info!(user_id = %user.id, "user logged in");
    Ok(Json(AuthResponse { token, user }))
}

async fn logout(
    State(state): State<SharedState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let token = auth.token;
    state
        .db
        .call(move |db| db.delete_session(&token))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn me(auth: AuthUser) -> impl IntoResponse {
    Json(auth.user)
}

async fn list_tasks(
    State(state): State<SharedState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let owner = auth.user.id;
    let tasks = state.db.call(move |db| db.list_tasks(owner)).await?;
    Ok(Json(tasks))
}

async fn get_task(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(raw_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_task_id(&raw_id)?;
    let owner = auth.user.id;
    let task = state.db.call(move |db| db.get_task(owner, id)).await?;
    match task {
        Some(task) => Ok(Json(task)),
        None => Err(not_found(id)),
    }
}

async fn create_task(
    State(state): State<SharedState>,
    auth: AuthUser,
    Json(req): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = validate_title(req.title.as_deref().unwrap_or_default())?;
    let status = parse_status(req.status.as_deref())?.unwrap_or_default();
    let description = req.description;
    let owner = auth.user.id;

    let task = state
        .db
        .call(move |db| db.create_task(owner, &title, description.as_deref(), status))
        .await?;
    broadcast_message(&state.ws_tx, owner, &RealtimeMessage::TaskCreated(task.clone()));
    Ok((StatusCode::CREATED, Json(task)))
}

async fn update_task(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(raw_id): Path<String>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_task_id(&raw_id)?;
    let patch = TaskPatch {
        title: req.title.as_deref().map(validate_title).transpose()?,
        description: req.description,
        status: parse_status(req.status.as_deref())?,
    };
    let owner = auth.user.id;

    let task = state
        .db
        .call(move |db| db.update_task(owner, id, &patch))
        .await?
        .ok_or_else(|| not_found(id))?;
    broadcast_message(&state.ws_tx, owner, &RealtimeMessage::TaskUpdated(task.clone()));
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(raw_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_task_id(&raw_id)?;
    let owner = auth.user.id;
    let deleted = state.db.call(move |db| db.delete_task(owner, id)).await?;
    if !deleted {
        return Err(not_found(id));
    }
    broadcast_message(&state.ws_tx, owner, &RealtimeMessage::TaskDeleted(id));
    Ok(Json(serde_json::json!({"message": "Task deleted", "id": id})))
}

// ── Tests ─────────────────────────────────────────────────────────────
