use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use be_chat::{DialogError, StoreError};
use be_core::domain::{NewMessage, Thread, ThreadId, TopicId, User, UserId, UserRole};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::service::{ChatService, ServiceError};

/// Header carrying the caller's identity, set by the authentication layer in
/// front of this service.
pub const USER_HEADER: &str = "x-user-id";

pub type ApiError = (StatusCode, Json<Value>);

// ---------------------------------------------------------------------------
// AppState — shared state for all handlers
// ---------------------------------------------------------------------------

pub struct AppState {
    pub service: ChatService,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/topics", get(list_topics))
        .route("/api/topics/{topic_id}", get(get_topic))
        .route("/api/topics/{topic_id}/thread", post(launch_topic))
        .route("/api/threads", get(list_my_threads))
        .route("/api/threads/{thread_id}", get(get_thread))
        .route("/api/threads/{thread_id}/messages", post(post_message))
        .route("/api/threads/{thread_id}/ratings", post(post_ratings))
        .route("/api/stats/threads", get(thread_stats))
        .route("/api/ratings/questions", get(rating_questions))
        .route("/api/onboarding", get(onboarding))
        .route("/api/users", post(signup))
        .route("/api/login", post(login))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct RatingsRequest {
    pub ratings: Value,
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub id: String,
    pub secret: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub id: String,
    pub secret: String,
}

#[derive(Debug, Deserialize)]
pub struct LaunchQuery {
    pub create: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub episode_done: Option<bool>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "bot": state.service.bot_name() }))
}

pub async fn list_topics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    current_user(&state, &headers).await?;
    let topics = run_blocking(&state, |service| service.get_topics()).await?;
    Ok(Json(topics))
}

pub async fn get_topic(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(topic_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    current_user(&state, &headers).await?;
    let topic_id = TopicId::new(topic_id);
    let topic = run_blocking(&state, move |service| {
        service
            .get_topic(&topic_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("topic {topic_id}")))
    })
    .await?;
    Ok(Json(topic))
}

/// Returns the caller's thread for a topic, creating and seeding it on the
/// first visit unless `?create=false`.
pub async fn launch_topic(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(topic_id): Path<String>,
    Query(query): Query<LaunchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user = current_user(&state, &headers).await?;
    let topic_id = TopicId::new(topic_id);
    let create = query.create.unwrap_or(true);
    let thread = run_blocking(&state, move |service| {
        let topic = service
            .get_topic(&topic_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("topic {topic_id}")))?;
        service
            .get_thread_for_topic(&user, &topic, create)?
            .ok_or_else(|| ServiceError::NotFound(format!("thread for topic {topic_id}")))
    })
    .await?;
    Ok(Json(thread))
}

pub async fn list_my_threads(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = current_user(&state, &headers).await?;
    let threads = run_blocking(&state, move |service| service.get_user_threads(&user)).await?;
    Ok(Json(threads))
}

pub async fn get_thread(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(thread_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = current_user(&state, &headers).await?;
    let thread = load_thread(&state, ThreadId::new(thread_id)).await?;
    ensure_can_view(&user, &thread)?;
    Ok(Json(thread))
}

pub async fn post_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(thread_id): Path<i64>,
    Json(body): Json<MessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = current_user(&state, &headers).await?;
    if body.text.trim().is_empty() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "message text must not be empty",
        ));
    }
    let thread = load_thread(&state, ThreadId::new(thread_id)).await?;
    ensure_participant(&user, &thread)?;

    let (reply, episode_done) = state
        .service
        .new_message(&thread, NewMessage::new(user.id, body.text))
        .await
        .map_err(service_error_to_response)?;

    Ok(Json(json!({
        "reply": reply,
        "episode_done": episode_done,
    })))
}

pub async fn post_ratings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(thread_id): Path<i64>,
    Json(body): Json<RatingsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = current_user(&state, &headers).await?;
    if !body.ratings.is_object() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "ratings must be a JSON object",
        ));
    }
    let thread_id = ThreadId::new(thread_id);
    let thread = load_thread(&state, thread_id).await?;
    ensure_participant(&user, &thread)?;

    let thread = run_blocking(&state, move |service| {
        service.update_thread_ratings(thread_id, &body.ratings)
    })
    .await?;
    Ok(Json(thread))
}

pub async fn thread_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user = current_user(&state, &headers).await?;
    if user.role != UserRole::Admin {
        return Err(json_error(StatusCode::FORBIDDEN, "admin role required"));
    }
    let episode_done = query.episode_done.unwrap_or(true);
    let counts =
        run_blocking(&state, move |service| service.get_thread_counts(episode_done)).await?;
    Ok(Json(counts))
}

pub async fn rating_questions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.service.get_rating_questions().to_vec())
}

pub async fn onboarding(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.service.onboarding() {
        Some(onboarding) => Json(json!(onboarding)),
        None => Json(json!({})),
    }
}

pub async fn signup(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = run_blocking(&state, move |service| {
        service.signup(&body.id, &body.secret, &body.name)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = run_blocking(&state, move |service| {
        service.authenticate(&body.id, &body.secret)
    })
    .await?
    .ok_or_else(|| json_error(StatusCode::UNAUTHORIZED, "invalid user id or secret"))?;
    Ok(Json(user))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Runs a store-backed service call on the blocking pool.
async fn run_blocking<T, F>(state: &Arc<AppState>, call: F) -> Result<T, ApiError>
where
    F: FnOnce(&ChatService) -> Result<T, ServiceError> + Send + 'static,
    T: Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || call(&state.service))
        .await
        .map_err(|err| {
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to join blocking task: {err}"),
            )
        })?
        .map_err(service_error_to_response)
}

async fn current_user(state: &Arc<AppState>, headers: &HeaderMap) -> Result<User, ApiError> {
    let user_id = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(UserId::new)
        .ok_or_else(|| {
            json_error(
                StatusCode::UNAUTHORIZED,
                format!("missing {USER_HEADER} header"),
            )
        })?;

    run_blocking(state, move |service| service.get_user(&user_id))
        .await?
        .ok_or_else(|| json_error(StatusCode::UNAUTHORIZED, "unknown user"))
}

async fn load_thread(state: &Arc<AppState>, thread_id: ThreadId) -> Result<Thread, ApiError> {
    run_blocking(state, move |service| {
        service
            .get_thread(thread_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("thread {thread_id}")))
    })
    .await
}

fn ensure_participant(user: &User, thread: &Thread) -> Result<(), ApiError> {
    if thread.has_participant(&user.id) {
        Ok(())
    } else {
        Err(json_error(
            StatusCode::FORBIDDEN,
            format!("user {} is not a participant of thread {}", user.id, thread.id),
        ))
    }
}

fn ensure_can_view(user: &User, thread: &Thread) -> Result<(), ApiError> {
    if user.role == UserRole::Admin {
        return Ok(());
    }
    ensure_participant(user, thread)
}

pub fn json_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    json_error_typed(status, error_type_for(status), message)
}

fn json_error_typed(
    status: StatusCode,
    error_type: &str,
    message: impl Into<String>,
) -> ApiError {
    let body = json!({
        "error": {
            "message": message.into(),
            "type": error_type,
            "code": status.as_u16(),
        }
    });
    (status, Json(body))
}

fn error_type_for(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "invalid_request_error",
        StatusCode::UNAUTHORIZED => "authentication_error",
        StatusCode::FORBIDDEN => "permission_error",
        StatusCode::NOT_FOUND => "not_found_error",
        StatusCode::CONFLICT => "conflict_error",
        StatusCode::BAD_GATEWAY => "bot_error",
        _ => "server_error",
    }
}

// ---------------------------------------------------------------------------
// Error → Response conversion
// ---------------------------------------------------------------------------

pub fn service_error_to_response(err: ServiceError) -> ApiError {
    let status = match &err {
        ServiceError::NotFound(_) | ServiceError::Store(StoreError::NotFound(_)) => {
            StatusCode::NOT_FOUND
        }
        ServiceError::EpisodeClosed(_)
        | ServiceError::Store(StoreError::EpisodeClosed(_))
        | ServiceError::UserExists(_) => StatusCode::CONFLICT,
        ServiceError::InvalidSignup(_) => StatusCode::BAD_REQUEST,
        ServiceError::Dialog(DialogError::Bot(_)) => StatusCode::BAD_GATEWAY,
        ServiceError::Dialog(e) if e.is_precondition() => {
            tracing::error!(error = %e, "dialog precondition violated");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        ServiceError::ExportAfterRating { thread_id, source } => {
            tracing::error!(thread_id = %thread_id, error = %source, "export after rating failed");
            return json_error_typed(
                StatusCode::INTERNAL_SERVER_ERROR,
                "export_error",
                err.to_string(),
            );
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_error(status, err.to_string())
}
