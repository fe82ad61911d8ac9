use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use missive_shared::protocol::MessagePayload;
use missive_shared::UserId;
use missive_store::{ChatStore, NewUser, UserProfile};

use crate::attachments::{AttachmentMeta, AttachmentStore};
use crate::auth::{self, require_auth, AuthError, AuthUser, TokenVerifier};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::presence::PresenceBroadcaster;
use crate::registry::PresenceRegistry;
use crate::router::{absolute_url, MessageRouter};
use crate::session;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<dyn ChatStore>,
    pub registry: Arc<PresenceRegistry>,
    pub router: Arc<MessageRouter>,
    pub presence: Arc<PresenceBroadcaster>,
    pub verifier: Arc<TokenVerifier>,
    pub attachments: Arc<AttachmentStore>,
}

impl AppState {
    /// Wire the realtime core up around a store.
    pub async fn new(config: ServerConfig, store: Arc<dyn ChatStore>) -> anyhow::Result<Self> {
        let registry = Arc::new(PresenceRegistry::new());
        let router = Arc::new(MessageRouter::new(
            store.clone(),
            registry.clone(),
            config.public_base_url.clone(),
        ));
        let presence = Arc::new(PresenceBroadcaster::new(registry.clone()));
        let verifier = Arc::new(TokenVerifier::new(&config.jwt_secret, config.jwt_expiry_days));
        let attachments =
            Arc::new(AttachmentStore::open(&config.upload_dir, config.max_attachment_size).await?);

        Ok(Self {
            config: Arc::new(config),
            store,
            registry,
            router,
            presence,
            verifier,
            attachments,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    let public = Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login));

    let protected = Router::new()
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route("/users", get(list_users))
        .route("/conversations/:user_id", get(get_conversation))
        .route("/conversations/:user_id/read", put(mark_conversation_read))
        .route("/messages/unread-count", get(unread_count))
        .route("/attachments", post(upload_attachment))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(session::ws_handler))
        .route("/uploads/:id", get(serve_upload))
        .nest("/api", public.merge(protected))
        .layer(DefaultBodyLimit::max(state.config.max_attachment_size))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    connections: usize,
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    username: String,
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct AuthResponse {
    token: String,
    user: UserProfile,
}

#[derive(Debug, Deserialize)]
struct ConversationQuery {
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentUploadResponse {
    url: String,
    mime_type: String,
    name: String,
    size: i64,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.registry.len(),
    })
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ServerError> {
    let username = req.username.trim().to_string();
    let email = req.email.trim().to_lowercase();

    if username.is_empty() || email.is_empty() {
        return Err(ServerError::BadRequest(
            "Username and email are required".to_string(),
        ));
    }
    if req.password.len() < 6 {
        return Err(ServerError::BadRequest(
            "Password must be at least 6 characters".to_string(),
        ));
    }

    let password_hash = auth::hash_password(&req.password)?;
    let user = state
        .store
        .create_user(NewUser {
            username,
            email,
            password_hash,
        })
        .await?;

    let token = state.verifier.issue(user.id)?;

    info!(user = %user.id.short(), username = %user.username, "Registered user");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: user.into(),
        }),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ServerError> {
    let email = req.email.trim().to_lowercase();

    let user = state
        .store
        .find_user_by_email(&email)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    auth::verify_password(&req.password, &user.password_hash)?;

    let token = state.verifier.issue(user.id)?;

    info!(user = %user.id.short(), "Logged in");

    Ok(Json(AuthResponse {
        token,
        user: user.into(),
    }))
}

async fn logout(
    State(state): State<AppState>,
    Extension(AuthUser(me)): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, ServerError> {
    // REST logout only clears the advisory flag; a live session notices the
    // transport close on its own.
    state.store.set_online_status(me, false).await?;

    info!(user = %me.short(), "Logged out");

    Ok(Json(serde_json::json!({ "message": "Logged out" })))
}

async fn me(
    State(state): State<AppState>,
    Extension(AuthUser(me)): Extension<AuthUser>,
) -> Result<Json<UserProfile>, ServerError> {
    let user = state
        .store
        .find_user(me)
        .await?
        .ok_or(AuthError::UnknownUser)?;

    Ok(Json(user.into()))
}

async fn list_users(
    State(state): State<AppState>,
    Extension(AuthUser(me)): Extension<AuthUser>,
) -> Result<Json<Vec<UserProfile>>, ServerError> {
    Ok(Json(state.store.list_users_except(me).await?))
}

async fn get_conversation(
    State(state): State<AppState>,
    Extension(AuthUser(me)): Extension<AuthUser>,
    Path(other): Path<UserId>,
    Query(query): Query<ConversationQuery>,
) -> Result<Json<Vec<MessagePayload>>, ServerError> {
    let payloads = state.router.history(me, other, query.limit).await?;

    Ok(Json(payloads))
}

async fn mark_conversation_read(
    State(state): State<AppState>,
    Extension(AuthUser(me)): Extension<AuthUser>,
    Path(other): Path<UserId>,
) -> Result<Json<serde_json::Value>, ServerError> {
    // `other` is the sender whose messages to the caller become read.
    let updated = state.router.mark_read(other, me).await?;

    Ok(Json(serde_json::json!({ "updated": updated })))
}

async fn unread_count(
    State(state): State<AppState>,
    Extension(AuthUser(me)): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let count = state.store.unread_count(me).await?;

    Ok(Json(serde_json::json!({ "count": count })))
}

async fn upload_attachment(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<AttachmentUploadResponse>), ServerError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let name = field.file_name().unwrap_or("attachment").to_string();
        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;

        let meta = AttachmentMeta {
            mime_type: mime_type.clone(),
            name: name.clone(),
            size: data.len() as i64,
        };
        let id = state.attachments.put(&data, &meta).await?;

        info!(id = %id, size = data.len(), "Attachment uploaded");

        return Ok((
            StatusCode::CREATED,
            Json(AttachmentUploadResponse {
                url: absolute_url(&state.config.public_base_url, &format!("/uploads/{id}")),
                mime_type,
                name,
                size: data.len() as i64,
            }),
        ));
    }

    Err(ServerError::BadRequest(
        "Missing 'file' field in multipart form".to_string(),
    ))
}

async fn serve_upload(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServerError> {
    let (data, meta) = state.attachments.get(id).await?;

    let headers = [
        (header::CONTENT_TYPE, meta.mime_type.clone()),
        (
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{}\"", meta.name),
        ),
    ];

    Ok((headers, data).into_response())
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP + WebSocket server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
