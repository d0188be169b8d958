//! HTTP server exposing conversations, messages, and files as JSON.
//!
//! # Endpoints
//!
//! | Method   | Path                                   | Purpose                       |
//! |----------|----------------------------------------|-------------------------------|
//! | `GET`    | `/health`                              | Liveness and version          |
//! | `POST`   | `/users`                               | Register a user               |
//! | `GET`    | `/conversations?user_id=`              | List a user's conversations   |
//! | `POST`   | `/conversations`                       | Create a conversation         |
//! | `PATCH`  | `/conversations/{id}`                  | Rename                        |
//! | `DELETE` | `/conversations/{id}`                  | Delete with messages + files  |
//! | `GET`    | `/conversations/{id}/messages`         | Page messages (`limit`, `before_id`) |
//! | `POST`   | `/conversations/{id}/messages`         | Send a turn to the model      |
//! | `GET`    | `/conversations/{id}/files`            | List attached files           |
//! | `POST`   | `/conversations/{id}/files`            | Upload files (multipart)      |
//! | `DELETE` | `/conversations/{id}/files/{file_id}`  | Delete one file               |
//!
//! Errors use one body shape:
//!
//! ```json
//! { "error": { "code": "not_found", "message": "conversation not found: ..." } }
//! ```
//!
//! Storage and model failures are logged in full and answered with a short
//! generic message.

use axum::{
    extract::{
        multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, Multipart, Path,
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::blob::BlobStore;
use crate::config::Config;
use crate::context::ContextBuilder;
use crate::error::ChatError;
use crate::extract::resolve_media_type;
use crate::llm::{create_client, InferenceClient};
use crate::models::{format_ts_iso, AttachedFile, Conversation, Message, NewFile, User};
use crate::prompt::{Intent, OutputMode};
use crate::store::{ChatStore, SqliteStore};
use crate::transcript::{TranscriptAssembler, TurnOptions};

/// Page size when `limit` is not given.
pub const DEFAULT_MESSAGE_PAGE: i64 = 50;
/// Largest page a client may ask for.
pub const MAX_MESSAGE_PAGE: i64 = 200;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ChatStore>,
    pub blobs: BlobStore,
    pub context: Arc<ContextBuilder>,
    pub assembler: Arc<TranscriptAssembler>,
}

impl AppState {
    /// Wires the pipeline around a store and an inference client.
    pub fn new(
        config: Config,
        store: Arc<dyn ChatStore>,
        inference: Arc<dyn InferenceClient>,
    ) -> Self {
        let context = Arc::new(ContextBuilder::new(store.clone()));
        let assembler = Arc::new(TranscriptAssembler::from_config(
            &config,
            store.clone(),
            context.clone(),
            inference,
        ));
        Self {
            blobs: BlobStore::from_config(&config.storage),
            config: Arc::new(config),
            store,
            context,
            assembler,
        }
    }
}

/// Builds the router with CORS, request tracing, and the upload size cap.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = DefaultBodyLimit::max(state.config.storage.max_upload_bytes);

    Router::new()
        .route("/health", get(handle_health))
        .route("/users", post(handle_create_user))
        .route(
            "/conversations",
            get(handle_list_conversations).post(handle_create_conversation),
        )
        .route(
            "/conversations/{id}",
            patch(handle_rename_conversation).delete(handle_delete_conversation),
        )
        .route(
            "/conversations/{id}/messages",
            get(handle_list_messages).post(handle_send_message),
        )
        .route(
            "/conversations/{id}/files",
            get(handle_list_files).post(handle_upload_files),
        )
        .route("/conversations/{id}/files/{file_id}", delete(handle_delete_file))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind`.
///
/// Opens the SQLite database (creating the schema if needed), builds the
/// configured inference client, and serves until Ctrl-C or SIGTERM.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::connect(config).await?;
    crate::migrate::apply_schema(&pool).await?;

    let inference = create_client(&config.llm)?;
    info!(
        provider = inference.name(),
        model = %config.llm.model,
        "inference client ready"
    );

    let store: Arc<dyn ChatStore> = Arc::new(SqliteStore::new(pool.clone()));
    let app = build_router(AppState::new(config.clone(), store, inference));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(addr = %config.server.bind, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    info!("server stopped");
    Ok(())
}

/// Resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl-C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::InvalidInput(msg) => bad_request(msg),
            ChatError::NotFound(msg) => AppError::new(StatusCode::NOT_FOUND, "not_found", msg),
            ChatError::ReferentialViolation(msg) => {
                AppError::new(StatusCode::BAD_REQUEST, "referential_violation", msg)
            }
            ChatError::UpstreamModel(detail) => {
                error!(error = %detail, "upstream model failure");
                AppError::new(
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "the model did not return a reply",
                )
            }
            ChatError::Persistence(detail) => {
                error!(error = %detail, "storage failure");
                AppError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal error",
                )
            }
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::new(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", err.body_text())
        } else {
            bad_request(err.body_text())
        }
    }
}

/// Unwraps a JSON body, answering malformed input in the error schema.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(v)| v)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

type ApiResult<T> = Result<Json<T>, AppError>;

// ============ Wire types ============

#[derive(Serialize)]
pub struct UserView {
    id: String,
    display_name: Option<String>,
    created_at: String,
}

impl From<User> for UserView {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            display_name: u.display_name,
            created_at: format_ts_iso(u.created_at),
        }
    }
}

#[derive(Serialize)]
pub struct ConversationView {
    id: String,
    user_id: String,
    title: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<Conversation> for ConversationView {
    fn from(c: Conversation) -> Self {
        Self {
            id: c.id,
            user_id: c.user_id,
            title: c.title,
            created_at: format_ts_iso(c.created_at),
            updated_at: format_ts_iso(c.updated_at),
        }
    }
}

#[derive(Serialize)]
pub struct MessageView {
    id: i64,
    role: &'static str,
    content: String,
    created_at: String,
}

impl From<Message> for MessageView {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            role: m.role.as_str(),
            content: m.content,
            created_at: format_ts_iso(m.created_at),
        }
    }
}

#[derive(Serialize)]
pub struct FileView {
    id: i64,
    filename: String,
    media_type: String,
    /// Same value as `media_type`; the web client reads this name.
    mime_type: String,
    size_bytes: i64,
    created_at: String,
}

impl From<AttachedFile> for FileView {
    fn from(f: AttachedFile) -> Self {
        Self {
            id: f.id,
            filename: f.filename,
            mime_type: f.media_type.clone(),
            media_type: f.media_type,
            size_bytes: f.size_bytes,
            created_at: format_ts_iso(f.created_at),
        }
    }
}

#[derive(Serialize)]
struct UserEnvelope {
    user: UserView,
}

#[derive(Serialize)]
struct ConversationEnvelope {
    conversation: ConversationView,
}

#[derive(Serialize)]
struct ConversationList {
    conversations: Vec<ConversationView>,
}

#[derive(Serialize)]
struct MessageList {
    messages: Vec<MessageView>,
}

#[derive(Serialize)]
struct TurnResponse {
    user_message: MessageView,
    assistant_message: MessageView,
}

#[derive(Serialize)]
struct FileList {
    files: Vec<FileView>,
}

#[derive(Serialize)]
struct FileEnvelope {
    file: FileView,
}

async fn require_conversation(state: &AppState, id: &str) -> Result<Conversation, AppError> {
    state
        .store
        .get_conversation(id)
        .await?
        .ok_or_else(|| ChatError::not_found(format!("conversation not found: {}", id)).into())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ POST /users ============

#[derive(Deserialize)]
struct CreateUserBody {
    #[serde(default)]
    id: String,
    display_name: Option<String>,
}

async fn handle_create_user(
    State(state): State<AppState>,
    body: Result<Json<CreateUserBody>, JsonRejection>,
) -> ApiResult<UserEnvelope> {
    let body = json_body(body)?;
    let id = body.id.trim();
    if id.is_empty() {
        return Err(bad_request("id is required"));
    }
    let display_name = body
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    let user = state.store.create_user(id, display_name).await?;
    Ok(Json(UserEnvelope { user: user.into() }))
}

// ============ Conversations ============

#[derive(Deserialize)]
struct ListConversationsQuery {
    user_id: Option<String>,
}

async fn handle_list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ListConversationsQuery>,
) -> ApiResult<ConversationList> {
    let user_id = query
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| bad_request("user_id is required"))?;

    let conversations = state.store.list_conversations(user_id).await?;
    Ok(Json(ConversationList {
        conversations: conversations.into_iter().map(Into::into).collect(),
    }))
}

#[derive(Deserialize)]
struct CreateConversationBody {
    #[serde(default)]
    user_id: String,
    title: Option<String>,
}

async fn handle_create_conversation(
    State(state): State<AppState>,
    body: Result<Json<CreateConversationBody>, JsonRejection>,
) -> ApiResult<ConversationEnvelope> {
    let body = json_body(body)?;
    let user_id = body.user_id.trim();
    if user_id.is_empty() {
        return Err(bad_request("user_id is required"));
    }

    let conversation = state
        .store
        .create_conversation(user_id, body.title.as_deref())
        .await?;
    info!(conversation_id = %conversation.id, user_id, "conversation created");
    Ok(Json(ConversationEnvelope {
        conversation: conversation.into(),
    }))
}

#[derive(Deserialize)]
struct RenameConversationBody {
    #[serde(default)]
    title: String,
}

async fn handle_rename_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<RenameConversationBody>, JsonRejection>,
) -> ApiResult<ConversationEnvelope> {
    let body = json_body(body)?;
    let title = body.title.trim();
    if title.is_empty() {
        return Err(bad_request("title is required"));
    }

    let conversation = state
        .store
        .rename_conversation(&id, title)
        .await?
        .ok_or_else(|| ChatError::not_found(format!("conversation not found: {}", id)))?;
    Ok(Json(ConversationEnvelope {
        conversation: conversation.into(),
    }))
}

async fn handle_delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ConversationEnvelope> {
    // File rows vanish with the cascade; collect them first for blob cleanup.
    let files = state.store.list_files(&id).await?;
    let conversation = state
        .store
        .delete_conversation(&id)
        .await?
        .ok_or_else(|| ChatError::not_found(format!("conversation not found: {}", id)))?;

    for file in &files {
        state.context.forget(file.id);
        state.blobs.remove(&file.stored_path).await;
    }
    info!(conversation_id = %id, files = files.len(), "conversation deleted");

    Ok(Json(ConversationEnvelope {
        conversation: conversation.into(),
    }))
}

// ============ Messages ============

#[derive(Deserialize)]
struct ListMessagesQuery {
    limit: Option<i64>,
    before_id: Option<i64>,
}

async fn handle_list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ListMessagesQuery>,
) -> ApiResult<MessageList> {
    require_conversation(&state, &id).await?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_MESSAGE_PAGE)
        .clamp(1, MAX_MESSAGE_PAGE);

    let messages = state.store.list_messages(&id, limit, query.before_id).await?;
    Ok(Json(MessageList {
        messages: messages.into_iter().map(Into::into).collect(),
    }))
}

#[derive(Deserialize)]
struct SendMessageBody {
    #[serde(default)]
    content: String,
    model: Option<String>,
    intent: Option<String>,
    output_mode: Option<String>,
}

impl SendMessageBody {
    fn options(&self) -> Result<TurnOptions, AppError> {
        let intent = match self.intent.as_deref() {
            Some(s) => s.parse::<Intent>().map_err(bad_request)?,
            None => Intent::default(),
        };
        let mode = match self.output_mode.as_deref() {
            Some(s) => s.parse::<OutputMode>().map_err(bad_request)?,
            None => OutputMode::default(),
        };
        Ok(TurnOptions {
            intent,
            mode,
            model: self.model.clone(),
        })
    }
}

async fn handle_send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<SendMessageBody>, JsonRejection>,
) -> ApiResult<TurnResponse> {
    let body = json_body(body)?;
    let options = body.options()?;
    let outcome = state.assembler.send(&id, &body.content, &options).await?;
    Ok(Json(TurnResponse {
        user_message: outcome.user_message.into(),
        assistant_message: outcome.assistant_message.into(),
    }))
}

// ============ Files ============

async fn handle_list_files(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<FileList> {
    require_conversation(&state, &id).await?;
    let files = state.store.list_files(&id).await?;
    Ok(Json(FileList {
        files: files.into_iter().map(Into::into).collect(),
    }))
}

/// Attaches every file part of the upload. The upload is all or nothing:
/// when a later part fails, the parts already attached are detached again.
async fn handle_upload_files(
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> ApiResult<FileList> {
    require_conversation(&state, &id).await?;

    let mut stored = Vec::new();
    if let Err(e) = attach_parts(&state, &id, &mut multipart, &mut stored).await {
        for file in stored {
            if let Err(err) = state.store.delete_file(&id, file.id).await {
                warn!(file_id = file.id, error = %err, "failed to roll back attached file");
            }
            state.blobs.remove(&file.stored_path).await;
        }
        return Err(e);
    }

    if stored.is_empty() {
        return Err(bad_request("no file parts in upload"));
    }
    Ok(Json(FileList {
        files: stored.into_iter().map(Into::into).collect(),
    }))
}

async fn attach_parts(
    state: &AppState,
    id: &str,
    multipart: &mut Multipart,
    stored: &mut Vec<AttachedFile>,
) -> Result<(), AppError> {
    while let Some(field) = multipart.next_field().await? {
        // Parts without a filename are plain form fields.
        let Some(filename) = field
            .file_name()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
        else {
            continue;
        };
        let media_type = resolve_media_type(field.content_type(), &filename);
        let bytes = field.bytes().await?;

        let path = state
            .blobs
            .save(&filename, &bytes)
            .await
            .map_err(ChatError::from)?;
        let stored_path = path.to_string_lossy().into_owned();

        let new_file = NewFile {
            conversation_id: id.to_string(),
            filename,
            media_type,
            size_bytes: bytes.len() as i64,
            stored_path: stored_path.clone(),
        };
        match state.store.insert_file(new_file).await {
            Ok(file) => {
                info!(
                    conversation_id = %id,
                    file_id = file.id,
                    filename = %file.filename,
                    media_type = %file.media_type,
                    size_bytes = file.size_bytes,
                    "file attached"
                );
                stored.push(file);
            }
            Err(e) => {
                state.blobs.remove(&stored_path).await;
                return Err(e.into());
            }
        }
    }
    Ok(())
}

async fn handle_delete_file(
    State(state): State<AppState>,
    Path((id, file_id)): Path<(String, i64)>,
) -> ApiResult<FileEnvelope> {
    let file = state
        .store
        .delete_file(&id, file_id)
        .await?
        .ok_or_else(|| ChatError::not_found(format!("file not found: {}", file_id)))?;

    state.context.forget(file.id);
    state.blobs.remove(&file.stored_path).await;
    Ok(Json(FileEnvelope { file: file.into() }))
}
