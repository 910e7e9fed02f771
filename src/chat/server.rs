//! HTTP host for many concurrent chat sessions.
//!
//! Each session sits behind its own async mutex, so one session's messages
//! are handled strictly in order while other sessions proceed in parallel.
//! Sessions nobody has touched for the idle timeout are swept away.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use super::{BotMessage, ChatContext, ChatSession};

/// Upper bound on how often idle sessions are looked for.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

type SessionHandle = Arc<Mutex<ChatSession>>;

struct SessionEntry {
    session: SessionHandle,
    last_used: Instant,
}

#[derive(Clone)]
struct AppState {
    ctx: Arc<ChatContext>,
    sessions: Arc<RwLock<HashMap<Uuid, SessionEntry>>>,
}

impl AppState {
    fn new(ctx: Arc<ChatContext>) -> Self {
        Self {
            ctx,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Drop sessions unused for longer than `idle`. A session with a message
    /// in flight holds its lock and is kept.
    async fn sweep_idle(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, entry| {
            let keep = now.duration_since(entry.last_used) < idle
                || entry.session.try_lock().is_err();
            if !keep {
                info!("session {id} expired");
            }
            keep
        });
        before - sessions.len()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub session_id: Uuid,
    pub messages: Vec<BotMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub messages: Vec<BotMessage>,
}

#[derive(Debug)]
enum ApiError {
    UnknownSession(Uuid),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::UnknownSession(id) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("unknown session: {id}") })),
            )
                .into_response(),
        }
    }
}

/// Routes for the chat API.
pub fn router(ctx: Arc<ChatContext>) -> Router {
    app(AppState::new(ctx))
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/sessions", post(start_handler))
        .route("/sessions/:id", axum::routing::delete(end_handler))
        .route("/sessions/:id/messages", post(message_handler))
        .route("/sessions/:id/clear", post(clear_handler))
        .with_state(state)
}

/// Serve the chat API on `addr` until the process receives Ctrl-C, dropping
/// sessions idle for longer than `idle_timeout`.
pub async fn serve(
    ctx: Arc<ChatContext>,
    addr: SocketAddr,
    idle_timeout: Duration,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Chat server listening on {addr}");

    let state = AppState::new(ctx);
    let sweeper = tokio::spawn(sweep_loop(state.clone(), idle_timeout));

    let served = axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down chat server");
        })
        .await;
    sweeper.abort();
    served.context("chat server failed")
}

async fn sweep_loop(state: AppState, idle: Duration) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL.min(idle));
    loop {
        ticker.tick().await;
        let dropped = state.sweep_idle(idle).await;
        if dropped > 0 {
            info!("Dropped {dropped} idle sessions");
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn start_handler(State(state): State<AppState>) -> Json<StartResponse> {
    let (session, messages) = ChatSession::start(Arc::clone(&state.ctx)).await;
    let session_id = Uuid::new_v4();
    state
        .sessions
        .write()
        .await
        .insert(
            session_id,
            SessionEntry {
                session: Arc::new(Mutex::new(session)),
                last_used: Instant::now(),
            },
        );
    info!("session {session_id} started");

    Json(StartResponse {
        session_id,
        messages,
    })
}

async fn message_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let session = lookup(&state, id).await?;
    let messages = session.lock().await.on_message(&request.content).await;
    Ok(Json(MessagesResponse { messages }))
}

async fn clear_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let session = lookup(&state, id).await?;
    let messages = session.lock().await.clear();
    Ok(Json(MessagesResponse { messages }))
}

async fn end_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .sessions
        .write()
        .await
        .remove(&id)
        .ok_or(ApiError::UnknownSession(id))?;
    info!("session {id} ended");
    Ok(StatusCode::NO_CONTENT)
}

/// Fetch a session and mark it used.
async fn lookup(state: &AppState, id: Uuid) -> Result<SessionHandle, ApiError> {
    let mut sessions = state.sessions.write().await;
    let entry = sessions.get_mut(&id).ok_or(ApiError::UnknownSession(id))?;
    entry.last_used = Instant::now();
    Ok(Arc::clone(&entry.session))
}
