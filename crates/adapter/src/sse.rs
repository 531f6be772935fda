//! SSE transport: `GET /sse` opens a session stream, `POST /messages/?session_id=..` feeds it.
//!
//! Responses are never returned on the POST; they are pushed to the session's event stream as
//! `message` events once the engine finishes.

use crate::error::{AdapterError, Result};
use crate::protocol::{Peer, ProtocolEngine};
use axum::Json;
use axum::Router;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chrono::{DateTime, Utc};
use futures::Stream;
use futures::stream::{self, StreamExt as _};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

const SESSION_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct SseSettings {
    pub heartbeat: Duration,
    pub max_request_bytes: Option<usize>,
}

impl Default for SseSettings {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(30),
            max_request_bytes: None,
        }
    }
}

/// One `GET /sse` connection and its protocol state.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub connection_id: u64,
    pub remote: SocketAddr,
    pub created_at: DateTime<Utc>,
    last_activity: Mutex<DateTime<Utc>>,
    tx: mpsc::Sender<String>,
    peer: Peer,
}

impl Session {
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.lock()
    }

    fn touch(&self) {
        *self.last_activity.lock() = Utc::now();
    }

    #[must_use]
    pub fn peer(&self) -> &Peer {
        &self.peer
    }
}

#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    next_connection: AtomicU64,
}

impl SessionTable {
    fn open(&self, remote: SocketAddr) -> (Arc<Session>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let id = uuid::Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        let session = Arc::new(Session {
            peer: Peer::new(format!("sse:{id}")),
            id: id.clone(),
            connection_id: self.next_connection.fetch_add(1, Ordering::Relaxed) + 1,
            remote,
            created_at: now,
            last_activity: Mutex::new(now),
            tx,
        });
        self.sessions.write().insert(id, session.clone());
        (session, rx)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove `id` only while it still belongs to `connection_id`.
    fn remove(&self, id: &str, connection_id: u64) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get(id) {
            Some(s) if s.connection_id == connection_id => {
                sessions.remove(id);
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone)]
pub struct SseState {
    engine: Arc<ProtocolEngine>,
    sessions: Arc<SessionTable>,
    settings: SseSettings,
    shutdown: CancellationToken,
}

impl SseState {
    pub fn new(
        engine: Arc<ProtocolEngine>,
        settings: SseSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            sessions: Arc::new(SessionTable::default()),
            settings,
            shutdown,
        }
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }
}

pub fn router(state: SseState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/sse", get(sse_handler))
        .route("/messages/", post(message_handler))
        .route("/messages", post(message_handler))
        .route("/health", get(health_handler));
    if let Some(limit) = state.settings.max_request_bytes {
        router = router.layer(DefaultBodyLimit::max(limit));
    }
    router.layer(cors).with_state(state)
}

/// Serve until the state's shutdown token is cancelled.
///
/// # Errors
///
/// Returns a transport error if the listener fails.
pub async fn serve(listener: TcpListener, state: SseState) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "SSE transport listening");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    .map_err(|e| AdapterError::Transport(format!("SSE server failed: {e}")))?;

    tracing::info!("SSE transport stopped");
    Ok(())
}

/// Drops the session from the table when its event stream goes away.
struct SessionGuard {
    sessions: Arc<SessionTable>,
    session: Arc<Session>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.peer.close();
        if self
            .sessions
            .remove(&self.session.id, self.session.connection_id)
        {
            tracing::info!(
                session_id = %self.session.id,
                remote = %self.session.remote,
                "SSE client disconnected"
            );
        }
    }
}

struct StreamState {
    rx: mpsc::Receiver<String>,
    heartbeat: Interval,
    shutdown: CancellationToken,
    guard: SessionGuard,
}

async fn sse_handler(
    State(state): State<SseState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let (session, rx) = state.sessions.open(remote);
    tracing::info!(session_id = %session.id, %remote, "SSE client connected");

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/messages/?session_id={}", session.id));

    let period = state.settings.heartbeat;
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let events = stream::unfold(
        StreamState {
            rx,
            heartbeat,
            shutdown: state.shutdown.clone(),
            guard: SessionGuard {
                sessions: state.sessions.clone(),
                session,
            },
        },
        |mut st| async move {
            let event = tokio::select! {
                biased;
                () = st.shutdown.cancelled() => return None,
                msg = st.rx.recv() => Event::default().event("message").data(msg?),
                _ = st.heartbeat.tick() => {
                    let data = json!({
                        "timestamp": Utc::now().to_rfc3339(),
                        "session_id": st.guard.session.id,
                    });
                    Event::default().event("heartbeat").data(data.to_string())
                }
            };
            Some((Ok::<_, Infallible>(event), st))
        },
    );

    Sse::new(stream::once(async move { Ok::<_, Infallible>(endpoint) }).chain(events))
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    session_id: Option<String>,
}

async fn message_handler(
    State(state): State<SseState>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> Response {
    let Some(session_id) = query.session_id.filter(|s| !s.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing session_id").into_response();
    };
    let Some(session) = state.sessions.get(&session_id) else {
        tracing::debug!(session_id = %session_id, "message for unknown session");
        return (StatusCode::BAD_REQUEST, "Invalid session_id").into_response();
    };
    session.touch();

    let engine = state.engine.clone();
    tokio::spawn(async move {
        let Some(response) = engine.handle(&session.peer, &body).await else {
            return;
        };
        if session.tx.send(response.to_line()).await.is_err() {
            tracing::debug!(session_id = %session.id, "session closed before response was pushed");
        }
    });

    (StatusCode::ACCEPTED, Json(json!({ "status": "Accepted" }))).into_response()
}

async fn health_handler(State(state): State<SseState>) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "sessions": state.sessions.len() }))
}
