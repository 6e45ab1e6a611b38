use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::event::DetectionEvent;
use crate::store::{EventStore, ListQuery, StoreError, DEFAULT_LIST_LIMIT};
use crate::supervisor::{WorkerBoard, WorkerStatus};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EventStore>,
    pub board: WorkerBoard,
    /// Ends open `/ws` sessions when the service shuts down.
    pub shutdown: CancellationToken,
}

/// How often `/ws` clients receive the current listing.
pub const PUSH_INTERVAL: Duration = Duration::from_secs(1);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/detections", get(list_detections))
        .route("/api/workers", get(list_workers))
        .route("/ws", get(detections_ws))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, serde::Deserialize)]
struct DetectionsParams {
    #[serde(default)]
    location: Option<String>,
    /// `dd/mm/YYYY`
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    limit: Option<u32>,
}

impl From<DetectionsParams> for ListQuery {
    fn from(p: DetectionsParams) -> Self {
        let non_blank = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        ListQuery {
            location: non_blank(p.location),
            date: non_blank(p.date),
            limit: p.limit.unwrap_or(DEFAULT_LIST_LIMIT),
        }
    }
}

async fn list_detections(
    State(state): State<AppState>,
    Query(params): Query<DetectionsParams>,
) -> Result<Json<Vec<DetectionEvent>>, ApiError> {
    let query = ListQuery::from(params);
    let events = state.store.list_recent(&query).await?;
    Ok(Json(events))
}

async fn list_workers(State(state): State<AppState>) -> Json<Vec<WorkerStatus>> {
    Json(state.board.snapshot())
}

async fn detections_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| push_detections(socket, state))
}

/// Sends the default listing on connect and then every [`PUSH_INTERVAL`]
/// until the client goes away or the service shuts down.
async fn push_detections(mut socket: WebSocket, state: AppState) {
    tracing::debug!("ws client connected");
    let query = ListQuery::default();
    let mut ticker = tokio::time::interval(PUSH_INTERVAL);

    loop {
        tokio::select! {
            biased;
            _ = state.shutdown.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            incoming = socket.recv() => match incoming {
                None | Some(Ok(Message::Close(_))) | Some(Err(_)) => break,
                // Client chatter is ignored.
                Some(Ok(_)) => {}
            },
            _ = ticker.tick() => {
                let events = match state.store.list_recent(&query).await {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::warn!(error = %e, "ws listing failed");
                        continue;
                    }
                };
                let text = match serde_json::to_string(&events) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "ws listing not serializable");
                        continue;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!("ws client disconnected");
}

struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "detection listing failed");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}
