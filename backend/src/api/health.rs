//! Health and server info endpoints.

use axum::{
    extract::State,
    http::{header, HeaderMap},
    Json,
};
use serde::Serialize;
use sluice_types::SSE_PATH;
use utoipa::ToSchema;

use crate::mcp::SessionState;
use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub server: String,
    pub version: String,
    /// Sessions currently held by the registry, in any state.
    pub sessions: usize,
    pub session_states: SessionStateCounts,
}

/// Number of sessions in each lifecycle state.
#[derive(Debug, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SessionStateCounts {
    pub pending: usize,
    pub bound: usize,
    pub ready: usize,
    pub closed: usize,
}

impl SessionStateCounts {
    fn tally(states: impl IntoIterator<Item = SessionState>) -> Self {
        let mut counts = Self::default();
        for state in states {
            match state {
                SessionState::Pending => counts.pending += 1,
                SessionState::Bound => counts.bound += 1,
                SessionState::Ready => counts.ready += 1,
                SessionState::Closed => counts.closed += 1,
            }
        }
        counts
    }
}

/// Server description returned at the root path.
#[derive(Debug, Serialize, ToSchema)]
pub struct ServerInfoResponse {
    pub name: String,
    pub version: String,
    pub transport: String,
    /// Absolute SSE URL when the request carried a `Host` header, otherwise the path.
    pub sse_endpoint: String,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    responses(
        (status = 200, description = "Server is up", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let info = state.service().dispatcher().server_info();
    let sessions = state.service().registry().list();
    Json(HealthResponse {
        status: "ok".to_string(),
        server: info.name.clone(),
        version: info.version.clone(),
        sessions: sessions.len(),
        session_states: SessionStateCounts::tally(sessions.iter().map(|s| s.state)),
    })
}

#[utoipa::path(
    get,
    path = "/",
    tag = "System",
    responses(
        (status = 200, description = "Server information", body = ServerInfoResponse)
    )
)]
pub async fn server_info(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<ServerInfoResponse> {
    let info = state.service().dispatcher().server_info();
    let sse_endpoint = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|host| format!("http://{}{}", host, SSE_PATH))
        .unwrap_or_else(|| SSE_PATH.to_string());

    Json(ServerInfoResponse {
        name: info.name.clone(),
        version: info.version.clone(),
        transport: "sse".to_string(),
        sse_endpoint,
    })
}
