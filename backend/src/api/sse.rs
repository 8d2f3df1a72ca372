//! SSE transport endpoints.
//!
//! Binds HTTP requests to sessions: minting ids, attaching long-lived event
//! streams and accepting JSON-RPC submissions whose responses travel back
//! over the stream.
//!
//! Example usage from JavaScript:
//! ```javascript
//! const events = new EventSource('http://localhost:3000/sse');
//! events.addEventListener('endpoint', (e) => { postUrl = e.data; });
//! events.addEventListener('message', (e) => console.log(JSON.parse(e.data)));
//! ```

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use sluice_types::{
    error_codes, session_endpoint, Frame, FrameKind, JsonRpcRequest, JsonRpcResponse,
    SESSION_ID_HEADER,
};
use std::convert::Infallible;
use tracing::{debug, info, warn};
use utoipa::IntoParams;

use crate::mcp::{FrameStream, SessionError, Submission};
use crate::state::AppState;

/// Session selector for the SSE endpoints.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct SessionQuery {
    /// Session id issued by the server. May also be sent in `Mcp-Session-Id`.
    pub session_id: Option<String>,
}

/// Session id from the query string, falling back to the `Mcp-Session-Id` header.
fn get_session_id(query: &SessionQuery, headers: &HeaderMap) -> Option<String> {
    query
        .session_id
        .clone()
        .or_else(|| {
            headers
                .get(SESSION_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        })
        .filter(|id| !id.is_empty())
}

fn insert_session_header(response: &mut Response, session_id: &str) {
    if let Ok(hv) = HeaderValue::from_str(session_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(SESSION_ID_HEADER), hv);
    }
}

fn rpc_error(status: StatusCode, id: Value, code: i32, message: impl Into<String>) -> Response {
    (status, Json(JsonRpcResponse::error(id, code, message))).into_response()
}

fn session_error_response(err: SessionError) -> Response {
    let status = match &err {
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::NotBound(_) | SessionError::AlreadyBound(_) => StatusCode::CONFLICT,
        SessionError::Entropy(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!("Session request rejected: {}", err);
    rpc_error(status, Value::Null, err.code(), err.to_string())
}

fn to_event(frame: Frame) -> Event {
    match frame.kind {
        FrameKind::Keepalive => Event::default().comment(frame.payload),
        kind => Event::default().event(kind.as_str()).data(frame.payload),
    }
}

fn stream_response(session_id: &str, stream: FrameStream) -> Response {
    let events = stream.map(|frame| Ok::<_, Infallible>(to_event(frame)));
    let mut response = Sse::new(events).into_response();
    insert_session_header(&mut response, session_id);
    response
}

/// GET /sse - Open the event stream for a session.
///
/// Without a session id a new session is minted and the stream starts with
/// its `endpoint` frame.
#[utoipa::path(
    get,
    path = "/sse",
    tag = "Sessions",
    params(SessionQuery),
    responses(
        (status = 200, description = "Event stream (text/event-stream)"),
        (status = 404, description = "Unknown session (JSON-RPC error -32001)"),
        (status = 409, description = "Session already has a stream (JSON-RPC error -32003)")
    )
)]
pub async fn sse_get(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
) -> Response {
    match get_session_id(&query, &headers) {
        Some(session_id) => open_stream(&state, &session_id),
        None => open_new_stream(&state).await,
    }
}

/// GET /sse/{session_id} - Open the event stream for a session.
pub async fn sse_get_by_path(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    open_stream(&state, &session_id)
}

fn open_stream(state: &AppState, session_id: &str) -> Response {
    match state.service().connect(session_id) {
        Ok((_channel, stream)) => {
            info!("SSE stream opened for session {}", session_id);
            stream_response(session_id, stream)
        }
        Err(e) => session_error_response(e),
    }
}

async fn open_new_stream(state: &AppState) -> Response {
    match state.service().connect_new().await {
        Ok((session_id, stream)) => {
            info!("SSE stream opened for new session {}", session_id);
            stream_response(session_id.as_str(), stream)
        }
        Err(e) => session_error_response(e),
    }
}

/// POST /sse - Submit a JSON-RPC request, or mint a session.
///
/// With a session id the body is dispatched and `202 Accepted` is returned
/// once the response frame has been queued on the session's stream. Without
/// one, a new session is created and its endpoint returned as a single SSE
/// `endpoint` frame.
#[utoipa::path(
    post,
    path = "/sse",
    tag = "Sessions",
    params(SessionQuery),
    request_body(
        content = JsonRpcRequest,
        description = "JSON-RPC 2.0 request",
        content_type = "application/json"
    ),
    responses(
        (status = 200, description = "New session: one `endpoint` frame (text/event-stream)"),
        (status = 202, description = "Request accepted, response pushed on the event stream"),
        (status = 400, description = "Malformed JSON-RPC message"),
        (status = 404, description = "Unknown session (JSON-RPC error -32001)"),
        (status = 409, description = "Session has no event stream (JSON-RPC error -32002)")
    )
)]
pub async fn sse_post(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match get_session_id(&query, &headers) {
        Some(session_id) => submit(&state, &session_id, &body).await,
        None => initiate(&state),
    }
}

/// POST /sse/{session_id} - Submit a JSON-RPC request.
pub async fn sse_post_by_path(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Response {
    submit(&state, &session_id, &body).await
}

fn initiate(state: &AppState) -> Response {
    let session_id = match state.service().initiate() {
        Ok(id) => id,
        Err(e) => return session_error_response(e),
    };

    let body = Frame::endpoint(session_endpoint(session_id.as_str())).encode();
    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response();
    insert_session_header(&mut response, session_id.as_str());
    response
}

async fn submit(state: &AppState, session_id: &str, body: &[u8]) -> Response {
    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            return rpc_error(
                StatusCode::BAD_REQUEST,
                Value::Null,
                error_codes::PARSE_ERROR,
                format!("Parse error: {}", e),
            );
        }
    };

    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            return rpc_error(
                StatusCode::BAD_REQUEST,
                id,
                error_codes::INVALID_REQUEST,
                format!("Invalid request: {}", e),
            );
        }
    };

    debug!(
        "SSE POST: method={}, session={}",
        request.method, session_id
    );

    match state.service().submit(session_id, request).await {
        Ok(Submission::Queued | Submission::Notification | Submission::Dropped) => {
            (StatusCode::ACCEPTED, "Accepted").into_response()
        }
        Err(e) => session_error_response(e),
    }
}

/// DELETE /sse - Terminate a session and close its stream.
#[utoipa::path(
    delete,
    path = "/sse",
    tag = "Sessions",
    params(SessionQuery),
    responses(
        (status = 204, description = "Session terminated"),
        (status = 400, description = "No session id given"),
        (status = 404, description = "Unknown session (JSON-RPC error -32001)")
    )
)]
pub async fn sse_delete(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
) -> Response {
    match get_session_id(&query, &headers) {
        Some(session_id) => terminate(&state, &session_id),
        None => rpc_error(
            StatusCode::BAD_REQUEST,
            Value::Null,
            error_codes::INVALID_REQUEST,
            "Invalid request: sessionId required",
        ),
    }
}

/// DELETE /sse/{session_id} - Terminate a session.
pub async fn sse_delete_by_path(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    terminate(&state, &session_id)
}

fn terminate(state: &AppState, session_id: &str) -> Response {
    if state.service().terminate(session_id) {
        info!("Session terminated: {}", session_id);
        StatusCode::NO_CONTENT.into_response()
    } else {
        session_error_response(SessionError::NotFound(session_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_prefers_query_over_header() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_ID_HEADER, HeaderValue::from_static("from-header"));

        let query = SessionQuery {
            session_id: Some("from-query".to_string()),
        };
        assert_eq!(
            get_session_id(&query, &headers).as_deref(),
            Some("from-query")
        );
        assert_eq!(
            get_session_id(&SessionQuery::default(), &headers).as_deref(),
            Some("from-header")
        );
        assert_eq!(get_session_id(&SessionQuery::default(), &HeaderMap::new()), None);
    }

    #[test]
    fn test_empty_session_id_is_ignored() {
        let query = SessionQuery {
            session_id: Some(String::new()),
        };
        assert_eq!(get_session_id(&query, &HeaderMap::new()), None);
    }

    #[test]
    fn test_session_error_statuses() {
        let cases = [
            (SessionError::NotFound("a".into()), StatusCode::NOT_FOUND),
            (SessionError::NotBound("a".into()), StatusCode::CONFLICT),
            (SessionError::AlreadyBound("a".into()), StatusCode::CONFLICT),
            (
                SessionError::Entropy("a".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(session_error_response(err).status(), status);
        }
    }
}
