use anyhow::{anyhow, bail, Context, Result};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sluice_types::{
    error_codes, Frame, FrameDecoder, FrameKind, InitializeResult, JsonRpcRequest,
    JsonRpcResponse, ListResourcesResult, ReadResourceResult, SESSION_ID_HEADER, SSE_PATH,
};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP client for the Sluice SSE API
#[derive(Clone, Debug)]
pub struct SluiceClient {
    base_url: String,
    client: Client,
    timeout: Duration,
}

impl SluiceClient {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            timeout,
        }
    }

    /// Open an event stream without a session and wait for the endpoint frame.
    pub async fn connect(&self) -> Result<SluiceSession> {
        let url = format!("{}{}", self.base_url, SSE_PATH);
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .context("Failed to open event stream")?;
        if !response.status().is_success() {
            bail!("Event stream rejected with HTTP {}", response.status());
        }

        let header_id = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut frames = FrameReader::new(response, self.timeout);
        let endpoint = loop {
            let frame = frames.next().await?;
            match frame.kind {
                FrameKind::Endpoint => break frame.payload,
                FrameKind::Keepalive => continue,
                FrameKind::Message => warn!("Ignoring message before endpoint: {}", frame.payload),
            }
        };

        let session_id = header_id
            .or_else(|| session_id_from_endpoint(&endpoint))
            .ok_or_else(|| anyhow!("Endpoint {} carries no session id", endpoint))?;

        Ok(SluiceSession {
            client: self.client.clone(),
            endpoint_url: resolve_endpoint(&self.base_url, &endpoint),
            session_id,
            frames,
            next_id: 1,
        })
    }
}

/// One bound session: requests go out as POSTs, responses come back on the stream.
pub struct SluiceSession {
    client: Client,
    endpoint_url: String,
    session_id: String,
    frames: FrameReader,
    next_id: u64,
}

impl SluiceSession {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    pub async fn initialize(&mut self) -> Result<InitializeResult> {
        let result = self.call("initialize", None).await?;
        self.notify("notifications/initialized").await?;
        Ok(result)
    }

    pub async fn list_resources(&mut self) -> Result<ListResourcesResult> {
        self.call("resources/list", None).await
    }

    pub async fn read_resource(&mut self, uri: &str) -> Result<ReadResourceResult> {
        self.call("resources/read", Some(serde_json::json!({ "uri": uri })))
            .await
    }

    /// Send a request and decode its successful result.
    async fn call<T: DeserializeOwned>(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T> {
        let result = self
            .request(method, params)
            .await?
            .into_result()
            .map_err(|error| {
                anyhow!("{} failed: {} (code {})", method, error.message, error.code)
            })?;
        serde_json::from_value(result)
            .with_context(|| format!("Failed to parse {} result", method))
    }

    /// Send a request and wait for the response with the matching id.
    pub async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse> {
        let id = self.next_id;
        self.next_id += 1;

        let request = JsonRpcRequest::new(id, method, params);
        self.post(&request).await?;

        loop {
            let frame = self.frames.next().await?;
            if frame.kind != FrameKind::Message {
                continue;
            }
            let response: JsonRpcResponse = serde_json::from_str(&frame.payload)
                .context("Failed to parse response frame")?;
            if response.id == Value::from(id) {
                return Ok(response);
            }
            debug!("Skipping response for id {}", response.id);
        }
    }

    pub async fn notify(&mut self, method: &str) -> Result<()> {
        self.post(&JsonRpcRequest::notification(method)).await
    }

    /// End the session on the server.
    pub async fn terminate(self) -> Result<()> {
        let response = self
            .client
            .delete(&self.endpoint_url)
            .send()
            .await
            .context("Failed to send request")?;
        if response.status() != StatusCode::NO_CONTENT {
            bail!("Terminate returned HTTP {}", response.status());
        }
        Ok(())
    }

    async fn post(&self, request: &JsonRpcRequest) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint_url)
            .json(request)
            .send()
            .await
            .context("Failed to send request")?;
        let status = response.status();
        if status == StatusCode::ACCEPTED {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        bail!(describe_rejection(
            &self.session_id,
            &request.method,
            status,
            &body
        ))
    }
}

/// Decodes frames from a streaming response body.
struct FrameReader {
    response: Response,
    decoder: FrameDecoder,
    pending: VecDeque<Frame>,
    timeout: Duration,
}

impl FrameReader {
    fn new(response: Response, timeout: Duration) -> Self {
        Self {
            response,
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            timeout,
        }
    }

    async fn next(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(frame);
            }
            let chunk = tokio::time::timeout(self.timeout, self.response.chunk())
                .await
                .context("Timed out waiting for the event stream")?
                .context("Event stream failed")?
                .ok_or_else(|| anyhow!("Event stream closed by server"))?;
            self.pending.extend(self.decoder.push(&chunk));
        }
    }
}

/// Error text for a POST the server did not accept. Session-layer errors
/// are named as such; anything else reports the raw status and body.
fn describe_rejection(session_id: &str, method: &str, status: StatusCode, body: &str) -> String {
    let session_error = serde_json::from_str::<JsonRpcResponse>(body)
        .ok()
        .and_then(|rejected| rejected.error)
        .filter(|error| error_codes::is_session_error(error.code));
    match session_error {
        Some(error) => format!(
            "Session {} rejected {}: {} (code {})",
            session_id, method, error.message, error.code
        ),
        None => format!("{} rejected with HTTP {}: {}", method, status, body),
    }
}

fn resolve_endpoint(base_url: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("{}{}", base_url, endpoint)
    }
}

fn session_id_from_endpoint(endpoint: &str) -> Option<String> {
    let (_, query) = endpoint.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "sessionId")
        .map(|(_, value)| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_endpoint() {
        assert_eq!(
            resolve_endpoint("http://localhost:3000", "/sse?sessionId=ab12"),
            "http://localhost:3000/sse?sessionId=ab12"
        );
        assert_eq!(
            resolve_endpoint("http://localhost:3000", "https://other/sse?sessionId=x"),
            "https://other/sse?sessionId=x"
        );
    }

    #[test]
    fn test_describe_rejection() {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": {"code": -32002, "message": "Session not bound: ab"}
        })
        .to_string();
        let text = describe_rejection("ab", "ping", StatusCode::CONFLICT, &body);
        assert_eq!(text, "Session ab rejected ping: Session not bound: ab (code -32002)");

        let body = r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}"#;
        let text = describe_rejection("ab", "ping", StatusCode::BAD_REQUEST, body);
        assert!(text.starts_with("ping rejected with HTTP 400"));

        let text = describe_rejection("ab", "ping", StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(text, "ping rejected with HTTP 502 Bad Gateway: upstream down");
    }

    #[test]
    fn test_session_id_from_endpoint() {
        assert_eq!(
            session_id_from_endpoint("/sse?sessionId=ab12").as_deref(),
            Some("ab12")
        );
        assert_eq!(
            session_id_from_endpoint("/sse?x=1&sessionId=cd").as_deref(),
            Some("cd")
        );
        assert_eq!(session_id_from_endpoint("/sse"), None);
    }
}
