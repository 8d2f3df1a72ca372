//! Session-bound request flow.
//!
//! Glues the registry, the event channels and the dispatcher together: a
//! request submitted for a session is dispatched without any lock held and
//! its response is written to whichever channel the session has at the time.

use sluice_types::{session_endpoint, Frame, JsonRpcRequest, JsonRpcResponse, Method};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channel::{ChannelError, EventChannel, FrameStream};
use super::handler::RpcDispatcher;
use super::session::{RegistrySettings, SessionError, SessionId, SessionRegistry};
use crate::resources::ResourceProvider;

/// Default interval between registry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// What happened to a submitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The response frame was queued on the session's stream.
    Queued,
    /// The message was a notification; nothing is sent back.
    Notification,
    /// The stream closed while the request was being handled.
    Dropped,
}

/// Server-side session service. Cheap to clone.
#[derive(Clone)]
pub struct McpService {
    registry: SessionRegistry,
    dispatcher: Arc<RpcDispatcher>,
    shutdown: CancellationToken,
}

impl McpService {
    pub fn new(provider: Arc<dyn ResourceProvider>, settings: RegistrySettings) -> Self {
        Self {
            registry: SessionRegistry::new(settings),
            dispatcher: Arc::new(RpcDispatcher::new(provider)),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &RpcDispatcher {
        &self.dispatcher
    }

    /// Mint a Pending session. The caller reports its endpoint to the client.
    pub fn initiate(&self) -> Result<SessionId, SessionError> {
        self.registry.create()
    }

    /// Attach a new event stream to an existing session.
    pub fn connect(&self, id: &str) -> Result<(Arc<EventChannel>, FrameStream), SessionError> {
        let session_id = SessionId::from(id);
        let (channel, stream) = self.registry.open_channel(&session_id);
        // On failure the stream is dropped here, which closes the unattached
        // channel; its detach is ignored because the ids differ.
        self.registry.attach(id, Arc::clone(&channel))?;
        Ok((channel, stream))
    }

    /// Mint a session, attach a stream to it and queue the endpoint frame
    /// as the first frame of that stream.
    pub async fn connect_new(&self) -> Result<(SessionId, FrameStream), SessionError> {
        let id = self.initiate()?;
        let (channel, stream) = self.connect(id.as_str())?;
        if channel
            .send(Frame::endpoint(session_endpoint(id.as_str())))
            .await
            .is_err()
        {
            warn!("Stream for session {} closed before the endpoint was sent", id);
        }
        Ok((id, stream))
    }

    /// Dispatch one message for a session and push the response onto its stream.
    pub async fn submit(
        &self,
        id: &str,
        request: JsonRpcRequest,
    ) -> Result<Submission, SessionError> {
        let channel = self.registry.lookup(id)?;
        let is_initialize = Method::lookup(&request.method) == Some(Method::Initialize);

        let Some(response) = self.dispatcher.dispatch(request).await else {
            return Ok(Submission::Notification);
        };

        if is_initialize && !response.is_error() {
            if let Err(e) = self.registry.mark_ready(id, channel.id()) {
                debug!("Session {} not marked ready: {}", id, e);
            }
        }

        match channel.send(encode_response(&response)).await {
            Ok(()) => Ok(Submission::Queued),
            Err(ChannelError::Closed) => {
                warn!(
                    "Dropping response {} for session {}: stream closed",
                    response.id, id
                );
                Ok(Submission::Dropped)
            }
        }
    }

    /// Evict a session and close its stream.
    pub fn terminate(&self, id: &str) -> bool {
        self.registry.evict(id)
    }

    /// Start the background task that evicts stale sessions.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = registry.sweep(tokio::time::Instant::now());
                        if evicted > 0 {
                            debug!(
                                "Sweeper evicted {} sessions ({} remaining)",
                                evicted,
                                registry.len()
                            );
                        }
                    }
                }
            }
            debug!("Session sweeper stopped");
        })
    }

    /// Stop the sweeper and close every session.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let closed = self.registry.shutdown();
        info!("Session service shut down ({} sessions closed)", closed);
    }
}

fn encode_response(response: &JsonRpcResponse) -> Frame {
    match serde_json::to_string(response) {
        Ok(payload) => Frame::message(payload),
        Err(e) => {
            warn!("Failed to serialize response: {}", e);
            let fallback = JsonRpcResponse::error(
                response.id.clone(),
                sluice_types::error_codes::INTERNAL_ERROR,
                "Internal error: response could not be serialized",
            );
            Frame::message(serde_json::to_string(&fallback).unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::channel::ChannelSettings;
    use crate::mcp::state::SessionState;
    use crate::resources::{ResourceError, StaticCatalog};
    use async_trait::async_trait;
    use futures::StreamExt;
    use serde_json::{json, Value};
    use sluice_types::{FrameKind, ResourceContents, ResourceDescriptor};
    use tokio::sync::Notify;

    fn service() -> McpService {
        McpService::new(Arc::new(StaticCatalog::sample()), RegistrySettings::default())
    }

    async fn next_message(stream: &mut FrameStream) -> Value {
        loop {
            let frame = stream.next().await.expect("stream ended");
            if frame.kind == FrameKind::Message {
                return serde_json::from_str(&frame.payload).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_submit_requires_bound_session() {
        let service = service();
        let id = service.initiate().unwrap();

        let err = service
            .submit(id.as_str(), JsonRpcRequest::new(1, "ping", None))
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::NotBound(id.to_string()));

        let err = service
            .submit("nope", JsonRpcRequest::new(1, "ping", None))
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::NotFound("nope".to_string()));
    }

    #[tokio::test]
    async fn test_initialize_marks_session_ready() {
        let service = service();
        let id = service.initiate().unwrap();
        let (_channel, mut stream) = service.connect(id.as_str()).unwrap();
        assert_eq!(service.registry().state(id.as_str()), Some(SessionState::Bound));

        let outcome = service
            .submit(id.as_str(), JsonRpcRequest::new(1, "initialize", None))
            .await
            .unwrap();
        assert_eq!(outcome, Submission::Queued);
        assert_eq!(service.registry().state(id.as_str()), Some(SessionState::Ready));

        let message = next_message(&mut stream).await;
        assert_eq!(message["id"], 1);
        assert_eq!(message["result"]["protocolVersion"], "2024-11-05");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_stream_does_not_block_submit() {
        let settings = RegistrySettings {
            channel: ChannelSettings {
                keepalive_interval: Duration::from_secs(30),
                capacity: 1,
            },
            ..RegistrySettings::default()
        };
        let service = McpService::new(Arc::new(StaticCatalog::sample()), settings);
        let id = service.initiate().unwrap();
        let (_channel, _stream) = service.connect(id.as_str()).unwrap();

        let first = service
            .submit(id.as_str(), JsonRpcRequest::new(1, "ping", None))
            .await;
        assert_eq!(first, Ok(Submission::Queued));

        // Nobody reads the stream, so the second response has nowhere to go.
        let second = tokio::time::timeout(
            Duration::from_secs(31),
            service.submit(id.as_str(), JsonRpcRequest::new(2, "ping", None)),
        )
        .await
        .expect("submit must give up on a stalled stream");
        assert_eq!(second, Ok(Submission::Dropped));
        assert_eq!(service.registry().state(id.as_str()), Some(SessionState::Closed));
    }

    #[tokio::test]
    async fn test_notification_is_not_answered() {
        let service = service();
        let id = service.initiate().unwrap();
        let (channel, _stream) = service.connect(id.as_str()).unwrap();

        let outcome = service
            .submit(
                id.as_str(),
                JsonRpcRequest::notification("notifications/initialized"),
            )
            .await
            .unwrap();
        assert_eq!(outcome, Submission::Notification);
        assert!(!channel.is_closed());
    }

    #[tokio::test]
    async fn test_connect_new_sends_endpoint_first() {
        let service = service();
        let (id, mut stream) = service.connect_new().await.unwrap();
        let frame = stream.next().await.unwrap();
        assert_eq!(frame, Frame::endpoint(format!("/sse?sessionId={}", id)));
        assert_eq!(service.registry().state(id.as_str()), Some(SessionState::Bound));
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let service = service();
        let id = service.initiate().unwrap();
        let (_channel, _stream) = service.connect(id.as_str()).unwrap();
        assert!(matches!(
            service.connect(id.as_str()),
            Err(SessionError::AlreadyBound(_))
        ));
        assert_eq!(service.registry().state(id.as_str()), Some(SessionState::Bound));
    }

    struct GatedProvider {
        gate: Arc<Notify>,
        entered: Arc<Notify>,
    }

    #[async_trait]
    impl ResourceProvider for GatedProvider {
        async fn list(&self) -> crate::resources::Result<Vec<ResourceDescriptor>> {
            self.entered.notify_one();
            self.gate.notified().await;
            Ok(Vec::new())
        }

        async fn read(&self, uri: &str) -> crate::resources::Result<ResourceContents> {
            Err(ResourceError::NotFound(uri.to_string()))
        }
    }

    #[tokio::test]
    async fn test_response_to_closed_stream_is_dropped() {
        let gate = Arc::new(Notify::new());
        let entered = Arc::new(Notify::new());
        let service = McpService::new(
            Arc::new(GatedProvider {
                gate: gate.clone(),
                entered: entered.clone(),
            }),
            RegistrySettings::default(),
        );
        let id = service.initiate().unwrap();
        let (_channel, stream) = service.connect(id.as_str()).unwrap();

        let submit = {
            let service = service.clone();
            let id = id.clone();
            tokio::spawn(async move {
                service
                    .submit(id.as_str(), JsonRpcRequest::new(7, "resources/list", None))
                    .await
            })
        };

        entered.notified().await;
        drop(stream);
        gate.notify_one();

        assert_eq!(submit.await.unwrap(), Ok(Submission::Dropped));
        assert_eq!(service.registry().state(id.as_str()), Some(SessionState::Closed));
    }

    #[tokio::test]
    async fn test_terminate_and_shutdown() {
        let service = service();
        let id = service.initiate().unwrap();
        let (channel, _stream) = service.connect(id.as_str()).unwrap();

        assert!(service.terminate(id.as_str()));
        assert!(!service.terminate(id.as_str()));
        assert!(channel.is_closed());

        service.initiate().unwrap();
        service.shutdown();
        assert!(service.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_pending_sessions() {
        let service = McpService::new(
            Arc::new(StaticCatalog::sample()),
            RegistrySettings {
                pending_grace: Duration::from_secs(20),
                ..RegistrySettings::default()
            },
        );
        let sweeper = service.spawn_sweeper(Duration::from_secs(10));
        let id = service.initiate().unwrap();

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(service.registry().state(id.as_str()), None);

        service.shutdown();
        sweeper.await.unwrap();
    }
}
