//! Session registry.
//!
//! The registry is the only authority on which session id currently owns a
//! live event channel. Sessions are identified by 128 bits from the OS
//! random number generator, rendered as lowercase hex.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::TryRngCore;
use serde::Serialize;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::channel::{ChannelId, ChannelSettings, CloseHook, EventChannel, FrameStream};
use super::state::{SessionEvent, SessionState};
use sluice_types::error_codes;

const SESSION_ID_BYTES: usize = 16;

/// Default time a session may stay Pending before it is evicted.
pub const DEFAULT_PENDING_GRACE: Duration = Duration::from_secs(60);

/// Default time a Closed session is kept for re-attach before eviction.
pub const DEFAULT_EXPIRED_GRACE: Duration = Duration::from_secs(30);

/// Opaque session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh id from the OS entropy source.
    fn generate() -> Result<Self, SessionError> {
        let mut bytes = [0u8; SESSION_ID_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| SessionError::Entropy(e.to_string()))?;
        Ok(Self(bytes.iter().map(|b| format!("{:02x}", b)).collect()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Error type for registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session not bound to an event stream: {0}")]
    NotBound(String),

    #[error("Session already bound to an event stream: {0}")]
    AlreadyBound(String),

    #[error("Entropy source failure: {0}")]
    Entropy(String),
}

impl SessionError {
    /// JSON-RPC error code reported to the client.
    pub fn code(&self) -> i32 {
        match self {
            SessionError::NotFound(_) => error_codes::SESSION_NOT_FOUND,
            SessionError::NotBound(_) => error_codes::SESSION_NOT_BOUND,
            SessionError::AlreadyBound(_) => error_codes::SESSION_ALREADY_BOUND,
            SessionError::Entropy(_) => error_codes::INTERNAL_ERROR,
        }
    }
}

/// Registry timing and channel configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySettings {
    pub pending_grace: Duration,
    pub expired_grace: Duration,
    pub channel: ChannelSettings,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            pending_grace: DEFAULT_PENDING_GRACE,
            expired_grace: DEFAULT_EXPIRED_GRACE,
            channel: ChannelSettings::default(),
        }
    }
}

struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    opened_at: Instant,
    state: SessionState,
    channel: Option<Arc<EventChannel>>,
    last_activity: Instant,
    closed_at: Option<Instant>,
}

impl Session {
    fn new(id: SessionId) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: Utc::now(),
            opened_at: now,
            state: SessionState::Pending,
            channel: None,
            last_activity: now,
            closed_at: None,
        }
    }

    fn live_channel(&self) -> Option<&Arc<EventChannel>> {
        self.channel.as_ref().filter(|channel| !channel.is_closed())
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            created_at: self.created_at,
            state: self.state,
            channel_id: self.live_channel().map(|channel| channel.id()),
            idle_secs: self.last_activity.elapsed().as_secs(),
        }
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    pub idle_secs: u64,
}

struct RegistryInner {
    sessions: RwLock<HashMap<SessionId, Session>>,
    settings: RegistrySettings,
}

/// Process-wide session table. Cheap to clone.
///
/// No operation holds the lock across an `.await`, and channels are only
/// closed after the lock has been released (closing calls back into
/// [`SessionRegistry::detach`]).
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(settings: RegistrySettings) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: RwLock::new(HashMap::new()),
                settings,
            }),
        }
    }

    /// Create a Pending session and return its id.
    pub fn create(&self) -> Result<SessionId, SessionError> {
        let mut sessions = self.inner.sessions.write();
        let id = loop {
            let candidate = SessionId::generate()?;
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
            warn!("Session id collision, regenerating");
        };
        sessions.insert(id.clone(), Session::new(id.clone()));
        drop(sessions);

        info!("Created session: {}", id);
        Ok(id)
    }

    /// Open a new channel for `id`. The channel detaches itself from this
    /// registry when it closes. It is not attached until [`attach`](Self::attach).
    pub fn open_channel(&self, id: &SessionId) -> (Arc<EventChannel>, FrameStream) {
        let registry = Arc::downgrade(&self.inner);
        let hook: CloseHook = Box::new(move |session_id, channel_id| {
            if let Some(inner) = Weak::upgrade(&registry) {
                SessionRegistry { inner }.detach(session_id.as_str(), channel_id);
            }
        });
        EventChannel::open(id.clone(), &self.inner.settings.channel, Some(hook))
    }

    /// Bind `channel` to a Pending or Closed session.
    pub fn attach(&self, id: &str, channel: Arc<EventChannel>) -> Result<(), SessionError> {
        let mut sessions = self.inner.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        if session.live_channel().is_some() {
            return Err(SessionError::AlreadyBound(id.to_string()));
        }
        if session.channel.take().is_some() {
            // Previous channel closed but its detach has not landed yet.
            session.state = SessionState::Closed;
        }

        session.state = session
            .state
            .apply(SessionEvent::Attach)
            .map_err(|_| SessionError::AlreadyBound(id.to_string()))?;
        session.channel = Some(channel);
        session.closed_at = None;
        session.last_activity = Instant::now();
        drop(sessions);

        info!("Attached event stream to session: {}", id);
        Ok(())
    }

    /// Live channel of a session.
    pub fn lookup(&self, id: &str) -> Result<Arc<EventChannel>, SessionError> {
        let mut sessions = self.inner.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let channel = session
            .live_channel()
            .filter(|_| session.state.accepts_requests())
            .cloned()
            .ok_or_else(|| SessionError::NotBound(id.to_string()))?;
        session.last_activity = Instant::now();
        Ok(channel)
    }

    /// Mark a session Closed after its channel went away.
    ///
    /// Ignored unless `channel_id` is the channel currently attached.
    pub fn detach(&self, id: &str, channel_id: ChannelId) -> bool {
        let mut sessions = self.inner.sessions.write();
        let Some(session) = sessions.get_mut(id) else {
            return false;
        };
        if session.channel.as_ref().map(|channel| channel.id()) != Some(channel_id) {
            return false;
        }
        let Ok(next) = session.state.apply(SessionEvent::Detach) else {
            return false;
        };
        session.state = next;
        session.channel = None;
        session.closed_at = Some(Instant::now());
        drop(sessions);

        info!("Event stream closed for session: {}", id);
        true
    }

    /// Record a completed initialize handshake on the given channel.
    pub fn mark_ready(
        &self,
        id: &str,
        channel_id: ChannelId,
    ) -> Result<SessionState, SessionError> {
        let mut sessions = self.inner.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        if session.live_channel().map(|channel| channel.id()) != Some(channel_id) {
            return Err(SessionError::NotBound(id.to_string()));
        }
        session.state = session
            .state
            .apply(SessionEvent::Initialized)
            .map_err(|_| SessionError::NotBound(id.to_string()))?;
        debug!("Session {} marked as ready", id);
        Ok(session.state)
    }

    /// Remove a session and close its channel. Idempotent.
    pub fn evict(&self, id: &str) -> bool {
        let removed = self.inner.sessions.write().remove(id);
        match removed {
            Some(session) => {
                if let Some(channel) = session.channel {
                    channel.close();
                }
                info!("Evicted session: {}", id);
                true
            }
            None => false,
        }
    }

    pub fn state(&self, id: &str) -> Option<SessionState> {
        self.inner.sessions.read().get(id).map(|session| session.state)
    }

    /// Snapshot of all sessions, oldest first.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.inner.sessions.read().values().map(Session::info).collect();
        sessions.sort_by_key(|info| info.created_at);
        sessions
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.read().is_empty()
    }

    /// Evict Pending sessions past the pending grace and Closed sessions
    /// past the expiry grace. Returns the number evicted.
    pub fn sweep(&self, now: Instant) -> usize {
        let settings = &self.inner.settings;
        let mut removed = Vec::new();
        self.inner.sessions.write().retain(|id, session| {
            let expired = match session.state {
                SessionState::Pending => {
                    now.saturating_duration_since(session.opened_at) >= settings.pending_grace
                }
                SessionState::Closed => session.closed_at.is_some_and(|closed_at| {
                    now.saturating_duration_since(closed_at) >= settings.expired_grace
                }),
                SessionState::Bound | SessionState::Ready => false,
            };
            if expired {
                removed.push((id.clone(), session.state, session.channel.take()));
            }
            !expired
        });

        for (id, state, channel) in &removed {
            if let Some(channel) = channel {
                channel.close();
            }
            info!("Cleaning up {} session: {}", state, id);
        }
        removed.len()
    }

    /// Close every channel and forget every session.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<Session> = self
            .inner
            .sessions
            .write()
            .drain()
            .map(|(_, session)| session)
            .collect();
        for session in &drained {
            if let Some(channel) = &session.channel {
                channel.close();
            }
        }
        if !drained.is_empty() {
            info!("Closed {} sessions on shutdown", drained.len());
        }
        drained.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(RegistrySettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::collections::HashSet;

    fn registry() -> SessionRegistry {
        SessionRegistry::default()
    }

    #[test]
    fn test_create_ids_are_unique_hex() {
        let registry = registry();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let id = registry.create().unwrap();
            assert_eq!(id.as_str().len(), 32);
            assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
            assert!(seen.insert(id));
        }
        assert_eq!(registry.len(), 10_000);
    }

    #[test]
    fn test_create_starts_pending() {
        let registry = registry();
        let id = registry.create().unwrap();
        assert_eq!(registry.state(id.as_str()), Some(SessionState::Pending));
    }

    #[tokio::test]
    async fn test_lookup_distinguishes_not_found_and_not_bound() {
        let registry = registry();
        let id = registry.create().unwrap();

        assert_eq!(
            registry.lookup("unknown").unwrap_err(),
            SessionError::NotFound("unknown".to_string())
        );
        assert_eq!(
            registry.lookup(id.as_str()).unwrap_err(),
            SessionError::NotBound(id.to_string())
        );

        let (channel, _stream) = registry.open_channel(&id);
        registry.attach(id.as_str(), channel.clone()).unwrap();
        assert_eq!(registry.lookup(id.as_str()).unwrap().id(), channel.id());
        assert_eq!(registry.state(id.as_str()), Some(SessionState::Bound));
    }

    #[tokio::test]
    async fn test_attach_unknown_session() {
        let registry = registry();
        let id = SessionId::from("missing");
        let (channel, _stream) = registry.open_channel(&id);
        assert_eq!(
            registry.attach("missing", channel),
            Err(SessionError::NotFound("missing".to_string()))
        );
    }

    #[tokio::test]
    async fn test_second_attach_fails_until_first_channel_closes() {
        let registry = registry();
        let id = registry.create().unwrap();

        let (first, first_stream) = registry.open_channel(&id);
        registry.attach(id.as_str(), first.clone()).unwrap();

        let (second, _second_stream) = registry.open_channel(&id);
        assert_eq!(
            registry.attach(id.as_str(), second.clone()),
            Err(SessionError::AlreadyBound(id.to_string()))
        );

        drop(first_stream);
        assert!(first.is_closed());
        assert_eq!(registry.state(id.as_str()), Some(SessionState::Closed));
        assert!(matches!(
            registry.lookup(id.as_str()),
            Err(SessionError::NotBound(_))
        ));

        registry.attach(id.as_str(), second.clone()).unwrap();
        assert_eq!(registry.state(id.as_str()), Some(SessionState::Bound));
        assert_eq!(registry.lookup(id.as_str()).unwrap().id(), second.id());
    }

    #[tokio::test]
    async fn test_stale_detach_does_not_touch_successor() {
        let registry = registry();
        let id = registry.create().unwrap();

        let (first, _first_stream) = registry.open_channel(&id);
        registry.attach(id.as_str(), first.clone()).unwrap();
        let stale_id = first.id();
        assert!(registry.detach(id.as_str(), stale_id));

        let (second, _second_stream) = registry.open_channel(&id);
        registry.attach(id.as_str(), second.clone()).unwrap();

        assert!(!registry.detach(id.as_str(), stale_id));
        first.close();
        assert_eq!(registry.state(id.as_str()), Some(SessionState::Bound));
        assert_eq!(registry.lookup(id.as_str()).unwrap().id(), second.id());
    }

    #[tokio::test]
    async fn test_mark_ready_requires_current_channel() {
        let registry = registry();
        let id = registry.create().unwrap();
        assert!(registry.mark_ready(id.as_str(), 0).is_err());

        let (channel, _stream) = registry.open_channel(&id);
        registry.attach(id.as_str(), channel.clone()).unwrap();
        assert!(registry.mark_ready(id.as_str(), channel.id() + 1000).is_err());
        assert_eq!(
            registry.mark_ready(id.as_str(), channel.id()),
            Ok(SessionState::Ready)
        );
        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].state, SessionState::Ready);
        assert_eq!(listed[0].channel_id, Some(channel.id()));
    }

    #[tokio::test]
    async fn test_evict_closes_channel_and_is_idempotent() {
        let registry = registry();
        let id = registry.create().unwrap();
        let (channel, mut stream) = registry.open_channel(&id);
        registry.attach(id.as_str(), channel.clone()).unwrap();

        assert!(registry.evict(id.as_str()));
        assert!(!registry.evict(id.as_str()));
        assert!(channel.is_closed());
        assert!(stream.next().await.is_none());
        assert!(matches!(
            registry.lookup(id.as_str()),
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_stale_pending_and_closed() {
        let registry = SessionRegistry::new(RegistrySettings {
            pending_grace: Duration::from_secs(60),
            expired_grace: Duration::from_secs(30),
            channel: ChannelSettings::default(),
        });

        let pending = registry.create().unwrap();
        let bound = registry.create().unwrap();
        let closed = registry.create().unwrap();

        let (bound_channel, _bound_stream) = registry.open_channel(&bound);
        registry.attach(bound.as_str(), bound_channel).unwrap();
        let (closed_channel, closed_stream) = registry.open_channel(&closed);
        registry.attach(closed.as_str(), closed_channel).unwrap();
        drop(closed_stream);

        assert_eq!(registry.sweep(Instant::now()), 0);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(registry.sweep(Instant::now()), 1);
        assert_eq!(registry.state(closed.as_str()), None);
        assert_eq!(registry.state(pending.as_str()), Some(SessionState::Pending));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(registry.sweep(Instant::now()), 1);
        assert_eq!(registry.state(pending.as_str()), None);
        assert_eq!(registry.state(bound.as_str()), Some(SessionState::Bound));
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let registry = registry();
        let id = registry.create().unwrap();
        let (channel, _stream) = registry.open_channel(&id);
        registry.attach(id.as_str(), channel.clone()).unwrap();
        registry.create().unwrap();

        assert_eq!(registry.shutdown(), 2);
        assert!(channel.is_closed());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(SessionError::NotFound("x".into()).code(), -32001);
        assert_eq!(SessionError::NotBound("x".into()).code(), -32002);
        assert_eq!(SessionError::AlreadyBound("x".into()).code(), -32003);
        assert_eq!(SessionError::Entropy("x".into()).code(), -32603);
    }
}
