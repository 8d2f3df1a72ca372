//! Per-connection event channel.
//!
//! An [`EventChannel`] owns the write side of one SSE connection. The read
//! side is a [`FrameStream`] handed to the HTTP layer; dropping it (the peer
//! went away) closes the channel and detaches it from its session.

use futures::stream::{Stream, StreamExt};
use parking_lot::Mutex;
use sluice_types::Frame;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::session::SessionId;

/// Process-unique identity of a channel.
pub type ChannelId = u64;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Called once when a channel closes, with its session and channel id.
pub type CloseHook = Box<dyn FnOnce(&SessionId, ChannelId) + Send>;

/// Default interval between keepalive frames.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// Default number of frames buffered per channel.
pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel closed")]
    Closed,
}

/// Tunables for a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    pub keepalive_interval: Duration,
    pub capacity: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            keepalive_interval: DEFAULT_KEEPALIVE,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Write side of one push connection.
pub struct EventChannel {
    id: ChannelId,
    session_id: SessionId,
    /// Held for the whole of a write so concurrent senders never interleave.
    sink: tokio::sync::Mutex<mpsc::Sender<Frame>>,
    /// Longest a single write may wait for queue space.
    write_timeout: Duration,
    closed: AtomicBool,
    cancel: CancellationToken,
    on_close: Mutex<Option<CloseHook>>,
}

impl EventChannel {
    /// Open a channel for `session_id` and start its keepalive task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(
        session_id: SessionId,
        settings: &ChannelSettings,
        on_close: Option<CloseHook>,
    ) -> (Arc<Self>, FrameStream) {
        let (tx, rx) = mpsc::channel(settings.capacity.max(1));
        let channel = Self::with_sink(session_id, tx, settings.keepalive_interval, on_close);
        let stream = FrameStream::new(rx, &channel);
        (channel, stream)
    }

    fn with_sink(
        session_id: SessionId,
        sink: mpsc::Sender<Frame>,
        keepalive_interval: Duration,
        on_close: Option<CloseHook>,
    ) -> Arc<Self> {
        let channel = Arc::new(Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            session_id,
            sink: tokio::sync::Mutex::new(sink),
            write_timeout: keepalive_interval,
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            on_close: Mutex::new(on_close),
        });

        tokio::spawn(keepalive_loop(
            Arc::downgrade(&channel),
            channel.cancel.clone(),
            keepalive_interval,
        ));
        debug!(
            "Opened channel {} for session {}",
            channel.id, channel.session_id
        );
        channel
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Queue one frame. Frames are delivered in the order `send` completes.
    ///
    /// A failed write closes the channel. A write that cannot be queued
    /// within one keepalive interval (the reader stalled) counts as failed.
    pub async fn send(&self, frame: Frame) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let sink = self.sink.lock().await;
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let delivered = tokio::select! {
            result = tokio::time::timeout(self.write_timeout, sink.send(frame)) => match result {
                Ok(sent) => sent.is_ok(),
                Err(_) => {
                    debug!(
                        "Write to session {} stalled for {:?}",
                        self.session_id, self.write_timeout
                    );
                    false
                }
            },
            _ = self.cancel.cancelled() => false,
        };
        drop(sink);

        if delivered {
            Ok(())
        } else {
            self.close();
            Err(ChannelError::Closed)
        }
    }

    /// Close the channel. Idempotent; only the first call runs the close hook.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        debug!(
            "Closed channel {} for session {}",
            self.id, self.session_id
        );

        let hook = self.on_close.lock().take();
        if let Some(hook) = hook {
            hook(&self.session_id, self.id);
        }
    }
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn keepalive_loop(channel: Weak<EventChannel>, cancel: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(channel) = channel.upgrade() else {
                    break;
                };
                trace!("Keepalive for session {}", channel.session_id);
                if channel.send(Frame::keepalive()).await.is_err() {
                    debug!(
                        "Keepalive failed for session {}, channel closed",
                        channel.session_id
                    );
                    break;
                }
            }
        }
    }
}

/// Read side of a channel, consumed by the HTTP response body.
///
/// Ends when the channel closes. Dropping it closes the channel.
pub struct FrameStream {
    inner: Pin<Box<dyn Stream<Item = Frame> + Send>>,
    channel: Weak<EventChannel>,
}

impl FrameStream {
    fn new(rx: mpsc::Receiver<Frame>, channel: &Arc<EventChannel>) -> Self {
        let inner = ReceiverStream::new(rx).take_until(channel.cancel.clone().cancelled_owned());
        Self {
            inner: Box::pin(inner),
            channel: Arc::downgrade(channel),
        }
    }
}

impl Stream for FrameStream {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.upgrade() {
            channel.close();
        }
    }
}
