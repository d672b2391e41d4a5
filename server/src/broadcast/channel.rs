//! A single live-update channel and the subscriber-side handle that drains it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;

use super::event::FeedEvent;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Deadline offset used when `now + keep_alive` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Process-unique channel identifier. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Why a delivery attempt to a channel failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The channel was closed or its subscriber went away.
    Closed,
    /// The subscriber's queue stayed full for the whole delivery timeout.
    TimedOut,
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "channel closed"),
            Self::TimedOut => write!(f, "delivery timed out"),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Server side of one open live-feed connection.
///
/// Held by the registry (and transiently by in-flight publishes). Once every
/// holder drops it, the sender goes away and the subscriber's stream ends.
pub struct Channel {
    id: ChannelId,
    key: String,
    created_at: DateTime<Utc>,
    deadline: Instant,
    sender: mpsc::Sender<FeedEvent>,
    closed: AtomicBool,
    close_signal: Notify,
}

impl Channel {
    pub(crate) fn open(
        key: &str,
        capacity: usize,
        keep_alive: Duration,
    ) -> (Arc<Self>, Subscription) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let now = Instant::now();
        let deadline = now
            .checked_add(keep_alive)
            .unwrap_or_else(|| now + FAR_FUTURE);
        let channel = Arc::new(Self {
            id: ChannelId::next(),
            key: key.to_string(),
            created_at: Utc::now(),
            deadline,
            sender,
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        });
        let subscription = Subscription {
            id: channel.id,
            key: channel.key.clone(),
            receiver,
        };
        (channel, subscription)
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.sender.is_closed()
    }

    /// Queue `event` for the subscriber, waiting at most `timeout` for room.
    pub(crate) async fn deliver(
        &self,
        event: FeedEvent,
        timeout: Duration,
    ) -> Result<(), DeliveryError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DeliveryError::Closed);
        }
        match self.sender.send_timeout(event, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Closed(_)) => Err(DeliveryError::Closed),
            Err(SendTimeoutError::Timeout(_)) => Err(DeliveryError::TimedOut),
        }
    }

    /// Mark the channel closed. Returns false if it was already closed.
    pub(crate) fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            // Single waiter (the watchdog); notify_one keeps the permit if it
            // has not started waiting yet.
            self.close_signal.notify_one();
        }
        first
    }

    /// Resolves once the channel is closed or the subscriber handle is dropped.
    pub(crate) async fn wait_closed(&self) {
        tokio::select! {
            _ = self.close_signal.notified() => {}
            _ = self.sender.closed() => {}
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("created_at", &self.created_at)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Subscriber handle returned by [`Broadcaster::subscribe`](super::Broadcaster::subscribe).
///
/// Dropping it counts as a client disconnect: the channel is unregistered
/// shortly after. `recv` returns `None` once the channel has been closed and
/// every queued event was drained.
#[derive(Debug)]
pub struct Subscription {
    id: ChannelId,
    key: String,
    receiver: mpsc::Receiver<FeedEvent>,
}

impl Subscription {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn recv(&mut self) -> Option<FeedEvent> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<FeedEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn into_stream(self) -> ReceiverStream<FeedEvent> {
        ReceiverStream::new(self.receiver)
    }
}
