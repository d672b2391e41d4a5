//! Live-feed subscription broadcaster.
//!
//! Keeps, per subscriber key (user id), the set of currently open live-feed
//! channels, and fans feed events out to every channel of a list of target
//! keys. Delivery is best effort: a channel that fails a delivery is pruned
//! and its client is expected to reconnect and re-fetch the feed.
//!
//! The registry is a `DashMap<key, Vec<Arc<Channel>>>`; the per-key vector is
//! the unit of synchronization. A publish clones the vector under the shard
//! lock (consistent snapshot), delivers outside of it, then prunes dead
//! channels in one more locked pass.

pub mod channel;
pub mod event;

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;

pub use channel::{Channel, ChannelId, DeliveryError, Subscription};
pub use event::FeedEvent;

/// Default channel lifetime before it closes itself (5 minutes).
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(300);

/// Default upper bound on a single delivery attempt.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(1);

/// Default per-channel outbound queue size.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Tunables for a [`Broadcaster`].
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// How long a channel stays open before it closes itself.
    pub keep_alive: Duration,
    /// How long a publish waits for room in one slow subscriber's queue.
    pub delivery_timeout: Duration,
    /// Events buffered per channel before deliveries start waiting.
    pub channel_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            keep_alive: DEFAULT_KEEP_ALIVE,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Outcome of one [`Broadcaster::publish`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Successful deliveries (a channel counts once per target occurrence).
    pub delivered: usize,
    /// Channels removed because their delivery failed.
    pub pruned: usize,
}

type Registry = DashMap<String, Vec<Arc<Channel>>>;

struct Inner {
    registry: Registry,
    settings: BroadcastSettings,
}

/// Handle to the process-wide subscription registry. Cheap to clone.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

impl Broadcaster {
    pub fn new(settings: BroadcastSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: DashMap::new(),
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &BroadcastSettings {
        &self.inner.settings
    }

    /// Open a new channel for `key` and return its subscriber handle.
    ///
    /// Must be called from within a tokio runtime: each channel gets a small
    /// watchdog task that unregisters it on keep-alive expiry or disconnect.
    pub fn subscribe(&self, key: &str) -> Subscription {
        let settings = &self.inner.settings;
        let (channel, subscription) =
            Channel::open(key, settings.channel_capacity, settings.keep_alive);

        let count = {
            let mut channels = self.inner.registry.entry(key.to_string()).or_default();
            channels.push(channel.clone());
            channels.len()
        };

        tracing::debug!(
            user = %key,
            channel = %channel.id(),
            channels = count,
            "Channel subscribed"
        );

        spawn_watchdog(Arc::downgrade(&self.inner), channel);
        subscription
    }

    /// Remove a channel from `key`'s set and close it. Idempotent.
    ///
    /// Returns true if the channel was still registered.
    pub fn unsubscribe(&self, key: &str, id: ChannelId) -> bool {
        let removed = remove_channels(&self.inner.registry, key, &[id]);
        for channel in &removed {
            channel.close();
        }
        if !removed.is_empty() {
            tracing::debug!(user = %key, channel = %id, "Channel unsubscribed");
        }
        !removed.is_empty()
    }

    /// Deliver `event` to every channel registered under each of `target_keys`.
    ///
    /// Keys are not de-duplicated. Channel sets are snapshotted up front, all
    /// deliveries run concurrently, and channels whose delivery failed are
    /// pruned once every attempt has finished. Never fails as a whole.
    pub async fn publish<K: AsRef<str>>(
        &self,
        target_keys: &[K],
        event: &FeedEvent,
    ) -> PublishReport {
        let timeout = self.inner.settings.delivery_timeout;

        let mut targets: Vec<Arc<Channel>> = Vec::new();
        for key in target_keys {
            if let Some(channels) = self.inner.registry.get(key.as_ref()) {
                targets.extend(channels.value().iter().cloned());
            }
        }

        let attempts = targets.into_iter().map(|channel| async move {
            let result = channel.deliver(event.clone(), timeout).await;
            (channel, result)
        });
        let results = join_all(attempts).await;

        let mut report = PublishReport::default();
        let mut dead: HashMap<String, Vec<ChannelId>> = HashMap::new();
        for (channel, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::debug!(
                        user = %channel.key(),
                        channel = %channel.id(),
                        post_id = event.id,
                        error = %e,
                        "Dropping stale channel"
                    );
                    dead.entry(channel.key().to_string())
                        .or_default()
                        .push(channel.id());
                }
            }
        }

        for (key, ids) in dead {
            let removed = remove_channels(&self.inner.registry, &key, &ids);
            for channel in &removed {
                channel.close();
            }
            report.pruned += removed.len();
        }

        report
    }

    /// Number of live channels registered under `key`.
    pub fn channel_count(&self, key: &str) -> usize {
        self.inner
            .registry
            .get(key)
            .map(|channels| channels.len())
            .unwrap_or(0)
    }

    /// Number of keys with at least one live channel.
    pub fn key_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Close every channel and empty the registry. All live streams end.
    pub fn shutdown(&self) {
        let keys: Vec<String> = self
            .inner
            .registry
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let mut closed = 0;
        for key in keys {
            if let Some((_, channels)) = self.inner.registry.remove(&key) {
                closed += channels.iter().filter(|channel| channel.close()).count();
            }
        }

        tracing::info!(channels = closed, "Broadcaster shut down");
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(BroadcastSettings::default())
    }
}

/// Take the channels with the given ids out of `key`'s set, evicting the
/// entry if it ends up empty.
fn remove_channels(registry: &Registry, key: &str, ids: &[ChannelId]) -> Vec<Arc<Channel>> {
    let mut removed = Vec::new();

    // The shard guard must be released before remove_if takes it again.
    if let Some(mut channels) = registry.get_mut(key) {
        channels.retain(|channel| {
            if ids.contains(&channel.id()) {
                removed.push(channel.clone());
                false
            } else {
                true
            }
        });
    }

    registry.remove_if(key, |_, channels| channels.is_empty());
    removed
}

/// Unregister `channel` when its deadline passes, it gets closed, or its
/// subscriber handle is dropped.
fn spawn_watchdog(registry: Weak<Inner>, channel: Arc<Channel>) {
    tokio::spawn(async move {
        let expired = tokio::select! {
            _ = tokio::time::sleep_until(channel.deadline()) => true,
            _ = channel.wait_closed() => false,
        };

        if let Some(inner) = registry.upgrade() {
            remove_channels(&inner.registry, channel.key(), &[channel.id()]);
        }
        channel.close();

        if expired {
            let age = chrono::Utc::now() - channel.created_at();
            tracing::debug!(
                user = %channel.key(),
                channel = %channel.id(),
                age_secs = age.num_seconds(),
                "Channel keep-alive expired"
            );
        }
    });
}
