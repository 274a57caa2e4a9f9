//! Broadcast hub implementation
//!
//! The central registry that tracks every connected viewer and fans frames
//! from the live feed out to the ones that are streaming.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::media::{Frame, GopCache};
use crate::protocol::{ServerNotice, StreamEndReason};
use crate::session::SessionState;
use crate::stats::{ClientStats, RelayMetrics};

use super::config::HubConfig;
use super::entry::{ClientEntry, ClientId, Delivery, StartOutcome};
use super::error::HubError;

/// What happened to one published frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Clients the frame (and any leading parameter sets) was queued for
    pub delivered: usize,
    /// Streaming clients still waiting for a key frame
    pub withheld: usize,
    /// Clients removed for staying saturated
    pub overflowed: Vec<ClientId>,
}

/// Registry of viewers and fan-out point for the live feed
///
/// Lock order is feed cache, then registry, then per-client state. Publishing
/// holds the feed cache for the whole fan-out, so a start request never sees
/// a frame half-distributed.
pub struct BroadcastHub {
    /// Map of client id to client entry
    clients: RwLock<HashMap<ClientId, Arc<ClientEntry>>>,

    /// Parameter sets and GOP of the live feed
    feed: Mutex<GopCache>,

    /// Configuration
    config: HubConfig,

    metrics: Arc<RelayMetrics>,
}

impl BroadcastHub {
    /// Create a hub with default configuration
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    pub fn with_config(config: HubConfig) -> Self {
        Self::with_metrics(config, Arc::new(RelayMetrics::new()))
    }

    /// Create a hub that reports into shared metrics
    pub fn with_metrics(config: HubConfig, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            feed: Mutex::new(GopCache::with_max_size(config.max_gop_bytes)),
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    /// Register a client in the Idle state
    pub async fn add_client(
        &self,
        id: ClientId,
        peer_addr: SocketAddr,
    ) -> Result<Arc<ClientEntry>, HubError> {
        let mut clients = self.clients.write().await;
        if clients.contains_key(&id) {
            return Err(HubError::ClientAlreadyRegistered(id));
        }

        let entry = Arc::new(ClientEntry::new(id, peer_addr, self.config.queue_capacity));
        clients.insert(id, Arc::clone(&entry));

        tracing::info!(
            client_id = id,
            peer = %peer_addr,
            clients = clients.len(),
            "Client added"
        );

        Ok(entry)
    }

    /// Remove a client and close its queue
    ///
    /// Returns false if the client was not registered. Once this returns, no
    /// publish can reach the removed client.
    pub async fn remove_client(&self, id: ClientId) -> bool {
        let removed = self.clients.write().await.remove(&id);

        match removed {
            Some(entry) => {
                entry.close();
                tracing::info!(client_id = id, "Client removed");
                true
            }
            None => false,
        }
    }

    pub async fn get_client(&self, id: ClientId) -> Option<Arc<ClientEntry>> {
        self.clients.read().await.get(&id).cloned()
    }

    /// Idle → Streaming
    ///
    /// With GOP replay enabled and a complete GOP cached, the client is sent
    /// the parameter sets and the GOP right away. Otherwise it waits for the
    /// next key frame.
    pub async fn set_streaming(&self, id: ClientId) -> Result<StartOutcome, HubError> {
        let feed = self.feed.lock().await;
        let clients = self.clients.read().await;
        let entry = clients.get(&id).ok_or(HubError::ClientNotFound(id))?;

        let catchup = (self.config.gop_replay && feed.is_ready()).then(|| feed.catchup_frames());
        let outcome =
            entry.start_streaming(catchup, self.config.overflow_timeout, &self.metrics)?;

        tracing::info!(client_id = id, outcome = ?outcome, "Client streaming");
        Ok(outcome)
    }

    /// Streaming → Idle; returns whether the client was streaming
    pub async fn set_idle(&self, id: ClientId) -> Result<bool, HubError> {
        let clients = self.clients.read().await;
        let entry = clients.get(&id).ok_or(HubError::ClientNotFound(id))?;

        let was_streaming = entry.stop_streaming()?;
        if was_streaming {
            tracing::info!(client_id = id, "Client stopped streaming");
        }
        Ok(was_streaming)
    }

    /// Queue a notice for one client
    pub async fn notify(&self, id: ClientId, notice: ServerNotice) -> Result<(), HubError> {
        let clients = self.clients.read().await;
        let entry = clients.get(&id).ok_or(HubError::ClientNotFound(id))?;
        if entry.notify(notice) {
            Ok(())
        } else {
            Err(HubError::ClientClosed(id))
        }
    }

    /// Fan a frame out to every streaming client
    ///
    /// Only enqueues; never waits on a client. Clients that stayed saturated
    /// past the overflow timeout are removed before returning.
    pub async fn publish(&self, frame: Frame) -> PublishReport {
        let mut report = PublishReport::default();
        {
            let mut feed = self.feed.lock().await;
            feed.push(frame.clone());
            self.metrics.record_published(&frame);

            let clients = self.clients.read().await;
            for entry in clients.values() {
                match entry.deliver(
                    &frame,
                    feed.parameter_sets(),
                    self.config.overflow_timeout,
                    &self.metrics,
                ) {
                    Delivery::Queued(_) => report.delivered += 1,
                    Delivery::Withheld => {
                        report.withheld += 1;
                        self.metrics.record_withheld();
                    }
                    Delivery::Overflowed => report.overflowed.push(entry.id()),
                    Delivery::Skipped | Delivery::Closed => {}
                }
            }
        }

        for &id in &report.overflowed {
            let err = HubError::QueueOverflow(id);
            tracing::warn!(client_id = id, error = %err, "Dropping slow client");
            self.metrics.record_overflow();
            self.remove_client(id).await;
        }

        report
    }

    /// The feed ended: notify every streaming client once and clear caches
    ///
    /// Returns the number of clients notified.
    pub async fn end_stream(&self, reason: StreamEndReason) -> usize {
        let mut feed = self.feed.lock().await;
        feed.clear();

        let notice = ServerNotice::StreamEnded {
            reason: reason.clone(),
        };
        let clients = self.clients.read().await;
        let notified = clients
            .values()
            .filter(|entry| entry.end_stream(notice.clone()))
            .count();

        tracing::info!(reason = %reason, notified, "Stream ended");
        notified
    }

    /// Total number of registered clients
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Number of clients currently streaming
    pub async fn streaming_count(&self) -> usize {
        self.clients
            .read()
            .await
            .values()
            .filter(|entry| entry.state().is_streaming())
            .count()
    }

    pub async fn client_state(&self, id: ClientId) -> Option<SessionState> {
        self.clients.read().await.get(&id).map(|entry| entry.state())
    }

    pub async fn client_stats(&self, id: ClientId) -> Option<ClientStats> {
        self.clients.read().await.get(&id).map(|entry| entry.stats())
    }

    /// Whether a late joiner could be served from the cache right now
    pub async fn has_cached_gop(&self) -> bool {
        self.feed.lock().await.is_ready()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}
