//! Room-scoped fan-out over the per-connection outboxes.
//!
//! Delivery is best effort: a full or closed outbox loses that one event and
//! the publisher moves on. Clients recover by re-fetching the board.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use shared::{
    domain::{BoardId, ConnectionId},
    protocol::ServerEvent,
};
use tokio::{sync::mpsc::error::TrySendError, task::JoinHandle};
use tracing::{debug, info};

use crate::registry::{Outbox, RoomRegistry};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

pub struct Broadcaster {
    registry: Arc<RoomRegistry>,
    counters: Counters,
}

impl Broadcaster {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self {
            registry,
            counters: Counters::default(),
        }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Sends `event` to every connection in `board_id`'s room except
    /// `exclude`. Returns how many outboxes accepted it.
    pub fn publish(
        &self,
        board_id: BoardId,
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        let recipients = self.registry.recipients(board_id, exclude);
        let event = Arc::new(event);
        let delivered = recipients
            .iter()
            .filter(|(connection_id, outbox)| self.deliver(*connection_id, outbox, &event))
            .count();
        debug!(
            board_id = %board_id,
            event = event.name(),
            recipients = recipients.len(),
            delivered,
            "event published"
        );
        delivered
    }

    /// Direct reply to a single connection, outside any room.
    pub fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        let Some(outbox) = self.registry.outbox(connection_id) else {
            return false;
        };
        self.deliver(connection_id, &outbox, &Arc::new(event))
    }

    pub fn ping_all(&self) -> usize {
        let event = Arc::new(ServerEvent::Ping {
            timestamp: Utc::now().timestamp_millis(),
        });
        self.registry
            .all_outboxes()
            .iter()
            .filter(|(connection_id, outbox)| self.deliver(*connection_id, outbox, &event))
            .count()
    }

    /// Pings every connection each `interval` until the handle is aborted.
    pub fn spawn_heartbeat(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let broadcaster = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let reached = broadcaster.ping_all();
                debug!(reached, "heartbeat");
            }
        })
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    fn deliver(
        &self,
        connection_id: ConnectionId,
        outbox: &Outbox,
        event: &Arc<ServerEvent>,
    ) -> bool {
        match outbox.try_send(Arc::clone(event)) {
            Ok(()) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                info!(connection_id = %connection_id, event = event.name(), "outbox full, event dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(connection_id = %connection_id, "outbox closed");
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/broadcast_tests.rs"]
mod tests;
