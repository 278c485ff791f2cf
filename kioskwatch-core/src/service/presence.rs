//! Presence maps for connected kiosks and monitors.
//!
//! Each entry couples the client's stable id with the connection handle
//! and a bounded outbound channel to that connection's writer task.
//! Sends use `try_send`: a full queue means a stuck client, and dropping
//! the event is preferred over blocking the signaling loop.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::{ConnectionId, KioskId, MonitorId};
use crate::protocol::{KioskSummary, ServerEvent};

/// Outbound channel to one connection's writer task
pub type EventSender = mpsc::Sender<ServerEvent>;

/// One online client
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub connection_id: ConnectionId,
    pub sender: EventSender,
    pub connected_at: DateTime<Utc>,
}

impl PresenceEntry {
    #[must_use]
    pub fn new(connection_id: ConnectionId, sender: EventSender) -> Self {
        Self {
            connection_id,
            sender,
            connected_at: Utc::now(),
        }
    }
}

/// Connected kiosks and monitors, keyed by their stable client ids.
///
/// At most one entry per client id: a newer registration displaces the
/// older connection.
#[derive(Debug, Default)]
pub struct PresenceMap {
    kiosks: DashMap<KioskId, PresenceEntry>,
    monitors: DashMap<MonitorId, PresenceEntry>,
}

impl PresenceMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or displace the kiosk entry. Returns the displaced entry
    /// when a previous connection existed.
    pub fn register_kiosk(&self, kiosk_id: KioskId, entry: PresenceEntry) -> Option<PresenceEntry> {
        self.kiosks.insert(kiosk_id, entry)
    }

    /// Insert or displace the monitor entry
    pub fn register_monitor(
        &self,
        monitor_id: MonitorId,
        entry: PresenceEntry,
    ) -> Option<PresenceEntry> {
        self.monitors.insert(monitor_id, entry)
    }

    /// Remove the kiosk entry, but only if it still belongs to the given
    /// connection (a displaced connection must not evict its successor)
    pub fn unregister_kiosk(&self, kiosk_id: &KioskId, connection_id: &ConnectionId) -> bool {
        self.kiosks
            .remove_if(kiosk_id, |_, entry| entry.connection_id == *connection_id)
            .is_some()
    }

    pub fn unregister_monitor(&self, monitor_id: &MonitorId, connection_id: &ConnectionId) -> bool {
        self.monitors
            .remove_if(monitor_id, |_, entry| entry.connection_id == *connection_id)
            .is_some()
    }

    pub fn kiosk_online(&self, kiosk_id: &KioskId) -> bool {
        self.kiosks.contains_key(kiosk_id)
    }

    pub fn kiosk_connection(&self, kiosk_id: &KioskId) -> Option<ConnectionId> {
        self.kiosks.get(kiosk_id).map(|e| e.connection_id.clone())
    }

    /// Snapshot of online kiosks for list events
    pub fn kiosk_summaries(&self) -> Vec<KioskSummary> {
        let mut kiosks: Vec<KioskSummary> = self
            .kiosks
            .iter()
            .map(|entry| KioskSummary {
                kiosk_id: entry.key().clone(),
                connected_at: entry.connected_at,
            })
            .collect();
        kiosks.sort_by(|a, b| a.kiosk_id.as_str().cmp(b.kiosk_id.as_str()));
        kiosks
    }

    /// Send an event to one kiosk. Drops the event (with a warning) when
    /// the kiosk is offline or its queue is full.
    pub fn send_to_kiosk(&self, kiosk_id: &KioskId, event: ServerEvent) {
        if let Some(entry) = self.kiosks.get(kiosk_id) {
            Self::try_send(&entry.sender, kiosk_id.as_str(), event);
        } else {
            debug!(kiosk_id = %kiosk_id, "Dropping event for offline kiosk");
        }
    }

    /// Send an event to one monitor
    pub fn send_to_monitor(&self, monitor_id: &MonitorId, event: ServerEvent) {
        if let Some(entry) = self.monitors.get(monitor_id) {
            Self::try_send(&entry.sender, monitor_id.as_str(), event);
        } else {
            debug!(monitor_id = %monitor_id, "Dropping event for offline monitor");
        }
    }

    /// Broadcast an event to every connected monitor. Returns how many
    /// queues accepted it.
    pub fn broadcast_to_monitors(&self, event: &ServerEvent) -> usize {
        let mut sent = 0;
        for entry in self.monitors.iter() {
            match entry.sender.try_send(event.clone()) {
                Ok(()) => sent += 1,
                Err(err) => warn!(
                    monitor_id = %entry.key(),
                    event_type = event.event_type(),
                    error = %err,
                    "Failed to deliver broadcast to monitor"
                ),
            }
        }
        sent
    }

    fn try_send(sender: &EventSender, target: &str, event: ServerEvent) {
        let event_type = event.event_type();
        if let Err(err) = sender.try_send(event) {
            warn!(
                target_id = %target,
                event_type,
                error = %err,
                "Failed to deliver event, dropping"
            );
        }
    }

    pub fn kiosk_count(&self) -> usize {
        self.kiosks.len()
    }

    pub fn monitor_count(&self) -> usize {
        self.monitors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(conn: &str) -> (PresenceEntry, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(8);
        (PresenceEntry::new(ConnectionId::from(conn), tx), rx)
    }

    #[tokio::test]
    async fn test_register_displaces_older_connection() {
        let presence = PresenceMap::new();
        let (first, _rx1) = entry("c1");
        let (second, _rx2) = entry("c2");

        assert!(presence
            .register_kiosk(KioskId::from("k1"), first)
            .is_none());
        let displaced = presence
            .register_kiosk(KioskId::from("k1"), second)
            .unwrap();
        assert_eq!(displaced.connection_id, ConnectionId::from("c1"));
        assert_eq!(presence.kiosk_count(), 1);
    }

    #[tokio::test]
    async fn test_unregister_requires_matching_connection() {
        let presence = PresenceMap::new();
        let (e, _rx) = entry("c2");
        presence.register_kiosk(KioskId::from("k1"), e);

        // The displaced connection "c1" cannot evict the newer "c2"
        assert!(!presence.unregister_kiosk(&KioskId::from("k1"), &ConnectionId::from("c1")));
        assert!(presence.kiosk_online(&KioskId::from("k1")));

        assert!(presence.unregister_kiosk(&KioskId::from("k1"), &ConnectionId::from("c2")));
        assert!(!presence.kiosk_online(&KioskId::from("k1")));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_monitors() {
        let presence = PresenceMap::new();
        let (e1, mut rx1) = entry("c1");
        let (e2, mut rx2) = entry("c2");
        presence.register_monitor(MonitorId::from("m1"), e1);
        presence.register_monitor(MonitorId::from("m2"), e2);

        let sent = presence.broadcast_to_monitors(&ServerEvent::Pong);
        assert_eq!(sent, 2);
        assert_eq!(rx1.recv().await.unwrap(), ServerEvent::Pong);
        assert_eq!(rx2.recv().await.unwrap(), ServerEvent::Pong);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let presence = PresenceMap::new();
        let (tx, _rx) = mpsc::channel(1);
        presence.register_monitor(
            MonitorId::from("m1"),
            PresenceEntry::new(ConnectionId::from("c1"), tx),
        );

        assert_eq!(presence.broadcast_to_monitors(&ServerEvent::Pong), 1);
        // Queue now full; the next broadcast drops instead of blocking
        assert_eq!(presence.broadcast_to_monitors(&ServerEvent::Pong), 0);
    }

    #[tokio::test]
    async fn test_kiosk_summaries_sorted() {
        let presence = PresenceMap::new();
        let (e1, _r1) = entry("c1");
        let (e2, _r2) = entry("c2");
        presence.register_kiosk(KioskId::from("k2"), e1);
        presence.register_kiosk(KioskId::from("k1"), e2);

        let summaries = presence.kiosk_summaries();
        let ids: Vec<&str> = summaries.iter().map(|s| s.kiosk_id.as_str()).collect();
        assert_eq!(ids, vec!["k1", "k2"]);
    }
}
