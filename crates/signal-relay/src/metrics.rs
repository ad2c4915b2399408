//! Relay-level metrics.
//!
//! Counters and gauges are kept in atomics for cheap snapshots (the
//! `/ready` surface and tests read them directly) and mirrored to the
//! `metrics` facade with the `relay_` prefix for the Prometheus
//! exporter.

use metrics::{counter, gauge};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared relay metrics.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Currently connected sessions.
    sessions: AtomicUsize,
    /// Currently live rooms.
    rooms: AtomicUsize,
    /// Signals forwarded to a connected target.
    signals_relayed: AtomicU64,
    /// Signals dropped because the target was gone.
    signals_dropped: AtomicU64,
}

/// Point-in-time view of the relay metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sessions: usize,
    pub rooms: usize,
    pub signals_relayed: u64,
    pub signals_dropped: u64,
}

impl RelayMetrics {
    /// Create shared metrics.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a new session connection.
    pub fn session_connected(&self) {
        let count = self.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        #[allow(clippy::cast_precision_loss)]
        gauge!("relay_active_sessions").set(count as f64);
    }

    /// Record a session disconnect.
    pub fn session_disconnected(&self) {
        let count = self.sessions.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        #[allow(clippy::cast_precision_loss)]
        gauge!("relay_active_sessions").set(count as f64);
    }

    /// Record an implicitly created room.
    pub fn room_created(&self) {
        let count = self.rooms.fetch_add(1, Ordering::Relaxed) + 1;
        #[allow(clippy::cast_precision_loss)]
        gauge!("relay_active_rooms").set(count as f64);
    }

    /// Record a room removed after its last member left.
    pub fn room_removed(&self) {
        let count = self.rooms.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        #[allow(clippy::cast_precision_loss)]
        gauge!("relay_active_rooms").set(count as f64);
    }

    /// Record a signal forwarded to its target.
    pub fn signal_relayed(&self) {
        self.signals_relayed.fetch_add(1, Ordering::Relaxed);
        counter!("relay_signals_relayed_total").increment(1);
    }

    /// Record a signal dropped because the target was not connected.
    pub fn signal_dropped(&self) {
        self.signals_dropped.fetch_add(1, Ordering::Relaxed);
        counter!("relay_signals_dropped_total").increment(1);
    }

    /// Take a point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions: self.sessions.load(Ordering::Relaxed),
            rooms: self.rooms.load(Ordering::Relaxed),
            signals_relayed: self.signals_relayed.load(Ordering::Relaxed),
            signals_dropped: self.signals_dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_tracks_counts() {
        let metrics = RelayMetrics::new();
        metrics.session_connected();
        metrics.session_connected();
        metrics.room_created();
        metrics.signal_relayed();
        metrics.signal_dropped();
        metrics.session_disconnected();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions, 1);
        assert_eq!(snapshot.rooms, 1);
        assert_eq!(snapshot.signals_relayed, 1);
        assert_eq!(snapshot.signals_dropped, 1);
    }
}
