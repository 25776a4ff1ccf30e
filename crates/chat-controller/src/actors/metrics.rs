//! Actor metrics and mailbox monitoring.
//!
//! Provides mailbox depth monitoring with configurable thresholds:
//!
//! | Actor Type | Normal | Warning | Critical |
//! |------------|--------|---------|----------|
//! | Room       | < 100  | 100-500 | > 500    |
//! | Connection | < 50   | 50-200  | > 200    |
//!
//! All log events are emitted under the `chat.actor` target namespace.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth thresholds for room actors.
pub const ROOM_MAILBOX_NORMAL: usize = 100;
pub const ROOM_MAILBOX_WARNING: usize = 500;

/// Mailbox depth thresholds for connection actors.
pub const CONNECTION_MAILBOX_NORMAL: usize = 50;
pub const CONNECTION_MAILBOX_WARNING: usize = 200;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// ChatControllerActor (singleton).
    Controller,
    /// RoomActor (one per active room).
    Room,
    /// ConnectionActor (one per WebSocket connection).
    Connection,
    /// CallActor (singleton signaling coordinator).
    Call,
}

impl ActorType {
    /// Returns the actor type as a string for metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Controller => "controller",
            ActorType::Room => "room",
            ActorType::Connection => "connection",
            ActorType::Call => "call",
        }
    }

    /// Returns the warning threshold for this actor type.
    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            // Controller and call coordinator use room thresholds
            ActorType::Controller | ActorType::Room | ActorType::Call => ROOM_MAILBOX_WARNING,
            ActorType::Connection => CONNECTION_MAILBOX_WARNING,
        }
    }

    /// Returns the normal threshold for this actor type.
    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Controller | ActorType::Room | ActorType::Call => ROOM_MAILBOX_NORMAL,
            ActorType::Connection => CONNECTION_MAILBOX_NORMAL,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    /// Below normal threshold.
    Normal,
    /// Between normal and warning thresholds.
    Warning,
    /// Above warning threshold.
    Critical,
}

/// Mailbox monitor for tracking queue depth and emitting metrics.
#[derive(Debug)]
pub struct MailboxMonitor {
    /// Actor type for labeling.
    actor_type: ActorType,
    /// Actor identifier (room_id, connection_id, etc.).
    actor_id: String,
    /// Current mailbox depth.
    depth: AtomicUsize,
    /// Peak mailbox depth since last reset.
    peak_depth: AtomicUsize,
    /// Total messages processed.
    messages_processed: AtomicU64,
    /// Messages dropped due to backpressure.
    messages_dropped: AtomicU64,
}

impl MailboxMonitor {
    /// Create a new mailbox monitor for the given actor.
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }

    /// Record a message being added to the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;

        // Update peak if necessary
        let mut current_peak = self.peak_depth.load(Ordering::Relaxed);
        while new_depth > current_peak {
            match self.peak_depth.compare_exchange_weak(
                current_peak,
                new_depth,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current_peak = actual,
            }
        }

        // Check thresholds and log warnings
        let level = self.level_for_depth(new_depth);
        if level == MailboxLevel::Critical {
            warn!(
                target: "chat.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = new_depth,
                threshold = self.actor_type.warning_threshold(),
                "Mailbox depth critical"
            );
        } else if level == MailboxLevel::Warning && new_depth == self.actor_type.normal_threshold()
        {
            // Log once when crossing the warning threshold
            debug!(
                target: "chat.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = new_depth,
                "Mailbox depth elevated"
            );
        }
    }

    /// Record a message being removed from the mailbox (processed).
    pub fn record_dequeue(&self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message being dropped due to backpressure.
    pub fn record_drop(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
        warn!(
            target: "chat.actor.mailbox",
            actor_type = self.actor_type.as_str(),
            actor_id = %self.actor_id,
            dropped = self.messages_dropped.load(Ordering::Relaxed),
            "Message dropped due to backpressure"
        );
    }

    /// Get the current mailbox depth.
    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Get the peak mailbox depth.
    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    /// Get total messages processed.
    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    /// Get total messages dropped.
    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    /// Get the current mailbox level.
    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    /// Reset peak depth counter.
    pub fn reset_peak(&self) {
        self.peak_depth
            .store(self.current_depth(), Ordering::Relaxed);
    }

    /// Determine mailbox level for a given depth.
    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Aggregated metrics for the actor system.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    /// Total rooms currently active.
    pub active_rooms: AtomicUsize,
    /// Total connections currently active.
    pub active_connections: AtomicUsize,
    /// Total call sessions currently ringing or active.
    pub active_calls: AtomicUsize,
    /// Total actor panics (indicates bugs).
    pub actor_panics: AtomicU64,
    /// Total messages fanned out across all rooms.
    pub messages_fanned_out: AtomicU64,
    /// Total connections dropped for queue overflow.
    pub connections_overflowed: AtomicU64,
}

impl ActorMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Increment active room count.
    pub fn room_created(&self) {
        self.active_rooms.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement active room count.
    pub fn room_removed(&self) {
        self.active_rooms.fetch_sub(1, Ordering::Relaxed);
    }

    /// Increment active connection count.
    pub fn connection_created(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement active connection count.
    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Increment active call count.
    pub fn call_started(&self) {
        self.active_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement active call count.
    pub fn call_ended(&self) {
        self.active_calls.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record an actor panic.
    pub fn record_panic(&self, actor_type: ActorType) {
        self.actor_panics.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            target: "chat.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = self.actor_panics.load(Ordering::Relaxed),
            "Actor panic detected - indicates bug, investigation required"
        );
    }

    /// Record a message delivered through fanout.
    pub fn record_fanout(&self) {
        self.messages_fanned_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection dropped for outbound queue overflow.
    pub fn record_overflow_disconnect(&self) {
        self.connections_overflowed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current room count.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.active_rooms.load(Ordering::Relaxed)
    }

    /// Get current connection count.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Get current call count.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.active_calls.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_type_as_str() {
        assert_eq!(ActorType::Controller.as_str(), "controller");
        assert_eq!(ActorType::Room.as_str(), "room");
        assert_eq!(ActorType::Connection.as_str(), "connection");
        assert_eq!(ActorType::Call.as_str(), "call");
    }

    #[test]
    fn test_actor_type_thresholds() {
        assert_eq!(ActorType::Room.normal_threshold(), 100);
        assert_eq!(ActorType::Room.warning_threshold(), 500);
        assert_eq!(ActorType::Connection.normal_threshold(), 50);
        assert_eq!(ActorType::Connection.warning_threshold(), 200);
    }

    #[test]
    fn test_mailbox_monitor_enqueue_dequeue() {
        let monitor = MailboxMonitor::new(ActorType::Room, "room-123");

        assert_eq!(monitor.current_depth(), 0);

        monitor.record_enqueue();
        assert_eq!(monitor.current_depth(), 1);
        assert_eq!(monitor.peak_depth(), 1);

        monitor.record_enqueue();
        monitor.record_enqueue();
        assert_eq!(monitor.current_depth(), 3);
        assert_eq!(monitor.peak_depth(), 3);

        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 2);
        assert_eq!(monitor.peak_depth(), 3); // Peak stays at 3
        assert_eq!(monitor.messages_processed(), 1);
    }

    #[test]
    fn test_mailbox_monitor_levels() {
        let monitor = MailboxMonitor::new(ActorType::Room, "room-123");

        // Normal level (< 100)
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        // Simulate high depth
        for _ in 0..150 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);

        // Simulate critical depth (> 500)
        for _ in 0..400 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);
    }

    #[test]
    fn test_mailbox_monitor_connection_thresholds() {
        let monitor = MailboxMonitor::new(ActorType::Connection, "conn-456");

        // Normal (< 50)
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        // Warning (50-200)
        for _ in 0..75 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);

        // Critical (> 200)
        for _ in 0..150 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);
    }

    #[test]
    fn test_mailbox_monitor_drop() {
        let monitor = MailboxMonitor::new(ActorType::Room, "room-123");

        monitor.record_drop();
        assert_eq!(monitor.messages_dropped(), 1);

        monitor.record_drop();
        assert_eq!(monitor.messages_dropped(), 2);
    }

    #[test]
    fn test_mailbox_monitor_reset_peak() {
        let monitor = MailboxMonitor::new(ActorType::Room, "room-123");

        for _ in 0..10 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.peak_depth(), 10);

        for _ in 0..5 {
            monitor.record_dequeue();
        }
        assert_eq!(monitor.peak_depth(), 10); // Still 10
        assert_eq!(monitor.current_depth(), 5);

        monitor.reset_peak();
        assert_eq!(monitor.peak_depth(), 5); // Reset to current
    }

    #[test]
    fn test_actor_metrics() {
        let metrics = ActorMetrics::new();

        assert_eq!(metrics.room_count(), 0);
        assert_eq!(metrics.connection_count(), 0);

        metrics.room_created();
        metrics.room_created();
        assert_eq!(metrics.room_count(), 2);

        metrics.connection_created();
        metrics.connection_created();
        metrics.connection_created();
        assert_eq!(metrics.connection_count(), 3);

        metrics.room_removed();
        assert_eq!(metrics.room_count(), 1);

        metrics.connection_closed();
        assert_eq!(metrics.connection_count(), 2);
    }

    #[test]
    fn test_actor_metrics_calls() {
        let metrics = ActorMetrics::new();

        assert_eq!(metrics.call_count(), 0);

        metrics.call_started();
        metrics.call_started();
        assert_eq!(metrics.call_count(), 2);

        metrics.call_ended();
        assert_eq!(metrics.call_count(), 1);
    }

    #[test]
    fn test_actor_metrics_panics() {
        let metrics = ActorMetrics::new();

        metrics.record_panic(ActorType::Room);
        assert_eq!(metrics.actor_panics.load(Ordering::Relaxed), 1);

        metrics.record_panic(ActorType::Connection);
        assert_eq!(metrics.actor_panics.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_actor_metrics_fanout_counters() {
        let metrics = ActorMetrics::new();

        metrics.record_fanout();
        metrics.record_fanout();
        assert_eq!(metrics.messages_fanned_out.load(Ordering::Relaxed), 2);

        metrics.record_overflow_disconnect();
        assert_eq!(metrics.connections_overflowed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_mailbox_level_equality() {
        assert_eq!(MailboxLevel::Normal, MailboxLevel::Normal);
        assert_ne!(MailboxLevel::Normal, MailboxLevel::Warning);
        assert_ne!(MailboxLevel::Warning, MailboxLevel::Critical);
    }
}
