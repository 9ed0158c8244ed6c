//! Connection metrics and the read-only diagnostics snapshot.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Thread-safe metrics owned by the session manager.
///
/// Counters use atomics; the timestamps and last error sit behind short
/// mutexes. Shared between the manager and the protocol engine, which
/// increments the message counters.
#[derive(Debug, Default)]
pub struct Metrics {
    started_at: Mutex<Option<Instant>>,
    ended_at: Mutex<Option<Instant>>,
    reconnect_attempts: AtomicU32,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl Metrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset everything for a fresh connect cycle.
    pub fn reset(&self) {
        *self.started_at.lock() = None;
        *self.ended_at.lock() = None;
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.messages_sent.store(0, Ordering::SeqCst);
        self.messages_received.store(0, Ordering::SeqCst);
        *self.last_error.lock() = None;
    }

    /// Record the connection start timestamp.
    pub fn mark_started(&self) {
        *self.started_at.lock() = Some(Instant::now());
        *self.ended_at.lock() = None;
    }

    /// Record the connection end timestamp, if a start was recorded.
    pub fn mark_ended(&self) {
        let started = self.started_at.lock().is_some();
        if started {
            *self.ended_at.lock() = Some(Instant::now());
        }
    }

    /// Increment the sent-message counter.
    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the received-message counter.
    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Current reconnection attempt count.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Set the reconnection attempt count.
    pub fn set_reconnect_attempts(&self, attempts: u32) {
        self.reconnect_attempts.store(attempts, Ordering::SeqCst);
    }

    /// Record the most recent error.
    pub fn record_error(&self, error: impl Into<String>) {
        *self.last_error.lock() = Some(error.into());
    }

    /// Connection duration: now minus start while open, end minus start
    /// once closed, `None` before any connect.
    pub fn connection_duration(&self) -> Option<Duration> {
        let started = (*self.started_at.lock())?;
        let ended = *self.ended_at.lock();
        Some(match ended {
            Some(end) => end.duration_since(started),
            None => started.elapsed(),
        })
    }

    /// Take a point-in-time snapshot.
    pub fn snapshot(&self) -> ConnectionMetrics {
        ConnectionMetrics {
            duration_ms: self
                .connection_duration()
                .map(|d| d.as_millis() as u64),
            reconnect_attempts: self.reconnect_attempts(),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
        }
    }
}

/// Point-in-time metrics snapshot, exposed read-only.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetrics {
    /// Connection duration in milliseconds, `None` before any connect.
    pub duration_ms: Option<u64>,
    /// Reconnection attempts in the current connect cycle.
    pub reconnect_attempts: u32,
    /// Outbound control-channel frames sent.
    pub messages_sent: u64,
    /// Inbound control-channel frames received.
    pub messages_received: u64,
    /// Most recent error, if any.
    pub last_error: Option<String>,
}

/// Read-only diagnostics snapshot returned by `diagnostics()`.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsSnapshot {
    /// Current connection state.
    pub state: String,
    /// Metrics snapshot.
    pub metrics: ConnectionMetrics,
    /// Peer connection readiness ("connected", "failed", ... or "none").
    pub peer_connection: String,
    /// Control channel readiness ("open", "closed", ... or "none").
    pub control_channel: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_metrics_snapshot() {
        let metrics = Metrics::new();
        let snap = metrics.snapshot();
        assert!(snap.duration_ms.is_none());
        assert_eq!(snap.reconnect_attempts, 0);
        assert_eq!(snap.messages_sent, 0);
        assert_eq!(snap.messages_received, 0);
        assert!(snap.last_error.is_none());
    }

    #[test]
    fn test_duration_monotonic_while_open() {
        let metrics = Metrics::new();
        metrics.mark_started();
        let a = metrics.connection_duration().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let b = metrics.connection_duration().unwrap();
        assert!(b >= a);
    }

    #[test]
    fn test_duration_frozen_after_end() {
        let metrics = Metrics::new();
        metrics.mark_started();
        std::thread::sleep(Duration::from_millis(5));
        metrics.mark_ended();
        let a = metrics.connection_duration().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let b = metrics.connection_duration().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_mark_ended_without_start_is_noop() {
        let metrics = Metrics::new();
        metrics.mark_ended();
        assert!(metrics.connection_duration().is_none());
    }

    #[test]
    fn test_counters_and_reset() {
        let metrics = Metrics::new();
        metrics.record_sent();
        metrics.record_sent();
        metrics.record_received();
        metrics.set_reconnect_attempts(2);
        metrics.record_error("boom");

        let snap = metrics.snapshot();
        assert_eq!(snap.messages_sent, 2);
        assert_eq!(snap.messages_received, 1);
        assert_eq!(snap.reconnect_attempts, 2);
        assert_eq!(snap.last_error.as_deref(), Some("boom"));

        metrics.reset();
        let snap = metrics.snapshot();
        assert_eq!(snap.messages_sent, 0);
        assert_eq!(snap.reconnect_attempts, 0);
        assert!(snap.last_error.is_none());
    }
}
