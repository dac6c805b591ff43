use crate::fanout::LiveRegistry;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize, Deserialize)]
pub struct GatewayHealth {
    pub uptime_seconds: u64,
    pub broker_status: String,
    pub broker_reconnects: u32,
    pub messages_ingested: u64,
    pub messages_dropped: u64,
    pub live_connections: usize,
    pub memory_usage_mb: f32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    broker_reconnects: Arc<AtomicU32>,
    broker_status: Arc<parking_lot::Mutex<String>>,
    messages_ingested: Arc<AtomicU64>,
    messages_dropped: Arc<AtomicU64>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            broker_reconnects: Arc::new(AtomicU32::new(0)),
            broker_status: Arc::new(parking_lot::Mutex::new("connecting".to_string())),
            messages_ingested: Arc::new(AtomicU64::new(0)),
            messages_dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn mark_broker_connected(&self) {
        *self.broker_status.lock() = "connected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.broker_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.broker_status.lock() = "reconnecting".to_string();
    }

    pub fn record_ingested(&self) {
        self.messages_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_health(&self, fanout: &LiveRegistry) -> GatewayHealth {
        GatewayHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            broker_status: self.broker_status.lock().clone(),
            broker_reconnects: self.broker_reconnects.load(Ordering::Relaxed),
            messages_ingested: self.messages_ingested.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            live_connections: fanout.len(),
            memory_usage_mb: get_memory_usage_mb().unwrap_or(0.0),
        }
    }
}

// RSS du process lu dans /proc, absent hors Linux
fn get_memory_usage_mb() -> Option<f32> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        let kb = status
            .lines()
            .find(|l| l.starts_with("VmRSS:"))?
            .split_whitespace()
            .nth(1)?
            .parse::<u64>()
            .ok()?;
        Some(kb as f32 / 1024.0)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        let tracker = HealthTracker::new();
        let fanout = LiveRegistry::new();
        assert_eq!(tracker.get_health(&fanout).broker_status, "connecting");

        tracker.mark_broker_connected();
        tracker.increment_reconnects();
        let health = tracker.get_health(&fanout);
        assert_eq!(health.broker_status, "reconnecting");
        assert_eq!(health.broker_reconnects, 1);

        tracker.mark_broker_connected();
        tracker.record_ingested();
        tracker.record_dropped();
        tracker.record_dropped();
        let health = tracker.get_health(&fanout);
        assert_eq!(health.broker_status, "connected");
        assert_eq!((health.messages_ingested, health.messages_dropped), (1, 2));
        assert_eq!(health.live_connections, 0);
    }
}
