//! Observability for the feed client
//!
//! Two process-scoped registries:
//! - `FeedMetrics`: monotonic counters for frame routing and connection
//!   lifecycle, exported Prometheus-style.
//! - `LatencyMonitor`: the last processing duration per channel kind. Each
//!   sample overwrites the previous one; there is no history.
//!
//! Health classification combines the latency samples with a frame-rate and
//! memory sample. It is advisory and never blocks the pipeline.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use types::channel::ChannelKind;

/// Counters for the frame pipeline and connection lifecycle.
#[derive(Debug, Default)]
pub struct FeedMetrics {
    // Inbound frames
    pub frames_received: AtomicU64,
    pub control_frames: AtomicU64,
    pub data_frames_dispatched: AtomicU64,
    pub heartbeats: AtomicU64,
    pub unresolved_frames: AtomicU64,
    pub ignored_frames: AtomicU64,
    pub malformed_frames: AtomicU64,
    pub decode_errors: AtomicU64,

    // Outbound
    pub messages_sent: AtomicU64,
    pub messages_dropped: AtomicU64,

    // Connection lifecycle
    pub connects: AtomicU64,
    pub disconnects: AtomicU64,
    pub connect_failures: AtomicU64,
}

impl FeedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_control_frame(&self) {
        self.control_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.data_frames_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unresolved(&self) {
        self.unresolved_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ignored(&self) {
        self.ignored_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Outbound message discarded because the transport was not connected.
    pub fn record_send_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Export metrics as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("frames_received".to_string(), self.frames_received.load(Ordering::Relaxed));
        m.insert("control_frames".to_string(), self.control_frames.load(Ordering::Relaxed));
        m.insert("data_frames_dispatched".to_string(), self.data_frames_dispatched.load(Ordering::Relaxed));
        m.insert("heartbeats".to_string(), self.heartbeats.load(Ordering::Relaxed));
        m.insert("unresolved_frames".to_string(), self.unresolved_frames.load(Ordering::Relaxed));
        m.insert("ignored_frames".to_string(), self.ignored_frames.load(Ordering::Relaxed));
        m.insert("malformed_frames".to_string(), self.malformed_frames.load(Ordering::Relaxed));
        m.insert("decode_errors".to_string(), self.decode_errors.load(Ordering::Relaxed));
        m.insert("messages_sent".to_string(), self.messages_sent.load(Ordering::Relaxed));
        m.insert("messages_dropped".to_string(), self.messages_dropped.load(Ordering::Relaxed));
        m.insert("connects".to_string(), self.connects.load(Ordering::Relaxed));
        m.insert("disconnects".to_string(), self.disconnects.load(Ordering::Relaxed));
        m.insert("connect_failures".to_string(), self.connect_failures.load(Ordering::Relaxed));
        m
    }
}

/// Last observed processing duration per channel kind.
#[derive(Debug, Default)]
pub struct LatencyMonitor {
    samples: Mutex<BTreeMap<ChannelKind, Duration>>,
}

impl LatencyMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the sample for `kind`.
    pub fn record_latency(&self, kind: ChannelKind, elapsed: Duration) {
        if let Ok(mut samples) = self.samples.lock() {
            samples.insert(kind, elapsed);
        }
    }

    /// Latest sample for `kind`, if one was ever recorded.
    pub fn latest(&self, kind: ChannelKind) -> Option<Duration> {
        self.samples
            .lock()
            .ok()
            .and_then(|samples| samples.get(&kind).copied())
    }

    /// Copy of the current sample set.
    pub fn snapshot(&self) -> LatencySnapshot {
        let samples = self
            .samples
            .lock()
            .map(|samples| samples.clone())
            .unwrap_or_default();
        LatencySnapshot { samples }
    }
}

/// Point-in-time copy of the latency samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencySnapshot {
    pub samples: BTreeMap<ChannelKind, Duration>,
}

impl LatencySnapshot {
    /// Sample for `kind` in milliseconds; kinds never sampled read as zero.
    pub fn millis(&self, kind: ChannelKind) -> f64 {
        self.samples
            .get(&kind)
            .map(|d| d.as_secs_f64() * 1_000.0)
            .unwrap_or(0.0)
    }

    /// Mean over all channel kinds, counting missing samples as zero.
    pub fn average_millis(&self) -> f64 {
        let kinds = ChannelKind::all();
        let total: f64 = kinds.iter().map(|kind| self.millis(*kind)).sum();
        total / kinds.len() as f64
    }
}

/// Advisory health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionHealth {
    Good,
    Warning,
    Poor,
}

/// Non-latency inputs to the health classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthSample {
    /// Inbound frames per second over the last sampling window.
    pub frame_rate: f64,
    /// Resident memory of the process in megabytes.
    pub memory_mb: f64,
    /// Whether the transport currently holds an open socket.
    pub connected: bool,
}

/// Fixed health thresholds.
#[derive(Debug, Clone)]
pub struct HealthThresholds {
    pub poor_latency_ms: f64,
    pub warning_latency_ms: f64,
    pub poor_frame_rate: f64,
    pub warning_frame_rate: f64,
    pub poor_memory_mb: f64,
    pub warning_memory_mb: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            poor_latency_ms: 10.0,
            warning_latency_ms: 5.0,
            poor_frame_rate: 2.0,
            warning_frame_rate: 10.0,
            poor_memory_mb: 500.0,
            warning_memory_mb: 200.0,
        }
    }
}

/// Classify feed health. A disconnected transport is always `Poor`.
pub fn classify_health(
    latencies: &LatencySnapshot,
    sample: &HealthSample,
    thresholds: &HealthThresholds,
) -> ConnectionHealth {
    if !sample.connected {
        return ConnectionHealth::Poor;
    }

    let avg_latency = latencies.average_millis();

    if avg_latency > thresholds.poor_latency_ms
        || sample.frame_rate < thresholds.poor_frame_rate
        || sample.memory_mb > thresholds.poor_memory_mb
    {
        return ConnectionHealth::Poor;
    }

    if avg_latency > thresholds.warning_latency_ms
        || sample.frame_rate < thresholds.warning_frame_rate
        || sample.memory_mb > thresholds.warning_memory_mb
    {
        return ConnectionHealth::Warning;
    }

    ConnectionHealth::Good
}
