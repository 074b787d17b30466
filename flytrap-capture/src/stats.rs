//! Capture statistics

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Snapshot of what a capture has seen so far
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureStats {
    /// Frames handed to the analyzer
    pub packets_received: u64,
    /// Bytes captured
    pub bytes_received: u64,
    /// Frames cut short by the snapshot length
    pub packets_truncated: u64,
    /// Frames the kernel dropped (live capture only)
    pub packets_dropped: u64,
    /// Frames the interface dropped (live capture only)
    pub packets_if_dropped: u64,
    /// Time since the capture started
    pub duration: Duration,
}

impl CaptureStats {
    /// Fold the kernel counters from pcap into this snapshot
    pub fn with_pcap_stats(mut self, stats: pcap::Stat) -> Self {
        self.packets_dropped = u64::from(stats.dropped);
        self.packets_if_dropped = u64::from(stats.if_dropped);
        self
    }

    /// Calculate drop rate as percentage
    pub fn drop_rate(&self) -> f64 {
        let total = self.packets_received + self.packets_dropped;
        if total == 0 {
            return 0.0;
        }
        (self.packets_dropped as f64 / total as f64) * 100.0
    }
}

impl fmt::Display for CaptureStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} packets ({} bytes, {} truncated) in {:.1}s, {} dropped ({:.2}%), {} dropped by interface",
            self.packets_received,
            self.bytes_received,
            self.packets_truncated,
            self.duration.as_secs_f64(),
            self.packets_dropped,
            self.drop_rate(),
            self.packets_if_dropped
        )
    }
}

/// Thread-safe counters shared between the capture thread and its owner
#[derive(Debug, Clone)]
pub struct StatsAccumulator {
    packets_received: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
    packets_truncated: Arc<AtomicU64>,
    start_time: Instant,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self {
            packets_received: Arc::new(AtomicU64::new(0)),
            bytes_received: Arc::new(AtomicU64::new(0)),
            packets_truncated: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    /// Record a captured frame of `caplen` bytes that was `wire_len` bytes
    /// on the wire
    pub fn record_packet(&self, caplen: usize, wire_len: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(caplen as u64, Ordering::Relaxed);
        if caplen < wire_len {
            self.packets_truncated.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> CaptureStats {
        CaptureStats {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            packets_truncated: self.packets_truncated.load(Ordering::Relaxed),
            packets_dropped: 0,
            packets_if_dropped: 0,
            duration: self.elapsed(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for StatsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
