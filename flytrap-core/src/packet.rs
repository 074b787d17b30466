//! Packet types

/// A captured frame
#[derive(Debug, Clone)]
pub struct Packet {
    /// Capture timestamp in milliseconds since the epoch, taken from the
    /// capture header rather than the wall clock
    pub timestamp_ms: u64,
    /// Interface the packet was received on
    pub interface: String,
    /// Packet data (including all headers)
    pub data: Vec<u8>,
    /// Actual length on the wire (may differ from data.len() if truncated)
    pub len: usize,
}

impl Packet {
    /// Create a new packet
    pub fn new(interface: String, timestamp_ms: u64, data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            timestamp_ms,
            interface,
            data,
            len,
        }
    }

    /// Convert a capture header timestamp into milliseconds. Negative
    /// components (broken capture files) clamp to zero.
    pub fn millis_from_timeval(tv_sec: i64, tv_usec: i64) -> u64 {
        let secs = u64::try_from(tv_sec).unwrap_or(0);
        let usecs = u64::try_from(tv_usec).unwrap_or(0);
        secs.saturating_mul(1000).saturating_add(usecs / 1000)
    }

    /// Get packet data as slice
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get packet length
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if packet is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
