//! Packet capture wrapper around pcap
//!
//! Live capture runs on its own thread and hands every frame to a callback;
//! trace replay runs on the caller's thread. Both stamp packets with the
//! capture header time so the analyzer never looks at the wall clock.

use parking_lot::{Mutex, RwLock};
use pcap::{Activated, Active, Capture, Device, Linktype};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};
use flytrap_core::{Error, Interface, Packet, Result};

use crate::stats::{CaptureStats, StatsAccumulator};

/// Default snapshot length (maximum bytes per packet)
pub const DEFAULT_SNAPLEN: i32 = 65535;

/// Default read timeout (milliseconds); also bounds how long stop() waits
pub const DEFAULT_TIMEOUT_MS: i32 = 1000;

/// Configuration for packet capture
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Maximum bytes to capture per packet
    pub snaplen: i32,
    /// Timeout in milliseconds
    pub timeout_ms: i32,
    /// Enable promiscuous mode
    pub promiscuous: bool,
    /// Enable immediate mode (deliver packets immediately)
    pub immediate_mode: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            snaplen: DEFAULT_SNAPLEN,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            promiscuous: true,
            immediate_mode: true,
        }
    }
}

/// State of packet capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Capture is not running
    Stopped,
    /// Capture is actively running
    Running,
}

/// Live capture on one interface
pub struct PacketCapture {
    /// Interface being captured
    interface: Interface,
    /// Capture configuration
    config: CaptureConfig,
    /// BPF filter applied when the capture opens
    filter: Option<String>,
    /// Current capture state
    state: Arc<RwLock<CaptureState>>,
    /// Counters shared with the capture thread
    stats: StatsAccumulator,
    /// Kernel counters, refreshed when the capture thread exits
    kernel_stats: Arc<Mutex<Option<pcap::Stat>>>,
    /// Capture thread
    worker: Option<JoinHandle<()>>,
}

impl PacketCapture {
    /// Create a new packet capture on the specified interface
    pub fn new(interface: &str) -> Result<Self> {
        Self::with_config(interface, CaptureConfig::default())
    }

    /// Create a new packet capture with custom configuration
    pub fn with_config(interface: &str, config: CaptureConfig) -> Result<Self> {
        let interface = Interface::by_name(interface)?;

        if !interface.is_up {
            return Err(Error::Capture(format!(
                "Interface '{}' is not up",
                interface.name
            )));
        }

        debug!("Created packet capture on interface: {}", interface);

        Ok(Self {
            interface,
            config,
            filter: None,
            state: Arc::new(RwLock::new(CaptureState::Stopped)),
            stats: StatsAccumulator::new(),
            kernel_stats: Arc::new(Mutex::new(None)),
            worker: None,
        })
    }

    /// Set BPF filter; takes effect when the capture starts
    pub fn set_filter(&mut self, bpf: &str) -> Result<()> {
        if self.is_running() {
            return Err(Error::Capture("Capture already running".to_string()));
        }
        debug!("Setting BPF filter: {}", bpf);
        self.filter = Some(bpf.to_string());
        Ok(())
    }

    /// Interface being captured
    pub fn interface(&self) -> &Interface {
        &self.interface
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Get current capture state
    pub fn state(&self) -> CaptureState {
        *self.state.read()
    }

    /// Check if capture is running
    pub fn is_running(&self) -> bool {
        self.state() == CaptureState::Running
    }

    /// Current statistics, including the kernel's drop counters once the
    /// capture has stopped
    pub fn stats(&self) -> CaptureStats {
        let snapshot = self.stats.snapshot();
        match *self.kernel_stats.lock() {
            Some(stat) => snapshot.with_pcap_stats(stat),
            None => snapshot,
        }
    }

    /// Open the pcap handle
    fn init_capture(&self) -> Result<Capture<Active>> {
        debug!("Initializing pcap capture on {}", self.interface.name);

        let device = Device::from(self.interface.name.as_str());
        let mut capture = Capture::from_device(device)
            .map_err(|e| Error::Capture(format!("Failed to create capture: {}", e)))?
            .promisc(self.config.promiscuous)
            .snaplen(self.config.snaplen)
            .timeout(self.config.timeout_ms)
            .immediate_mode(self.config.immediate_mode)
            .open()
            .map_err(|e| Error::Capture(format!("Failed to open capture: {}", e)))?;

        check_datalink(&capture, &self.interface.name)?;
        if let Some(filter) = &self.filter {
            apply_filter(&mut capture, filter)?;
        }

        info!("Capture initialized on {}", self.interface.name);
        Ok(capture)
    }

    /// Start packet capture with callback
    pub fn start<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(Packet) + Send + 'static,
    {
        if self.is_running() {
            return Err(Error::Capture("Capture already running".to_string()));
        }

        let mut capture = self.init_capture()?;
        *self.state.write() = CaptureState::Running;

        info!("Starting packet capture on {}", self.interface.name);

        let state = Arc::clone(&self.state);
        let stats = self.stats.clone();
        let kernel_stats = Arc::clone(&self.kernel_stats);
        let interface = self.interface.name.clone();

        let worker = thread::Builder::new()
            .name(format!("capture-{}", interface))
            .spawn(move || {
                loop {
                    if *state.read() == CaptureState::Stopped {
                        debug!("Capture stopped");
                        break;
                    }

                    match capture.next_packet() {
                        Ok(packet) => {
                            let pkt = to_packet(&interface, &packet);
                            stats.record_packet(pkt.data.len(), pkt.len);
                            callback(pkt);
                        }
                        Err(pcap::Error::TimeoutExpired) => {
                            // Timeout is normal, just continue
                            continue;
                        }
                        Err(e) => {
                            error!("Packet capture error: {}", e);
                            break;
                        }
                    }
                }

                match capture.stats() {
                    Ok(stat) => *kernel_stats.lock() = Some(stat),
                    Err(e) => warn!("Failed to get capture stats: {}", e),
                }
                *state.write() = CaptureState::Stopped;
                info!("Capture thread finished");
            })?;

        self.worker = Some(worker);
        Ok(())
    }

    /// Stop packet capture and wait for the capture thread to exit
    pub fn stop(&mut self) -> Result<()> {
        *self.state.write() = CaptureState::Stopped;

        if let Some(worker) = self.worker.take() {
            info!("Stopping packet capture on {}", self.interface.name);
            worker
                .join()
                .map_err(|_| Error::Capture("Capture thread panicked".to_string()))?;
        }

        Ok(())
    }
}

impl Drop for PacketCapture {
    fn drop(&mut self) {
        // Ensure capture is stopped when dropped
        let _ = self.stop();
    }
}

/// Replay a pcap trace through `callback`, in file order, on the calling
/// thread
pub fn replay_file<P, F>(path: P, filter: Option<&str>, mut callback: F) -> Result<CaptureStats>
where
    P: AsRef<Path>,
    F: FnMut(Packet),
{
    let path = path.as_ref();
    let source = path.display().to_string();
    let mut capture = Capture::from_file(path)
        .map_err(|e| Error::Capture(format!("Failed to open {}: {}", source, e)))?;

    check_datalink(&capture, &source)?;
    if let Some(filter) = filter {
        apply_filter(&mut capture, filter)?;
    }

    info!("Replaying {}", source);
    let stats = StatsAccumulator::new();
    loop {
        match capture.next_packet() {
            Ok(packet) => {
                let pkt = to_packet(&source, &packet);
                stats.record_packet(pkt.data.len(), pkt.len);
                callback(pkt);
            }
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => {
                return Err(Error::Capture(format!("Error reading {}: {}", source, e)));
            }
        }
    }

    let stats = stats.snapshot();
    info!("Finished replaying {}: {}", source, stats);
    Ok(stats)
}

fn to_packet(interface: &str, packet: &pcap::Packet<'_>) -> Packet {
    let ts = packet.header.ts;
    let timestamp_ms = Packet::millis_from_timeval(ts.tv_sec as i64, ts.tv_usec as i64);
    let mut pkt = Packet::new(interface.to_string(), timestamp_ms, packet.data.to_vec());
    pkt.len = packet.header.len as usize;
    pkt
}

fn check_datalink<T: Activated + ?Sized>(capture: &Capture<T>, source: &str) -> Result<()> {
    let linktype = capture.get_datalink();
    if linktype != Linktype::ETHERNET {
        return Err(Error::Capture(format!(
            "{}: unsupported datalink type {:?}",
            source, linktype
        )));
    }
    Ok(())
}

fn apply_filter<T: Activated + ?Sized>(capture: &mut Capture<T>, bpf: &str) -> Result<()> {
    capture
        .filter(bpf, true)
        .map_err(|e| Error::Capture(format!("Invalid BPF filter '{}': {}", bpf, e)))?;
    debug!("Applied filter: {}", bpf);
    Ok(())
}
