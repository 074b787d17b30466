//! Daemon run loop
//!
//! Wires configuration, capture, analyzer and injector together, then
//! either follows a live interface until interrupted or replays a trace.

use parking_lot::Mutex;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use flytrap_capture::{filters, replay_file, DryRunInjector, LinkInjector, PacketCapture};
use flytrap_core::{Error, HostTable, Injector, Interface, MacAddr, Result};
use flytrap_protocols::{ArpAnalyzer, FrameAnalyzer};

use crate::args::Cli;
use crate::config::Config;

/// How often the run loop checks that the capture thread is still alive
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);

/// Build the analyzer for a link
///
/// Configured reservations and the interface's own addresses are reserved
/// up front so they can never be claimed.
pub fn build_analyzer(
    config: &Config,
    interface: &str,
    interface_mac: MacAddr,
    own_addrs: &[Ipv4Addr],
) -> Result<FrameAnalyzer> {
    let scope = config.build_scope()?;
    if scope.is_unrestricted() {
        info!("no include or exclude ranges, any unanswered address may be claimed");
    }
    if let Some(include) = scope.include() {
        debug!("include set of {} addresses:\n{}", include.count(), include);
    }
    if let Some(exclude) = scope.exclude() {
        debug!("exclude set of {} addresses:\n{}", exclude.count(), exclude);
    }

    let mut hosts = HostTable::with_policy(config.claim_policy());
    for addr in config.hosts.reserve.iter().chain(own_addrs) {
        hosts.reserve(*addr)?;
    }

    let mut analyzer =
        FrameAnalyzer::with_link(interface, interface_mac, ArpAnalyzer::new(hosts, scope));
    if let Some(expiry) = config.expiry_policy() {
        debug!(
            "expiring hosts idle for {}s every {}s",
            expiry.ttl_ms / 1000,
            expiry.interval_ms / 1000
        );
        analyzer = analyzer.with_expiry(expiry);
    }
    Ok(analyzer)
}

/// Entry point used by the binary
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.merge_cli(&cli);
    config.validate()?;

    match &cli.read {
        Some(path) => {
            let analyzer = replay(&config, path)?;
            report(&analyzer, cli.dump_hosts);
        }
        None => {
            let analyzer = run_live(&config, cli.dry_run).await?;
            report(&analyzer.lock(), cli.dump_hosts);
        }
    }
    Ok(())
}

/// Replay a pcap trace; replies are logged, never sent
pub fn replay(config: &Config, path: &Path) -> Result<FrameAnalyzer> {
    // a named interface lends its link address and own addresses
    let link = config
        .interface
        .as_deref()
        .and_then(|name| match Interface::by_name(name) {
            Ok(iface) => Some(iface),
            Err(e) => {
                warn!("{}; replaying without a local link address", e);
                None
            }
        });

    let mut analyzer = match &link {
        Some(iface) => build_analyzer(config, &iface.name, iface.mac_address, &iface.ipv4)?,
        None => build_analyzer(config, "replay", MacAddr::ZERO, &[])?,
    };

    let mut injector = DryRunInjector::new();
    replay_file(path, Some(&filters::arp_filter()), |packet| {
        analyzer.handle_packet(&packet, &mut injector)
    })?;
    info!("replay done, {} replies not sent", injector.suppressed);

    Ok(analyzer)
}

/// Capture on the configured interface until interrupted
pub async fn run_live(config: &Config, dry_run: bool) -> Result<Arc<Mutex<FrameAnalyzer>>> {
    let name = config
        .interface
        .as_deref()
        .ok_or_else(|| Error::config("no interface given"))?;
    let iface = Interface::by_name(name)?;
    if iface.mac_address.is_zero() {
        return Err(Error::Interface(format!(
            "{} has no link-layer address",
            iface.name
        )));
    }

    let analyzer = Arc::new(Mutex::new(build_analyzer(
        config,
        &iface.name,
        iface.mac_address,
        &iface.ipv4,
    )?));

    let mut injector: Box<dyn Injector + Send> = if dry_run {
        Box::new(DryRunInjector::new())
    } else {
        Box::new(LinkInjector::open(&iface)?)
    };

    let mut capture = PacketCapture::with_config(&iface.name, config.capture_config())?;
    capture.set_filter(&filters::arp_from_others(&iface.mac_address))?;

    let shared = Arc::clone(&analyzer);
    capture.start(move |packet| shared.lock().handle_packet(&packet, &mut injector))?;
    info!("flytrap listening on {}", iface);

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    let mut watchdog = tokio::time::interval(WATCHDOG_INTERVAL);
    loop {
        tokio::select! {
            result = &mut interrupted => {
                result?;
                info!("interrupted, shutting down");
                break;
            }
            _ = watchdog.tick() => {
                if !capture.is_running() {
                    warn!("capture on {} ended", iface.name);
                    break;
                }
            }
        }
    }

    capture.stop()?;
    info!("capture: {}", capture.stats());
    Ok(analyzer)
}

/// Log the final counters and optionally print the host table
pub fn report(analyzer: &FrameAnalyzer, dump_hosts: bool) {
    let hosts = analyzer.hosts();
    info!("arp: {}", analyzer.arp().stats());
    info!(
        "{} hosts known, {} claimed, {} own frames skipped, {} other frames",
        hosts.len(),
        hosts.claimed_count(),
        analyzer.own_frames(),
        analyzer.other_frames()
    );
    if dump_hosts {
        print!("{}", hosts);
    }
}
