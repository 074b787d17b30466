//! BPF (Berkeley Packet Filter) expressions used by the daemon

use flytrap_core::MacAddr;

/// ARP filter
/// Captures all ARP packets
pub fn arp_filter() -> String {
    "arp".to_string()
}

/// Frames sent from the given link-layer address
pub fn src_mac_filter(mac: &MacAddr) -> String {
    format!("ether src {}", mac)
}

/// Negate a filter
pub fn not_filter(filter: &str) -> String {
    format!("not ({})", filter)
}

/// Combine filters with AND, skipping empty ones
pub fn combine_filters(filters: &[&str]) -> String {
    filters
        .iter()
        .filter(|f| !f.is_empty())
        .map(|f| format!("({})", f))
        .collect::<Vec<_>>()
        .join(" and ")
}

/// ARP traffic not originating from `local`, so our own replies are not
/// fed back into the analyzer
pub fn arp_from_others(local: &MacAddr) -> String {
    if local.is_zero() {
        return arp_filter();
    }
    combine_filters(&[&arp_filter(), &not_filter(&src_mac_filter(local))])
}
