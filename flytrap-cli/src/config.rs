//! Configuration file handling
//!
//! Every section is optional; missing keys take the built-in defaults.
//! Command-line options are merged on top with [`Config::merge_cli`].

use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::Path;

use flytrap_capture::CaptureConfig;
use flytrap_core::{AddressSet, AggregationParams, ClaimPolicy, Error, Result, Scope};
use flytrap_protocols::ExpiryPolicy;

use crate::args::Cli;
use crate::range::AddressRange;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Interface to capture on
    #[serde(default)]
    pub interface: Option<String>,

    #[serde(default)]
    pub capture: CaptureSection,

    #[serde(default)]
    pub scope: ScopeSection,

    #[serde(default)]
    pub aggregation: AggregationSection,

    #[serde(default)]
    pub hosts: HostsSection,

    #[serde(default)]
    pub claim: ClaimSection,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(e.to_string()))
    }

    /// Apply command-line options on top of the file values
    ///
    /// The interface is replaced; ranges and reservations are appended.
    pub fn merge_cli(&mut self, cli: &Cli) {
        if let Some(interface) = &cli.interface {
            self.interface = Some(interface.clone());
        }
        self.scope.include.extend(cli.include.iter().copied());
        self.scope.exclude.extend(cli.exclude.iter().copied());
        self.hosts.reserve.extend(cli.reserve.iter().copied());
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            snaplen: self.capture.snaplen,
            timeout_ms: self.capture.timeout_ms,
            promiscuous: self.capture.promiscuous,
            ..CaptureConfig::default()
        }
    }

    pub fn aggregation(&self) -> AggregationParams {
        AggregationParams {
            bits: self.aggregation.bits,
            min_prefix: self.aggregation.min_prefix,
            max_prefix: self.aggregation.max_prefix,
        }
    }

    pub fn claim_policy(&self) -> ClaimPolicy {
        ClaimPolicy {
            burst_requests: self.claim.burst_requests,
            burst_window_ms: self.claim.burst_window_ms,
            stale_after_ms: self.claim.stale_after_ms,
        }
    }

    /// Host expiry, if a TTL is configured
    pub fn expiry_policy(&self) -> Option<ExpiryPolicy> {
        let ttl = self.hosts.ttl_secs.filter(|ttl| *ttl > 0)?;
        Some(ExpiryPolicy {
            ttl_ms: ttl.saturating_mul(1000),
            interval_ms: self.hosts.expire_interval_secs.max(1).saturating_mul(1000),
        })
    }

    /// Build the target scope from the include and exclude ranges
    pub fn build_scope(&self) -> Result<Scope> {
        let params = self.aggregation();
        let include = build_set(&self.scope.include, params)?;
        let exclude = build_set(&self.scope.exclude, params)?;
        Ok(Scope::new(include, exclude))
    }

    /// Check values serde cannot check on its own
    pub fn validate(&self) -> Result<()> {
        self.aggregation().validate()?;
        if self.claim.burst_requests == 0 {
            return Err(Error::config("claim.burst_requests must be at least 1"));
        }
        if self.capture.snaplen <= 0 {
            return Err(Error::config("capture.snaplen must be positive"));
        }
        Ok(())
    }
}

fn build_set(ranges: &[AddressRange], params: AggregationParams) -> Result<Option<AddressSet>> {
    if ranges.is_empty() {
        return Ok(None);
    }
    let mut set = AddressSet::with_params(params)?;
    for range in ranges {
        range.insert_into(&mut set)?;
    }
    Ok(Some(set))
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureSection {
    #[serde(default = "default_true")]
    pub promiscuous: bool,

    #[serde(default = "default_snaplen")]
    pub snaplen: i32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: i32,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            promiscuous: default_true(),
            snaplen: default_snaplen(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScopeSection {
    #[serde(default)]
    pub include: Vec<AddressRange>,

    #[serde(default)]
    pub exclude: Vec<AddressRange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregationSection {
    #[serde(default = "default_bits")]
    pub bits: u8,

    #[serde(default = "default_min_prefix")]
    pub min_prefix: u8,

    #[serde(default = "default_max_prefix")]
    pub max_prefix: u8,
}

impl Default for AggregationSection {
    fn default() -> Self {
        Self {
            bits: default_bits(),
            min_prefix: default_min_prefix(),
            max_prefix: default_max_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostsSection {
    /// Addresses never to claim
    #[serde(default)]
    pub reserve: Vec<Ipv4Addr>,

    /// Forget hosts not seen for this long; unset keeps them forever
    #[serde(default)]
    pub ttl_secs: Option<u64>,

    #[serde(default = "default_expire_interval")]
    pub expire_interval_secs: u64,
}

impl Default for HostsSection {
    fn default() -> Self {
        Self {
            reserve: Vec::new(),
            ttl_secs: None,
            expire_interval_secs: default_expire_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimSection {
    #[serde(default = "default_burst_requests")]
    pub burst_requests: u32,

    #[serde(default = "default_burst_window_ms")]
    pub burst_window_ms: u64,

    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

impl Default for ClaimSection {
    fn default() -> Self {
        Self {
            burst_requests: default_burst_requests(),
            burst_window_ms: default_burst_window_ms(),
            stale_after_ms: default_stale_after_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_snaplen() -> i32 {
    flytrap_capture::capture::DEFAULT_SNAPLEN
}

fn default_timeout_ms() -> i32 {
    flytrap_capture::capture::DEFAULT_TIMEOUT_MS
}

fn default_bits() -> u8 {
    flytrap_core::addrset::DEFAULT_BITS
}

fn default_min_prefix() -> u8 {
    flytrap_core::addrset::DEFAULT_MIN_PREFIX
}

fn default_max_prefix() -> u8 {
    flytrap_core::addrset::DEFAULT_MAX_PREFIX
}

fn default_expire_interval() -> u64 {
    60
}

fn default_burst_requests() -> u32 {
    flytrap_core::hosts::DEFAULT_BURST_REQUESTS
}

fn default_burst_window_ms() -> u64 {
    flytrap_core::hosts::DEFAULT_BURST_WINDOW_MS
}

fn default_stale_after_ms() -> u64 {
    flytrap_core::hosts::DEFAULT_STALE_AFTER_MS
}
