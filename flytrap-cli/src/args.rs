//! CLI argument parsing

use clap::Parser;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tracing::Level;

use crate::range::AddressRange;

#[derive(Parser, Debug)]
#[command(name = "flytrap")]
#[command(version, about = "ARP tarpit: claims unused addresses that scanners probe", long_about = None)]
pub struct Cli {
    /// Network interface to listen and reply on
    #[arg(value_name = "INTERFACE")]
    pub interface: Option<String>,

    /// Only claim addresses in this range (repeatable)
    #[arg(short = 'I', long = "include", value_name = "RANGE")]
    pub include: Vec<AddressRange>,

    /// Never claim addresses in this range (repeatable)
    #[arg(short = 'X', long = "exclude", value_name = "RANGE")]
    pub exclude: Vec<AddressRange>,

    /// Never claim this address (repeatable)
    #[arg(short = 'R', long = "reserve", value_name = "ADDR")]
    pub reserve: Vec<Ipv4Addr>,

    /// Configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Replay a pcap file instead of capturing live; replies are not sent
    #[arg(short = 'r', long = "read", value_name = "PCAP")]
    pub read: Option<PathBuf>,

    /// Log replies instead of sending them
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Verbose output (-v, -vv for increasing verbosity)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Debug output (same as -vv)
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Print the host table on exit
    #[arg(long)]
    pub dump_hosts: bool,
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Maximum log level selected by -v / -d
    pub fn log_level(&self) -> Level {
        match (self.debug, self.verbose) {
            (true, _) | (_, 2..) => Level::TRACE,
            (false, 1) => Level::DEBUG,
            (false, _) => Level::INFO,
        }
    }
}
