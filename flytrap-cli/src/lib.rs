//! CLI interface for flytrap
//!
//! This crate provides the command-line interface, the configuration file,
//! the address-range syntax shared by both, and the daemon run loop.

pub mod args;
pub mod config;
pub mod daemon;
pub mod range;

pub use args::Cli;
pub use config::Config;
pub use range::AddressRange;
