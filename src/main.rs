//! onionprobe - network censorship measurement probe
//!
//! Runs pluggable network tests over a list of inputs with bounded
//! parallelism, optionally through a managed Tor daemon, and writes a
//! JSON report.
//!
//! # Usage
//!
//! ```bash
//! # Check TCP reachability of every host:port in hosts.txt
//! onionprobe -n 20 -o tcp.json tcp_connect -f hosts.txt
//!
//! # Build a circuit through each relay, resuming after 100 inputs
//! onionprobe bridget -f relays.txt --resume 100
//!
//! # Dump the relay directory
//! onionprobe relay_list --guards-only
//! ```

use anyhow::Result;
use clap::Parser;
use onionprobe::cli::{self, Cli};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    cli::execute(cli).await
}
