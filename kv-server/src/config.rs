//! Command-line configuration, parsed with `clap`.

use std::net::Ipv4Addr;

use clap::Parser;

/// Runtime flags for the store's TCP front end.
#[derive(Debug, Clone, Parser)]
#[command(name = "kv-server", about = "in-memory key-value store")]
pub struct Config {
    /// Address to bind the listening socket to.
    #[arg(long, default_value_t = Ipv4Addr::new(0, 0, 0, 0))]
    pub addr: Ipv4Addr,

    /// Port to bind the listening socket to.
    #[arg(long, default_value_t = 1234)]
    pub port: u16,

    /// Idle connection timeout, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    pub idle_timeout_ms: u64,

    /// Worker pool thread count for deferred ZSet teardown.
    #[arg(long, default_value_t = 4)]
    pub worker_threads: usize,
}
