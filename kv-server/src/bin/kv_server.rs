//! Bring-up binary: parse CLI flags, install logging, bind the listening
//! socket, and run the event loop until `shutdown` is received.
//!
//! Signal handling is intentionally not implemented; the only orderly
//! exit path is the `shutdown` command.

use clap::Parser;
use kv_server::{Config, EventLoop};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut event_loop = match EventLoop::bind(&config) {
        Ok(event_loop) => event_loop,
        Err(e) => {
            eprintln!("fatal: failed to bind {}:{}: {e}", config.addr, config.port);
            std::process::exit(1);
        }
    };

    event_loop.run()?;
    Ok(())
}
