//! Structured logging setup for the `dftp` binary.
//!
//! Every subsystem (scanner, cluster registry, gossip, proxy, HTTP, FTP)
//! logs through `tracing` directly; this crate only owns process-wide
//! subscriber initialization, so there is exactly one place that decides
//! format and filtering.

use std::io;

/// Initializes the global `tracing` subscriber: `RUST_LOG`-driven filtering,
/// writing to stderr so stdout stays free for any data a caller pipes out of
/// the read surfaces.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();
}
