//! Log output for the node
//!
//! Library crates log through the `log` facade (targets `masternode`,
//! `mnpayments`, `mnbudget`) and through `tracing`; both end up in the same
//! `tracing-subscriber` formatter. `RUST_LOG` overrides the configured level.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

pub fn filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(level)?),
    }
}

pub fn init(level: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(filter(level)?)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!("failed to initialise logging: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_directives() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(filter("info").is_ok());
        assert!(filter("warn,mnbudget=debug,masternode=trace").is_ok());
    }
}
