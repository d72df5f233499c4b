//! DNS resolution behind a trait
//!
//! Reconcilers never call the system resolver directly; they hold a
//! `dyn DnsResolver` so tests can substitute fixed answers. The production
//! implementation bounds every lookup at ten seconds, a hung resolver must
//! not stall a reconcile queue.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;

use crate::{Error, Result, LOOKUP_TIMEOUT_SECS};

/// Resolves hostnames to IP addresses
#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// Look up all addresses for a hostname, sorted and deduplicated
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>>;
}

/// Production resolver backed by the operating system's stub resolver
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemResolver;

#[async_trait]
impl DnsResolver for SystemResolver {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>> {
        // lookup_host wants a socket address; the port is discarded.
        let target = format!("{host}:0");

        let addrs = tokio::time::timeout(
            Duration::from_secs(LOOKUP_TIMEOUT_SECS),
            tokio::net::lookup_host(target),
        )
        .await
        .map_err(|_| {
            Error::dns(format!(
                "lookup for {host:?} timed out after {LOOKUP_TIMEOUT_SECS}s"
            ))
        })?
        .map_err(|e| Error::dns(format!("lookup for {host:?} failed: {e}")))?;

        let mut ips: Vec<IpAddr> = addrs.map(|sa| sa.ip()).collect();
        ips.sort();
        ips.dedup();

        if ips.is_empty() {
            return Err(Error::dns(format!("no addresses found for {host:?}")));
        }
        Ok(ips)
    }
}
