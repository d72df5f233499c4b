//! ACLDNSEntry reconciler
//!
//! Keeps one hostname's address set fresh. Every successful lookup extends
//! the TTL of the addresses it saw and prunes the ones past theirs; a failed
//! lookup only flips readiness and leaves the address set alone, so DNS
//! outages degrade to yesterday's answers instead of an empty policy.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{error, instrument, warn};

use crate::crd::{AclDnsEntry, AclDnsEntryStatus, DnsEntryIp};
use crate::dns::DnsResolver;
use crate::{Error, Result, DNS_TTL_DAYS, REQUEUE_DRIFT_SECS, REQUEUE_FAILURE_SECS};

/// Dependencies for the ACLDNSEntry reconciler
pub struct DnsEntryContext {
    /// Kubernetes client
    pub client: Client,
    /// DNS resolver
    pub resolver: Arc<dyn DnsResolver>,
}

/// Reconcile one ACLDNSEntry: resolve, merge, prune, publish.
#[instrument(skip(entry, ctx), fields(host = %entry.spec.host))]
pub async fn reconcile(entry: Arc<AclDnsEntry>, ctx: Arc<DnsEntryContext>) -> Result<Action> {
    let api: Api<AclDnsEntry> = Api::all(ctx.client.clone());
    let old_status = entry.status.clone().unwrap_or_default();

    let lookup = ctx.resolver.lookup(&entry.spec.host).await;
    let requeue = match &lookup {
        Ok(_) => REQUEUE_DRIFT_SECS,
        Err(e) => {
            warn!(error = %e, "lookup failed, keeping previous addresses");
            REQUEUE_FAILURE_SECS
        }
    };

    let addresses = lookup.map(|ips| ips.iter().map(ToString::to_string).collect::<Vec<_>>());
    let new_status = next_status(&old_status, addresses, Utc::now());

    if new_status != old_status {
        super::patch_status(&api, &entry.name_any(), &new_status).await?;
    }

    Ok(Action::requeue(Duration::from_secs(requeue)))
}

/// Map reconcile errors (API server failures only; lookup failures are
/// handled inline) to a retry
pub fn error_policy(entry: Arc<AclDnsEntry>, error: &Error, _ctx: Arc<DnsEntryContext>) -> Action {
    error!(?error, host = %entry.spec.host, "reconciliation failed");
    Action::requeue(Duration::from_secs(30))
}

/// Compute the next status from the previous one and a lookup outcome
fn next_status(
    old: &AclDnsEntryStatus,
    lookup: Result<Vec<String>>,
    now: DateTime<Utc>,
) -> AclDnsEntryStatus {
    match lookup {
        Ok(addresses) => AclDnsEntryStatus {
            ready: true,
            reason: String::new(),
            ips: refresh_ips(&old.ips, &addresses, now),
        },
        Err(e) => AclDnsEntryStatus {
            ready: false,
            reason: e.to_string(),
            ips: old.ips.clone(),
        },
    }
}

/// Merge freshly observed addresses into the tracked set.
///
/// Addresses seen in this lookup get a new seven-day expiry, whether they
/// were known before or not; entries past their expiry are dropped; the
/// result is sorted by address so repeated reconciles are idempotent.
pub fn refresh_ips(existing: &[DnsEntryIp], found: &[String], now: DateTime<Utc>) -> Vec<DnsEntryIp> {
    let valid_until = (now + ChronoDuration::days(DNS_TTL_DAYS)).to_rfc3339();

    let mut ips = existing.to_vec();
    for address in found {
        match ips.iter_mut().find(|ip| ip.address == *address) {
            Some(known) => known.valid_until = valid_until.clone(),
            None => ips.push(DnsEntryIp {
                address: address.clone(),
                valid_until: valid_until.clone(),
            }),
        }
    }

    ips.retain(|ip| ip.is_valid_at(now));
    ips.sort_by(|a, b| a.address.cmp(&b.address));
    ips
}
