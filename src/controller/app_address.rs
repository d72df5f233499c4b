//! TsuruAppAddress reconciler
//!
//! Resolves a Tsuru app's router addresses into the IP set consumed by rule
//! synthesis. The directory lookup and each DNS resolution are bounded at
//! ten seconds; individual hosts failing to resolve are skipped rather than
//! failing the whole refresh.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{error, instrument, warn};

use crate::crd::{ResourceAddressStatus, TsuruAppAddress};
use crate::dns::DnsResolver;
use crate::tsuru::TsuruApi;
use crate::{Error, Result, REQUEUE_DRIFT_SECS, REQUEUE_FAILURE_SECS};

/// Dependencies for the TsuruAppAddress reconciler
pub struct AppAddressContext {
    /// Kubernetes client
    pub client: Client,
    /// Tsuru directory API
    pub tsuru: Arc<dyn TsuruApi>,
    /// DNS resolver
    pub resolver: Arc<dyn DnsResolver>,
}

/// Reconcile one TsuruAppAddress: directory lookup, DNS resolution, status.
#[instrument(skip(addr, ctx), fields(app = %addr.spec.name))]
pub async fn reconcile(addr: Arc<TsuruAppAddress>, ctx: Arc<AppAddressContext>) -> Result<Action> {
    let api: Api<TsuruAppAddress> = Api::all(ctx.client.clone());
    let old_status = addr.status.clone().unwrap_or_default();

    let (new_status, requeue) = match fill(&addr, &ctx, &old_status).await {
        Ok(status) => (status, REQUEUE_DRIFT_SECS),
        Err(e) => {
            warn!(error = %e, "could not refresh app address");
            (
                ResourceAddressStatus {
                    ready: false,
                    reason: e.to_string(),
                    ..old_status.clone()
                },
                REQUEUE_FAILURE_SECS,
            )
        }
    };

    if new_status.ready != old_status.ready || new_status.ips != old_status.ips {
        super::patch_status(&api, &addr.name_any(), &new_status).await?;
    }

    Ok(Action::requeue(Duration::from_secs(requeue)))
}

/// Map API server errors to a retry
pub fn error_policy(
    addr: Arc<TsuruAppAddress>,
    error: &Error,
    _ctx: Arc<AppAddressContext>,
) -> Action {
    error!(?error, app = %addr.spec.name, "reconciliation failed");
    Action::requeue(Duration::from_secs(30))
}

async fn fill(
    addr: &TsuruAppAddress,
    ctx: &AppAddressContext,
    old_status: &ResourceAddressStatus,
) -> Result<ResourceAddressStatus> {
    let info = ctx
        .tsuru
        .app_info(&addr.spec.name)
        .await?
        .ok_or_else(|| Error::not_found(format!("app {:?} not found", addr.spec.name)))?;

    let mut hosts = info.router_hosts();
    hosts.extend(addr.spec.additional_ips.iter().cloned());

    let ips = resolve_hosts(ctx.resolver.as_ref(), &hosts).await;
    Ok(next_status(old_status, &info.pool, ips, Utc::now()))
}

/// Resolve every host, skipping failures, returning the sorted union
async fn resolve_hosts(resolver: &dyn DnsResolver, hosts: &[String]) -> Vec<String> {
    let mut found = BTreeSet::new();

    for host in hosts {
        // Literal addresses need no lookup.
        if host.parse::<std::net::IpAddr>().is_ok() {
            found.insert(host.clone());
            continue;
        }

        match resolver.lookup(host).await {
            Ok(ips) => found.extend(ips.iter().map(ToString::to_string)),
            Err(e) => warn!(host = %host, error = %e, "skipping unresolvable router host"),
        }
    }

    found.into_iter().collect()
}

/// Keep the status untouched while readiness and the IP set are stable;
/// refresh everything (pool and timestamp included) once either moves.
fn next_status(
    old: &ResourceAddressStatus,
    pool: &str,
    ips: Vec<String>,
    now: DateTime<Utc>,
) -> ResourceAddressStatus {
    if old.ready && old.ips == ips {
        return old.clone();
    }

    ResourceAddressStatus {
        ready: true,
        reason: String::new(),
        updated_at: now.to_rfc3339(),
        ips,
        pool: pool.to_string(),
    }
}
