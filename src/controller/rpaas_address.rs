//! RpaasInstanceAddress reconciler
//!
//! The directory exposes an rpaas instance's address in the free-form
//! `CustomInfo` metadata. Only literal IPs and CIDRs are usable today;
//! hostname-valued addresses are left alone until resolution support lands.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{error, instrument, warn};

use crate::crd::{ResourceAddressStatus, RpaasInstanceAddress};
use crate::net_util::is_ip_range;
use crate::tsuru::TsuruApi;
use crate::{Error, Result, REQUEUE_DRIFT_SECS, REQUEUE_FAILURE_SECS};

/// Dependencies for the RpaasInstanceAddress reconciler
pub struct RpaasAddressContext {
    /// Kubernetes client
    pub client: Client,
    /// Tsuru directory API
    pub tsuru: Arc<dyn TsuruApi>,
}

/// Reconcile one RpaasInstanceAddress from the directory's instance record.
#[instrument(
    skip(addr, ctx),
    fields(service = %addr.spec.service_name, instance = %addr.spec.instance)
)]
pub async fn reconcile(
    addr: Arc<RpaasInstanceAddress>,
    ctx: Arc<RpaasAddressContext>,
) -> Result<Action> {
    let api: Api<RpaasInstanceAddress> = Api::all(ctx.client.clone());
    let old_status = addr.status.clone().unwrap_or_default();

    let (new_status, requeue) = match fill(&addr, &ctx, &old_status).await {
        Ok(status) => (status, REQUEUE_DRIFT_SECS),
        Err(e) => {
            warn!(error = %e, "could not refresh rpaas instance address");
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
    addr: Arc<RpaasInstanceAddress>,
    error: &Error,
    _ctx: Arc<RpaasAddressContext>,
) -> Action {
    error!(?error, instance = %addr.spec.instance, "reconciliation failed");
    Action::requeue(Duration::from_secs(30))
}

async fn fill(
    addr: &RpaasInstanceAddress,
    ctx: &RpaasAddressContext,
    old_status: &ResourceAddressStatus,
) -> Result<ResourceAddressStatus> {
    let info = ctx
        .tsuru
        .service_instance_info(&addr.spec.service_name, &addr.spec.instance)
        .await?
        .ok_or_else(|| {
            Error::not_found(format!(
                "service instance {}/{} not found",
                addr.spec.service_name, addr.spec.instance
            ))
        })?;

    Ok(next_status(
        old_status,
        &info.pool,
        info.address(),
        Utc::now(),
    ))
}

/// Compute the next status from the instance's advertised address.
///
/// No address and hostname-valued addresses leave the status untouched.
/// Hostname resolution for rpaas addresses is not implemented.
fn next_status(
    old: &ResourceAddressStatus,
    pool: &str,
    address: Option<&str>,
    now: DateTime<Utc>,
) -> ResourceAddressStatus {
    let Some(address) = address.filter(|a| !a.is_empty()) else {
        return old.clone();
    };
    if !is_ip_range(address) {
        return old.clone();
    }

    let ips = vec![address.to_string()];
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_address_becomes_the_ip_set() {
        let next = next_status(
            &ResourceAddressStatus::default(),
            "pool-a",
            Some("10.1.2.3/32"),
            Utc::now(),
        );

        assert!(next.ready);
        assert_eq!(next.ips, vec!["10.1.2.3/32"]);
        assert_eq!(next.pool, "pool-a");
    }

    #[test]
    fn hostname_addresses_leave_the_status_untouched() {
        let old = ResourceAddressStatus {
            ready: true,
            ips: vec!["10.1.2.3/32".to_string()],
            ..Default::default()
        };

        let next = next_status(&old, "pool-a", Some("proxy.example.com"), Utc::now());
        assert_eq!(next, old);
    }

    #[test]
    fn empty_address_leaves_the_status_untouched() {
        let old = ResourceAddressStatus::default();
        assert_eq!(next_status(&old, "pool-a", None, Utc::now()), old);
        assert_eq!(next_status(&old, "pool-a", Some(""), Utc::now()), old);
    }

    #[test]
    fn unchanged_address_does_not_touch_the_timestamp() {
        let old = ResourceAddressStatus {
            ready: true,
            updated_at: "2026-08-01T00:00:00Z".to_string(),
            ips: vec!["10.1.2.3/32".to_string()],
            pool: "pool-a".to_string(),
            ..Default::default()
        };

        let next = next_status(&old, "pool-a", Some("10.1.2.3/32"), Utc::now());
        assert_eq!(next, old);
    }
}
