//! LoadBalancer IP to Service index
//!
//! Rule synthesis wants to know whether a resolved IP is the ingress address
//! of an in-cluster LoadBalancer service; if so, the egress rule targets the
//! service's pods by selector instead of a raw IP block. Listing every
//! service on every reconcile would hammer the API server, so the full list
//! is indexed once and the snapshot is served for fifteen minutes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::Service;
use kube::api::ListParams;
use kube::{Api, Client};
use parking_lot::RwLock;

use crate::{Result, SERVICE_CACHE_VALIDITY_SECS};

/// The slice of a Service the rule synthesis needs
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceRef {
    /// Service name, for logs
    pub name: String,
    /// Namespace the service (and its pods) live in
    pub namespace: String,
    /// The service's pod selector labels
    pub selector: BTreeMap<String, String>,
}

struct Snapshot {
    by_ip: HashMap<String, ServiceRef>,
    built_at: Instant,
}

/// Cluster-wide cache of LoadBalancer services keyed by ingress IP
pub struct ServiceCache {
    client: Client,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
}

impl ServiceCache {
    /// Create an empty cache; the first lookup triggers a full list
    pub fn new(client: Client) -> Self {
        Self {
            client,
            snapshot: RwLock::new(None),
        }
    }

    /// Look up the LoadBalancer service whose first ingress IP is `ip`.
    ///
    /// Served from the snapshot while it is fresh; otherwise the service
    /// list is rebuilt first. Two callers racing past an expired snapshot
    /// both rebuild, which is wasteful but harmless.
    pub async fn get_by_ip(&self, ip: &str) -> Result<Option<ServiceRef>> {
        if let Some(snap) = self.fresh_snapshot() {
            return Ok(snap.by_ip.get(ip).cloned());
        }

        let snap = self.rebuild().await?;
        Ok(snap.by_ip.get(ip).cloned())
    }

    fn fresh_snapshot(&self) -> Option<Arc<Snapshot>> {
        let guard = self.snapshot.read();
        let snap = guard.as_ref()?;
        if snap.built_at.elapsed() < Duration::from_secs(SERVICE_CACHE_VALIDITY_SECS) {
            Some(Arc::clone(snap))
        } else {
            None
        }
    }

    async fn rebuild(&self) -> Result<Arc<Snapshot>> {
        let api: Api<Service> = Api::all(self.client.clone());
        let mut services = Vec::new();
        let mut params = ListParams::default();

        loop {
            let list = api.list(&params).await?;
            services.extend(list.items);
            match list.metadata.continue_ {
                Some(token) if !token.is_empty() => params = params.continue_token(&token),
                _ => break,
            }
        }

        let snap = Arc::new(Snapshot {
            by_ip: index_by_ingress_ip(&services),
            built_at: Instant::now(),
        });
        *self.snapshot.write() = Some(Arc::clone(&snap));
        Ok(snap)
    }
}

/// Index LoadBalancer services by their first ingress IP.
///
/// Services without the LoadBalancer type, without ingress, or with a
/// hostname-only ingress are skipped.
pub fn index_by_ingress_ip(services: &[Service]) -> HashMap<String, ServiceRef> {
    let mut by_ip = HashMap::new();

    for svc in services {
        let Some(spec) = &svc.spec else { continue };
        if spec.type_.as_deref() != Some("LoadBalancer") {
            continue;
        }

        let ingress_ip = svc
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .and_then(|ingress| ingress.first())
            .and_then(|first| first.ip.clone());
        let Some(ip) = ingress_ip else { continue };
        if ip.is_empty() {
            continue;
        }

        by_ip.insert(
            ip,
            ServiceRef {
                name: svc.metadata.name.clone().unwrap_or_default(),
                namespace: svc.metadata.namespace.clone().unwrap_or_default(),
                selector: spec
                    .selector
                    .clone()
                    .map(|s| s.into_iter().collect())
                    .unwrap_or_default(),
            },
        );
    }

    by_ip
}
