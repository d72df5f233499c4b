//! RpaasInstance source adapter
//!
//! An rpaas instance declares its intent directly in its spec: the external
//! upstreams its proxy may reach and the Tsuru apps bound behind it. Both
//! convert into ACL destinations; the ACL is owned by the instance so it
//! disappears with it.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use tracing::{error, instrument};

use crate::crd::{
    AclDestination, AclDestinationTarget, AclSource, ExternalDns, ExternalIp, ProtoPort,
    RpaasInstance, RpaasInstanceRef, RpaasInstanceSpec,
};
use crate::net_util::{is_ip_range, is_kubernetes_internal, parse_host_port};
use crate::{Error, Result, RPAAS_INSTANCE_LABEL, RPAAS_SERVICE_LABEL};

/// Dependencies for the RpaasInstance adapter
pub struct RpaasInstanceContext {
    /// Kubernetes client
    pub client: Client,
}

/// Project one rpaas instance's upstreams and binds into its ACL.
#[instrument(skip(instance, ctx), fields(instance = %instance.name_any()))]
pub async fn reconcile(
    instance: Arc<RpaasInstance>,
    ctx: Arc<RpaasInstanceContext>,
) -> Result<Action> {
    let namespace = instance
        .namespace()
        .ok_or_else(|| Error::validation("RpaasInstance has no namespace"))?;

    let service_name = instance
        .labels()
        .get(RPAAS_SERVICE_LABEL)
        .cloned()
        .unwrap_or_default();
    let instance_name = instance
        .labels()
        .get(RPAAS_INSTANCE_LABEL)
        .cloned()
        .unwrap_or_default();

    let (destinations, warnings) = rpaas_destinations(&instance.spec);

    super::sync_source_acl(
        &ctx.client,
        &namespace,
        &instance.name_any(),
        AclSource::RpaasInstance(RpaasInstanceRef {
            service_name,
            instance: instance_name,
        }),
        destinations,
        warnings,
        instance.controller_owner_ref(&()),
    )
    .await
}

/// Retry API server failures
pub fn error_policy(
    instance: Arc<RpaasInstance>,
    error: &Error,
    _ctx: Arc<RpaasInstanceContext>,
) -> Action {
    error!(?error, instance = %instance.name_any(), "reconciliation failed");
    Action::requeue(Duration::from_secs(30))
}

fn tcp_ports(port: u16) -> Vec<ProtoPort> {
    if port == 0 {
        return vec![];
    }
    vec![ProtoPort {
        protocol: "tcp".to_string(),
        port,
    }]
}

/// Convert an instance's allowed upstreams and binds into ACL destinations.
///
/// Upstream hosts split on shape: literal IPs and CIDRs become external-IP
/// destinations, everything else external-DNS. Each bind contributes the
/// bound app plus, for binds routed outside the cluster, an external
/// destination for the bind host with its scheme-derived port.
pub fn rpaas_destinations(spec: &RpaasInstanceSpec) -> (Vec<AclDestination>, Vec<String>) {
    let mut destinations = Vec::new();
    let warnings = Vec::new();

    for upstream in &spec.allowed_upstreams {
        let target = if is_ip_range(&upstream.host) {
            AclDestinationTarget::ExternalIp(ExternalIp {
                ip: upstream.host.clone(),
                ports: tcp_ports(upstream.port),
            })
        } else {
            AclDestinationTarget::ExternalDns(ExternalDns {
                name: upstream.host.clone(),
                ports: tcp_ports(upstream.port),
            })
        };
        destinations.push(AclDestination {
            rule_id: String::new(),
            target,
        });
    }

    for bind in &spec.binds {
        destinations.push(AclDestination {
            rule_id: String::new(),
            target: AclDestinationTarget::TsuruApp(bind.name.clone()),
        });

        if is_kubernetes_internal(&bind.host) {
            continue;
        }
        let (host, port) = parse_host_port(&bind.host);
        if host.is_empty() {
            continue;
        }

        let target = if is_ip_range(&host) {
            AclDestinationTarget::ExternalIp(ExternalIp {
                ip: host,
                ports: tcp_ports(port),
            })
        } else {
            AclDestinationTarget::ExternalDns(ExternalDns {
                name: host,
                ports: tcp_ports(port),
            })
        };
        destinations.push(AclDestination {
            rule_id: String::new(),
            target,
        });
    }

    (destinations, warnings)
}
