//! Egress rule synthesis
//!
//! Pure functions from resolved inputs to `NetworkPolicyEgressRule` lists.
//! The ACL reconciler does all the fetching (dependency objects, service
//! cache lookups) and hands the results in here, so every shape a policy can
//! take is testable without a cluster.
//!
//! Rule granularity is one egress rule per resolved address. Per-address
//! rules keep policy diffs local: one address changing never rewrites the
//! rule covering its neighbors.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::networking::v1::{
    IPBlock, NetworkPolicyEgressRule, NetworkPolicyPeer, NetworkPolicyPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::{AclDnsEntry, ExternalDns, ExternalIp, ProtoPort, RpaasInstanceRef};
use crate::net_util::{normalize_cidr, single_host_cidr};
use crate::service_cache::ServiceRef;
use crate::{Error, Result, NAMESPACE_NAME_LABEL, TSURU_APP_LABEL};

/// One address of a Tsuru app destination, with its in-cluster match if the
/// service cache found one
#[derive(Clone, Debug)]
pub struct ResolvedIp {
    /// The resolved address
    pub ip: String,
    /// The LoadBalancer service owning this address, when in-cluster
    pub service: Option<ServiceRef>,
}

/// Convert destination ports into NetworkPolicy ports.
///
/// An empty port list means no restriction, which NetworkPolicy expresses by
/// omitting `ports` entirely.
pub fn policy_ports(ports: &[ProtoPort]) -> Option<Vec<NetworkPolicyPort>> {
    if ports.is_empty() {
        return None;
    }
    Some(
        ports
            .iter()
            .map(|p| NetworkPolicyPort {
                protocol: Some(p.protocol.to_uppercase()),
                port: Some(IntOrString::Int(i32::from(p.port))),
                end_port: None,
            })
            .collect(),
    )
}

fn ip_block_peer(cidr: String) -> NetworkPolicyPeer {
    NetworkPolicyPeer {
        ip_block: Some(IPBlock {
            cidr,
            except: None,
        }),
        namespace_selector: None,
        pod_selector: None,
    }
}

/// Peer selecting pods by label within the policy's own namespace
pub fn pod_selector_peer(labels: BTreeMap<String, String>) -> NetworkPolicyPeer {
    NetworkPolicyPeer {
        ip_block: None,
        namespace_selector: None,
        pod_selector: Some(LabelSelector {
            match_labels: Some(labels),
            match_expressions: None,
        }),
    }
}

/// Peer selecting an in-cluster LoadBalancer service's pods: the service's
/// own selector, scoped to the service's namespace.
fn service_peer(svc: &ServiceRef) -> NetworkPolicyPeer {
    NetworkPolicyPeer {
        ip_block: None,
        namespace_selector: Some(LabelSelector {
            match_labels: Some(
                [(NAMESPACE_NAME_LABEL.to_string(), svc.namespace.clone())].into(),
            ),
            match_expressions: None,
        }),
        pod_selector: Some(LabelSelector {
            match_labels: Some(svc.selector.clone()),
            match_expressions: None,
        }),
    }
}

fn single_peer_rule(
    peer: NetworkPolicyPeer,
    ports: Option<Vec<NetworkPolicyPort>>,
) -> NetworkPolicyEgressRule {
    NetworkPolicyEgressRule {
        ports,
        to: Some(vec![peer]),
    }
}

/// Rule for an external IP destination.
///
/// Bare addresses are normalized to single-host CIDRs; anything that is not
/// a valid CIDR after normalization is a permanent error and the destination
/// contributes no rules until its spec changes.
pub fn external_ip_rule(dest: &ExternalIp) -> Result<NetworkPolicyEgressRule> {
    let cidr = normalize_cidr(&dest.ip)?;
    Ok(single_peer_rule(ip_block_peer(cidr), policy_ports(&dest.ports)))
}

/// Rules for an external DNS destination: one per non-expired resolved
/// address, all sharing the destination's ports.
///
/// A missing or not-ready entry is a retryable error; its reconciler has not
/// caught up yet.
pub fn external_dns_rules(
    dest: &ExternalDns,
    entry: Option<&AclDnsEntry>,
    now: DateTime<Utc>,
) -> Result<Vec<NetworkPolicyEgressRule>> {
    let entry = entry.ok_or_else(|| {
        Error::dns(format!("DNS entry for {:?} not found yet", dest.name))
    })?;

    let status = entry.status.as_ref().filter(|s| s.ready).ok_or_else(|| {
        let reason = entry
            .status
            .as_ref()
            .map(|s| s.reason.clone())
            .unwrap_or_default();
        Error::dns(format!("DNS entry for {:?} not ready: {reason}", dest.name))
    })?;

    let ports = policy_ports(&dest.ports);
    Ok(status
        .ips
        .iter()
        .filter(|ip| ip.is_valid_at(now))
        .map(|ip| single_peer_rule(ip_block_peer(single_host_cidr(&ip.address)), ports.clone()))
        .collect())
}

/// Rules for a Tsuru app destination.
///
/// The pod-selector rule always comes first so app-to-app traffic works even
/// while the address object is catching up; each resolved router address
/// adds one rule after it. Addresses owned by an in-cluster LoadBalancer
/// select the service's pods instead of the raw IP.
pub fn tsuru_app_rules(app: &str, ips: &[ResolvedIp]) -> Vec<NetworkPolicyEgressRule> {
    let mut rules = vec![single_peer_rule(
        pod_selector_peer([(TSURU_APP_LABEL.to_string(), app.to_string())].into()),
        None,
    )];

    for resolved in ips {
        let peer = match &resolved.service {
            Some(svc) => service_peer(svc),
            None => ip_block_peer(single_host_cidr(&resolved.ip)),
        };
        rules.push(single_peer_rule(peer, None));
    }

    rules
}

/// Rules for an rpaas instance destination: the instance's pods by label,
/// then one IP-block rule per resolved address.
pub fn rpaas_rules(rpaas: &RpaasInstanceRef, ips: &[String]) -> Vec<NetworkPolicyEgressRule> {
    let labels = crate::crd::AclSource::RpaasInstance(rpaas.clone()).pod_selector_labels();
    let mut rules = vec![single_peer_rule(pod_selector_peer(labels), None)];

    for ip in ips {
        let cidr = if ip.contains('/') {
            ip.clone()
        } else {
            single_host_cidr(ip)
        };
        rules.push(single_peer_rule(ip_block_peer(cidr), None));
    }

    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{AclDnsEntrySpec, AclDnsEntryStatus, DnsEntryIp};
    use chrono::Duration;

    fn dns_entry(ready: bool, ips: Vec<DnsEntryIp>) -> AclDnsEntry {
        let mut entry = AclDnsEntry::new(
            "api.example.com",
            AclDnsEntrySpec {
                host: "api.example.com".to_string(),
            },
        );
        entry.status = Some(AclDnsEntryStatus {
            ready,
            reason: if ready { String::new() } else { "boom".to_string() },
            ips,
        });
        entry
    }

    fn cidr_of(rule: &NetworkPolicyEgressRule) -> &str {
        &rule.to.as_ref().unwrap()[0].ip_block.as_ref().unwrap().cidr
    }

    // ========================================================================
    // External IP
    // ========================================================================

    #[test]
    fn external_ip_emits_one_ip_block_rule_with_ports() {
        let rule = external_ip_rule(&ExternalIp {
            ip: "100.100.100.100/32".to_string(),
            ports: vec![ProtoPort {
                protocol: "tcp".to_string(),
                port: 80,
            }],
        })
        .unwrap();

        assert_eq!(cidr_of(&rule), "100.100.100.100/32");
        let ports = rule.ports.unwrap();
        assert_eq!(ports[0].protocol.as_deref(), Some("TCP"));
        assert_eq!(ports[0].port, Some(IntOrString::Int(80)));
    }

    #[test]
    fn external_ip_without_ports_allows_all_ports() {
        let rule = external_ip_rule(&ExternalIp {
            ip: "1.1.1.1".to_string(),
            ports: vec![],
        })
        .unwrap();

        assert_eq!(cidr_of(&rule), "1.1.1.1/32");
        assert!(rule.ports.is_none());
    }

    #[test]
    fn invalid_external_ip_is_a_permanent_error() {
        let err = external_ip_rule(&ExternalIp {
            ip: "300.0.0.1".to_string(),
            ports: vec![],
        })
        .unwrap_err();
        assert!(!err.is_retryable());
    }

    // ========================================================================
    // External DNS
    // ========================================================================

    #[test]
    fn dns_rules_cover_each_fresh_address() {
        let now = Utc::now();
        let entry = dns_entry(
            true,
            vec![
                DnsEntryIp {
                    address: "1.2.3.4".to_string(),
                    valid_until: (now + Duration::days(7)).to_rfc3339(),
                },
                DnsEntryIp {
                    address: "5.6.7.8".to_string(),
                    valid_until: (now - Duration::hours(1)).to_rfc3339(),
                },
            ],
        );

        let dest = ExternalDns {
            name: "api.example.com".to_string(),
            ports: vec![ProtoPort {
                protocol: "tcp".to_string(),
                port: 443,
            }],
        };
        let rules = external_dns_rules(&dest, Some(&entry), now).unwrap();

        // The expired 5.6.7.8 must not appear.
        assert_eq!(rules.len(), 1);
        assert_eq!(cidr_of(&rules[0]), "1.2.3.4/32");
        assert!(rules[0].ports.is_some());
    }

    #[test]
    fn missing_or_not_ready_dns_entry_is_retryable() {
        let dest = ExternalDns {
            name: "api.example.com".to_string(),
            ports: vec![],
        };

        let err = external_dns_rules(&dest, None, Utc::now()).unwrap_err();
        assert!(err.is_retryable());

        let entry = dns_entry(false, vec![]);
        let err = external_dns_rules(&dest, Some(&entry), Utc::now()).unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("boom"));
    }

    // ========================================================================
    // Tsuru app
    // ========================================================================

    #[test]
    fn app_rules_lead_with_the_pod_selector() {
        let rules = tsuru_app_rules("my-other-app", &[]);
        assert_eq!(rules.len(), 1);

        let peer = &rules[0].to.as_ref().unwrap()[0];
        let labels = peer
            .pod_selector
            .as_ref()
            .unwrap()
            .match_labels
            .as_ref()
            .unwrap();
        assert_eq!(labels.get("tsuru.io/app-name"), Some(&"my-other-app".to_string()));
        assert!(peer.namespace_selector.is_none());
    }

    #[test]
    fn in_cluster_addresses_select_the_service_instead_of_the_ip() {
        let rules = tsuru_app_rules(
            "my-other-app",
            &[
                ResolvedIp {
                    ip: "1.1.1.1".to_string(),
                    service: Some(ServiceRef {
                        name: "my-awesome-service".to_string(),
                        namespace: "default".to_string(),
                        selector: [("svc".to_string(), "my-awesome-service".to_string())].into(),
                    }),
                },
                ResolvedIp {
                    ip: "2.2.2.2".to_string(),
                    service: None,
                },
            ],
        );

        assert_eq!(rules.len(), 3);

        let lb_peer = &rules[1].to.as_ref().unwrap()[0];
        assert!(lb_peer.ip_block.is_none());
        assert_eq!(
            lb_peer
                .pod_selector
                .as_ref()
                .unwrap()
                .match_labels
                .as_ref()
                .unwrap()
                .get("svc"),
            Some(&"my-awesome-service".to_string())
        );
        assert_eq!(
            lb_peer
                .namespace_selector
                .as_ref()
                .unwrap()
                .match_labels
                .as_ref()
                .unwrap()
                .get("name"),
            Some(&"default".to_string())
        );

        assert_eq!(cidr_of(&rules[2]), "2.2.2.2/32");
    }

    // ========================================================================
    // Rpaas instance
    // ========================================================================

    #[test]
    fn rpaas_rules_carry_the_label_pair_then_ips() {
        let rpaas = RpaasInstanceRef {
            service_name: "rpaasv2".to_string(),
            instance: "my-instance".to_string(),
        };
        let rules = rpaas_rules(&rpaas, &["10.1.2.3/32".to_string(), "4.4.4.4".to_string()]);

        assert_eq!(rules.len(), 3);
        let labels = rules[0].to.as_ref().unwrap()[0]
            .pod_selector
            .as_ref()
            .unwrap()
            .match_labels
            .as_ref()
            .unwrap();
        assert_eq!(
            labels.get("rpaas.extensions.tsuru.io/instance-name"),
            Some(&"my-instance".to_string())
        );
        assert_eq!(cidr_of(&rules[1]), "10.1.2.3/32");
        assert_eq!(cidr_of(&rules[2]), "4.4.4.4/32");
    }
}
