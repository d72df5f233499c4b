//! ACL reconciler
//!
//! The heart of the operator: turns one ACL's destination list into a
//! NetworkPolicy. Dependency objects (DNS entries, address trackers) are
//! created on first reference and read back through their status on later
//! passes; a destination that fails to resolve falls back to its last
//! known-good rules from `status.stale` so transient outages never cut
//! traffic that was flowing yesterday.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::networking::v1::{NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicySpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{Api, ObjectMeta, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use tracing::{error, info, instrument, warn};

use crate::crd::{
    Acl, AclDestinationTarget, AclDnsEntry, AclDnsEntrySpec, AclRuleError, AclSource,
    AclStaleEntry, AclStatus, RpaasInstanceAddress, RpaasInstanceAddressSpec, RpaasInstanceRef,
    TsuruAppAddress, TsuruAppAddressSpec,
};
use crate::names::valid_resource_name;
use crate::rules;
use crate::service_cache::ServiceCache;
use crate::{Error, Result, REQUEUE_DRIFT_SECS};

/// Dependencies for the ACL reconciler
pub struct AclContext {
    /// Kubernetes client
    pub client: Client,
    /// LoadBalancer IP index shared across reconciles
    pub service_cache: Arc<ServiceCache>,
}

/// Name of the NetworkPolicy derived from an ACL source
pub fn policy_name(source: &AclSource) -> String {
    valid_resource_name(&format!("acl-{}", source.key()))
}

/// Name of the ACLDNSEntry tracking a hostname
pub fn dns_entry_name(host: &str) -> String {
    valid_resource_name(host)
}

/// Name of the TsuruAppAddress tracking an app
pub fn app_address_name(app: &str) -> String {
    valid_resource_name(app)
}

/// Name of the RpaasInstanceAddress tracking an instance
pub fn rpaas_address_name(rpaas: &RpaasInstanceRef) -> String {
    valid_resource_name(&format!("rpaas-{}-{}", rpaas.service_name, rpaas.instance))
}

/// Reconcile one ACL into its NetworkPolicy and status.
#[instrument(skip(acl, ctx), fields(acl = %acl.name_any(), namespace = ?acl.namespace()))]
pub async fn reconcile(acl: Arc<Acl>, ctx: Arc<AclContext>) -> Result<Action> {
    let namespace = acl
        .namespace()
        .ok_or_else(|| Error::validation("ACL object has no namespace"))?;
    let old_status = acl.status.clone().unwrap_or_default();

    let mut outcomes = Vec::with_capacity(acl.spec.destinations.len());
    for dest in &acl.spec.destinations {
        let outcome = match resolve_destination(&ctx, &dest.target).await {
            Ok(rules) => DestResolution::Rules(rules),
            Err(e) if e.is_retryable() => DestResolution::Transient(e.to_string()),
            Err(e) => DestResolution::Permanent(e.to_string()),
        };
        outcomes.push(outcome);
    }

    let (egress, rule_errors, stale) = assemble(&acl, outcomes, &old_status.stale);

    let np_name = policy_name(&acl.spec.source);
    apply_network_policy(&ctx.client, &acl, &namespace, &np_name, egress).await?;

    let new_status = AclStatus {
        ready: true,
        reason: String::new(),
        warning_errors: old_status.warning_errors.clone(),
        rule_errors,
        stale,
        network_policy: np_name,
    };

    if new_status != old_status {
        let api: Api<Acl> = Api::namespaced(ctx.client.clone(), &namespace);
        super::patch_status(&api, &acl.name_any(), &new_status).await?;
    }

    Ok(Action::requeue(Duration::from_secs(REQUEUE_DRIFT_SECS)))
}

/// Retry API server failures; a spec that can never reconcile waits for an
/// edit instead of spinning.
pub fn error_policy(acl: Arc<Acl>, error: &Error, _ctx: Arc<AclContext>) -> Action {
    error!(?error, acl = %acl.name_any(), "reconciliation failed");
    if error.is_retryable() {
        Action::requeue(Duration::from_secs(30))
    } else {
        Action::await_change()
    }
}

/// Resolve one destination into its egress rules.
///
/// Missing dependency objects are created here with spec only; their own
/// reconcilers fill the status and a later pass of this ACL picks it up.
pub async fn resolve_destination(
    ctx: &AclContext,
    target: &AclDestinationTarget,
) -> Result<Vec<NetworkPolicyEgressRule>> {
    match target {
        AclDestinationTarget::ExternalIp(dest) => Ok(vec![rules::external_ip_rule(dest)?]),

        AclDestinationTarget::ExternalDns(dest) => {
            let api: Api<AclDnsEntry> = Api::all(ctx.client.clone());
            let name = dns_entry_name(&dest.name);

            match api.get_opt(&name).await? {
                Some(entry) => rules::external_dns_rules(dest, Some(&entry), Utc::now()),
                None => {
                    let entry = AclDnsEntry::new(
                        &name,
                        AclDnsEntrySpec {
                            host: dest.name.clone(),
                        },
                    );
                    super::ensure_exists(&api, &entry).await?;
                    info!(host = %dest.name, "created DNS entry, waiting for resolution");
                    Err(Error::dns(format!(
                        "DNS entry for {:?} created, not resolved yet",
                        dest.name
                    )))
                }
            }
        }

        AclDestinationTarget::TsuruApp(app) => {
            let api: Api<TsuruAppAddress> = Api::all(ctx.client.clone());
            let name = app_address_name(app);

            let addr = match api.get_opt(&name).await? {
                Some(addr) => Some(addr),
                None => {
                    let addr = TsuruAppAddress::new(
                        &name,
                        TsuruAppAddressSpec {
                            name: app.clone(),
                            additional_ips: vec![],
                        },
                    );
                    super::ensure_exists(&api, &addr).await?;
                    info!(app = %app, "created app address tracker");
                    None
                }
            };

            let mut resolved = Vec::new();
            if let Some(status) = addr.as_ref().and_then(|a| a.status.as_ref()) {
                if status.ready {
                    for ip in &status.ips {
                        resolved.push(rules::ResolvedIp {
                            ip: ip.clone(),
                            service: ctx.service_cache.get_by_ip(ip).await?,
                        });
                    }
                }
            }

            Ok(rules::tsuru_app_rules(app, &resolved))
        }

        // Pool destinations are accepted but synthesize nothing; a pool has
        // no stable selector or address set to point a policy at.
        AclDestinationTarget::TsuruAppPool(_) => Ok(vec![]),

        AclDestinationTarget::RpaasInstance(rpaas) => {
            let api: Api<RpaasInstanceAddress> = Api::all(ctx.client.clone());
            let name = rpaas_address_name(rpaas);

            let addr = match api.get_opt(&name).await? {
                Some(addr) => Some(addr),
                None => {
                    let addr = RpaasInstanceAddress::new(
                        &name,
                        RpaasInstanceAddressSpec {
                            service_name: rpaas.service_name.clone(),
                            instance: rpaas.instance.clone(),
                        },
                    );
                    super::ensure_exists(&api, &addr).await?;
                    info!(instance = %rpaas.instance, "created rpaas address tracker");
                    None
                }
            };

            let ips = addr
                .as_ref()
                .and_then(|a| a.status.as_ref())
                .filter(|s| s.ready)
                .map(|s| s.ips.clone())
                .unwrap_or_default();

            Ok(rules::rpaas_rules(rpaas, &ips))
        }
    }
}

/// Per-destination resolution outcome
enum DestResolution {
    Rules(Vec<NetworkPolicyEgressRule>),
    Transient(String),
    Permanent(String),
}

/// Combine per-destination outcomes with the previous stale cache.
///
/// Successful destinations contribute their rules and (when they carry a
/// ruleID) refresh the stale cache. Transiently failing destinations fall
/// back to their cached rules. Permanently failing destinations contribute
/// no rules until their spec changes, but keep their cache entry; an entry
/// only disappears with its destination.
fn assemble(
    acl: &Acl,
    outcomes: Vec<DestResolution>,
    old_stale: &[AclStaleEntry],
) -> (
    Vec<NetworkPolicyEgressRule>,
    Vec<AclRuleError>,
    Vec<AclStaleEntry>,
) {
    let stale_by_id: HashMap<&str, &AclStaleEntry> = old_stale
        .iter()
        .map(|entry| (entry.rule_id.as_str(), entry))
        .collect();

    let mut egress = Vec::new();
    let mut rule_errors = Vec::new();
    let mut stale = Vec::new();

    for (dest, outcome) in acl.spec.destinations.iter().zip(outcomes) {
        match outcome {
            DestResolution::Rules(rules) => {
                if !dest.rule_id.is_empty() {
                    stale.push(AclStaleEntry {
                        rule_id: dest.rule_id.clone(),
                        rules: rules.clone(),
                    });
                }
                egress.extend(rules);
            }
            DestResolution::Transient(message) => {
                rule_errors.push(AclRuleError {
                    rule_id: dest.rule_id.clone(),
                    error: message.clone(),
                });
                if let Some(prev) = stale_by_id
                    .get(dest.rule_id.as_str())
                    .filter(|_| !dest.rule_id.is_empty())
                {
                    warn!(
                        rule_id = %dest.rule_id,
                        error = %message,
                        "destination failed to resolve, using stale rules"
                    );
                    egress.extend(prev.rules.iter().cloned());
                    stale.push((*prev).clone());
                }
            }
            DestResolution::Permanent(message) => {
                rule_errors.push(AclRuleError {
                    rule_id: dest.rule_id.clone(),
                    error: message,
                });
                if let Some(prev) = stale_by_id
                    .get(dest.rule_id.as_str())
                    .filter(|_| !dest.rule_id.is_empty())
                {
                    stale.push((*prev).clone());
                }
            }
        }
    }

    (egress, rule_errors, stale)
}

/// The NetworkPolicy an ACL should materialize to
fn desired_network_policy(
    acl: &Acl,
    namespace: &str,
    name: &str,
    egress: Vec<NetworkPolicyEgressRule>,
) -> NetworkPolicy {
    NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            owner_references: acl.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: Some(NetworkPolicySpec {
            pod_selector: LabelSelector {
                match_labels: Some(acl.spec.source.pod_selector_labels()),
                match_expressions: None,
            },
            policy_types: Some(vec!["Egress".to_string()]),
            egress: Some(egress),
            ingress: None,
        }),
    }
}

/// Write the NetworkPolicy only when its spec differs from the live object
async fn apply_network_policy(
    client: &Client,
    acl: &Acl,
    namespace: &str,
    name: &str,
    egress: Vec<NetworkPolicyEgressRule>,
) -> Result<()> {
    let api: Api<NetworkPolicy> = Api::namespaced(client.clone(), namespace);
    let desired = desired_network_policy(acl, namespace, name, egress);

    if let Some(existing) = api.get_opt(name).await? {
        if existing.spec == desired.spec {
            return Ok(());
        }
    }

    info!(policy = %name, "applying network policy");
    api.patch(
        name,
        &PatchParams::apply(super::FIELD_MANAGER).force(),
        &Patch::Apply(&desired),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{AclDestination, AclSpec, ExternalIp, ProtoPort};

    fn acl_with_destinations(destinations: Vec<AclDestination>) -> Acl {
        let mut acl = Acl::new(
            "myapp",
            AclSpec {
                source: AclSource::TsuruApp("myapp".to_string()),
                destinations,
            },
        );
        acl.metadata.namespace = Some("default".to_string());
        acl
    }

    fn ip_dest(rule_id: &str, ip: &str, ports: Vec<ProtoPort>) -> AclDestination {
        AclDestination {
            rule_id: rule_id.to_string(),
            target: AclDestinationTarget::ExternalIp(ExternalIp {
                ip: ip.to_string(),
                ports,
            }),
        }
    }

    fn resolved(dest: &AclDestination) -> DestResolution {
        match &dest.target {
            AclDestinationTarget::ExternalIp(ip) => {
                DestResolution::Rules(vec![rules::external_ip_rule(ip).unwrap()])
            }
            _ => panic!("only IP destinations in these fixtures"),
        }
    }

    // ========================================================================
    // Scenario: two IP destinations, one with ports, one without
    // ========================================================================

    #[test]
    fn two_ip_destinations_produce_two_ordered_rules() {
        let acl = acl_with_destinations(vec![
            ip_dest(
                "r1",
                "100.100.100.100/32",
                vec![ProtoPort {
                    protocol: "tcp".to_string(),
                    port: 80,
                }],
            ),
            ip_dest("r2", "1.1.1.1/32", vec![]),
        ]);
        let outcomes = acl.spec.destinations.iter().map(resolved).collect();

        let (egress, rule_errors, stale) = assemble(&acl, outcomes, &[]);

        assert!(rule_errors.is_empty());
        assert_eq!(egress.len(), 2);
        assert!(egress[0].ports.is_some());
        assert!(egress[1].ports.is_none());
        assert_eq!(stale.len(), 2);

        let np = desired_network_policy(&acl, "default", &policy_name(&acl.spec.source), egress);
        let spec = np.spec.unwrap();
        assert_eq!(
            spec.pod_selector.match_labels.unwrap().get("tsuru.io/app-name"),
            Some(&"myapp".to_string())
        );
        assert_eq!(spec.policy_types, Some(vec!["Egress".to_string()]));
        assert_eq!(spec.egress.unwrap().len(), 2);
    }

    // ========================================================================
    // Stale fallback
    // ========================================================================

    #[test]
    fn transient_failure_falls_back_to_stale_rules() {
        let dest = ip_dest("r1", "1.1.1.1/32", vec![]);
        let cached_rules = vec![rules::external_ip_rule(&ExternalIp {
            ip: "1.1.1.1/32".to_string(),
            ports: vec![],
        })
        .unwrap()];
        let old_stale = vec![AclStaleEntry {
            rule_id: "r1".to_string(),
            rules: cached_rules.clone(),
        }];
        let acl = acl_with_destinations(vec![dest]);

        let (egress, rule_errors, stale) = assemble(
            &acl,
            vec![DestResolution::Transient("dns error: boom".to_string())],
            &old_stale,
        );

        assert_eq!(egress, cached_rules, "cached rules must keep flowing");
        assert_eq!(rule_errors.len(), 1);
        assert_eq!(rule_errors[0].rule_id, "r1");
        assert_eq!(stale, old_stale, "the cache entry survives the failure");
    }

    #[test]
    fn permanent_failure_contributes_no_rules_but_keeps_the_cache() {
        let acl = acl_with_destinations(vec![ip_dest("r1", "300.0.0.1", vec![])]);
        let old_stale = vec![AclStaleEntry {
            rule_id: "r1".to_string(),
            rules: vec![NetworkPolicyEgressRule::default()],
        }];

        let (egress, rule_errors, stale) = assemble(
            &acl,
            vec![DestResolution::Permanent("validation error".to_string())],
            &old_stale,
        );

        // A broken spec must not keep stale rules flowing, but the cache
        // entry stays until the destination itself is removed.
        assert!(egress.is_empty());
        assert_eq!(rule_errors.len(), 1);
        assert_eq!(stale, old_stale);
    }

    #[test]
    fn destinations_without_rule_id_are_never_cached() {
        let acl = acl_with_destinations(vec![ip_dest("", "1.1.1.1/32", vec![])]);
        let outcomes = acl.spec.destinations.iter().map(resolved).collect();

        let (egress, _, stale) = assemble(&acl, outcomes, &[]);

        assert_eq!(egress.len(), 1);
        assert!(stale.is_empty());
    }

    #[test]
    fn stale_entries_for_removed_destinations_are_dropped() {
        let acl = acl_with_destinations(vec![ip_dest("r2", "2.2.2.2/32", vec![])]);
        let old_stale = vec![
            AclStaleEntry {
                rule_id: "r1".to_string(),
                rules: vec![],
            },
            AclStaleEntry {
                rule_id: "r2".to_string(),
                rules: vec![],
            },
        ];
        let outcomes = acl.spec.destinations.iter().map(resolved).collect();

        let (_, _, stale) = assemble(&acl, outcomes, &old_stale);

        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].rule_id, "r2");
    }

    #[test]
    fn second_pass_over_unchanged_inputs_is_a_fixed_point() {
        let acl = acl_with_destinations(vec![
            ip_dest(
                "r1",
                "100.100.100.100/32",
                vec![ProtoPort {
                    protocol: "tcp".to_string(),
                    port: 80,
                }],
            ),
            ip_dest("r2", "1.1.1.1/32", vec![]),
        ]);
        let outcomes = || acl.spec.destinations.iter().map(resolved).collect();

        let (egress1, errors1, stale1) = assemble(&acl, outcomes(), &[]);
        let (egress2, errors2, stale2) = assemble(&acl, outcomes(), &stale1);

        // Nothing moved, so neither the rules nor the status inputs may.
        assert_eq!(egress2, egress1);
        assert_eq!(errors2, errors1);
        assert_eq!(stale2, stale1);

        let name = policy_name(&acl.spec.source);
        let np1 = desired_network_policy(&acl, "default", &name, egress1);
        let np2 = desired_network_policy(&acl, "default", &name, egress2);
        assert_eq!(np1.spec, np2.spec);
    }

    // ========================================================================
    // Names
    // ========================================================================

    #[test]
    fn derived_names_are_stable_per_source_kind() {
        assert_eq!(
            policy_name(&AclSource::TsuruApp("myapp".to_string())),
            "acl-app-myapp"
        );
        assert_eq!(
            policy_name(&AclSource::TsuruJob("myjob".to_string())),
            "acl-job-myjob"
        );

        let rpaas = RpaasInstanceRef {
            service_name: "rpaasv2".to_string(),
            instance: "my-instance".to_string(),
        };
        assert_eq!(
            rpaas_address_name(&rpaas),
            "rpaas-rpaasv2-my-instance"
        );
    }
}
