//! ACL rule API client and rule conversion
//!
//! The rule API is the upstream source of truth for which destinations an
//! app or job may reach. The source adapters fetch its rules and convert
//! them into the canonical destination list stored on the ACL object. The
//! wire format uses PascalCase field names.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::crd::{
    AclDestination, AclDestinationTarget, ExternalDns, ExternalIp, ProtoPort, RpaasInstanceRef,
};
use crate::{Error, Result, LOOKUP_TIMEOUT_SECS};

/// One rule as returned by the rule API
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Rule {
    /// Stable rule identifier, carried onto the ACL destination
    #[serde(rename = "RuleID")]
    pub rule_id: String,

    /// Human-readable rule name
    #[serde(rename = "RuleName")]
    pub rule_name: String,

    /// The destination side of the rule
    #[serde(rename = "Destination")]
    pub destination: RuleSide,

    /// Soft-deleted rules stay listed but must be skipped
    #[serde(rename = "Removed")]
    pub removed: bool,
}

/// A rule endpoint; at most one variant is set
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RuleSide {
    /// A Tsuru app or pool
    #[serde(rename = "TsuruApp", skip_serializing_if = "Option::is_none")]
    pub tsuru_app: Option<TsuruAppRule>,

    /// A raw Kubernetes service (not supported as a destination)
    #[serde(rename = "KubernetesService", skip_serializing_if = "Option::is_none")]
    pub kubernetes_service: Option<KubernetesServiceRule>,

    /// An external hostname
    #[serde(rename = "ExternalDNS", skip_serializing_if = "Option::is_none")]
    pub external_dns: Option<ExternalDnsRule>,

    /// An external IP or CIDR
    #[serde(rename = "ExternalIP", skip_serializing_if = "Option::is_none")]
    pub external_ip: Option<ExternalIpRule>,

    /// An rpaas instance
    #[serde(rename = "RpaasInstance", skip_serializing_if = "Option::is_none")]
    pub rpaas_instance: Option<RpaasInstanceRule>,
}

/// Tsuru app endpoint; either the app or the pool name is set
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TsuruAppRule {
    /// The app name, when the rule targets a single app
    #[serde(rename = "AppName")]
    pub app_name: String,
    /// The pool name, when the rule targets a whole pool
    #[serde(rename = "PoolName")]
    pub pool_name: String,
}

/// Kubernetes service endpoint
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct KubernetesServiceRule {
    /// Service namespace
    #[serde(rename = "Namespace")]
    pub namespace: String,
    /// Service name
    #[serde(rename = "ServiceName")]
    pub service_name: String,
    /// Cluster the service lives in
    #[serde(rename = "ClusterName")]
    pub cluster_name: String,
}

/// External hostname endpoint
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ExternalDnsRule {
    /// The hostname
    #[serde(rename = "Name")]
    pub name: String,
    /// Allowed ports
    #[serde(rename = "Ports")]
    pub ports: Vec<WirePort>,
    /// Whole-network sync flag (not supported)
    #[serde(rename = "SyncWholeNetwork")]
    pub sync_whole_network: bool,
}

/// External IP endpoint
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ExternalIpRule {
    /// The address or CIDR
    #[serde(rename = "IP")]
    pub ip: String,
    /// Allowed ports
    #[serde(rename = "Ports")]
    pub ports: Vec<WirePort>,
    /// Whole-network sync flag (not supported)
    #[serde(rename = "SyncWholeNetwork")]
    pub sync_whole_network: bool,
}

/// Rpaas instance endpoint
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RpaasInstanceRule {
    /// The rpaas service offering
    #[serde(rename = "ServiceName")]
    pub service_name: String,
    /// The instance name
    #[serde(rename = "Instance")]
    pub instance: String,
}

/// A protocol/port pair on the wire
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WirePort {
    /// Protocol name
    #[serde(rename = "Protocol")]
    pub protocol: String,
    /// Port number
    #[serde(rename = "Port")]
    pub port: u16,
}

/// Rule lookups the source adapters depend on
#[async_trait]
pub trait AclApi: Send + Sync {
    /// Rules for a Tsuru app
    async fn app_rules(&self, app: &str) -> Result<Vec<Rule>>;

    /// Rules for a Tsuru job
    async fn job_rules(&self, job: &str) -> Result<Vec<Rule>>;
}

/// HTTP client for the rule API, authenticated with basic auth
pub struct AclApiClient {
    host: String,
    user: String,
    password: String,
    http: reqwest::Client,
}

impl AclApiClient {
    /// Build a client for the given rule API host
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(LOOKUP_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::directory(format!("could not build http client: {e}")))?;

        Ok(Self {
            host: host.into().trim_end_matches('/').to_string(),
            user: user.into(),
            password: password.into(),
            http,
        })
    }

    async fn get_rules(&self, path: &str) -> Result<Vec<Rule>> {
        let url = format!("{}{path}", self.host);

        let resp = self
            .http
            .get(&url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(|e| Error::directory(format!("request to {url} failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::directory(format!(
                "request to {url} returned status {}",
                resp.status()
            )));
        }

        resp.json::<Vec<Rule>>()
            .await
            .map_err(|e| Error::serialization(format!("invalid response from {url}: {e}")))
    }
}

#[async_trait]
impl AclApi for AclApiClient {
    async fn app_rules(&self, app: &str) -> Result<Vec<Rule>> {
        self.get_rules(&format!("/apps/{app}/rules")).await
    }

    async fn job_rules(&self, job: &str) -> Result<Vec<Rule>> {
        self.get_rules(&format!("/jobs/{job}/rules")).await
    }
}

/// Convert API rules into the canonical destination list stored on an ACL.
///
/// Rules are processed in ruleID order so repeated conversions of the same
/// rule set produce the same destination list. Removed rules are skipped.
/// Unsupported features never fail the conversion; they come back as warning
/// strings for `status.warningErrors`.
pub fn rules_to_destinations(mut rules: Vec<Rule>) -> (Vec<AclDestination>, Vec<String>) {
    let mut destinations = Vec::new();
    let mut warnings = Vec::new();

    rules.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));

    for rule in rules {
        if rule.removed {
            continue;
        }

        let side = rule.destination;
        if let Some(app) = side.tsuru_app {
            let target = if !app.app_name.is_empty() {
                AclDestinationTarget::TsuruApp(app.app_name)
            } else if !app.pool_name.is_empty() {
                AclDestinationTarget::TsuruAppPool(app.pool_name)
            } else {
                continue;
            };
            destinations.push(AclDestination {
                rule_id: rule.rule_id,
                target,
            });
        } else if let Some(dns) = side.external_dns {
            if dns.sync_whole_network {
                warnings.push(format!(
                    "SyncWholeNetwork is not supported for {:?}",
                    dns.name
                ));
            }
            destinations.push(AclDestination {
                rule_id: rule.rule_id,
                target: AclDestinationTarget::ExternalDns(ExternalDns {
                    name: dns.name,
                    ports: convert_ports(dns.ports),
                }),
            });
        } else if let Some(ip) = side.external_ip {
            if ip.sync_whole_network {
                warnings.push(format!("SyncWholeNetwork is not supported for {:?}", ip.ip));
            }
            destinations.push(AclDestination {
                rule_id: rule.rule_id,
                target: AclDestinationTarget::ExternalIp(ExternalIp {
                    ip: ip.ip,
                    ports: convert_ports(ip.ports),
                }),
            });
        } else if let Some(rpaas) = side.rpaas_instance {
            destinations.push(AclDestination {
                rule_id: rule.rule_id,
                target: AclDestinationTarget::RpaasInstance(RpaasInstanceRef {
                    service_name: rpaas.service_name,
                    instance: rpaas.instance,
                }),
            });
        } else if let Some(svc) = side.kubernetes_service {
            warnings.push(format!(
                "kubernetes service is not supported yet: {}/{}",
                svc.namespace, svc.service_name
            ));
        }
    }

    (destinations, warnings)
}

fn convert_ports(ports: Vec<WirePort>) -> Vec<ProtoPort> {
    ports
        .into_iter()
        .map(|p| ProtoPort {
            protocol: p.protocol,
            port: p.port,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_rule(rule_id: &str, app_name: &str) -> Rule {
        Rule {
            rule_id: rule_id.to_string(),
            destination: RuleSide {
                tsuru_app: Some(TsuruAppRule {
                    app_name: app_name.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn rules_parse_from_pascal_case_wire_format() {
        let body = serde_json::json!([{
            "RuleID": "abc-123",
            "RuleName": "allow-dns",
            "Removed": false,
            "Destination": {
                "ExternalDNS": {
                    "Name": "api.example.com",
                    "Ports": [{"Protocol": "tcp", "Port": 443}],
                    "SyncWholeNetwork": false
                }
            }
        }]);

        let rules: Vec<Rule> = serde_json::from_value(body).unwrap();
        assert_eq!(rules[0].rule_id, "abc-123");
        let dns = rules[0].destination.external_dns.as_ref().unwrap();
        assert_eq!(dns.name, "api.example.com");
        assert_eq!(dns.ports[0].port, 443);
    }

    #[test]
    fn conversion_sorts_by_rule_id_and_skips_removed() {
        let mut removed = app_rule("b", "gone-app");
        removed.removed = true;

        let rules = vec![app_rule("c", "third"), removed, app_rule("a", "first")];
        let (dests, warnings) = rules_to_destinations(rules);

        assert!(warnings.is_empty());
        assert_eq!(dests.len(), 2);
        assert_eq!(dests[0].rule_id, "a");
        assert_eq!(dests[1].rule_id, "c");
        assert_eq!(
            dests[0].target,
            AclDestinationTarget::TsuruApp("first".to_string())
        );
    }

    #[test]
    fn pool_rules_become_pool_destinations() {
        let rule = Rule {
            rule_id: "p1".to_string(),
            destination: RuleSide {
                tsuru_app: Some(TsuruAppRule {
                    pool_name: "prod-pool".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };

        let (dests, _) = rules_to_destinations(vec![rule]);
        assert_eq!(
            dests[0].target,
            AclDestinationTarget::TsuruAppPool("prod-pool".to_string())
        );
    }

    #[test]
    fn unsupported_features_become_warnings_not_failures() {
        let whole_network = Rule {
            rule_id: "w1".to_string(),
            destination: RuleSide {
                external_ip: Some(ExternalIpRule {
                    ip: "10.0.0.0/8".to_string(),
                    sync_whole_network: true,
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let k8s_service = Rule {
            rule_id: "w2".to_string(),
            destination: RuleSide {
                kubernetes_service: Some(KubernetesServiceRule {
                    namespace: "default".to_string(),
                    service_name: "db".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };

        let (dests, warnings) = rules_to_destinations(vec![whole_network, k8s_service]);

        // The whole-network rule still yields its IP destination; the raw
        // service rule yields nothing.
        assert_eq!(dests.len(), 1);
        assert_eq!(dests[0].rule_id, "w1");
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("SyncWholeNetwork"));
        assert!(warnings[1].contains("not supported"));
    }
}
