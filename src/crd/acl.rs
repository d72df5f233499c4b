//! ACL Custom Resource Definition
//!
//! An ACL declares which destinations one source (a Tsuru app, a Tsuru job,
//! or an rpaas instance) is allowed to reach. The ACL reconciler materializes
//! it into a single NetworkPolicy and keeps per-destination resolution state
//! in the status, including the stale-rule fallback cache.

use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::NetworkPolicyEgressRule;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{RPAAS_INSTANCE_LABEL, RPAAS_SERVICE_LABEL, TSURU_APP_LABEL, TSURU_JOB_LABEL};

/// Specification for an ACL
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "extensions.tsuru.io",
    version = "v1alpha1",
    kind = "ACL",
    root = "Acl",
    plural = "acls",
    status = "AclStatus",
    namespaced,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"NetworkPolicy","type":"string","jsonPath":".status.networkPolicy"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AclSpec {
    /// The workload this ACL grants egress from
    pub source: AclSource,

    /// Ordered list of permitted destinations
    #[serde(default)]
    pub destinations: Vec<AclDestination>,
}

/// The source side of an ACL: exactly one workload identity
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub enum AclSource {
    /// A Tsuru application, selected by its app-name label
    #[serde(rename = "tsuruApp")]
    TsuruApp(String),

    /// A Tsuru job, selected by its job-name label
    #[serde(rename = "tsuruJob")]
    TsuruJob(String),

    /// An rpaas instance, selected by its service/instance label pair
    #[serde(rename = "rpaasInstance")]
    RpaasInstance(RpaasInstanceRef),
}

impl AclSource {
    /// Pod selector labels identifying the source workload
    pub fn pod_selector_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        match self {
            AclSource::TsuruApp(app) => {
                labels.insert(TSURU_APP_LABEL.to_string(), app.clone());
            }
            AclSource::TsuruJob(job) => {
                labels.insert(TSURU_JOB_LABEL.to_string(), job.clone());
            }
            AclSource::RpaasInstance(rpaas) => {
                labels.insert(RPAAS_SERVICE_LABEL.to_string(), rpaas.service_name.clone());
                labels.insert(RPAAS_INSTANCE_LABEL.to_string(), rpaas.instance.clone());
            }
        }
        labels
    }

    /// Stable key used to derive the NetworkPolicy name
    pub fn key(&self) -> String {
        match self {
            AclSource::TsuruApp(app) => format!("app-{app}"),
            AclSource::TsuruJob(job) => format!("job-{job}"),
            AclSource::RpaasInstance(rpaas) => {
                format!("rpaas-{}-{}", rpaas.service_name, rpaas.instance)
            }
        }
    }
}

/// Reference to an rpaas instance by service name and instance name
///
/// Used both as an ACL source and as a destination; the pair is the identity
/// key, so the whole struct is comparable by value.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct RpaasInstanceRef {
    /// The rpaas service offering (e.g. `rpaasv2`)
    pub service_name: String,
    /// The instance within the service
    pub instance: String,
}

/// One destination entry of an ACL
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct AclDestination {
    /// Opaque upstream rule identifier; empty when the destination was not
    /// produced by the rule API. Only destinations with a ruleID participate
    /// in the stale-rule fallback cache.
    #[serde(default, rename = "ruleID", skip_serializing_if = "String::is_empty")]
    pub rule_id: String,

    /// The destination itself, exactly one variant
    #[serde(flatten)]
    pub target: AclDestinationTarget,
}

/// The destination variants an ACL entry can carry
///
/// Modeled as a sum type so destination resolution matches exhaustively;
/// adding a new kind is a compile-time-enforced change.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub enum AclDestinationTarget {
    /// Another Tsuru application
    #[serde(rename = "tsuruApp")]
    TsuruApp(String),

    /// A whole Tsuru pool. Accepted into the data model but no egress rule is
    /// synthesized for it; a pool has no stable selector or address set.
    #[serde(rename = "tsuruAppPool")]
    TsuruAppPool(String),

    /// An rpaas instance
    #[serde(rename = "rpaasInstance")]
    RpaasInstance(RpaasInstanceRef),

    /// An external hostname, resolved through an ACLDNSEntry
    #[serde(rename = "externalDNS")]
    ExternalDns(ExternalDns),

    /// An external IP or CIDR range
    #[serde(rename = "externalIP")]
    ExternalIp(ExternalIp),
}

/// External DNS destination: hostname plus optional port restriction
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ExternalDns {
    /// Hostname to resolve
    pub name: String,
    /// Allowed ports; empty means all ports and protocols
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ProtoPort>,
}

/// External IP destination: address or CIDR plus optional port restriction
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ExternalIp {
    /// IP address or CIDR range
    pub ip: String,
    /// Allowed ports; empty means all ports and protocols
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ProtoPort>,
}

/// A protocol/port pair as declared by the upstream rule APIs
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProtoPort {
    /// Protocol name (`tcp`/`udp`, case-insensitive)
    pub protocol: String,
    /// Port number
    pub port: u16,
}

/// Status for an ACL
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AclStatus {
    /// False only when a fatal, destination-independent condition occurred
    #[serde(default)]
    pub ready: bool,

    /// Human-readable reason, set iff a fatal condition occurred
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Non-fatal conversion warnings from the source adapters
    /// (e.g. unsupported upstream features)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warning_errors: Vec<String>,

    /// Destinations currently failing to resolve
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_errors: Vec<AclRuleError>,

    /// Last successfully resolved rules per destination, used as fallback
    /// while the destination fails to resolve
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stale: Vec<AclStaleEntry>,

    /// Name of the NetworkPolicy materialized from this ACL
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network_policy: String,
}

/// A currently-failing destination and its error
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct AclRuleError {
    /// The failing destination's ruleID
    #[serde(rename = "ruleID")]
    pub rule_id: String,
    /// The resolution error message
    pub error: String,
}

/// Last known-good egress rules for one destination
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct AclStaleEntry {
    /// The destination's ruleID
    #[serde(rename = "ruleID")]
    pub rule_id: String,
    /// The egress rules produced by the last successful resolution
    #[serde(default)]
    pub rules: Vec<NetworkPolicyEgressRule>,
}
