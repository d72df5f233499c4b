//! Third-party intent kinds the operator consumes read-only
//!
//! Only the fields the operator actually reads are modeled; the live objects
//! carry much more, and serde ignores the rest. The operator never writes
//! these kinds.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a Tsuru App object
///
/// Tsuru materializes one App object per application in a management
/// namespace; `namespaceName` points at the namespace the app's pods (and
/// therefore its ACL and NetworkPolicy) live in.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "tsuru.io",
    version = "v1",
    kind = "App",
    root = "TsuruApp",
    plural = "apps",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TsuruAppSpec {
    /// Namespace where the app's workload runs
    #[serde(default)]
    pub namespace_name: String,
}

/// Specification for an rpaas RpaasInstance object
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "extensions.tsuru.io",
    version = "v1alpha1",
    kind = "RpaasInstance",
    plural = "rpaasinstances",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RpaasInstanceSpec {
    /// External upstreams the instance's proxy is allowed to reach
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_upstreams: Vec<AllowedUpstream>,

    /// Tsuru apps bound behind this instance
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binds: Vec<Bind>,
}

/// One upstream an rpaas instance may proxy to
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AllowedUpstream {
    /// Hostname, IP address or CIDR range
    #[serde(default)]
    pub host: String,
    /// TCP port; zero means unrestricted
    #[serde(default)]
    pub port: u16,
}

/// A Tsuru app bound behind an rpaas instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bind {
    /// The bound app's name
    #[serde(default)]
    pub name: String,
    /// The address the proxy forwards to, usually a cluster-internal
    /// service URL
    #[serde(default)]
    pub host: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_spec_tolerates_unknown_fields() {
        let json = serde_json::json!({
            "namespaceName": "tsuru-myapp",
            "deploys": 12,
            "platform": "python"
        });
        let spec: TsuruAppSpec = serde_json::from_value(json).unwrap();
        assert_eq!(spec.namespace_name, "tsuru-myapp");
    }

    #[test]
    fn rpaas_spec_parses_upstreams_and_binds() {
        let yaml = r#"
allowedUpstreams:
  - host: api.example.com
    port: 443
  - host: 10.0.0.0/8
    port: 5432
binds:
  - name: backend-app
    host: http://backend-app.namespace.svc.cluster.local
"#;
        let spec: RpaasInstanceSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.allowed_upstreams.len(), 2);
        assert_eq!(spec.allowed_upstreams[0].host, "api.example.com");
        assert_eq!(spec.allowed_upstreams[1].port, 5432);
        assert_eq!(spec.binds[0].name, "backend-app");
    }
}
