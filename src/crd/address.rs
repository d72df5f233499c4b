//! Address-tracking Custom Resource Definitions
//!
//! TsuruAppAddress and RpaasInstanceAddress are cluster-scoped records of the
//! resolved network addresses of one Tsuru app or rpaas instance. They are
//! created on demand by the ACL reconciler, refreshed by their own
//! reconcilers, and read back through status during rule synthesis so a slow
//! directory never blocks an ACL reconcile.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a TsuruAppAddress
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "extensions.tsuru.io",
    version = "v1alpha1",
    kind = "TsuruAppAddress",
    plural = "tsuruappaddresses",
    status = "ResourceAddressStatus",
    printcolumn = r#"{"name":"App","type":"string","jsonPath":".spec.name"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TsuruAppAddressSpec {
    /// The Tsuru application name
    pub name: String,

    /// Extra addresses to track alongside the app's router addresses
    #[serde(default, skip_serializing_if = "Vec::is_empty", rename = "additionalIPs")]
    pub additional_ips: Vec<String>,
}

/// Specification for an RpaasInstanceAddress
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "extensions.tsuru.io",
    version = "v1alpha1",
    kind = "RpaasInstanceAddress",
    plural = "rpaasinstanceaddresses",
    status = "ResourceAddressStatus",
    printcolumn = r#"{"name":"Service","type":"string","jsonPath":".spec.serviceName"}"#,
    printcolumn = r#"{"name":"Instance","type":"string","jsonPath":".spec.instance"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RpaasInstanceAddressSpec {
    /// The rpaas service offering
    pub service_name: String,

    /// The instance within the service
    pub instance: String,
}

/// Shared status for the address-tracking kinds
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAddressStatus {
    /// Whether the last directory lookup succeeded
    #[serde(default)]
    pub ready: bool,

    /// Last lookup error, cleared on success
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// RFC3339 timestamp of the last status refresh
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub updated_at: String,

    /// Resolved addresses, sorted and deduplicated
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<String>,

    /// The pool the app is scheduled on, when the directory reports one
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pool: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_address_spec_wire_format() {
        let spec = TsuruAppAddressSpec {
            name: "myapp".to_string(),
            additional_ips: vec!["10.0.0.9".to_string()],
        };

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["name"], "myapp");
        assert_eq!(json["additionalIPs"][0], "10.0.0.9");
    }

    #[test]
    fn rpaas_address_spec_wire_format() {
        let spec = RpaasInstanceAddressSpec {
            service_name: "rpaasv2".to_string(),
            instance: "my-instance".to_string(),
        };

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["serviceName"], "rpaasv2");
        assert_eq!(json["instance"], "my-instance");
    }

    #[test]
    fn empty_status_serializes_to_ready_only() {
        let json = serde_json::to_value(ResourceAddressStatus::default()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "ready": false }),
            "optional fields must be omitted when empty"
        );
    }
}
