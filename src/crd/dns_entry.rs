//! ACLDNSEntry Custom Resource Definition
//!
//! One cluster-scoped object per external hostname referenced by any ACL.
//! Its reconciler resolves the hostname and keeps a rolling set of observed
//! IPs, each valid for seven days after its last sighting, so short DNS
//! outages never shrink the derived NetworkPolicies.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for an ACLDNSEntry
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "extensions.tsuru.io",
    version = "v1alpha1",
    kind = "ACLDNSEntry",
    root = "AclDnsEntry",
    plural = "acldnsentries",
    status = "AclDnsEntryStatus",
    printcolumn = r#"{"name":"Host","type":"string","jsonPath":".spec.host"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AclDnsEntrySpec {
    /// The hostname to resolve
    pub host: String,
}

/// Status for an ACLDNSEntry
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AclDnsEntryStatus {
    /// Whether the last lookup succeeded
    #[serde(default)]
    pub ready: bool,

    /// Last lookup error, cleared on success
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Observed addresses, sorted by address, none past their TTL after a
    /// successful reconcile
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<DnsEntryIp>,
}

/// One observed address with its expiry
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DnsEntryIp {
    /// The resolved IP address
    pub address: String,
    /// RFC3339 timestamp after which this address is no longer trusted
    pub valid_until: String,
}

impl DnsEntryIp {
    /// Whether this address is still within its TTL at `now`.
    ///
    /// An unparsable timestamp counts as expired so a corrupted entry ages
    /// out instead of lingering forever.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match DateTime::parse_from_rfc3339(&self.valid_until) {
            Ok(t) => t.with_timezone(&Utc) > now,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn expiry_is_judged_against_the_given_instant() {
        let now = Utc::now();
        let fresh = DnsEntryIp {
            address: "1.2.3.4".to_string(),
            valid_until: (now + Duration::days(7)).to_rfc3339(),
        };
        let expired = DnsEntryIp {
            address: "5.6.7.8".to_string(),
            valid_until: (now - Duration::hours(1)).to_rfc3339(),
        };

        assert!(fresh.is_valid_at(now));
        assert!(!expired.is_valid_at(now));
    }

    #[test]
    fn garbage_timestamps_count_as_expired() {
        let bad = DnsEntryIp {
            address: "1.2.3.4".to_string(),
            valid_until: "not-a-timestamp".to_string(),
        };
        assert!(!bad.is_valid_at(Utc::now()));
    }

    #[test]
    fn status_wire_format_is_camel_case() {
        let status = AclDnsEntryStatus {
            ready: true,
            reason: String::new(),
            ips: vec![DnsEntryIp {
                address: "1.2.3.4".to_string(),
                valid_until: "2026-09-06T00:00:00Z".to_string(),
            }],
        };

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["ready"], true);
        assert_eq!(json["ips"][0]["address"], "1.2.3.4");
        assert_eq!(json["ips"][0]["validUntil"], "2026-09-06T00:00:00Z");
        assert!(json.get("reason").is_none());
    }
}
