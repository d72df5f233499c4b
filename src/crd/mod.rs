//! Custom Resource Definitions for the ACL operator
//!
//! This module contains the operator-owned CRDs (ACL, ACLDNSEntry and the two
//! address-tracking kinds) plus minimal definitions of the third-party intent
//! kinds the operator consumes read-only (Tsuru App, RpaasInstance).

mod acl;
mod address;
mod dns_entry;
mod external;

pub use acl::{
    Acl, AclDestination, AclDestinationTarget, AclRuleError, AclSource, AclSpec, AclStaleEntry,
    AclStatus, ExternalDns, ExternalIp, ProtoPort, RpaasInstanceRef,
};
pub use address::{
    ResourceAddressStatus, RpaasInstanceAddress, RpaasInstanceAddressSpec, TsuruAppAddress,
    TsuruAppAddressSpec,
};
pub use dns_entry::{AclDnsEntry, AclDnsEntrySpec, AclDnsEntryStatus, DnsEntryIp};
pub use external::{
    AllowedUpstream, Bind, RpaasInstance, RpaasInstanceSpec, TsuruApp, TsuruAppSpec,
};
