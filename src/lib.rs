//! ACL operator - declarative egress control for Tsuru workloads
//!
//! The operator turns ACL objects (which destinations a Tsuru app, Tsuru job
//! or rpaas instance may reach) into Kubernetes NetworkPolicy objects. DNS
//! names and directory-resolved addresses are tracked in dedicated objects
//! with bounded TTLs so resolution failures degrade to the last known-good
//! rules instead of cutting traffic, and a periodic garbage collector removes
//! everything no ACL references anymore.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (ACL, ACLDNSEntry, address kinds)
//! - [`controller`] - reconcilers for every kind plus the garbage collector
//! - [`rules`] - pure synthesis of egress rules from resolved inputs
//! - [`dns`] - DNS resolver abstraction
//! - [`tsuru`] - Tsuru directory API client
//! - [`aclapi`] - ACL rule API client and destination conversion
//! - [`service_cache`] - LoadBalancer IP to Service index
//! - [`names`] - deterministic Kubernetes object naming
//! - [`net_util`] - CIDR normalization and host extraction
//! - [`error`] - error types for the operator

#![deny(missing_docs)]

pub mod aclapi;
pub mod controller;
pub mod crd;
pub mod dns;
pub mod error;
pub mod names;
pub mod net_util;
pub mod rules;
pub mod service_cache;
pub mod tsuru;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Shared Constants
// =============================================================================
// Label keys and intervals shared between the reconcilers, the garbage
// collector and the tests.

/// Label carrying the Tsuru application name on app pods
pub const TSURU_APP_LABEL: &str = "tsuru.io/app-name";

/// Label carrying the Tsuru job name on job pods and CronJobs
pub const TSURU_JOB_LABEL: &str = "tsuru.io/job-name";

/// Label carrying the rpaas service name on instance pods
pub const RPAAS_SERVICE_LABEL: &str = "rpaas.extensions.tsuru.io/service-name";

/// Label carrying the rpaas instance name on instance pods
pub const RPAAS_INSTANCE_LABEL: &str = "rpaas.extensions.tsuru.io/instance-name";

/// Name prefix for ACLs created from Tsuru jobs, to keep them from colliding
/// with app ACLs in the same namespace
pub const TSURU_JOB_ACL_PREFIX: &str = "tsuru-job-";

/// Namespace selector label used for in-cluster LoadBalancer peers
pub const NAMESPACE_NAME_LABEL: &str = "name";

/// Requeue interval after a successful reconcile, to pick up external drift
pub const REQUEUE_DRIFT_SECS: u64 = 600;

/// Requeue interval after a failed DNS or directory lookup
pub const REQUEUE_FAILURE_SECS: u64 = 600;

/// How long a resolved DNS address stays valid without being re-observed
pub const DNS_TTL_DAYS: i64 = 7;

/// Upper bound on a single DNS lookup or directory HTTP call
pub const LOOKUP_TIMEOUT_SECS: u64 = 10;

/// How long a LoadBalancer service snapshot is served before a rebuild
pub const SERVICE_CACHE_VALIDITY_SECS: u64 = 900;

/// Delay before the first garbage collection sweep
pub const GC_INITIAL_DELAY_SECS: u64 = 30;

/// Interval between garbage collection sweeps
pub const GC_INTERVAL_SECS: u64 = 300;
