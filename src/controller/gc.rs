//! Garbage collector
//!
//! Derived objects (DNS entries, address trackers) are created on demand
//! and never deleted by the reconcilers that use them; ACLs are created by
//! source adapters whose upstream can vanish silently. A periodic
//! mark-and-sweep cleans both up: list everything, subtract what the
//! current ACL specs reference and what still has a live source, delete the
//! rest. Both passes read specs collected in the same cycle, so an object
//! referenced at any point during the cycle survives it.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use k8s_openapi::api::batch::v1::CronJob;
use kube::api::{Api, DeleteParams};
use kube::{Client, ResourceExt};
use tracing::{error, info, warn};

use crate::controller::acl::{app_address_name, dns_entry_name};
use crate::controller::list_all;
use crate::crd::{
    Acl, AclDestinationTarget, AclDnsEntry, AclSource, RpaasInstanceAddress, RpaasInstanceRef,
    TsuruApp, TsuruAppAddress,
};
use crate::{
    Result, GC_INITIAL_DELAY_SECS, GC_INTERVAL_SECS, TSURU_JOB_ACL_PREFIX, TSURU_JOB_LABEL,
};

/// Periodic mark-and-sweep over derived objects and source-owned ACLs
pub struct GarbageCollector {
    client: Client,
    dry_run: bool,
}

/// Everything one sweep decided to delete
#[derive(Debug, Default, PartialEq)]
pub struct Orphans {
    /// Hostnames whose ACLDNSEntry is unreferenced
    pub dns_hosts: Vec<String>,
    /// App names whose TsuruAppAddress is unreferenced
    pub app_names: Vec<String>,
    /// Object names of unreferenced RpaasInstanceAddress objects
    pub rpaas_address_names: Vec<String>,
    /// (namespace, name) of ACLs whose source no longer exists
    pub acls: Vec<(String, String)>,
}

impl Orphans {
    fn is_empty(&self) -> bool {
        self.dns_hosts.is_empty()
            && self.app_names.is_empty()
            && self.rpaas_address_names.is_empty()
            && self.acls.is_empty()
    }
}

impl GarbageCollector {
    /// Build a collector; in dry-run mode sweeps report without deleting
    pub fn new(client: Client, dry_run: bool) -> Self {
        Self { client, dry_run }
    }

    /// Run forever: initial delay to let the watches sync, then one sweep
    /// every five minutes. Sweep failures are logged and the loop goes on.
    pub async fn run(self) {
        tokio::time::sleep(Duration::from_secs(GC_INITIAL_DELAY_SECS)).await;
        loop {
            if let Err(e) = self.sweep().await {
                error!(error = %e, "garbage collection sweep failed");
            }
            tokio::time::sleep(Duration::from_secs(GC_INTERVAL_SECS)).await;
        }
    }

    /// One full mark-and-sweep cycle
    pub async fn sweep(&self) -> Result<()> {
        let dns_entries: Api<AclDnsEntry> = Api::all(self.client.clone());
        let app_addresses: Api<TsuruAppAddress> = Api::all(self.client.clone());
        let rpaas_addresses: Api<RpaasInstanceAddress> = Api::all(self.client.clone());
        let acls: Api<Acl> = Api::all(self.client.clone());
        let apps: Api<TsuruApp> = Api::all(self.client.clone());
        let cronjobs: Api<CronJob> = Api::all(self.client.clone());

        let dns_hosts: HashSet<String> = list_all(&dns_entries, None)
            .await?
            .into_iter()
            .map(|e| e.spec.host)
            .collect();
        let tracked_apps: HashSet<String> = list_all(&app_addresses, None)
            .await?
            .into_iter()
            .map(|a| a.spec.name)
            .collect();
        let rpaas: HashMap<RpaasInstanceRef, String> = list_all(&rpaas_addresses, None)
            .await?
            .into_iter()
            .map(|a| {
                (
                    RpaasInstanceRef {
                        service_name: a.spec.service_name.clone(),
                        instance: a.spec.instance.clone(),
                    },
                    a.name_any(),
                )
            })
            .collect();
        let all_acls = list_all(&acls, None).await?;
        let live_apps: HashSet<(String, String)> = list_all(&apps, None)
            .await?
            .into_iter()
            .map(|app| (app.name_any(), app.spec.namespace_name.clone()))
            .collect();
        let live_jobs: HashSet<(String, String)> = list_all(&cronjobs, Some(TSURU_JOB_LABEL))
            .await?
            .into_iter()
            .filter_map(|job| {
                let name = job.labels().get(TSURU_JOB_LABEL)?.clone();
                Some((name, job.namespace().unwrap_or_default()))
            })
            .collect();

        let orphans = compute_orphans(
            dns_hosts,
            tracked_apps,
            rpaas,
            &all_acls,
            &live_apps,
            &live_jobs,
        );

        if orphans.is_empty() {
            return Ok(());
        }

        if self.dry_run {
            for host in &orphans.dns_hosts {
                info!(host = %host, "dry run: DNS entry is orphaned");
            }
            for app in &orphans.app_names {
                info!(app = %app, "dry run: app address is orphaned");
            }
            for name in &orphans.rpaas_address_names {
                info!(name = %name, "dry run: rpaas address is orphaned");
            }
            for (namespace, name) in &orphans.acls {
                info!(namespace = %namespace, acl = %name, "dry run: ACL source is gone");
            }
            return Ok(());
        }

        self.delete_orphans(orphans).await;
        Ok(())
    }

    /// Delete everything the sweep marked; individual failures are logged
    /// and never abort the rest of the batch.
    async fn delete_orphans(&self, orphans: Orphans) {
        let params = DeleteParams::default();

        let dns_entries: Api<AclDnsEntry> = Api::all(self.client.clone());
        for host in orphans.dns_hosts {
            let name = dns_entry_name(&host);
            info!(host = %host, "deleting orphaned DNS entry");
            if let Err(e) = dns_entries.delete(&name, &params).await {
                warn!(host = %host, error = %e, "failed to delete DNS entry");
            }
        }

        let app_addresses: Api<TsuruAppAddress> = Api::all(self.client.clone());
        for app in orphans.app_names {
            let name = app_address_name(&app);
            info!(app = %app, "deleting orphaned app address");
            if let Err(e) = app_addresses.delete(&name, &params).await {
                warn!(app = %app, error = %e, "failed to delete app address");
            }
        }

        let rpaas_addresses: Api<RpaasInstanceAddress> = Api::all(self.client.clone());
        for name in orphans.rpaas_address_names {
            info!(name = %name, "deleting orphaned rpaas address");
            if let Err(e) = rpaas_addresses.delete(&name, &params).await {
                warn!(name = %name, error = %e, "failed to delete rpaas address");
            }
        }

        for (namespace, name) in orphans.acls {
            let acls: Api<Acl> = Api::namespaced(self.client.clone(), &namespace);
            info!(namespace = %namespace, acl = %name, "deleting ACL without a source");
            if let Err(e) = acls.delete(&name, &params).await {
                warn!(namespace = %namespace, acl = %name, error = %e, "failed to delete ACL");
            }
        }
    }
}

/// The mark phase, as a pure function over this cycle's listings.
///
/// Everything an ACL destination references is kept; what remains of the
/// derived-object sets is orphaned. App and job ACLs are additionally
/// checked against the sources still present in the cluster.
pub fn compute_orphans(
    mut dns_hosts: HashSet<String>,
    mut tracked_apps: HashSet<String>,
    mut rpaas: HashMap<RpaasInstanceRef, String>,
    acls: &[Acl],
    live_apps: &HashSet<(String, String)>,
    live_jobs: &HashSet<(String, String)>,
) -> Orphans {
    let mut app_acls = HashSet::new();
    let mut job_acls = HashSet::new();

    for acl in acls {
        let namespace = acl.namespace().unwrap_or_default();
        match &acl.spec.source {
            AclSource::TsuruApp(app) => {
                app_acls.insert((app.clone(), namespace));
            }
            AclSource::TsuruJob(job) => {
                job_acls.insert((job.clone(), namespace));
            }
            AclSource::RpaasInstance(_) => {}
        }

        for dest in &acl.spec.destinations {
            match &dest.target {
                AclDestinationTarget::ExternalDns(dns) => {
                    dns_hosts.remove(&dns.name);
                }
                AclDestinationTarget::TsuruApp(app) => {
                    tracked_apps.remove(app);
                }
                AclDestinationTarget::RpaasInstance(r) => {
                    rpaas.remove(r);
                }
                AclDestinationTarget::TsuruAppPool(_) | AclDestinationTarget::ExternalIp(_) => {}
            }
        }
    }

    let mut orphans = Orphans {
        dns_hosts: dns_hosts.into_iter().collect(),
        app_names: tracked_apps.into_iter().collect(),
        rpaas_address_names: rpaas.into_values().collect(),
        acls: app_acls
            .into_iter()
            .filter(|key| !live_apps.contains(key))
            .map(|(app, namespace)| (namespace, app))
            .chain(
                job_acls
                    .into_iter()
                    .filter(|key| !live_jobs.contains(key))
                    .map(|(job, namespace)| (namespace, format!("{TSURU_JOB_ACL_PREFIX}{job}"))),
            )
            .collect(),
    };

    // Deterministic order keeps logs and tests stable.
    orphans.dns_hosts.sort();
    orphans.app_names.sort();
    orphans.rpaas_address_names.sort();
    orphans.acls.sort();
    orphans
}
