//! Reconcilers for the ACL operator
//!
//! One module per watched kind, each exposing `reconcile`/`error_policy` and
//! a `Context`, plus the garbage collector task. `controller_futures` wires
//! everything into runnable futures for `main`.

mod acl;
mod app_address;
mod cronjob;
mod dns_entry;
pub mod gc;
mod rpaas_address;
mod rpaas_instance;
mod tsuru_app;

pub use acl::{resolve_destination, AclContext};
pub use app_address::AppAddressContext;
pub use cronjob::CronJobContext;
pub use dns_entry::{refresh_ips, DnsEntryContext};
pub use gc::GarbageCollector;
pub use rpaas_address::RpaasAddressContext;
pub use rpaas_instance::{rpaas_destinations, RpaasInstanceContext};
pub use tsuru_app::TsuruAppContext;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::CronJob;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::aclapi::AclApi;
use crate::crd::{Acl, AclDnsEntry, RpaasInstance, RpaasInstanceAddress, TsuruApp, TsuruAppAddress};
use crate::dns::DnsResolver;
use crate::service_cache::ServiceCache;
use crate::tsuru::TsuruApi;
use crate::{Result, TSURU_JOB_LABEL};

/// Watcher timeout (seconds) - must be less than the client read timeout so
/// the API server closes idle watches before the client gives up on them.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Field manager name for server-side apply patches
pub(crate) const FIELD_MANAGER: &str = "acl-operator";

/// External dependencies shared by every controller
pub struct Deps {
    /// Kubernetes client
    pub client: Client,
    /// DNS resolver
    pub resolver: Arc<dyn DnsResolver>,
    /// Tsuru directory API
    pub tsuru: Arc<dyn TsuruApi>,
    /// ACL rule API
    pub aclapi: Arc<dyn AclApi>,
}

/// Build one controller future per watched kind.
///
/// The caller joins them; each shuts down on SIGTERM via
/// `shutdown_on_signal`.
pub fn controller_futures(deps: Deps) -> Vec<Pin<Box<dyn Future<Output = ()> + Send>>> {
    let Deps {
        client,
        resolver,
        tsuru,
        aclapi,
    } = deps;

    let acl_ctx = Arc::new(AclContext {
        client: client.clone(),
        service_cache: Arc::new(ServiceCache::new(client.clone())),
    });
    let dns_ctx = Arc::new(DnsEntryContext {
        client: client.clone(),
        resolver: resolver.clone(),
    });
    let app_addr_ctx = Arc::new(AppAddressContext {
        client: client.clone(),
        tsuru: tsuru.clone(),
        resolver,
    });
    let rpaas_addr_ctx = Arc::new(RpaasAddressContext {
        client: client.clone(),
        tsuru,
    });
    let tsuru_app_ctx = Arc::new(TsuruAppContext {
        client: client.clone(),
        aclapi: aclapi.clone(),
    });
    let cronjob_ctx = Arc::new(CronJobContext {
        client: client.clone(),
        aclapi,
    });
    let rpaas_ctx = Arc::new(RpaasInstanceContext {
        client: client.clone(),
    });

    let acls: Api<Acl> = Api::all(client.clone());
    let dns_entries: Api<AclDnsEntry> = Api::all(client.clone());
    let app_addresses: Api<TsuruAppAddress> = Api::all(client.clone());
    let rpaas_addresses: Api<RpaasInstanceAddress> = Api::all(client.clone());
    let apps: Api<TsuruApp> = Api::all(client.clone());
    let cronjobs: Api<CronJob> = Api::all(client.clone());
    let rpaas_instances: Api<RpaasInstance> = Api::all(client);

    let watch = || WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);
    // Only CronJobs carrying the job label are of interest.
    let labeled_watch = WatcherConfig::default()
        .timeout(WATCH_TIMEOUT_SECS)
        .labels(TSURU_JOB_LABEL);

    info!("- ACL controller");
    info!("- ACLDNSEntry controller");
    info!("- TsuruAppAddress controller");
    info!("- RpaasInstanceAddress controller");
    info!("- Tsuru App controller");
    info!("- CronJob controller");
    info!("- RpaasInstance controller");

    vec![
        Box::pin(
            Controller::new(acls, watch())
                .shutdown_on_signal()
                .run(acl::reconcile, acl::error_policy, acl_ctx)
                .for_each(log_reconcile_result("ACL")),
        ),
        Box::pin(
            Controller::new(dns_entries, watch())
                .shutdown_on_signal()
                .run(dns_entry::reconcile, dns_entry::error_policy, dns_ctx)
                .for_each(log_reconcile_result("ACLDNSEntry")),
        ),
        Box::pin(
            Controller::new(app_addresses, watch())
                .shutdown_on_signal()
                .run(
                    app_address::reconcile,
                    app_address::error_policy,
                    app_addr_ctx,
                )
                .for_each(log_reconcile_result("TsuruAppAddress")),
        ),
        Box::pin(
            Controller::new(rpaas_addresses, watch())
                .shutdown_on_signal()
                .run(
                    rpaas_address::reconcile,
                    rpaas_address::error_policy,
                    rpaas_addr_ctx,
                )
                .for_each(log_reconcile_result("RpaasInstanceAddress")),
        ),
        Box::pin(
            Controller::new(apps, watch())
                .shutdown_on_signal()
                .run(tsuru_app::reconcile, tsuru_app::error_policy, tsuru_app_ctx)
                .for_each(log_reconcile_result("TsuruApp")),
        ),
        Box::pin(
            Controller::new(cronjobs, labeled_watch)
                .shutdown_on_signal()
                .run(cronjob::reconcile, cronjob::error_policy, cronjob_ctx)
                .for_each(log_reconcile_result("CronJob")),
        ),
        Box::pin(
            Controller::new(rpaas_instances, watch())
                .shutdown_on_signal()
                .run(
                    rpaas_instance::reconcile,
                    rpaas_instance::error_policy,
                    rpaas_ctx,
                )
                .for_each(log_reconcile_result("RpaasInstance")),
        ),
    ]
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(std::result::Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => {
                tracing::debug!(?action, "{} reconciliation completed", controller_name)
            }
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

/// Merge-patch an object's status subresource
pub(crate) async fn patch_status<K, S>(api: &Api<K>, name: &str, status: &S) -> Result<()>
where
    K: Clone + DeserializeOwned + std::fmt::Debug,
    S: Serialize,
{
    api.patch_status(
        name,
        &PatchParams::default(),
        &Patch::Merge(json!({ "status": status })),
    )
    .await?;
    Ok(())
}

/// List every object of a kind, following continuation tokens
pub(crate) async fn list_all<K>(api: &Api<K>, selector: Option<&str>) -> Result<Vec<K>>
where
    K: Clone + DeserializeOwned + std::fmt::Debug,
{
    let mut items = Vec::new();
    let mut params = ListParams::default().limit(500);
    if let Some(selector) = selector {
        params = params.labels(selector);
    }

    loop {
        let list = api.list(&params).await?;
        items.extend(list.items);
        match list.metadata.continue_ {
            Some(token) if !token.is_empty() => params = params.continue_token(&token),
            _ => break,
        }
    }

    Ok(items)
}

/// Bring a source-owned ACL in line with the destinations its upstream
/// intent currently implies.
///
/// The adapters (app, cronjob, rpaas instance) all follow the same shape:
/// no destinations means no ACL (delete it if it exists), otherwise create
/// or update the spec and record conversion warnings on the status.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn sync_source_acl(
    client: &Client,
    namespace: &str,
    name: &str,
    source: crate::crd::AclSource,
    destinations: Vec<crate::crd::AclDestination>,
    warnings: Vec<String>,
    owner: Option<k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference>,
) -> Result<kube::runtime::controller::Action> {
    use crate::crd::AclSpec;
    use crate::REQUEUE_DRIFT_SECS;
    use kube::api::DeleteParams;
    use kube::runtime::controller::Action;

    let api: Api<Acl> = Api::namespaced(client.clone(), namespace);
    let spec = AclSpec {
        source,
        destinations,
    };

    match api.get_opt(name).await? {
        None => {
            if spec.destinations.is_empty() {
                return Ok(Action::await_change());
            }

            let mut acl = Acl::new(name, spec);
            acl.metadata.namespace = Some(namespace.to_string());
            acl.metadata.owner_references = owner.map(|o| vec![o]);
            api.create(&PostParams::default(), &acl).await?;
            info!(acl = %name, namespace = %namespace, "created ACL from source intent");

            if !warnings.is_empty() {
                patch_status(&api, name, &json!({ "warningErrors": warnings })).await?;
            }
        }
        Some(existing) => {
            if spec.destinations.is_empty() {
                info!(acl = %name, namespace = %namespace, "removing ACL, source has no rules");
                api.delete(name, &DeleteParams::default()).await?;
                return Ok(Action::await_change());
            }

            let owner_refs = owner.map(|o| vec![o]);
            if existing.spec != spec || existing.metadata.owner_references != owner_refs {
                api.patch(
                    name,
                    &PatchParams::default(),
                    &Patch::Merge(json!({
                        "metadata": { "ownerReferences": owner_refs },
                        "spec": spec,
                    })),
                )
                .await?;
            }

            let existing_warnings = existing
                .status
                .as_ref()
                .map(|s| s.warning_errors.clone())
                .unwrap_or_default();
            if existing_warnings != warnings {
                patch_status(&api, name, &json!({ "warningErrors": warnings })).await?;
            }
        }
    }

    Ok(Action::requeue(std::time::Duration::from_secs(
        REQUEUE_DRIFT_SECS,
    )))
}

/// Create an object if it does not exist yet, ignoring conflicts with a
/// concurrent creator
pub(crate) async fn ensure_exists<K>(api: &Api<K>, obj: &K) -> Result<()>
where
    K: Clone + DeserializeOwned + Serialize + std::fmt::Debug,
{
    match api.create(&PostParams::default(), obj).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}
