//! Tsuru App source adapter
//!
//! Watches Tsuru App objects and projects each app's upstream rules (from
//! the rule API) into the app's ACL, creating, updating or deleting it in
//! the app's own namespace.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{error, instrument, warn};

use crate::aclapi::{rules_to_destinations, AclApi};
use crate::crd::{AclSource, TsuruApp};
use crate::{Error, Result};

/// Dependencies for the Tsuru App adapter
pub struct TsuruAppContext {
    /// Kubernetes client
    pub client: Client,
    /// ACL rule API
    pub aclapi: Arc<dyn AclApi>,
}

/// Project one app's upstream rules into its ACL.
#[instrument(skip(app, ctx), fields(app = %app.name_any()))]
pub async fn reconcile(app: Arc<TsuruApp>, ctx: Arc<TsuruAppContext>) -> Result<Action> {
    let app_name = app.name_any();
    let namespace = &app.spec.namespace_name;
    if namespace.is_empty() {
        warn!("app has no namespace yet, waiting");
        return Ok(Action::await_change());
    }

    let rules = ctx.aclapi.app_rules(&app_name).await?;
    let (destinations, warnings) = rules_to_destinations(rules);

    super::sync_source_acl(
        &ctx.client,
        namespace,
        &app_name,
        AclSource::TsuruApp(app_name.clone()),
        destinations,
        warnings,
        None,
    )
    .await
}

/// Retry rule API and API server failures
pub fn error_policy(app: Arc<TsuruApp>, error: &Error, _ctx: Arc<TsuruAppContext>) -> Action {
    error!(?error, app = %app.name_any(), "reconciliation failed");
    Action::requeue(Duration::from_secs(30))
}
