//! Tsuru CronJob source adapter
//!
//! Tsuru scheduled jobs surface in the cluster as CronJobs labeled with the
//! job name. Each labeled CronJob gets an ACL named `tsuru-job-<job>` in its
//! namespace, filled from the job's upstream rules.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::batch::v1::CronJob;
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{error, instrument};

use crate::aclapi::{rules_to_destinations, AclApi};
use crate::crd::AclSource;
use crate::{Error, Result, TSURU_JOB_ACL_PREFIX, TSURU_JOB_LABEL};

/// Dependencies for the CronJob adapter
pub struct CronJobContext {
    /// Kubernetes client
    pub client: Client,
    /// ACL rule API
    pub aclapi: Arc<dyn AclApi>,
}

/// Project one labeled CronJob's upstream rules into its job ACL.
#[instrument(skip(job, ctx), fields(cronjob = %job.name_any()))]
pub async fn reconcile(job: Arc<CronJob>, ctx: Arc<CronJobContext>) -> Result<Action> {
    // The watcher filters on the label, but an edit can still remove it
    // between watch and reconcile.
    let Some(job_name) = job.labels().get(TSURU_JOB_LABEL).cloned() else {
        return Ok(Action::await_change());
    };
    let namespace = job
        .namespace()
        .ok_or_else(|| Error::validation("CronJob has no namespace"))?;

    let rules = ctx.aclapi.job_rules(&job_name).await?;
    let (destinations, warnings) = rules_to_destinations(rules);

    let acl_name = format!("{TSURU_JOB_ACL_PREFIX}{job_name}");
    super::sync_source_acl(
        &ctx.client,
        &namespace,
        &acl_name,
        AclSource::TsuruJob(job_name),
        destinations,
        warnings,
        None,
    )
    .await
}

/// Retry rule API and API server failures
pub fn error_policy(job: Arc<CronJob>, error: &Error, _ctx: Arc<CronJobContext>) -> Action {
    error!(?error, cronjob = %job.name_any(), "reconciliation failed");
    Action::requeue(Duration::from_secs(30))
}
