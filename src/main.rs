//! ACL operator - declarative network ACLs for Tsuru workloads

use std::sync::Arc;

use clap::Parser;
use futures::future::join_all;
use kube::{Client, CustomResourceExt};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use acl_operator::aclapi::AclApiClient;
use acl_operator::controller::{controller_futures, Deps, GarbageCollector};
use acl_operator::crd::{Acl, AclDnsEntry, RpaasInstanceAddress, TsuruAppAddress};
use acl_operator::dns::SystemResolver;
use acl_operator::tsuru::TsuruClient;

/// ACL operator - converts ACL intent into Kubernetes NetworkPolicies
#[derive(Parser, Debug)]
#[command(name = "acl-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Tsuru API base URL
    #[arg(long, env = "TSURU_API_HOST", default_value = "")]
    tsuru_api_host: String,

    /// Tsuru API bearer token
    #[arg(long, env = "TSURU_API_TOKEN", default_value = "", hide_env_values = true)]
    tsuru_api_token: String,

    /// ACL rule API base URL
    #[arg(long, env = "ACL_API_HOST", default_value = "")]
    acl_api_host: String,

    /// ACL rule API user
    #[arg(long, env = "ACL_API_USER", default_value = "")]
    acl_api_user: String,

    /// ACL rule API password
    #[arg(long, env = "ACL_API_PASSWORD", default_value = "", hide_env_values = true)]
    acl_api_password: String,

    /// Report what garbage collection would delete without deleting it
    #[arg(long, env = "GC_DRY_RUN")]
    gc_dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        // Generate CRD YAML for every kind the operator owns
        for crd in [
            Acl::crd(),
            AclDnsEntry::crd(),
            TsuruAppAddress::crd(),
            RpaasInstanceAddress::crd(),
        ] {
            let doc = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---");
            println!("{doc}");
        }
        return Ok(());
    }

    let client = Client::try_default().await?;

    let tsuru = TsuruClient::new(&cli.tsuru_api_host, &cli.tsuru_api_token)?;
    let aclapi = AclApiClient::new(&cli.acl_api_host, &cli.acl_api_user, &cli.acl_api_password)?;

    let deps = Deps {
        client: client.clone(),
        resolver: Arc::new(SystemResolver),
        tsuru: Arc::new(tsuru),
        aclapi: Arc::new(aclapi),
    };

    info!("Starting controllers:");
    let controllers = controller_futures(deps);

    let gc = GarbageCollector::new(client, cli.gc_dry_run);
    tokio::spawn(gc.run());

    join_all(controllers).await;

    info!("controllers exited, shutting down");
    Ok(())
}
