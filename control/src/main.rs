use anyhow::{Context, Result};
use control::apis::service::client::KubeServiceApi;
use control::apis::service::reconciler::Reconciler;
use control::apis::service::watcher::ServiceWatcher;
use control::config::ControllerConfig;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Proxifier controller
///
/// Assigns `name.namespace.rootDomain` hostnames to LoadBalancer Services
/// and publishes them through the Service status.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize rustls crypto provider (needed for Kubernetes TLS client)
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok(); // Ignore error if already installed

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ControllerConfig::from_env().context("Invalid configuration")?;

    info!("Proxifier controller starting");
    info!(
        "   Cluster: {}",
        config.cluster_address.as_deref().unwrap_or("(discovered)")
    );
    info!("   Root domain: {}", config.root_dns_domain);
    if config.insecure_cluster {
        info!("   TLS verification disabled (INSECURE_CLUSTER)");
    }

    let kube_config = config
        .kube_config()
        .await
        .context("Can't configure Kubernetes API client")?;
    let client =
        kube::Client::try_from(kube_config).context("Can't connect to Kubernetes API")?;
    let version = client
        .apiserver_version()
        .await
        .context("Can't connect to Kubernetes API")?;
    info!("Connected to Kubernetes {}.{}", version.major, version.minor);

    let reconciler = Reconciler::from_config(KubeServiceApi::new(client), &config);
    let watcher = ServiceWatcher::new(reconciler);

    tokio::select! {
        result = watcher.run() => {
            result.context("Unable to watch services")?;
        }
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    Ok(())
}
