use kube::{Client, Config};

use crate::error::{Error, Result};

/// Builds the Kubernetes client the rest of the core uses (spec §4.9):
/// in-cluster config first, falling back to the local kubeconfig (or an
/// explicit path, for running the core outside a cluster during
/// development).
pub async fn build_client(kubeconfig: Option<&str>) -> Result<Client> {
    let config = match Config::incluster() {
        Ok(cfg) => {
            tracing::info!("using in-cluster kubernetes config");
            cfg
        }
        Err(in_cluster_err) => {
            tracing::info!(
                reason = %in_cluster_err,
                "not running in-cluster; falling back to kubeconfig"
            );
            match kubeconfig {
                Some(path) => {
                    let kubeconfig = kube::config::Kubeconfig::read_from(path)
                        .map_err(|e| Error::Config(format!("failed to read kubeconfig at {path}: {e}")))?;
                    Config::from_custom_kubeconfig(kubeconfig, &Default::default())
                        .await
                        .map_err(|e| Error::Config(format!("invalid kubeconfig at {path}: {e}")))?
                }
                None => Config::infer()
                    .await
                    .map_err(|e| Error::Config(format!("failed to infer kubeconfig: {e}")))?,
            }
        }
    };
    Client::try_from(config).map_err(Error::from)
}
