//! Per-node join credentials stored as secrets.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams};
use kube::Client;
use tracing::debug;

use crate::version::PROGRAM;

const CREDENTIAL_NAMESPACE: &str = "kube-system";

/// Removes the credential a node used to join the cluster.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync + 'static {
    /// Delete the credential of `node_name`.
    async fn delete(&self, node_name: &str) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
impl<S: CredentialStore + ?Sized> CredentialStore for Arc<S> {
    async fn delete(&self, node_name: &str) -> anyhow::Result<()> {
        (**self).delete(node_name).await
    }
}

/// Name of the secret holding a node's password.
pub fn secret_name(node_name: &str) -> String {
    format!("{}.node-password.{}", node_name, PROGRAM)
}

/// [`CredentialStore`] backed by secrets in the `kube-system` namespace.
#[derive(Clone)]
pub struct KubeCredentialStore {
    secrets: Api<Secret>,
}

impl KubeCredentialStore {
    /// Create against the given client.
    pub fn new(client: Client) -> Self {
        KubeCredentialStore {
            secrets: Api::namespaced(client, CREDENTIAL_NAMESPACE),
        }
    }
}

#[async_trait::async_trait]
impl CredentialStore for KubeCredentialStore {
    async fn delete(&self, node_name: &str) -> anyhow::Result<()> {
        let name = secret_name(node_name);
        self.secrets.delete(&name, &DeleteParams::default()).await?;
        debug!(node = %node_name, secret = %name, "Deleted node password");
        Ok(())
    }
}
