//! Cloud provider interface and the built-in provider.
//!
//! A host runtime looks providers up by name in a [`Registry`] and queries
//! them for the capabilities it needs. The built-in provider in [`shim`]
//! only offers per-node instance metadata.

#![warn(missing_docs)]

use k8s_openapi::api::core::v1::{Node, NodeAddress};

pub mod error;
pub mod registry;
pub mod shim;

pub use error::{ConfigError, RegistryError};
pub use registry::{ProviderFactory, Registry};

/// The optional capabilities a provider may offer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    /// Legacy per-instance lookups by name
    Instances,
    /// Per-node instance metadata
    InstanceMetadata,
    /// Service load balancers
    LoadBalancer,
    /// Failure-domain lookups
    Zones,
    /// Cluster enumeration
    Clusters,
    /// Pod network routes
    Routes,
}

impl Capability {
    /// Every capability.
    pub const ALL: [Capability; 6] = [
        Capability::Instances,
        Capability::InstanceMetadata,
        Capability::LoadBalancer,
        Capability::Zones,
        Capability::Clusters,
        Capability::Routes,
    ];
}

/// A named, queryable set of capabilities.
pub trait CloudProvider: Send + Sync {
    /// The name the provider is registered under.
    fn provider_name(&self) -> &str;

    /// Whether the provider requires a cluster ID.
    fn has_cluster_id(&self) -> bool;

    /// Whether `capability` is available.
    fn supports(&self, capability: Capability) -> bool;

    /// The instance metadata handle, when [`Capability::InstanceMetadata`]
    /// is available.
    fn instance_metadata(&self) -> Option<&dyn InstanceMetadata>;
}

/// Read-only view of the cloud instance backing a node.
#[derive(Clone, Debug, PartialEq)]
pub struct CloudInstanceView {
    /// Whether the instance exists
    pub exists: bool,
    /// Whether node integration is enabled
    pub node_enabled: bool,
    /// Provider ID, `<provider>://<node>`
    pub provider_id: String,
    /// Instance type
    pub instance_type: String,
    /// Addresses the node is reachable at
    pub addresses: Vec<NodeAddress>,
}

/// Per-node instance lookups.
#[async_trait::async_trait]
pub trait InstanceMetadata: Send + Sync {
    /// Whether the instance backing `node` exists.
    async fn instance_exists(&self, node: &Node) -> anyhow::Result<bool>;

    /// Whether the instance backing `node` is shut down.
    async fn instance_shutdown(&self, node: &Node) -> anyhow::Result<bool>;

    /// Metadata of the instance backing `node`.
    async fn instance_metadata(&self, node: &Node) -> anyhow::Result<CloudInstanceView>;
}
