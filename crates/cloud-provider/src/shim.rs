//! The built-in provider.
//!
//! It exposes instance metadata built from annotations the agent puts on its
//! node, and declines every other capability.

use std::io::Read;

use k8s_openapi::api::core::v1::{Node, NodeAddress};
use serde::Deserialize;
use supervisor::version::PROGRAM;
use thiserror::Error;
use tracing::debug;

use crate::error::{ConfigError, RegistryError};
use crate::registry::Registry;
use crate::{Capability, CloudInstanceView, CloudProvider, InstanceMetadata};

/// Configuration of the built-in provider, read from an optional JSON blob.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Expose node instance metadata
    pub node_enabled: bool,
    /// The cluster runs without root privileges
    pub rootless: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            node_enabled: true,
            rootless: false,
        }
    }
}

/// A node's metadata cannot be produced yet.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// The agent has not published the node's addresses yet.
    #[error("address annotations not yet set on node {0}")]
    AddressesNotSet(String),
}

/// The built-in provider.
#[derive(Clone, Debug)]
pub struct Shim {
    config: Config,
}

impl Shim {
    /// Build the provider from an optional configuration reader.
    ///
    /// Fails with [`ConfigError::Disabled`] when node integration is turned
    /// off, since a provider without it would offer nothing at all.
    pub fn new(config: Option<&mut dyn Read>) -> Result<Self, ConfigError> {
        let config = match config {
            Some(reader) => {
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes)?;
                serde_json::from_slice(&bytes)?
            }
            None => Config::default(),
        };
        if !config.node_enabled {
            return Err(ConfigError::Disabled);
        }
        debug!(?config, "Cloud provider configured");
        Ok(Shim { config })
    }

    /// The configuration this provider was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Register the built-in provider under the program name.
pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register(PROGRAM, Box::new(build))
}

fn build(config: Option<&mut dyn Read>) -> Result<Box<dyn CloudProvider>, ConfigError> {
    Ok(Box::new(Shim::new(config)?))
}

impl CloudProvider for Shim {
    fn provider_name(&self) -> &str {
        PROGRAM
    }

    fn has_cluster_id(&self) -> bool {
        false
    }

    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::InstanceMetadata => self.config.node_enabled,
            Capability::Instances
            | Capability::LoadBalancer
            | Capability::Zones
            | Capability::Clusters
            | Capability::Routes => false,
        }
    }

    fn instance_metadata(&self) -> Option<&dyn InstanceMetadata> {
        if self.config.node_enabled {
            Some(self)
        } else {
            None
        }
    }
}

fn internal_ip_annotation() -> String {
    format!("{}.io/internal-ip", PROGRAM)
}

fn external_ip_annotation() -> String {
    format!("{}.io/external-ip", PROGRAM)
}

fn hostname_annotation() -> String {
    format!("{}.io/hostname", PROGRAM)
}

fn address(type_: &str, address: &str) -> NodeAddress {
    NodeAddress {
        address: address.to_string(),
        type_: type_.to_string(),
    }
}

fn split_ips(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|ip| !ip.is_empty())
}

#[async_trait::async_trait]
impl InstanceMetadata for Shim {
    async fn instance_exists(&self, _node: &Node) -> anyhow::Result<bool> {
        Ok(true)
    }

    async fn instance_shutdown(&self, _node: &Node) -> anyhow::Result<bool> {
        Ok(false)
    }

    async fn instance_metadata(&self, node: &Node) -> anyhow::Result<CloudInstanceView> {
        let name = node.metadata.name.clone().unwrap_or_default();
        let annotations = node.metadata.annotations.clone().unwrap_or_default();

        let internal = annotations
            .get(&internal_ip_annotation())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| InstanceError::AddressesNotSet(name.clone()))?;

        let mut addresses: Vec<NodeAddress> = split_ips(internal)
            .map(|ip| address("InternalIP", ip))
            .collect();
        if let Some(external) = annotations.get(&external_ip_annotation()) {
            addresses.extend(split_ips(external).map(|ip| address("ExternalIP", ip)));
        }
        if let Some(hostname) = annotations.get(&hostname_annotation()) {
            addresses.push(address("Hostname", hostname));
        }

        Ok(CloudInstanceView {
            exists: true,
            node_enabled: self.config.node_enabled,
            provider_id: format!("{}://{}", PROGRAM, name),
            instance_type: PROGRAM.to_string(),
            addresses,
        })
    }
}
