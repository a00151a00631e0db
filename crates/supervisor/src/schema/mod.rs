//! Installs the schema extensions (custom resource definitions) that
//! optional controller groups depend on.
//!
//! Registration must finish before any group consuming the extensions is
//! started; see [`crate::startup::start_in_order`].

use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::RegistrationError;

mod crd;

pub use crd::KubeSchemaApi;

const HELM_GROUP: &str = "helm.cattle.io";

/// Whether objects of an extension live in a namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Objects belong to a namespace
    Namespaced,
    /// Objects are cluster-wide
    Cluster,
}

impl Scope {
    fn as_str(&self) -> &'static str {
        match self {
            Scope::Namespaced => "Namespaced",
            Scope::Cluster => "Cluster",
        }
    }
}

/// Declarative description of a schema extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaExtension {
    /// API group, e.g. `helm.cattle.io`
    pub group: String,
    /// Served and stored version
    pub version: String,
    /// Kind of the new objects
    pub kind: String,
    /// Lowercase plural used in URLs
    pub plural: String,
    /// Scope of the new objects
    pub scope: Scope,
}

impl SchemaExtension {
    /// Describe a namespaced extension.
    pub fn namespaced(group: &str, version: &str, kind: &str, plural: &str) -> Self {
        SchemaExtension {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
            scope: Scope::Namespaced,
        }
    }

    /// Describe a cluster-scoped extension.
    pub fn cluster(group: &str, version: &str, kind: &str, plural: &str) -> Self {
        SchemaExtension {
            scope: Scope::Cluster,
            ..Self::namespaced(group, version, kind, plural)
        }
    }

    /// Name of the definition object, `<plural>.<group>`.
    pub fn name(&self) -> String {
        format!("{}.{}", self.plural, self.group)
    }

    /// Render the v1 CustomResourceDefinition for this extension.
    pub fn to_crd(&self) -> anyhow::Result<CustomResourceDefinition> {
        let crd_json = serde_json::json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": {
                "name": self.name(),
            },
            "spec": {
                "group": self.group,
                "names": {
                    "kind": self.kind,
                    "listKind": format!("{}List", self.kind),
                    "plural": self.plural,
                    "singular": self.kind.to_lowercase(),
                },
                "scope": self.scope.as_str(),
                "versions": [{
                    "name": self.version,
                    "served": true,
                    "storage": true,
                    "subresources": {
                        "status": {}
                    },
                    "schema": {
                        "openAPIV3Schema": {
                            "type": "object",
                            "x-kubernetes-preserve-unknown-fields": true
                        }
                    }
                }]
            }
        });
        serde_json::from_value(crd_json)
            .map_err(|e| anyhow::anyhow!("Unable to render definition for {}: {}", self.name(), e))
    }
}

/// Computes the set of extensions to install from configuration.
///
/// The helm controller kinds are only needed when the helm controller runs.
pub fn records_for(config: &Config) -> Vec<SchemaExtension> {
    if config.disable_helm_controller {
        return vec![];
    }
    helm_records()
}

/// The kinds consumed by the helm controller group.
pub fn helm_records() -> Vec<SchemaExtension> {
    vec![
        SchemaExtension::namespaced(HELM_GROUP, "v1", "HelmChart", "helmcharts"),
        SchemaExtension::namespaced(HELM_GROUP, "v1", "HelmChartConfig", "helmchartconfigs"),
    ]
}

/// State of an extension as reported by the API server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// Accepted but not yet served
    Pending,
    /// Served; consumers may watch objects of this kind
    Established,
    /// The API server refused the definition
    Rejected(String),
}

/// The two calls the registrar makes against the API server.
#[async_trait::async_trait]
pub trait SchemaApi: Send + Sync {
    /// Create the definition. A definition that already exists is not an error.
    ///
    /// Returns [`Readiness::Rejected`] when the API server refuses the
    /// definition outright, and [`Readiness::Pending`] otherwise.
    async fn create(&self, record: &SchemaExtension) -> anyhow::Result<Readiness>;

    /// Report the readiness of a definition by name.
    async fn readiness(&self, name: &str) -> anyhow::Result<Readiness>;
}

/// Idempotently installs schema extensions and blocks until they are
/// established.
pub struct SchemaRegistrar<A> {
    api: A,
    timeout: Duration,
    poll_interval: Duration,
}

impl<A: SchemaApi> SchemaRegistrar<A> {
    /// Create a registrar with explicit deadline and poll interval.
    pub fn new(api: A, timeout: Duration, poll_interval: Duration) -> Self {
        SchemaRegistrar {
            api,
            timeout,
            poll_interval,
        }
    }

    /// Install `records` and wait for all of them to be established.
    ///
    /// Returns immediately when `records` is empty.
    pub async fn register(&self, records: &[SchemaExtension]) -> Result<(), RegistrationError> {
        if records.is_empty() {
            debug!("No schema extensions to register");
            return Ok(());
        }

        let submitted = futures::future::try_join_all(records.iter().map(|record| async move {
            debug!(record = %record.name(), "Submitting schema extension");
            self.api
                .create(record)
                .await
                .map(|readiness| (record.name(), readiness))
                .map_err(|source| RegistrationError::Api {
                    name: record.name(),
                    source,
                })
        }))
        .await?;
        for (name, readiness) in submitted {
            if let Readiness::Rejected(reason) = readiness {
                return Err(RegistrationError::Rejected { name, reason });
            }
        }

        let deadline = Instant::now() + self.timeout;
        let mut pending: Vec<String> = records.iter().map(SchemaExtension::name).collect();
        loop {
            let round = tokio::time::timeout_at(deadline, self.poll(&pending)).await;
            let still_pending = match round {
                Ok(result) => result?,
                Err(_) => return Err(RegistrationError::Timeout { names: pending }),
            };

            if still_pending.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(RegistrationError::Timeout {
                    names: still_pending,
                });
            }
            debug!(pending = still_pending.len(), "Waiting for schema extensions");
            tokio::time::sleep(self.poll_interval).await;
            pending = still_pending;
        }
    }

    /// One readiness round over `pending`, returning the names still pending.
    async fn poll(&self, pending: &[String]) -> Result<Vec<String>, RegistrationError> {
        let mut still_pending = Vec::with_capacity(pending.len());
        for name in pending {
            let readiness =
                self.api
                    .readiness(name)
                    .await
                    .map_err(|source| RegistrationError::Api {
                        name: name.clone(),
                        source,
                    })?;
            match readiness {
                Readiness::Established => info!(record = %name, "Schema extension established"),
                Readiness::Pending => still_pending.push(name.clone()),
                Readiness::Rejected(reason) => {
                    return Err(RegistrationError::Rejected {
                        name: name.clone(),
                        reason,
                    })
                }
            }
        }
        Ok(still_pending)
    }
}
