//! Watches for the helm controller kinds.
//!
//! The package controller itself runs elsewhere; this group only keeps the
//! caches for `HelmChart` and `HelmChartConfig` warm and logs what it sees.

use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use tracing::debug;

use crate::factory::{ControllerFactory, ObjectKey, Reconciler};
use crate::schema::{helm_records, SchemaExtension};

/// Logs every change to objects of one helm kind.
pub struct ObservingReconciler {
    kind: String,
}

#[async_trait::async_trait]
impl Reconciler<DynamicObject> for ObservingReconciler {
    async fn on_change(&self, object: &DynamicObject) -> anyhow::Result<()> {
        debug!(
            kind = %self.kind,
            name = ?object.metadata.name,
            namespace = ?object.metadata.namespace,
            "Observed change"
        );
        Ok(())
    }

    async fn on_remove(&self, key: &ObjectKey) -> anyhow::Result<()> {
        debug!(kind = %self.kind, key = %key, "Observed removal");
        Ok(())
    }
}

/// The API resource served by a schema extension.
pub fn api_resource(record: &SchemaExtension) -> ApiResource {
    let gvk = GroupVersionKind::gvk(&record.group, &record.version, &record.kind);
    ApiResource::from_gvk_with_plural(&gvk, &record.plural)
}

/// Register a watch for every helm kind on `factory`.
pub fn register(factory: &mut ControllerFactory) {
    for record in helm_records() {
        let reconciler = ObservingReconciler {
            kind: record.kind.clone(),
        };
        factory.watch_dynamic(api_resource(&record), reconciler);
    }
}
