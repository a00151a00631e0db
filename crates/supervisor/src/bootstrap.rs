//! The startup sequence of the supervisor process.

use k8s_openapi::api::core::v1::Node;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::connection::{ClusterConnectionBuilder, Role};
use crate::context::Context;
use crate::error::Result;
use crate::node::{KubeCredentialStore, NodeLifecycleController};
use crate::schema::{records_for, KubeSchemaApi, SchemaExtension, SchemaRegistrar};
use crate::startup::start_in_order;

/// Connect, install schema extensions and start every controller group.
///
/// Returns the running context once all groups have synced. The groups keep
/// running until `shutdown` is cancelled.
pub async fn bootstrap(config: &Config, shutdown: &CancellationToken) -> Result<Context> {
    let descriptor = config.descriptor();
    let connection = ClusterConnectionBuilder::build(&descriptor).await?;
    connection.probe().await?;

    let mut context = Context::new(connection, config);
    let client = context.connection().client();
    context
        .core
        .watch::<Node, _>(NodeLifecycleController::new(KubeCredentialStore::new(
            client.clone(),
        )));

    let records: Vec<SchemaExtension> = match descriptor.role {
        Role::Supervisor => records_for(config),
        Role::Admin => vec![],
    };
    let registrar = SchemaRegistrar::new(
        KubeSchemaApi::new(client),
        config.schema_timeout,
        config.schema_poll_interval,
    );
    start_in_order(
        &registrar,
        &records,
        context.groups(),
        context.cache_sync_concurrency(),
        shutdown,
    )
    .await?;

    info!(role = ?descriptor.role, "Supervisor started");
    Ok(context)
}
