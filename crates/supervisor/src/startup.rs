//! Starts controller groups with bounded concurrency.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{Result, StartupError};
use crate::factory::ControllerGroup;
use crate::schema::{SchemaApi, SchemaExtension, SchemaRegistrar};

/// Start every group, with at most `limit` of them syncing at once.
///
/// Returns once all groups have synced. The first failure cancels every
/// group started by this call and is returned as-is.
pub async fn start_all(
    groups: Vec<&dyn ControllerGroup>,
    limit: usize,
    shutdown: &CancellationToken,
) -> Result<(), StartupError> {
    let total = groups.len();
    let groups_token = shutdown.child_token();
    let mut starts = futures::stream::iter(groups.into_iter().map(|group| {
        let token = groups_token.clone();
        async move {
            group
                .start(token)
                .await
                .map_err(|cause| StartupError::new(group.name(), cause))
        }
    }))
    .buffer_unordered(limit.max(1));

    while let Some(result) = starts.next().await {
        if let Err(e) = result {
            error!(group = %e.group, error = %e.cause, "Controller group failed to start");
            groups_token.cancel();
            return Err(e);
        }
    }

    info!(groups = total, "All controller groups synced");
    Ok(())
}

/// Register `records`, then start `groups`.
///
/// No group is started unless every record is established.
pub async fn start_in_order<A: SchemaApi>(
    registrar: &SchemaRegistrar<A>,
    records: &[SchemaExtension],
    groups: Vec<&dyn ControllerGroup>,
    limit: usize,
    shutdown: &CancellationToken,
) -> Result<()> {
    registrar.register(records).await?;
    start_all(groups, limit, shutdown).await?;
    Ok(())
}
