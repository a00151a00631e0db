//! The server context: one connection and the controller groups sharing it.

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::connection::{ClusterConnection, Role};
use crate::error::StartupError;
use crate::factory::{ControllerFactory, ControllerGroup};
use crate::helm;
use crate::startup::start_all;

/// Owns the cluster connection and every controller group built on it.
pub struct Context {
    connection: ClusterConnection,
    /// Workloads (deployments, daemonsets, ...)
    pub apps: ControllerFactory,
    /// RBAC objects
    pub auth: ControllerFactory,
    /// Jobs
    pub batch: ControllerFactory,
    /// Nodes, secrets, config maps and the rest of the core group
    pub core: ControllerFactory,
    /// Helm controller kinds; absent when the helm controller is disabled
    pub helm: Option<ControllerFactory>,
    cache_sync_concurrency: usize,
}

impl Context {
    /// Create the groups for `connection`.
    ///
    /// The helm group is only created for the supervisor role, since only
    /// that role installs the schema extensions it watches.
    pub fn new(connection: ClusterConnection, config: &Config) -> Self {
        let client = connection.client();
        let helm = if config.role == Role::Supervisor && !config.disable_helm_controller {
            let mut factory = ControllerFactory::new("helm", client.clone());
            helm::register(&mut factory);
            Some(factory)
        } else {
            None
        };

        Context {
            apps: ControllerFactory::new("apps", client.clone()),
            auth: ControllerFactory::new("auth", client.clone()),
            batch: ControllerFactory::new("batch", client.clone()),
            core: ControllerFactory::new("core", client),
            helm,
            connection,
            cache_sync_concurrency: config.cache_sync_concurrency,
        }
    }

    /// The connection shared by all groups.
    pub fn connection(&self) -> &ClusterConnection {
        &self.connection
    }

    /// Maximum number of groups syncing at once.
    pub fn cache_sync_concurrency(&self) -> usize {
        self.cache_sync_concurrency
    }

    /// Every group, in start order.
    pub fn groups(&self) -> Vec<&dyn ControllerGroup> {
        let mut groups: Vec<&dyn ControllerGroup> = vec![
            &self.apps as &dyn ControllerGroup,
            &self.auth,
            &self.batch,
            &self.core,
        ];
        if let Some(helm) = &self.helm {
            groups.push(helm);
        }
        groups
    }

    /// Start all groups and wait for them to sync.
    pub async fn start(&self, shutdown: &CancellationToken) -> Result<(), StartupError> {
        start_all(self.groups(), self.cache_sync_concurrency, shutdown).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::connection::{ClusterConnectionBuilder, ConnectionDescriptor};
    use std::io::Write;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
clusters:
- name: default
  cluster:
    server: https://127.0.0.1:6443
    insecure-skip-tls-verify: true
contexts:
- name: default
  context:
    cluster: default
    user: default
current-context: default
users:
- name: default
  user:
    token: not-a-real-token
"#;

    async fn connection(role: Role) -> (ClusterConnection, tempfile::NamedTempFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(KUBECONFIG.as_bytes()).unwrap();
        let descriptor = ConnectionDescriptor {
            credentials_path: file.path().to_owned(),
            role,
        };
        let connection = ClusterConnectionBuilder::build(&descriptor).await.unwrap();
        (connection, file)
    }

    fn names(context: &Context) -> Vec<&str> {
        context.groups().into_iter().map(|g| g.name()).collect()
    }

    #[tokio::test]
    async fn test_helm_group_follows_role_and_configuration() {
        let mut config = Config::with_data_dir("/data".into());

        let (conn, _file) = connection(Role::Supervisor).await;
        let context = Context::new(conn, &config);
        assert_eq!(names(&context), vec!["apps", "auth", "batch", "core", "helm"]);

        config.disable_helm_controller = true;
        let (conn, _file) = connection(Role::Supervisor).await;
        let context = Context::new(conn, &config);
        assert_eq!(names(&context), vec!["apps", "auth", "batch", "core"]);

        config.disable_helm_controller = false;
        config.role = Role::Admin;
        let (conn, _file) = connection(Role::Admin).await;
        let context = Context::new(conn, &config);
        assert!(context.helm.is_none());
    }

    #[tokio::test]
    async fn test_groups_without_watches_start_at_once() {
        let mut config = Config::with_data_dir("/data".into());
        config.disable_helm_controller = true;
        let (conn, _file) = connection(Role::Supervisor).await;
        let context = Context::new(conn, &config);
        assert_eq!(context.cache_sync_concurrency(), 5);

        let shutdown = CancellationToken::new();
        context.start(&shutdown).await.expect("empty groups should sync");
        let err = context
            .start(&shutdown)
            .await
            .expect_err("groups only start once");
        assert!(err.to_string().contains("already started"));
    }
}
