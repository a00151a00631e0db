//! Authenticated connections to the API server.
//!
//! A process builds exactly one [`ClusterConnection`] for its role and shares
//! it, read-only, with every controller group it starts.

use std::path::{Path, PathBuf};

use http::header::{HeaderValue, USER_AGENT};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::client::ClientBuilder;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use kube_runtime::events::{Recorder, Reporter};
use tower_http::set_header::SetRequestHeaderLayer;
use tracing::{debug, info};

use crate::error::ConnectionError;
use crate::version::{user_agent, PROGRAM};

/// Which credentials a process connects with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Unprivileged, client-side tooling
    Admin,
    /// The privileged server process that runs the built-in controllers
    Supervisor,
}

/// Selects the credentials file to connect with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    /// Kubeconfig to read
    pub credentials_path: PathBuf,
    /// The role the connection is built for
    pub role: Role,
}

/// Publishes Kubernetes events on behalf of the supervisor.
///
/// Events may target objects in any namespace.
#[derive(Clone)]
pub struct EventRecorder {
    client: Client,
    reporter: Reporter,
}

impl EventRecorder {
    fn new(client: Client, controller: String) -> Self {
        let instance = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok());
        EventRecorder {
            client,
            reporter: Reporter {
                controller,
                instance,
            },
        }
    }

    /// The identity events are reported under.
    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// A recorder publishing events about `reference`.
    pub fn for_object(&self, reference: ObjectReference) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone(), reference)
    }
}

/// A single authenticated session to the API server.
pub struct ClusterConnection {
    config: kube::Config,
    client: Client,
    user_agent: String,
    event_recorder: Option<EventRecorder>,
}

impl ClusterConnection {
    /// The REST configuration the client was built from.
    pub fn config(&self) -> &kube::Config {
        &self.config
    }

    /// The typed client. Cloning it is cheap and shares the transport.
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// The user agent attached to every request.
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Only present for the [`Role::Supervisor`] role.
    pub fn event_recorder(&self) -> Option<&EventRecorder> {
        self.event_recorder.as_ref()
    }

    /// Ask the API server for its version to check that it is reachable
    /// with these credentials.
    pub async fn probe(&self) -> Result<(), ConnectionError> {
        let info = self
            .client
            .apiserver_version()
            .await
            .map_err(ConnectionError::Unreachable)?;
        info!(version = %info.git_version, "Connected to cluster API");
        Ok(())
    }
}

/// Builds [`ClusterConnection`]s. There are no retries here; callers treat
/// any error as fatal.
pub struct ClusterConnectionBuilder;

impl ClusterConnectionBuilder {
    /// Name requests are tagged with.
    ///
    /// The suffix is the same for both roles.
    pub fn controller_name() -> String {
        format!("{}-supervisor", PROGRAM)
    }

    /// Build a connection for the descriptor's role.
    pub async fn build(
        descriptor: &ConnectionDescriptor,
    ) -> Result<ClusterConnection, ConnectionError> {
        debug!(path = ?descriptor.credentials_path, role = ?descriptor.role, "Building cluster connection");
        let controller_name = Self::controller_name();
        let agent = user_agent(&controller_name);

        let config = rest_config(&descriptor.credentials_path).await?;
        let client = ClientBuilder::try_from(config.clone())
            .map_err(ConnectionError::ClientConstruction)?
            .with_layer(&user_agent_layer(&agent)?)
            .build();

        let event_recorder = match descriptor.role {
            Role::Supervisor => Some(EventRecorder::new(client.clone(), controller_name)),
            Role::Admin => None,
        };

        info!(
            server = %config.cluster_url,
            role = ?descriptor.role,
            "Connection to cluster API configured"
        );

        Ok(ClusterConnection {
            config,
            client,
            user_agent: agent,
            event_recorder,
        })
    }
}

/// Sets `agent` as the `User-Agent` of every request passing through.
fn user_agent_layer(agent: &str) -> Result<SetRequestHeaderLayer<HeaderValue>, ConnectionError> {
    let value = HeaderValue::from_str(agent)
        .map_err(|_| ConnectionError::InvalidUserAgent(agent.to_string()))?;
    Ok(SetRequestHeaderLayer::overriding(USER_AGENT, value))
}

async fn rest_config(path: &Path) -> Result<kube::Config, ConnectionError> {
    let malformed = |source| ConnectionError::MalformedCredentials {
        path: path.to_owned(),
        source,
    };
    let kubeconfig = Kubeconfig::read_from(path).map_err(malformed)?;
    kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(malformed)
}
