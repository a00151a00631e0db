use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, PostParams};
use kube::error::ErrorResponse;
use kube::{Client, Error};
use tracing::{debug, warn};

use super::{Readiness, SchemaApi, SchemaExtension};

macro_rules! retry {
    ($action:expr, times: $num_times:expr, break_on: $matches:pat) => {{
        let mut n = 0u8;
        let mut duration = std::time::Duration::from_millis(100);
        loop {
            n += 1;
            let result = $action;
            match result {
                Ok(_) => break result,
                Err(ref e) => {
                    if matches!(e, $matches) || n == $num_times {
                        break result;
                    }
                    warn!(error = %e, attempt = n, "Request failed, retrying");
                    tokio::time::sleep(duration).await;
                    duration *= (n + 1) as u32;
                }
            }
        }
    }};
}

/// [`SchemaApi`] backed by the cluster's CustomResourceDefinition API.
#[derive(Clone)]
pub struct KubeSchemaApi {
    api: Api<CustomResourceDefinition>,
}

impl KubeSchemaApi {
    /// Create against the given client.
    pub fn new(client: Client) -> Self {
        KubeSchemaApi {
            api: Api::all(client),
        }
    }
}

#[async_trait::async_trait]
impl SchemaApi for KubeSchemaApi {
    async fn create(&self, record: &SchemaExtension) -> anyhow::Result<Readiness> {
        let crd = record.to_crd()?;
        match retry!(
            self.api.create(&PostParams::default(), &crd).await,
            times: 4,
            break_on: &Error::Api(ErrorResponse { code: 400 | 409 | 422, .. })
        ) {
            Ok(_) => {
                debug!(record = %record.name(), "Created schema extension");
                Ok(Readiness::Pending)
            }
            Err(Error::Api(ErrorResponse { code: 409, .. })) => {
                debug!(record = %record.name(), "Schema extension already exists");
                Ok(Readiness::Pending)
            }
            Err(Error::Api(ErrorResponse {
                code: 400 | 422,
                message,
                ..
            })) => {
                warn!(record = %record.name(), %message, "Schema extension refused");
                Ok(Readiness::Rejected(message))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn readiness(&self, name: &str) -> anyhow::Result<Readiness> {
        let crd = self.api.get(name).await?;
        Ok(readiness_of(&crd))
    }
}

/// Reads the NamesAccepted and Established conditions of a definition.
fn readiness_of(crd: &CustomResourceDefinition) -> Readiness {
    let conditions = match crd.status.as_ref().and_then(|s| s.conditions.as_ref()) {
        Some(conditions) => conditions,
        None => return Readiness::Pending,
    };

    if let Some(rejected) = conditions
        .iter()
        .find(|c| c.type_ == "NamesAccepted" && c.status == "False")
    {
        let reason = rejected
            .message
            .clone()
            .or_else(|| rejected.reason.clone())
            .unwrap_or_else(|| "names not accepted".to_string());
        return Readiness::Rejected(reason);
    }

    if conditions
        .iter()
        .any(|c| c.type_ == "Established" && c.status == "True")
    {
        Readiness::Established
    } else {
        Readiness::Pending
    }
}
