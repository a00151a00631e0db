//! Controller groups: shared watch caches for one API group, plus the
//! reconcilers registered against them.
//!
//! A [`ControllerFactory`] collects watches while it is being assembled and
//! launches them all when it is started. Starting returns once every watch
//! has received its initial listing; after that the watches keep running
//! until the shutdown token is cancelled.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kube::api::{ApiResource, DynamicObject};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

mod watch;

use watch::launch_watcher;

/// Pause between retries of a watch that failed after its initial sync.
const WATCH_RETRY_PAUSE: Duration = Duration::from_secs(5);

/// Trait alias for types which can be watched.
pub trait Watchable:
    Resource<DynamicType = ()> + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
}

impl<T> Watchable for T where
    T: Resource<DynamicType = ()> + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
}

/// Identifies an object independent of its contents.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Namespace, for namespaced kinds
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Key of a cluster-scoped object.
    pub fn cluster(name: &str) -> Self {
        ObjectKey {
            namespace: None,
            name: name.to_string(),
        }
    }

    pub(crate) fn of(object: &DynamicObject) -> Option<Self> {
        Some(ObjectKey {
            namespace: object.metadata.namespace.clone(),
            name: object.metadata.name.clone()?,
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}", namespace, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Reacts to changes of objects of kind `K`.
///
/// Errors are logged by the caller and never stop the watch.
#[async_trait::async_trait]
pub trait Reconciler<K>: Send + Sync + 'static {
    /// The object was created or updated, or was present in a fresh listing.
    async fn on_change(&self, object: &K) -> anyhow::Result<()>;

    /// The object was deleted, or vanished between two listings.
    async fn on_remove(&self, key: &ObjectKey) -> anyhow::Result<()>;
}

/// Something that can be started once and reports when its caches are
/// synced.
#[async_trait::async_trait]
pub trait ControllerGroup: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Launch all watches and wait for their initial sync.
    ///
    /// Watches keep running after this returns, until `shutdown` is cancelled.
    async fn start(&self, shutdown: CancellationToken) -> anyhow::Result<()>;
}

/// Converts dynamic objects into the kind a reconciler expects.
#[async_trait::async_trait]
pub(crate) trait Dispatch: Send + Sync {
    async fn change(&self, object: DynamicObject) -> anyhow::Result<()>;
    async fn remove(&self, key: &ObjectKey) -> anyhow::Result<()>;
}

struct Typed<K, R> {
    reconciler: R,
    kind: PhantomData<fn() -> K>,
}

#[async_trait::async_trait]
impl<K, R> Dispatch for Typed<K, R>
where
    K: DeserializeOwned + Send + Sync + 'static,
    R: Reconciler<K>,
{
    async fn change(&self, object: DynamicObject) -> anyhow::Result<()> {
        let object: K = concrete_object(object)?;
        self.reconciler.on_change(&object).await
    }

    async fn remove(&self, key: &ObjectKey) -> anyhow::Result<()> {
        self.reconciler.on_remove(key).await
    }
}

/// Convert a `DynamicObject` to a concrete type by round-tripping through JSON.
fn concrete_object<K: DeserializeOwned>(object: DynamicObject) -> anyhow::Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

/// Configuration of a single watch.
pub(crate) struct Watch {
    pub(crate) resource: ApiResource,
    pub(crate) dispatch: Arc<dyn Dispatch>,
}

impl fmt::Debug for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watch")
            .field("group", &self.resource.group)
            .field("version", &self.resource.version)
            .field("kind", &self.resource.kind)
            .finish()
    }
}

/// A set of watches against one API group, started as a unit.
pub struct ControllerFactory {
    name: String,
    client: Client,
    watches: Mutex<Vec<Watch>>,
    registered: usize,
    started: AtomicBool,
    retry_pause: Duration,
}

impl ControllerFactory {
    /// Create an empty group.
    pub fn new(name: &str, client: Client) -> Self {
        ControllerFactory {
            name: name.to_string(),
            client,
            watches: Mutex::new(vec![]),
            registered: 0,
            started: AtomicBool::new(false),
            retry_pause: WATCH_RETRY_PAUSE,
        }
    }

    /// Watch all objects of kind `K` and feed them to `reconciler`.
    pub fn watch<K, R>(&mut self, reconciler: R) -> &mut Self
    where
        K: Watchable,
        R: Reconciler<K>,
    {
        self.push::<K, R>(ApiResource::erase::<K>(&()), reconciler)
    }

    /// Watch all objects of a kind only known at runtime, such as one
    /// provided by a schema extension.
    pub fn watch_dynamic<R>(&mut self, resource: ApiResource, reconciler: R) -> &mut Self
    where
        R: Reconciler<DynamicObject>,
    {
        self.push::<DynamicObject, R>(resource, reconciler)
    }

    /// Number of registered watches.
    pub fn watch_count(&self) -> usize {
        self.registered
    }

    fn push<K, R>(&mut self, resource: ApiResource, reconciler: R) -> &mut Self
    where
        K: DeserializeOwned + Send + Sync + 'static,
        R: Reconciler<K>,
    {
        debug!(group = %self.name, kind = %resource.kind, "Registering watch");
        self.registered += 1;
        self.watches.get_mut().push(Watch {
            resource,
            dispatch: Arc::new(Typed {
                reconciler,
                kind: PhantomData,
            }),
        });
        self
    }
}

#[async_trait::async_trait]
impl ControllerGroup for ControllerFactory {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            anyhow::bail!("controller group {} was already started", self.name);
        }
        let watches = std::mem::take(&mut *self.watches.lock().await);
        info!(group = %self.name, watches = watches.len(), "Starting controller group");

        let mut synced = Vec::with_capacity(watches.len());
        for watch in watches {
            let kind = watch.resource.kind.clone();
            let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &watch.resource);
            let (tx, rx) = tokio::sync::oneshot::channel();
            tokio::spawn(launch_watcher(
                api,
                watch,
                tx,
                shutdown.clone(),
                self.retry_pause,
            ));
            synced.push(async move {
                match rx.await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!(
                        "watch for {} stopped before its initial sync",
                        kind
                    )),
                }
            });
        }
        futures::future::try_join_all(synced).await?;

        info!(group = %self.name, "Controller group caches synced");
        Ok(())
    }
}
