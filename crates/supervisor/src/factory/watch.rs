use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt};
use kube::api::DynamicObject;
use kube::Api;
use kube_runtime::watcher::{self, Event};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{Dispatch, ObjectKey, Watch};

/// Utility struct for summarizing watcher events in log output.
#[derive(Debug)]
enum PrettyEvent<'a> {
    Applied { name: Option<&'a str> },
    Deleted { name: Option<&'a str> },
    Restarted { count: usize },
}

impl<'a> From<&'a Event<DynamicObject>> for PrettyEvent<'a> {
    fn from(event: &'a Event<DynamicObject>) -> Self {
        match event {
            Event::Applied(object) => PrettyEvent::Applied {
                name: object.metadata.name.as_deref(),
            },
            Event::Deleted(object) => PrettyEvent::Deleted {
                name: object.metadata.name.as_deref(),
            },
            Event::Restarted(objects) => PrettyEvent::Restarted {
                count: objects.len(),
            },
        }
    }
}

/// Runs one watch until `shutdown` is cancelled.
///
/// `synced` receives `Ok` after the first complete listing, or the error that
/// prevented it. Errors after that are logged and the watch is retried after
/// `retry_pause`.
pub(crate) async fn launch_watcher(
    api: Api<DynamicObject>,
    watch: Watch,
    synced: oneshot::Sender<anyhow::Result<()>>,
    shutdown: CancellationToken,
    retry_pause: Duration,
) {
    info!(watch = ?watch, "Starting watcher");
    let kind = watch.resource.kind.clone();
    let mut state = WatchState::new(&kind, Arc::clone(&watch.dispatch), shutdown.clone());
    let mut synced = Some(synced);
    let mut stream = watcher::watcher(api, watcher::Config::default()).boxed();

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!(kind = %kind, "Watcher shutting down");
                return;
            }
            next = stream.try_next() => next,
        };

        match next {
            Ok(Some(event)) => {
                debug!(kind = %kind, event = ?PrettyEvent::from(&event), "Handling event");
                if let Event::Restarted(_) = event {
                    if let Some(tx) = synced.take() {
                        info!(kind = %kind, "Watch cache synced");
                        // The receiver may have given up already; the watch still runs.
                        let _ = tx.send(Ok(()));
                    }
                }
                state.handle_event(event);
            }
            Ok(None) => {
                warn!(kind = %kind, "Watch stream ended");
                return;
            }
            Err(error) => match synced.take() {
                Some(tx) => {
                    warn!(kind = %kind, ?error, "Initial listing failed");
                    let _ = tx.send(Err(anyhow::anyhow!(
                        "initial listing of {} failed: {}",
                        kind,
                        error
                    )));
                    return;
                }
                None => {
                    warn!(kind = %kind, ?error, "Error streaming object events, retrying");
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(retry_pause) => (),
                    }
                }
            },
        }
    }
}

/// Work queued for the worker of a single object.
#[derive(Debug)]
enum Work {
    Change(DynamicObject),
    Remove,
}

/// The queue feeding one object's worker task.
struct Worker {
    queue: mpsc::UnboundedSender<Work>,
    handle: JoinHandle<()>,
}

/// Tracks the objects a watch has reported so that a fresh listing can be
/// turned into removals for objects that vanished in between.
///
/// Notifications are handed to one worker task per object. Calls for the
/// same object run in order, one at a time; calls for different objects run
/// concurrently, so a reconciler blocking on one object never holds up the
/// others or the watch stream.
pub(crate) struct WatchState {
    kind: String,
    dispatch: Arc<dyn Dispatch>,
    shutdown: CancellationToken,
    known: HashSet<ObjectKey>,
    workers: HashMap<ObjectKey, Worker>,
    // Workers of removed objects that may still be draining their queue.
    retired: HashMap<ObjectKey, JoinHandle<()>>,
}

impl WatchState {
    pub(crate) fn new(kind: &str, dispatch: Arc<dyn Dispatch>, shutdown: CancellationToken) -> Self {
        WatchState {
            kind: kind.to_string(),
            dispatch,
            shutdown,
            known: HashSet::new(),
            workers: HashMap::new(),
            retired: HashMap::new(),
        }
    }

    pub(crate) fn handle_event(&mut self, event: Event<DynamicObject>) {
        self.retired.retain(|_, handle| !handle.is_finished());
        match event {
            Event::Applied(object) => self.change(object),
            Event::Deleted(object) => match ObjectKey::of(&object) {
                Some(key) => {
                    self.known.remove(&key);
                    self.remove(key);
                }
                None => warn!(kind = %self.kind, "Object without name"),
            },
            Event::Restarted(objects) => self.resync(objects),
        }
    }

    fn resync(&mut self, objects: Vec<DynamicObject>) {
        let current: HashSet<ObjectKey> = objects.iter().filter_map(ObjectKey::of).collect();
        let vanished: Vec<ObjectKey> = self.known.difference(&current).cloned().collect();
        for key in vanished {
            trace!(kind = %self.kind, key = %key, "Object vanished between listings");
            self.known.remove(&key);
            self.remove(key);
        }

        for object in objects {
            self.change(object);
        }
    }

    fn change(&mut self, object: DynamicObject) {
        let key = match ObjectKey::of(&object) {
            Some(key) => key,
            None => {
                warn!(kind = %self.kind, "Object without name");
                return;
            }
        };
        self.known.insert(key.clone());
        self.enqueue(key, Work::Change(object));
    }

    /// Queue the removal and retire the object's worker once it has run.
    fn remove(&mut self, key: ObjectKey) {
        self.enqueue(key.clone(), Work::Remove);
        if let Some(worker) = self.workers.remove(&key) {
            // Dropping the sender lets the worker exit after the removal.
            self.retired.insert(key, worker.handle);
        }
    }

    fn enqueue(&mut self, key: ObjectKey, work: Work) {
        if !self.workers.contains_key(&key) {
            let worker = self.spawn_worker(key.clone());
            self.workers.insert(key.clone(), worker);
        }
        let delivered = self
            .workers
            .get(&key)
            .map(|worker| worker.queue.send(work).is_ok())
            .unwrap_or(false);
        if !delivered {
            // Only happens after shutdown, when workers stop reading.
            debug!(kind = %self.kind, key = %key, "Dropping notification for stopped worker");
        }
    }

    fn spawn_worker(&mut self, key: ObjectKey) -> Worker {
        let (queue, receiver) = mpsc::unbounded_channel();
        let previous = self.retired.remove(&key);
        let handle = tokio::spawn(run_worker(
            self.kind.clone(),
            key,
            Arc::clone(&self.dispatch),
            receiver,
            previous,
            self.shutdown.clone(),
        ));
        Worker { queue, handle }
    }

    /// Close every queue and wait for the workers to finish what they hold.
    #[cfg(test)]
    pub(crate) async fn drain(mut self) {
        let mut handles: Vec<JoinHandle<()>> = self.retired.drain().map(|(_, h)| h).collect();
        handles.extend(self.workers.drain().map(|(_, worker)| worker.handle));
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// Feeds one object's notifications to the reconciler, in order.
///
/// Waits for `previous`, the retired worker of an earlier incarnation of the
/// same object, before handling anything.
async fn run_worker(
    kind: String,
    key: ObjectKey,
    dispatch: Arc<dyn Dispatch>,
    mut receiver: mpsc::UnboundedReceiver<Work>,
    previous: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
) {
    if let Some(previous) = previous {
        let _ = previous.await;
    }
    loop {
        let work = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            work = receiver.recv() => match work {
                Some(work) => work,
                None => return,
            },
        };
        trace!(kind = %kind, key = %key, ?work, "Reconciling");
        match work {
            Work::Change(object) => {
                if let Err(error) = dispatch.change(object).await {
                    warn!(kind = %kind, key = %key, ?error, "Reconciling change failed");
                }
            }
            Work::Remove => {
                if let Err(error) = dispatch.remove(&key).await {
                    warn!(kind = %kind, key = %key, ?error, "Reconciling removal failed");
                }
            }
        }
    }
}
