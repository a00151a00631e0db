//! In-memory stand-ins for the cluster API.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use supervisor::factory::ControllerGroup;
use supervisor::node::CredentialStore;
use supervisor::schema::{Readiness, SchemaApi, SchemaExtension};
use tokio_util::sync::CancellationToken;

/// Schema API that establishes every record after a number of polls.
///
/// `established` flips to true once every record submitted so far has been
/// reported established.
pub struct SlowSchemaApi {
    pub polls_until_established: usize,
    pub established: Arc<AtomicBool>,
    polls: Mutex<Vec<(String, usize)>>,
}

impl SlowSchemaApi {
    pub fn new(polls_until_established: usize) -> Self {
        SlowSchemaApi {
            polls_until_established,
            established: Arc::new(AtomicBool::new(false)),
            polls: Mutex::new(vec![]),
        }
    }
}

#[async_trait::async_trait]
impl SchemaApi for SlowSchemaApi {
    async fn create(&self, record: &SchemaExtension) -> anyhow::Result<Readiness> {
        let mut polls = self.polls.lock().unwrap();
        if !polls.iter().any(|(name, _)| *name == record.name()) {
            polls.push((record.name(), 0));
        }
        Ok(Readiness::Pending)
    }

    async fn readiness(&self, name: &str) -> anyhow::Result<Readiness> {
        let mut polls = self.polls.lock().unwrap();
        let entry = polls
            .iter_mut()
            .find(|(n, _)| n == name)
            .ok_or_else(|| anyhow::anyhow!("{} not found", name))?;
        entry.1 += 1;
        let ready = entry.1 > self.polls_until_established;
        if polls.iter().all(|(_, count)| *count > self.polls_until_established) {
            self.established.store(true, Ordering::SeqCst);
        }
        Ok(if ready {
            Readiness::Established
        } else {
            Readiness::Pending
        })
    }
}

/// Counts in-flight starts and checks that the schema was established first.
#[derive(Default)]
pub struct StartLedger {
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub started: AtomicUsize,
    pub started_before_schema: AtomicUsize,
}

pub struct RecordingGroup {
    pub name: String,
    pub ledger: Arc<StartLedger>,
    pub schema_established: Arc<AtomicBool>,
    pub sync_time: Duration,
}

#[async_trait::async_trait]
impl ControllerGroup for RecordingGroup {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, _shutdown: CancellationToken) -> anyhow::Result<()> {
        if !self.schema_established.load(Ordering::SeqCst) {
            self.ledger
                .started_before_schema
                .fetch_add(1, Ordering::SeqCst);
        }
        self.ledger.started.fetch_add(1, Ordering::SeqCst);
        let now = self.ledger.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.ledger.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.sync_time).await;
        self.ledger.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Credential store that records every delete and can be told to fail.
#[derive(Default)]
pub struct RecordingStore {
    pub deletes: Mutex<Vec<String>>,
    pub failing: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub fn deletes_for(&self, node_name: &str) -> usize {
        self.deletes
            .lock()
            .unwrap()
            .iter()
            .filter(|n| *n == node_name)
            .count()
    }
}

#[async_trait::async_trait]
impl CredentialStore for RecordingStore {
    async fn delete(&self, node_name: &str) -> anyhow::Result<()> {
        self.deletes.lock().unwrap().push(node_name.to_string());
        if self.failing.lock().unwrap().iter().any(|n| n == node_name) {
            anyhow::bail!("secrets \"{}.node-password.k3s\" not found", node_name);
        }
        Ok(())
    }
}
