//! In-process sinks for tests and local runs. Always compiled, like the
//! other mock clients in the workspace, so integration tests can use them.
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    AnalyticalError, AnalyticalRow, AnalyticalSink, Namespace, ObjectStore, RowError, StorageError,
};

/// Something observable that happened to a delivery or its artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEvent {
    RawPut(String),
    ProcessedPut(String),
    Insert(String),
    Ack(String),
    Nack(String),
}

/// Shared, ordered log of sink writes and feed decisions.
#[derive(Debug, Clone, Default)]
pub struct SinkJournal {
    events: Arc<Mutex<Vec<JournalEvent>>>,
}

impl SinkJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: JournalEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn events(&self) -> Vec<JournalEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(Namespace, String), Vec<u8>>>,
    failing: Mutex<HashSet<Namespace>>,
    delay: Mutex<Option<Duration>>,
    journal: Option<SinkJournal>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: SinkJournal) -> Self {
        Self {
            journal: Some(journal),
            ..Default::default()
        }
    }

    /// Make every put into `namespace` fail until `heal` is called.
    pub fn fail_namespace(&self, namespace: Namespace) {
        lock(&self.failing).insert(namespace);
    }

    pub fn heal(&self) {
        lock(&self.failing).clear();
    }

    /// Sleep this long before completing each put.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    pub fn get(&self, namespace: Namespace, key: &str) -> Option<Vec<u8>> {
        lock(&self.objects)
            .get(&(namespace, key.to_owned()))
            .cloned()
    }

    pub fn keys(&self, namespace: Namespace) -> Vec<String> {
        lock(&self.objects)
            .keys()
            .filter(|(ns, _)| *ns == namespace)
            .map(|(_, key)| key.clone())
            .collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        namespace: Namespace,
        key: &str,
        body: Vec<u8>,
    ) -> Result<(), StorageError> {
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if lock(&self.failing).contains(&namespace) {
            return Err(StorageError::Unavailable(format!(
                "{} namespace is failing",
                namespace.as_str()
            )));
        }

        lock(&self.objects).insert((namespace, key.to_owned()), body);

        if let Some(journal) = &self.journal {
            journal.record(match namespace {
                Namespace::Raw => JournalEvent::RawPut(key.to_owned()),
                Namespace::Processed => JournalEvent::ProcessedPut(key.to_owned()),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyticalFailure {
    /// The call itself fails.
    Transport,
    /// The call succeeds but every row comes back with this reason.
    RejectRows(String),
}

#[derive(Default)]
pub struct MemoryAnalyticalSink {
    rows: Mutex<Vec<AnalyticalRow>>,
    failure: Mutex<Option<AnalyticalFailure>>,
    journal: Option<SinkJournal>,
}

impl MemoryAnalyticalSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: SinkJournal) -> Self {
        Self {
            journal: Some(journal),
            ..Default::default()
        }
    }

    pub fn fail_with(&self, failure: AnalyticalFailure) {
        *lock(&self.failure) = Some(failure);
    }

    pub fn heal(&self) {
        *lock(&self.failure) = None;
    }

    pub fn rows(&self) -> Vec<AnalyticalRow> {
        lock(&self.rows).clone()
    }
}

#[async_trait]
impl AnalyticalSink for MemoryAnalyticalSink {
    async fn insert_rows(
        &self,
        rows: Vec<AnalyticalRow>,
    ) -> Result<Vec<RowError>, AnalyticalError> {
        let failure = lock(&self.failure).clone();
        match failure {
            Some(AnalyticalFailure::Transport) => Err(AnalyticalError::Unavailable(
                "analytical sink is failing".to_owned(),
            )),
            Some(AnalyticalFailure::RejectRows(reason)) => Ok((0..rows.len())
                .map(|index| RowError {
                    index,
                    reason: reason.clone(),
                    location: String::new(),
                    message: format!("row {index} rejected"),
                })
                .collect()),
            None => {
                if let Some(journal) = &self.journal {
                    for row in &rows {
                        journal.record(JournalEvent::Insert(row.insert_id.clone()));
                    }
                }
                lock(&self.rows).extend(rows);
                Ok(Vec::new())
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
