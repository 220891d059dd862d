//! Durable sinks for ingested records.
//!
//! Every write is keyed by the message id, so writing the same id twice
//! replaces the earlier content. The three `DualSinkWriter` operations are
//! independent: a failed operation never undoes one that already succeeded.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;

use crate::error::SinkError;
use crate::message_id::MessageId;
use crate::record::{CanonicalRecord, RawRecord};

pub mod bigquery;
pub mod memory;
pub mod storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Namespace {
    Raw,
    Processed,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Raw => "raw",
            Namespace::Processed => "processed",
        }
    }

    /// Object key for a message within this namespace, e.g. `raw-<id>.json`.
    pub fn object_key(&self, id: &MessageId) -> String {
        format!("{}-{}.json", self.as_str(), id)
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object store request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("object store returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("object store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum AnalyticalError {
    #[error("analytical sink request failed: {0}")]
    Request(reqwest::Error),
    #[error("analytical sink returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("failed to decode analytical sink response: {0}")]
    Decode(reqwest::Error),
    #[error("analytical sink unavailable: {0}")]
    Unavailable(String),
}

/// One row the analytical sink refused, as reported by the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub index: usize,
    pub reason: String,
    pub location: String,
    pub message: String,
}

/// A row for the analytical sink. `insert_id` lets the sink drop retried
/// duplicates on a best-effort basis, so distinct messages must never share
/// one.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticalRow {
    pub insert_id: String,
    pub json: Value,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `body` under `namespace/key`, replacing any existing object.
    async fn put(&self, namespace: Namespace, key: &str, body: Vec<u8>)
        -> Result<(), StorageError>;
}

#[async_trait]
pub trait AnalyticalSink: Send + Sync {
    /// Insert rows, returning the per-row errors. An empty vector means every
    /// row was accepted. `Err` is reserved for transport failures.
    async fn insert_rows(&self, rows: Vec<AnalyticalRow>) -> Result<Vec<RowError>, AnalyticalError>;
}

/// Writes records to the object store and the analytical sink, bounding
/// each call by `timeout`.
#[derive(Clone)]
pub struct DualSinkWriter {
    objects: Arc<dyn ObjectStore>,
    analytical: Arc<dyn AnalyticalSink>,
    timeout: Duration,
}

impl DualSinkWriter {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        analytical: Arc<dyn AnalyticalSink>,
        timeout: Duration,
    ) -> Self {
        Self {
            objects,
            analytical,
            timeout,
        }
    }

    /// Persist the raw payload under `raw/raw-<id>.json`.
    pub async fn store_raw(&self, raw: &RawRecord) -> Result<(), SinkError> {
        let body = serde_json::to_vec(raw)?;
        let key = Namespace::Raw.object_key(raw.message_id());
        self.timed("store_raw", self.objects.put(Namespace::Raw, &key, body))
            .await?
            .map_err(SinkError::ObjectStore)
    }

    /// Persist the canonical record under `processed/processed-<id>.json`.
    pub async fn store_processed(&self, record: &CanonicalRecord) -> Result<(), SinkError> {
        let body = serde_json::to_vec(record)?;
        let key = Namespace::Processed.object_key(&record.message_id);
        self.timed(
            "store_processed",
            self.objects.put(Namespace::Processed, &key, body),
        )
        .await?
        .map_err(SinkError::ObjectStore)
    }

    /// Insert the canonical record as a single analytical row. `dedup_key`
    /// is the feed's stable id for the delivery and becomes the row's
    /// `insert_id`; without one the message id is used.
    pub async fn insert_analytical(
        &self,
        record: &CanonicalRecord,
        dedup_key: Option<&str>,
    ) -> Result<(), SinkError> {
        let insert_id = match dedup_key.filter(|key| !key.is_empty()) {
            Some(key) => key.to_owned(),
            None => record.message_id.to_string(),
        };
        let row = AnalyticalRow {
            insert_id,
            json: serde_json::to_value(record)?,
        };

        let row_errors = self
            .timed("insert_analytical", self.analytical.insert_rows(vec![row]))
            .await?
            .map_err(SinkError::Analytical)?;

        if row_errors.is_empty() {
            Ok(())
        } else {
            Err(SinkError::RowsRejected(row_errors))
        }
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = T>,
    ) -> Result<T, SinkError> {
        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, call).await;

        let labels = [
            ("operation", operation),
            ("result", if result.is_ok() { "completed" } else { "timeout" }),
        ];
        metrics::histogram!("telemetry_sink_duration_seconds", &labels)
            .record(start.elapsed().as_secs_f64());

        result.map_err(|_| SinkError::Timeout {
            operation,
            timeout: self.timeout,
        })
    }
}
