use std::time;

use telemetry_common::config::ClientBuildError;
use telemetry_common::pubsub::PubSubError;
use thiserror::Error;

use crate::message_id::WordListError;
use crate::sinks::{AnalyticalError, RowError, StorageError};

/// Why an inbound payload could not be turned into a `RawRecord`.
#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is a JSON {0}, expected an object")]
    NotAnObject(&'static str),
}

/// Failure of one `DualSinkWriter` operation.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error(transparent)]
    ObjectStore(StorageError),
    #[error(transparent)]
    Analytical(AnalyticalError),
    #[error("analytical sink rejected {} row(s): {}", .0.len(), describe_rows(.0))]
    RowsRejected(Vec<RowError>),
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: time::Duration,
    },
    #[error("failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn describe_rows(rows: &[RowError]) -> String {
    rows.iter()
        .map(|row| format!("#{} {}: {}", row.index, row.reason, row.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why a pipeline run did not finish cleanly. The controller turns each of
/// these into an ack or nack decision.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("unparseable payload: {0}")]
    Payload(#[from] PayloadError),
    #[error("raw write failed: {0}")]
    RawWrite(SinkError),
    #[error("processed write failed: {0}")]
    ProcessedWrite(SinkError),
    #[error("analytical insert failed: {0}")]
    AnalyticalInsert(SinkError),
}

/// Fatal errors from the worker loop.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("worker semaphore has been closed")]
    SemaphoreClosed(#[from] tokio::sync::AcquireError),
}

/// Errors that stop the process before it starts consuming.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] envconfig::Error),
    #[error("failed to load word list: {0}")]
    WordList(#[from] WordListError),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
    #[error("failed to build http client: {0}")]
    Client(#[from] ClientBuildError),
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("failed to set up feed client: {0}")]
    Feed(#[from] PubSubError),
    #[error("failed to bind {address}: {error}")]
    Bind {
        address: String,
        error: std::io::Error,
    },
    #[error(transparent)]
    Worker(#[from] WorkerError),
}
