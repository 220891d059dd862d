//! The per-delivery ingestion state machine.
//!
//! ```text
//! Received -> Tagged -> RawPersisted -> Normalized -> Validated -> ProcessedPersisted -> Inserted
//!                                                 \-> Incomplete (acknowledged, nothing else written)
//! ```
//!
//! A run that cannot parse its payload, or cannot write the raw or processed
//! object, is rejected so the feed redelivers it. Earlier writes are never
//! undone. An analytical insert failure is governed by
//! `AnalyticalFailurePolicy`.
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{PayloadError, PipelineError};
use crate::message_id::{MessageId, MessageIdGenerator};
use crate::normalize::normalize;
use crate::record::{CriticalField, RawRecord};
use crate::sinks::DualSinkWriter;
use crate::time::TimeSource;
use crate::validate::missing_fields;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Tagged,
    RawPersisted,
    Normalized,
    Validated,
    Incomplete,
    ProcessedPersisted,
    Inserted,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Tagged => "tagged",
            Stage::RawPersisted => "raw_persisted",
            Stage::Normalized => "normalized",
            Stage::Validated => "validated",
            Stage::Incomplete => "incomplete",
            Stage::ProcessedPersisted => "processed_persisted",
            Stage::Inserted => "inserted",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with a delivery whose analytical insert failed after its raw
/// and processed objects were written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalyticalFailurePolicy {
    /// Log, count and acknowledge. The analytical row stays missing.
    #[default]
    Acknowledge,
    /// Nack so the feed redelivers and the whole run is retried.
    Reject,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseAnalyticalFailurePolicyError(pub String);

impl fmt::Display for ParseAnalyticalFailurePolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is not a valid analytical failure policy", self.0)
    }
}

impl FromStr for AnalyticalFailurePolicy {
    type Err = ParseAnalyticalFailurePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "acknowledge" | "ack" => Ok(AnalyticalFailurePolicy::Acknowledge),
            "reject" | "nack" => Ok(AnalyticalFailurePolicy::Reject),
            invalid => Err(ParseAnalyticalFailurePolicyError(invalid.to_owned())),
        }
    }
}

/// What the feed should do with the delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Ack,
    Nack,
}

/// The terminal state of one pipeline run.
#[derive(Debug)]
pub enum Outcome {
    /// Every write that was attempted is done. `analytical_error` is set when
    /// the insert failed and the policy acknowledged anyway.
    Acknowledged {
        message_id: MessageId,
        analytical_error: Option<PipelineError>,
    },
    /// The record lacked critical fields. Only the raw object was written.
    SkippedIncomplete {
        message_id: MessageId,
        missing: Vec<CriticalField>,
    },
    /// The run stopped after `stage` and the delivery must be redelivered.
    Rejected {
        message_id: MessageId,
        stage: Stage,
        error: PipelineError,
    },
}

impl Outcome {
    pub fn decision(&self) -> Decision {
        match self {
            Outcome::Acknowledged { .. } | Outcome::SkippedIncomplete { .. } => Decision::Ack,
            Outcome::Rejected { .. } => Decision::Nack,
        }
    }

    pub fn message_id(&self) -> &MessageId {
        match self {
            Outcome::Acknowledged { message_id, .. }
            | Outcome::SkippedIncomplete { message_id, .. }
            | Outcome::Rejected { message_id, .. } => message_id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Acknowledged { .. } => "acknowledged",
            Outcome::SkippedIncomplete { .. } => "skipped_incomplete",
            Outcome::Rejected { .. } => "rejected",
        }
    }
}

/// Decode a payload into the JSON object it must be.
pub fn parse_payload(payload: &[u8]) -> Result<Map<String, Value>, PayloadError> {
    let text = std::str::from_utf8(payload)?;
    match serde_json::from_str::<Value>(text)? {
        Value::Object(fields) => Ok(fields),
        Value::Null => Err(PayloadError::NotAnObject("null")),
        Value::Bool(_) => Err(PayloadError::NotAnObject("boolean")),
        Value::Number(_) => Err(PayloadError::NotAnObject("number")),
        Value::String(_) => Err(PayloadError::NotAnObject("string")),
        Value::Array(_) => Err(PayloadError::NotAnObject("array")),
    }
}

/// Runs deliveries through id assignment, persistence, normalization and
/// validation. Shared by every concurrent run; holds no per-run state.
#[derive(Clone)]
pub struct IngestionPipeline {
    ids: MessageIdGenerator,
    writer: DualSinkWriter,
    clock: Arc<dyn TimeSource + Send + Sync>,
    analytical_failure_policy: AnalyticalFailurePolicy,
}

impl IngestionPipeline {
    pub fn new(
        ids: MessageIdGenerator,
        writer: DualSinkWriter,
        clock: Arc<dyn TimeSource + Send + Sync>,
        analytical_failure_policy: AnalyticalFailurePolicy,
    ) -> Self {
        Self {
            ids,
            writer,
            clock,
            analytical_failure_policy,
        }
    }

    /// Process one delivery. `delivery_key` is the feed's stable id for the
    /// delivery, used to derive the message id when configured to.
    pub async fn process(&self, payload: &[u8], delivery_key: Option<&str>) -> Outcome {
        let start = Instant::now();
        metrics::counter!("telemetry_messages_received_total").increment(1);

        let outcome = self.run(payload, delivery_key).await;
        report(&outcome);

        metrics::histogram!("telemetry_pipeline_duration_seconds", "outcome" => outcome.label())
            .record(start.elapsed().as_secs_f64());
        outcome
    }

    async fn run(&self, payload: &[u8], delivery_key: Option<&str>) -> Outcome {
        let message_id = self.ids.generate(delivery_key);
        transition(&message_id, Stage::Received, Stage::Tagged);

        let fields = match parse_payload(payload) {
            Ok(fields) => fields,
            Err(error) => {
                return Outcome::Rejected {
                    message_id,
                    stage: Stage::Tagged,
                    error: error.into(),
                }
            }
        };

        let raw = RawRecord::new(fields, message_id.clone());
        if let Err(error) = self.writer.store_raw(&raw).await {
            return Outcome::Rejected {
                message_id,
                stage: Stage::Tagged,
                error: PipelineError::RawWrite(error),
            };
        }
        transition(&message_id, Stage::Tagged, Stage::RawPersisted);

        let record = normalize(&raw, self.clock.current_time());
        transition(&message_id, Stage::RawPersisted, Stage::Normalized);

        let missing = missing_fields(&record);
        if !missing.is_empty() {
            transition(&message_id, Stage::Normalized, Stage::Incomplete);
            return Outcome::SkippedIncomplete {
                message_id,
                missing,
            };
        }
        transition(&message_id, Stage::Normalized, Stage::Validated);

        if let Err(error) = self.writer.store_processed(&record).await {
            return Outcome::Rejected {
                message_id,
                stage: Stage::Validated,
                error: PipelineError::ProcessedWrite(error),
            };
        }
        transition(&message_id, Stage::Validated, Stage::ProcessedPersisted);

        match self.writer.insert_analytical(&record, delivery_key).await {
            Ok(()) => {
                transition(&message_id, Stage::ProcessedPersisted, Stage::Inserted);
                Outcome::Acknowledged {
                    message_id,
                    analytical_error: None,
                }
            }
            Err(error) => {
                metrics::counter!("telemetry_analytical_failures_total").increment(1);
                let error = PipelineError::AnalyticalInsert(error);
                match self.analytical_failure_policy {
                    AnalyticalFailurePolicy::Acknowledge => Outcome::Acknowledged {
                        message_id,
                        analytical_error: Some(error),
                    },
                    AnalyticalFailurePolicy::Reject => Outcome::Rejected {
                        message_id,
                        stage: Stage::ProcessedPersisted,
                        error,
                    },
                }
            }
        }
    }
}

fn transition(message_id: &MessageId, from: Stage, to: Stage) {
    debug!(%message_id, %from, %to, "pipeline transition");
}

fn report(outcome: &Outcome) {
    metrics::counter!("telemetry_pipeline_outcomes_total", "outcome" => outcome.label())
        .increment(1);

    match outcome {
        Outcome::Acknowledged {
            message_id,
            analytical_error: None,
        } => info!(%message_id, "message acknowledged"),
        Outcome::Acknowledged {
            message_id,
            analytical_error: Some(error),
        } => warn!(%message_id, %error, "analytical insert failed, acknowledging anyway"),
        Outcome::SkippedIncomplete {
            message_id,
            missing,
        } => {
            let missing: Vec<&str> = missing.iter().map(CriticalField::as_str).collect();
            info!(%message_id, ?missing, "incomplete record skipped");
        }
        Outcome::Rejected {
            message_id,
            stage,
            error,
        } => {
            metrics::counter!("telemetry_pipeline_rejections_total", "stage" => stage.as_str())
                .increment(1);
            error!(%message_id, %stage, %error, "message rejected");
        }
    }
}
