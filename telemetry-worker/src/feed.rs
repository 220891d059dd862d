//! Inbound message feed: pull deliveries, then ack or nack each one.
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use telemetry_common::pubsub::{PubSubClient, PubSubError};
use thiserror::Error;
use tracing::{error, warn};

use crate::sinks::memory::{JournalEvent, SinkJournal};

#[derive(Error, Debug)]
pub enum FeedError {
    #[error(transparent)]
    PubSub(#[from] PubSubError),
    #[error("unknown ack id {0}")]
    UnknownAckId(String),
}

/// One delivery of a message. The same message may be delivered again
/// under a different `ack_id` after a nack or an expired deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub ack_id: String,
    /// The feed's id for the message, stable across redeliveries.
    pub message_id: Option<String>,
    pub payload: Vec<u8>,
    pub attempt: Option<i32>,
}

#[async_trait]
pub trait Subscription: Send + Sync {
    /// Up to `max` deliveries. Empty when nothing is available.
    async fn pull(&self, max: usize) -> Result<Vec<Delivery>, FeedError>;

    /// Remove the delivery from the feed for good.
    async fn ack(&self, ack_id: &str) -> Result<(), FeedError>;

    /// Make the delivery eligible for redelivery.
    async fn nack(&self, ack_id: &str) -> Result<(), FeedError>;
}

pub struct PubSubSubscription {
    client: PubSubClient,
    subscription: String,
}

impl PubSubSubscription {
    pub fn new(client: PubSubClient, subscription: &str) -> Self {
        Self {
            client,
            subscription: subscription.to_owned(),
        }
    }
}

#[async_trait]
impl Subscription for PubSubSubscription {
    async fn pull(&self, max: usize) -> Result<Vec<Delivery>, FeedError> {
        let received = self.client.pull(&self.subscription, max).await?;

        let mut deliveries = Vec::with_capacity(received.len());
        let mut undecodable = Vec::new();
        for message in received {
            match message.message.decode_data() {
                Ok(payload) => deliveries.push(Delivery {
                    ack_id: message.ack_id,
                    message_id: Some(message.message.message_id).filter(|id| !id.is_empty()),
                    payload,
                    attempt: message.delivery_attempt,
                }),
                Err(error) => {
                    warn!(
                        feed_message_id = %message.message.message_id,
                        %error,
                        "nacking message with undecodable data"
                    );
                    undecodable.push(message.ack_id);
                }
            }
        }

        if !undecodable.is_empty() {
            metrics::counter!("telemetry_feed_undecodable_total")
                .increment(undecodable.len() as u64);
            // The decoded deliveries are still returned. Unsettled messages
            // come back once their ack deadline lapses.
            if let Err(error) = self
                .client
                .modify_ack_deadline(&self.subscription, &undecodable, 0)
                .await
            {
                metrics::counter!("telemetry_feed_settle_errors_total", "decision" => "nack")
                    .increment(undecodable.len() as u64);
                error!(
                    count = undecodable.len(),
                    %error,
                    "failed to nack undecodable messages"
                );
            }
        }

        Ok(deliveries)
    }

    async fn ack(&self, ack_id: &str) -> Result<(), FeedError> {
        self.client
            .acknowledge(&self.subscription, &[ack_id.to_owned()])
            .await?;
        Ok(())
    }

    async fn nack(&self, ack_id: &str) -> Result<(), FeedError> {
        self.client
            .modify_ack_deadline(&self.subscription, &[ack_id.to_owned()], 0)
            .await?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryFeed {
    queue: VecDeque<Delivery>,
    outstanding: HashMap<String, Delivery>,
    nacked: Vec<Delivery>,
    acked: Vec<Delivery>,
    next_ack: u64,
}

/// An in-process feed. Nacked deliveries are held back until
/// `redeliver_nacked` puts them back on the queue.
#[derive(Default)]
pub struct MemorySubscription {
    feed: Mutex<MemoryFeed>,
    journal: Option<SinkJournal>,
}

impl MemorySubscription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: SinkJournal) -> Self {
        Self {
            journal: Some(journal),
            ..Default::default()
        }
    }

    /// Enqueue a message with the given feed message id.
    pub fn publish(&self, message_id: &str, payload: impl Into<Vec<u8>>) {
        let mut feed = self.lock();
        let ack_id = next_ack_id(&mut feed);
        feed.queue.push_back(Delivery {
            ack_id,
            message_id: Some(message_id.to_owned()),
            payload: payload.into(),
            attempt: Some(1),
        });
    }

    /// Queue every nacked delivery again, under a new ack id.
    pub fn redeliver_nacked(&self) -> usize {
        let mut feed = self.lock();
        let nacked = std::mem::take(&mut feed.nacked);
        let count = nacked.len();
        for delivery in nacked {
            let ack_id = next_ack_id(&mut feed);
            feed.queue.push_back(Delivery {
                ack_id,
                attempt: delivery.attempt.map(|attempt| attempt + 1),
                ..delivery
            });
        }
        count
    }

    pub fn acked(&self) -> Vec<Delivery> {
        self.lock().acked.clone()
    }

    pub fn nacked(&self) -> Vec<Delivery> {
        self.lock().nacked.clone()
    }

    /// Deliveries pulled but neither acked nor nacked.
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding.len()
    }

    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryFeed> {
        self.feed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, ack_id: &str, event: JournalEvent) -> Result<Delivery, FeedError> {
        let delivery = self
            .lock()
            .outstanding
            .remove(ack_id)
            .ok_or_else(|| FeedError::UnknownAckId(ack_id.to_owned()))?;
        if let Some(journal) = &self.journal {
            journal.record(event);
        }
        Ok(delivery)
    }
}

fn next_ack_id(feed: &mut MemoryFeed) -> String {
    feed.next_ack += 1;
    format!("ack-{}", feed.next_ack)
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn pull(&self, max: usize) -> Result<Vec<Delivery>, FeedError> {
        let mut feed = self.lock();
        let count = max.min(feed.queue.len());
        let deliveries: Vec<Delivery> = feed.queue.drain(..count).collect();
        for delivery in &deliveries {
            feed.outstanding
                .insert(delivery.ack_id.clone(), delivery.clone());
        }
        Ok(deliveries)
    }

    async fn ack(&self, ack_id: &str) -> Result<(), FeedError> {
        let delivery = self.settle(ack_id, JournalEvent::Ack(ack_id.to_owned()))?;
        self.lock().acked.push(delivery);
        Ok(())
    }

    async fn nack(&self, ack_id: &str) -> Result<(), FeedError> {
        let delivery = self.settle(ack_id, JournalEvent::Nack(ack_id.to_owned()))?;
        self.lock().nacked.push(delivery);
        Ok(())
    }
}
