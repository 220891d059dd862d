//! Minimal client for the Pub/Sub REST API: pull, acknowledge and
//! modify-ack-deadline on subscriptions, publish on topics.
use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum PubSubError {
    #[error("invalid pubsub endpoint {endpoint}: {error}")]
    Endpoint {
        endpoint: String,
        error: url::ParseError,
    },
    #[error("{method} request failed: {error}")]
    Request {
        method: &'static str,
        error: reqwest::Error,
    },
    #[error("{method} returned {status}: {body}")]
    Status {
        method: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("message data is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// A message as carried by the REST API. `data` is base64 encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubsubMessage {
    #[serde(default)]
    pub data: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<String>,
}

impl PubsubMessage {
    pub fn from_bytes(payload: &[u8]) -> Self {
        Self {
            data: STANDARD.encode(payload),
            ..Default::default()
        }
    }

    pub fn decode_data(&self) -> Result<Vec<u8>, PubSubError> {
        Ok(STANDARD.decode(&self.data)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message: PubsubMessage,
    /// Only populated when the subscription has a dead letter policy.
    #[serde(default)]
    pub delivery_attempt: Option<i32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: usize,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest<'a> {
    ack_ids: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyAckDeadlineRequest<'a> {
    ack_ids: &'a [String],
    ack_deadline_seconds: u32,
}

#[derive(Serialize)]
struct PublishRequest<'a> {
    messages: &'a [PubsubMessage],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Clone)]
pub struct PubSubClient {
    client: reqwest::Client,
    endpoint: Url,
    project: String,
}

impl PubSubClient {
    pub fn new(client: reqwest::Client, endpoint: &str, project: &str) -> Result<Self, PubSubError> {
        let endpoint = Url::parse(endpoint).map_err(|error| PubSubError::Endpoint {
            endpoint: endpoint.to_owned(),
            error,
        })?;

        Ok(Self {
            client,
            endpoint,
            project: project.to_owned(),
        })
    }

    pub fn subscription_path(&self, subscription: &str) -> String {
        format!("projects/{}/subscriptions/{}", self.project, subscription)
    }

    pub fn topic_path(&self, topic: &str) -> String {
        format!("projects/{}/topics/{}", self.project, topic)
    }

    /// Pull up to `max_messages` from a subscription. An empty vector means
    /// nothing was available.
    pub async fn pull(
        &self,
        subscription: &str,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>, PubSubError> {
        let path = format!("{}:pull", self.subscription_path(subscription));
        let response: PullResponse = self
            .post("pull", &path, &PullRequest { max_messages })
            .await?
            .json()
            .await
            .map_err(|error| PubSubError::Request {
                method: "pull",
                error,
            })?;

        debug!(
            subscription,
            count = response.received_messages.len(),
            "pulled messages"
        );
        Ok(response.received_messages)
    }

    /// Permanently remove the given deliveries from the subscription.
    pub async fn acknowledge(
        &self,
        subscription: &str,
        ack_ids: &[String],
    ) -> Result<(), PubSubError> {
        let path = format!("{}:acknowledge", self.subscription_path(subscription));
        self.post("acknowledge", &path, &AcknowledgeRequest { ack_ids })
            .await?;
        Ok(())
    }

    /// Change the ack deadline of the given deliveries. A deadline of zero
    /// makes them available for redelivery right away, which is how a
    /// delivery is nacked over REST.
    pub async fn modify_ack_deadline(
        &self,
        subscription: &str,
        ack_ids: &[String],
        ack_deadline_seconds: u32,
    ) -> Result<(), PubSubError> {
        let path = format!("{}:modifyAckDeadline", self.subscription_path(subscription));
        self.post(
            "modifyAckDeadline",
            &path,
            &ModifyAckDeadlineRequest {
                ack_ids,
                ack_deadline_seconds,
            },
        )
        .await?;
        Ok(())
    }

    /// Publish messages to a topic, returning the server-assigned ids.
    pub async fn publish(
        &self,
        topic: &str,
        messages: &[PubsubMessage],
    ) -> Result<Vec<String>, PubSubError> {
        let path = format!("{}:publish", self.topic_path(topic));
        let response: PublishResponse = self
            .post("publish", &path, &PublishRequest { messages })
            .await?
            .json()
            .await
            .map_err(|error| PubSubError::Request {
                method: "publish",
                error,
            })?;
        Ok(response.message_ids)
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        method: &'static str,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, PubSubError> {
        let url = self
            .endpoint
            .join(&format!("v1/{path}"))
            .map_err(|error| PubSubError::Endpoint {
                endpoint: self.endpoint.to_string(),
                error,
            })?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|error| PubSubError::Request { method, error })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(PubSubError::Status {
            method,
            status,
            body,
        })
    }
}
