//! TopicPublisherInvoker -- notification-task invoker.
//!
//! Reads `TopicArn`, `Message` and optional `Subject` from the task input
//! and POSTs `{message_id, topic, subject, message}` to the webhook
//! configured for that topic (or the route's fallback endpoint). The task
//! result is `{"MessageId": "<uuid>"}`.

use std::collections::BTreeMap;

use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

use waypoint_core::workflow::invoker::{InvocationError, TaskInvoker};

use super::RESOURCE_HEADER;

/// Body POSTed to a topic webhook.
#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    message_id: Uuid,
    topic: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<&'a str>,
    message: String,
}

/// Publishes notification messages to per-topic webhooks.
pub struct TopicPublisherInvoker {
    client: reqwest::Client,
    topics: BTreeMap<String, String>,
    fallback: Option<String>,
}

impl TopicPublisherInvoker {
    pub fn new(topics: BTreeMap<String, String>, fallback: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), topics, fallback)
    }

    pub fn with_client(
        client: reqwest::Client,
        topics: BTreeMap<String, String>,
        fallback: Option<String>,
    ) -> Self {
        Self {
            client,
            topics,
            fallback,
        }
    }

    fn webhook_for(&self, topic: &str) -> Option<&str> {
        self.topics
            .get(topic)
            .or(self.fallback.as_ref())
            .map(String::as_str)
    }
}

impl TaskInvoker for TopicPublisherInvoker {
    fn name(&self) -> &str {
        "topic_webhook"
    }

    async fn invoke(&self, resource: &str, input: &Value) -> Result<Value, InvocationError> {
        let rejected = |reason: String| InvocationError::Rejected {
            resource: resource.to_string(),
            reason,
        };

        let topic = input
            .get("TopicArn")
            .and_then(Value::as_str)
            .ok_or_else(|| rejected("input requires a string 'TopicArn'".to_string()))?;
        let message = match input.get("Message") {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => {
                return Err(rejected("input requires a 'Message'".to_string()));
            }
            Some(other) => other.to_string(),
        };
        let subject = input.get("Subject").and_then(Value::as_str);
        let webhook = self
            .webhook_for(topic)
            .ok_or_else(|| rejected(format!("no webhook configured for topic '{topic}'")))?;

        let request = PublishRequest {
            message_id: Uuid::now_v7(),
            topic,
            subject,
            message,
        };

        tracing::debug!(
            resource,
            topic,
            message_id = %request.message_id,
            "publishing notification"
        );

        let response = self
            .client
            .post(webhook)
            .header(RESOURCE_HEADER, resource)
            .json(&request)
            .send()
            .await
            .map_err(|e| InvocationError::Transport {
                resource: resource.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = format!("HTTP {status}: {body}");
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => InvocationError::Throttled {
                    resource: resource.to_string(),
                    reason,
                },
                s if s.is_server_error() => InvocationError::Transport {
                    resource: resource.to_string(),
                    reason,
                },
                _ => rejected(reason),
            });
        }

        Ok(json!({ "MessageId": request.message_id.to_string() }))
    }
}
