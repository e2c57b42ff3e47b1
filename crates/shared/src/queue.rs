//! Queue transport over SQS.
//!
//! The pipeline runs on four logical queues with at-least-once delivery.
//! Ownership of a received message passes to the consumer via its receipt
//! handle for the duration of the visibility timeout; a message that is not
//! deleted in time reappears for redelivery.

use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_sdk_sqs::Client;
use thiserror::Error;
use tracing::error;

/// Deadline applied to every queue round-trip, on top of the long-poll wait.
const OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Seconds a received message stays hidden from other consumers.
const VISIBILITY_TIMEOUT_SECS: i32 = 60;

/// SQS caps ReceiveMessage wait time at 20 seconds.
pub const MAX_WATCH_DELAY_SECS: i32 = 20;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("could not resolve url for queue {0}")]
    UnknownQueue(String),

    #[error("queue send failed: {0}")]
    Send(String),

    #[error("queue receive failed: {0}")]
    Receive(String),

    #[error("queue delete failed: {0}")]
    Delete(String),

    #[error("queue operation timed out")]
    Deadline,
}

/// A message received from a queue, paired with the receipt handle required
/// to delete it.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub body: String,
    pub receipt_handle: String,
}

/// Thin client over the SQS API shared by the front and the worker.
#[derive(Clone)]
pub struct QueueClient {
    inner: Client,
}

impl QueueClient {
    /// Builds a client from the ambient AWS environment. A custom endpoint is
    /// only set for local runs; cloud runs resolve the default endpoint.
    pub async fn connect(endpoint: Option<&str>) -> Self {
        let base = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let mut builder = aws_sdk_sqs::config::Builder::from(&base);
        if let Some(endpoint) = endpoint.filter(|e| !e.is_empty()) {
            builder = builder.endpoint_url(endpoint);
        }
        Self {
            inner: Client::from_conf(builder.build()),
        }
    }

    /// Resolves a queue name to its url. Called once per queue at startup.
    pub async fn queue_url(&self, name: &str) -> Result<String, QueueError> {
        let result = tokio::time::timeout(
            OPERATION_TIMEOUT,
            self.inner.get_queue_url().queue_name(name).send(),
        )
        .await
        .map_err(|_| QueueError::Deadline)?
        .map_err(|e| {
            error!(queue = name, error = %e, "Failed to resolve queue url");
            QueueError::UnknownQueue(name.to_string())
        })?;

        result
            .queue_url()
            .map(str::to_string)
            .ok_or_else(|| QueueError::UnknownQueue(name.to_string()))
    }

    pub async fn send(&self, queue_url: &str, body: &str) -> Result<(), QueueError> {
        tokio::time::timeout(
            OPERATION_TIMEOUT,
            self.inner
                .send_message()
                .queue_url(queue_url)
                .message_body(body)
                .send(),
        )
        .await
        .map_err(|_| QueueError::Deadline)?
        .map_err(|e| QueueError::Send(e.to_string()))?;
        Ok(())
    }

    /// Receives at most one message, long-polling up to `wait_seconds`.
    /// Returns `None` when the queue is empty at the end of the wait.
    pub async fn receive_one(
        &self,
        queue_url: &str,
        wait_seconds: i32,
    ) -> Result<Option<QueueMessage>, QueueError> {
        let wait = wait_seconds.clamp(0, MAX_WATCH_DELAY_SECS);
        let result = tokio::time::timeout(
            OPERATION_TIMEOUT + Duration::from_secs(wait as u64),
            self.inner
                .receive_message()
                .queue_url(queue_url)
                .max_number_of_messages(1)
                .visibility_timeout(VISIBILITY_TIMEOUT_SECS)
                .wait_time_seconds(wait)
                .send(),
        )
        .await
        .map_err(|_| QueueError::Deadline)?
        .map_err(|e| QueueError::Receive(e.to_string()))?;

        let message = result.messages().first().and_then(|m| {
            match (m.body(), m.receipt_handle()) {
                (Some(body), Some(receipt_handle)) => Some(QueueMessage {
                    body: body.to_string(),
                    receipt_handle: receipt_handle.to_string(),
                }),
                _ => None,
            }
        });
        Ok(message)
    }

    pub async fn delete(&self, queue_url: &str, receipt_handle: &str) -> Result<(), QueueError> {
        tokio::time::timeout(
            OPERATION_TIMEOUT,
            self.inner
                .delete_message()
                .queue_url(queue_url)
                .receipt_handle(receipt_handle)
                .send(),
        )
        .await
        .map_err(|_| QueueError::Deadline)?
        .map_err(|e| QueueError::Delete(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_delay_is_clamped_to_sqs_limit() {
        assert_eq!(45_i32.clamp(0, MAX_WATCH_DELAY_SECS), 20);
        assert_eq!((-1_i32).clamp(0, MAX_WATCH_DELAY_SECS), 0);
        assert_eq!(10_i32.clamp(0, MAX_WATCH_DELAY_SECS), 10);
    }
}
