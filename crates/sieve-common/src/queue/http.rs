//! HTTP-fronted queue adapter for local development.
//!
//! Talks to a small queue-fronting service with three endpoints:
//!
//! - `POST {url}/queue` — enqueue one envelope, returns `{queued: true}`.
//! - `POST {url}/queue/poll` with `{"max": N}` — returns
//!   `{"messages": [{"receipt": ..., "envelope": {type, data}}]}`.
//! - `POST {url}/queue/ack` / `POST {url}/queue/nack` with
//!   `{"receipt": ...}`.
//!
//! Durability is whatever the fronting service provides; this adapter only
//! carries the contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::envelope::EventEnvelope;

use super::{QueueAdapter, QueueError, QueueMessage, Receipt};

#[derive(Debug, Serialize)]
struct PollRequest {
    max: usize,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    #[serde(default)]
    messages: Vec<WireMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    receipt: String,
    envelope: EventEnvelope,
}

#[derive(Debug, Serialize)]
struct ReceiptRequest<'a> {
    receipt: &'a str,
}

/// Queue adapter backed by an HTTP queue-fronting service.
pub struct HttpQueue {
    http: reqwest::Client,
    base_url: String,
}

impl HttpQueue {
    pub fn new(base_url: &str) -> Result<Self, QueueError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_checked<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, QueueError> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(QueueError::Unavailable(format!(
                "{path} returned {status}"
            )))
        }
    }
}

#[async_trait]
impl QueueAdapter for HttpQueue {
    async fn push_envelope(&self, envelope: &EventEnvelope) -> Result<(), QueueError> {
        self.post_checked("/queue", envelope).await?;
        Ok(())
    }

    async fn poll(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let response = self
            .post_checked("/queue/poll", &PollRequest { max })
            .await?;
        let body: PollResponse = response.json().await?;
        Ok(body
            .messages
            .into_iter()
            .map(|m| QueueMessage {
                receipt: Receipt(m.receipt),
                envelope: m.envelope,
            })
            .collect())
    }

    async fn ack(&self, receipt: &Receipt) -> Result<(), QueueError> {
        self.post_checked("/queue/ack", &ReceiptRequest { receipt: &receipt.0 })
            .await?;
        Ok(())
    }

    async fn nack(&self, receipt: &Receipt) -> Result<(), QueueError> {
        self.post_checked("/queue/nack", &ReceiptRequest { receipt: &receipt.0 })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Run;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_push_posts_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/queue"))
            .and(body_partial_json(json!({"type": "run"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"queued": true})))
            .expect(1)
            .mount(&server)
            .await;

        let queue = HttpQueue::new(&server.uri()).unwrap();
        queue
            .push_run(&Run::new("p", json!(null), None))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_poll_decodes_messages() {
        let server = MockServer::start().await;
        let run = Run::new("p", json!(null), None);
        Mock::given(method("POST"))
            .and(path("/queue/poll"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{
                    "receipt": "m-1",
                    "envelope": {"type": "run", "data": serde_json::to_value(&run).unwrap()}
                }]
            })))
            .mount(&server)
            .await;

        let queue = HttpQueue::new(&server.uri()).unwrap();
        let batch = queue.poll(10).await.unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].receipt, Receipt("m-1".to_string()));
    }

    #[tokio::test]
    async fn test_push_failure_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let queue = HttpQueue::new(&server.uri()).unwrap();
        let result = queue.push_run(&Run::new("p", json!(null), None)).await;
        assert!(matches!(result, Err(QueueError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_ack_posts_receipt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/queue/ack"))
            .and(body_partial_json(json!({"receipt": "m-7"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let queue = HttpQueue::new(&server.uri()).unwrap();
        queue.ack(&Receipt("m-7".to_string())).await.unwrap();
    }
}
