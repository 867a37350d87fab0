use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::submission::QueuedSubmission;

/// An unbounded hang on one submission would stall the sequential drain of
/// every session queued behind it, so the HTTP transport always carries an
/// explicit request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub session_id: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server rejected submission: {0}")]
    Rejected(String),
}

/// Delivery seam between the queue and the submission endpoint. The
/// scheduler only cares about settled-ok versus settled-err; a non-success
/// server response and a network failure are both an `Err` here and both
/// feed the same retry path.
#[async_trait]
pub trait SubmissionTransport: Send + Sync {
    async fn deliver(
        &self,
        submission: &QueuedSubmission,
    ) -> Result<DeliveryReceipt, TransportError>;
}

/// Production transport: POSTs the submission body to the API.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    user_id: i64,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, user_id: i64) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            user_id,
        })
    }
}

#[async_trait]
impl SubmissionTransport for HttpTransport {
    async fn deliver(
        &self,
        submission: &QueuedSubmission,
    ) -> Result<DeliveryReceipt, TransportError> {
        let url = format!(
            "{}/api/v1/sessions/{}/submit",
            self.base_url.trim_end_matches('/'),
            submission.session_id
        );

        let body = json!({
            "answers": submission.answers,
            "timing_data": submission.timing_data,
        });

        let response = self
            .client
            .post(&url)
            .header("x-user-id", self.user_id)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::Rejected(format!("{}: {}", status, detail)));
        }

        let parsed: serde_json::Value = response.json().await?;
        if parsed.get("success").and_then(serde_json::Value::as_bool) != Some(true) {
            let detail = parsed
                .get("error")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("server reported failure");
            return Err(TransportError::Rejected(detail.to_string()));
        }

        Ok(DeliveryReceipt {
            session_id: submission.session_id,
        })
    }
}
