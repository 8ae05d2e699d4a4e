//! Progress delivery to an HTTP endpoint with exponential-backoff retry.
//!
//! [`WebhookReporter`] POSTs each [`ProgressEvent`] as JSON to a fixed
//! URL. Failed attempts are retried up to three times with exponential
//! backoff (1 s, 2 s, 4 s); a final failure is logged and dropped so a
//! flaky dashboard never stalls the render run.

use std::time::Duration;

use async_trait::async_trait;

use crate::bus::ProgressEvent;
use crate::reporter::ProgressReporter;

/// Retry delays in seconds (exponential backoff: 1s, 2s, 4s).
const RETRY_DELAYS_SECS: [u64; 3] = [1, 2, 4];

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

// ---------------------------------------------------------------------------
// WebhookReporter
// ---------------------------------------------------------------------------

pub struct WebhookReporter {
    client: reqwest::Client,
    url: String,
    retry_delays: Vec<Duration>,
}

impl WebhookReporter {
    /// Build a reporter for `url` with a pre-configured HTTP client.
    pub fn new(url: impl Into<String>) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            retry_delays: RETRY_DELAYS_SECS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        })
    }

    /// Override the backoff schedule.
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver one event, retrying with backoff.
    pub async fn deliver(&self, event: &ProgressEvent) -> Result<(), WebhookError> {
        let mut last_err: Option<WebhookError> = None;

        for (attempt, delay) in self.retry_delays.iter().enumerate() {
            match self.try_send(event).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        url = %self.url,
                        error = %e,
                        "Progress webhook attempt failed, retrying"
                    );
                    last_err = Some(e);
                    tokio::time::sleep(*delay).await;
                }
            }
        }

        // Final attempt after the last backoff.
        match self.try_send(event).await {
            Ok(()) => Ok(()),
            Err(e) => Err(last_err.unwrap_or(e)),
        }
    }

    async fn try_send(&self, event: &ProgressEvent) -> Result<(), WebhookError> {
        let response = self.client.post(&self.url).json(event).send().await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProgressReporter for WebhookReporter {
    async fn report(&self, event: ProgressEvent) {
        if let Err(e) = self.deliver(&event).await {
            tracing::error!(url = %self.url, error = %e, "Progress webhook delivery failed after all retries");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_does_not_panic() {
        let reporter = WebhookReporter::new("http://localhost:9/progress").expect("client");
        assert_eq!(reporter.url(), "http://localhost:9/progress");
    }

    #[test]
    fn webhook_error_display_http_status() {
        let err = WebhookError::HttpStatus(502);
        assert_eq!(err.to_string(), "Webhook returned HTTP 502");
    }

    #[test]
    fn webhook_error_display_request() {
        let req_err = reqwest::Client::new().get("://bad").build().unwrap_err();
        let err = WebhookError::Request(req_err);
        assert!(err.to_string().contains("HTTP request failed"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_without_panicking() {
        // Port 9 (discard) is closed on CI hosts; no retries keeps it fast.
        let reporter = WebhookReporter::new("http://127.0.0.1:9/progress")
            .expect("client")
            .with_retry_delays(Vec::new());
        let event = ProgressEvent {
            completed: 1,
            total: 2,
            fraction: 0.5,
        };
        assert!(reporter.deliver(&event).await.is_err());
        // The trait entry point swallows the error.
        reporter.report(event).await;
    }
}
