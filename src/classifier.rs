//! Remote spam classifier client and response parsing.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ClassifierConfig;
use crate::error::{Result, ShieldError};
use crate::metrics;
use crate::models::{Verdict, VerdictSource};

const UNKNOWN_RESULT: &str = "Unknown result";

/// A classifier that decides whether message content is spam
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpamClassifier: Send + Sync {
    /// Classify `content` sent by `sender`. Transport failures are returned
    /// as [`ShieldError::Transport`]; unexpected response shapes never fail.
    async fn classify(&self, content: &str, sender: &str) -> Result<Verdict>;
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    sender: &'a str,
}

#[derive(Debug, Deserialize)]
struct NestedResult {
    is_spam: bool,
    message: Option<String>,
}

/// The response shapes the classifier is known to produce
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClassifierResponse {
    Flat {
        is_spam: bool,
        message: Option<String>,
    },
    Nested {
        result: NestedResult,
        message: Option<String>,
    },
    Text {
        result: String,
        message: Option<String>,
    },
}

/// Turn a raw response body into a verdict.
///
/// Accepts `{is_spam, message}`, `{result: {is_spam, message}}` and
/// `{result: "<text>"}`. Anything else is scanned for the substring "spam".
#[must_use]
pub fn parse_response(raw: &str) -> Verdict {
    let parsed = serde_json::from_str::<ClassifierResponse>(raw);

    let (is_spam, explanation) = match parsed {
        Ok(ClassifierResponse::Flat { is_spam, message }) => {
            (is_spam, message.unwrap_or_else(|| UNKNOWN_RESULT.to_string()))
        },
        Ok(ClassifierResponse::Nested { result, message }) => (
            result.is_spam,
            message
                .or(result.message)
                .unwrap_or_else(|| UNKNOWN_RESULT.to_string()),
        ),
        Ok(ClassifierResponse::Text { result, message }) => {
            let result = result.to_lowercase();
            let is_spam = result.contains("spam");
            (
                is_spam,
                message.unwrap_or_else(|| format!("Message classified as: {result}")),
            )
        },
        Err(e) => {
            let err = ShieldError::Parse(e.to_string());
            debug!(error = %err, response = raw, "Unexpected classifier response, scanning raw text");
            metrics::record_error(err.kind(), "classify");
            (raw.to_lowercase().contains("spam"), UNKNOWN_RESULT.to_string())
        },
    };

    Verdict {
        is_spam,
        explanation,
        source: VerdictSource::Remote,
    }
}

/// HTTP client for the remote classifier.
///
/// Each request is retried up to `max_retries` times on transport failure,
/// with the per-request timeout growing by `backoff_multiplier` each time.
#[derive(Debug, Clone)]
pub struct RemoteClassifier {
    client: Client,
    url: String,
    timeout: Duration,
    max_retries: u32,
    backoff_multiplier: f64,
}

impl RemoteClassifier {
    /// Build a client from configuration
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("sms-shield/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            backoff_multiplier: config.backoff_multiplier,
        })
    }

    /// Endpoint this client posts to
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Timeout of the given attempt. Falls back to the base timeout when the
    /// scaled value is not a representable duration.
    fn timeout_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        Duration::try_from_secs_f64(self.timeout.as_secs_f64() * factor).unwrap_or(self.timeout)
    }

    async fn post_once(&self, request: &ClassifyRequest<'_>, timeout: Duration) -> Result<String> {
        let response = self
            .client
            .post(&self.url)
            .timeout(timeout)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ShieldError::Transport(format!("classifier returned {status}")));
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl SpamClassifier for RemoteClassifier {
    async fn classify(&self, content: &str, sender: &str) -> Result<Verdict> {
        let request = ClassifyRequest {
            message: content,
            sender,
        };

        let mut last_error = ShieldError::Transport("no attempt made".into());
        for attempt in 0..=self.max_retries {
            let timeout = self.timeout_for_attempt(attempt);
            let started = Instant::now();

            match self.post_once(&request, timeout).await {
                Ok(body) => {
                    metrics::record_classifier_request(started.elapsed(), true);
                    debug!(attempt, response = %body, "Classifier responded");
                    return Ok(parse_response(&body));
                },
                Err(e) => {
                    metrics::record_classifier_request(started.elapsed(), false);
                    warn!(attempt, timeout = ?timeout, error = %e, "Classifier request failed");
                    last_error = e;
                },
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_grows_per_attempt() {
        let classifier = RemoteClassifier::new(&ClassifierConfig::default()).unwrap();
        assert_eq!(classifier.timeout_for_attempt(0), Duration::from_secs(15));
        assert_eq!(classifier.timeout_for_attempt(1), Duration::from_millis(22_500));
    }

    #[test]
    fn unrepresentable_timeout_keeps_base() {
        let classifier = RemoteClassifier::new(&ClassifierConfig {
            backoff_multiplier: f64::NAN,
            ..ClassifierConfig::default()
        })
        .unwrap();
        assert_eq!(classifier.timeout_for_attempt(1), Duration::from_secs(15));

        let classifier = RemoteClassifier::new(&ClassifierConfig {
            backoff_multiplier: 1e300,
            ..ClassifierConfig::default()
        })
        .unwrap();
        assert_eq!(classifier.timeout_for_attempt(u32::MAX), Duration::from_secs(15));
    }

    #[test]
    fn request_omits_empty_sender() {
        let body = serde_json::to_string(&ClassifyRequest {
            message: "hi",
            sender: "",
        })
        .unwrap();
        assert_eq!(body, r#"{"message":"hi"}"#);
    }
}
