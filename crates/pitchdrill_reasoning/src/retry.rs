//! Backoff for HTTP calls to the conversation service.
//!
//! Rate limits, request timeouts and 5xx answers are retried. Other client
//! errors come back on the first attempt.

use pitchdrill_core::ServiceCallError;
use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, the first call included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    /// Upper bound for both the computed backoff and any `Retry-After` hint.
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// One attempt and no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before attempt `attempt + 1`, without jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let secs = (self.initial_delay.as_secs_f64() * exp).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }
}

enum Outcome {
    Done(Response),
    Fatal(ServiceCallError),
    Again {
        error: ServiceCallError,
        hint: Option<Duration>,
    },
}

async fn classify(result: Result<Response, reqwest::Error>) -> Outcome {
    let response = match result {
        Ok(r) => r,
        Err(e) => {
            return Outcome::Again {
                error: ServiceCallError::Network(e.to_string()),
                hint: None,
            }
        }
    };

    let status = response.status();
    if status.is_success() {
        return Outcome::Done(response);
    }

    let hint = retry_after(&response);
    let error = ServiceCallError::Http {
        status: status.as_u16(),
        body: response.text().await.unwrap_or_default(),
    };
    let transient = matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT
    ) || status.is_server_error();

    if transient {
        Outcome::Again { error, hint }
    } else {
        Outcome::Fatal(error)
    }
}

/// Seconds form of `Retry-After` only; HTTP dates are ignored.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Run `operation` until it yields a success, a non-transient status, or
/// the attempt budget runs out. The last error is returned.
pub async fn with_retry<F, Fut>(
    config: &RetryConfig,
    provider_name: &str,
    operation: F,
) -> Result<Response, ServiceCallError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<Response, reqwest::Error>>,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let (error, hint) = match classify(operation().await).await {
            Outcome::Done(response) => {
                if attempt > 1 {
                    tracing::info!("{} recovered on attempt {}", provider_name, attempt);
                }
                return Ok(response);
            }
            Outcome::Fatal(error) => return Err(error),
            Outcome::Again { error, hint } => (error, hint),
        };

        if attempt >= attempts {
            tracing::warn!("{} gave up after {} attempt(s): {}", provider_name, attempt, error);
            return Err(error);
        }

        let wait = hint
            .map(|h| h.min(config.max_delay))
            .unwrap_or_else(|| config.backoff(attempt) + jitter());
        tracing::warn!(
            "{} attempt {}/{} failed ({}), retrying in {:.1}s",
            provider_name,
            attempt,
            attempts,
            error,
            wait.as_secs_f64()
        );
        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}

/// Up to a quarter second, taken from the clock's sub-second part.
fn jitter() -> Duration {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    Duration::from_millis(u64::from(nanos % 250))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_factor: 1.0,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.backoff(1), Duration::from_secs(1));
        assert_eq!(cfg.backoff(2), Duration::from_secs(2));
        assert_eq!(cfg.backoff(3), Duration::from_secs(4));
        assert_eq!(cfg.backoff(10), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = server.uri();
        let resp = with_retry(&fast(), "test", || client.get(&url).send())
            .await
            .unwrap();
        assert!(resp.status().is_success());
    }

    #[tokio::test]
    async fn test_rate_limit_hint_is_capped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "60"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        // A 60s hint is clamped to max_delay, so this finishes quickly.
        let client = reqwest::Client::new();
        let url = server.uri();
        let resp = with_retry(&fast(), "test", || client.get(&url).send())
            .await
            .unwrap();
        assert!(resp.status().is_success());
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad"))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = server.uri();
        let err = with_retry(&fast(), "test", || client.get(&url).send())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceCallError::Http { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_exhausted_returns_last_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .expect(3)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = server.uri();
        let err = with_retry(&fast(), "test", || client.get(&url).send())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceCallError::Http { status: 500, ref body } if body == "down"));
    }
}
