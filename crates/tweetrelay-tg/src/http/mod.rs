use crate::prelude::*;
use async_trait::async_trait;
use reqwest_middleware::RequestBuilder;
use reqwest_retry::policies::{ExponentialBackoff, ExponentialBackoffTimed};
use reqwest_retry::{
    default_on_request_failure, default_on_request_success, RetryTransientMiddleware, Retryable,
    RetryableStrategy,
};
use std::time::{Duration, Instant};

pub(crate) type Client = reqwest_middleware::ClientWithMiddleware;

pub(crate) fn default_retry_policy() -> ExponentialBackoffTimed {
    // Retry exponentially increasing intervals between attempts.
    ExponentialBackoff::builder()
        .base(2)
        .retry_bounds(Duration::from_millis(500), Duration::from_secs(5))
        .build_with_total_retry_duration(Duration::from_secs(20))
}

/// `timeout` limits a single attempt. Retries of transient failures are
/// additionally bounded by [`default_retry_policy`].
pub(crate) fn create_client(timeout: Duration) -> Client {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .expect("BUG: failed to create an HTTP client");

    reqwest_middleware::ClientBuilder::new(client)
        .with(OutermostObservingMiddleware)
        .with(RetryTransientMiddleware::new_with_policy_and_strategy(
            default_retry_policy(),
            RetryUnlessRateLimited,
        ))
        .with(InnermostObservingMiddleware)
        .with_init(|request_builder: RequestBuilder| {
            request_builder.header(
                // Some Nitter instances reject requests with no user agent
                "User-Agent",
                concat!("TweetRelayTelegramBot/", env!("CARGO_PKG_VERSION")),
            )
        })
        .build()
}

/// Same as the default strategy, except that `429 Too Many Requests` is
/// returned to the caller right away. Retrying it only prolongs the rate
/// limit, and the caller knows better how long to back off from `Retry-After`.
struct RetryUnlessRateLimited;

impl RetryableStrategy for RetryUnlessRateLimited {
    fn handle(&self, res: &reqwest_middleware::Result<reqwest::Response>) -> Option<Retryable> {
        match res {
            Ok(response) if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                Some(Retryable::Fatal)
            }
            Ok(response) => default_on_request_success(response),
            Err(err) => default_on_request_failure(err),
        }
    }
}

struct OutermostObservingMiddleware;

#[async_trait]
impl reqwest_middleware::Middleware for OutermostObservingMiddleware {
    async fn handle(
        &self,
        request: reqwest::Request,
        extensions: &mut http::Extensions,
        next: reqwest_middleware::Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        let span = info_span!(
            "request",
            method = %request.method(),
            url = %request.url(),
        );

        let host = request.url().host_str().unwrap_or("{unknown}").to_owned();
        let method = request.method().to_string();

        async {
            let start = Instant::now();
            let result = next.run(request, extensions).await;
            let elapsed = start.elapsed();

            let status = match &result {
                Ok(response) => response.status().as_u16().to_string(),
                Err(_) => "{fatal}".to_owned(),
            };

            metrics::histogram!(
                "http_request_duration_seconds",
                "method" => method,
                "host" => host,
                "status" => status,
            )
            .record(elapsed);

            result
        }
        .instrument(span)
        .await
    }
}

struct InnermostObservingMiddleware;

#[async_trait]
impl reqwest_middleware::Middleware for InnermostObservingMiddleware {
    async fn handle(
        &self,
        request: reqwest::Request,
        extensions: &mut http::Extensions,
        next: reqwest_middleware::Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        let start = Instant::now();
        let result = next.run(request, extensions).await;
        let duration = tracing_duration(start.elapsed());

        let response = match &result {
            Ok(response) => response,
            Err(err) => {
                warn!(duration, err = tracing_err(err), "Network request failed");
                return result;
            }
        };

        let status = response.status();

        let Err(err) = response.error_for_status_ref() else {
            debug!(duration, %status, "Network request succeeded");
            return result;
        };

        warn!(
            err = tracing_err(&err),
            duration,
            %status,
            "Network request failed (error status)"
        );

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16) -> reqwest_middleware::Result<reqwest::Response> {
        let response = http::Response::builder()
            .status(status)
            .body("")
            .unwrap();

        Ok(response.into())
    }

    #[test]
    fn rate_limits_are_not_retried() {
        let strategy = RetryUnlessRateLimited;

        assert!(matches!(
            strategy.handle(&response(429)),
            Some(Retryable::Fatal)
        ));
        assert!(matches!(
            strategy.handle(&response(503)),
            Some(Retryable::Transient)
        ));
        assert!(strategy.handle(&response(200)).is_none());
    }
}
