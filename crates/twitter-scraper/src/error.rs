use std::time::Duration;
use url::Url;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("`{url}` can't be used as a Nitter instance URL, expected an absolute http(s) URL")]
    InvalidBaseUrl { url: Url },

    #[error("Account @{username} was not found")]
    NotFound { username: String },

    #[error("The Nitter instance rate-limited us (retry after: {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("HTTP request to {url} failed")]
    Request {
        url: Url,
        source: reqwest_middleware::Error,
    },

    #[error("Failed to read HTTP response body from {url}")]
    ReadBody { url: Url, source: reqwest::Error },

    #[error("HTTP request to {url} has failed (HTTP status code: {status}):\n{body}")]
    BadStatus {
        url: Url,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Failed to parse the RSS timeline")]
    Parse { source: quick_xml::DeError },
}
