//! Client for reading the recent posts of Twitter/X accounts.
//!
//! Twitter doesn't provide a free API for reading timelines, so we scrape
//! the RSS feeds rendered by a [Nitter](https://github.com/zedeus/nitter)
//! instance instead.
mod error;
mod media;
mod rss;

pub use error::*;
pub use media::{parse_media_url, Media, MediaKind};
pub use rss::Timeline;

use chrono::prelude::*;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use std::time::Duration;
use url::Url;

/// Max number of bytes of an error response body to keep in the error message
const MAX_ERROR_BODY_LEN: usize = 1024;

/// Twitter's snowflake ID. It grows monotonically with the creation time.
#[serde_as]
#[derive(
    derive_more::Display,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct TweetId(#[serde_as(as = "DisplayFromStr")] u64);

impl TweetId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn to_raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Tweet {
    pub id: TweetId,

    /// Handle of the author without the leading `@`. For retweets this is
    /// the author of the original tweet.
    pub username: String,

    pub text: String,

    /// Media attached to the tweet in the order they are displayed
    pub media: Vec<Media>,

    pub created_at: DateTime<Utc>,

    /// Link to the tweet on `x.com`
    pub url: Url,
}

pub struct Client {
    http: reqwest_middleware::ClientWithMiddleware,
    base_url: Url,
}

impl Client {
    /// `base_url` is the root of the Nitter instance, e.g. `https://nitter.net`
    pub fn new(http: reqwest_middleware::ClientWithMiddleware, base_url: Url) -> Result<Self> {
        // `localhost:8080` is a valid URL with the `localhost` scheme
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(Error::InvalidBaseUrl { url: base_url });
        }

        Ok(Self { http, base_url })
    }

    /// Fetches the recent tweets of the given user. The order of the tweets
    /// is the same as in the feed, which is newest first for Nitter.
    pub async fn get_timeline(&self, username: &str) -> Result<Timeline> {
        let username = username.trim_start_matches('@');

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidBaseUrl {
                url: self.base_url.clone(),
            })?
            .pop_if_empty()
            .extend([username, "rss"]);

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|source| Error::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound {
                username: username.to_owned(),
            });
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse().ok())
                .map(Duration::from_secs);

            return Err(Error::RateLimited { retry_after });
        }

        let body = response.text().await.map_err(|source| Error::ReadBody {
            url: url.clone(),
            source,
        })?;

        if !status.is_success() {
            let mut body = body;
            if body.len() > MAX_ERROR_BODY_LEN {
                let end = (0..=MAX_ERROR_BODY_LEN)
                    .rev()
                    .find(|&i| body.is_char_boundary(i))
                    .unwrap_or(0);
                body.truncate(end);
            }
            return Err(Error::BadStatus { url, status, body });
        }

        rss::parse_timeline(&body, username, &self.base_url)
    }
}

pub(crate) fn tweet_url(username: &str, id: TweetId) -> Url {
    let mut url = Url::parse("https://x.com").expect("BUG: static URL must be valid");

    // Pushing segments instead of formatting the string lets the url
    // library do the escaping for us
    url.path_segments_mut()
        .expect("BUG: x.com URL can be a base")
        .extend([username, "status", &id.to_string()]);

    url
}
