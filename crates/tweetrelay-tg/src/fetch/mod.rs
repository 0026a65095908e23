//! Retrieval of the recent posts of the watched accounts.
mod nitter;

pub(crate) use nitter::NitterFetcher;

use crate::store::Handle;
use async_trait::async_trait;
use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use std::time::Duration;
use url::Url;

pub(crate) use twitter_scraper::{Media, MediaKind};

/// Used when the source rate-limits us without saying for how long
const DEFAULT_BACKOFF: Duration = Duration::from_secs(5 * 60);

#[derive(Deserialize)]
pub(crate) struct Config {
    #[serde(default = "default_nitter_url")]
    nitter_url: Url,

    /// Limit for a single HTTP request attempt
    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,
}

fn default_nitter_url() -> Url {
    Url::parse("https://nitter.net").expect("BUG: the default Nitter URL must be valid")
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// ID of a post on Twitter. It is a snowflake, so newer posts have greater IDs.
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
pub(crate) struct PostId(#[serde_as(as = "DisplayFromStr")] u64);

impl PostId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<twitter_scraper::TweetId> for PostId {
    fn from(id: twitter_scraper::TweetId) -> Self {
        Self::from_raw(id.to_raw())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Post {
    pub(crate) id: PostId,

    /// Handle of the author without the `@`. Differs from the watched
    /// account for retweets.
    pub(crate) author: String,

    pub(crate) text: String,

    /// Media in the order they are displayed in the post
    pub(crate) media: Vec<Media>,

    pub(crate) created_at: DateTime<Utc>,

    pub(crate) url: Url,
}

impl From<twitter_scraper::Tweet> for Post {
    fn from(tweet: twitter_scraper::Tweet) -> Self {
        Self {
            id: tweet.id.into(),
            author: tweet.username,
            text: tweet.text,
            media: tweet.media,
            created_at: tweet.created_at,
            url: tweet.url,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum FetchError {
    #[error("Account {handle} doesn't exist")]
    NotFound { handle: Handle },

    #[error("Failed to fetch the posts of {handle}")]
    Retryable {
        handle: Handle,
        source: twitter_scraper::Error,
    },

    #[error("Fetching the posts of {handle} is rate-limited, retry after {retry_after:.0?}")]
    Backoff {
        handle: Handle,
        retry_after: Duration,
    },
}

impl FetchError {
    fn from_scraper(handle: &Handle, err: twitter_scraper::Error) -> Self {
        let handle = handle.clone();
        match err {
            twitter_scraper::Error::NotFound { .. } => Self::NotFound { handle },
            twitter_scraper::Error::RateLimited { retry_after } => Self::Backoff {
                handle,
                retry_after: retry_after.unwrap_or(DEFAULT_BACKOFF),
            },
            source => Self::Retryable { handle, source },
        }
    }
}

/// Source of the posts. It doesn't assume any particular way of retrieving
/// them, so that the relay can be tested with an in-memory implementation.
#[async_trait]
pub(crate) trait Fetch: Send + Sync {
    /// Returns the posts with IDs greater than `since` (or all recent posts if
    /// `since` is `None`) ordered from the oldest to the newest.
    async fn fetch_recent_posts(
        &self,
        handle: &Handle,
        since: Option<PostId>,
    ) -> Result<Vec<Post>, FetchError>;
}

/// Orders the posts from the oldest to the newest, drops the duplicates and
/// everything at or below `since`.
pub(crate) fn select_new_posts(
    posts: impl IntoIterator<Item = Post>,
    since: Option<PostId>,
) -> Vec<Post> {
    let mut posts: Vec<_> = posts
        .into_iter()
        .filter(|post| since.map_or(true, |since| post.id > since))
        .collect();

    posts.sort_by_key(|post| post.id);
    posts.dedup_by_key(|post| post.id);
    posts
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn post(id: u64) -> Post {
        post_by("alice", id)
    }

    pub(crate) fn post_by(author: &str, id: u64) -> Post {
        Post {
            id: PostId::from_raw(id),
            author: author.to_owned(),
            text: format!("post {id}"),
            media: vec![],
            created_at: Utc.timestamp_opt(1_700_000_000 + id as i64, 0).unwrap(),
            url: format!("https://x.com/{author}/status/{id}").parse().unwrap(),
        }
    }

    fn ids(posts: &[Post]) -> Vec<u64> {
        posts.iter().map(|post| post.id.0).collect()
    }

    #[test]
    fn selects_posts_after_the_cursor() {
        let feed = [5, 3, 4, 1, 2].map(post);

        assert_eq!(ids(&select_new_posts(feed.clone(), None)), [1, 2, 3, 4, 5]);
        assert_eq!(
            ids(&select_new_posts(feed.clone(), Some(PostId::from_raw(3)))),
            [4, 5]
        );
        assert!(select_new_posts(feed, Some(PostId::from_raw(5))).is_empty());
    }

    #[test]
    fn drops_duplicates() {
        // Pinned posts appear twice in the feed
        let feed = [3, 2, 3, 1].map(post);
        assert_eq!(ids(&select_new_posts(feed, None)), [1, 2, 3]);
    }

    #[test]
    fn rate_limit_without_retry_after() {
        let handle: Handle = "alice".parse().unwrap();
        let err = FetchError::from_scraper(
            &handle,
            twitter_scraper::Error::RateLimited { retry_after: None },
        );
        assert!(
            matches!(err, FetchError::Backoff { retry_after, .. } if retry_after == DEFAULT_BACKOFF),
            "{err:?}"
        );

        let err = FetchError::from_scraper(
            &handle,
            twitter_scraper::Error::NotFound {
                username: "alice".to_owned(),
            },
        );
        assert_eq!(err.to_string(), "Account @alice doesn't exist");
    }
}
