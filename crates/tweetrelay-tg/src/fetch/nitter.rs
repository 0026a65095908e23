use super::{select_new_posts, Config, Fetch, FetchError, Post, PostId};
use crate::error::ErrorKind;
use crate::prelude::*;
use crate::store::Handle;
use crate::util::DynError;
use crate::{err, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Reads the posts from the RSS feeds of a Nitter instance
pub(crate) struct NitterFetcher {
    client: twitter_scraper::Client,
}

impl NitterFetcher {
    pub(crate) fn new(config: Config) -> Result<Self> {
        let http = crate::http::create_client(Duration::from_secs(config.request_timeout_secs));

        let client = twitter_scraper::Client::new(http, config.nitter_url.clone()).map_err(|err| {
            let source: Box<DynError> = Box::new(err);
            err!(ErrorKind::Fatal {
                message: "TWITTER_NITTER_URL is invalid".to_owned(),
                source: Some(source),
            })
        })?;

        info!(nitter_url = %config.nitter_url, "Using Nitter to fetch the posts");

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for NitterFetcher {
    #[instrument(skip_all, fields(%handle, since = since.map(tracing::field::display)))]
    async fn fetch_recent_posts(
        &self,
        handle: &Handle,
        since: Option<PostId>,
    ) -> Result<Vec<Post>, FetchError> {
        let timeline = self
            .client
            .get_timeline(handle.as_str())
            .with_duration_log("Fetch the timeline")
            .await
            .map_err(|err| FetchError::from_scraper(handle, err))?;

        for reason in &timeline.skipped {
            warn!(%reason, "Skipped an item of the feed");
        }

        let total = timeline.tweets.len();
        let posts = select_new_posts(timeline.tweets.into_iter().map(Post::from), since);

        debug!(total, new = posts.len(), "Fetched the timeline");

        Ok(posts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nitter_url_without_scheme_is_rejected() {
        let config = Config {
            nitter_url: "nitter.local:8080".parse().unwrap(),
            request_timeout_secs: 30,
        };

        let err = NitterFetcher::new(config).err().unwrap();

        assert!(!err.is_user_error());
        assert_eq!(err.kind().to_string(), "FATAL: TWITTER_NITTER_URL is invalid");
    }
}
