//! Parsing of the RSS feed that Nitter renders for `/{username}/rss`.
use crate::media::{self, Media};
use crate::{Error, Result, Tweet, TweetId};
use chrono::prelude::*;
use lazy_regex::regex_captures;
use serde::Deserialize;
use url::Url;

#[derive(Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Deserialize)]
struct Item {
    #[serde(default)]
    title: String,

    #[serde(rename = "dc:creator", alias = "creator", default)]
    creator: Option<String>,

    /// HTML body of the tweet
    #[serde(default)]
    description: String,

    #[serde(rename = "pubDate")]
    pub_date: String,

    link: String,
}

/// Tweets from a single feed, in the order the feed lists them.
#[derive(Debug, Default)]
pub struct Timeline {
    pub tweets: Vec<Tweet>,

    /// Descriptions of feed items that couldn't be interpreted as tweets
    pub skipped: Vec<String>,
}

pub(crate) fn parse_timeline(xml: &str, username: &str, base: &Url) -> Result<Timeline> {
    let rss: Rss = quick_xml::de::from_str(xml).map_err(|source| Error::Parse { source })?;

    let mut timeline = Timeline::default();

    for item in rss.channel.items {
        match parse_item(item, username, base) {
            Ok(tweet) => timeline.tweets.push(tweet),
            Err(reason) => timeline.skipped.push(reason),
        }
    }

    Ok(timeline)
}

fn parse_item(item: Item, username: &str, base: &Url) -> Result<Tweet, String> {
    let Some((_, id)) = regex_captures!(r"/status/(\d+)", &item.link) else {
        return Err(format!("no status id in the link `{}`", item.link));
    };

    let id: u64 = id
        .parse()
        .map_err(|err| format!("invalid status id `{id}`: {err}"))?;

    let created_at = DateTime::parse_from_rfc2822(&item.pub_date)
        .map_err(|err| format!("invalid pubDate `{}`: {err}", item.pub_date))?
        .with_timezone(&Utc);

    let username = item
        .creator
        .as_deref()
        .map(|creator| creator.trim().trim_start_matches('@'))
        .filter(|creator| !creator.is_empty())
        .unwrap_or(username)
        .to_owned();

    let media: Vec<Media> = media::extract_from_html(&item.description, base);

    let id = TweetId::from_raw(id);
    let url = crate::tweet_url(&username, id);

    Ok(Tweet {
        id,
        url,
        username,
        text: item.title.trim().to_owned(),
        media,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;

    const FIXTURE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss xmlns:atom="http://www.w3.org/2005/Atom" xmlns:dc="http://purl.org/dc/elements/1.1/" version="2.0">
  <channel>
    <atom:link href="https://nitter.net/Sethisto/rss" rel="self" type="application/rss+xml" />
    <title>Sethisto / @Sethisto</title>
    <link>https://nitter.net/Sethisto</link>
    <description>Twitter feed for: @Sethisto. Generated by nitter.net</description>
    <language>en-us</language>
    <ttl>40</ttl>
    <item>
      <title>Two pictures &amp; a caption</title>
      <dc:creator>@Sethisto</dc:creator>
      <description><![CDATA[<p>Two pictures &amp; a caption</p><img src="https://nitter.net/pic/media%2FFy71tLkXgAQEbZF.jpg" style="max-width:250px;" /><img src="https://nitter.net/pic/media%2FFy71tkDX0AIonwY.jpg" style="max-width:250px;" />]]></description>
      <pubDate>Mon, 19 Jun 2023 08:01:02 GMT</pubDate>
      <guid>https://nitter.net/Sethisto/status/1670542719461072898#m</guid>
      <link>https://nitter.net/Sethisto/status/1670542719461072898#m</link>
    </item>
    <item>
      <title>RT by @Sethisto: plain text</title>
      <dc:creator>@BlazyPazy</dc:creator>
      <description><![CDATA[<p>plain text</p>]]></description>
      <pubDate>Sun, 18 Jun 2023 20:00:00 GMT</pubDate>
      <guid>https://nitter.net/BlazyPazy/status/1670487415113515008#m</guid>
      <link>https://nitter.net/BlazyPazy/status/1670487415113515008#m</link>
    </item>
    <item>
      <title>broken</title>
      <dc:creator>@Sethisto</dc:creator>
      <description></description>
      <pubDate>Sun, 18 Jun 2023 20:00:00 GMT</pubDate>
      <guid>https://nitter.net/Sethisto</guid>
      <link>https://nitter.net/Sethisto</link>
    </item>
  </channel>
</rss>
"#;

    #[test]
    fn parse_fixture() {
        let base = Url::parse("https://nitter.net").unwrap();
        let timeline = parse_timeline(FIXTURE, "sethisto", &base).unwrap();

        let actual = serde_json::to_string_pretty(&timeline.tweets).unwrap();

        expect![[r#"
            [
              {
                "id": "1670542719461072898",
                "username": "Sethisto",
                "text": "Two pictures & a caption",
                "media": [
                  {
                    "kind": "photo",
                    "url": "https://pbs.twimg.com/media/Fy71tLkXgAQEbZF.jpg?name=orig"
                  },
                  {
                    "kind": "photo",
                    "url": "https://pbs.twimg.com/media/Fy71tkDX0AIonwY.jpg?name=orig"
                  }
                ],
                "created_at": "2023-06-19T08:01:02Z",
                "url": "https://x.com/Sethisto/status/1670542719461072898"
              },
              {
                "id": "1670487415113515008",
                "username": "BlazyPazy",
                "text": "RT by @Sethisto: plain text",
                "media": [],
                "created_at": "2023-06-18T20:00:00Z",
                "url": "https://x.com/BlazyPazy/status/1670487415113515008"
              }
            ]"#]]
        .assert_eq(&actual);

        expect![[r#"
            [
                "no status id in the link `https://nitter.net/Sethisto`",
            ]
        "#]]
        .assert_debug_eq(&timeline.skipped);
    }

    #[test]
    fn html_instead_of_rss() {
        let base = Url::parse("https://nitter.net").unwrap();
        let err = parse_timeline(
            "<!DOCTYPE html><html><body>Instance has been rate limited.</body></html>",
            "sethisto",
            &base,
        )
        .unwrap_err();

        assert!(matches!(err, Error::Parse { .. }), "{err:?}");
    }
}
