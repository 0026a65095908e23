use lazy_regex::regex;
use serde::Serialize;
use url::Url;

const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".mov", ".webm"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Media {
    pub kind: MediaKind,
    pub url: Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,

    /// Nitter RSS doesn't expose direct links to videos (they are served as
    /// HLS playlists), only their preview images.
    VideoThumbnail,
}

/// Extracts media references from the HTML body of a feed item preserving
/// the order in which they appear in the document.
pub(crate) fn extract_from_html(html: &str, base: &Url) -> Vec<Media> {
    let src = regex!(r#"<(?:img|video|source)\b[^>]*?\bsrc="([^"]+)""#);

    let mut media: Vec<Media> = Vec::new();

    for captures in src.captures_iter(html) {
        let Some(item) = parse_media_url(&captures[1], base) else {
            continue;
        };
        // `<video>` with a nested `<source>` may reference the same file twice
        if !media.contains(&item) {
            media.push(item);
        }
    }

    media
}

/// Converts a media link from a Nitter page into a link to Twitter's CDN.
///
/// Nitter proxies media via `/pic/{percent-encoded CDN path}`. Photos hosted
/// at `pbs.twimg.com` are rewritten to request the original size.
pub fn parse_media_url(raw: &str, base: &Url) -> Option<Media> {
    let raw = raw.replace("&amp;", "&");
    let url = base.join(&raw).ok()?;

    let url = match url.path().strip_prefix("/pic/") {
        Some(encoded) => unproxy(encoded)?,
        None => url,
    };

    let path = url.path().to_ascii_lowercase();

    if path.ends_with(".m3u8") {
        return None;
    }

    let kind = if VIDEO_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        MediaKind::Video
    } else if path.contains("video_thumb") {
        MediaKind::VideoThumbnail
    } else {
        MediaKind::Photo
    };

    let url = match kind {
        MediaKind::Photo => best_tg_url_for_photo(url),
        MediaKind::Video | MediaKind::VideoThumbnail => url,
    };

    Some(Media { kind, url })
}

fn unproxy(encoded: &str) -> Option<Url> {
    let decoded = urlencoding::decode(encoded).ok()?;
    let decoded = decoded.strip_prefix("orig/").unwrap_or(&decoded);

    if decoded.starts_with("enc/") {
        // Base64-encoded links of instances with HMAC-protected media can't
        // be resolved without the instance's key
        return None;
    }

    let cdn_url = if decoded.starts_with("video.twimg.com/") || decoded.starts_with("pbs.twimg.com/")
    {
        format!("https://{decoded}")
    } else {
        format!("https://pbs.twimg.com/{decoded}")
    };

    Url::parse(&cdn_url).ok()
}

/// See the [Twitter docs] on the photo URL format.
///
/// [Twitter docs]: https://developer.twitter.com/en/docs/twitter-api/v1/data-dictionary/object-model/entities#photo_format
fn best_tg_url_for_photo(mut url: Url) -> Url {
    if url.host_str() != Some("pbs.twimg.com") || url.query_pairs().any(|(key, _)| key == "name") {
        return url;
    }
    url.query_pairs_mut().append_pair("name", "orig");
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::{expect, Expect};

    #[track_caller]
    fn assert_media_url(raw: &str, expected: Expect) {
        let base = Url::parse("https://nitter.net").unwrap();
        let actual = parse_media_url(raw, &base)
            .map(|media| format!("{:?} {}", media.kind, media.url))
            .unwrap_or_else(|| "None".to_owned());
        expected.assert_eq(&actual);
    }

    #[test]
    fn media_urls() {
        assert_media_url(
            "https://nitter.net/pic/media%2FFy7xer1XgAAk9NF.jpg",
            expect!["Photo https://pbs.twimg.com/media/Fy7xer1XgAAk9NF.jpg?name=orig"],
        );
        assert_media_url(
            "/pic/orig/media%2FFy71tLkXgAQEbZF.jpg",
            expect!["Photo https://pbs.twimg.com/media/Fy71tLkXgAQEbZF.jpg?name=orig"],
        );
        assert_media_url(
            "https://nitter.net/pic/video.twimg.com%2Ftweet_video%2FFy7DcfRakAExLkl.mp4",
            expect!["Video https://video.twimg.com/tweet_video/Fy7DcfRakAExLkl.mp4"],
        );
        assert_media_url(
            "https://nitter.net/pic/ext_tw_video_thumb%2F1558883554125176832%2Fpu%2Fimg%2Fabc.jpg",
            expect!["VideoThumbnail https://pbs.twimg.com/ext_tw_video_thumb/1558883554125176832/pu/img/abc.jpg"],
        );
        assert_media_url(
            "https://pbs.twimg.com/media/Fe-jMcGWQAAFWoG.jpg?name=small",
            expect!["Photo https://pbs.twimg.com/media/Fe-jMcGWQAAFWoG.jpg?name=small"],
        );
        assert_media_url(
            "https://nitter.net/video/ABCDEF/https%3A%2F%2Fvideo.twimg.com%2Fpl.m3u8",
            expect!["None"],
        );
        assert_media_url("https://nitter.net/pic/enc/bWVkaWE=", expect!["None"]);
    }

    #[test]
    fn html_extraction_preserves_order() {
        let base = Url::parse("https://nitter.net").unwrap();
        let html = r#"
            <p>Look at this</p>
            <img src="https://nitter.net/pic/media%2FB.jpg" style="max-width:250px;" />
            <video poster="https://nitter.net/pic/tweet_video_thumb%2FC.jpg">
                <source src="https://nitter.net/pic/video.twimg.com%2Ftweet_video%2FC.mp4" type="video/mp4">
            </video>
            <img src="https://nitter.net/pic/media%2FA.jpg" />
            <img src="https://nitter.net/pic/media%2FB.jpg" />
        "#;

        let actual: Vec<_> = extract_from_html(html, &base)
            .into_iter()
            .map(|media| format!("{:?} {}", media.kind, media.url))
            .collect();

        expect![[r#"
            [
                "Photo https://pbs.twimg.com/media/B.jpg?name=orig",
                "Video https://video.twimg.com/tweet_video/C.mp4",
                "Photo https://pbs.twimg.com/media/A.jpg?name=orig",
            ]
        "#]]
        .assert_debug_eq(&actual);
    }
}
