//! Text that accompanies the relayed posts in the channel.
use crate::fetch::Post;

/// Builds the caption of the relayed post
pub(crate) type CaptionFn = fn(&Post) -> String;

pub(crate) fn without_links(post: &Post) -> String {
    let header = format!("🧵 New tweet from @{}", post.author);
    let text = post.text.trim();

    if text.is_empty() {
        return header;
    }

    format!("{header}:\n\n{text}")
}

/// Same as [`without_links`], but also references the post on Twitter
pub(crate) fn with_link(post: &Post) -> String {
    format!("{}\n\n{}", without_links(post), post.url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tests::post;
    use expect_test::expect;

    #[test]
    fn captions() {
        let mut post = post(1558884492190035968);
        post.text = "  Fresh art by the artist  ".to_owned();

        expect![[r#"
            🧵 New tweet from @alice:

            Fresh art by the artist"#]]
        .assert_eq(&without_links(&post));

        expect![[r#"
            🧵 New tweet from @alice:

            Fresh art by the artist

            https://x.com/alice/status/1558884492190035968"#]]
        .assert_eq(&with_link(&post));
    }

    #[test]
    fn caption_of_a_post_without_text() {
        let mut post = post(1);
        post.text = String::new();

        assert_eq!(without_links(&post), "🧵 New tweet from @alice");
        assert_eq!(
            with_link(&post),
            "🧵 New tweet from @alice\n\nhttps://x.com/alice/status/1"
        );
    }
}
