//! Sending the posts to the Telegram channel.
use crate::fetch::{Media, MediaKind, Post};
use crate::prelude::*;
use crate::store::Channel;
use crate::{tg, Result};
use async_trait::async_trait;
use itertools::Itertools;
use teloxide::prelude::*;
use teloxide::types::{InputFile, InputMedia, InputMediaPhoto, InputMediaVideo, Recipient};
use url::Url;

/// Telegram's limit for the text of a message
const MAX_TEXT_LEN: usize = 4096;

/// Telegram's limit for the caption of a photo or a video
const MAX_CAPTION_LEN: usize = 1024;

/// Telegram's limit for the number of items in a media group
const MAX_MEDIA_GROUP_LEN: usize = 10;

/// Destination of the relayed posts
#[async_trait]
pub(crate) trait Deliver: Send + Sync {
    /// Resolves only when the whole post was accepted by the destination
    async fn deliver(&self, channel: &Channel, post: &Post, caption: String) -> Result;
}

/// A single Bot API call needed to deliver a post
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outgoing {
    Text(String),
    Photo { url: Url, caption: Option<String> },
    Video { url: Url, caption: Option<String> },
    Group(Vec<GroupItem>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GroupItem {
    pub(crate) media: Media,
    pub(crate) caption: Option<String>,
}

/// Splits the post into the messages that fit into Telegram's limits
pub(crate) fn plan(post: &Post, caption: String) -> Vec<Outgoing> {
    if post.media.is_empty() {
        return vec![Outgoing::Text(caption.truncate_chars(MAX_TEXT_LEN))];
    }

    let mut outgoing = vec![];

    let mut caption = if caption.chars().count() > MAX_CAPTION_LEN {
        outgoing.push(Outgoing::Text(caption.truncate_chars(MAX_TEXT_LEN)));
        None
    } else {
        Some(caption)
    };

    for chunk in &post.media.iter().chunks(MAX_MEDIA_GROUP_LEN) {
        let mut chunk: Vec<_> = chunk.cloned().collect();

        // Media group must contain at least two items
        if chunk.len() == 1 {
            let Media { kind, url } = chunk.remove(0);
            let caption = caption.take();
            outgoing.push(match kind {
                MediaKind::Video => Outgoing::Video { url, caption },
                MediaKind::Photo | MediaKind::VideoThumbnail => Outgoing::Photo { url, caption },
            });
            continue;
        }

        let items = chunk
            .into_iter()
            .map(|media| GroupItem {
                media,
                caption: caption.take(),
            })
            .collect();

        outgoing.push(Outgoing::Group(items));
    }

    outgoing
}

/// Delivers the posts via the Telegram Bot API
pub(crate) struct TgDelivery {
    bot: tg::Bot,
}

impl TgDelivery {
    pub(crate) fn new(bot: tg::Bot) -> Self {
        Self { bot }
    }

    async fn send(&self, chat: Recipient, outgoing: Outgoing) -> Result<(), teloxide::RequestError> {
        match outgoing {
            Outgoing::Text(text) => {
                self.bot.send_plain_text(chat, text).await?;
            }
            Outgoing::Photo { url, caption } => {
                let request = self.bot.send_photo(chat, InputFile::url(url));
                match caption {
                    Some(caption) => request.caption(caption).await?,
                    None => request.await?,
                };
            }
            Outgoing::Video { url, caption } => {
                let request = self.bot.send_video(chat, InputFile::url(url));
                match caption {
                    Some(caption) => request.caption(caption).await?,
                    None => request.await?,
                };
            }
            Outgoing::Group(items) => {
                let media = items.into_iter().map(GroupItem::into_input_media);
                self.bot.send_media_group(chat, media).await?;
            }
        }
        Ok(())
    }
}

impl GroupItem {
    fn into_input_media(self) -> InputMedia {
        let file = InputFile::url(self.media.url);
        match self.media.kind {
            MediaKind::Video => {
                let video = InputMediaVideo::new(file);
                InputMedia::Video(match self.caption {
                    Some(caption) => video.caption(caption),
                    None => video,
                })
            }
            MediaKind::Photo | MediaKind::VideoThumbnail => {
                let photo = InputMediaPhoto::new(file);
                InputMedia::Photo(match self.caption {
                    Some(caption) => photo.caption(caption),
                    None => photo,
                })
            }
        }
    }
}

impl Outgoing {
    fn media_urls(&self) -> Vec<&Url> {
        match self {
            Self::Text(_) => vec![],
            Self::Photo { url, .. } | Self::Video { url, .. } => vec![url],
            Self::Group(items) => items.iter().map(|item| &item.media.url).collect(),
        }
    }

    fn caption(&self) -> Option<&str> {
        match self {
            Self::Text(_) => None,
            Self::Photo { caption, .. } | Self::Video { caption, .. } => caption.as_deref(),
            Self::Group(items) => items.iter().find_map(|item| item.caption.as_deref()),
        }
    }

    /// Text message with the links to the media instead of the media itself.
    /// Used when Telegram refuses to download the media by URL.
    fn into_text_fallback(self) -> Option<Self> {
        let urls = self.media_urls();
        if urls.is_empty() {
            return None;
        }

        let links = urls.iter().join("\n");
        let text = match self.caption() {
            Some(caption) => format!("{caption}\n\n{links}"),
            None => links,
        };

        Some(Self::Text(text.truncate_chars(MAX_TEXT_LEN)))
    }
}

#[async_trait]
impl Deliver for TgDelivery {
    #[instrument(skip_all, fields(%channel, post = %post.id))]
    async fn deliver(&self, channel: &Channel, post: &Post, caption: String) -> Result {
        let chat = Recipient::from(channel.clone());

        for outgoing in plan(post, caption) {
            let err = match self.send(chat.clone(), outgoing.clone()).await {
                Ok(()) => continue,
                Err(err) => err,
            };

            // Media can't be delivered by URL if it's too big or the host
            // refuses Telegram's downloader, so at least relay the links.
            let teloxide::RequestError::Api(api_err) = &err else {
                return Err(err.into());
            };

            let Some(fallback) = outgoing.into_text_fallback() else {
                return Err(err.into());
            };

            warn!(
                err = tracing_err(api_err),
                "Telegram rejected the media, sending links instead"
            );

            self.send(chat.clone(), fallback).await?;
        }

        Ok(())
    }
}
