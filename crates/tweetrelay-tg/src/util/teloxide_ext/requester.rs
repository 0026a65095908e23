//! Rust analyzer is very slow on processing requester extension here, so extracted
//! it to a separate module to limit the scope of analysis.

use easy_ext::ext;
use teloxide::payloads::SendMessageSetters;
use teloxide::requests::Requester;
use teloxide::types::{LinkPreviewOptions, Message, Recipient, ReplyParameters};

/// There is [`RequesterExt`] in [`teloxide::prelude`]. We name this symbol
/// different to avoid collisions.
#[ext(UtilRequesterExt)]
pub(crate) impl<T: Requester> T {
    /// Reply to the message. Doesn't fail if the original message was deleted.
    fn reply(&self, msg: &Message, text: impl Into<String>) -> Self::SendMessage {
        self.send_message(msg.chat.id, text)
            .reply_parameters(ReplyParameters::new(msg.id).allow_sending_without_reply())
            .link_preview_options(no_link_preview())
    }

    /// Send a plain text message without link previews
    fn send_plain_text(
        &self,
        chat: impl Into<Recipient>,
        text: impl Into<String>,
    ) -> Self::SendMessage {
        self.send_message(chat, text)
            .link_preview_options(no_link_preview())
    }
}

fn no_link_preview() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}
