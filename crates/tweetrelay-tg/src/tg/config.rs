use serde::Deserialize;
use std::fmt;
use teloxide::types::UserId;

#[derive(Deserialize, Clone)]
pub(crate) struct Config {
    pub(crate) bot_token: BotToken,

    /// ID of the user, who owns the bot, and thus is the only one allowed
    /// to control it
    pub(crate) bot_owner: UserId,
}

/// Token of the Telegram bot. It must never appear in the logs.
#[derive(Deserialize, Clone)]
#[serde(transparent)]
pub(crate) struct BotToken(String);

impl BotToken {
    pub(crate) fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BotToken(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_redacted() {
        let token = BotToken("123456:secret".to_owned());
        assert_eq!(format!("{token:?}"), "BotToken(<redacted>)");
        assert_eq!(token.expose_secret(), "123456:secret");
    }
}
