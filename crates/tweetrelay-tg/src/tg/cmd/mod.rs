pub(crate) mod relay;

use crate::prelude::*;
use crate::util::DynResult;
use crate::{tg, Error, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::User;
use teloxide::utils::command::BotCommands;

/// Errors in the syntax of the commands sent by the owner
#[derive(Debug, thiserror::Error)]
pub(crate) enum CommandError {
    #[error("Missing argument. Usage: {usage}")]
    MissingArgument { usage: &'static str },

    #[error("Unknown command `{command}`")]
    Unknown { command: String },
}

#[async_trait]
pub(crate) trait Command: fmt::Debug + Send + Sync + 'static {
    async fn handle(self, ctx: &tg::Ctx, msg: &Message) -> Result;
}

pub(crate) fn handle<'a, C: Command>(
) -> impl Fn(Arc<tg::Ctx>, Message, C) -> BoxFuture<'a, DynResult> {
    move |ctx, msg, cmd| {
        let info = info_span!(
            "handle_message",
            sender = msg.from.as_ref().map(User::debug_id).as_deref(),
            msg_text = msg.text(),
            chat = %msg.chat.debug_id(),
            cmd = format_args!("{cmd:?}")
        );

        let fut = async move {
            debug!("Processing command");

            let result = cmd.handle(&ctx, &msg).await;
            if let Err(err) = &result {
                reply_error(&ctx, &msg, err).await;
            }
            result.map_err(Into::into)
        };

        Box::pin(fut.instrument(info))
    }
}

async fn reply_error(ctx: &tg::Ctx, msg: &Message, err: &Error) {
    let span = warn_span!("err", err = tracing_err(err), id = err.id());
    async {
        let reply_msg = if err.is_user_error() {
            info!("Command was rejected");
            format!("❌ {}", err.kind())
        } else {
            warn!("Command handler returned an error");
            format!(
                "⚠️ Something went wrong. Error ID: {}\n\nSee the logs for details",
                err.id()
            )
        };

        if let Err(err) = ctx.bot.reply(msg, reply_msg).await {
            warn!(
                err = tracing_err(&err),
                "Failed to reply with the error message to the user"
            );
        }
    }
    .instrument(span)
    .await;
}

/// Only the owner of the bot may control it. Everyone else is ignored.
pub(crate) fn filter_owner(ctx: Arc<tg::Ctx>, msg: Message) -> bool {
    let Some(user) = &msg.from else {
        debug!(chat = %msg.chat.debug_id(), "Ignoring a message without a sender");
        return false;
    };

    let is_owner = user.id == ctx.cfg.bot_owner;

    if !is_owner {
        info!(
            user = %user.debug_id(),
            chat = %msg.chat.debug_id(),
            msg_text = msg.text(),
            "Ignoring a message from a user who isn't the owner"
        );
    }

    is_owner
}

/// Messages that look like commands, but didn't match any known ones
pub(crate) fn filter_unknown_command(msg: Message) -> Option<UnknownCommand> {
    let text = msg.text()?.trim_start();
    if !text.starts_with('/') {
        return None;
    }

    let command = text.split_whitespace().next()?.to_owned();
    Some(UnknownCommand(command))
}

#[derive(Debug, Clone)]
pub(crate) struct UnknownCommand(String);

#[async_trait]
impl Command for UnknownCommand {
    async fn handle(self, ctx: &tg::Ctx, msg: &Message) -> Result {
        let text = format!(
            "❌ {}\n\n{}",
            CommandError::Unknown { command: self.0 },
            relay::Cmd::descriptions()
        );
        ctx.bot.reply(msg, text).await?;
        Ok(())
    }
}

/// Special case for the `/start` command in PM with the bot.
///
/// We don't want this command to appear in the help message, so we handle
/// it separately
#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase")]
pub(crate) enum StartCommand {
    #[command(description = "unreachable")]
    Start,
}

#[async_trait]
impl Command for StartCommand {
    async fn handle(self, ctx: &tg::Ctx, msg: &Message) -> Result {
        let text = format!(
            "Hello! I relay the new posts of Twitter accounts to a Telegram channel.\n\n{}",
            relay::Cmd::descriptions()
        );
        ctx.bot.reply(msg, text).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: &str) -> Message {
        serde_json::from_value(serde_json::json!({
            "message_id": 1,
            "date": 1_700_000_000,
            "chat": { "id": 42, "type": "private", "first_name": "Owner" },
            "from": { "id": 42, "is_bot": false, "first_name": "Owner" },
            "text": text,
        }))
        .unwrap()
    }

    #[test]
    fn unknown_commands() {
        let command = filter_unknown_command(message("/frobnicate now")).unwrap();
        assert_eq!(command.0, "/frobnicate");

        assert!(filter_unknown_command(message("just chatting")).is_none());
    }
}
