//! Telegram commands root module

mod cmd;
mod config;

use crate::prelude::*;
use crate::relay::RelayHandle;
use crate::store::Store;
use crate::{encoding, Result};
use dptree::di::DependencyMap;
use std::sync::Arc;
use teloxide::adaptors::{CacheMe, Throttle, Trace};
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

pub(crate) use cmd::CommandError;
pub(crate) use config::*;

pub(crate) type Bot = Trace<CacheMe<Throttle<teloxide::Bot>>>;

pub(crate) struct Ctx {
    bot: Bot,
    cfg: Arc<Config>,
    store: Arc<Store>,
    relay: RelayHandle,
}

pub(crate) fn create_bot(cfg: &Config) -> Bot {
    teloxide::Bot::new(cfg.bot_token.expose_secret())
        .throttle(Default::default())
        .cache_me()
        .trace(teloxide::adaptors::trace::Settings::all())
}

pub(crate) struct RunBotOptions {
    pub(crate) bot: Bot,
    pub(crate) tg_cfg: Config,
    pub(crate) store: Arc<Store>,
    pub(crate) relay: RelayHandle,
}

pub(crate) async fn run_bot(opts: RunBotOptions) -> Result {
    let RunBotOptions {
        bot,
        tg_cfg,
        store,
        relay,
    } = opts;

    let mut di = DependencyMap::new();

    di.insert(Arc::new(Ctx {
        bot: bot.clone(),
        cfg: Arc::new(tg_cfg),
        store,
        relay,
    }));

    info!("Starting bot...");

    bot.set_my_commands(cmd::relay::Cmd::bot_commands()).await?;

    let handler = dptree::entry()
        .inspect(|update: Update| {
            let kind = update.kind.discriminator();
            metrics::counter!("tg_updates_total", "kind" => kind).increment(1);
            trace!(
                target: "tg_update",
                "{}",
                encoding::to_json_string_pretty(&update),
            );
        })
        .branch(
            Update::filter_message()
                .filter(cmd::filter_owner)
                .branch(
                    dptree::entry()
                        .filter_command::<cmd::StartCommand>()
                        .endpoint(cmd::handle::<cmd::StartCommand>()),
                )
                .branch(
                    dptree::entry()
                        .filter_command::<cmd::relay::Cmd>()
                        .endpoint(cmd::handle::<cmd::relay::Cmd>()),
                )
                .branch(
                    dptree::filter_map(cmd::filter_unknown_command)
                        .endpoint(cmd::handle::<cmd::UnknownCommand>()),
                ),
        );

    Dispatcher::builder(bot, handler)
        .dependencies(di)
        // Non-command messages and messages from strangers are not handled,
        // so to suppress the warning about unhandled updates we have
        // a noop default handler here
        .default_handler(|_| std::future::ready(()))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Bot stopped");

    Ok(())
}
