mod config;
mod encoding;
mod error;
mod fetch;
mod http;
mod observability;
mod relay;
mod store;
mod tg;
mod util;

pub use crate::error::*;
pub use config::*;
pub use observability::*;

#[allow(unused_imports)]
mod prelude {
    pub(crate) use crate::observability::logging::prelude::*;
    pub(crate) use crate::util::prelude::*;
}

/// Run the relay loop and the telegram bot processing loop until Ctrl+C
pub async fn run(config: Config) -> Result<()> {
    let store = std::sync::Arc::new(store::Store::open(config.store)?);

    let bot = tg::create_bot(&config.tg);
    let relay = relay::RelayHandle::default();

    let relay_service = relay::spawn(relay::RelayContext {
        store: store.clone(),
        fetcher: fetch::NitterFetcher::new(config.fetch)?,
        delivery: relay::delivery::TgDelivery::new(bot.clone()),
        config: config.relay,
        handle: relay.clone(),
    });

    let opts = tg::RunBotOptions {
        bot,
        tg_cfg: config.tg,
        store,
        relay,
    };

    let result = tg::run_bot(opts).await;

    tracing::info!("Waiting for the relay loop to finish the in-flight cycle...");

    let relay_result = relay_service.shutdown().await;

    result.and(relay_result)
}
