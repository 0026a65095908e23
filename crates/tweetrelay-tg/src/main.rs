use futures::prelude::*;
use std::panic::AssertUnwindSafe;
use std::process::ExitCode;
use tracing::{error, info};
use tweetrelay_tg::tracing_err;

#[tokio::main]
async fn main() -> ExitCode {
    if dotenvy::dotenv().is_err() {
        eprintln!("No .env file was found, using the process environment only");
    }

    let logging_task = tweetrelay_tg::init_logging();

    tweetrelay_tg::init_metrics();

    // Ctrl+C is handled by the bot dispatcher, which then lets the relay
    // loop finish its in-flight cycle, so there is no forced abort here
    let exit_code = AssertUnwindSafe(try_main())
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            error!("Exiting due to a panic...");
            Ok(ExitCode::FAILURE)
        })
        .unwrap_or_else(|err| {
            error!(err = tracing_err(&err), "Exiting with an error...");
            ExitCode::FAILURE
        });

    info!(?exit_code, "Shutting down");

    logging_task.shutdown().await;

    exit_code
}

async fn try_main() -> tweetrelay_tg::Result<ExitCode> {
    let config = tweetrelay_tg::Config::load_or_panic();
    tweetrelay_tg::run(config).await?;
    Ok(ExitCode::SUCCESS)
}
