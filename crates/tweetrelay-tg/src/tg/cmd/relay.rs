//! Commands that manage the watch list and the relay loop.
use crate::prelude::*;
use crate::relay::{RelayHandle, RelayState, RelayStatus};
use crate::store::{AddOutcome, ConfigStatus, Handle, ResumeOutcome, Store};
use crate::tg::cmd::CommandError;
use crate::util::display::human_duration;
use crate::{tg, Result};
use async_trait::async_trait;
use chrono::prelude::*;
use itertools::Itertools;
use std::fmt::Write;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone, Debug)]
#[command(
    rename_rule = "lowercase",
    description = "The following commands are available to the owner of the bot:"
)]
pub(crate) enum Cmd {
    #[command(description = "display this text")]
    Help,

    #[command(description = "start relaying the posts of the account: /add @username")]
    Add(String),

    #[command(description = "stop relaying the posts of the account: /remove @username")]
    Remove(String),

    #[command(description = "show the watched accounts")]
    List,

    #[command(description = "set the output channel: /setchannel @channel or a numeric chat ID")]
    SetChannel(String),

    #[command(description = "set the number of minutes between the checks: /setinterval N")]
    SetInterval(String),

    #[command(description = "stop relaying the posts until /resume")]
    Pause,

    #[command(description = "continue relaying the posts")]
    Resume,

    #[command(description = "show the current state of the relay")]
    Status,
}

#[async_trait]
impl tg::cmd::Command for Cmd {
    async fn handle(self, ctx: &tg::Ctx, msg: &Message) -> Result {
        let reply = self.execute(&ctx.store, &ctx.relay)?;
        ctx.bot.reply(msg, reply).await?;
        Ok(())
    }
}

impl Cmd {
    /// Applies the command and returns the text of the reply
    pub(crate) fn execute(self, store: &Store, relay: &RelayHandle) -> Result<String> {
        let reply = match self {
            Cmd::Help => Cmd::descriptions().to_string(),
            Cmd::Add(handle) => {
                let handle = parse_handle(&handle, "/add @username")?;
                match store.add_account(handle.clone())? {
                    AddOutcome::Added => format!("✅ Added {handle}"),
                    AddOutcome::AlreadyWatched => format!("{handle} is already watched"),
                }
            }
            Cmd::Remove(handle) => {
                let handle = parse_handle(&handle, "/remove @username")?;
                store.remove_account(&handle)?;
                format!("✅ Removed {handle}")
            }
            Cmd::List => display_accounts(&store.list_accounts()),
            Cmd::SetChannel(channel) => {
                let channel = required_arg(&channel, "/setchannel @channel")?.parse()?;
                store.set_channel(channel)?;
                let channel = store.snapshot().channel.map(|channel| channel.to_string());
                format!("✅ Channel set to {}", channel.unwrap_or_default())
            }
            Cmd::SetInterval(minutes) => {
                let interval = required_arg(&minutes, "/setinterval N")?.parse()?;
                store.set_interval(interval)?;
                format!("✅ Interval set to {} minutes", store.snapshot().interval.minutes())
            }
            Cmd::Pause => {
                store.pause()?;
                relay.paused();
                "⏸️ Relaying paused".to_owned()
            }
            Cmd::Resume => {
                let outcome = store.resume()?;
                relay.resumed();
                match outcome {
                    ResumeOutcome::Resumed => "▶️ Relaying resumed",
                    ResumeOutcome::AlreadyRunning => "The relay is already running",
                    ResumeOutcome::Recovered => {
                        "▶️ Relaying resumed. The corrupt state was discarded"
                    }
                }
                .to_owned()
            }
            Cmd::Status => display_status(&store.status(), &relay.status(), Utc::now()),
        };

        Ok(reply)
    }
}

fn required_arg<'a>(arg: &'a str, usage: &'static str) -> Result<&'a str, CommandError> {
    let arg = arg.trim();
    if arg.is_empty() {
        return Err(CommandError::MissingArgument { usage });
    }
    Ok(arg)
}

fn parse_handle(arg: &str, usage: &'static str) -> Result<Handle> {
    Ok(required_arg(arg, usage)?.parse()?)
}

fn display_accounts(accounts: &[Handle]) -> String {
    if accounts.is_empty() {
        return "No accounts are watched yet. Use /add @username to add one".to_owned();
    }

    let list = accounts
        .iter()
        .enumerate()
        .format_with("\n", |(i, handle), f| f(&format_args!("{}. {handle}", i + 1)));

    format!("Watched accounts:\n{list}")
}

fn display_status(config: &ConfigStatus, relay: &RelayStatus, now: DateTime<Utc>) -> String {
    let ConfigStatus { config, halted } = config;

    let mut text = String::new();

    let relay_line = match (halted, config.paused) {
        (Some(reason), _) => format!("🛑 halted: {reason}. Send /resume to start from scratch"),
        (None, true) => "⏸️ paused".to_owned(),
        (None, false) => "▶️ running".to_owned(),
    };

    let state = match relay.state {
        RelayState::Idle => "waiting for the next check",
        RelayState::Running => "checking the accounts",
        RelayState::Paused => "paused",
    };

    let channel = config
        .channel
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "not set, use /setchannel".to_owned());

    let last_cycle = relay.last_cycle.as_ref().map_or_else(
        || "never".to_owned(),
        |cycle| {
            let ago = (now - cycle.finished_at).to_std().unwrap_or_default();
            format!(
                "{} (relayed {} posts, {} accounts failed)",
                human_duration(ago),
                cycle.posts_relayed,
                cycle.accounts_failed,
            )
        },
    );

    // Writing into a `String` never fails
    let _ = write!(
        text,
        "Relay: {relay_line}\n\
        State: {state}\n\
        Channel: {channel}\n\
        Interval: {} minutes\n\
        Watched accounts: {}\n\
        Last check: {last_cycle}",
        config.interval.minutes(),
        config.accounts.len(),
    );

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::CycleReport;
    use crate::store::tests::open_store;
    use expect_test::expect;
    use std::time::Duration;

    fn run(store: &Store, relay: &RelayHandle, text: &str) -> String {
        let cmd = Cmd::parse(text, "tweetrelay_bot").unwrap();
        match cmd.execute(store, relay) {
            Ok(reply) => reply,
            Err(err) => {
                assert!(err.is_user_error(), "{err:?}");
                format!("error: {}", err.kind())
            }
        }
    }

    #[test]
    fn add_list_remove() {
        let (_dir, store) = open_store();
        let relay = RelayHandle::default();

        let replies = [
            "/list",
            "/add @Alice",
            "/add alice",
            "/add bob",
            "/list",
            "/remove @alice",
            "/remove @alice",
            "/list",
            "/add",
            "/add @not-valid",
        ]
        .map(|text| run(&store, &relay, text));

        expect![[r#"
            [
                "No accounts are watched yet. Use /add @username to add one",
                "✅ Added @alice",
                "@alice is already watched",
                "✅ Added @bob",
                "Watched accounts:\n1. @alice\n2. @bob",
                "✅ Removed @alice",
                "error: @alice is not in the watch list",
                "Watched accounts:\n1. @bob",
                "error: Missing argument. Usage: /add @username",
                "error: `@not-valid` is not a valid Twitter handle: only latin letters, digits and underscores are allowed",
            ]
        "#]]
        .assert_debug_eq(&replies);
    }

    #[test]
    fn settings_and_status() {
        let (_dir, store) = open_store();
        let relay = RelayHandle::default();

        let replies = [
            "/setinterval 5",
            "/setinterval 0",
            "/setinterval -1",
            "/setinterval five",
            "/setchannel livescoreit",
            "/setchannel @livescoreit",
            "/add @alice",
            "/status",
        ]
        .map(|text| run(&store, &relay, text));

        expect![[r#"
            [
                "✅ Interval set to 5 minutes",
                "error: `0` is not a valid interval: the interval must be positive",
                "error: `-1` is not a valid interval: the interval must be positive",
                "error: `five` is not a valid interval: expected a whole number of minutes",
                "error: `livescoreit` is not a valid channel: expected @username or a numeric chat ID",
                "✅ Channel set to @livescoreit",
                "✅ Added @alice",
                "Relay: ▶️ running\nState: waiting for the next check\nChannel: @livescoreit\nInterval: 5 minutes\nWatched accounts: 1\nLast check: never",
            ]
        "#]]
        .assert_debug_eq(&replies);
    }

    #[test]
    fn pause_and_resume() {
        let (_dir, store) = open_store();
        let relay = RelayHandle::default();

        let replies = ["/resume", "/pause", "/status", "/resume"].map(|text| run(&store, &relay, text));

        expect![[r#"
            [
                "The relay is already running",
                "⏸️ Relaying paused",
                "Relay: ⏸️ paused\nState: paused\nChannel: not set, use /setchannel\nInterval: 3 minutes\nWatched accounts: 0\nLast check: never",
                "▶️ Relaying resumed",
            ]
        "#]]
        .assert_debug_eq(&replies);

        assert_eq!(relay.status().state, RelayState::Idle);
        assert!(!store.snapshot().paused);
    }

    #[test]
    fn status_with_the_last_cycle() {
        let (_dir, store) = open_store();

        let now = Utc.with_ymd_and_hms(2023, 6, 19, 12, 0, 0).unwrap();

        let relay = RelayStatus {
            state: RelayState::Running,
            last_cycle: Some(CycleReport {
                finished_at: now - chrono::Duration::minutes(2),
                duration: Duration::from_secs(3),
                accounts_checked: 3,
                accounts_failed: 1,
                accounts_backed_off: 0,
                posts_relayed: 4,
            }),
        };

        expect![[r#"
            Relay: ▶️ running
            State: checking the accounts
            Channel: not set, use /setchannel
            Interval: 3 minutes
            Watched accounts: 0
            Last check: 2 minutes ago (relayed 4 posts, 1 accounts failed)"#]]
        .assert_eq(&display_status(&store.status(), &relay, now));
    }
}
