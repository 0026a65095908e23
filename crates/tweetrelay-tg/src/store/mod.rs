//! Durable state of the bot: the config managed via chat commands and the
//! per-account cursors of the relayed posts.
mod config;
mod dedup;
mod file;

pub(crate) use config::*;
pub(crate) use dedup::*;

use crate::prelude::*;
use crate::Result;
use file::JsonFile;
use parking_lot::Mutex;
use serde::Deserialize;
use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub(crate) enum StoreError {
    #[error("Failed to create the state directory {}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("Failed to read {}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("The state file {} is corrupt", path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to write {}", path.display())]
    Write { path: PathBuf, source: io::Error },
}

#[derive(Deserialize)]
pub(crate) struct Config {
    #[serde(default = "default_state_dir")]
    state_dir: PathBuf,

    /// Channel used until the owner sets one via the command
    default_channel: Option<String>,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".")
}

pub(crate) struct Store {
    state: Mutex<State>,
    config_file: JsonFile,
    cursors_file: JsonFile,
}

struct State {
    config: BotConfig,
    cursors: Cursors,

    /// Reason why the relay must not run until the owner acknowledges it
    halted: Option<String>,
}

impl Store {
    pub(crate) fn open(config: Config) -> Result<Self> {
        let Config {
            state_dir,
            default_channel,
        } = config;

        let default_channel = default_channel
            .filter(|channel| !channel.trim().is_empty())
            .map(|channel| channel.parse::<Channel>())
            .transpose()?;

        fs_err::create_dir_all(&state_dir).map_err(|source| StoreError::CreateDir {
            path: state_dir.clone(),
            source,
        })?;

        let config_file = JsonFile::new(state_dir.join("config.json"));
        let cursors_file = JsonFile::new(state_dir.join("cursors.json"));

        let mut halted = vec![];

        let bot_config = load_or_quarantine(&config_file, &mut halted)?
            .unwrap_or_else(|| BotConfig::new(default_channel));

        let mut cursors: Cursors = load_or_quarantine(&cursors_file, &mut halted)?.unwrap_or_default();

        let orphans = cursors.retain_accounts(&bot_config.accounts);
        if !orphans.is_empty() {
            info!(?orphans, "Dropped cursors of the accounts that are no longer watched");
        }

        let halted = (!halted.is_empty()).then(|| halted.join("; "));

        if let Some(reason) = &halted {
            error!(
                %reason,
                "The relay is halted until the owner sends /resume"
            );
        }

        info!(
            state_dir = %state_dir.display(),
            accounts = bot_config.accounts.len(),
            channel = bot_config.channel.as_ref().map(tracing::field::display),
            interval_minutes = bot_config.interval.minutes(),
            paused = bot_config.paused,
            "Opened the store"
        );

        Ok(Self {
            state: Mutex::new(State {
                config: bot_config,
                cursors,
                halted,
            }),
            config_file,
            cursors_file,
        })
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.state.lock().halted.is_some()
    }
}

/// Corrupt files are moved aside, and the reason is recorded in `halted`.
/// Any other error means we can't access the state at all, and there is
/// nothing better to do than to fail.
fn load_or_quarantine<T: serde::de::DeserializeOwned>(
    file: &JsonFile,
    halted: &mut Vec<String>,
) -> Result<Option<T>> {
    let err = match file.load() {
        Ok(value) => return Ok(value),
        Err(err @ StoreError::Corrupt { .. }) => err,
        Err(err) => return Err(err.into()),
    };

    let moved_to = file.quarantine()?;

    warn!(
        err = tracing_err(&err),
        moved_to = %moved_to.display(),
        "Quarantined the corrupt state file"
    );

    halted.push(format!(
        "{} was corrupt and was moved to {}",
        file.path().display(),
        moved_to.display()
    ));

    Ok(None)
}
