//! Watch list, output channel, polling interval and the paused flag.
use crate::prelude::*;
use crate::store::{State, Store};
use crate::{err, Result};
use lazy_regex::regex_is_match;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;
use teloxide::types::{ChatId, Recipient};

/// One week. Anything longer is almost certainly a typo.
const MAX_INTERVAL_MINUTES: u32 = 7 * 24 * 60;

const DEFAULT_INTERVAL_MINUTES: u32 = 3;

/// Errors caused by invalid input to the config store operations.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ConfigError {
    #[error("`{input}` is not a valid Twitter handle: {reason}")]
    InvalidHandle { input: String, reason: &'static str },

    #[error("`{input}` is not a valid channel: expected @username or a numeric chat ID")]
    InvalidChannel { input: String },

    #[error("`{input}` is not a valid interval: {reason}")]
    InvalidInterval { input: String, reason: String },

    #[error("{handle} is not in the watch list")]
    AccountNotFound { handle: Handle },
}

/// Twitter account handle normalized to lowercase without the leading `@`.
/// Twitter handles are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub(crate) struct Handle(String);

impl Handle {
    /// Name without the `@` prefix
    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Handle {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, ConfigError> {
        let name = input.trim();
        let name = name.strip_prefix('@').unwrap_or(name);

        let reason = if name.is_empty() {
            "the handle is empty"
        } else if !regex_is_match!("^[A-Za-z0-9_]+$", name) {
            "only latin letters, digits and underscores are allowed"
        } else if name.len() > 15 {
            // ASCII only at this point, so bytes are characters
            "the handle is longer than 15 characters"
        } else {
            return Ok(Self(name.to_ascii_lowercase()));
        };

        Err(ConfigError::InvalidHandle {
            input: input.to_owned(),
            reason,
        })
    }
}

impl TryFrom<String> for Handle {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, ConfigError> {
        value.parse()
    }
}

impl From<Handle> for String {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Telegram chat where the posts are relayed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub(crate) enum Channel {
    /// Public `@username` of the channel
    Username(String),

    /// Numeric ID, required for private channels
    Id(ChatId),
}

impl FromStr for Channel {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, ConfigError> {
        let trimmed = input.trim();

        if let Some(name) = trimmed.strip_prefix('@') {
            if regex_is_match!("^[A-Za-z][A-Za-z0-9_]{4,31}$", name) {
                return Ok(Self::Username(trimmed.to_owned()));
            }
        } else if let Ok(id) = trimmed.parse::<i64>() {
            if id != 0 {
                return Ok(Self::Id(ChatId(id)));
            }
        }

        Err(ConfigError::InvalidChannel {
            input: input.to_owned(),
        })
    }
}

impl TryFrom<String> for Channel {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, ConfigError> {
        value.parse()
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.to_string()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Username(name) => f.write_str(name),
            Self::Id(id) => write!(f, "{id}"),
        }
    }
}

impl From<Channel> for Recipient {
    fn from(channel: Channel) -> Self {
        match channel {
            Channel::Username(name) => Recipient::ChannelUsername(name),
            Channel::Id(id) => Recipient::Id(id),
        }
    }
}

/// Number of minutes between relay cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub(crate) struct Interval(NonZeroU32);

impl Interval {
    pub(crate) fn minutes(self) -> u32 {
        self.0.get()
    }

    pub(crate) fn to_std(self) -> Duration {
        Duration::from_secs(u64::from(self.minutes()) * 60)
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self(NonZeroU32::new(DEFAULT_INTERVAL_MINUTES).expect("BUG: default interval is zero"))
    }
}

impl FromStr for Interval {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidInterval {
            input: input.to_owned(),
            reason,
        };

        let minutes: i64 = input
            .trim()
            .parse()
            .map_err(|_| invalid("expected a whole number of minutes".to_owned()))?;

        if minutes <= 0 {
            return Err(invalid("the interval must be positive".to_owned()));
        }

        u32::try_from(minutes)
            .ok()
            .and_then(|minutes| Self::try_from(minutes).ok())
            .ok_or_else(|| invalid(format!("the interval can't exceed {MAX_INTERVAL_MINUTES} minutes")))
    }
}

impl TryFrom<u32> for Interval {
    type Error = String;

    fn try_from(minutes: u32) -> Result<Self, String> {
        if minutes > MAX_INTERVAL_MINUTES {
            return Err(format!(
                "interval of {minutes} minutes exceeds the maximum of {MAX_INTERVAL_MINUTES}"
            ));
        }
        NonZeroU32::new(minutes)
            .map(Self)
            .ok_or_else(|| "interval must be positive".to_owned())
    }
}

impl From<Interval> for u32 {
    fn from(interval: Interval) -> Self {
        interval.minutes()
    }
}

/// The persistent settings of the bot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct BotConfig {
    /// Watched accounts in the order they were added
    pub(crate) accounts: Vec<Handle>,

    pub(crate) channel: Option<Channel>,

    #[serde(rename = "interval_minutes")]
    pub(crate) interval: Interval,

    pub(crate) paused: bool,
}

impl BotConfig {
    pub(crate) fn new(channel: Option<Channel>) -> Self {
        Self {
            accounts: vec![],
            channel,
            interval: Interval::default(),
            paused: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddOutcome {
    Added,
    AlreadyWatched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResumeOutcome {
    Resumed,
    AlreadyRunning,

    /// The relay was halted because of unreadable state on startup
    Recovered,
}

/// Config and the health of the store at a point in time
#[derive(Debug, Clone)]
pub(crate) struct ConfigStatus {
    pub(crate) config: BotConfig,

    /// Set when the persisted state couldn't be loaded on startup
    pub(crate) halted: Option<String>,
}

impl Store {
    pub(crate) fn add_account(&self, handle: Handle) -> Result<AddOutcome> {
        self.update_config(|config| {
            if config.accounts.contains(&handle) {
                return Ok(AddOutcome::AlreadyWatched);
            }
            config.accounts.push(handle);
            Ok(AddOutcome::Added)
        })
    }

    /// Stops watching the account and forgets its cursor
    pub(crate) fn remove_account(&self, handle: &Handle) -> Result {
        let mut state = self.state.lock();

        self.update_config_locked(&mut state, |config| {
            let len_before = config.accounts.len();
            config.accounts.retain(|account| account != handle);

            if config.accounts.len() == len_before {
                return Err(err!(ConfigError::AccountNotFound {
                    handle: handle.clone()
                }));
            }
            Ok(())
        })?;

        if state.cursors.remove(handle).is_some() {
            // The config is already saved at this point. If this fails, the
            // stale cursor is dropped the next time the state is loaded.
            if let Err(err) = self.cursors_file.save(&state.cursors) {
                warn!(
                    err = tracing_err(&err),
                    %handle,
                    "Failed to persist cursors after removing an account"
                );
            }
        }

        Ok(())
    }

    pub(crate) fn list_accounts(&self) -> Vec<Handle> {
        self.state.lock().config.accounts.clone()
    }

    pub(crate) fn set_channel(&self, channel: Channel) -> Result {
        self.update_config(|config| {
            config.channel = Some(channel);
            Ok(())
        })
    }

    pub(crate) fn set_interval(&self, interval: Interval) -> Result {
        self.update_config(|config| {
            config.interval = interval;
            Ok(())
        })
    }

    pub(crate) fn pause(&self) -> Result {
        self.update_config(|config| {
            config.paused = true;
            Ok(())
        })
    }

    pub(crate) fn resume(&self) -> Result<ResumeOutcome> {
        let mut state = self.state.lock();

        if let Some(reason) = &state.halted {
            info!(%reason, "Recovering from the halted state by the owner's request");

            let mut config = state.config.clone();
            config.paused = false;

            self.config_file.save(&config)?;
            self.cursors_file.save(&state.cursors)?;

            state.config = config;
            state.halted = None;

            return Ok(ResumeOutcome::Recovered);
        }

        let was_paused = state.config.paused;

        self.update_config_locked(&mut state, |config| {
            config.paused = false;
            Ok(())
        })?;

        Ok(if was_paused {
            ResumeOutcome::Resumed
        } else {
            ResumeOutcome::AlreadyRunning
        })
    }

    pub(crate) fn status(&self) -> ConfigStatus {
        let state = self.state.lock();
        ConfigStatus {
            config: state.config.clone(),
            halted: state.halted.clone(),
        }
    }

    /// Consistent copy of the config for the relay cycle to work with
    pub(crate) fn snapshot(&self) -> BotConfig {
        self.state.lock().config.clone()
    }

    fn update_config<R>(&self, update: impl FnOnce(&mut BotConfig) -> Result<R>) -> Result<R> {
        let mut state = self.state.lock();
        self.update_config_locked(&mut state, update)
    }

    /// Applies the update to a copy of the config and commits it in memory
    /// only if it was persisted successfully.
    fn update_config_locked<R>(
        &self,
        state: &mut State,
        update: impl FnOnce(&mut BotConfig) -> Result<R>,
    ) -> Result<R> {
        let mut config = state.config.clone();
        let output = update(&mut config)?;

        if config != state.config {
            self.config_file.save(&config)?;
            state.config = config;
        }

        Ok(output)
    }
}
