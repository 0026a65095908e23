//! Periodic relaying of the new posts of the watched accounts to the channel.
pub(crate) mod caption;
pub(crate) mod delivery;

use crate::error::ErrorKind;
use crate::fetch::{Fetch, FetchError, Post};
use crate::prelude::*;
use crate::store::{BotConfig, Channel, Handle, Store};
use crate::{err, fatal, Error, Result};
use caption::CaptionFn;
use chrono::prelude::*;
use delivery::Deliver;
use futures::prelude::*;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

#[derive(Deserialize)]
pub(crate) struct Config {
    /// Number of the newest posts to forward when an account is relayed for
    /// the first time. The older ones are marked as seen.
    #[serde(default = "default_initial_backfill")]
    initial_backfill: usize,

    #[serde(default = "default_fetch_timeout_secs")]
    fetch_timeout_secs: u64,

    #[serde(default = "default_delivery_timeout_secs")]
    delivery_timeout_secs: u64,

    /// Whether to append the link to the original post to the caption
    #[serde(default)]
    caption_links: bool,
}

fn default_initial_backfill() -> usize {
    1
}

fn default_fetch_timeout_secs() -> u64 {
    60
}

fn default_delivery_timeout_secs() -> u64 {
    120
}

impl Config {
    pub(crate) fn caption(&self) -> CaptionFn {
        if self.caption_links {
            caption::with_link
        } else {
            caption::without_links
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum RelayState {
    #[default]
    Idle,
    Running,
    Paused,
}

/// Summary of a single pass over the watched accounts
#[derive(Debug, Clone)]
pub(crate) struct CycleReport {
    pub(crate) finished_at: DateTime<Utc>,
    pub(crate) duration: Duration,
    pub(crate) accounts_checked: usize,
    pub(crate) accounts_failed: usize,
    pub(crate) accounts_backed_off: usize,
    pub(crate) posts_relayed: usize,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RelayStatus {
    pub(crate) state: RelayState,
    pub(crate) last_cycle: Option<CycleReport>,
}

/// Shared view of the relay loop for the command handlers
#[derive(Clone, Default)]
pub(crate) struct RelayHandle {
    status: Arc<Mutex<RelayStatus>>,
}

impl RelayHandle {
    pub(crate) fn status(&self) -> RelayStatus {
        self.status.lock().clone()
    }

    /// An in-flight cycle is never interrupted. The relay moves to the
    /// paused state once it finishes.
    pub(crate) fn paused(&self) {
        let mut status = self.status.lock();
        if status.state == RelayState::Idle {
            status.state = RelayState::Paused;
        }
    }

    pub(crate) fn resumed(&self) {
        let mut status = self.status.lock();
        if status.state == RelayState::Paused {
            status.state = RelayState::Idle;
        }
    }

    fn set_state(&self, state: RelayState) {
        self.status.lock().state = state;
    }

    fn finish_cycle(&self, state: RelayState, report: CycleReport) {
        let mut status = self.status.lock();
        status.state = state;
        status.last_cycle = Some(report);
    }
}

/// What happened on a tick of the relay timer
#[derive(Debug)]
pub(crate) enum TickOutcome {
    Halted,
    Paused,
    NoChannel,
    Completed(CycleReport),
}

pub(crate) struct RelayContext<F, D> {
    pub(crate) store: Arc<Store>,
    pub(crate) fetcher: F,
    pub(crate) delivery: D,
    pub(crate) config: Config,
    pub(crate) handle: RelayHandle,
}

pub(crate) struct Relay<F, D> {
    ctx: RelayContext<F, D>,
    caption: CaptionFn,

    /// Accounts that the source asked us not to query until the given time
    backoff: HashMap<Handle, Instant>,
}

pub(crate) fn spawn<F, D>(ctx: RelayContext<F, D>) -> RelayService
where
    F: Fetch + 'static,
    D: Deliver + 'static,
{
    let (send, recv) = oneshot::channel();

    RelayService {
        shutdown: send,
        join_handle: tokio::spawn(Relay::new(ctx).run_loop(recv)),
    }
}

/// The relay loop running in the background
pub(crate) struct RelayService {
    shutdown: oneshot::Sender<()>,
    join_handle: tokio::task::JoinHandle<()>,
}

impl RelayService {
    /// Waits for the in-flight cycle (if any) to finish and stops the loop
    pub(crate) async fn shutdown(self) -> Result {
        // The receiver is gone only if the loop already exited
        let _ = self.shutdown.send(());

        self.join_handle
            .await
            .map_err(|err| fatal!("Relay loop task failed: {err}"))
    }
}

impl<F: Fetch, D: Deliver> Relay<F, D> {
    pub(crate) fn new(ctx: RelayContext<F, D>) -> Self {
        Self {
            caption: ctx.config.caption(),
            ctx,
            backoff: HashMap::new(),
        }
    }

    #[instrument(skip_all)]
    async fn run_loop(mut self, mut shutdown: oneshot::Receiver<()>) {
        info!("Starting the relay loop");

        loop {
            let result = AssertUnwindSafe(self.tick()).catch_unwind().await;

            if result.is_err() {
                error!("BUG: relay cycle panicked, will retry on the next tick");
                self.ctx.handle.set_state(RelayState::Idle);
            }

            // Interval changes take effect starting from the next sleep
            let interval = self.ctx.store.snapshot().interval.to_std();

            tokio::select! {
                _ = &mut shutdown => break,
                () = tokio::time::sleep(interval) => {}
            }
        }

        info!("Relay loop stopped");
    }

    pub(crate) async fn tick(&mut self) -> TickOutcome {
        let outcome = self.tick_imp().await;

        let label: &'static str = match &outcome {
            TickOutcome::Halted => "halted",
            TickOutcome::Paused => "paused",
            TickOutcome::NoChannel => "no_channel",
            TickOutcome::Completed(_) => "completed",
        };
        metrics::counter!("relay_cycles_total", "outcome" => label).increment(1);

        outcome
    }

    async fn tick_imp(&mut self) -> TickOutcome {
        if self.ctx.store.is_halted() {
            warn!("The relay is halted because of the corrupt state, send /resume to recover");
            return TickOutcome::Halted;
        }

        let config = self.ctx.store.snapshot();

        if config.paused {
            debug!("The relay is paused, skipping the cycle");
            self.ctx.handle.set_state(RelayState::Paused);
            return TickOutcome::Paused;
        }

        let Some(channel) = config.channel.clone() else {
            warn!("The output channel is not set, skipping the cycle. Use /setchannel to set it");
            return TickOutcome::NoChannel;
        };

        self.ctx.handle.set_state(RelayState::Running);

        let report = self.run_cycle(&config, &channel).await;

        // Pause requested during the cycle takes effect only now
        let state = if self.ctx.store.snapshot().paused {
            RelayState::Paused
        } else {
            RelayState::Idle
        };

        self.ctx.handle.finish_cycle(state, report.clone());

        TickOutcome::Completed(report)
    }

    #[instrument(skip_all, fields(%channel, accounts = config.accounts.len()))]
    async fn run_cycle(&mut self, config: &BotConfig, channel: &Channel) -> CycleReport {
        let start = Instant::now();

        let mut report = CycleReport {
            finished_at: Utc::now(),
            duration: Duration::ZERO,
            accounts_checked: 0,
            accounts_failed: 0,
            accounts_backed_off: 0,
            posts_relayed: 0,
        };

        for handle in &config.accounts {
            if let Some(until) = self.backoff.get(handle) {
                if *until > Instant::now() {
                    debug!(%handle, "Account is in backoff, skipping it");
                    report.accounts_backed_off += 1;
                    continue;
                }
                self.backoff.remove(handle);
            }

            report.accounts_checked += 1;

            let mut relayed = 0;
            let result = self.relay_account(channel, handle, &mut relayed).await;
            report.posts_relayed += relayed;

            let Err(err) = result else {
                continue;
            };

            report.accounts_failed += 1;

            let kind = account_error_label(&err);
            metrics::counter!("relay_account_errors_total", "kind" => kind).increment(1);

            if let ErrorKind::Fetch {
                source: FetchError::Backoff { retry_after, .. },
            } = err.kind()
            {
                self.backoff.insert(handle.clone(), Instant::now() + *retry_after);
            }

            warn!(
                %handle,
                kind,
                err = tracing_err(&err),
                id = err.id(),
                "Failed to relay the posts of the account, continuing with the next one"
            );
        }

        report.duration = start.elapsed();
        report.finished_at = Utc::now();

        metrics::histogram!("relay_cycle_duration_seconds").record(report.duration);

        info!(
            duration = tracing_duration(report.duration),
            accounts_checked = report.accounts_checked,
            accounts_failed = report.accounts_failed,
            accounts_backed_off = report.accounts_backed_off,
            posts_relayed = report.posts_relayed,
            "Relay cycle finished"
        );

        report
    }

    /// `relayed` is updated as the posts are delivered, so that it's accurate
    /// even if the account fails midway.
    #[instrument(skip_all, fields(%handle))]
    async fn relay_account(
        &self,
        channel: &Channel,
        handle: &Handle,
        relayed: &mut usize,
    ) -> Result {
        let store = &self.ctx.store;
        let since = store.cursor(handle);

        let fetch = self
            .ctx
            .fetcher
            .fetch_recent_posts(handle, since)
            .map_err(Error::from);

        let mut posts = with_timeout("fetch posts", self.fetch_timeout(), fetch).await?;

        if since.is_none() {
            posts = self.skip_backlog(handle, posts)?;
        }

        for post in posts {
            if !store.is_new(handle, post.id) {
                continue;
            }

            let caption = (self.caption)(&post);
            let delivery = self.ctx.delivery.deliver(channel, &post, caption);

            with_timeout("deliver post", self.delivery_timeout(), delivery).await?;

            store.mark_seen(handle, post.id)?;

            *relayed += 1;
            metrics::counter!("relay_posts_total").increment(1);

            info!(
                post = %post.id,
                url = %post.url,
                created_at = %post.created_at,
                "Relayed the post"
            );
        }

        Ok(())
    }

    /// On the first encounter with the account we don't want to flood the
    /// channel with its whole feed, so only the newest posts are kept, and
    /// the rest are marked as seen.
    fn skip_backlog(&self, handle: &Handle, mut posts: Vec<Post>) -> Result<Vec<Post>> {
        let backfill = self.ctx.config.initial_backfill;

        let Some(skip) = posts.len().checked_sub(backfill).filter(|&skip| skip > 0) else {
            return Ok(posts);
        };

        let rest = posts.split_off(skip);

        if let Some(newest_skipped) = posts.last() {
            self.ctx.store.mark_seen(handle, newest_skipped.id)?;
        }

        info!(
            skipped = posts.len(),
            backfill,
            "First time relaying the account, skipping the older posts"
        );

        Ok(rest)
    }

    fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.ctx.config.fetch_timeout_secs)
    }

    fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.ctx.config.delivery_timeout_secs)
    }
}

async fn with_timeout<T>(
    operation: &'static str,
    timeout: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| err!(ErrorKind::Timeout { operation, timeout }))?
}

fn account_error_label(err: &Error) -> &'static str {
    match err.kind() {
        ErrorKind::Fetch { source } => match source {
            FetchError::NotFound { .. } => "not_found",
            FetchError::Retryable { .. } => "fetch",
            FetchError::Backoff { .. } => "backoff",
        },
        ErrorKind::Tg { .. } => "delivery",
        ErrorKind::Timeout { .. } => "timeout",
        ErrorKind::Store { .. } => "store",
        ErrorKind::Config { .. } | ErrorKind::Command { .. } | ErrorKind::Fatal { .. } => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tests::post_by;
    use crate::fetch::{select_new_posts, PostId};
    use crate::store::tests::open_store;
    use async_trait::async_trait;
    use expect_test::expect;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    enum Feed {
        Posts(Vec<Post>),
        NotFound,
        RateLimited(Duration),
    }

    type FetchHook = Box<dyn FnOnce() + Send>;

    #[derive(Default)]
    struct FakeFetcher {
        feeds: Mutex<HashMap<Handle, Feed>>,
        calls: Mutex<Vec<(Handle, Option<PostId>)>>,

        /// Runs once, during the next fetch
        on_next_fetch: Mutex<Option<FetchHook>>,
    }

    impl FakeFetcher {
        fn set(&self, handle: &str, feed: Feed) {
            self.feeds.lock().insert(handle.parse().unwrap(), feed);
        }

        fn fetched_handles(&self) -> Vec<String> {
            self.calls
                .lock()
                .iter()
                .map(|(handle, _)| handle.to_string())
                .collect()
        }
    }

    #[async_trait]
    impl Fetch for Arc<FakeFetcher> {
        async fn fetch_recent_posts(
            &self,
            handle: &Handle,
            since: Option<PostId>,
        ) -> Result<Vec<Post>, FetchError> {
            self.calls.lock().push((handle.clone(), since));

            let hook = self.on_next_fetch.lock().take();
            if let Some(hook) = hook {
                hook();
            }

            let handle = handle.clone();
            match self.feeds.lock().get(&handle) {
                Some(Feed::Posts(posts)) => Ok(select_new_posts(posts.clone(), since)),
                Some(Feed::RateLimited(retry_after)) => Err(FetchError::Backoff {
                    handle,
                    retry_after: *retry_after,
                }),
                Some(Feed::NotFound) | None => Err(FetchError::NotFound { handle }),
            }
        }
    }

    #[derive(Default)]
    struct FakeDelivery {
        delivered: Mutex<Vec<String>>,
        failing: Mutex<HashSet<PostId>>,
    }

    #[async_trait]
    impl Deliver for Arc<FakeDelivery> {
        async fn deliver(&self, channel: &Channel, post: &Post, caption: String) -> Result {
            if self.failing.lock().contains(&post.id) {
                return Err(fatal!("Delivery of {} failed", post.id));
            }
            let caption = caption.replace('\n', " ");
            self.delivered
                .lock()
                .push(format!("{channel} {}: {caption}", post.id));
            Ok(())
        }
    }

    fn test_config() -> Config {
        Config {
            initial_backfill: 1,
            fetch_timeout_secs: 5,
            delivery_timeout_secs: 5,
            caption_links: false,
        }
    }

    /// Store with the channel set and the given accounts watched
    fn watching_store(handles: &[&str]) -> (TempDir, Arc<Store>) {
        let (dir, store) = open_store();
        store.set_channel("@livescoreit".parse().unwrap()).unwrap();
        for handle in handles {
            store.add_account(handle.parse().unwrap()).unwrap();
        }
        (dir, Arc::new(store))
    }

    struct Harness {
        _dir: TempDir,
        store: Arc<Store>,
        fetcher: Arc<FakeFetcher>,
        delivery: Arc<FakeDelivery>,
        handle: RelayHandle,
        relay: Relay<Arc<FakeFetcher>, Arc<FakeDelivery>>,
    }

    impl Harness {
        fn new() -> Self {
            let (dir, store) = watching_store(&[]);

            let fetcher = Arc::<FakeFetcher>::default();
            let delivery = Arc::<FakeDelivery>::default();
            let handle = RelayHandle::default();

            let relay = Relay::new(RelayContext {
                store: store.clone(),
                fetcher: fetcher.clone(),
                delivery: delivery.clone(),
                config: test_config(),
                handle: handle.clone(),
            });

            Self {
                _dir: dir,
                store,
                fetcher,
                delivery,
                handle,
                relay,
            }
        }

        fn watch(&self, handle: &str, feed: Feed) {
            self.store.add_account(handle.parse().unwrap()).unwrap();
            self.fetcher.set(handle, feed);
        }

        fn cursor(&self, handle: &str) -> Option<u64> {
            self.store
                .cursor(&handle.parse().unwrap())
                .map(|id| id.to_string().parse().unwrap())
        }

        fn take_delivered(&self) -> Vec<String> {
            std::mem::take(&mut *self.delivery.delivered.lock())
        }

        async fn tick(&mut self) -> CycleReport {
            match self.relay.tick().await {
                TickOutcome::Completed(report) => report,
                outcome => panic!("Unexpected outcome: {outcome:?}"),
            }
        }
    }

    fn posts(ids: impl IntoIterator<Item = u64>) -> Feed {
        posts_by("alice", ids)
    }

    fn posts_by(author: &str, ids: impl IntoIterator<Item = u64>) -> Feed {
        Feed::Posts(ids.into_iter().map(|id| post_by(author, id)).collect())
    }

    #[test_log::test(tokio::test)]
    async fn forwards_only_new_posts() {
        let mut h = Harness::new();
        h.watch("alice", posts([1, 2]));

        h.store.mark_seen(&"alice".parse().unwrap(), PostId::from_raw(1)).unwrap();

        let report = h.tick().await;

        assert_eq!(report.posts_relayed, 1);
        expect![[r#"
            [
                "@livescoreit 2: 🧵 New tweet from @alice:  post 2",
            ]
        "#]]
        .assert_debug_eq(&h.take_delivered());
        assert_eq!(h.cursor("alice"), Some(2));

        // Nothing new on the next tick
        h.tick().await;
        assert!(h.take_delivered().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn first_encounter_forwards_only_the_newest_post() {
        let mut h = Harness::new();
        h.watch("alice", posts([3, 1, 2]));

        h.tick().await;

        expect![[r#"
            [
                "@livescoreit 3: 🧵 New tweet from @alice:  post 3",
            ]
        "#]]
        .assert_debug_eq(&h.take_delivered());
        assert_eq!(h.cursor("alice"), Some(3));

        h.fetcher.set("alice", posts([1, 2, 3, 4, 5]));
        h.tick().await;

        expect![[r#"
            [
                "@livescoreit 4: 🧵 New tweet from @alice:  post 4",
                "@livescoreit 5: 🧵 New tweet from @alice:  post 5",
            ]
        "#]]
        .assert_debug_eq(&h.take_delivered());
    }

    #[test_log::test(tokio::test)]
    async fn delivery_failure_keeps_the_cursor() {
        let mut h = Harness::new();
        h.watch("alice", posts([10]));
        h.store.mark_seen(&"alice".parse().unwrap(), PostId::from_raw(9)).unwrap();
        h.fetcher.set("alice", posts([9, 10, 11]));

        h.delivery.failing.lock().insert(PostId::from_raw(11));

        let report = h.tick().await;
        assert_eq!(report.accounts_failed, 1);
        assert_eq!(report.posts_relayed, 1);
        assert_eq!(h.cursor("alice"), Some(10));

        h.delivery.failing.lock().clear();
        h.take_delivered();

        h.tick().await;
        expect![[r#"
            [
                "@livescoreit 11: 🧵 New tweet from @alice:  post 11",
            ]
        "#]]
        .assert_debug_eq(&h.take_delivered());
        assert_eq!(h.cursor("alice"), Some(11));
    }

    #[test_log::test(tokio::test)]
    async fn account_errors_are_isolated() {
        let mut h = Harness::new();
        h.watch("ghost", Feed::NotFound);
        h.watch("bob", posts_by("bob", [7]));

        let report = h.tick().await;

        assert_eq!(report.accounts_checked, 2);
        assert_eq!(report.accounts_failed, 1);
        expect![[r#"
            [
                "@livescoreit 7: 🧵 New tweet from @bob:  post 7",
            ]
        "#]]
        .assert_debug_eq(&h.take_delivered());
        assert_eq!(h.cursor("bob"), Some(7));
        assert_eq!(h.cursor("ghost"), None);
    }

    #[test_log::test(tokio::test)]
    async fn rate_limited_account_is_backed_off() {
        let mut h = Harness::new();
        h.watch("alice", Feed::RateLimited(Duration::from_secs(3600)));

        let report = h.tick().await;
        assert_eq!(report.accounts_failed, 1);

        let report = h.tick().await;
        assert_eq!(report.accounts_checked, 0);
        assert_eq!(report.accounts_backed_off, 1);

        assert_eq!(h.fetcher.calls.lock().len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn pause_and_resume() {
        let mut h = Harness::new();
        h.watch("alice", posts([1]));

        h.store.pause().unwrap();
        h.handle.paused();
        assert_eq!(h.handle.status().state, RelayState::Paused);

        assert!(matches!(h.relay.tick().await, TickOutcome::Paused));
        assert!(h.fetcher.calls.lock().is_empty());
        assert!(h.take_delivered().is_empty());

        h.store.resume().unwrap();
        h.handle.resumed();
        assert_eq!(h.handle.status().state, RelayState::Idle);

        h.tick().await;
        assert_eq!(h.take_delivered().len(), 1);

        let status = h.handle.status();
        assert_eq!(status.state, RelayState::Idle);
        assert_eq!(status.last_cycle.unwrap().posts_relayed, 1);
    }

    #[test_log::test(tokio::test)]
    async fn no_channel_skips_the_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(crate::store::tests::store_config(&dir)).unwrap());
        store.add_account("alice".parse().unwrap()).unwrap();

        let fetcher = Arc::<FakeFetcher>::default();

        let mut relay = Relay::new(RelayContext {
            store,
            fetcher: fetcher.clone(),
            delivery: Arc::<FakeDelivery>::default(),
            config: test_config(),
            handle: RelayHandle::default(),
        });

        assert!(matches!(relay.tick().await, TickOutcome::NoChannel));
        assert!(fetcher.calls.lock().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn slow_delivery_times_out() {
        struct Stuck;

        #[async_trait]
        impl Deliver for Stuck {
            async fn deliver(&self, _: &Channel, _: &Post, _: String) -> Result {
                future::pending().await
            }
        }

        let (_dir, store) = watching_store(&["alice"]);

        let fetcher = Arc::<FakeFetcher>::default();
        fetcher.set("alice", posts([1]));

        let mut relay = Relay::new(RelayContext {
            store: store.clone(),
            fetcher,
            delivery: Stuck,
            config: Config {
                delivery_timeout_secs: 0,
                ..test_config()
            },
            handle: RelayHandle::default(),
        });

        let TickOutcome::Completed(report) = relay.tick().await else {
            panic!("The cycle must complete");
        };
        assert_eq!(report.accounts_failed, 1);
        assert_eq!(store.cursor(&"alice".parse().unwrap()), None);
    }

    #[test_log::test(tokio::test)]
    async fn watch_list_changes_apply_to_the_next_cycle() {
        let mut h = Harness::new();
        h.watch("alice", posts([1]));
        h.watch("bob", posts_by("bob", [2]));
        h.fetcher.set("carol", posts_by("carol", [3]));

        let store = h.store.clone();
        *h.fetcher.on_next_fetch.lock() = Some(Box::new(move || {
            store.remove_account(&"bob".parse().unwrap()).unwrap();
            store.add_account("carol".parse().unwrap()).unwrap();
        }));

        let report = h.tick().await;

        // The cycle sticks to the watch list it started with
        assert_eq!(report.accounts_checked, 2);
        assert_eq!(h.fetcher.fetched_handles(), ["@alice", "@bob"]);
        expect![[r#"
            [
                "@livescoreit 1: 🧵 New tweet from @alice:  post 1",
                "@livescoreit 2: 🧵 New tweet from @bob:  post 2",
            ]
        "#]]
        .assert_debug_eq(&h.take_delivered());

        // No cursor is left behind for the removed account
        assert_eq!(h.cursor("bob"), None);

        h.fetcher.calls.lock().clear();
        h.tick().await;

        assert_eq!(h.fetcher.fetched_handles(), ["@alice", "@carol"]);
        expect![[r#"
            [
                "@livescoreit 3: 🧵 New tweet from @carol:  post 3",
            ]
        "#]]
        .assert_debug_eq(&h.take_delivered());

        let cursors = fs_err::read_to_string(h._dir.path().join("cursors.json")).unwrap();
        expect![[r#"
            {
              "alice": "1",
              "carol": "3"
            }
        "#]]
        .assert_eq(&cursors);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn interval_change_applies_from_the_next_sleep() {
        let (_dir, store) = watching_store(&["alice"]);

        let fetcher = Arc::<FakeFetcher>::default();
        fetcher.set("alice", posts([1]));

        let service = spawn(RelayContext {
            store: store.clone(),
            fetcher: fetcher.clone(),
            delivery: Arc::<FakeDelivery>::default(),
            config: test_config(),
            handle: RelayHandle::default(),
        });

        let start = tokio::time::Instant::now();
        let at = |secs| tokio::time::sleep_until(start + Duration::from_secs(secs));
        let cycles = || fetcher.calls.lock().len();

        at(1).await;
        assert_eq!(cycles(), 1);

        // The loop is already sleeping for the default 3 minutes
        store.set_interval("1".parse().unwrap()).unwrap();

        at(2 * 60).await;
        assert_eq!(cycles(), 1);

        at(3 * 60 + 1).await;
        assert_eq!(cycles(), 2);

        at(4 * 60 + 1).await;
        assert_eq!(cycles(), 3);

        service.shutdown().await.unwrap();
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
    async fn panicking_cycle_waits_for_the_next_tick() {
        #[derive(Default)]
        struct Exploding {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl Fetch for Arc<Exploding> {
            async fn fetch_recent_posts(
                &self,
                _: &Handle,
                _: Option<PostId>,
            ) -> Result<Vec<Post>, FetchError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                panic!("the fetcher exploded");
            }
        }

        let (_dir, store) = watching_store(&["alice"]);
        let fetcher = Arc::<Exploding>::default();
        let handle = RelayHandle::default();

        let service = spawn(RelayContext {
            store,
            fetcher: fetcher.clone(),
            delivery: Arc::<FakeDelivery>::default(),
            config: test_config(),
            handle: handle.clone(),
        });

        tokio::time::sleep(Duration::from_millis(300)).await;

        // The next attempt is only after the 3 minutes interval
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(handle.status().state, RelayState::Idle);

        tokio::time::timeout(Duration::from_secs(5), service.shutdown())
            .await
            .expect("the relay loop must stop on shutdown")
            .unwrap();
    }
}
