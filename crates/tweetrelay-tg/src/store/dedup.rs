//! Tracks which posts were already relayed to not forward them twice.
//!
//! For every watched account we remember the ID of the newest post that was
//! successfully delivered. Twitter IDs grow with time, so everything at or
//! below the cursor is considered seen.
use crate::fetch::PostId;
use crate::prelude::*;
use crate::store::{Handle, Store};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct Cursors(BTreeMap<Handle, PostId>);

impl Cursors {
    pub(crate) fn get(&self, handle: &Handle) -> Option<PostId> {
        self.0.get(handle).copied()
    }

    pub(crate) fn remove(&mut self, handle: &Handle) -> Option<PostId> {
        self.0.remove(handle)
    }

    /// Removes the cursors of the accounts not listed in `accounts` and
    /// returns the handles of the removed ones.
    pub(crate) fn retain_accounts(&mut self, accounts: &[Handle]) -> Vec<Handle> {
        let mut orphans = vec![];
        self.0.retain(|handle, _| {
            let watched = accounts.contains(handle);
            if !watched {
                orphans.push(handle.clone());
            }
            watched
        });
        orphans
    }
}

impl Store {
    pub(crate) fn cursor(&self, handle: &Handle) -> Option<PostId> {
        self.state.lock().cursors.get(handle)
    }

    pub(crate) fn is_new(&self, handle: &Handle, post: PostId) -> bool {
        self.cursor(handle).map_or(true, |cursor| post > cursor)
    }

    /// Records that the post was delivered. Must be called only after the
    /// delivery succeeded.
    pub(crate) fn mark_seen(&self, handle: &Handle, post: PostId) -> Result {
        let mut state = self.state.lock();

        if !state.config.accounts.contains(handle) {
            debug!(
                %handle,
                %post,
                "Ignoring the cursor of an account that was removed during the relay cycle"
            );
            return Ok(());
        }

        if state.cursors.get(handle).is_some_and(|cursor| cursor >= post) {
            return Ok(());
        }

        let mut cursors = state.cursors.clone();
        cursors.0.insert(handle.clone(), post);

        self.cursors_file.save(&cursors)?;
        state.cursors = cursors;

        Ok(())
    }
}
