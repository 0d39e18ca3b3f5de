// Focus tracking and advisory field locks.

use std::collections::HashMap;

use tracing::debug;

use tandem_common::types::{FocusEntry, UserInfo};

use crate::ports::ValueStore;
use crate::presence::PresenceRegistry;

/// Maps each identity to the field it currently has focused, and issues
/// lock/unlock side effects against the value store.
///
/// Locks are advisory: a focused field renders locked for everyone else,
/// but nothing prevents a buggy peer from writing to it anyway.
#[derive(Debug, Default)]
pub struct FieldLockCoordinator {
    focus: HashMap<String, FocusEntry>,
}

impl FieldLockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record focus. A new focus for the same identity silently replaces
    /// the previous entry; no blur is required in between.
    pub fn focus(&mut self, user: &str, handle: &str) {
        self.focus.insert(user.to_string(), FocusEntry { handle: handle.to_string() });
    }

    pub fn blur(&mut self, user: &str) {
        self.focus.remove(user);
    }

    /// Focus plus a lock side effect attributed to the focusing user.
    pub fn focus_and_lock(
        &mut self,
        store: &dyn ValueStore,
        registry: &PresenceRegistry,
        user: &str,
        handle: &str,
    ) {
        self.focus(user, handle);
        let info = registry.user_info(user).unwrap_or_else(|| {
            debug!(user, handle, "focus from identity not in presence registry");
            UserInfo { id: user.to_string(), name: user.to_string() }
        });
        store.lock_field(handle, &info);
    }

    /// Blur plus an unlock side effect. The handle falls back to whatever
    /// the identity currently has focused; with nothing to resolve this is
    /// a no-op. Returns the handle that was unlocked.
    pub fn blur_and_unlock(
        &mut self,
        store: &dyn ValueStore,
        user: &str,
        handle: Option<&str>,
    ) -> Option<String> {
        let handle = handle
            .map(str::to_string)
            .or_else(|| self.focus.get(user).map(|entry| entry.handle.clone()));
        let Some(handle) = handle else {
            debug!(user, "no focused field to unlock");
            return None;
        };
        self.blur(user);
        store.unlock_field(&handle);
        Some(handle)
    }

    pub fn focused_handle(&self, user: &str) -> Option<&str> {
        self.focus.get(user).map(|entry| entry.handle.as_str())
    }

    /// Snapshot of the focus map, for rendezvous payloads.
    pub fn snapshot(&self) -> HashMap<String, FocusEntry> {
        self.focus.clone()
    }
}
