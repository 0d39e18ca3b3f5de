// Change detection and debounced broadcast scheduling for field values
// and metadata.
//
// Every store mutation is compared against the last value this process
// broadcast or received for that handle; repeats are dropped. Genuine
// changes are remembered synchronously (so the next mutation compares
// against the new value) and coalesced per (handle, kind) within a quiet
// window — the last payload wins. Whether a drained broadcast actually
// goes out is decided at drain time by the echo-suppression rule.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

use tandem_common::protocol::whisper::FieldChangePayload;

/// Which stream a change belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Value,
    Meta,
}

/// Secondary sessions carry this delimiter in their identity; their edits
/// are replays of someone else's and are never re-broadcast.
pub const SECONDARY_SESSION_DELIMITER: char = '#';

#[derive(Debug)]
struct PendingBroadcast {
    payload: FieldChangePayload,
    last_change: Instant,
}

/// Observes store mutations, suppresses repeats, and coalesces rapid
/// edits into one broadcast per field per quiet window.
#[derive(Debug)]
pub struct ValueSyncEngine {
    window: Duration,
    last_values: HashMap<String, Value>,
    last_meta: HashMap<String, Value>,
    pending: HashMap<(String, ChangeKind), PendingBroadcast>,
}

impl ValueSyncEngine {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_values: HashMap::new(),
            last_meta: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Seed the snapshots from the store's current state, so startup
    /// values are not mistaken for fresh edits.
    pub fn seed(&mut self, values: HashMap<String, Value>, meta: HashMap<String, Value>) {
        self.last_values = values;
        self.last_meta = meta;
    }

    /// Record an observed mutation. Returns false when the payload is
    /// deep-equal to the remembered state (nothing scheduled).
    pub fn observe(&mut self, kind: ChangeKind, payload: FieldChangePayload, now: Instant) -> bool {
        let snapshot = match kind {
            ChangeKind::Value => &mut self.last_values,
            ChangeKind::Meta => &mut self.last_meta,
        };
        if snapshot.get(&payload.handle).unwrap_or(&Value::Null) == &payload.value {
            debug!(handle = %payload.handle, ?kind, "change is a repeat, skipping");
            return false;
        }

        // Remember synchronously: a second mutation for the same field
        // must compare against this value, not the stale one.
        snapshot.insert(payload.handle.clone(), payload.value.clone());
        self.pending.insert(
            (payload.handle.clone(), kind),
            PendingBroadcast { payload, last_change: now },
        );
        true
    }

    /// Drain broadcasts whose quiet window has elapsed.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<(ChangeKind, FieldChangePayload)> {
        let window = self.window;
        let mut ready = Vec::new();
        self.pending.retain(|(_, kind), pending| {
            if now.duration_since(pending.last_change) >= window {
                ready.push((*kind, pending.payload.clone()));
                false
            } else {
                true
            }
        });
        ready
    }

    /// Deadline of the earliest pending broadcast, or None if idle.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.last_change + self.window).min()
    }

    /// Number of changes still inside their quiet window.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Last remembered metadata for a handle, used to rebuild full
    /// metadata from a partial update.
    pub fn last_meta(&self, handle: &str) -> Option<&Value> {
        self.last_meta.get(handle)
    }

    /// The whole remembered metadata map, used at join rendezvous.
    pub fn last_meta_map(&self) -> &HashMap<String, Value> {
        &self.last_meta
    }

    /// Echo suppression, applied when a pending broadcast drains: only
    /// locally originated edits go out. Changes applied from a remote
    /// whisper re-enter the store tagged with the sender's session
    /// identity and must not bounce back.
    pub fn should_broadcast(user: &str, self_user_id: &str) -> bool {
        user == self_user_id && !user.contains(SECONDARY_SESSION_DELIMITER)
    }
}
