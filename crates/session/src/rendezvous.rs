// Join-time state rendezvous.
//
// Every already-present session pushes its full state to a newcomer, so
// the newcomer applies whichever copy lands first and ignores the rest.
// Application is guarded rather than deduplicated: the payload is a full
// overwrite, so applying one copy is enough and applying none is a bug.

use tracing::debug;

use tandem_common::protocol::whisper::StatePayload;

use crate::lock::FieldLockCoordinator;
use crate::meta;
use crate::ports::ValueStore;
use crate::presence::PresenceRegistry;
use crate::sync::ValueSyncEngine;

/// Exactly-once application of the initialize-state payload.
#[derive(Debug, Default)]
pub struct StateRendezvous {
    applied: bool,
}

impl StateRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an initialize payload has already been applied.
    pub fn is_applied(&self) -> bool {
        self.applied
    }

    /// Build the full-state payload pushed to a newly joined session:
    /// all values, allow-list-filtered metadata, and the focus map.
    pub fn build_payload(store: &dyn ValueStore, locks: &FieldLockCoordinator) -> StatePayload {
        StatePayload {
            values: store.values(),
            meta: meta::filter_all(&store.meta()),
            focus: locks.snapshot(),
        }
    }

    /// Apply a received initialize payload. Returns false for every copy
    /// after the first.
    pub fn apply(
        &mut self,
        payload: StatePayload,
        store: &dyn ValueStore,
        sync: &ValueSyncEngine,
        locks: &mut FieldLockCoordinator,
        registry: &PresenceRegistry,
    ) -> bool {
        if self.applied {
            debug!("initialize state already applied, ignoring duplicate");
            return false;
        }

        store.set_values(payload.values);
        store.set_meta(meta::restore_all(&payload.meta, sync.last_meta_map()));
        for (user, entry) in payload.focus {
            locks.focus_and_lock(store, registry, &user, &entry.handle);
        }

        self.applied = true;
        true
    }
}
