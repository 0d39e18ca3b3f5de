// In-memory reference implementations of the transport and store ports.
//
// `MemoryHub` is an in-process presence channel: every joined session
// sees membership events, and whispers fan out to every other member.
// `MemoryStore` is an in-memory value store with mutation fan-out. Both
// are used by the integration tests and by single-process embedders; a
// production deployment wires in its own pub/sub transport and store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use serde_json::Value;
use tokio::sync::mpsc;

use tandem_common::types::{Session, UserInfo};

use crate::ports::{
    ChannelEvent, PresenceChannel, PresenceTransport, StoreMutation, SubscriptionId, ValueStore,
};

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ── Presence hub ───────────────────────────────────────────────────

#[derive(Debug)]
struct MemberSlot {
    channel: String,
    session: Session,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

#[derive(Debug, Default)]
struct HubInner {
    next_member: u64,
    members: Vec<MemberSlot>,
    whisper_log: Vec<(String, String)>,
}

/// An in-process presence hub connecting multiple sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport joining this hub as the given user. Each `join` call
    /// on the transport becomes one session (tab).
    pub fn transport(&self, info: UserInfo) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport { inner: self.inner.clone(), info })
    }

    /// Every whisper sent through the hub, as (sender session id, event).
    pub fn whisper_log(&self) -> Vec<(String, String)> {
        lock_unpoisoned(&self.inner).whisper_log.clone()
    }

    /// Sessions currently joined to the named channel.
    pub fn members_of(&self, channel_name: &str) -> Vec<Session> {
        lock_unpoisoned(&self.inner)
            .members
            .iter()
            .filter(|member| member.channel == channel_name)
            .map(|member| member.session.clone())
            .collect()
    }
}

/// One user's connection to a `MemoryHub`.
#[derive(Debug)]
pub struct MemoryTransport {
    inner: Arc<Mutex<HubInner>>,
    info: UserInfo,
}

impl PresenceTransport for MemoryTransport {
    fn join(
        &self,
        channel_name: &str,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Result<Arc<dyn PresenceChannel>> {
        let mut hub = lock_unpoisoned(&self.inner);
        let member_id = hub.next_member;
        hub.next_member += 1;
        let session = Session { id: format!("member-{member_id}"), info: self.info.clone() };

        hub.members.push(MemberSlot {
            channel: channel_name.to_string(),
            session: session.clone(),
            events: events.clone(),
        });

        let members: Vec<Session> = hub
            .members
            .iter()
            .filter(|member| member.channel == channel_name)
            .map(|member| member.session.clone())
            .collect();
        let _ = events.send(ChannelEvent::SubscriptionSucceeded { me: session.clone(), members });

        for member in &hub.members {
            if member.channel == channel_name && member.session.id != session.id {
                let _ = member.events.send(ChannelEvent::MemberAdded(session.clone()));
            }
        }

        Ok(Arc::new(MemoryChannel {
            inner: self.inner.clone(),
            channel: channel_name.to_string(),
            session_id: session.id,
        }))
    }
}

/// A joined channel on a `MemoryHub`.
#[derive(Debug)]
pub struct MemoryChannel {
    inner: Arc<Mutex<HubInner>>,
    channel: String,
    session_id: String,
}

impl PresenceChannel for MemoryChannel {
    fn whisper(&self, event: &str, payload: Value) -> Result<()> {
        let mut hub = lock_unpoisoned(&self.inner);
        hub.whisper_log.push((self.session_id.clone(), event.to_string()));
        for member in &hub.members {
            if member.channel == self.channel && member.session.id != self.session_id {
                let _ = member.events.send(ChannelEvent::Whisper {
                    event: event.to_string(),
                    payload: payload.clone(),
                });
            }
        }
        Ok(())
    }

    fn leave(&self) {
        let mut hub = lock_unpoisoned(&self.inner);
        let Some(position) = hub
            .members
            .iter()
            .position(|member| member.session.id == self.session_id)
        else {
            return;
        };
        let removed = hub.members.remove(position);
        for member in &hub.members {
            if member.channel == removed.channel {
                let _ = member.events.send(ChannelEvent::MemberRemoved(removed.session.clone()));
            }
        }
    }
}

// ── Value store ────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct StoreInner {
    values: HashMap<String, Value>,
    meta: HashMap<String, Value>,
    locked: HashMap<String, UserInfo>,
    subscribers: HashMap<u64, mpsc::UnboundedSender<StoreMutation>>,
    next_subscriber: u64,
}

impl StoreInner {
    fn emit(&mut self, mutation: StoreMutation) {
        self.subscribers.retain(|_, sender| sender.send(mutation.clone()).is_ok());
    }
}

/// An in-memory document value store with mutation fan-out.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(values: HashMap<String, Value>, meta: HashMap<String, Value>) -> Self {
        let store = Self::new();
        {
            let mut inner = lock_unpoisoned(&store.inner);
            inner.values = values;
            inner.meta = meta;
        }
        store
    }

    pub fn value(&self, handle: &str) -> Option<Value> {
        lock_unpoisoned(&self.inner).values.get(handle).cloned()
    }

    pub fn meta_value(&self, handle: &str) -> Option<Value> {
        lock_unpoisoned(&self.inner).meta.get(handle).cloned()
    }

    /// Fields currently rendered locked, with the lock's attribution.
    pub fn locked_fields(&self) -> HashMap<String, UserInfo> {
        lock_unpoisoned(&self.inner).locked.clone()
    }
}

impl ValueStore for MemoryStore {
    fn values(&self) -> HashMap<String, Value> {
        lock_unpoisoned(&self.inner).values.clone()
    }

    fn meta(&self) -> HashMap<String, Value> {
        lock_unpoisoned(&self.inner).meta.clone()
    }

    fn set_values(&self, values: HashMap<String, Value>) {
        lock_unpoisoned(&self.inner).values = values;
    }

    fn set_meta(&self, meta: HashMap<String, Value>) {
        lock_unpoisoned(&self.inner).meta = meta;
    }

    fn set_field_value(&self, handle: &str, value: Value, user: &str) {
        let mut inner = lock_unpoisoned(&self.inner);
        inner.values.insert(handle.to_string(), value.clone());
        inner.emit(StoreMutation::FieldValueSet {
            handle: handle.to_string(),
            value,
            user: user.to_string(),
        });
    }

    fn set_field_meta(&self, handle: &str, value: Value, user: &str) {
        let mut inner = lock_unpoisoned(&self.inner);
        inner.meta.insert(handle.to_string(), value.clone());
        inner.emit(StoreMutation::FieldMetaSet {
            handle: handle.to_string(),
            value,
            user: user.to_string(),
        });
    }

    fn lock_field(&self, handle: &str, by: &UserInfo) {
        lock_unpoisoned(&self.inner).locked.insert(handle.to_string(), by.clone());
    }

    fn unlock_field(&self, handle: &str) {
        lock_unpoisoned(&self.inner).locked.remove(handle);
    }

    fn subscribe(&self, mutations: mpsc::UnboundedSender<StoreMutation>) -> SubscriptionId {
        let mut inner = lock_unpoisoned(&self.inner);
        let id = inner.next_subscriber;
        inner.next_subscriber += 1;
        inner.subscribers.insert(id, mutations);
        SubscriptionId(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        lock_unpoisoned(&self.inner).subscribers.remove(&id.0);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn user(id: &str, name: &str) -> UserInfo {
        UserInfo { id: id.into(), name: name.into() }
    }

    // ── MemoryHub ──────────────────────────────────────────────────

    #[tokio::test]
    async fn first_joiner_sees_only_itself() {
        let hub = MemoryHub::new();
        let transport = hub.transport(user("alice", "Alice"));
        let (tx, mut rx) = mpsc::unbounded_channel();

        transport.join("doc.default", tx).expect("join should succeed");

        let event = rx.recv().await.expect("subscription event should arrive");
        match event {
            ChannelEvent::SubscriptionSucceeded { me, members } => {
                assert_eq!(me.info.id, "alice");
                assert_eq!(members.len(), 1);
                assert_eq!(members[0].id, me.id);
            }
            other => panic!("expected subscription success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_joiner_is_announced_to_the_first() {
        let hub = MemoryHub::new();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        hub.transport(user("alice", "Alice"))
            .join("doc.default", alice_tx)
            .expect("join should succeed");
        alice_rx.recv().await.expect("alice subscription event");

        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        hub.transport(user("bob", "Bob"))
            .join("doc.default", bob_tx)
            .expect("join should succeed");

        match alice_rx.recv().await.expect("member added event") {
            ChannelEvent::MemberAdded(session) => assert_eq!(session.info.id, "bob"),
            other => panic!("expected member added, got {other:?}"),
        }
        match bob_rx.recv().await.expect("bob subscription event") {
            ChannelEvent::SubscriptionSucceeded { members, .. } => assert_eq!(members.len(), 2),
            other => panic!("expected subscription success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn whispers_reach_everyone_but_the_sender() {
        let hub = MemoryHub::new();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        let alice_channel = hub
            .transport(user("alice", "Alice"))
            .join("doc.default", alice_tx)
            .expect("join should succeed");

        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        hub.transport(user("bob", "Bob"))
            .join("doc.default", bob_tx)
            .expect("join should succeed");

        alice_channel
            .whisper("focus", json!({ "handle": "title" }))
            .expect("whisper should succeed");

        // Bob: subscription, then the whisper.
        bob_rx.recv().await.expect("bob subscription event");
        match bob_rx.recv().await.expect("whisper should arrive") {
            ChannelEvent::Whisper { event, payload } => {
                assert_eq!(event, "focus");
                assert_eq!(payload["handle"], "title");
            }
            other => panic!("expected whisper, got {other:?}"),
        }

        // Alice: subscription and bob's join, nothing else.
        alice_rx.recv().await.expect("alice subscription event");
        alice_rx.recv().await.expect("alice member added event");
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_announces_member_removed() {
        let hub = MemoryHub::new();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        hub.transport(user("alice", "Alice"))
            .join("doc.default", alice_tx)
            .expect("join should succeed");

        let (bob_tx, _bob_rx) = mpsc::unbounded_channel();
        let bob_channel = hub
            .transport(user("bob", "Bob"))
            .join("doc.default", bob_tx)
            .expect("join should succeed");

        bob_channel.leave();

        alice_rx.recv().await.expect("alice subscription event");
        alice_rx.recv().await.expect("alice member added event");
        match alice_rx.recv().await.expect("member removed event") {
            ChannelEvent::MemberRemoved(session) => assert_eq!(session.info.id, "bob"),
            other => panic!("expected member removed, got {other:?}"),
        }
        assert!(hub.members_of("doc.default").iter().all(|s| s.info.id != "bob"));
    }

    #[tokio::test]
    async fn channels_are_isolated_by_name() {
        let hub = MemoryHub::new();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        hub.transport(user("alice", "Alice"))
            .join("doc-a.default", alice_tx)
            .expect("join should succeed");

        let (bob_tx, _bob_rx) = mpsc::unbounded_channel();
        let bob_channel = hub
            .transport(user("bob", "Bob"))
            .join("doc-b.default", bob_tx)
            .expect("join should succeed");
        bob_channel.whisper("focus", json!({})).expect("whisper should succeed");

        alice_rx.recv().await.expect("alice subscription event");
        assert!(alice_rx.try_recv().is_err());
    }

    // ── MemoryStore ────────────────────────────────────────────────

    #[tokio::test]
    async fn field_mutations_fan_out_to_subscribers() {
        let store = MemoryStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        store.subscribe(tx);

        store.set_field_value("title", json!("Hello"), "alice");

        match rx.recv().await.expect("mutation should arrive") {
            StoreMutation::FieldValueSet { handle, value, user } => {
                assert_eq!(handle, "title");
                assert_eq!(value, json!("Hello"));
                assert_eq!(user, "alice");
            }
            other => panic!("expected value mutation, got {other:?}"),
        }
        assert_eq!(store.value("title"), Some(json!("Hello")));
    }

    #[tokio::test]
    async fn wholesale_replacement_emits_no_mutations() {
        let store = MemoryStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        store.subscribe(tx);

        let mut values = HashMap::new();
        values.insert("title".to_string(), json!("Hello"));
        store.set_values(values);

        assert!(rx.try_recv().is_err());
        assert_eq!(store.value("title"), Some(json!("Hello")));
    }

    #[tokio::test]
    async fn unsubscribe_stops_mutation_delivery() {
        let store = MemoryStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = store.subscribe(tx);
        store.unsubscribe(id);

        store.set_field_value("title", json!("Hello"), "alice");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn lock_and_unlock_track_attribution() {
        let store = MemoryStore::new();
        store.lock_field("title", &user("alice", "Alice"));
        assert_eq!(
            store.locked_fields().get("title").map(|info| info.name.clone()),
            Some("Alice".to_string())
        );

        store.unlock_field("title");
        assert!(store.locked_fields().is_empty());
    }
}
