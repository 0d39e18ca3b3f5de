// Ports supplied by the embedder: transport, value store, notifications,
// host hooks, and id generation. The engine owns no ambient globals;
// everything it touches arrives through `SessionContext`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tokio::sync::mpsc;

use tandem_common::types::{Session, UserInfo};

use crate::config::CollabConfig;

/// Events surfaced by a joined presence channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Subscription established; carries the local session and the
    /// current member list (including self).
    SubscriptionSucceeded { me: Session, members: Vec<Session> },
    MemberAdded(Session),
    MemberRemoved(Session),
    /// An ephemeral whisper from another session.
    Whisper { event: String, payload: Value },
}

/// A joined presence channel.
pub trait PresenceChannel: Send + Sync {
    /// Fire-and-forget ephemeral send to every other member. No delivery
    /// guarantee, no ordering, no acknowledgement.
    fn whisper(&self, event: &str, payload: Value) -> Result<()>;
    fn leave(&self);
}

/// The pub/sub presence transport.
pub trait PresenceTransport: Send + Sync {
    /// Join a presence channel; membership events and whispers are
    /// delivered on `events`.
    fn join(
        &self,
        channel_name: &str,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Result<Arc<dyn PresenceChannel>>;
}

/// A mutation observed on the external value store.
///
/// `user` is the identity the host attributes the mutation to: the stable
/// user id for local edits, or whatever identity a remote apply carried.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreMutation {
    FieldValueSet { handle: String, value: Value, user: String },
    FieldMetaSet { handle: String, value: Value, user: String },
}

/// Token identifying a store mutation subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(pub u64);

/// The document's authoritative field-value store.
///
/// The store's own mutations are synchronous; the engine relies on that
/// plus deep-equality change detection, not locking, to avoid rebroadcast
/// storms.
pub trait ValueStore: Send + Sync {
    fn values(&self) -> HashMap<String, Value>;
    fn meta(&self) -> HashMap<String, Value>;
    /// Replace all values wholesale. Does not emit per-field mutations.
    fn set_values(&self, values: HashMap<String, Value>);
    /// Replace all metadata wholesale. Does not emit per-field mutations.
    fn set_meta(&self, meta: HashMap<String, Value>);
    fn set_field_value(&self, handle: &str, value: Value, user: &str);
    fn set_field_meta(&self, handle: &str, value: Value, user: &str);
    /// Advisory lock side effect, attributed for UI rendering.
    fn lock_field(&self, handle: &str, by: &UserInfo);
    fn unlock_field(&self, handle: &str);
    fn subscribe(&self, mutations: mpsc::UnboundedSender<StoreMutation>) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Audio cues accompanying presence notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCue {
    BuddyIn,
    BuddyOut,
}

/// User-facing notification sink.
pub trait Notifier: Send + Sync {
    fn success(&self, message: &str);
    /// Informational notice that stays until dismissed.
    fn info_sticky(&self, message: &str);
    fn audio(&self, cue: AudioCue);
    /// Blocking confirmation; the sink reloads the client on
    /// acknowledgement.
    fn blocking(&self, message: &str);
}

/// Host-side effects the engine triggers.
pub trait HostHooks: Send + Sync {
    /// A peer saved the document; refresh the host's dirty state.
    fn mark_saved(&self);
    /// Drop focus from whatever editor element is currently active.
    fn blur_active_editor(&self);
}

/// Message-id generation, injected so tests can supply deterministic ids.
pub trait IdSource: Send + Sync {
    fn message_id(&self) -> String;
}

/// Default id source backed by random UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIds;

impl IdSource for UuidIds {
    fn message_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Everything a collaboration session needs from its embedder.
#[derive(Clone)]
pub struct SessionContext {
    pub transport: Arc<dyn PresenceTransport>,
    pub store: Arc<dyn ValueStore>,
    pub notifier: Arc<dyn Notifier>,
    pub hooks: Arc<dyn HostHooks>,
    pub ids: Arc<dyn IdSource>,
    pub config: CollabConfig,
}
