// Whisper event names and payloads for the collaboration protocol.
//
// Whispers are ephemeral, at-most-once, unordered point-to-multipoint
// messages carried by the presence channel. Any event may also appear
// chunked under `chunked-{event}` when its payload exceeds the size
// threshold (see `protocol::chunk`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::FocusEntry;

/// Prefix for the chunked variant of any whisper event.
pub const CHUNKED_PREFIX: &str = "chunked-";

/// Prefix for session-addressed initialize-state events.
pub const INITIALIZE_STATE_PREFIX: &str = "initialize-state-for-";

/// All whisper events in the collaboration protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WhisperEvent {
    /// A field's value changed.
    Updated,
    /// A field's metadata changed (possibly allow-list filtered).
    MetaUpdated,
    /// A user focused a field.
    Focus,
    /// A user blurred a field.
    Blur,
    /// Request that a specific user's editor be unlocked.
    ForceUnlock,
    /// The entry was saved.
    Saved,
    /// The entry was published.
    Published,
    /// The entry was restored to another revision.
    RevisionRestored,
    /// Full-state rendezvous addressed to one newly joined session.
    InitializeState { session_id: String },
}

impl WhisperEvent {
    /// Wire name of this event.
    pub fn name(&self) -> String {
        match self {
            Self::Updated => "updated".into(),
            Self::MetaUpdated => "meta-updated".into(),
            Self::Focus => "focus".into(),
            Self::Blur => "blur".into(),
            Self::ForceUnlock => "force-unlock".into(),
            Self::Saved => "saved".into(),
            Self::Published => "published".into(),
            Self::RevisionRestored => "revision-restored".into(),
            Self::InitializeState { session_id } => {
                format!("{INITIALIZE_STATE_PREFIX}{session_id}")
            }
        }
    }

    /// Wire name of the chunked variant of this event.
    pub fn chunked_name(&self) -> String {
        format!("{CHUNKED_PREFIX}{}", self.name())
    }

    pub fn parse(name: &str) -> Option<Self> {
        if let Some(session_id) = name.strip_prefix(INITIALIZE_STATE_PREFIX) {
            return Some(Self::InitializeState { session_id: session_id.to_string() });
        }
        match name {
            "updated" => Some(Self::Updated),
            "meta-updated" => Some(Self::MetaUpdated),
            "focus" => Some(Self::Focus),
            "blur" => Some(Self::Blur),
            "force-unlock" => Some(Self::ForceUnlock),
            "saved" => Some(Self::Saved),
            "published" => Some(Self::Published),
            "revision-restored" => Some(Self::RevisionRestored),
            _ => None,
        }
    }
}

/// Strip the chunked prefix from an event name, if present.
pub fn strip_chunked(name: &str) -> Option<&str> {
    name.strip_prefix(CHUNKED_PREFIX)
}

/// A single field's value (or metadata) change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldChangePayload {
    pub handle: String,
    pub value: Value,
    /// Originating identity: the editing user's stable id while the change
    /// is local, rewritten to the sender's session id on broadcast.
    pub user: String,
}

/// Focus or blur announcement. Blur may omit the handle; receivers resolve
/// it from their focus map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FocusPayload {
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

/// Request that another user's editor be unlocked.
///
/// Addressed by stable user id, so every session of the target accepts it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ForceUnlockPayload {
    pub target_user: String,
    /// Session id of the requester; receivers resolve the display name.
    pub origin_user: String,
}

/// Attribution for saved / revision-restored announcements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActorPayload {
    pub user: String,
}

/// Publish announcement with its optional publish message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishedPayload {
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Full-state rendezvous payload for a newly joined session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StatePayload {
    pub values: HashMap<String, Value>,
    /// Per-field metadata, allow-list filtered by the sender.
    pub meta: HashMap<String, Value>,
    pub focus: HashMap<String, FocusEntry>,
}
