// Core domain types shared across all Tandem crates.

use serde::{Deserialize, Serialize};

/// Stable identity of a user, as reported by the presence transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
}

/// One connected editor tab's membership in the presence channel.
///
/// `id` is the transport-assigned member id, unique per tab. Multiple
/// sessions may share the same `info.id` (same user, multiple tabs).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub info: UserInfo,
}

impl Session {
    /// Whether this session belongs to the given stable user id.
    pub fn belongs_to(&self, user_id: &str) -> bool {
        self.info.id == user_id
    }
}

/// Identifies the document under collaborative edit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentRef {
    /// Host reference, e.g. `entry::a1b2c3`.
    pub reference: String,
    /// Site the document is being edited in.
    pub site: String,
}

impl DocumentRef {
    pub fn new(reference: impl Into<String>, site: impl Into<String>) -> Self {
        Self { reference: reference.into(), site: site.into() }
    }

    /// Presence channel name: the reference with `::` collapsed to `.`,
    /// suffixed with the site.
    pub fn channel_name(&self) -> String {
        format!("{}.{}", self.reference.replace("::", "."), self.site)
    }
}

/// A user's current focus within the document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FocusEntry {
    pub handle: String,
}
