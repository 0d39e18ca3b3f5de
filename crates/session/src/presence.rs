// Presence bookkeeping for the active channel membership.

use tandem_common::types::{Session, UserInfo};

/// Tracks the sessions currently present in the channel.
///
/// Sessions (tabs) are distinct from the stable users behind them: join
/// and leave notifications fire only when a user gains their first or
/// loses their last session, and broadcasts are suppressed entirely while
/// the local session is alone.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    users: Vec<Session>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the member list with the initial presence state.
    pub fn set_users(&mut self, users: Vec<Session>) {
        self.users = users;
    }

    pub fn add_user(&mut self, session: Session) {
        self.users.push(session);
    }

    /// Remove a member by session id.
    pub fn remove_user(&mut self, session_id: &str) {
        self.users.retain(|session| session.id != session_id);
    }

    /// True when nobody else is present: broadcasting would have no
    /// receiver.
    pub fn is_alone(&self) -> bool {
        self.users.len() <= 1
    }

    /// Whether any present session belongs to this stable user id.
    pub fn knows_user(&self, user_id: &str) -> bool {
        self.users.iter().any(|session| session.belongs_to(user_id))
    }

    /// Resolve a session id or stable user id to the user behind it.
    pub fn user_info(&self, identity: &str) -> Option<UserInfo> {
        self.users
            .iter()
            .find(|session| session.id == identity || session.info.id == identity)
            .map(|session| session.info.clone())
    }

    /// Resolve a session id or stable user id to a display name.
    pub fn display_name(&self, identity: &str) -> Option<String> {
        self.user_info(identity).map(|info| info.name)
    }

    pub fn sessions(&self) -> &[Session] {
        &self.users
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }
}
