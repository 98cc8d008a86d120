#[cfg(test)]
#[path = "conversation_test.rs"]
mod tests;

use crate::domain::models::Message;
use crate::domain::models::Session;
use crate::domain::models::StreamTarget;

/// Holds every session loaded in memory, addressable by id, with exactly one
/// marked current. Mutation happens only through the controller and reducer;
/// external collaborators read snapshots to persist them.
pub struct ConversationStore {
    sessions: Vec<Session>,
    current_id: String,
}

impl Default for ConversationStore {
    fn default() -> ConversationStore {
        return ConversationStore::new(Session::new());
    }
}

impl ConversationStore {
    pub fn new(session: Session) -> ConversationStore {
        let current_id = session.id.to_string();
        return ConversationStore {
            sessions: vec![session],
            current_id,
        };
    }

    pub fn sessions(&self) -> &[Session] {
        return &self.sessions;
    }

    pub fn current_id(&self) -> &str {
        return &self.current_id;
    }

    pub fn current(&self) -> &Session {
        return self
            .sessions
            .iter()
            .find(|session| return session.id == self.current_id)
            .unwrap();
    }

    pub fn current_mut(&mut self) -> &mut Session {
        let current_id = self.current_id.to_string();
        return self
            .sessions
            .iter_mut()
            .find(|session| return session.id == current_id)
            .unwrap();
    }

    pub fn session(&self, session_id: &str) -> Option<&Session> {
        return self
            .sessions
            .iter()
            .find(|session| return session.id == session_id);
    }

    pub fn session_mut(&mut self, session_id: &str) -> Option<&mut Session> {
        return self
            .sessions
            .iter_mut()
            .find(|session| return session.id == session_id);
    }

    pub fn message_mut(&mut self, target: &StreamTarget) -> Option<&mut Message> {
        return self
            .session_mut(&target.session_id)
            .and_then(|session| return session.messages.get_mut(target.index));
    }

    /// Appends a message, returning its index. `None` when the session no
    /// longer exists.
    pub fn push_message(&mut self, session_id: &str, message: Message) -> Option<usize> {
        let session = self.session_mut(session_id)?;
        session.messages.push(message);
        session.derive_title();
        return Some(session.messages.len() - 1);
    }

    /// Inserts a message at a specific index, shifting later messages. Only
    /// used while regenerating an edited prompt's answer.
    pub fn insert_message(&mut self, session_id: &str, index: usize, message: Message) -> bool {
        let Some(session) = self.session_mut(session_id) else {
            return false;
        };
        if index > session.messages.len() {
            return false;
        }
        session.messages.insert(index, message);
        return true;
    }

    /// Creates a fresh session and makes it current, returning its id.
    pub fn new_session(&mut self) -> String {
        let session = Session::new();
        let session_id = session.id.to_string();
        self.sessions.push(session);
        self.current_id = session_id.to_string();
        return session_id;
    }

    pub fn switch_session(&mut self, session_id: &str) -> bool {
        if self.session(session_id).is_none() {
            return false;
        }
        self.current_id = session_id.to_string();
        return true;
    }

    /// Removes a session. Removing the current one makes the most recently
    /// added remaining session current, creating a fresh one if none is left.
    pub fn delete_session(&mut self, session_id: &str) -> bool {
        let Some(position) = self
            .sessions
            .iter()
            .position(|session| return session.id == session_id)
        else {
            return false;
        };

        self.sessions.remove(position);
        if self.current_id == session_id {
            match self.sessions.last() {
                Some(session) => self.current_id = session.id.to_string(),
                None => {
                    self.new_session();
                }
            }
        }
        return true;
    }
}
