#[cfg(test)]
#[path = "session_test.rs"]
mod tests;

use chrono::Local;
use chrono::SecondsFormat;
use serde_derive::Deserialize;
use serde_derive::Serialize;
use uuid::Uuid;

use super::Author;
use super::Message;

const TITLE_MAX_LENGTH: usize = 64;

#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    pub messages: Vec<Message>,
}

impl Default for Session {
    fn default() -> Session {
        return Session::new();
    }
}

impl Session {
    pub fn new() -> Session {
        let timestamp = Local::now().to_rfc3339_opts(SecondsFormat::Secs, false);
        return Session {
            id: Session::create_id(),
            title: String::new(),
            created_at: timestamp.clone(),
            updated_at: timestamp,
            messages: vec![],
        };
    }

    pub fn create_id() -> String {
        return Uuid::new_v4()
            .to_string()
            .split('-')
            .enumerate()
            .filter_map(|(idx, str)| {
                if idx > 1 {
                    return None;
                }
                return Some(str);
            })
            .collect::<Vec<&str>>()
            .join("-");
    }

    pub fn touch(&mut self) {
        self.updated_at = Local::now().to_rfc3339_opts(SecondsFormat::Secs, false);
    }

    /// Sets the title from the first user message if one hasn't been set yet.
    pub fn derive_title(&mut self) {
        if !self.title.is_empty() {
            return;
        }

        let first_user_message = self
            .messages
            .iter()
            .find(|message| return message.author == Author::User);

        if let Some(message) = first_user_message {
            let mut line = message.text.split('\n').collect::<Vec<_>>()[0].to_string();
            if line.len() > TITLE_MAX_LENGTH {
                line = format!("{}...", &line[..TITLE_MAX_LENGTH - 3]);
            }
            self.title = line;
        }
    }
}

/// Addresses the one message currently receiving streamed content. Keyed by
/// session id rather than a bare index so a stream keeps following its
/// session even when the user switches to another one mid-generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamTarget {
    pub session_id: String,
    pub index: usize,
}
