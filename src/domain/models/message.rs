#[cfg(test)]
#[path = "message_test.rs"]
mod tests;

use serde_derive::Deserialize;
use serde_derive::Serialize;

use super::Attachment;
use super::Author;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Normal,
    Error,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Message {
    pub author: Author,
    pub text: String,
    mtype: MessageType,
    pub attachment: Option<Attachment>,
}

impl Message {
    pub fn new(author: Author, text: &str) -> Message {
        return Message {
            author,
            text: text.to_string().replace('\t', "  "),
            mtype: MessageType::Normal,
            attachment: None,
        };
    }

    pub fn new_with_type(author: Author, mtype: MessageType, text: &str) -> Message {
        return Message {
            author,
            text: text.to_string().replace('\t', "  "),
            mtype,
            attachment: None,
        };
    }

    pub fn message_type(&self) -> MessageType {
        return self.mtype;
    }

    pub fn append(&mut self, text: &str) {
        self.text += &text.replace('\t', "  ");
    }

    /// Empties the message so its slot can receive a regenerated answer.
    pub fn clear(&mut self) {
        self.text = String::new();
        self.mtype = MessageType::Normal;
        self.attachment = None;
    }

    /// Replaces the message content in a single mutation.
    pub fn overwrite(&mut self, text: &str) {
        self.text = text.to_string().replace('\t', "  ");
    }

    /// Flags the message as errored, keeping whatever text has arrived.
    pub fn mark_error(&mut self) {
        self.mtype = MessageType::Error;
    }
}
