#[cfg(test)]
#[path = "wire_test.rs"]
mod tests;

use super::Attachment;

/// Reserved frame marking the end of a streamed answer.
pub const STREAM_END: &str = "[END]";

/// A payload bound for the duplex transport. Prompts without an attachment
/// are sent as the raw prompt text; prompts with one are wrapped in a JSON
/// envelope. `Cancel` is sent before an intentional close so a backend may
/// abort generation early (backends that predate it ignore the frame).
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundPayload {
    Prompt {
        prompt: String,
        attachment: Option<Attachment>,
    },
    Cancel,
}

impl OutboundPayload {
    pub fn encode(&self) -> String {
        match self {
            OutboundPayload::Prompt { prompt, attachment } => {
                if let Some(attachment) = attachment {
                    return serde_json::json!({ "prompt": prompt, "attachment": attachment })
                        .to_string();
                }
                return prompt.to_string();
            }
            OutboundPayload::Cancel => {
                return serde_json::json!({ "type": "cancel" }).to_string();
            }
        }
    }
}
