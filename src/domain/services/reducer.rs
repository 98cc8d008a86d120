#[cfg(test)]
#[path = "reducer_test.rs"]
mod tests;

use crate::domain::models::StreamTarget;
use crate::domain::models::STREAM_END;

use super::ConversationStore;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Appended,
    Completed,
    Discarded,
}

pub struct StreamReducer {}

impl StreamReducer {
    /// Applies one transport frame to the addressed message. Frames append
    /// verbatim until the end marker arrives. A frame without an active
    /// target is dropped without complaint since one can race a local stop,
    /// and a frame whose session has been deleted is dropped the same way.
    pub fn apply(
        store: &mut ConversationStore,
        target: Option<&StreamTarget>,
        frame: &str,
    ) -> FrameOutcome {
        let Some(target) = target else {
            tracing::debug!(frame = frame, "dropping frame without an active target");
            return FrameOutcome::Discarded;
        };

        if frame == STREAM_END {
            return FrameOutcome::Completed;
        }

        match store.message_mut(target) {
            Some(message) => {
                message.append(frame);
                return FrameOutcome::Appended;
            }
            None => {
                tracing::debug!(
                    session_id = target.session_id,
                    index = target.index,
                    "dropping frame for a deleted session"
                );
                return FrameOutcome::Discarded;
            }
        }
    }
}
