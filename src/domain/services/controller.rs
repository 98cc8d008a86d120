#[cfg(test)]
#[path = "controller_test.rs"]
mod tests;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::domain::models::Attachment;
use crate::domain::models::Author;
use crate::domain::models::Dispatch;
use crate::domain::models::Event;
use crate::domain::models::FallbackResponse;
use crate::domain::models::Message;
use crate::domain::models::OutboundPayload;
use crate::domain::models::StreamTarget;
use crate::infrastructure::fallback::Requester;
use crate::infrastructure::transport::ConnectionState;
use crate::infrastructure::transport::WebSocketTransport;

use super::ConversationStore;
use super::FrameOutcome;
use super::StreamReducer;

pub const ANSWER_FAILED: &str =
    "Something went wrong while reaching the assistant. Please try again.";

/// What handling an event did to the conversation, so the caller can render
/// and persist without reaching into controller internals. Chunks are only
/// reported for the current session; completions always carry the session id
/// so an off-screen session can still be snapshotted.
pub enum Effect {
    Chunk(String),
    StreamDone {
        session_id: String,
    },
    StreamInterrupted {
        session_id: String,
    },
    AtomicAnswer {
        session_id: String,
        text: String,
        errored: bool,
    },
    Quiet,
}

/// Single entry point for producing agent answers. Owns the conversation
/// store, the transport handle, and the one in-flight generation; every
/// failure ends as a message mutation, never as an error returned to the
/// caller.
pub struct ChatController {
    store: ConversationStore,
    transport: WebSocketTransport,
    fallback: Arc<dyn Requester + Send + Sync>,
    event_tx: mpsc::UnboundedSender<Event>,
    target: Option<StreamTarget>,
    pending: Option<OutboundPayload>,
    turn: u64,
    waiting: bool,
}

impl ChatController {
    pub fn new(
        store: ConversationStore,
        transport: WebSocketTransport,
        fallback: Arc<dyn Requester + Send + Sync>,
        event_tx: mpsc::UnboundedSender<Event>,
    ) -> ChatController {
        return ChatController {
            store,
            transport,
            fallback,
            event_tx,
            target: None,
            pending: None,
            turn: 0,
            waiting: false,
        };
    }

    pub fn store(&self) -> &ConversationStore {
        return &self.store;
    }

    pub fn target(&self) -> Option<&StreamTarget> {
        return self.target.as_ref();
    }

    pub fn is_waiting(&self) -> bool {
        return self.waiting;
    }

    pub fn connection_state(&self) -> ConnectionState {
        return self.transport.state();
    }

    pub fn connect(&mut self) {
        self.transport.connect();
    }

    pub fn new_session(&mut self) -> String {
        return self.store.new_session();
    }

    pub fn switch_session(&mut self, session_id: &str) -> bool {
        return self.store.switch_session(session_id);
    }

    pub fn delete_session(&mut self, session_id: &str) -> bool {
        return self.store.delete_session(session_id);
    }

    /// Appends the prompt and an empty answer slot to the current session,
    /// then dispatches. Returns which path carried the request.
    pub fn send(&mut self, prompt: &str, attachment: Option<Attachment>) -> Dispatch {
        self.detach_active();

        let session_id = self.store.current_id().to_string();
        let mut user_message = Message::new(Author::User, prompt);
        user_message.attachment = attachment.clone();
        self.store.push_message(&session_id, user_message);

        let placeholder = Message::new(Author::Agent, "");
        let index = self.store.push_message(&session_id, placeholder).unwrap();

        self.activate(StreamTarget { session_id, index });
        return self.dispatch(OutboundPayload::Prompt {
            prompt: prompt.to_string(),
            attachment,
        });
    }

    /// Rewrites the user message at `index` and regenerates only its paired
    /// answer. When the next message is an agent answer its slot is cleared
    /// and reused; otherwise a fresh slot is inserted right after the edited
    /// prompt. Everything beyond the pair is left alone. Returns `None` when
    /// `index` doesn't address a user message.
    pub fn edit_and_resend(
        &mut self,
        index: usize,
        prompt: &str,
        attachment: Option<Attachment>,
    ) -> Option<Dispatch> {
        let session_id = self.store.current_id().to_string();
        let is_user_message = self
            .store
            .current()
            .messages
            .get(index)
            .map(|message| return message.author == Author::User)
            .unwrap_or(false);
        if !is_user_message {
            tracing::warn!(index = index, "ignoring edit of a non-user message");
            return None;
        }

        self.detach_active();

        let edited = self.store.message_mut(&StreamTarget {
            session_id: session_id.to_string(),
            index,
        })?;
        edited.overwrite(prompt);
        edited.attachment = attachment.clone();

        let answer_index = index + 1;
        let reusable = self
            .store
            .current()
            .messages
            .get(answer_index)
            .map(|message| return message.author == Author::Agent)
            .unwrap_or(false);
        if reusable {
            if let Some(answer) = self.store.message_mut(&StreamTarget {
                session_id: session_id.to_string(),
                index: answer_index,
            }) {
                answer.clear();
            }
        } else {
            self.store.insert_message(
                &session_id,
                answer_index,
                Message::new(Author::Agent, ""),
            );
        }

        self.activate(StreamTarget {
            session_id,
            index: answer_index,
        });
        return Some(self.dispatch(OutboundPayload::Prompt {
            prompt: prompt.to_string(),
            attachment,
        }));
    }

    /// Stops the in-flight generation locally: the answer keeps whatever text
    /// has arrived, a cancel frame is offered to the backend when the
    /// connection is open, and the transport closes without auto-reconnect
    /// until the next explicit send. Idempotent.
    pub fn stop(&mut self) {
        self.target = None;
        self.pending = None;
        self.waiting = false;

        if self.transport.state() == ConnectionState::Open {
            if let Err(err) = self.transport.send(OutboundPayload::Cancel.encode()) {
                tracing::warn!(error = ?err, "failed to send cancel before close");
            }
        }
        self.transport.close();
    }

    /// Decides the path for one request: an open transport streams it, any
    /// other state falls back to the atomic requester immediately while the
    /// transport (re)connects in the background for future requests.
    fn dispatch(&mut self, payload: OutboundPayload) -> Dispatch {
        if self.transport.state() == ConnectionState::Open {
            let frame = payload.encode();
            self.pending = Some(payload);
            if let Err(err) = self.transport.send(frame) {
                // The connection is going down; the closed event will route
                // this request through the fallback.
                tracing::warn!(error = ?err, "streamed dispatch failed");
            }
            return Dispatch::Streamed;
        }

        self.transport.connect();
        self.spawn_fallback(payload);
        return Dispatch::Atomic;
    }

    fn spawn_fallback(&mut self, payload: OutboundPayload) {
        let Some(target) = self.target.clone() else {
            return;
        };
        let OutboundPayload::Prompt { prompt, attachment } = payload else {
            return;
        };

        let fallback = Arc::clone(&self.fallback);
        let event_tx = self.event_tx.clone();
        let turn = self.turn;
        tokio::spawn(async move {
            let result = fallback.complete(&prompt, attachment.as_ref()).await;
            let _ = event_tx.send(Event::FallbackResponse(FallbackResponse {
                target,
                turn,
                result,
            }));
        });
    }

    fn activate(&mut self, target: StreamTarget) {
        self.turn += 1;
        self.target = Some(target);
        self.waiting = true;
    }

    /// Silently detaches the previous generation so its slot simply stops
    /// receiving frames. The invariant that at most one stream target exists
    /// lives here.
    fn detach_active(&mut self) {
        if let Some(target) = self.target.take() {
            tracing::debug!(
                session_id = target.session_id,
                index = target.index,
                "detaching previous stream target"
            );
        }
        self.pending = None;
        self.waiting = false;
    }

    pub fn handle_event(&mut self, event: Event) -> Effect {
        match event {
            Event::TransportOpened { generation } => {
                self.transport.handle_opened(generation);
                return Effect::Quiet;
            }
            Event::TransportClosed { generation } => {
                if self.transport.handle_closed(generation) {
                    return self.handle_stream_interrupted();
                }
                return Effect::Quiet;
            }
            Event::TransportRetry => {
                self.transport.handle_retry();
                return Effect::Quiet;
            }
            Event::TransportFrame { generation, frame } => {
                if !self.transport.is_current(generation) {
                    tracing::debug!("dropping frame from a stale connection");
                    return Effect::Quiet;
                }
                return self.handle_frame(&frame);
            }
            Event::FallbackResponse(response) => {
                return self.handle_fallback_response(response);
            }
        }
    }

    fn handle_frame(&mut self, frame: &str) -> Effect {
        let outcome = StreamReducer::apply(&mut self.store, self.target.as_ref(), frame);
        match outcome {
            FrameOutcome::Appended => {
                let visible = self
                    .target
                    .as_ref()
                    .map(|target| return target.session_id == self.store.current_id())
                    .unwrap_or(false);
                if visible {
                    return Effect::Chunk(frame.to_string());
                }
                return Effect::Quiet;
            }
            FrameOutcome::Completed => {
                let Some(target) = self.target.take() else {
                    return Effect::Quiet;
                };
                self.pending = None;
                self.waiting = false;
                if let Some(session) = self.store.session_mut(&target.session_id) {
                    session.touch();
                }
                return Effect::StreamDone {
                    session_id: target.session_id,
                };
            }
            FrameOutcome::Discarded => {
                return Effect::Quiet;
            }
        }
    }

    fn handle_fallback_response(&mut self, response: FallbackResponse) -> Effect {
        if self.target.as_ref() != Some(&response.target) || self.turn != response.turn {
            tracing::debug!("dropping superseded fallback response");
            return Effect::Quiet;
        }

        self.target = None;
        self.pending = None;
        self.waiting = false;

        let Some(message) = self.store.message_mut(&response.target) else {
            return Effect::Quiet;
        };

        let errored = match response.result {
            Ok(answer) => {
                message.overwrite(&answer);
                false
            }
            Err(err) => {
                tracing::error!(error = ?err, "fallback request failed");
                message.overwrite(ANSWER_FAILED);
                message.mark_error();
                true
            }
        };
        let text = message.text.to_string();

        if let Some(session) = self.store.session_mut(&response.target.session_id) {
            session.touch();
        }
        return Effect::AtomicAnswer {
            session_id: response.target.session_id,
            text,
            errored,
        };
    }

    /// The live connection dropped. When a streamed request hasn't produced
    /// any text yet, its payload is re-dispatched through the fallback so the
    /// user loses nothing; a partially streamed answer keeps its text and is
    /// marked errored instead.
    fn handle_stream_interrupted(&mut self) -> Effect {
        let Some(target) = self.target.clone() else {
            return Effect::Quiet;
        };
        let Some(payload) = self.pending.take() else {
            return Effect::Quiet;
        };

        let is_empty = match self.store.message_mut(&target) {
            Some(message) => message.text.is_empty(),
            None => {
                self.target = None;
                self.waiting = false;
                return Effect::Quiet;
            }
        };

        if is_empty {
            tracing::info!("re-dispatching interrupted request through the fallback");
            self.spawn_fallback(payload);
            return Effect::Quiet;
        }

        if let Some(message) = self.store.message_mut(&target) {
            message.mark_error();
        }
        self.target = None;
        self.waiting = false;
        return Effect::StreamInterrupted {
            session_id: target.session_id,
        };
    }
}
