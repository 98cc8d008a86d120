use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use test_utils::stream_fixture;
use tokio::sync::mpsc;

use super::ChatController;
use super::ConversationStore;
use super::Effect;
use super::ANSWER_FAILED;
use crate::domain::models::Attachment;
use crate::domain::models::Author;
use crate::domain::models::Dispatch;
use crate::domain::models::Event;
use crate::domain::models::Message;
use crate::domain::models::MessageType;
use crate::infrastructure::fallback::Requester;
use crate::infrastructure::transport::websocket::Outbound;
use crate::infrastructure::transport::ConnectionState;
use crate::infrastructure::transport::WebSocketTransport;

struct StubRequester {
    responses: Mutex<VecDeque<Result<String>>>,
    calls: AtomicUsize,
}

impl Default for StubRequester {
    fn default() -> StubRequester {
        return StubRequester {
            responses: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        };
    }
}

impl StubRequester {
    fn with_responses(responses: Vec<Result<String>>) -> StubRequester {
        return StubRequester {
            responses: Mutex::new(VecDeque::from(responses)),
            calls: AtomicUsize::new(0),
        };
    }

    fn calls(&self) -> usize {
        return self.calls.load(Ordering::SeqCst);
    }
}

#[async_trait]
impl Requester for StubRequester {
    async fn complete(&self, _prompt: &str, _attachment: Option<&Attachment>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().unwrap().pop_front() {
            Some(response) => return response,
            None => return Ok("stub answer".to_string()),
        }
    }
}

fn build_controller(
    stub: Arc<StubRequester>,
) -> (ChatController, mpsc::UnboundedReceiver<Event>) {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();
    let transport = WebSocketTransport::with_url("ws://127.0.0.1:9".to_string(), event_tx.clone());
    let controller = ChatController::new(ConversationStore::default(), transport, stub, event_tx);
    return (controller, event_rx);
}

fn build_open_controller(
    stub: Arc<StubRequester>,
) -> (
    ChatController,
    mpsc::UnboundedReceiver<Event>,
    mpsc::UnboundedReceiver<Outbound>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();
    let mut transport =
        WebSocketTransport::with_url("ws://127.0.0.1:9".to_string(), event_tx.clone());
    let out_rx = transport.open_with_channel();
    let controller = ChatController::new(ConversationStore::default(), transport, stub, event_tx);
    return (controller, event_rx, out_rx);
}

/// Feeds events back into the controller until the pending fallback response
/// has been applied.
async fn complete_turn(
    controller: &mut ChatController,
    event_rx: &mut mpsc::UnboundedReceiver<Event>,
) {
    loop {
        let event = event_rx.recv().await.unwrap();
        let done = matches!(event, Event::FallbackResponse(_));
        controller.handle_event(event);
        if done {
            return;
        }
    }
}

#[tokio::test]
async fn it_dispatches_streamed_when_the_transport_is_open() {
    let stub = Arc::new(StubRequester::default());
    let (mut controller, _event_rx, mut out_rx) = build_open_controller(stub.clone());

    let route = controller.send("say hello", None);
    assert_eq!(route, Dispatch::Streamed);
    assert_eq!(stub.calls(), 0);

    match out_rx.try_recv().unwrap() {
        Outbound::Frame(frame) => assert_eq!(frame, "say hello"),
        Outbound::Close => panic!("expected a frame"),
    }
}

#[tokio::test]
async fn it_dispatches_atomic_when_the_transport_is_closed() {
    let stub = Arc::new(StubRequester::default());
    let (mut controller, mut event_rx) = build_controller(stub.clone());

    let route = controller.send("say hello", None);
    assert_eq!(route, Dispatch::Atomic);
    // The transport starts repairing itself in the background regardless.
    assert_eq!(controller.connection_state(), ConnectionState::Connecting);

    complete_turn(&mut controller, &mut event_rx).await;
    assert_eq!(stub.calls(), 1);

    let messages = &controller.store().current().messages;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].author, Author::User);
    assert_eq!(messages[1].author, Author::Agent);
    assert_eq!(messages[1].text, "stub answer");
    assert!(controller.target().is_none());
    assert!(!controller.is_waiting());
}

#[tokio::test]
async fn it_allows_only_one_active_target() {
    let stub = Arc::new(StubRequester::default());
    let (mut controller, _event_rx, _out_rx) = build_open_controller(stub);

    controller.send("first", None);
    assert_eq!(controller.target().unwrap().index, 1);

    controller.send("second", None);
    assert_eq!(controller.target().unwrap().index, 3);

    controller.handle_event(Event::TransportFrame {
        generation: 0,
        frame: "chunk".to_string(),
    });

    let messages = &controller.store().current().messages;
    assert_eq!(messages[1].text, "");
    assert_eq!(messages[3].text, "chunk");
}

#[tokio::test]
async fn it_applies_frames_to_the_target_in_order() {
    let stub = Arc::new(StubRequester::default());
    let (mut controller, _event_rx, _out_rx) = build_open_controller(stub);

    controller.send("say hello", None);

    let mut chunks: Vec<String> = vec![];
    let mut done = false;
    for frame in stream_fixture() {
        let effect = controller.handle_event(Event::TransportFrame {
            generation: 0,
            frame: frame.to_string(),
        });
        match effect {
            Effect::Chunk(chunk) => chunks.push(chunk),
            Effect::StreamDone { .. } => done = true,
            _ => panic!("unexpected effect"),
        }
    }

    assert_eq!(chunks, vec!["Hel", "lo, ", "world"]);
    assert!(done);
    assert_eq!(controller.store().current().messages[1].text, "Hello, world");
    assert!(controller.target().is_none());
    assert!(!controller.is_waiting());
}

#[tokio::test]
async fn it_reuses_the_paired_answer_slot_on_edit() {
    let stub = Arc::new(StubRequester::with_responses(vec![
        Ok("x".to_string()),
        Ok("y".to_string()),
        Ok("z".to_string()),
    ]));
    let (mut controller, mut event_rx) = build_controller(stub);

    controller.send("a", None);
    complete_turn(&mut controller, &mut event_rx).await;
    controller.send("b", None);
    complete_turn(&mut controller, &mut event_rx).await;

    let route = controller.edit_and_resend(0, "a2", None);
    assert_eq!(route, Some(Dispatch::Atomic));
    assert_eq!(controller.target().unwrap().index, 1);
    assert_eq!(controller.store().current().messages[1].text, "");

    complete_turn(&mut controller, &mut event_rx).await;

    let messages = &controller.store().current().messages;
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0].text, "a2");
    assert_eq!(messages[1].text, "z");
    assert_eq!(messages[2].text, "b");
    assert_eq!(messages[3].text, "y");
}

#[tokio::test]
async fn it_inserts_a_slot_when_the_prompt_has_no_paired_answer() {
    let stub = Arc::new(StubRequester::default());
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
    let transport = WebSocketTransport::with_url("ws://127.0.0.1:9".to_string(), event_tx.clone());

    let mut store = ConversationStore::default();
    let session_id = store.current_id().to_string();
    store.push_message(&session_id, Message::new(Author::User, "a"));
    let mut controller = ChatController::new(store, transport, stub, event_tx);

    let route = controller.edit_and_resend(0, "a2", None);
    assert_eq!(route, Some(Dispatch::Atomic));
    assert_eq!(controller.target().unwrap().index, 1);
    complete_turn(&mut controller, &mut event_rx).await;

    let messages = &controller.store().current().messages;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].text, "a2");
    assert_eq!(messages[1].text, "stub answer");
}

#[tokio::test]
async fn it_rejects_edits_of_agent_messages() {
    let stub = Arc::new(StubRequester::default());
    let (mut controller, mut event_rx) = build_controller(stub.clone());

    controller.send("a", None);
    complete_turn(&mut controller, &mut event_rx).await;

    let route = controller.edit_and_resend(1, "nope", None);
    assert!(route.is_none());
    assert_eq!(stub.calls(), 1);
    assert_eq!(controller.store().current().messages[1].text, "stub answer");
}

#[tokio::test]
async fn it_sends_cancel_before_an_intentional_close() {
    let stub = Arc::new(StubRequester::default());
    let (mut controller, _event_rx, mut out_rx) = build_open_controller(stub);

    controller.send("say hello", None);
    controller.stop();
    controller.stop();

    match out_rx.try_recv().unwrap() {
        Outbound::Frame(frame) => assert_eq!(frame, "say hello"),
        Outbound::Close => panic!("expected the prompt frame"),
    }
    match out_rx.try_recv().unwrap() {
        Outbound::Frame(frame) => assert_eq!(frame, r#"{"type":"cancel"}"#),
        Outbound::Close => panic!("expected the cancel frame"),
    }
    assert!(matches!(out_rx.try_recv().unwrap(), Outbound::Close));
}

#[tokio::test]
async fn it_ignores_stray_frames_after_stop() {
    let stub = Arc::new(StubRequester::default());
    let (mut controller, _event_rx, _out_rx) = build_open_controller(stub);

    controller.send("say hello", None);
    controller.handle_event(Event::TransportFrame {
        generation: 0,
        frame: "par".to_string(),
    });
    controller.stop();

    // One frame from the superseded connection, one carrying the new
    // generation; neither may mutate anything.
    let stale = controller.handle_event(Event::TransportFrame {
        generation: 0,
        frame: "tial".to_string(),
    });
    assert!(matches!(stale, Effect::Quiet));
    let current = controller.handle_event(Event::TransportFrame {
        generation: 1,
        frame: "tial".to_string(),
    });
    assert!(matches!(current, Effect::Quiet));

    let messages = &controller.store().current().messages;
    assert_eq!(messages[1].text, "par");
    assert_eq!(messages[1].message_type(), MessageType::Normal);
    assert!(controller.target().is_none());
}

#[tokio::test]
async fn it_keeps_partial_text_and_marks_error_when_the_connection_drops() {
    let stub = Arc::new(StubRequester::default());
    let (mut controller, _event_rx, _out_rx) = build_open_controller(stub.clone());

    controller.send("say hello", None);
    controller.handle_event(Event::TransportFrame {
        generation: 0,
        frame: "par".to_string(),
    });

    let effect = controller.handle_event(Event::TransportClosed { generation: 0 });
    assert!(matches!(effect, Effect::StreamInterrupted { .. }));

    let messages = &controller.store().current().messages;
    assert_eq!(messages[1].text, "par");
    assert_eq!(messages[1].message_type(), MessageType::Error);
    assert!(controller.target().is_none());
    assert_eq!(stub.calls(), 0);
}

#[tokio::test]
async fn it_redispatches_through_the_fallback_when_no_text_arrived() {
    let stub = Arc::new(StubRequester::default());
    let (mut controller, mut event_rx, _out_rx) = build_open_controller(stub.clone());

    controller.send("say hello", None);
    controller.handle_event(Event::TransportClosed { generation: 0 });

    complete_turn(&mut controller, &mut event_rx).await;
    assert_eq!(stub.calls(), 1);
    assert_eq!(controller.store().current().messages[1].text, "stub answer");
}

#[tokio::test]
async fn it_keeps_streaming_into_the_original_session_after_a_switch() {
    let stub = Arc::new(StubRequester::default());
    let (mut controller, _event_rx, _out_rx) = build_open_controller(stub);

    controller.send("say hello", None);
    let original_id = controller.store().current_id().to_string();
    controller.new_session();

    let chunk = controller.handle_event(Event::TransportFrame {
        generation: 0,
        frame: "Hel".to_string(),
    });
    assert!(matches!(chunk, Effect::Quiet));

    let done = controller.handle_event(Event::TransportFrame {
        generation: 0,
        frame: "[END]".to_string(),
    });
    match done {
        Effect::StreamDone { session_id } => assert_eq!(session_id, original_id),
        _ => panic!("expected the stream to finish"),
    }

    let original = controller.store().session(&original_id).unwrap();
    assert_eq!(original.messages[1].text, "Hel");
    assert!(controller.store().current().messages.is_empty());
}

#[tokio::test]
async fn it_writes_an_error_message_when_the_fallback_fails() {
    let stub = Arc::new(StubRequester::with_responses(vec![Err(anyhow::anyhow!(
        "boom"
    ))]));
    let (mut controller, mut event_rx) = build_controller(stub);

    controller.send("say hello", None);
    complete_turn(&mut controller, &mut event_rx).await;

    let messages = &controller.store().current().messages;
    assert_eq!(messages[1].text, ANSWER_FAILED);
    assert_eq!(messages[1].message_type(), MessageType::Error);
    assert!(controller.target().is_none());
}

#[tokio::test]
async fn it_drops_a_superseded_fallback_response() {
    let stub = Arc::new(StubRequester::default());
    let (mut controller, mut event_rx) = build_controller(stub);

    controller.send("say hello", None);
    controller.stop();

    loop {
        let event = event_rx.recv().await.unwrap();
        let done = matches!(event, Event::FallbackResponse(_));
        let effect = controller.handle_event(event);
        if done {
            assert!(matches!(effect, Effect::Quiet));
            break;
        }
    }

    assert_eq!(controller.store().current().messages[1].text, "");
}

#[tokio::test]
async fn it_never_throws_when_both_paths_are_unavailable() {
    let stub = Arc::new(StubRequester::with_responses(vec![Err(anyhow::anyhow!(
        "network unreachable"
    ))]));
    let (mut controller, mut event_rx) = build_controller(stub);

    controller.send("say hello", None);
    complete_turn(&mut controller, &mut event_rx).await;

    let messages = &controller.store().current().messages;
    assert_eq!(messages[1].message_type(), MessageType::Error);
}
