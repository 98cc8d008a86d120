use std::time::Duration;

use anyhow::Result;
use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::reconnect_delay;
use super::ConnectionState;
use super::Outbound;
use super::WebSocketTransport;
use crate::domain::models::Event;

impl WebSocketTransport {
    pub(crate) fn with_url(
        url: String,
        event_tx: mpsc::UnboundedSender<Event>,
    ) -> WebSocketTransport {
        return WebSocketTransport {
            url,
            handshake_timeout: 1000,
            event_tx,
            state: ConnectionState::Closed,
            generation: 0,
            attempt: 0,
            intentional_close: false,
            queue: std::collections::VecDeque::new(),
            out_tx: None,
            conn_task: None,
            retry_task: None,
        };
    }

    /// Flips the transport to `Open` against an in-test channel so callers
    /// can observe outbound frames without a live socket.
    pub(crate) fn open_with_channel(&mut self) -> mpsc::UnboundedReceiver<Outbound> {
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Outbound>();
        self.out_tx = Some(out_tx);
        self.state = ConnectionState::Connecting;
        let generation = self.generation;
        self.handle_opened(generation);
        return out_rx;
    }
}

fn unroutable() -> (WebSocketTransport, mpsc::UnboundedReceiver<Event>) {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();
    let transport = WebSocketTransport::with_url("ws://127.0.0.1:9".to_string(), event_tx);
    return (transport, event_rx);
}

async fn next_retry(event_rx: &mut mpsc::UnboundedReceiver<Event>) {
    loop {
        match event_rx.recv().await {
            Some(Event::TransportRetry) => return,
            Some(_) => {}
            None => panic!("event channel closed before a retry fired"),
        }
    }
}

#[test]
fn it_backs_off_exponentially_and_caps() {
    let delays = (0..8)
        .map(|attempt| return reconnect_delay(attempt).as_millis() as u64)
        .collect::<Vec<u64>>();
    assert_eq!(
        delays,
        vec![1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000]
    );
}

#[test]
fn it_does_not_overflow_on_large_attempts() {
    assert_eq!(reconnect_delay(64).as_millis() as u64, 30000);
}

#[tokio::test]
async fn it_sends_only_when_open() {
    let (mut transport, _event_rx) = unroutable();
    assert!(transport.send("hello".to_string()).is_err());

    let mut out_rx = transport.open_with_channel();
    assert!(transport.send("hello".to_string()).is_ok());
    match out_rx.try_recv().unwrap() {
        Outbound::Frame(frame) => assert_eq!(frame, "hello"),
        Outbound::Close => panic!("expected a frame"),
    }
}

#[tokio::test]
async fn it_drains_the_queue_in_order_on_open() {
    let (mut transport, _event_rx) = unroutable();
    transport.enqueue("first".to_string());
    transport.enqueue("second".to_string());

    let mut out_rx = transport.open_with_channel();
    let mut drained: Vec<String> = vec![];
    while let Ok(Outbound::Frame(frame)) = out_rx.try_recv() {
        drained.push(frame);
    }
    assert_eq!(drained, vec!["first".to_string(), "second".to_string()]);
}

#[tokio::test]
async fn it_resets_the_attempt_counter_on_open() {
    let (mut transport, _event_rx) = unroutable();

    transport.connect();
    assert!(transport.handle_closed(transport.generation()));
    transport.handle_retry();
    assert!(transport.handle_closed(transport.generation()));
    assert_eq!(transport.attempt(), 2);

    transport.handle_retry();
    let generation = transport.generation();
    transport.handle_opened(generation);
    assert_eq!(transport.state(), ConnectionState::Open);
    assert_eq!(transport.attempt(), 0);
}

#[tokio::test(start_paused = true)]
async fn it_schedules_a_retry_after_an_unintentional_close() {
    let (mut transport, mut event_rx) = unroutable();

    transport.connect();
    assert_eq!(transport.state(), ConnectionState::Connecting);
    assert!(transport.handle_closed(transport.generation()));
    assert!(transport.retry_pending());

    time::advance(Duration::from_millis(1100)).await;
    next_retry(&mut event_rx).await;

    transport.handle_retry();
    assert_eq!(transport.state(), ConnectionState::Connecting);
}

#[tokio::test(start_paused = true)]
async fn it_suppresses_the_retry_after_an_intentional_close() {
    let (mut transport, mut event_rx) = unroutable();

    transport.connect();
    transport.close();
    assert_eq!(transport.state(), ConnectionState::Closed);
    assert!(!transport.retry_pending());

    time::advance(Duration::from_millis(31000)).await;
    while let Ok(event) = event_rx.try_recv() {
        assert!(!matches!(event, Event::TransportRetry));
    }

    // The next explicit connect lifts the latch.
    transport.connect();
    assert_eq!(transport.state(), ConnectionState::Connecting);
}

#[tokio::test]
async fn it_ignores_events_from_a_superseded_connection() {
    let (mut transport, _event_rx) = unroutable();

    transport.connect();
    let stale = transport.generation();
    transport.close();

    assert!(!transport.handle_closed(stale));
    assert!(!transport.retry_pending());
    assert!(!transport.is_current(stale));

    transport.handle_opened(stale);
    assert_eq!(transport.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn it_streams_frames_from_a_live_server() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut websocket = accept_async(stream).await.unwrap();

        let prompt = websocket.next().await.unwrap().unwrap();
        assert_eq!(prompt.into_text().unwrap(), "say hello");

        for frame in ["Hel", "lo, ", "world", "[END]"] {
            websocket
                .send(WsMessage::Text(frame.to_string()))
                .await
                .unwrap();
        }
        websocket.send(WsMessage::Close(None)).await.unwrap();
    });

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
    let mut transport = WebSocketTransport::with_url(format!("ws://{addr}"), event_tx);
    transport.connect();

    match event_rx.recv().await.unwrap() {
        Event::TransportOpened { generation } => transport.handle_opened(generation),
        _ => panic!("expected the transport to open"),
    }
    assert_eq!(transport.state(), ConnectionState::Open);

    transport.send("say hello".to_string())?;

    let mut frames: Vec<String> = vec![];
    loop {
        match event_rx.recv().await.unwrap() {
            Event::TransportFrame { frame, .. } => frames.push(frame),
            Event::TransportClosed { generation } => {
                transport.handle_closed(generation);
                break;
            }
            _ => {}
        }
    }

    assert_eq!(frames, vec!["Hel", "lo, ", "world", "[END]"]);
    server.await?;
    return Ok(());
}
