#[cfg(test)]
#[path = "websocket_test.rs"]
mod tests;

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::bail;
use anyhow::Result;
use futures::SinkExt;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::Event;

const BASE_RETRY_DELAY_MS: u64 = 1000;
const MAX_RETRY_DELAY_MS: u64 = 30000;
const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10000;

/// Delay before reconnect attempt number `attempt`, doubling from one second
/// up to a thirty second ceiling.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let base_ms = BASE_RETRY_DELAY_MS * 2u64.pow(attempt.min(15));
    return Duration::from_millis(base_ms.min(MAX_RETRY_DELAY_MS));
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
}

pub(crate) enum Outbound {
    Frame(String),
    Close,
}

/// At most one live duplex connection to the chat backend. The connection
/// itself runs on a spawned task that reports back through the event
/// channel; all state transitions happen on the owner's thread when those
/// events are handed back in. Events are stamped with a generation number so
/// a superseded connection task can't corrupt the state machine.
pub struct WebSocketTransport {
    url: String,
    handshake_timeout: u64,
    event_tx: mpsc::UnboundedSender<Event>,
    state: ConnectionState,
    generation: u64,
    attempt: u32,
    intentional_close: bool,
    queue: VecDeque<String>,
    out_tx: Option<mpsc::UnboundedSender<Outbound>>,
    conn_task: Option<JoinHandle<()>>,
    retry_task: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    pub fn new(event_tx: mpsc::UnboundedSender<Event>) -> WebSocketTransport {
        let handshake_timeout = Config::get(ConfigKey::HandshakeTimeout)
            .parse::<u64>()
            .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT_MS);

        return WebSocketTransport {
            url: Config::get(ConfigKey::WebsocketURL),
            handshake_timeout,
            event_tx,
            state: ConnectionState::Closed,
            generation: 0,
            attempt: 0,
            intentional_close: false,
            queue: VecDeque::new(),
            out_tx: None,
            conn_task: None,
            retry_task: None,
        };
    }

    pub fn state(&self) -> ConnectionState {
        return self.state;
    }

    pub fn attempt(&self) -> u32 {
        return self.attempt;
    }

    pub fn generation(&self) -> u64 {
        return self.generation;
    }

    pub fn is_current(&self, generation: u64) -> bool {
        return generation == self.generation;
    }

    pub fn retry_pending(&self) -> bool {
        return self.retry_task.is_some();
    }

    /// Starts a connection attempt unless one is already live or underway.
    /// Calling this explicitly also lifts the intentional-close latch left by
    /// `close`.
    pub fn connect(&mut self) {
        if self.state != ConnectionState::Closed {
            return;
        }

        self.intentional_close = false;
        if let Some(handle) = self.retry_task.take() {
            handle.abort();
        }

        self.generation += 1;
        self.state = ConnectionState::Connecting;

        let (out_tx, out_rx) = mpsc::unbounded_channel::<Outbound>();
        self.out_tx = Some(out_tx);

        let url = self.url.to_string();
        let handshake_timeout = self.handshake_timeout;
        let generation = self.generation;
        let event_tx = self.event_tx.clone();
        self.conn_task = Some(tokio::spawn(async move {
            run_connection(url, handshake_timeout, generation, out_rx, event_tx).await;
        }));
    }

    /// Sends one frame over the live connection. Only valid while `Open`.
    pub fn send(&mut self, frame: String) -> Result<()> {
        if self.state != ConnectionState::Open {
            bail!("transport is not open");
        }
        let Some(out_tx) = self.out_tx.as_ref() else {
            bail!("transport has no outbound channel");
        };
        if out_tx.send(Outbound::Frame(frame)).is_err() {
            bail!("transport outbound channel is closed");
        }
        return Ok(());
    }

    /// Holds a frame until the next `Open` transition drains the queue.
    pub fn enqueue(&mut self, frame: String) {
        self.queue.push_back(frame);
    }

    /// Closes the connection and latches against auto-reconnect until the
    /// next explicit `connect`. An open connection gets a close handshake; a
    /// half-finished one is torn down directly.
    pub fn close(&mut self) {
        self.intentional_close = true;
        self.queue.clear();
        if let Some(handle) = self.retry_task.take() {
            handle.abort();
        }

        match self.state {
            ConnectionState::Open => {
                if let Some(out_tx) = self.out_tx.take() {
                    let _ = out_tx.send(Outbound::Close);
                }
                self.conn_task = None;
            }
            ConnectionState::Connecting => {
                if let Some(handle) = self.conn_task.take() {
                    handle.abort();
                }
                self.out_tx = None;
            }
            ConnectionState::Closed => {}
        }

        self.state = ConnectionState::Closed;
        // Anything still in flight from the old connection is now stale.
        self.generation += 1;
    }

    pub fn handle_opened(&mut self, generation: u64) {
        if !self.is_current(generation) || self.out_tx.is_none() {
            return;
        }
        self.state = ConnectionState::Open;
        self.attempt = 0;
        tracing::info!(url = self.url, "transport open");
        self.drain_queue();
    }

    /// Returns whether this closure took down the live connection, as
    /// opposed to a stale event from one already replaced.
    pub fn handle_closed(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) || self.state == ConnectionState::Closed {
            return false;
        }

        self.state = ConnectionState::Closed;
        self.out_tx = None;
        self.conn_task = None;

        if !self.intentional_close {
            self.schedule_retry();
        }
        return true;
    }

    pub fn handle_retry(&mut self) {
        if self.intentional_close {
            return;
        }
        self.retry_task = None;
        self.connect();
    }

    fn schedule_retry(&mut self) {
        if let Some(handle) = self.retry_task.take() {
            handle.abort();
        }

        let delay = reconnect_delay(self.attempt);
        self.attempt += 1;
        tracing::info!(
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );

        let event_tx = self.event_tx.clone();
        self.retry_task = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = event_tx.send(Event::TransportRetry);
        }));
    }

    fn drain_queue(&mut self) {
        while let Some(frame) = self.queue.pop_front() {
            let delivered = self
                .out_tx
                .as_ref()
                .map(|out_tx| return out_tx.send(Outbound::Frame(frame.to_string())).is_ok())
                .unwrap_or(false);
            if !delivered {
                self.queue.push_front(frame);
                break;
            }
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.conn_task.take() {
            handle.abort();
        }
        if let Some(handle) = self.retry_task.take() {
            handle.abort();
        }
    }
}

async fn run_connection(
    url: String,
    handshake_timeout: u64,
    generation: u64,
    mut out_rx: mpsc::UnboundedReceiver<Outbound>,
    event_tx: mpsc::UnboundedSender<Event>,
) {
    let handshake = time::timeout(
        Duration::from_millis(handshake_timeout),
        connect_async(url.as_str()),
    )
    .await;

    let stream = match handshake {
        Ok(Ok((stream, _))) => stream,
        Ok(Err(err)) => {
            tracing::warn!(error = ?err, url = url, "websocket connect failed");
            let _ = event_tx.send(Event::TransportClosed { generation });
            return;
        }
        Err(_) => {
            tracing::warn!(url = url, "websocket handshake timed out");
            let _ = event_tx.send(Event::TransportClosed { generation });
            return;
        }
    };

    let _ = event_tx.send(Event::TransportOpened { generation });
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            outbound = out_rx.recv() => match outbound {
                Some(Outbound::Frame(frame)) => {
                    if sink.send(WsMessage::Text(frame)).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
            },
            inbound = source.next() => match inbound {
                Some(Ok(WsMessage::Text(frame))) => {
                    let _ = event_tx.send(Event::TransportFrame { generation, frame });
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::warn!(error = ?err, "websocket stream failed");
                    break;
                }
            },
        }
    }

    let _ = event_tx.send(Event::TransportClosed { generation });
}
