use anyhow::Result;

use super::StreamTarget;

/// Which path carried a request: the duplex streaming transport, or the
/// atomic HTTP fallback. A single request never uses both.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    Streamed,
    Atomic,
}

pub struct FallbackResponse {
    pub target: StreamTarget,
    pub turn: u64,
    pub result: Result<String>,
}

/// Transport events carry the generation of the connection that produced
/// them so events from a superseded connection can be ignored.
pub enum Event {
    TransportOpened { generation: u64 },
    TransportFrame { generation: u64, frame: String },
    TransportClosed { generation: u64 },
    TransportRetry,
    FallbackResponse(FallbackResponse),
}
