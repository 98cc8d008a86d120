pub mod websocket;

pub use websocket::reconnect_delay;
pub use websocket::ConnectionState;
pub use websocket::WebSocketTransport;
