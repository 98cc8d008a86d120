pub mod fallback;
pub mod transport;
