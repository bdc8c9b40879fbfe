//! Fyers Data Socket Adapters
//!
//! - `codec`: JSON frame decoding (the `TickNormalizer`) and request encoding
//! - `messages`: wire format types and field names
//! - `transport`: `tokio-tungstenite` implementation of `FeedTransport`
//! - `token`: static and file-backed `TokenProvider`s

pub mod codec;
pub mod messages;
pub mod token;
pub mod transport;

pub use codec::FyersCodec;
pub use token::{FileTokenProvider, StaticTokenProvider};
pub use transport::{FyersTransport, FyersTransportConfig};
