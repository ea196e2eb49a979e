pub mod channel;
pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod server;
pub mod signaling;
pub mod utils;

pub use error::SignalError;
pub use signaling::{ClientMessage, ServerMessage, StatusUpdate};
