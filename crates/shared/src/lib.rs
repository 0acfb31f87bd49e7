//! Shared types for the tally realtime client and relay.

pub mod error;
pub mod notification;
pub mod protocol;

pub use error::*;
pub use notification::*;
pub use protocol::*;
