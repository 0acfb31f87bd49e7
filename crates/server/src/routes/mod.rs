//! HTTP routes.

pub mod channels;
pub mod health;
pub mod notify;

use serde::Serialize;

/// Body of a `202 Accepted` publish response.
#[derive(Debug, Serialize)]
pub struct Delivered {
    /// Connections the message was handed to.
    pub delivered: usize,
}
