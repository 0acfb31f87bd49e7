//! Inbound frame routing.

use tally_shared::{Envelope, MessageKind};

use crate::client::Shared;
use crate::event::{dispatch, ConnectionEvent, EventKind};

/// Parse one frame and hand it to generic, type and channel listeners, in
/// that order. Malformed frames are logged and dropped.
pub(crate) fn route(shared: &Shared, frame: &str) {
    let envelope = match Envelope::parse(frame) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(error = %e, frame_len = frame.len(), "discarding malformed frame");
            return;
        }
    };

    let kind = envelope.kind();
    let (generic, targeted) = {
        let inner = shared.lock();
        let targeted = if kind.is_control() {
            // Protocol echoes are not channel traffic.
            inner.registry.type_listeners(&envelope.r#type)
        } else {
            inner.registry.listeners_for(&envelope)
        };
        (inner.events.listeners(&EventKind::Message), targeted)
    };

    match kind {
        MessageKind::Heartbeat => tracing::debug!(timestamp = ?envelope.timestamp, "heartbeat ack"),
        MessageKind::Subscribe | MessageKind::Unsubscribe => tracing::debug!(
            message_type = %envelope.r#type,
            channel = envelope.control_channel().unwrap_or_default(),
            "control echo"
        ),
        MessageKind::Notification => {}
        MessageKind::Other(type_name) => {
            if targeted.is_empty() {
                tracing::debug!(message_type = type_name, channel = ?envelope.channel, "no listener for message");
            }
        }
    }

    if !generic.is_empty() {
        dispatch(&generic, &ConnectionEvent::Message(envelope.clone()), "message");
    }
    dispatch(&targeted, &envelope, "subscription");
}
