//! Frame ↔ broker message conversion.

use crate::broker::{BrokerMessage, Destination, SESSION_PROPERTY};
use crate::stomp::{Command, Frame, FrameError};

/// Headers that describe the frame itself and never become properties.
const FRAME_HEADERS: &[&str] = &[
    "destination",
    "receipt",
    "transaction",
    "content-length",
    "content-type",
    "message-id",
    "subscription",
    "ack",
];

/// SEND frame → broker message. Custom headers become properties; a
/// client-supplied session affinity property is dropped.
pub fn to_broker_message(frame: &Frame, destination: Destination) -> BrokerMessage {
    let mut message = BrokerMessage::new(destination, frame.body().cloned().unwrap_or_default());
    message.content_type = frame.content_type().map(str::to_string);
    for (name, value) in frame.headers().iter() {
        if is_frame_header(name) || name.eq_ignore_ascii_case(SESSION_PROPERTY) {
            continue;
        }
        // First value wins.
        if message.property(name).is_none() {
            message.set_property(name, value);
        }
    }
    message
}

/// Broker message → MESSAGE frame for one subscription.
pub fn to_message_frame(
    message: &BrokerMessage,
    destination: &str,
    subscription: &str,
    message_id: &str,
    ack: Option<&str>,
) -> Result<Frame, FrameError> {
    let mut builder = Frame::builder(Command::Message)
        .header("destination", destination)
        .header("message-id", message_id)
        .header("subscription", subscription)
        .header_opt("ack", ack);

    if message.redelivered {
        builder = builder.header("redelivered", "true");
    }
    for (name, value) in &message.properties {
        if name == SESSION_PROPERTY || is_frame_header(name) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }

    if message.body.is_empty() {
        builder = builder.header_opt("content-type", message.content_type.as_deref());
    } else {
        builder = builder.body(message.body.clone(), message.content_type.as_deref());
    }
    builder.build()
}

fn is_frame_header(name: &str) -> bool {
    FRAME_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_headers_become_properties() {
        let frame = Frame::builder(Command::Send)
            .header("destination", "/topic/x")
            .header("receipt", "7")
            .header("priority", "high")
            .header("session", "spoofed")
            .body("hi", Some("text/plain"))
            .build()
            .unwrap();
        let message = to_broker_message(&frame, Destination::parse("/topic/x"));
        assert_eq!(message.properties, vec![("priority".to_string(), "high".to_string())]);
        assert_eq!(message.content_type.as_deref(), Some("text/plain"));
        assert_eq!(message.body, "hi");
    }

    #[test]
    fn message_frame_carries_subscription_and_hides_affinity() {
        let message = BrokerMessage::new(Destination::parse("/topic/x"), "payload")
            .with_content_type("text/plain")
            .with_property("priority", "high")
            .with_property(SESSION_PROPERTY, "s1");
        let frame = to_message_frame(&message, "/topic/x", "sub-0", "m-1", None).unwrap();

        assert_eq!(frame.header("subscription"), Some("sub-0"));
        assert_eq!(frame.header("message-id"), Some("m-1"));
        assert_eq!(frame.header("priority"), Some("high"));
        assert_eq!(frame.header("session"), None);
        assert_eq!(frame.header("ack"), None);
        assert_eq!(frame.header("content-length"), Some("7"));
    }
}
