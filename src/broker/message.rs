//! Broker-side message representation.

use bytes::Bytes;

use crate::broker::destination::Destination;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Assigned by the broker on send.
    pub id: String,
    pub destination: Destination,
    /// Application properties in the order they were set.
    pub properties: Vec<(String, String)>,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub redelivered: bool,
}

impl BrokerMessage {
    pub fn new(destination: Destination, body: impl Into<Bytes>) -> Self {
        Self {
            id: String::new(),
            destination,
            properties: Vec::new(),
            content_type: None,
            body: body.into(),
            redelivered: false,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Set a property, replacing an existing value.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_property(name, value);
        self
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.properties.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.properties.push((name, value)),
        }
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}
