//! In-memory STOMP frame model and validating builder.

use bytes::Bytes;
use std::borrow::Cow;

use super::command::{Command, Requirement};
use super::headers::Headers;

/// Construction-time frame validation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("{command} frame requires header '{header}'")]
    MissingHeader { command: Command, header: &'static str },

    #[error("{command} frame requires one of the headers {headers:?}")]
    MissingAnyHeader {
        command: Command,
        headers: &'static [&'static str],
    },

    #[error("{command} frame does not permit a body")]
    BodyNotAllowed { command: Command },

    /// CONNECT, STOMP and CONNECTED headers are written unescaped, so they
    /// cannot carry line breaks (or a ':' in the key).
    #[error("{command} header '{header}' cannot be sent unescaped")]
    UnescapableHeader { command: Command, header: String },
}

/// A STOMP frame. `command == None` is a heartbeat and carries neither
/// headers nor body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: Option<Command>,
    headers: Headers,
    body: Option<Bytes>,
}

impl Frame {
    pub fn heartbeat() -> Self {
        Self {
            command: None,
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn builder(command: Command) -> FrameBuilder {
        FrameBuilder::new(command)
    }

    pub fn command(&self) -> Option<Command> {
        self.command
    }

    pub fn is_heartbeat(&self) -> bool {
        self.command.is_none()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    pub fn destination(&self) -> Option<&str> {
        self.header("destination")
    }

    pub fn receipt(&self) -> Option<&str> {
        self.header("receipt")
    }

    pub fn transaction(&self) -> Option<&str> {
        self.header("transaction")
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn body_text(&self) -> Option<Cow<'_, str>> {
        self.body.as_ref().map(|b| String::from_utf8_lossy(b))
    }

    /// Label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        self.command.map(|c| c.as_str()).unwrap_or("HEARTBEAT")
    }

    /// ERROR frame with a short `message` header and an optional plain text
    /// body. `receipt_id` correlates it with the client frame that failed.
    pub fn error(message: &str, detail: Option<&str>, receipt_id: Option<&str>) -> Frame {
        let mut headers = Headers::new();
        headers.append("message", message);
        if let Some(id) = receipt_id {
            headers.append("receipt-id", id);
        }
        let body = detail.map(|detail| {
            headers.append("content-type", "text/plain");
            headers.append("content-length", detail.len().to_string());
            Bytes::copy_from_slice(detail.as_bytes())
        });
        Frame {
            command: Some(Command::Error),
            headers,
            body,
        }
    }

    /// Append a header to a built frame. Adding headers never invalidates a
    /// frame; heartbeats stay header-less.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Frame {
        if self.command.is_some() {
            self.headers.append(key, value);
        }
        self
    }

    /// RECEIPT frame for the given receipt id.
    pub fn receipt_for(receipt_id: &str) -> Frame {
        Frame {
            command: Some(Command::Receipt),
            headers: [("receipt-id", receipt_id)].into_iter().collect(),
            body: None,
        }
    }
}

/// Builder enforcing per-command header and body rules.
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    command: Command,
    headers: Headers,
    body: Option<Bytes>,
}

impl FrameBuilder {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Headers::new(),
            body: None,
        }
    }

    /// Append a header value.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(key, value);
        self
    }

    /// Append a header only when a value is present.
    pub fn header_opt(self, key: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => self.header(key, v),
            None => self,
        }
    }

    /// Replace every value of a header.
    pub fn set_header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.set(key, value);
        self
    }

    pub fn headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in headers {
            self.headers.append(k, v);
        }
        self
    }

    /// Attach a body, recording its `content-length` and (when given) its
    /// `content-type`.
    pub fn body(mut self, body: impl Into<Bytes>, content_type: Option<&str>) -> Self {
        let body = body.into();
        self.headers.set("content-length", body.len().to_string());
        if let Some(ct) = content_type {
            self.headers.set("content-type", ct);
        }
        self.body = Some(body);
        self
    }

    /// Use headers exactly as read off the wire.
    pub(crate) fn raw_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Attach a body exactly as read off the wire, leaving headers untouched.
    pub(crate) fn raw_body(mut self, body: Option<Bytes>) -> Self {
        self.body = body;
        self
    }

    pub fn build(self) -> Result<Frame, FrameError> {
        let command = self.command;
        match command.requirement() {
            Requirement::All(required) => {
                if let Some(missing) = required.iter().find(|h| !self.headers.contains(h)) {
                    return Err(FrameError::MissingHeader {
                        command,
                        header: missing,
                    });
                }
            }
            Requirement::AnyOf(any) => {
                if !any.iter().any(|h| self.headers.contains(h)) {
                    return Err(FrameError::MissingAnyHeader {
                        command,
                        headers: any,
                    });
                }
            }
        }

        if self.body.is_some() && !command.permits_body() {
            return Err(FrameError::BodyNotAllowed { command });
        }

        if !command.escapes_headers() {
            let breaks = |s: &str| s.contains(['\n', '\r']);
            if let Some((key, _)) = self
                .headers
                .iter()
                .find(|(k, v)| breaks(k) || k.contains(':') || breaks(v))
            {
                return Err(FrameError::UnescapableHeader {
                    command,
                    header: key.to_string(),
                });
            }
        }

        Ok(Frame {
            command: Some(command),
            headers: self.headers,
            body: self.body,
        })
    }
}
