//! STOMP commands and their per-command frame rules.

use std::fmt;
use std::str::FromStr;

/// A STOMP command. Heartbeats have no command and are represented by
/// `Frame::command() == None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // client frames
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    // server frames
    Connected,
    Message,
    Receipt,
    Error,
}

/// Header requirement for a command.
#[derive(Debug, Clone, Copy)]
pub enum Requirement {
    /// Every listed header must be present.
    All(&'static [&'static str]),
    /// At least one of the listed headers must be present.
    AnyOf(&'static [&'static str]),
}

impl Command {
    pub const ALL: [Command; 15] = [
        Command::Connect,
        Command::Stomp,
        Command::Send,
        Command::Subscribe,
        Command::Unsubscribe,
        Command::Ack,
        Command::Nack,
        Command::Begin,
        Command::Commit,
        Command::Abort,
        Command::Disconnect,
        Command::Connected,
        Command::Message,
        Command::Receipt,
        Command::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// Only SEND, MESSAGE and ERROR may carry a body.
    pub fn permits_body(&self) -> bool {
        matches!(self, Command::Send | Command::Message | Command::Error)
    }

    /// Headers that must be present for a frame of this command to be built.
    pub fn requirement(&self) -> Requirement {
        match self {
            Command::Connect | Command::Stomp => Requirement::All(&["accept-version", "host"]),
            Command::Connected => Requirement::All(&["version"]),
            Command::Send => Requirement::All(&["destination"]),
            Command::Subscribe => Requirement::All(&["destination", "id"]),
            Command::Unsubscribe => Requirement::All(&["id"]),
            Command::Ack | Command::Nack => Requirement::AnyOf(&["id", "message-id"]),
            Command::Begin | Command::Commit | Command::Abort => {
                Requirement::All(&["transaction"])
            }
            Command::Message => Requirement::All(&["destination", "message-id"]),
            Command::Receipt => Requirement::All(&["receipt-id"]),
            Command::Disconnect | Command::Error => Requirement::All(&[]),
        }
    }

    /// CONNECT (and its STOMP alias) and CONNECTED headers are sent verbatim
    /// (no escaping) for compatibility with STOMP 1.0 peers.
    pub fn escapes_headers(&self) -> bool {
        !(self.is_connect() || *self == Command::Connected)
    }

    /// True for the commands that open a STOMP session.
    pub fn is_connect(&self) -> bool {
        matches!(self, Command::Connect | Command::Stomp)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown STOMP command '{0}'")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_every_command() {
        for cmd in Command::ALL {
            assert_eq!(cmd.as_str().parse::<Command>().unwrap(), cmd);
        }
    }

    #[test]
    fn commands_are_case_sensitive() {
        assert!("send".parse::<Command>().is_err());
        assert!("FOO".parse::<Command>().is_err());
    }

    #[test]
    fn connect_frames_are_never_escaped() {
        let verbatim: Vec<_> = Command::ALL.iter().filter(|c| !c.escapes_headers()).collect();
        assert_eq!(verbatim, vec![&Command::Connect, &Command::Stomp, &Command::Connected]);
    }

    #[test]
    fn only_send_message_error_permit_body() {
        let with_body: Vec<_> = Command::ALL.iter().filter(|c| c.permits_body()).collect();
        assert_eq!(with_body, vec![&Command::Send, &Command::Message, &Command::Error]);
    }
}
