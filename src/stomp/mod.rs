//! STOMP protocol model.
//!
//! # Data Flow
//! ```text
//! WebSocket message (text | binary)
//!     → codec.rs (decode, reject malformed input)
//!     → frame.rs (validated Frame: command, ordered headers, body)
//!     → relay
//!
//! Outbound Frame
//!     → codec.rs (encode, escape headers)
//!     → transport writer
//! ```
//!
//! # Design Decisions
//! - A heartbeat is a frame without a command, never a special-cased byte
//! - Frames can only be built through `FrameBuilder`, so an invalid frame
//!   never exists in memory
//! - Header keys compare case-insensitively; the first duplicate wins

pub mod codec;
pub mod command;
pub mod frame;
pub mod headers;
pub mod heartbeat;
pub mod version;

pub use codec::{BinaryCodec, CodecError, MalformedFrame, TextCodec, DEFAULT_BUFFER_CAPACITY};
pub use command::Command;
pub use frame::{Frame, FrameBuilder, FrameError};
pub use headers::Headers;
pub use heartbeat::{HeartBeat, HeartBeatPolicy, Negotiated};
pub use version::Version;
