//! Destination routing subsystem.
//!
//! # Data Flow
//! ```text
//! Destination pattern text
//!     → glob.rs (compile once, cache by text, bounded LRU)
//!     → GlobPattern (boolean match | named captures)
//!
//! Processed frame (session id, principal, frame)
//!     → dispatcher.rs (handlers by command + pattern, in registration order)
//!
//! SUBSCRIBE / UNSUBSCRIBE
//!     → events.rs (subscriber counts, Added/Removed notifications)
//! ```
//!
//! # Design Decisions
//! - Path parameters travel in an explicit context, never ambient state
//! - Deterministic: handlers run in the order they were registered
//! - The pattern cache is owned, not global; it is shared through `Arc`

pub mod dispatcher;
pub mod events;
pub mod glob;

pub use dispatcher::{FrameContext, FrameDispatcher, FrameHandler};
pub use events::{DestinationEvent, DestinationEvents, DestinationListener};
pub use glob::{GlobError, GlobPattern, PatternCache};
