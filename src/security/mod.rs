//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound frame + principal
//!     → registry.rs (snapshot of ordered limitations)
//!     → limitation.rs (frame matchers: does this rule govern the frame?)
//!     → matcher.rs (security matchers: does the principal pass?)
//!     → permit | deny
//! ```
//!
//! # Design Decisions
//! - Fail closed inside a governing limitation, open outside all of them
//! - Rules are rebuilt from configuration and swapped in atomically
//! - Principals come from the transport (HTTP Basic), never from frames

pub mod limitation;
pub mod matcher;
pub mod principal;
pub mod registry;

pub use limitation::{Limitation, LimitationBuilder, LimitationError};
pub use principal::Principal;
pub use registry::SecurityRegistry;
