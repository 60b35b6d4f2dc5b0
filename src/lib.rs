//! STOMP over WebSocket gateway library.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                   STOMP GATEWAY                       │
//!                      │                                                       │
//!   WebSocket client   │  ┌────────┐   ┌────────┐   ┌───────┐   ┌──────────┐  │
//!   ───────────────────┼─▶│  http  │──▶│ stomp  │──▶│ relay │──▶│  bridge  │──┼──▶ broker
//!                      │  │  ws    │   │ codec  │   │       │   │connection│  │
//!                      │  └────────┘   └────────┘   └───┬───┘   └────┬─────┘  │
//!                      │                                │            │        │
//!                      │                  security ◀────┤            ▼        │
//!                      │                  routing  ◀────┘     subscription    │
//!                      │                                        pumps ────────┼──▶ client
//!                      │  ┌───────────────────────────────────────────────┐   │
//!                      │  │  config · lifecycle · observability · admin   │   │
//!                      │  └───────────────────────────────────────────────┘   │
//!                      └──────────────────────────────────────────────────────┘
//! ```

// Protocol core
pub mod bridge;
pub mod broker;
pub mod relay;
pub mod session;
pub mod stomp;

// Policy
pub mod routing;
pub mod security;

// Surfaces
pub mod admin;
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::schema::GatewayConfig;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
pub use relay::Relay;
