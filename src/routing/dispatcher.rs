//! Application frame dispatch.
//!
//! Handlers register for a command and a destination glob. For every frame
//! that was authorized and processed, matching handlers run in registration
//! order and receive the path parameters captured by their pattern.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::routing::glob::{GlobError, GlobPattern, PatternCache};
use crate::security::Principal;
use crate::session::SessionId;
use crate::stomp::{Command, Frame};

/// Everything a handler may need about the frame being dispatched.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext<'a> {
    pub session_id: &'a SessionId,
    pub principal: Option<&'a Principal>,
    pub frame: &'a Frame,
    /// Captures from the handler's destination pattern.
    pub params: &'a HashMap<String, String>,
}

impl FrameContext<'_> {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

pub trait FrameHandler: Send + Sync {
    fn handle(&self, ctx: &FrameContext<'_>);
}

impl<F> FrameHandler for F
where
    F: Fn(&FrameContext<'_>) + Send + Sync,
{
    fn handle(&self, ctx: &FrameContext<'_>) {
        self(ctx)
    }
}

struct Registration {
    command: Command,
    pattern: Arc<GlobPattern>,
    handler: Arc<dyn FrameHandler>,
}

pub struct FrameDispatcher {
    patterns: Arc<PatternCache>,
    registrations: RwLock<Vec<Registration>>,
}

impl FrameDispatcher {
    pub fn new(patterns: Arc<PatternCache>) -> Self {
        Self {
            patterns,
            registrations: RwLock::new(Vec::new()),
        }
    }

    /// Register `handler` for `command` frames whose destination matches
    /// `pattern`. Frames without a destination are matched as "".
    pub fn register<H>(&self, command: Command, pattern: &str, handler: H) -> Result<(), GlobError>
    where
        H: FrameHandler + 'static,
    {
        let pattern = self.patterns.get(pattern)?;
        self.registrations.write().push(Registration {
            command,
            pattern,
            handler: Arc::new(handler),
        });
        Ok(())
    }

    /// Invoke matching handlers; returns how many ran.
    pub fn dispatch(&self, session_id: &SessionId, principal: Option<&Principal>, frame: &Frame) -> usize {
        let Some(command) = frame.command() else {
            return 0;
        };
        let destination = frame.destination().unwrap_or("");

        // Collect first so handlers may register further handlers.
        let matched: Vec<_> = self
            .registrations
            .read()
            .iter()
            .filter(|r| r.command == command)
            .filter_map(|r| {
                r.pattern
                    .captures(destination)
                    .map(|params| (r.handler.clone(), params))
            })
            .collect();

        for (handler, params) in &matched {
            handler.handle(&FrameContext {
                session_id,
                principal,
                frame,
                params,
            });
        }
        matched.len()
    }

    pub fn len(&self) -> usize {
        self.registrations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
