//! Frame and permission predicates composed into limitations.
//!
//! # Responsibilities
//! - Frame matchers decide whether a limitation governs a frame
//! - Security matchers decide whether a principal passes it
//!
//! # Design Decisions
//! - Heartbeats carry no command, so a command matcher never matches them
//! - A destination matcher never matches a frame without a destination
//! - Role matchers are satisfied by ANY listed role

use std::collections::HashSet;

use crate::routing::glob::GlobPattern;
use crate::security::principal::Principal;
use crate::stomp::{Command, Frame};

/// Predicate over a frame.
pub trait FrameMatcher: Send + Sync + std::fmt::Debug {
    fn matches(&self, frame: &Frame) -> bool;
}

/// Predicate over the (possibly anonymous) principal.
pub trait SecurityMatcher: Send + Sync + std::fmt::Debug {
    fn permits(&self, principal: Option<&Principal>) -> bool;
}

/// Matches frames whose command is in the set.
#[derive(Debug, Clone)]
pub struct CommandMatcher {
    commands: HashSet<Command>,
}

impl CommandMatcher {
    pub fn new(commands: impl IntoIterator<Item = Command>) -> Self {
        Self {
            commands: commands.into_iter().collect(),
        }
    }
}

impl FrameMatcher for CommandMatcher {
    fn matches(&self, frame: &Frame) -> bool {
        frame
            .command()
            .map(|c| self.commands.contains(&c))
            .unwrap_or(false)
    }
}

/// Matches the destination header against a glob (or exact string).
#[derive(Debug, Clone)]
pub struct DestinationMatcher {
    pattern: GlobPattern,
}

impl DestinationMatcher {
    pub fn new(pattern: GlobPattern) -> Self {
        Self { pattern }
    }
}

impl FrameMatcher for DestinationMatcher {
    fn matches(&self, frame: &Frame) -> bool {
        frame
            .destination()
            .map(|d| self.pattern.matches(d))
            .unwrap_or(false)
    }
}

/// Matches frames that carry no destination header.
#[derive(Debug, Clone, Copy)]
pub struct NullDestinationMatcher;

impl FrameMatcher for NullDestinationMatcher {
    fn matches(&self, frame: &Frame) -> bool {
        frame.destination().is_none()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PermitAll;

impl SecurityMatcher for PermitAll {
    fn permits(&self, _: Option<&Principal>) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DenyAll;

impl SecurityMatcher for DenyAll {
    fn permits(&self, _: Option<&Principal>) -> bool {
        false
    }
}

/// Satisfied by any authenticated principal.
#[derive(Debug, Clone, Copy)]
pub struct PrincipalExists;

impl SecurityMatcher for PrincipalExists {
    fn permits(&self, principal: Option<&Principal>) -> bool {
        principal.is_some()
    }
}

/// Satisfied when the principal holds at least one of the roles.
#[derive(Debug, Clone)]
pub struct RolesMatcher {
    roles: Vec<String>,
}

impl RolesMatcher {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }
}

impl SecurityMatcher for RolesMatcher {
    fn permits(&self, principal: Option<&Principal>) -> bool {
        principal
            .map(|p| self.roles.iter().any(|r| p.has_role(r)))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(dest: &str) -> Frame {
        Frame::builder(Command::Send)
            .header("destination", dest)
            .build()
            .unwrap()
    }

    #[test]
    fn command_matcher_ignores_heartbeats() {
        let matcher = CommandMatcher::new([Command::Send]);
        assert!(matcher.matches(&send("/queue/a")));
        assert!(!matcher.matches(&Frame::heartbeat()));
    }

    #[test]
    fn destination_matchers() {
        let glob = DestinationMatcher::new(GlobPattern::compile("/topic/*").unwrap());
        assert!(glob.matches(&send("/topic/x")));
        assert!(!glob.matches(&send("/queue/x")));
        assert!(!glob.matches(&Frame::heartbeat()));

        assert!(NullDestinationMatcher.matches(&Frame::heartbeat()));
        assert!(!NullDestinationMatcher.matches(&send("/topic/x")));
    }

    #[test]
    fn roles_are_any_of() {
        let matcher = RolesMatcher::new(["admin", "trader"]);
        let trader = Principal::new("bob").with_roles(["trader"]);
        let viewer = Principal::new("eve").with_roles(["viewer"]);
        assert!(matcher.permits(Some(&trader)));
        assert!(!matcher.permits(Some(&viewer)));
        assert!(!matcher.permits(None));
    }
}
