//! Authorization rules.

use crate::config::schema::{Access, RuleConfig};
use crate::routing::glob::{GlobError, GlobPattern};
use crate::security::matcher::*;
use crate::security::principal::Principal;
use crate::stomp::command::UnknownCommand;
use crate::stomp::{Command, Frame};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitationError {
    #[error(transparent)]
    Glob(#[from] GlobError),

    #[error(transparent)]
    Command(#[from] UnknownCommand),
}

/// A frame governed by a limitation must satisfy every one of its security
/// matchers. A limitation governs a frame when every frame matcher matches.
#[derive(Debug)]
pub struct Limitation {
    frame_matchers: Vec<Box<dyn FrameMatcher>>,
    security_matchers: Vec<Box<dyn SecurityMatcher>>,
}

impl Limitation {
    pub fn builder() -> LimitationBuilder {
        LimitationBuilder::default()
    }

    pub fn applies_to(&self, frame: &Frame) -> bool {
        self.frame_matchers.iter().all(|m| m.matches(frame))
    }

    pub fn permits(&self, principal: Option<&Principal>) -> bool {
        self.security_matchers.iter().all(|m| m.permits(principal))
    }

    /// Build a limitation from a configured rule.
    pub fn from_config(rule: &RuleConfig) -> Result<Self, LimitationError> {
        let mut builder = Limitation::builder();
        if !rule.commands.is_empty() {
            let commands = rule
                .commands
                .iter()
                .map(|c| c.parse::<Command>())
                .collect::<Result<Vec<_>, _>>()?;
            builder = builder.commands(commands);
        }
        if let Some(dest) = &rule.destination {
            builder = builder.matches(dest);
        }
        if rule.null_destination {
            builder = builder.null_destination();
        }
        builder = match rule.access {
            Access::PermitAll => builder.permit_all(),
            Access::DenyAll => builder.deny_all(),
            Access::Authenticated => builder.authenticated(),
        };
        if !rule.roles.is_empty() {
            builder = builder.roles(rule.roles.iter().cloned());
        }
        Ok(builder.build()?)
    }
}

/// Fluent builder, e.g.
/// `Limitation::builder().matches("/topic/secure/*").roles(["trader"]).build()`.
#[derive(Debug, Default)]
pub struct LimitationBuilder {
    commands: Option<Vec<Command>>,
    destinations: Vec<String>,
    null_destination: bool,
    security_matchers: Vec<Box<dyn SecurityMatcher>>,
}

impl LimitationBuilder {
    pub fn commands(mut self, commands: impl IntoIterator<Item = Command>) -> Self {
        self.commands
            .get_or_insert_with(Vec::new)
            .extend(commands);
        self
    }

    /// Destination glob (or exact destination).
    pub fn matches(mut self, pattern: impl Into<String>) -> Self {
        self.destinations.push(pattern.into());
        self
    }

    pub fn null_destination(mut self) -> Self {
        self.null_destination = true;
        self
    }

    pub fn roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.security_matchers.push(Box::new(RolesMatcher::new(roles)));
        self
    }

    pub fn authenticated(mut self) -> Self {
        self.security_matchers.push(Box::new(PrincipalExists));
        self
    }

    pub fn permit_all(mut self) -> Self {
        self.security_matchers.push(Box::new(PermitAll));
        self
    }

    pub fn deny_all(mut self) -> Self {
        self.security_matchers.push(Box::new(DenyAll));
        self
    }

    pub fn build(self) -> Result<Limitation, GlobError> {
        let mut frame_matchers: Vec<Box<dyn FrameMatcher>> = Vec::new();
        if let Some(commands) = self.commands {
            frame_matchers.push(Box::new(CommandMatcher::new(commands)));
        }
        for dest in &self.destinations {
            frame_matchers.push(Box::new(DestinationMatcher::new(GlobPattern::compile(dest)?)));
        }
        if self.null_destination {
            frame_matchers.push(Box::new(NullDestinationMatcher));
        }
        Ok(Limitation {
            frame_matchers,
            security_matchers: self.security_matchers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_builds_all_matchers() {
        let rule = RuleConfig {
            commands: vec!["SEND".into()],
            destination: Some("/topic/secure/*".into()),
            access: Access::Authenticated,
            roles: vec!["trader".into()],
            ..Default::default()
        };
        let limitation = Limitation::from_config(&rule).unwrap();
        let frame = Frame::builder(Command::Send)
            .header("destination", "/topic/secure/a")
            .build()
            .unwrap();
        assert!(limitation.applies_to(&frame));
        assert!(limitation.permits(Some(&Principal::new("a").with_roles(["trader"]))));
        assert!(!limitation.permits(Some(&Principal::new("b"))));
    }

    #[test]
    fn unknown_command_in_rule_fails() {
        let rule = RuleConfig {
            commands: vec!["PUBLISH".into()],
            ..Default::default()
        };
        assert!(matches!(
            Limitation::from_config(&rule),
            Err(LimitationError::Command(_))
        ));
    }
}
