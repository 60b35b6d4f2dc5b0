//! Process-wide ordered set of limitations.
//!
//! # Design Decisions
//! - Rules live in an `ArcSwap` snapshot: readers never block, writers
//!   publish a new vector
//! - The aggregate rule is a conjunction, so order only affects cost
//! - A frame no limitation governs is permitted

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::security::limitation::Limitation;
use crate::security::principal::Principal;
use crate::stomp::Frame;

pub struct SecurityRegistry {
    limitations: ArcSwap<Vec<Arc<Limitation>>>,
}

impl SecurityRegistry {
    pub fn new() -> Self {
        Self {
            limitations: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Append a limitation; evaluation order is registration order.
    pub fn register(&self, limitation: Limitation) {
        let limitation = Arc::new(limitation);
        self.limitations.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(limitation.clone());
            next
        });
    }

    /// Atomically replace every limitation (configuration reload).
    pub fn replace_all(&self, limitations: Vec<Limitation>) {
        self.limitations
            .store(Arc::new(limitations.into_iter().map(Arc::new).collect()));
    }

    /// Limitations whose frame matchers all match `frame`.
    pub fn get_matching(&self, frame: &Frame) -> Vec<Arc<Limitation>> {
        self.limitations
            .load()
            .iter()
            .filter(|l| l.applies_to(frame))
            .cloned()
            .collect()
    }

    pub fn is_permitted(&self, frame: &Frame, principal: Option<&Principal>) -> bool {
        self.limitations
            .load()
            .iter()
            .filter(|l| l.applies_to(frame))
            .all(|l| l.permits(principal))
    }

    pub fn len(&self) -> usize {
        self.limitations.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SecurityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SecurityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityRegistry")
            .field("limitations", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stomp::Command;

    fn send(dest: &str) -> Frame {
        Frame::builder(Command::Send)
            .header("destination", dest)
            .build()
            .unwrap()
    }

    fn disconnect() -> Frame {
        Frame::builder(Command::Disconnect).build().unwrap()
    }

    fn registry() -> SecurityRegistry {
        let registry = SecurityRegistry::new();
        registry.register(Limitation::builder().null_destination().permit_all().build().unwrap());
        registry
    }

    #[test]
    fn permit_all_on_null_destination_denies_nothing() {
        let registry = registry();
        assert!(registry.is_permitted(&disconnect(), None));
        assert!(registry.is_permitted(&Frame::heartbeat(), None));
        assert!(registry.is_permitted(&send("/topic/anything"), None));
        assert!(registry.get_matching(&send("/topic/anything")).is_empty());
    }

    #[test]
    fn role_limitation_gates_secure_topics() {
        let registry = registry();
        registry.register(
            Limitation::builder()
                .matches("/topic/secure/*")
                .roles(["trader"])
                .build()
                .unwrap(),
        );

        let frame = send("/topic/secure/x");
        let trader = Principal::new("alice").with_roles(["trader"]);
        let viewer = Principal::new("bob").with_roles(["viewer"]);

        assert!(!registry.is_permitted(&frame, Some(&viewer)));
        assert!(!registry.is_permitted(&frame, None));
        assert!(registry.is_permitted(&frame, Some(&trader)));
        assert!(registry.is_permitted(&send("/topic/public"), Some(&viewer)));
    }

    #[test]
    fn every_matching_limitation_must_pass() {
        let registry = SecurityRegistry::new();
        registry.register(Limitation::builder().matches("/queue/*").authenticated().build().unwrap());
        registry.register(Limitation::builder().matches("/queue/admin").roles(["admin"]).build().unwrap());

        let user = Principal::new("u");
        let admin = Principal::new("a").with_roles(["admin"]);
        assert!(registry.is_permitted(&send("/queue/jobs"), Some(&user)));
        assert!(!registry.is_permitted(&send("/queue/admin"), Some(&user)));
        assert!(registry.is_permitted(&send("/queue/admin"), Some(&admin)));
        assert_eq!(registry.get_matching(&send("/queue/admin")).len(), 2);
    }

    #[test]
    fn deny_all_and_replace() {
        let registry = SecurityRegistry::new();
        registry.register(
            Limitation::builder()
                .commands([Command::Subscribe])
                .deny_all()
                .build()
                .unwrap(),
        );
        let subscribe = Frame::builder(Command::Subscribe)
            .header("destination", "/topic/a")
            .header("id", "0")
            .build()
            .unwrap();
        assert!(!registry.is_permitted(&subscribe, None));

        registry.replace_all(Vec::new());
        assert!(registry.is_empty());
        assert!(registry.is_permitted(&subscribe, None));
    }
}
