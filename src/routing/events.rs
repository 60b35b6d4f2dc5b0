//! Destination subscription notifications.
//!
//! Subscriber counts are kept per destination. Every SUBSCRIBE emits
//! `Added` and every UNSUBSCRIBE (or teardown) emits `Removed`; `transition`
//! marks the first subscriber arriving and the last one leaving.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::routing::glob::{GlobError, GlobPattern, PatternCache};
use crate::session::SessionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationEvent {
    Added {
        destination: String,
        session_id: SessionId,
        transition: bool,
    },
    Removed {
        destination: String,
        session_id: SessionId,
        transition: bool,
    },
}

impl DestinationEvent {
    pub fn destination(&self) -> &str {
        match self {
            DestinationEvent::Added { destination, .. } | DestinationEvent::Removed { destination, .. } => {
                destination
            }
        }
    }

    pub fn is_transition(&self) -> bool {
        match self {
            DestinationEvent::Added { transition, .. } | DestinationEvent::Removed { transition, .. } => {
                *transition
            }
        }
    }
}

pub trait DestinationListener: Send + Sync {
    fn on_event(&self, event: &DestinationEvent);
}

impl<F> DestinationListener for F
where
    F: Fn(&DestinationEvent) + Send + Sync,
{
    fn on_event(&self, event: &DestinationEvent) {
        self(event)
    }
}

pub struct DestinationEvents {
    patterns: Arc<PatternCache>,
    listeners: RwLock<Vec<(Arc<GlobPattern>, Arc<dyn DestinationListener>)>>,
    counts: DashMap<String, usize>,
}

impl DestinationEvents {
    pub fn new(patterns: Arc<PatternCache>) -> Self {
        Self {
            patterns,
            listeners: RwLock::new(Vec::new()),
            counts: DashMap::new(),
        }
    }

    pub fn listen<L>(&self, pattern: &str, listener: L) -> Result<(), GlobError>
    where
        L: DestinationListener + 'static,
    {
        let pattern = self.patterns.get(pattern)?;
        self.listeners.write().push((pattern, Arc::new(listener)));
        Ok(())
    }

    pub fn subscribed(&self, session_id: &SessionId, destination: &str) {
        let transition = {
            let mut count = self.counts.entry(destination.to_string()).or_insert(0);
            *count += 1;
            *count == 1
        };
        self.emit(DestinationEvent::Added {
            destination: destination.to_string(),
            session_id: session_id.clone(),
            transition,
        });
    }

    pub fn unsubscribed(&self, session_id: &SessionId, destination: &str) {
        let transition = match self.counts.get_mut(destination) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => return,
        };
        if transition {
            self.counts.remove_if(destination, |_, c| *c == 0);
        }
        self.emit(DestinationEvent::Removed {
            destination: destination.to_string(),
            session_id: session_id.clone(),
            transition,
        });
    }

    pub fn subscriber_count(&self, destination: &str) -> usize {
        self.counts.get(destination).map(|c| *c).unwrap_or(0)
    }

    /// Destinations with at least one subscriber.
    pub fn active_destinations(&self) -> Vec<String> {
        self.counts.iter().map(|e| e.key().clone()).collect()
    }

    fn emit(&self, event: DestinationEvent) {
        let listeners: Vec<_> = self
            .listeners
            .read()
            .iter()
            .filter(|(p, _)| p.matches(event.destination()))
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn transitions_on_first_and_last_subscriber() {
        let events = DestinationEvents::new(Arc::new(PatternCache::default()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        events
            .listen("/topic/*", move |e: &DestinationEvent| log.lock().push(e.clone()))
            .unwrap();

        let (a, b) = (SessionId::from("a"), SessionId::from("b"));
        events.subscribed(&a, "/topic/x");
        events.subscribed(&b, "/topic/x");
        events.unsubscribed(&a, "/topic/x");
        events.unsubscribed(&b, "/topic/x");
        events.subscribed(&a, "/queue/ignored");

        let flags: Vec<_> = seen.lock().iter().map(|e| e.is_transition()).collect();
        assert_eq!(flags, vec![true, false, false, true]);
        assert_eq!(events.subscriber_count("/topic/x"), 0);
        assert_eq!(events.subscriber_count("/queue/ignored"), 1);
    }
}
