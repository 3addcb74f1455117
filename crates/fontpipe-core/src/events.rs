//! Completion notifications for collaborators that do not call the pipeline directly

use std::cell::RefCell;

use async_channel::{Receiver, Sender};

use crate::font::{FontRecord, Verification};

#[derive(Clone, Debug, PartialEq)]
pub enum FontEvent {
    /// Registration finished and the reflow window has passed
    Loaded(FontRecord),
    Verified { family: String, verification: Verification },
    Released { family: String },
}

/// Fan-out publisher over unbounded async channels
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: RefCell<Vec<Sender<FontEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<FontEvent> {
        let (tx, rx) = async_channel::unbounded();
        self.subscribers.borrow_mut().push(tx);
        rx
    }

    /// Deliver to every live subscriber, dropping the ones whose receiver is gone
    pub fn publish(&self, event: FontEvent) {
        self.subscribers.borrow_mut().retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("dropping closed font event subscriber: {}", e);
                false
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(FontEvent::Released { family: "f".into() });
        assert_eq!(a.try_recv().unwrap(), FontEvent::Released { family: "f".into() });
        assert_eq!(b.try_recv().unwrap(), FontEvent::Released { family: "f".into() });
    }

    #[test]
    fn test_closed_subscribers_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        bus.publish(FontEvent::Released { family: "f".into() });
        assert_eq!(bus.subscriber_count(), 1);
        assert!(kept.try_recv().is_ok());
    }
}
