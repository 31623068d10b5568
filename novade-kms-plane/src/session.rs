//! Session lifecycle broadcast.
//!
//! The session backend emits [`SessionEvent::Activated`] when the compositor
//! regains control of the display hardware (after a VT switch, for example)
//! and [`SessionEvent::Deactivated`] when it gives it up. The signal is created
//! once per process and handed to interested components explicitly.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Display ownership was (re)gained; kernel state may be stale.
    Activated,
    /// Display ownership was relinquished.
    Deactivated,
}

type Listener = Rc<dyn Fn(SessionEvent)>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// Broadcasts [`SessionEvent`]s to subscribed listeners.
#[derive(Clone, Default)]
pub struct SessionSignal {
    listeners: Rc<RefCell<Listeners>>,
}

impl SessionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` until the returned [`Subscription`] is dropped.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe(&self, listener: impl Fn(SessionEvent) + 'static) -> Subscription {
        let mut listeners = self.listeners.borrow_mut();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, Rc::new(listener)));
        Subscription {
            listeners: Rc::downgrade(&self.listeners),
            id,
        }
    }

    /// Delivers `event` to every listener subscribed at the time of the call.
    pub fn emit(&self, event: SessionEvent) {
        let snapshot: Vec<Listener> = self
            .listeners
            .borrow()
            .entries
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        tracing::debug!(?event, listeners = snapshot.len(), "Broadcasting session event");
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().entries.len()
    }
}

impl fmt::Debug for SessionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSignal")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Keeps a listener registered; unsubscribes on drop.
#[derive(Debug)]
pub struct Subscription {
    listeners: Weak<RefCell<Listeners>>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .borrow_mut()
                .entries
                .retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_emit_reaches_subscribers() {
        let signal = SessionSignal::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        let _sub = signal.subscribe(move |event| log.borrow_mut().push(event));

        signal.emit(SessionEvent::Deactivated);
        signal.emit(SessionEvent::Activated);

        assert_eq!(*seen.borrow(), vec![SessionEvent::Deactivated, SessionEvent::Activated]);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let signal = SessionSignal::new();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let sub = signal.subscribe(move |_| counter.set(counter.get() + 1));
        assert_eq!(signal.listener_count(), 1);

        drop(sub);
        signal.emit(SessionEvent::Activated);

        assert_eq!(hits.get(), 0);
        assert_eq!(signal.listener_count(), 0);
    }

    #[test]
    fn test_subscription_may_outlive_signal() {
        let signal = SessionSignal::new();
        let sub = signal.subscribe(|_| {});
        drop(signal);
        drop(sub);
    }

    #[test]
    fn test_listener_may_subscribe_during_emit() {
        let signal = SessionSignal::new();
        let late: Rc<RefCell<Vec<Subscription>>> = Rc::default();
        let (sig, store) = (signal.clone(), late.clone());
        let _sub = signal.subscribe(move |_| {
            store.borrow_mut().push(sig.subscribe(|_| {}));
        });

        signal.emit(SessionEvent::Activated);

        assert_eq!(signal.listener_count(), 2);
    }
}
