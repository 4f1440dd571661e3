//! Generic publish/subscribe registry for input events.
//!
//! Listeners are keyed by an optional trigger (`None` means wildcard), can
//! be tagged for bulk removal and may be single-shot. Dispatch order is
//! registration order. The registry uses interior mutability so listener
//! callbacks may subscribe and unsubscribe reentrantly while a publication
//! is in flight; a listener removing itself from inside its own callback is
//! legal. A panicking callback is caught and logged at the bus boundary and
//! never aborts the remaining listeners.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use tracing::{debug, warn};

/// Opaque listener handle. Ids are never reused while the listener lives.
pub type ListenerId = u64;

type Callback<P> = Rc<RefCell<dyn FnMut(&P)>>;

struct ListenerConfig<T, P> {
    trigger: Option<T>,
    callback: Callback<P>,
    tag: Option<String>,
    single_shot: bool,
}

struct Inner<T, P> {
    next_id: ListenerId,
    // BTreeMap keyed by a monotonically increasing id keeps iteration in
    // registration order.
    listeners: BTreeMap<ListenerId, ListenerConfig<T, P>>,
}

pub struct Events<T, P> {
    inner: RefCell<Inner<T, P>>,
}

impl<T, P> Default for Events<T, P> {
    fn default() -> Self {
        Self {
            inner: RefCell::new(Inner {
                next_id: 0,
                listeners: BTreeMap::new(),
            }),
        }
    }
}

impl<T, P> Events<T, P>
where
    T: Clone + PartialEq + Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. `None` as trigger receives every publication.
    pub fn subscribe(
        &self,
        trigger: Option<T>,
        callback: impl FnMut(&P) + 'static,
        tag: Option<&str>,
        single_shot: bool,
    ) -> ListenerId {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.insert(
            id,
            ListenerConfig {
                trigger,
                callback: Rc::new(RefCell::new(callback)),
                tag: tag.map(|t| t.to_string()),
                single_shot,
            },
        );
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.inner.borrow_mut().listeners.remove(&id);
    }

    /// Removes every listener, or only those carrying `tag` when given.
    pub fn unsubscribe_all(&self, tag: Option<&str>) {
        let mut inner = self.inner.borrow_mut();
        match tag {
            None => inner.listeners.clear(),
            Some(tag) => inner
                .listeners
                .retain(|_, listener| listener.tag.as_deref() != Some(tag)),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.borrow().listeners.len()
    }

    /// Calls every listener registered for `trigger` (plus wildcards) in
    /// registration order. Synchronous; returns once all listeners ran.
    pub fn publish(&self, trigger: &T, payload: &P) {
        // Snapshot the matching listeners so callbacks are free to mutate
        // the registry while the publication is in flight.
        let matching: Vec<(ListenerId, Callback<P>, bool)> = {
            let inner = self.inner.borrow();
            inner
                .listeners
                .iter()
                .filter(|(_, l)| match &l.trigger {
                    None => true,
                    Some(t) => t == trigger,
                })
                .map(|(id, l)| (*id, Rc::clone(&l.callback), l.single_shot))
                .collect()
        };

        debug!(
            "Publishing {:?} to {} listener(s)",
            trigger,
            matching.len()
        );

        for (id, callback, single_shot) in matching {
            // A previous callback may have removed this one.
            if !self.inner.borrow().listeners.contains_key(&id) {
                continue;
            }

            let result = catch_unwind(AssertUnwindSafe(|| {
                (callback.borrow_mut())(payload);
            }));
            if result.is_err() {
                warn!(
                    "Listener {} panicked while handling {:?}, continuing with remaining listeners",
                    id, trigger
                );
            }

            // Single-shot listeners go away even when their callback
            // panicked.
            if single_shot {
                self.inner.borrow_mut().listeners.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type TestBus = Events<&'static str, u32>;

    fn recording_listener(log: &Rc<RefCell<Vec<String>>>, name: &'static str) -> impl FnMut(&u32) {
        let log = Rc::clone(log);
        move |payload| log.borrow_mut().push(format!("{name}:{payload}"))
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let bus = TestBus::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        bus.subscribe(Some("press"), recording_listener(&log, "first"), None, false);
        bus.subscribe(Some("press"), recording_listener(&log, "second"), None, false);
        bus.subscribe(Some("release"), recording_listener(&log, "other"), None, false);

        bus.publish(&"press", &7);

        assert_eq!(*log.borrow(), vec!["first:7", "second:7"]);
    }

    #[test]
    fn wildcard_listener_receives_every_trigger() {
        let bus = TestBus::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        bus.subscribe(None, recording_listener(&log, "any"), None, false);
        bus.publish(&"press", &1);
        bus.publish(&"release", &2);

        assert_eq!(*log.borrow(), vec!["any:1", "any:2"]);
    }

    #[test]
    fn single_shot_listener_fires_once() {
        let bus = TestBus::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        bus.subscribe(Some("press"), recording_listener(&log, "once"), None, true);
        bus.publish(&"press", &1);
        bus.publish(&"press", &2);

        assert_eq!(*log.borrow(), vec!["once:1"]);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn unsubscribe_by_tag_only_removes_tagged() {
        let bus = TestBus::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        bus.subscribe(
            Some("press"),
            recording_listener(&log, "tagged"),
            Some("mode"),
            false,
        );
        bus.subscribe(Some("press"), recording_listener(&log, "plain"), None, false);

        bus.unsubscribe_all(Some("mode"));
        bus.publish(&"press", &1);

        assert_eq!(*log.borrow(), vec!["plain:1"]);
    }

    #[test]
    fn unsubscribe_all_without_tag_clears_everything() {
        let bus = TestBus::new();
        bus.subscribe(Some("press"), |_| {}, Some("a"), false);
        bus.subscribe(None, |_| {}, None, false);

        bus.unsubscribe_all(None);

        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn listener_may_remove_itself_during_its_own_callback() {
        let bus = Rc::new(TestBus::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        let id_cell = Rc::new(RefCell::new(None));
        let bus2 = Rc::clone(&bus);
        let id_cell2 = Rc::clone(&id_cell);
        let log2 = Rc::clone(&log);
        let id = bus.subscribe(
            Some("press"),
            move |_| {
                log2.borrow_mut().push("self-remove".to_string());
                if let Some(id) = *id_cell2.borrow() {
                    bus2.unsubscribe(id);
                }
            },
            None,
            false,
        );
        *id_cell.borrow_mut() = Some(id);

        bus.publish(&"press", &1);
        bus.publish(&"press", &2);

        assert_eq!(*log.borrow(), vec!["self-remove"]);
    }

    #[test]
    fn listener_may_subscribe_during_publish() {
        let bus = Rc::new(TestBus::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        let bus2 = Rc::clone(&bus);
        let log2 = Rc::clone(&log);
        bus.subscribe(
            Some("press"),
            move |_| {
                let log3 = Rc::clone(&log2);
                bus2.subscribe(
                    Some("press"),
                    move |p| log3.borrow_mut().push(format!("late:{p}")),
                    None,
                    false,
                );
            },
            None,
            true,
        );

        // First publish registers the late listener but must not call it.
        bus.publish(&"press", &1);
        assert!(log.borrow().is_empty());

        bus.publish(&"press", &2);
        assert_eq!(*log.borrow(), vec!["late:2"]);
    }

    #[test]
    fn panicking_listener_does_not_abort_the_rest() {
        let bus = TestBus::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        bus.subscribe(Some("press"), |_| panic!("listener blew up"), None, true);
        bus.subscribe(Some("press"), recording_listener(&log, "after"), None, false);

        bus.publish(&"press", &1);

        assert_eq!(*log.borrow(), vec!["after:1"]);
        // The single-shot panicker is gone, the survivor remains.
        assert_eq!(bus.listener_count(), 1);
    }
}
