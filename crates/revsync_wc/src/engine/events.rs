//! Event dispatch with scoped suppression.
//!
//! The engine notifies a caller-supplied handler per path. During a
//! directory deletion the handler is temporarily swapped for one that
//! filters the cascade of child notifications; the swap is held by a
//! guard whose drop restores the previous handler on every exit path,
//! cancellation included.

use crate::paths;
use std::cell::RefCell;
use std::rc::Rc;

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    /// The path was added.
    Added,
    /// The path was scheduled for deletion.
    Deleted,
    /// The path's content or properties were updated.
    Updated,
    /// The path ended up in conflict.
    Conflicted,
    /// A missing file was restored from its pristine base.
    Restored,
}

/// One notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Working-copy path, `/`-separated, relative to the operation root.
    pub path: String,
    /// What happened.
    pub action: EventAction,
}

/// Receiver for progress notifications.
pub trait EventHandler {
    /// Called once per notified path.
    fn handle_event(&self, event: &Event);
}

/// The engine's swappable handler slot.
pub(crate) type EventSlot = Rc<RefCell<Option<Rc<dyn EventHandler>>>>;

/// Creates a slot holding `handler`.
pub(crate) fn new_slot(handler: Option<Rc<dyn EventHandler>>) -> EventSlot {
    Rc::new(RefCell::new(handler))
}

/// Sends one event through the slot's current handler.
pub(crate) fn send(slot: &EventSlot, path: &str, action: EventAction) {
    if let Some(handler) = slot.borrow().as_ref() {
        handler.handle_event(&Event {
            path: path.to_string(),
            action,
        });
    }
}

/// Swaps the slot's handler and restores the previous one on drop.
pub(crate) struct DispatcherGuard {
    slot: EventSlot,
    saved: Option<Rc<dyn EventHandler>>,
}

impl DispatcherGuard {
    pub(crate) fn swap(slot: &EventSlot, new: Option<Rc<dyn EventHandler>>) -> Self {
        let saved = slot.replace(new);
        Self {
            slot: Rc::clone(slot),
            saved,
        }
    }
}

impl Drop for DispatcherGuard {
    fn drop(&mut self) {
        self.slot.replace(self.saved.take());
    }
}

/// Forwards events except those at or under `base`.
pub(crate) struct SuppressUnder {
    pub(crate) base: String,
    pub(crate) inner: Option<Rc<dyn EventHandler>>,
}

impl EventHandler for SuppressUnder {
    fn handle_event(&self, event: &Event) {
        if paths::is_under(&event.path, &self.base) {
            return;
        }
        if let Some(inner) = &self.inner {
            inner.handle_event(event);
        }
    }
}

/// Swallows everything.
pub(crate) struct Silent;

impl EventHandler for Silent {
    fn handle_event(&self, _event: &Event) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(RefCell<Vec<String>>);

    impl EventHandler for Recorder {
        fn handle_event(&self, event: &Event) {
            self.0.borrow_mut().push(event.path.clone());
        }
    }

    #[test]
    fn guard_restores_on_drop() {
        let recorder = Rc::new(Recorder::default());
        let slot = new_slot(Some(recorder.clone()));
        {
            let guard = DispatcherGuard::swap(
                &slot,
                Some(Rc::new(SuppressUnder {
                    base: "dir".to_string(),
                    inner: guard_saved(&slot),
                })),
            );
            let _ = &guard;
            send(&slot, "dir/child", EventAction::Deleted);
            send(&slot, "other", EventAction::Updated);
        }
        send(&slot, "dir/child2", EventAction::Deleted);
        assert_eq!(*recorder.0.borrow(), vec!["other", "dir/child2"]);
    }

    // The guard swaps before we can read the saved handler; grab the
    // current one up front in real code. Here the slot still holds it.
    fn guard_saved(slot: &EventSlot) -> Option<Rc<dyn EventHandler>> {
        slot.borrow().clone()
    }

    #[test]
    fn guard_restores_during_unwind() {
        let recorder = Rc::new(Recorder::default());
        let slot = new_slot(Some(recorder.clone()));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = DispatcherGuard::swap(&slot, Some(Rc::new(Silent)));
            panic!("cancelled");
        }));
        assert!(result.is_err());
        send(&slot, "after", EventAction::Updated);
        assert_eq!(*recorder.0.borrow(), vec!["after"]);
    }
}
