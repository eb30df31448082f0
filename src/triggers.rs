//! Synchronous publish/subscribe with named channels.
//!
//! The host application drives this crate through events: marker edits,
//! instance drags, list-level changes. A [`TriggerSet`] dispatches those
//! events to per-channel observer lists, synchronously and on the caller's
//! thread (the core is single-threaded by design).
//!
//! Feedback cycles — a handler mutating the entity it is reacting to —
//! are cut by [`TriggerSet::block`]: a scoped guard that suppresses one
//! channel until dropped, released on all exit paths. Handlers for a
//! channel are also never re-entered from within their own dispatch.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};

/// An event that can be dispatched through a [`TriggerSet`].
pub trait Message {
    /// The channel this event is published on.
    fn channel(&self) -> &'static str;
}

/// Identifies a registered handler for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Handler<M> {
    id: HandlerId,
    func: Box<dyn FnMut(&M)>,
}

struct Inner<M> {
    handlers: FxHashMap<&'static str, Vec<Handler<M>>>,
    blocked: FxHashMap<&'static str, usize>,
    /// Handlers removed while their channel was mid-dispatch.
    dead: FxHashSet<HandlerId>,
    next_id: u64,
}

/// Observer lists keyed by channel name.
///
/// Cloning shares the underlying channel state, so components can hand out
/// subscription handles while retaining the ability to publish.
pub struct TriggerSet<M> {
    inner: Rc<RefCell<Inner<M>>>,
}

impl<M> Clone for TriggerSet<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<M: Message> TriggerSet<M> {
    /// An empty trigger set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                handlers: FxHashMap::default(),
                blocked: FxHashMap::default(),
                dead: FxHashSet::default(),
                next_id: 0,
            })),
        }
    }

    /// Register a handler on `channel`. Returns an id for removal.
    pub fn add_handler(
        &self,
        channel: &'static str,
        func: impl FnMut(&M) + 'static,
    ) -> HandlerId {
        let mut inner = self.inner.borrow_mut();
        let id = HandlerId(inner.next_id);
        inner.next_id += 1;
        inner.handlers.entry(channel).or_default().push(Handler {
            id,
            func: Box::new(func),
        });
        id
    }

    /// Remove a handler by id. Unknown ids are ignored.
    pub fn remove_handler(&self, id: HandlerId) {
        let mut inner = self.inner.borrow_mut();
        let mut found = false;
        for list in inner.handlers.values_mut() {
            let before = list.len();
            list.retain(|h| h.id != id);
            found |= list.len() != before;
        }
        if !found {
            // The handler may currently be checked out by a dispatch.
            let _ = inner.dead.insert(id);
        }
    }

    /// Whether `channel` is currently suppressed.
    #[must_use]
    pub fn is_blocked(&self, channel: &str) -> bool {
        self.inner
            .borrow()
            .blocked
            .get(channel)
            .is_some_and(|&n| n > 0)
    }

    /// Suppress `channel` until the returned guard is dropped. Guards nest.
    #[must_use]
    pub fn block(&self, channel: &'static str) -> BlockGuard<M> {
        *self
            .inner
            .borrow_mut()
            .blocked
            .entry(channel)
            .or_insert(0) += 1;
        BlockGuard {
            inner: Rc::clone(&self.inner),
            channel,
        }
    }

    /// Dispatch `message` to every handler of its channel.
    ///
    /// Suppressed channels drop the message. Handlers registered during
    /// dispatch are kept but not invoked for the current message.
    pub fn activate(&self, message: &M) {
        let channel = message.channel();
        let mut checked_out = {
            let mut inner = self.inner.borrow_mut();
            if inner.blocked.get(channel).is_some_and(|&n| n > 0) {
                return;
            }
            match inner.handlers.remove(channel) {
                Some(list) => list,
                None => return,
            }
        };

        // The borrow is released while handlers run, so handlers may
        // register, remove, block, or publish on other channels.
        for handler in &mut checked_out {
            (handler.func)(message);
        }

        let mut inner = self.inner.borrow_mut();
        if !inner.dead.is_empty() {
            let dead = std::mem::take(&mut inner.dead);
            checked_out.retain(|h| !dead.contains(&h.id));
        }
        let newly_added = inner.handlers.remove(channel).unwrap_or_default();
        checked_out.extend(newly_added);
        if !checked_out.is_empty() {
            let _ = inner.handlers.insert(channel, checked_out);
        }
    }
}

impl<M: Message> Default for TriggerSet<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped suppression of one channel; dropping releases the block.
pub struct BlockGuard<M> {
    inner: Rc<RefCell<Inner<M>>>,
    channel: &'static str,
}

impl<M> Drop for BlockGuard<M> {
    fn drop(&mut self) {
        let mut inner = self.inner.borrow_mut();
        if let Some(count) = inner.blocked.get_mut(self.channel) {
            *count = count.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug)]
    enum Ping {
        A(u32),
        B,
    }

    impl Message for Ping {
        fn channel(&self) -> &'static str {
            match self {
                Self::A(_) => "a",
                Self::B => "b",
            }
        }
    }

    #[test]
    fn handlers_fire_per_channel() {
        let triggers: TriggerSet<Ping> = TriggerSet::new();
        let seen = Rc::new(Cell::new(0));

        let seen_a = Rc::clone(&seen);
        let _id = triggers.add_handler("a", move |msg| {
            if let Ping::A(v) = msg {
                seen_a.set(seen_a.get() + v);
            }
        });

        triggers.activate(&Ping::A(3));
        triggers.activate(&Ping::B);
        triggers.activate(&Ping::A(4));
        assert_eq!(seen.get(), 7);
    }

    #[test]
    fn block_guard_suppresses_until_dropped() {
        let triggers: TriggerSet<Ping> = TriggerSet::new();
        let seen = Rc::new(Cell::new(0));

        let seen_a = Rc::clone(&seen);
        let _id = triggers.add_handler("a", move |_| {
            seen_a.set(seen_a.get() + 1);
        });

        {
            let _guard = triggers.block("a");
            assert!(triggers.is_blocked("a"));
            triggers.activate(&Ping::A(0));
        }
        assert!(!triggers.is_blocked("a"));
        triggers.activate(&Ping::A(0));
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn removed_handler_stops_firing() {
        let triggers: TriggerSet<Ping> = TriggerSet::new();
        let seen = Rc::new(Cell::new(0));

        let seen_a = Rc::clone(&seen);
        let id = triggers.add_handler("a", move |_| {
            seen_a.set(seen_a.get() + 1);
        });

        triggers.activate(&Ping::A(0));
        triggers.remove_handler(id);
        triggers.activate(&Ping::A(0));
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn handler_added_during_dispatch_persists() {
        let triggers: TriggerSet<Ping> = TriggerSet::new();
        let seen = Rc::new(Cell::new(0));

        let reg = triggers.clone();
        let seen_outer = Rc::clone(&seen);
        let _id = triggers.add_handler("a", move |_| {
            let seen_inner = Rc::clone(&seen_outer);
            let _new = reg.add_handler("a", move |_| {
                seen_inner.set(seen_inner.get() + 1);
            });
        });

        triggers.activate(&Ping::A(0));
        assert_eq!(seen.get(), 0);
        triggers.activate(&Ping::A(0));
        assert_eq!(seen.get(), 1);
    }
}
