//! This module contains the typed event plumbing through which the engine
//! notifies its subscribers of state-lifecycle occurrences.
//!
//! Each emitting component owns its own listener list. Delivery is
//! synchronous, exactly once per occurrence, and in subscription order, so
//! tracers and coverage tools observe occurrences in the causal order the
//! single active execution stream produced them. Subscriptions are
//! RAII-scoped: dropping the [`Subscription`] token unhooks the listener.

use std::{
    cell::{Cell, RefCell},
    fmt::Formatter,
    rc::Rc,
};

use crate::state::{constraints::Constraint, StateId};

/// A notification that an execution state forked at a divergence point.
///
/// The event is ephemeral: it is consumed synchronously by subscribers and
/// never retained by the engine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ForkEvent {
    /// The state that reached the divergence point.
    pub origin: StateId,

    /// The guest program counter of the divergence point.
    pub location: u64,

    /// The successor states, in true-branch-first order.
    ///
    /// A lone entry equal to `origin` means only one branch was feasible and
    /// the successor took over the parent's identifier.
    pub children: Vec<StateId>,

    /// The branch constraint asserted on each successor, index-aligned with
    /// `children`.
    pub conditions: Vec<Constraint>,
}

/// A notification that the emulator switched to executing a different state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SwitchEvent {
    /// The previously bound state, if any state had run before.
    pub previous: Option<StateId>,

    /// The state now bound to the emulator.
    pub next: StateId,
}

/// A notification that a state was removed from the pool for good.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TerminationEvent {
    /// The state that was terminated.
    pub state: StateId,

    /// Why the state was terminated.
    pub reason: TerminationReason,
}

/// The reasons for which the lifecycle manager terminates a state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TerminationReason {
    /// The running program exited or reached a terminal instruction.
    GuestExit,

    /// Both branches of a divergence point were infeasible.
    InfeasiblePath,

    /// An explicit kill request from a collaborator.
    Killed,

    /// The state lost the pruning pass after a coverage timeout or a
    /// kill-all-but-one request.
    Pruned,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::GuestExit => "guest exit",
            Self::InfeasiblePath => "infeasible path",
            Self::Killed => "killed",
            Self::Pruned => "pruned",
        };
        write!(f, "{text}")
    }
}

/// One registered listener.
struct Entry<E> {
    /// Cleared by the subscription token to unhook the listener.
    alive: Rc<Cell<bool>>,

    /// The listener callback.
    callback: Box<dyn FnMut(&E)>,
}

/// A typed listener list owned by an emitting component.
///
/// Listeners may subscribe new listeners from within a delivery; the new
/// listeners only observe occurrences after the current one. Listeners must
/// not emit on the same list they are subscribed to.
pub struct Listeners<E> {
    entries: Rc<RefCell<Vec<Entry<E>>>>,
}

impl<E> Listeners<E> {
    /// Creates a listener list with no listeners.
    #[must_use]
    pub fn new() -> Self {
        let entries = Rc::new(RefCell::new(Vec::new()));
        Self { entries }
    }

    /// Registers `callback` to be invoked on every emitted event, returning
    /// the token that keeps the subscription alive.
    pub fn subscribe(&self, callback: impl FnMut(&E) + 'static) -> Subscription {
        let alive = Rc::new(Cell::new(true));
        let entry = Entry {
            alive: alive.clone(),
            callback: Box::new(callback),
        };
        self.entries.borrow_mut().push(entry);

        Subscription { alive }
    }

    /// Delivers `event` to every live listener, in subscription order.
    pub fn emit(&self, event: &E) {
        // The entries are taken out for the duration of the delivery so that
        // a listener subscribing re-entrantly does not alias the borrow.
        let mut entries = std::mem::take(&mut *self.entries.borrow_mut());
        for entry in &mut entries {
            if entry.alive.get() {
                (entry.callback)(event);
            }
        }
        entries.retain(|entry| entry.alive.get());

        let mut inner = self.entries.borrow_mut();
        let subscribed_during_delivery = std::mem::take(&mut *inner);
        entries.extend(subscribed_during_delivery);
        *inner = entries;
    }

    /// Gets the number of live listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|entry| entry.alive.get())
            .count()
    }

    /// Checks whether no listeners are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners").field("len", &self.len()).finish()
    }
}

/// The RAII token for one listener registration.
///
/// Dropping the token unhooks the listener from the list it was subscribed
/// to.
#[derive(Debug)]
pub struct Subscription {
    alive: Rc<Cell<bool>>,
}

impl Subscription {
    /// Keeps the listener subscribed for the lifetime of the listener list.
    pub fn detach(self) {
        std::mem::forget(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.alive.set(false);
    }
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, rc::Rc};

    use crate::events::Listeners;

    #[test]
    fn delivers_in_subscription_order() {
        let listeners: Listeners<u64> = Listeners::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let first = seen.clone();
        let _a = listeners.subscribe(move |event| first.borrow_mut().push(("a", *event)));
        let second = seen.clone();
        let _b = listeners.subscribe(move |event| second.borrow_mut().push(("b", *event)));

        listeners.emit(&1);
        listeners.emit(&2);

        assert_eq!(
            *seen.borrow(),
            vec![("a", 1), ("b", 1), ("a", 2), ("b", 2)]
        );
    }

    #[test]
    fn dropping_the_token_unhooks_the_listener() {
        let listeners: Listeners<u64> = Listeners::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let sink = seen.clone();
        let token = listeners.subscribe(move |event| sink.borrow_mut().push(*event));
        listeners.emit(&1);
        drop(token);
        listeners.emit(&2);

        assert_eq!(*seen.borrow(), vec![1]);
        assert!(listeners.is_empty());
    }

    #[test]
    fn detached_tokens_outlive_their_scope() {
        let listeners: Listeners<u64> = Listeners::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        {
            let sink = seen.clone();
            listeners.subscribe(move |event| sink.borrow_mut().push(*event)).detach();
        }
        listeners.emit(&7);

        assert_eq!(*seen.borrow(), vec![7]);
    }
}
