//! Take-a-ticket ordering for listener callbacks.
//!
//! A ticket is taken while the core lock is held, so ticket order equals the
//! order of the state transitions. The callback itself runs after the core
//! lock is dropped; `CallbackSequencer::deliver` parks the caller until every
//! earlier ticket has been delivered.

use parking_lot::{Condvar, Mutex};

/// Position of one callback in the delivery order
#[must_use = "an undelivered ticket stalls every later callback"]
#[derive(Debug, PartialEq, Eq)]
pub struct Ticket(u64);

impl Ticket {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Hands out tickets; lives inside the state guarded by the core lock
#[derive(Debug, Default)]
pub struct TicketDispenser {
    next: u64,
}

impl TicketDispenser {
    pub fn take(&mut self) -> Ticket {
        let ticket = Ticket(self.next);
        self.next += 1;
        ticket
    }

    /// Number of tickets handed out so far
    pub fn issued(&self) -> u64 {
        self.next
    }
}

/// Releases callbacks strictly in ticket order
#[derive(Debug, Default)]
pub struct CallbackSequencer {
    current: Mutex<u64>,
    cond: Condvar,
}

struct Advance<'a>(&'a CallbackSequencer);

impl Drop for Advance<'_> {
    fn drop(&mut self) {
        *self.0.current.lock() += 1;
        self.0.cond.notify_all();
    }
}

impl CallbackSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` once every earlier ticket has been delivered.
    ///
    /// The ordering lock is not held while `f` runs. A callback that itself
    /// takes a ticket and delivers it would wait on its own caller forever,
    /// so listeners must not trigger consumer notifications re-entrantly.
    pub fn deliver<R>(&self, ticket: Ticket, f: impl FnOnce() -> R) -> R {
        {
            let mut current = self.current.lock();
            while *current != ticket.0 {
                self.cond.wait(&mut current);
            }
        }
        // advances even if the callback panics
        let _advance = Advance(self);
        f()
    }

    /// Next ticket value allowed to deliver
    pub fn current(&self) -> u64 {
        *self.current.lock()
    }
}
