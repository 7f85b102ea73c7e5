//! Per-endpoint listener registry
//!
//! Each endpoint owns one `Listeners` per event it can emit. There is no
//! shared bus: handlers registered on one endpoint never see another's events.
//!
//! Terminal events (`end`, `error`, `close`, `finish`) are emitted with
//! [`Listeners::emit_final`]. The argument is latched, so a handler
//! registered after the fact still runs, immediately, on the caller's thread.
//! Lists that will never fire again are sealed: their handlers are dropped
//! and later registrations are ignored.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::lock;

type Callback<A> = Box<dyn FnMut(&A) + Send + 'static>;

struct Handler<A> {
    callback: Callback<A>,
    once: bool,
}

enum Latch<A> {
    Open,
    Sealed,
    Fired(Arc<A>),
}

/// Ordered set of handlers for a single event
pub struct Listeners<A> {
    handlers: Mutex<Vec<Handler<A>>>,
    latch: Mutex<Latch<A>>,
}

impl<A> Default for Listeners<A> {
    fn default() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            latch: Mutex::new(Latch::Open),
        }
    }
}

impl<A> Listeners<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler that runs on every emission
    pub fn on<F>(&self, callback: F)
    where
        F: FnMut(&A) + Send + 'static,
    {
        self.push(Box::new(callback), false);
    }

    /// Register a handler that runs on the next emission only
    pub fn once<F>(&self, callback: F)
    where
        F: FnMut(&A) + Send + 'static,
    {
        self.push(Box::new(callback), true);
    }

    fn push(&self, mut callback: Callback<A>, once: bool) {
        // held across the push so a concurrent emit_final either sees this
        // handler or we see its argument
        let latch = lock(&self.latch);
        let replay = match &*latch {
            Latch::Open => {
                lock(&self.handlers).push(Handler { callback, once });
                return;
            }
            Latch::Sealed => None,
            Latch::Fired(arg) => Some(Arc::clone(arg)),
        };
        drop(latch);
        if let Some(arg) = replay {
            callback(&*arg);
        }
    }

    /// Run every handler in registration order.
    ///
    /// The handler list is detached while handlers run, so a handler may
    /// register more handlers or call back into its endpoint. Handlers added
    /// during an emission first run on the next one.
    pub fn emit(&self, arg: &A) -> bool {
        let mut running = std::mem::take(&mut *lock(&self.handlers));
        if running.is_empty() {
            return false;
        }
        for handler in running.iter_mut() {
            (handler.callback)(arg);
        }
        running.retain(|handler| !handler.once);

        let mut handlers = lock(&self.handlers);
        let added = std::mem::replace(&mut *handlers, running);
        handlers.extend(added);
        true
    }

    /// Emit `arg` for the last time and latch it.
    ///
    /// Every current handler runs once and is dropped. Handlers registered
    /// afterwards run immediately with the latched argument. Calling this
    /// again is a no-op.
    pub fn emit_final(&self, arg: A) -> bool {
        let arg = {
            let mut latch = lock(&self.latch);
            if let Latch::Fired(_) = *latch {
                return false;
            }
            let arg = Arc::new(arg);
            *latch = Latch::Fired(Arc::clone(&arg));
            arg
        };
        let mut running = std::mem::take(&mut *lock(&self.handlers));
        for handler in running.iter_mut() {
            (handler.callback)(&*arg);
        }
        !running.is_empty()
    }

    /// Whether `emit_final` has run
    pub fn is_latched(&self) -> bool {
        matches!(*lock(&self.latch), Latch::Fired(_))
    }

    /// Drop every handler and ignore later registrations. A list that
    /// already fired keeps replaying its final argument.
    pub fn seal(&self) {
        {
            let mut latch = lock(&self.latch);
            if let Latch::Open = *latch {
                *latch = Latch::Sealed;
            }
        }
        self.clear();
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.handlers).len()
    }

    /// Drop every handler. Captured state is released outside the lock.
    pub fn clear(&self) {
        let dropped = std::mem::take(&mut *lock(&self.handlers));
        drop(dropped);
    }
}

impl<A> fmt::Debug for Listeners<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_emit_in_registration_order() {
        let listeners: Listeners<u32> = Listeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..3 {
            let seen = seen.clone();
            listeners.on(move |value: &u32| seen.lock().unwrap().push((tag, *value)));
        }

        assert!(listeners.emit(&7));
        assert_eq!(*seen.lock().unwrap(), vec![(0, 7), (1, 7), (2, 7)]);
    }

    #[test]
    fn test_once_runs_a_single_time() {
        let listeners: Listeners<()> = Listeners::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        listeners.once(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(listeners.emit(&()));
        assert!(!listeners.emit(&()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(listeners.listener_count(), 0);
    }

    #[test]
    fn test_handler_can_register_during_emit() {
        let listeners: Arc<Listeners<()>> = Arc::new(Listeners::new());
        let count = Arc::new(AtomicUsize::new(0));

        let inner = listeners.clone();
        let counter = count.clone();
        listeners.once(move |_| {
            let counter = counter.clone();
            inner.on(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        listeners.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        listeners.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_final_emit_replays_to_late_handlers() {
        let listeners: Listeners<String> = Listeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let early = seen.clone();
        listeners.on(move |value: &String| early.lock().unwrap().push(format!("early:{}", value)));
        assert!(listeners.emit_final("done".to_string()));
        assert!(listeners.is_latched());
        assert_eq!(listeners.listener_count(), 0);

        let late = seen.clone();
        listeners.once(move |value: &String| late.lock().unwrap().push(format!("late:{}", value)));
        assert!(!listeners.emit_final("again".to_string()));

        assert_eq!(*seen.lock().unwrap(), vec!["early:done", "late:done"]);
        assert_eq!(listeners.listener_count(), 0);
    }

    #[test]
    fn test_sealed_list_drops_handlers() {
        let listeners: Listeners<()> = Listeners::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        listeners.on(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        listeners.seal();
        assert_eq!(listeners.listener_count(), 0);
        let counter = count.clone();
        listeners.on(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(listeners.listener_count(), 0);
        assert!(!listeners.emit(&()));
        assert!(!listeners.is_latched());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_final_emit_reaches_handler_added_while_emitting() {
        let listeners: Arc<Listeners<()>> = Arc::new(Listeners::new());
        let count = Arc::new(AtomicUsize::new(0));

        let inner = listeners.clone();
        let counter = count.clone();
        listeners.on(move |_| {
            let counter = counter.clone();
            inner.on(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        listeners.emit_final(());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
